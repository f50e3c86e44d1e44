//! Value Area Calculator
//!
//! # Adaptive Bin Width
//!
//! ```text
//! raw       = alpha_bin * mid_close * sigma_240
//! candidate = clamp(round(raw / tick) * tick, tick, bin_width_max)
//! ```
//!
//! The candidate is computed every minute but only adopted when it moves by
//! at least `rebucket_change_pct` relative to the active width, or when
//! `rebucket_interval_minutes` have passed since the last adoption. Adoption
//! re-aggregates the tick-resolution base histogram; raw trades are never
//! replayed.
//!
//! # Contiguous Expansion
//!
//! 1. POC = bucket with max volume; ties go to the lowest price.
//! 2. Grow one bucket at a time toward the heavier neighbor; ties go up.
//!    Empty buckets between populated ones count as neighbors with zero volume.
//! 3. Stop as soon as covered volume >= `va_fraction * total`.

use crate::auction::clock::{minutes_between, TimestampMs};
use crate::auction::histogram::{fixed_to_volume, tick_to_price, Tick, Volume};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Value area snapshot for one minute.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueArea {
    pub poc: f64,
    pub vah: f64,
    pub val: f64,
    pub bin_width: f64,
    /// Covered volume / total volume.
    pub coverage: f64,
    /// Aggregated buckets with non-zero volume.
    pub populated_bins: usize,
    pub total_volume: f64,
    pub is_valid: bool,
}

impl ValueArea {
    pub fn invalid(bin_width: f64) -> Self {
        Self {
            poc: 0.0,
            vah: 0.0,
            val: 0.0,
            bin_width,
            coverage: 0.0,
            populated_bins: 0,
            total_volume: 0.0,
            is_valid: false,
        }
    }

    /// Where a price sits relative to value.
    pub fn zone(&self, price: f64) -> PriceZone {
        if price > self.vah {
            PriceZone::AboveVah
        } else if price < self.val {
            PriceZone::BelowVal
        } else {
            PriceZone::Inside
        }
    }
}

/// Price location relative to the value area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceZone {
    AboveVah,
    Inside,
    BelowVal,
}

/// Contiguous bucket run `[lo_key, hi_key]` chosen by expansion, with the
/// order buckets were added (POC first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expansion {
    pub poc_key: Tick,
    pub lo_key: Tick,
    pub hi_key: Tick,
    pub covered: Volume,
    pub order: Vec<Tick>,
}

/// Run contiguous expansion over an aggregated histogram whose keys are
/// multiples of `ticks_per_bin`. Returns `None` for an empty histogram.
pub fn expand_value_area(
    buckets: &BTreeMap<Tick, Volume>,
    ticks_per_bin: i64,
    va_fraction: f64,
) -> Option<Expansion> {
    let k = ticks_per_bin.max(1);
    let total: Volume = buckets.values().sum();
    if total <= 0 {
        return None;
    }

    // BTreeMap iterates ascending, so the first strict maximum is the lowest price.
    let mut poc_key = *buckets.keys().next()?;
    let mut poc_vol = Volume::MIN;
    for (&key, &vol) in buckets {
        if vol > poc_vol {
            poc_key = key;
            poc_vol = vol;
        }
    }

    let min_key = *buckets.keys().next()?;
    let max_key = *buckets.keys().next_back()?;
    let target = (va_fraction * total as f64).ceil() as Volume;
    let vol_at = |key: Tick| buckets.get(&key).copied().unwrap_or(0);

    let mut lo = poc_key;
    let mut hi = poc_key;
    let mut covered = poc_vol;
    let mut order = vec![poc_key];

    while covered < target {
        let can_up = hi + k <= max_key;
        let can_down = lo - k >= min_key;
        let next = match (can_up, can_down) {
            (false, false) => break,
            (true, false) => hi + k,
            (false, true) => lo - k,
            (true, true) => {
                if vol_at(hi + k) >= vol_at(lo - k) {
                    hi + k
                } else {
                    lo - k
                }
            }
        };
        if next > hi {
            hi = next;
        } else {
            lo = next;
        }
        covered += vol_at(next);
        order.push(next);
    }

    Some(Expansion {
        poc_key,
        lo_key: lo,
        hi_key: hi,
        covered,
        order,
    })
}

/// Compute the value area from an aggregated histogram.
pub fn compute_value_area(
    buckets: &BTreeMap<Tick, Volume>,
    ticks_per_bin: i64,
    tick_size: f64,
    va_fraction: f64,
    min_bins: usize,
) -> ValueArea {
    let bin_width = ticks_per_bin.max(1) as f64 * tick_size;
    let populated_bins = buckets.values().filter(|v| **v > 0).count();

    let Some(exp) = expand_value_area(buckets, ticks_per_bin, va_fraction) else {
        return ValueArea::invalid(bin_width);
    };

    let total: Volume = buckets.values().sum();
    ValueArea {
        poc: tick_to_price(exp.poc_key, tick_size),
        vah: tick_to_price(exp.hi_key, tick_size),
        val: tick_to_price(exp.lo_key, tick_size),
        bin_width,
        coverage: exp.covered as f64 / total as f64,
        populated_bins,
        total_volume: fixed_to_volume(total),
        is_valid: populated_bins >= min_bins,
    }
}

// =============================================================================
// ADAPTIVE BIN WIDTH
// =============================================================================

/// Outcome of a per-minute bin width evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinWidthUpdate {
    pub candidate: f64,
    pub active: f64,
    pub adopted: bool,
}

/// Bin width policy with rebucketing hysteresis.
#[derive(Debug, Clone)]
pub struct AdaptiveBinWidth {
    tick_size: f64,
    alpha_bin: f64,
    bin_width_max: f64,
    rebucket_interval_minutes: u32,
    rebucket_change_pct: f64,
    active: f64,
    last_adopted_min: Option<TimestampMs>,
}

impl AdaptiveBinWidth {
    pub fn new(
        tick_size: f64,
        alpha_bin: f64,
        bin_width_max: f64,
        rebucket_interval_minutes: u32,
        rebucket_change_pct: f64,
    ) -> Self {
        Self {
            tick_size,
            alpha_bin,
            bin_width_max: bin_width_max.max(tick_size),
            rebucket_interval_minutes,
            rebucket_change_pct,
            active: tick_size,
            last_adopted_min: None,
        }
    }

    /// Candidate width for the given mid and volatility.
    pub fn candidate(&self, mid_close: f64, sigma: f64) -> f64 {
        let raw = self.alpha_bin * mid_close * sigma;
        let rounded = (raw / self.tick_size).round() * self.tick_size;
        rounded.clamp(self.tick_size, self.bin_width_max)
    }

    /// Evaluate the candidate for minute `ts_min` and adopt it when warranted.
    pub fn update(&mut self, ts_min: TimestampMs, mid_close: f64, sigma: f64) -> BinWidthUpdate {
        let candidate = self.candidate(mid_close, sigma);
        let adopt = match self.last_adopted_min {
            None => true,
            Some(last) => {
                let elapsed = minutes_between(last, ts_min);
                let change = ((candidate - self.active) / self.active).abs();
                elapsed >= self.rebucket_interval_minutes as i64
                    || change >= self.rebucket_change_pct - 1e-12
            }
        };

        if adopt {
            self.active = candidate;
            self.last_adopted_min = Some(ts_min);
        }

        BinWidthUpdate {
            candidate,
            active: self.active,
            adopted: adopt,
        }
    }

    #[inline]
    pub fn active(&self) -> f64 {
        self.active
    }

    /// Active width as a whole number of ticks.
    #[inline]
    pub fn ticks_per_bin(&self) -> i64 {
        ((self.active / self.tick_size).round() as i64).max(1)
    }
}

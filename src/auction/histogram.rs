//! Rolling Volume Histogram
//!
//! A trailing volume-at-price distribution at tick resolution over the last
//! N completed minutes (240 by default).
//!
//! # Structure
//!
//! ```text
//!   pending minute ──flush──▶ [delta_0, delta_1, ..., delta_{N-1}]  (VecDeque)
//!                                   │ add on push, subtract on evict
//!                                   ▼
//!                              aggregate: BTreeMap<Tick, Volume>
//! ```
//!
//! - Keys are integer tick indices `floor(price / tick_size)`.
//! - Volumes are fixed-point integers (`VOLUME_SCALE`), so add-then-subtract
//!   returns exactly to zero and zero buckets can be removed by equality.
//! - The aggregate always equals the sum of the retained deltas.
//! - The oldest delta is evicted exactly when the window exceeds N entries.

use crate::auction::clock::TimestampMs;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Integer tick index of a price bucket.
pub type Tick = i64;

/// Fixed-point traded volume.
pub type Volume = i64;

/// Scale factor for fixed-point volume (1e-8 resolution).
pub const VOLUME_SCALE: i64 = 100_000_000;

/// Guard against `49999.99999999` style float error when flooring to ticks.
const TICK_EPSILON: f64 = 1e-6;

/// Convert a price to its tick index (floor).
#[inline]
pub fn price_to_tick(price: f64, tick_size: f64) -> Tick {
    (price / tick_size + TICK_EPSILON).floor() as Tick
}

/// Convert a tick index back to the bucket's lower-edge price.
#[inline]
pub fn tick_to_price(tick: Tick, tick_size: f64) -> f64 {
    tick as f64 * tick_size
}

/// Convert f64 size to fixed-point volume.
#[inline]
pub fn volume_to_fixed(size: f64) -> Volume {
    (size * VOLUME_SCALE as f64).round() as Volume
}

/// Convert fixed-point volume back to f64.
#[inline]
pub fn fixed_to_volume(v: Volume) -> f64 {
    v as f64 / VOLUME_SCALE as f64
}

/// Volume traded at each tick during one minute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinuteDelta {
    pub ts_min: TimestampMs,
    pub bins: BTreeMap<Tick, Volume>,
}

impl MinuteDelta {
    pub fn total(&self) -> Volume {
        self.bins.values().sum()
    }
}

/// Sliding-window volume-at-price histogram.
#[derive(Debug, Clone)]
pub struct RollingHistogram {
    tick_size: f64,
    max_minutes: usize,
    window: VecDeque<MinuteDelta>,
    aggregate: BTreeMap<Tick, Volume>,
    pending: BTreeMap<Tick, Volume>,
}

impl RollingHistogram {
    pub fn new(tick_size: f64, max_minutes: usize) -> Self {
        Self {
            tick_size,
            max_minutes,
            window: VecDeque::with_capacity(max_minutes + 1),
            aggregate: BTreeMap::new(),
            pending: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn tick_size(&self) -> f64 {
        self.tick_size
    }

    #[inline]
    pub fn max_minutes(&self) -> usize {
        self.max_minutes
    }

    /// Number of per-minute deltas currently retained.
    #[inline]
    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Window is full.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.window.len() >= self.max_minutes
    }

    /// Add a trade to the in-progress minute.
    pub fn add_trade(&mut self, price: f64, size: f64) {
        let tick = price_to_tick(price, self.tick_size);
        *self.pending.entry(tick).or_insert(0) += volume_to_fixed(size);
    }

    /// Ticks traded so far in the in-progress minute.
    pub fn pending(&self) -> &BTreeMap<Tick, Volume> {
        &self.pending
    }

    /// Close the in-progress minute: push its delta, evict the oldest if the
    /// window now exceeds its bound. Returns the evicted delta, if any.
    pub fn flush_minute(&mut self, ts_min: TimestampMs) -> Option<MinuteDelta> {
        let bins = std::mem::take(&mut self.pending);
        self.push_delta(MinuteDelta { ts_min, bins })
    }

    /// Push a completed minute delta.
    pub fn push_delta(&mut self, delta: MinuteDelta) -> Option<MinuteDelta> {
        for (&tick, &vol) in &delta.bins {
            *self.aggregate.entry(tick).or_insert(0) += vol;
        }
        self.window.push_back(delta);

        if self.window.len() > self.max_minutes {
            let evicted = self.window.pop_front()?;
            for (tick, vol) in &evicted.bins {
                if let Some(agg) = self.aggregate.get_mut(tick) {
                    *agg -= vol;
                    if *agg == 0 {
                        self.aggregate.remove(tick);
                    }
                }
            }
            return Some(evicted);
        }
        None
    }

    /// Most recently completed minute.
    pub fn latest(&self) -> Option<&MinuteDelta> {
        self.window.back()
    }

    /// Tick-resolution aggregate over the window.
    pub fn aggregate(&self) -> &BTreeMap<Tick, Volume> {
        &self.aggregate
    }

    pub fn total_volume(&self) -> Volume {
        self.aggregate.values().sum()
    }

    /// Group the base distribution into buckets of `ticks_per_bin` ticks.
    ///
    /// Bucket key is `floor(tick / k) * k`, the tick index of its lower edge.
    pub fn aggregate_to(&self, ticks_per_bin: i64) -> BTreeMap<Tick, Volume> {
        let k = ticks_per_bin.max(1);
        let mut out = BTreeMap::new();
        for (&tick, &vol) in &self.aggregate {
            let bucket = tick.div_euclid(k) * k;
            *out.entry(bucket).or_insert(0) += vol;
        }
        out
    }

    /// Recompute the aggregate from the retained deltas and report the first
    /// tick where it disagrees: `(tick, aggregate, expected)`.
    pub fn first_aggregate_mismatch(&self) -> Option<(Tick, Volume, Volume)> {
        let mut expected: BTreeMap<Tick, Volume> = BTreeMap::new();
        for delta in &self.window {
            for (&tick, &vol) in &delta.bins {
                *expected.entry(tick).or_insert(0) += vol;
            }
        }
        expected.retain(|_, v| *v != 0);

        for (&tick, &exp) in &expected {
            let agg = self.aggregate.get(&tick).copied().unwrap_or(0);
            if agg != exp {
                return Some((tick, agg, exp));
            }
        }
        for (&tick, &agg) in &self.aggregate {
            if !expected.contains_key(&tick) {
                return Some((tick, agg, 0));
            }
        }
        None
    }

    pub fn clear(&mut self) {
        self.window.clear();
        self.aggregate.clear();
        self.pending.clear();
    }
}

#[cfg(test)]
impl RollingHistogram {
    /// Lower the window bound without evicting, leaving the window over-full.
    pub(crate) fn shrink_bound_unchecked(&mut self, max_minutes: usize) {
        self.max_minutes = max_minutes;
    }
}

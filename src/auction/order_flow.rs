//! Order Flow & Imbalance Aggregator
//!
//! Per-minute summaries of directional pressure:
//! - `of_1m`: sum of sign * size
//! - `of_norm_1m`: of_1m / total volume
//! - `ambiguous_frac`: quote-ambiguous volume / total volume
//! - quote imbalance at close and as an intra-minute EMA
//!
//! Also owns the rolling average spread used as the boundary tolerance.

use crate::auction::events::{ClassifiedTrade, Direction, Quote};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Per-minute order flow summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderFlowMetrics {
    pub of_1m: f64,
    pub of_norm_1m: f64,
    pub total_volume: f64,
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub ambiguous_volume: f64,
    pub ambiguous_frac: f64,
}

/// Accumulates classified trades for the in-progress minute.
#[derive(Debug, Clone, Default)]
pub struct MinuteFlow {
    signed: f64,
    total: f64,
    buy: f64,
    sell: f64,
    ambiguous: f64,
}

impl MinuteFlow {
    pub fn add(&mut self, trade: &ClassifiedTrade) {
        let size = trade.trade.size;
        self.signed += trade.signed_size();
        self.total += size;
        match trade.sign {
            s if s > 0 => self.buy += size,
            s if s < 0 => self.sell += size,
            _ => {}
        }
        if trade.ambiguous {
            self.ambiguous += size;
        }
    }

    pub fn metrics(&self) -> OrderFlowMetrics {
        let (of_norm_1m, ambiguous_frac) = if self.total > 0.0 {
            (self.signed / self.total, self.ambiguous / self.total)
        } else {
            (0.0, 0.0)
        };
        OrderFlowMetrics {
            of_1m: self.signed,
            of_norm_1m,
            total_volume: self.total,
            buy_volume: self.buy,
            sell_volume: self.sell,
            ambiguous_volume: self.ambiguous,
            ambiguous_frac,
        }
    }

    /// Finish the minute and start a fresh accumulator.
    pub fn take(&mut self) -> OrderFlowMetrics {
        let metrics = self.metrics();
        *self = Self::default();
        metrics
    }
}

/// Intra-minute EMA of quote imbalance.
///
/// Restarts each minute from the first quote update; a minute with no
/// updates reports `None` and the caller falls back to the close snapshot.
#[derive(Debug, Clone)]
pub struct QuoteImbalanceTracker {
    alpha: f64,
    ema: Option<f64>,
    updates: u32,
}

impl QuoteImbalanceTracker {
    pub fn new(span: u32) -> Self {
        Self {
            alpha: 2.0 / (span.max(1) as f64 + 1.0),
            ema: None,
            updates: 0,
        }
    }

    pub fn on_quote(&mut self, quote: &Quote) {
        let x = quote.imbalance();
        self.ema = Some(match self.ema {
            Some(prev) => self.alpha * x + (1.0 - self.alpha) * prev,
            None => x,
        });
        self.updates += 1;
    }

    pub fn current(&self) -> Option<f64> {
        self.ema
    }

    pub fn updates(&self) -> u32 {
        self.updates
    }

    /// Minute average, resetting for the next minute.
    pub fn take_minute(&mut self) -> Option<f64> {
        let out = self.ema.take();
        self.updates = 0;
        out
    }
}

/// Rolling mean of minute-close spreads.
#[derive(Debug, Clone)]
pub struct SpreadTracker {
    lookback: usize,
    spreads: VecDeque<f64>,
    sum: f64,
    fallback: f64,
}

impl SpreadTracker {
    /// `fallback` is reported before any spread is observed (one tick).
    pub fn new(lookback: usize, fallback: f64) -> Self {
        Self {
            lookback: lookback.max(1),
            spreads: VecDeque::with_capacity(lookback + 1),
            sum: 0.0,
            fallback,
        }
    }

    pub fn push(&mut self, spread: f64) {
        if !spread.is_finite() || spread < 0.0 {
            return;
        }
        self.spreads.push_back(spread);
        self.sum += spread;
        if self.spreads.len() > self.lookback {
            if let Some(old) = self.spreads.pop_front() {
                self.sum -= old;
            }
        }
    }

    pub fn average(&self) -> f64 {
        if self.spreads.is_empty() {
            self.fallback
        } else {
            self.sum / self.spreads.len() as f64
        }
    }
}

/// Order-flow and imbalance thresholds for one setup, expressed for a long
/// confirmation. Shorts mirror every threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowThresholds {
    /// OF_1m must exceed this.
    pub of_min: f64,
    /// OF_norm_1m must be at least this.
    pub of_norm_min: f64,
    /// Minute-average qimb must be at least this.
    pub qimb_min: f64,
}

/// How order flow and quote imbalance combine into a confirmation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfirmationGate {
    pub ambiguous_frac_max: f64,
    pub use_qimb: bool,
}

/// Result of a confirmation check, kept on the signal for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub of_ok: bool,
    pub qimb_ok: bool,
    /// Ambiguous fraction exceeded the gate, so both were required.
    pub strict: bool,
    pub confirmed: bool,
}

impl ConfirmationGate {
    pub fn check(
        &self,
        direction: Direction,
        flow: &OrderFlowMetrics,
        qimb: f64,
        t: FlowThresholds,
    ) -> Confirmation {
        let s = direction.sign();
        let of_ok = s * flow.of_1m > t.of_min && s * flow.of_norm_1m >= t.of_norm_min;
        let qimb_ok = s * qimb >= t.qimb_min;
        let strict = flow.ambiguous_frac > self.ambiguous_frac_max;

        let confirmed = if !self.use_qimb {
            of_ok
        } else if strict {
            of_ok && qimb_ok
        } else {
            of_ok || qimb_ok
        };

        Confirmation {
            of_ok,
            qimb_ok,
            strict,
            confirmed,
        }
    }
}

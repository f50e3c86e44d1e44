//! Market Data Events and Derived Records
//!
//! Raw inputs (`Trade`, `Quote`) are immutable once ingested. Derived records
//! (`ClassifiedTrade`, `MinuteBar`) are produced exactly once by their owning
//! component and never mutated afterwards.

use crate::auction::clock::TimestampMs;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Trade direction / position side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    /// +1 for long, -1 for short.
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }
}

/// A trade print.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub ts_ms: TimestampMs,
    pub price: f64,
    pub size: f64,
}

/// Top-of-book quote.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub ts_ms: TimestampMs,
    pub bid_px: f64,
    pub bid_sz: f64,
    pub ask_px: f64,
    pub ask_sz: f64,
}

impl Quote {
    #[inline]
    pub fn mid(&self) -> f64 {
        (self.bid_px + self.ask_px) / 2.0
    }

    #[inline]
    pub fn spread(&self) -> f64 {
        self.ask_px - self.bid_px
    }

    /// Best-level size imbalance in [-1, 1]; 0 for an empty book.
    #[inline]
    pub fn imbalance(&self) -> f64 {
        let total = self.bid_sz + self.ask_sz;
        if total > 0.0 {
            (self.bid_sz - self.ask_sz) / total
        } else {
            0.0
        }
    }
}

/// Input event for the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MarketEvent {
    Quote(Quote),
    Trade(Trade),
}

impl MarketEvent {
    #[inline]
    pub fn ts_ms(&self) -> TimestampMs {
        match self {
            Self::Quote(q) => q.ts_ms,
            Self::Trade(t) => t.ts_ms,
        }
    }

    /// Tie-break rank at equal timestamps: a quote stamped at `t` is visible
    /// to trades stamped at `t`.
    #[inline]
    pub fn rank(&self) -> u8 {
        match self {
            Self::Quote(_) => 0,
            Self::Trade(_) => 1,
        }
    }

    /// Canonical ordering: (timestamp, rank). Stable sorts keep arrival order
    /// within equal keys.
    #[inline]
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.ts_ms()
            .cmp(&other.ts_ms())
            .then(self.rank().cmp(&other.rank()))
    }
}

/// Sort events into canonical pipeline order.
pub fn sort_events(events: &mut [MarketEvent]) {
    events.sort_by(|a, b| a.canonical_cmp(b));
}

/// A trade with its inferred aggressor side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedTrade {
    pub trade: Trade,
    /// +1 buyer-initiated, -1 seller-initiated, 0 unresolved.
    pub sign: i8,
    /// Price was strictly inside the quote. Stays true even when the tick
    /// rule resolved a sign.
    pub ambiguous: bool,
    /// Age of the quote used for classification; `None` if no quote was seen.
    pub quote_staleness_ms: Option<i64>,
    pub quote_bid_px: Option<f64>,
    pub quote_ask_px: Option<f64>,
}

impl ClassifiedTrade {
    /// Signed size contribution to order flow.
    #[inline]
    pub fn signed_size(&self) -> f64 {
        self.sign as f64 * self.trade.size
    }
}

/// One-minute OHLCV bar with the quote snapshot at close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinuteBar {
    pub ts_min: TimestampMs,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub vwap: Option<f64>,
    pub trade_count: u32,
    /// Latest quote at or before the bar close.
    pub quote_close: Option<Quote>,
}

impl MinuteBar {
    /// Flat bar for a minute with no trades.
    pub fn flat(ts_min: TimestampMs, price: f64, quote_close: Option<Quote>) -> Self {
        Self {
            ts_min,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
            vwap: None,
            trade_count: 0,
            quote_close,
        }
    }

    #[inline]
    pub fn has_trades(&self) -> bool {
        self.trade_count > 0
    }

    /// Mid at close, falling back to the last trade price.
    #[inline]
    pub fn mid_close(&self) -> f64 {
        self.quote_close.map(|q| q.mid()).unwrap_or(self.close)
    }

    #[inline]
    pub fn spread_close(&self) -> Option<f64> {
        self.quote_close.map(|q| q.spread())
    }

    #[inline]
    pub fn qimb_close(&self) -> f64 {
        self.quote_close.map(|q| q.imbalance()).unwrap_or(0.0)
    }
}

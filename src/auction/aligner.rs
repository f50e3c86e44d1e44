//! Trade-Quote Aligner
//!
//! Infers the aggressor side of each trade from the most recent quote at or
//! before it:
//!
//! ```text
//! price >= ask  ->  +1 (buyer lifted the offer)
//! price <= bid  ->  -1 (seller hit the bid)
//! otherwise     ->  ambiguous; tick rule if enabled:
//!                   uptick +1, downtick -1, zero tick keeps the previous sign
//! ```
//!
//! Trades sharing a timestamp are coalesced into one VWAP print before
//! classification, so fragments of one parent order are a single signal.
//! Because a same-timestamp group is only known to be complete when a later
//! event arrives, classification is emitted lazily: on the next trade with a
//! different timestamp, on a quote with a later timestamp, or on `flush()`.
//!
//! Stale quotes are used anyway; staleness is recorded, never a drop reason.

use crate::auction::clock::TimestampMs;
use crate::auction::events::{ClassifiedTrade, Quote, Trade};
use serde::{Deserialize, Serialize};

/// Classification quality counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlignmentStats {
    /// Classified (post-coalescing) prints.
    pub total_trades: u64,
    pub buy_trades: u64,
    pub sell_trades: u64,
    /// Prints strictly inside the quote (before any tick-rule resolution).
    pub ambiguous_trades: u64,
    /// Ambiguous prints the tick rule could not resolve.
    pub unresolved_trades: u64,
    pub total_volume: f64,
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub ambiguous_volume: f64,
    /// Raw prints merged into another print with the same timestamp.
    pub coalesced_prints: u64,
    /// Prints classified against a quote older than the staleness bound.
    pub stale_quote_trades: u64,
    /// Prints classified before any quote was seen.
    pub no_quote_trades: u64,
    pub total_staleness_ms: i64,
}

impl AlignmentStats {
    pub fn ambiguous_frac(&self) -> f64 {
        if self.total_volume > 0.0 {
            self.ambiguous_volume / self.total_volume
        } else {
            0.0
        }
    }

    /// Mean staleness over prints that had a quote.
    pub fn avg_staleness_ms(&self) -> f64 {
        let with_quote = self.total_trades - self.no_quote_trades;
        if with_quote > 0 {
            self.total_staleness_ms as f64 / with_quote as f64
        } else {
            0.0
        }
    }
}

/// Same-timestamp prints awaiting coalescing.
#[derive(Debug, Clone, Copy)]
struct PendingGroup {
    ts_ms: TimestampMs,
    size: f64,
    notional: f64,
    first_price: f64,
    prints: u32,
}

impl PendingGroup {
    fn new(trade: &Trade) -> Self {
        Self {
            ts_ms: trade.ts_ms,
            size: trade.size,
            notional: trade.price * trade.size,
            first_price: trade.price,
            prints: 1,
        }
    }

    fn add(&mut self, trade: &Trade) {
        self.size += trade.size;
        self.notional += trade.price * trade.size;
        self.prints += 1;
    }

    fn into_trade(self) -> Trade {
        let price = if self.prints == 1 {
            self.first_price
        } else if self.size > 0.0 {
            self.notional / self.size
        } else {
            self.first_price
        };
        Trade {
            ts_ms: self.ts_ms,
            price,
            size: self.size,
        }
    }
}

pub struct TradeQuoteAligner {
    max_staleness_ms: i64,
    use_tick_rule: bool,
    last_quote: Option<Quote>,
    /// Price of the previous classified (coalesced) print.
    last_price: Option<f64>,
    /// Sign of the previous classified print, for zero-tick continuation.
    last_sign: i8,
    pending: Option<PendingGroup>,
    stats: AlignmentStats,
}

impl TradeQuoteAligner {
    pub fn new(max_staleness_ms: i64, use_tick_rule: bool) -> Self {
        Self {
            max_staleness_ms,
            use_tick_rule,
            last_quote: None,
            last_price: None,
            last_sign: 0,
            pending: None,
            stats: AlignmentStats::default(),
        }
    }

    /// Observe a quote. A quote later than a pending group closes the group
    /// first, so the group is classified against the quote in force at its time.
    pub fn on_quote(&mut self, quote: Quote) -> Option<ClassifiedTrade> {
        let flushed = match self.pending {
            Some(group) if quote.ts_ms > group.ts_ms => self.flush(),
            _ => None,
        };
        self.last_quote = Some(quote);
        flushed
    }

    /// Observe a trade. Returns the previous group once it is complete.
    pub fn on_trade(&mut self, trade: Trade) -> Option<ClassifiedTrade> {
        match self.pending.as_mut() {
            Some(group) if group.ts_ms == trade.ts_ms => {
                group.add(&trade);
                self.stats.coalesced_prints += 1;
                None
            }
            _ => {
                let flushed = self.flush();
                self.pending = Some(PendingGroup::new(&trade));
                flushed
            }
        }
    }

    /// Classify any pending group now.
    pub fn flush(&mut self) -> Option<ClassifiedTrade> {
        let group = self.pending.take()?;
        Some(self.classify(group.into_trade()))
    }

    /// Timestamp of the pending group, if any.
    pub fn pending_ts(&self) -> Option<TimestampMs> {
        self.pending.map(|g| g.ts_ms)
    }

    /// Classify a batch of time-ordered trades against the current quote,
    /// coalescing equal timestamps.
    pub fn classify_batch(&mut self, trades: &[Trade]) -> Vec<ClassifiedTrade> {
        let mut out = Vec::with_capacity(trades.len());
        for trade in trades {
            if let Some(ct) = self.on_trade(*trade) {
                out.push(ct);
            }
        }
        if let Some(ct) = self.flush() {
            out.push(ct);
        }
        out
    }

    /// Classify one (already coalesced) print.
    fn classify(&mut self, trade: Trade) -> ClassifiedTrade {
        let quote = self.last_quote;

        let (mut sign, ambiguous) = match quote {
            Some(q) if trade.price >= q.ask_px => (1i8, false),
            Some(q) if trade.price <= q.bid_px => (-1i8, false),
            _ => (0i8, true),
        };

        if ambiguous && self.use_tick_rule {
            sign = self.tick_rule(trade.price);
        }

        let staleness = quote.map(|q| trade.ts_ms - q.ts_ms);
        self.record(&trade, sign, ambiguous, staleness);

        self.last_price = Some(trade.price);
        if sign != 0 {
            self.last_sign = sign;
        }

        ClassifiedTrade {
            trade,
            sign,
            ambiguous,
            quote_staleness_ms: staleness,
            quote_bid_px: quote.map(|q| q.bid_px),
            quote_ask_px: quote.map(|q| q.ask_px),
        }
    }

    fn tick_rule(&self, price: f64) -> i8 {
        match self.last_price {
            Some(prev) if price > prev => 1,
            Some(prev) if price < prev => -1,
            Some(_) => self.last_sign,
            None => 0,
        }
    }

    fn record(&mut self, trade: &Trade, sign: i8, ambiguous: bool, staleness: Option<i64>) {
        let s = &mut self.stats;
        s.total_trades += 1;
        s.total_volume += trade.size;
        match sign {
            1 => {
                s.buy_trades += 1;
                s.buy_volume += trade.size;
            }
            -1 => {
                s.sell_trades += 1;
                s.sell_volume += trade.size;
            }
            _ => s.unresolved_trades += 1,
        }
        if ambiguous {
            s.ambiguous_trades += 1;
            s.ambiguous_volume += trade.size;
        }
        match staleness {
            Some(ms) => {
                s.total_staleness_ms += ms;
                if ms > self.max_staleness_ms {
                    s.stale_quote_trades += 1;
                }
            }
            None => s.no_quote_trades += 1,
        }
    }

    pub fn last_quote(&self) -> Option<&Quote> {
        self.last_quote.as_ref()
    }

    pub fn stats(&self) -> &AlignmentStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = AlignmentStats::default();
    }
}

//! Minute bar builder.
//!
//! Accumulates classified trades for the in-progress minute and tracks the
//! latest quote. `close_minute` is called once per elapsed minute, before any
//! event of a later minute is applied, so the quote snapshot is the latest one
//! at or before the bar close. Minutes without trades become flat bars at the
//! previous close.

use crate::auction::clock::TimestampMs;
use crate::auction::events::{ClassifiedTrade, MinuteBar, Quote};

#[derive(Debug, Clone)]
struct BarAccumulator {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    notional: f64,
    trade_count: u32,
}

impl BarAccumulator {
    fn new(price: f64) -> Self {
        Self {
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
            notional: 0.0,
            trade_count: 0,
        }
    }

    fn add(&mut self, price: f64, size: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += size;
        self.notional += price * size;
        self.trade_count += 1;
    }
}

#[derive(Debug, Clone, Default)]
pub struct MinuteBarBuilder {
    current: Option<BarAccumulator>,
    last_close: Option<f64>,
    last_quote: Option<Quote>,
    bars_built: u64,
}

impl MinuteBarBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_quote(&mut self, quote: &Quote) {
        self.last_quote = Some(*quote);
    }

    pub fn on_trade(&mut self, trade: &ClassifiedTrade) {
        let price = trade.trade.price;
        self.current
            .get_or_insert_with(|| BarAccumulator::new(price))
            .add(price, trade.trade.size);
    }

    /// Finish the bar for `ts_min`. Returns `None` only when no price has
    /// ever been observed (no trade and no quote yet).
    pub fn close_minute(&mut self, ts_min: TimestampMs) -> Option<MinuteBar> {
        let bar = match self.current.take() {
            Some(acc) => MinuteBar {
                ts_min,
                open: acc.open,
                high: acc.high,
                low: acc.low,
                close: acc.close,
                volume: acc.volume,
                vwap: (acc.volume > 0.0).then(|| acc.notional / acc.volume),
                trade_count: acc.trade_count,
                quote_close: self.last_quote,
            },
            None => {
                let price = self.last_close.or(self.last_quote.map(|q| q.mid()))?;
                MinuteBar::flat(ts_min, price, self.last_quote)
            }
        };
        self.last_close = Some(bar.close);
        self.bars_built += 1;
        Some(bar)
    }

    pub fn last_quote(&self) -> Option<&Quote> {
        self.last_quote.as_ref()
    }

    pub fn bars_built(&self) -> u64 {
        self.bars_built
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::events::Trade;

    fn ct(ts_ms: i64, price: f64, size: f64) -> ClassifiedTrade {
        ClassifiedTrade {
            trade: Trade { ts_ms, price, size },
            sign: 1,
            ambiguous: false,
            quote_staleness_ms: Some(0),
            quote_bid_px: None,
            quote_ask_px: None,
        }
    }

    #[test]
    fn test_ohlcv() {
        let mut builder = MinuteBarBuilder::new();
        builder.on_trade(&ct(1_000, 100.0, 1.0));
        builder.on_trade(&ct(2_000, 102.0, 1.0));
        builder.on_trade(&ct(3_000, 99.0, 2.0));
        builder.on_trade(&ct(4_000, 101.0, 1.0));

        let bar = builder.close_minute(0).unwrap();
        assert_eq!(bar.open, 100.0);
        assert_eq!(bar.high, 102.0);
        assert_eq!(bar.low, 99.0);
        assert_eq!(bar.close, 101.0);
        assert_eq!(bar.trade_count, 4);
        assert!((bar.volume - 5.0).abs() < 1e-12);
        assert!((bar.vwap.unwrap() - 100.2).abs() < 1e-12);
    }

    #[test]
    fn test_flat_bar_after_gap() {
        let mut builder = MinuteBarBuilder::new();
        builder.on_trade(&ct(1_000, 100.0, 1.0));
        builder.close_minute(0).unwrap();

        let flat = builder.close_minute(60_000).unwrap();
        assert!(!flat.has_trades());
        assert_eq!(flat.close, 100.0);
        assert_eq!(flat.vwap, None);
    }

    #[test]
    fn test_no_price_no_bar() {
        let mut builder = MinuteBarBuilder::new();
        assert!(builder.close_minute(0).is_none());

        builder.on_quote(&Quote {
            ts_ms: 70_000,
            bid_px: 99.0,
            bid_sz: 1.0,
            ask_px: 101.0,
            ask_sz: 1.0,
        });
        let bar = builder.close_minute(60_000).unwrap();
        assert_eq!(bar.close, 100.0);
        assert_eq!(bar.mid_close(), 100.0);
        assert_eq!(bar.spread_close(), Some(2.0));
    }
}

//! Feature Engine
//!
//! The owned per-symbol context for everything upstream of the signal state
//! machine. Raw quotes and trades go in through `on_quote` / `on_trade`;
//! `close_minute` produces one immutable `MinuteFeatures` snapshot per
//! elapsed minute.
//!
//! ```text
//! quote ──▶ aligner ─┬─▶ qimb EMA
//!                   └─▶ bar builder (close snapshot)
//! trade ──▶ aligner ──▶ classified ─┬─▶ rolling histogram ─▶ value area
//!                                   ├─▶ minute order flow
//!                                   └─▶ bar builder
//! ```
//!
//! Nothing here is shared: the replay engine owns one `FeatureEngine` and
//! passes it `&mut` into every update.

use crate::auction::aligner::{AlignmentStats, TradeQuoteAligner};
use crate::auction::bar_builder::MinuteBarBuilder;
use crate::auction::clock::{minute_close_ts, TimestampMs};
use crate::auction::config::TraderConfig;
use crate::auction::events::{ClassifiedTrade, MinuteBar, Quote, Trade};
use crate::auction::histogram::{tick_to_price, RollingHistogram};
use crate::auction::order_flow::{MinuteFlow, OrderFlowMetrics, QuoteImbalanceTracker, SpreadTracker};
use crate::auction::value_area::{compute_value_area, AdaptiveBinWidth, ValueArea};
use crate::auction::volatility::RollingVolatility;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Everything downstream consumers see for one minute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinuteFeatures {
    pub ts_min: TimestampMs,
    /// Bar close; the latest timestamp whose data this snapshot may use.
    pub decision_ts: TimestampMs,
    pub bar: MinuteBar,
    pub mid_close: f64,
    pub sigma_240: f64,
    /// Active (adopted) bin width.
    pub bin_width: f64,
    pub candidate_bin_width: f64,
    pub rebucketed: bool,
    pub va: ValueArea,
    pub order_flow: OrderFlowMetrics,
    pub qimb_close: f64,
    /// Intra-minute EMA of quote imbalance (close snapshot if no updates).
    pub qimb_avg: f64,
    pub spread_avg: f64,
    /// A trade printed within tolerance of VAL / VAH during the bar.
    pub touched_val: bool,
    pub touched_vah: bool,
    pub window_minutes: usize,
}

pub struct FeatureEngine {
    tick_size: f64,
    va_fraction: f64,
    min_va_bins: usize,
    boundary_tolerance_mult: f64,
    aligner: TradeQuoteAligner,
    bars: MinuteBarBuilder,
    histogram: RollingHistogram,
    volatility: RollingVolatility,
    bin_width: AdaptiveBinWidth,
    flow: MinuteFlow,
    qimb: QuoteImbalanceTracker,
    spreads: SpreadTracker,
}

impl FeatureEngine {
    pub fn new(config: &TraderConfig) -> Self {
        let tick = config.instrument.tick_size;
        let window = config.instrument.rolling_window_minutes as usize;
        let va = &config.value_area;
        let of = &config.order_flow;
        Self {
            tick_size: tick,
            va_fraction: va.va_fraction,
            min_va_bins: va.min_va_bins,
            boundary_tolerance_mult: config.signal.boundary_cross_spread_mult,
            aligner: TradeQuoteAligner::new(of.max_quote_staleness_ms, of.use_tick_rule_fallback),
            bars: MinuteBarBuilder::new(),
            histogram: RollingHistogram::new(tick, window),
            volatility: RollingVolatility::new(window),
            bin_width: AdaptiveBinWidth::new(
                tick,
                va.alpha_bin,
                config.bin_width_max(),
                va.rebucket_interval_minutes,
                va.rebucket_change_pct,
            ),
            flow: MinuteFlow::default(),
            qimb: QuoteImbalanceTracker::new(of.qimb_ema_span),
            spreads: SpreadTracker::new(of.spread_lookback_minutes as usize, tick),
        }
    }

    pub fn on_quote(&mut self, quote: &Quote) {
        if let Some(ct) = self.aligner.on_quote(*quote) {
            self.apply_trade(&ct);
        }
        self.qimb.on_quote(quote);
        self.bars.on_quote(quote);
    }

    pub fn on_trade(&mut self, trade: &Trade) {
        if let Some(ct) = self.aligner.on_trade(*trade) {
            self.apply_trade(&ct);
        }
    }

    fn apply_trade(&mut self, ct: &ClassifiedTrade) {
        self.histogram.add_trade(ct.trade.price, ct.trade.size);
        self.flow.add(ct);
        self.bars.on_trade(ct);
    }

    /// Close minute `ts_min`. Must be called before any event of a later
    /// minute is applied. Returns `None` until some price has been observed.
    pub fn close_minute(&mut self, ts_min: TimestampMs) -> Option<MinuteFeatures> {
        if let Some(ct) = self.aligner.flush() {
            self.apply_trade(&ct);
        }

        let bar = self.bars.close_minute(ts_min);
        let order_flow = self.flow.take();
        let qimb_avg = self.qimb.take_minute();
        self.histogram.flush_minute(ts_min);
        let bar = bar?;

        let mid_close = bar.mid_close();
        self.volatility.push_close(mid_close, bar.has_trades());
        if let Some(spread) = bar.spread_close() {
            self.spreads.push(spread);
        }

        let sigma = self.volatility.sigma().unwrap_or(0.0);
        let update = self.bin_width.update(ts_min, mid_close, sigma);
        if update.adopted {
            debug!(
                ts_min,
                bin_width = update.active,
                sigma,
                "Adopted bin width"
            );
        }

        let k = self.bin_width.ticks_per_bin();
        let buckets = self.histogram.aggregate_to(k);
        let va = compute_value_area(
            &buckets,
            k,
            self.tick_size,
            self.va_fraction,
            self.min_va_bins,
        );

        let spread_avg = self.spreads.average();
        let tolerance = self.boundary_tolerance_mult * spread_avg;
        let (touched_val, touched_vah) = match self.histogram.latest() {
            Some(delta) if va.is_valid => {
                let near = |level: f64| {
                    delta
                        .bins
                        .keys()
                        .any(|&t| (tick_to_price(t, self.tick_size) - level).abs() <= tolerance + 1e-9)
                };
                (near(va.val), near(va.vah))
            }
            _ => (false, false),
        };

        let qimb_close = bar.qimb_close();
        Some(MinuteFeatures {
            ts_min,
            decision_ts: minute_close_ts(ts_min),
            mid_close,
            sigma_240: sigma,
            bin_width: update.active,
            candidate_bin_width: update.candidate,
            rebucketed: update.adopted,
            va,
            order_flow,
            qimb_close,
            qimb_avg: qimb_avg.unwrap_or(qimb_close),
            spread_avg,
            touched_val,
            touched_vah,
            window_minutes: self.histogram.window_len(),
            bar,
        })
    }

    pub fn histogram(&self) -> &RollingHistogram {
        &self.histogram
    }

    pub fn alignment_stats(&self) -> &AlignmentStats {
        self.aligner.stats()
    }

    pub fn last_quote(&self) -> Option<&Quote> {
        self.bars.last_quote()
    }
}

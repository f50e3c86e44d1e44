//! Trader configuration
//!
//! Every recognized option is a typed field with a serde default, so a partial
//! TOML file fills in the rest. `validate()` runs before any event is
//! processed; a rejected config never reaches the pipeline.

use crate::auction::error::TraderResult;
use crate::auction::invariants::InvariantMode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Upper bound on the rolling window (minutes).
pub const MAX_ROLLING_WINDOW_MINUTES: u32 = 10_000;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TraderConfig {
    #[serde(default)]
    pub instrument: InstrumentConfig,

    #[serde(default)]
    pub value_area: ValueAreaConfig,

    #[serde(default)]
    pub order_flow: OrderFlowConfig,

    #[serde(default)]
    pub signal: SignalConfig,

    #[serde(default)]
    pub sizing: SizingConfig,

    #[serde(default)]
    pub risk: RiskConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub backtest: BacktestConfig,
}

impl TraderConfig {
    /// Load from TOML file. The result is validated.
    pub fn load(path: impl AsRef<Path>) -> TraderResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `AUCTION_CONFIG_PATH` or `auction.toml`, falling back to defaults.
    pub fn from_env() -> Self {
        let path =
            std::env::var("AUCTION_CONFIG_PATH").unwrap_or_else(|_| "auction.toml".to_string());

        Self::load(&path).unwrap_or_else(|e| {
            tracing::debug!("Using default trader config ({}): {}", path, e);
            Self::default()
        })
    }

    /// Save to TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject inconsistent or out-of-range settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let inst = &self.instrument;
        positive("instrument.tick_size", inst.tick_size)?;
        positive("instrument.qty_step", inst.qty_step)?;
        if inst.rolling_window_minutes == 0
            || inst.rolling_window_minutes > MAX_ROLLING_WINDOW_MINUTES
        {
            return Err(ConfigError::new(
                "instrument.rolling_window_minutes",
                format!("must be in 1..={}", MAX_ROLLING_WINDOW_MINUTES),
            ));
        }

        let va = &self.value_area;
        unit_interval("value_area.va_fraction", va.va_fraction)?;
        if va.min_va_bins == 0 {
            return Err(ConfigError::new("value_area.min_va_bins", "must be at least 1"));
        }
        positive("value_area.alpha_bin", va.alpha_bin)?;
        if va.bin_width_max_ticks == 0 {
            return Err(ConfigError::new(
                "value_area.bin_width_max_ticks",
                "must be at least 1",
            ));
        }
        if va.rebucket_interval_minutes == 0 {
            return Err(ConfigError::new(
                "value_area.rebucket_interval_minutes",
                "must be at least 1",
            ));
        }
        positive("value_area.rebucket_change_pct", va.rebucket_change_pct)?;

        let of = &self.order_flow;
        if of.max_quote_staleness_ms < 0 {
            return Err(ConfigError::new(
                "order_flow.max_quote_staleness_ms",
                "must be non-negative",
            ));
        }
        unit_interval(
            "order_flow.ambiguous_trade_frac_max",
            of.ambiguous_trade_frac_max,
        )?;
        if of.qimb_ema_span == 0 {
            return Err(ConfigError::new("order_flow.qimb_ema_span", "must be at least 1"));
        }
        for (field, v) in [
            ("order_flow.qimb_entry_min", of.qimb_entry_min),
            ("order_flow.qimb_breakout_min", of.qimb_breakout_min),
            ("order_flow.qimb_fail_max", of.qimb_fail_max),
        ] {
            if !(-1.0..=1.0).contains(&v) {
                return Err(ConfigError::new(field, "must be in [-1, 1]"));
            }
        }
        if of.spread_lookback_minutes == 0 {
            return Err(ConfigError::new(
                "order_flow.spread_lookback_minutes",
                "must be at least 1",
            ));
        }

        let sig = &self.signal;
        if sig.accept_outside_k == 0 {
            return Err(ConfigError::new("signal.accept_outside_k", "must be at least 1"));
        }
        positive("signal.boundary_cross_spread_mult", sig.boundary_cross_spread_mult)?;
        for (field, v) in [
            ("signal.of_entry_min_norm", sig.of_entry_min_norm),
            ("signal.of_breakout_min_norm", sig.of_breakout_min_norm),
            ("signal.of_fail_max_norm", sig.of_fail_max_norm),
        ] {
            if !(-1.0..=1.0).contains(&v) {
                return Err(ConfigError::new(field, "must be in [-1, 1]"));
            }
        }

        let sz = &self.sizing;
        unit_interval("sizing.risk_pct", sz.risk_pct)?;
        positive("sizing.max_leverage", sz.max_leverage)?;
        unit_interval("sizing.tp1_pct", sz.tp1_pct)?;
        unit_interval("sizing.tp2_pct", sz.tp2_pct)?;
        if (sz.tp1_pct + sz.tp2_pct - 1.0).abs() > 1e-9 {
            return Err(ConfigError::new(
                "sizing.tp1_pct + sizing.tp2_pct",
                format!("must sum to 1.0, got {}", sz.tp1_pct + sz.tp2_pct),
            ));
        }

        let risk = &self.risk;
        if risk.max_hold_minutes == 0 {
            return Err(ConfigError::new("risk.max_hold_minutes", "must be at least 1"));
        }
        if let Some(limit) = risk.max_daily_loss {
            positive("risk.max_daily_loss", limit)?;
        }

        let ex = &self.execution;
        if ex.use_limit_for_entry && ex.limit_order_timeout_minutes == 0 {
            return Err(ConfigError::new(
                "execution.limit_order_timeout_minutes",
                "must be at least 1 when limit entries are enabled",
            ));
        }
        if ex.slippage_bps < 0.0 {
            return Err(ConfigError::new("execution.slippage_bps", "must be non-negative"));
        }

        let bt = &self.backtest;
        positive("backtest.initial_capital", bt.initial_capital)?;
        if bt.funding_interval_hours == 0 {
            return Err(ConfigError::new(
                "backtest.funding_interval_hours",
                "must be at least 1",
            ));
        }

        Ok(())
    }

    /// Maximum adaptive bin width in price units.
    #[inline]
    pub fn bin_width_max(&self) -> f64 {
        self.value_area.bin_width_max_ticks as f64 * self.instrument.tick_size
    }

    /// Stop buffer in price units.
    #[inline]
    pub fn stop_buffer(&self) -> f64 {
        self.risk.stop_buffer_ticks as f64 * self.instrument.tick_size
    }
}

fn positive(field: &str, v: f64) -> Result<(), ConfigError> {
    if v.is_finite() && v > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::new(field, format!("must be > 0, got {}", v)))
    }
}

fn unit_interval(field: &str, v: f64) -> Result<(), ConfigError> {
    if v > 0.0 && v <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::new(field, format!("must be in (0, 1], got {}", v)))
    }
}

/// Rejected configuration field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub field: String,
    pub reason: String,
}

impl ConfigError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

impl std::error::Error for ConfigError {}

// =============================================================================
// SECTIONS
// =============================================================================

/// Instrument definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    #[serde(default = "default_symbol")]
    pub symbol: String,

    /// Minimum price increment.
    #[serde(default = "default_tick_size")]
    pub tick_size: f64,

    /// Minimum order quantity increment (one "unit").
    #[serde(default = "default_qty_step")]
    pub qty_step: f64,

    /// Rolling histogram / volatility window.
    #[serde(default = "default_rolling_window_minutes")]
    pub rolling_window_minutes: u32,
}

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}
fn default_tick_size() -> f64 {
    0.1
}
fn default_qty_step() -> f64 {
    0.001
}
fn default_rolling_window_minutes() -> u32 {
    240
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            tick_size: default_tick_size(),
            qty_step: default_qty_step(),
            rolling_window_minutes: default_rolling_window_minutes(),
        }
    }
}

/// Value area and adaptive binning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueAreaConfig {
    #[serde(default = "default_va_fraction")]
    pub va_fraction: f64,

    /// Populated aggregated buckets required for a valid value area.
    #[serde(default = "default_min_va_bins")]
    pub min_va_bins: usize,

    /// Bin width = alpha_bin * mid * sigma_240.
    #[serde(default = "default_alpha_bin")]
    pub alpha_bin: f64,

    #[serde(default = "default_bin_width_max_ticks")]
    pub bin_width_max_ticks: u32,

    #[serde(default = "default_rebucket_interval_minutes")]
    pub rebucket_interval_minutes: u32,

    /// Relative change that forces adoption of a new bin width.
    #[serde(default = "default_rebucket_change_pct")]
    pub rebucket_change_pct: f64,
}

fn default_va_fraction() -> f64 {
    0.70
}
fn default_min_va_bins() -> usize {
    20
}
fn default_alpha_bin() -> f64 {
    0.25
}
fn default_bin_width_max_ticks() -> u32 {
    200
}
fn default_rebucket_interval_minutes() -> u32 {
    15
}
fn default_rebucket_change_pct() -> f64 {
    0.25
}

impl Default for ValueAreaConfig {
    fn default() -> Self {
        Self {
            va_fraction: default_va_fraction(),
            min_va_bins: default_min_va_bins(),
            alpha_bin: default_alpha_bin(),
            bin_width_max_ticks: default_bin_width_max_ticks(),
            rebucket_interval_minutes: default_rebucket_interval_minutes(),
            rebucket_change_pct: default_rebucket_change_pct(),
        }
    }
}

/// Trade classification and order-flow aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderFlowConfig {
    /// Quotes older than this are flagged stale (trade is still classified).
    #[serde(default = "default_max_quote_staleness_ms")]
    pub max_quote_staleness_ms: i64,

    /// Above this ambiguous fraction, confirmation needs OF AND qimb.
    #[serde(default = "default_ambiguous_trade_frac_max")]
    pub ambiguous_trade_frac_max: f64,

    #[serde(default = "default_true")]
    pub use_tick_rule_fallback: bool,

    #[serde(default = "default_true")]
    pub use_qimb: bool,

    /// EMA span (in quote updates) for the minute-average imbalance.
    #[serde(default = "default_qimb_ema_span")]
    pub qimb_ema_span: u32,

    #[serde(default = "default_qimb_entry_min")]
    pub qimb_entry_min: f64,

    #[serde(default = "default_qimb_breakout_min")]
    pub qimb_breakout_min: f64,

    #[serde(default = "default_qimb_fail_max")]
    pub qimb_fail_max: f64,

    /// Minutes of close spreads in the rolling average spread.
    #[serde(default = "default_spread_lookback_minutes")]
    pub spread_lookback_minutes: u32,
}

fn default_true() -> bool {
    true
}
fn default_max_quote_staleness_ms() -> i64 {
    250
}
fn default_ambiguous_trade_frac_max() -> f64 {
    0.35
}
fn default_qimb_ema_span() -> u32 {
    10
}
fn default_qimb_entry_min() -> f64 {
    0.10
}
fn default_qimb_breakout_min() -> f64 {
    0.10
}
fn default_qimb_fail_max() -> f64 {
    -0.10
}
fn default_spread_lookback_minutes() -> u32 {
    60
}

impl Default for OrderFlowConfig {
    fn default() -> Self {
        Self {
            max_quote_staleness_ms: default_max_quote_staleness_ms(),
            ambiguous_trade_frac_max: default_ambiguous_trade_frac_max(),
            use_tick_rule_fallback: true,
            use_qimb: true,
            qimb_ema_span: default_qimb_ema_span(),
            qimb_entry_min: default_qimb_entry_min(),
            qimb_breakout_min: default_qimb_breakout_min(),
            qimb_fail_max: default_qimb_fail_max(),
            spread_lookback_minutes: default_spread_lookback_minutes(),
        }
    }
}

/// Setup detection thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Break-in: OF_1m must exceed this in the trade direction.
    #[serde(default)]
    pub of_entry_min: f64,

    #[serde(default = "default_of_norm_min")]
    pub of_entry_min_norm: f64,

    #[serde(default)]
    pub of_breakout_min: f64,

    #[serde(default = "default_of_norm_min")]
    pub of_breakout_min_norm: f64,

    /// Failed breakout: OF_1m must be below this (short reversal).
    #[serde(default)]
    pub of_fail_max: f64,

    #[serde(default = "default_of_fail_max_norm")]
    pub of_fail_max_norm: f64,

    /// Consecutive closes outside value required for acceptance.
    #[serde(default = "default_accept_outside_k")]
    pub accept_outside_k: u32,

    /// Boundary-crossing and retest tolerance, in multiples of the average spread.
    #[serde(default = "default_boundary_cross_spread_mult")]
    pub boundary_cross_spread_mult: f64,

    #[serde(default = "default_true")]
    pub retest_enabled: bool,

    #[serde(default = "default_true")]
    pub flip_on_signal: bool,
}

fn default_of_norm_min() -> f64 {
    0.10
}
fn default_of_fail_max_norm() -> f64 {
    -0.10
}
fn default_accept_outside_k() -> u32 {
    3
}
fn default_boundary_cross_spread_mult() -> f64 {
    1.0
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            of_entry_min: 0.0,
            of_entry_min_norm: default_of_norm_min(),
            of_breakout_min: 0.0,
            of_breakout_min_norm: default_of_norm_min(),
            of_fail_max: 0.0,
            of_fail_max_norm: default_of_fail_max_norm(),
            accept_outside_k: default_accept_outside_k(),
            boundary_cross_spread_mult: default_boundary_cross_spread_mult(),
            retest_enabled: true,
            flip_on_signal: true,
        }
    }
}

/// Position sizing and partial exits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingConfig {
    #[serde(default = "default_risk_pct")]
    pub risk_pct: f64,

    #[serde(default = "default_max_leverage")]
    pub max_leverage: f64,

    #[serde(default = "default_tp1_pct")]
    pub tp1_pct: f64,

    #[serde(default = "default_tp2_pct")]
    pub tp2_pct: f64,

    #[serde(default = "default_true")]
    pub move_stop_to_breakeven: bool,
}

fn default_risk_pct() -> f64 {
    0.02
}
fn default_max_leverage() -> f64 {
    10.0
}
fn default_tp1_pct() -> f64 {
    0.30
}
fn default_tp2_pct() -> f64 {
    0.70
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            risk_pct: default_risk_pct(),
            max_leverage: default_max_leverage(),
            tp1_pct: default_tp1_pct(),
            tp2_pct: default_tp2_pct(),
            move_stop_to_breakeven: true,
        }
    }
}

/// Stops, holding limits and kill-switch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_stop_buffer_ticks")]
    pub stop_buffer_ticks: u32,

    /// Minutes after an entry or exit during which no new entry is allowed.
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u32,

    #[serde(default = "default_max_hold_minutes")]
    pub max_hold_minutes: u32,

    #[serde(default = "default_true")]
    pub extend_if_profitable: bool,

    /// Realized daily loss (quote currency) that halts entries until the next UTC day.
    #[serde(default)]
    pub max_daily_loss: Option<f64>,
}

fn default_stop_buffer_ticks() -> u32 {
    2
}
fn default_cooldown_minutes() -> u32 {
    3
}
fn default_max_hold_minutes() -> u32 {
    60
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            stop_buffer_ticks: default_stop_buffer_ticks(),
            cooldown_minutes: default_cooldown_minutes(),
            max_hold_minutes: default_max_hold_minutes(),
            extend_if_profitable: true,
            max_daily_loss: None,
        }
    }
}

/// How market-order slippage is expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SlippageMode {
    #[default]
    Ticks,
    Bps,
}

/// Order execution model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_true")]
    pub use_limit_for_entry: bool,

    /// Unfilled limit entries convert to market after this long.
    #[serde(default = "default_limit_order_timeout_minutes")]
    pub limit_order_timeout_minutes: u32,

    #[serde(default)]
    pub slippage_mode: SlippageMode,

    #[serde(default = "default_slippage_ticks")]
    pub slippage_ticks_entry: u32,

    #[serde(default = "default_slippage_ticks")]
    pub slippage_ticks_exit: u32,

    /// Used when `slippage_mode = "bps"`.
    #[serde(default)]
    pub slippage_bps: f64,

    #[serde(default = "default_taker_fee_bps")]
    pub taker_fee_bps: f64,

    /// Negative values are rebates.
    #[serde(default = "default_maker_fee_bps")]
    pub maker_fee_bps: f64,
}

fn default_limit_order_timeout_minutes() -> u32 {
    1
}
fn default_slippage_ticks() -> u32 {
    1
}
fn default_taker_fee_bps() -> f64 {
    5.0
}
fn default_maker_fee_bps() -> f64 {
    -1.0
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            use_limit_for_entry: true,
            limit_order_timeout_minutes: default_limit_order_timeout_minutes(),
            slippage_mode: SlippageMode::Ticks,
            slippage_ticks_entry: default_slippage_ticks(),
            slippage_ticks_exit: default_slippage_ticks(),
            slippage_bps: 0.0,
            taker_fee_bps: default_taker_fee_bps(),
            maker_fee_bps: default_maker_fee_bps(),
        }
    }
}

/// Replay / sweep settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,

    /// Funding charged per interval, in bps of mark notional. Longs pay.
    #[serde(default = "default_funding_rate_8h_bps")]
    pub funding_rate_8h_bps: f64,

    #[serde(default = "default_funding_interval_hours")]
    pub funding_interval_hours: u32,

    /// Sweep workers; 0 = available cores / 2.
    #[serde(default)]
    pub workers: usize,

    #[serde(default)]
    pub invariant_mode: InvariantMode,

    /// Full histogram audit cadence in minutes (0 disables the full audit).
    #[serde(default = "default_histogram_audit_minutes")]
    pub histogram_audit_minutes: u32,
}

fn default_initial_capital() -> f64 {
    10_000.0
}
fn default_funding_rate_8h_bps() -> f64 {
    1.0
}
fn default_funding_interval_hours() -> u32 {
    8
}
fn default_histogram_audit_minutes() -> u32 {
    60
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: default_initial_capital(),
            funding_rate_8h_bps: default_funding_rate_8h_bps(),
            funding_interval_hours: default_funding_interval_hours(),
            workers: 0,
            invariant_mode: InvariantMode::Hard,
            histogram_audit_minutes: default_histogram_audit_minutes(),
        }
    }
}

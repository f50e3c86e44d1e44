//! Auction Trading Core
//!
//! Value-area / order-flow engine for a single perpetual-futures symbol,
//! driven minute by minute from top-of-book quotes and trade prints.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        ReplayEngine                             │
//! │  (owns SimClock, closes minutes, enforces causality)            │
//! └─────────────────────────────────────────────────────────────────┘
//!        │ quotes / trades                     │ bar close
//!        ▼                                     ▼
//! ┌─────────────────────────┐        ┌─────────────────────┐
//! │ FeatureEngine           │        │ SignalMachine       │
//! │  TradeQuoteAligner      │──────▶ │  acceptance layer   │
//! │  RollingHistogram (240) │ Minute │  position layer     │
//! │  ValueArea / OrderFlow  │Features└──────────┬──────────┘
//! └─────────────────────────┘                   │ SignalEvent
//!                                               ▼
//!                                    ┌─────────────────────┐
//!                                    │ FillSimulator       │
//!                                    │  FillModel, sizing, │
//!                                    │  exits, funding     │
//!                                    └─────────────────────┘
//! ```
//!
//! # Determinism Guarantees
//!
//! - **Clock**: never reads system time; all time comes from event timestamps
//! - **Ordering**: events sorted by `(ts_ms, quote-before-trade, arrival)`
//! - **State**: `BTreeMap` wherever iteration order is observable; no RNG
//! - **Causality**: decisions at `minute_start + 59_999`, fills strictly later

pub mod aligner;
pub mod bar_builder;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod features;
pub mod feed;
pub mod fill_model;
pub mod fingerprint;
pub mod histogram;
pub mod invariants;
pub mod live;
pub mod metrics;
pub mod order_flow;
pub mod position;
pub mod replay;
pub mod signal;
pub mod simulator;
pub mod sweep;
pub mod value_area;
pub mod volatility;

#[cfg(test)]
mod invariant_tests;
#[cfg(test)]
mod simulator_tests;

pub use aligner::{AlignmentStats, TradeQuoteAligner};
pub use clock::{minute_close_ts, minute_floor, SimClock, TimestampMs};
pub use config::{ConfigError, TraderConfig};
pub use error::{TraderError, TraderResult};
pub use events::{ClassifiedTrade, Direction, MarketEvent, MinuteBar, Quote, Trade};
pub use features::{FeatureEngine, MinuteFeatures};
pub use feed::{load_jsonl, MarketDataFeed, MarketDataFeedExt, VecFeed};
pub use fill_model::{Fill, FillModel, Side};
pub use fingerprint::RunFingerprint;
pub use histogram::RollingHistogram;
pub use invariants::{InvariantEnforcer, InvariantMode};
pub use live::{LiveHandles, LiveRunner};
pub use metrics::PerformanceMetrics;
pub use order_flow::OrderFlowMetrics;
pub use position::{ExitReason, Position, TradeRecord};
pub use replay::{run, run_feed, ReplayEngine, RunOutput};
pub use signal::{SetupKind, SignalEvent, SignalMachine};
pub use simulator::{EquityPoint, FillSimulator};
pub use sweep::{run_sweep, SweepGrid, SweepPoint, SweepResult};
pub use value_area::{compute_value_area, ValueArea};

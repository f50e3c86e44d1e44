//! Replay Engine
//!
//! Drives one deterministic run: events in canonical order through the
//! feature engine, bar closes through the signal machine, decisions through
//! the fill simulator.
//!
//! # Time Semantics
//!
//! - A minute closes when the first event of a later minute arrives (or at
//!   end of data). Skipped minutes close as flat bars.
//! - Decisions are stamped `minute_start + 59_999`.
//! - Orders fill only against quotes stamped strictly after their decision.
//!   Within one timestamp a quote is applied to pending orders before it
//!   becomes the reference quote for classification.
//!
//! Same config + same events = byte-identical output.

use crate::auction::aligner::AlignmentStats;
use crate::auction::clock::{minute_floor, SimClock, TimestampMs, MILLIS_PER_MINUTE};
use crate::auction::config::TraderConfig;
use crate::auction::error::TraderResult;
use crate::auction::events::{sort_events, MarketEvent};
use crate::auction::feed::MarketDataFeed;
use crate::auction::features::{FeatureEngine, MinuteFeatures};
use crate::auction::fill_model::Fill;
use crate::auction::invariants::{InvariantConfig, InvariantCounters, InvariantEnforcer};
use crate::auction::position::{Position, TradeRecord};
use crate::auction::signal::{SignalEvent, SignalMachine, SignalStats};
use crate::auction::simulator::{EquityPoint, FillSimulator, SimStats, SubmitOutcome};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

/// Everything a finished run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutput {
    pub minutes: u64,
    pub events: u64,
    /// Events dropped because they arrived for an already closed minute.
    pub late_events: u64,
    pub signals: Vec<SignalEvent>,
    pub fills: Vec<Fill>,
    pub trades: Vec<TradeRecord>,
    pub equity_curve: Vec<EquityPoint>,
    /// Per-minute snapshots; empty unless requested.
    pub features: Vec<MinuteFeatures>,
    /// Still open at end of data; valued at the last mid.
    pub open_position: Option<Position>,
    pub initial_capital: f64,
    pub final_equity: f64,
    pub total_fees: f64,
    pub total_funding: f64,
    pub alignment: AlignmentStats,
    pub signal_stats: SignalStats,
    pub sim_stats: SimStats,
    pub invariant_counters: InvariantCounters,
}

impl RunOutput {
    pub fn net_pnl(&self) -> f64 {
        self.final_equity - self.initial_capital
    }
}

pub struct ReplayEngine {
    initial_capital: f64,
    audit_every: u64,
    clock: SimClock,
    current_min: Option<TimestampMs>,
    features: FeatureEngine,
    signals: SignalMachine,
    sim: FillSimulator,
    invariants: InvariantEnforcer,
    minutes: u64,
    events: u64,
    late_events: u64,
    signal_log: Vec<SignalEvent>,
    equity_curve: Vec<EquityPoint>,
    feature_log: Option<Vec<MinuteFeatures>>,
    last_mark: Option<f64>,
}

impl ReplayEngine {
    /// Validates the config; nothing is processed if it is rejected.
    pub fn new(config: &TraderConfig) -> TraderResult<Self> {
        config.validate()?;
        Ok(Self {
            initial_capital: config.backtest.initial_capital,
            audit_every: config.backtest.histogram_audit_minutes as u64,
            clock: SimClock::new(TimestampMs::MIN),
            current_min: None,
            features: FeatureEngine::new(config),
            signals: SignalMachine::new(config),
            sim: FillSimulator::new(config),
            invariants: InvariantEnforcer::new(InvariantConfig::with_mode(
                config.backtest.invariant_mode,
            )),
            minutes: 0,
            events: 0,
            late_events: 0,
            signal_log: Vec::new(),
            equity_curve: Vec::new(),
            feature_log: None,
            last_mark: None,
        })
    }

    /// Keep every `MinuteFeatures` snapshot in the output.
    pub fn with_feature_log(mut self) -> Self {
        self.feature_log = Some(Vec::new());
        self
    }

    /// Block or allow new entries. Exits and fills are unaffected.
    pub fn set_halted(&mut self, halted: bool) {
        self.signals.set_halted(halted);
    }

    pub fn signals(&self) -> &SignalMachine {
        &self.signals
    }

    pub fn simulator(&self) -> &FillSimulator {
        &self.sim
    }

    pub fn features(&self) -> &FeatureEngine {
        &self.features
    }

    pub fn signal_log(&self) -> &[SignalEvent] {
        &self.signal_log
    }

    /// Apply one event. Events must arrive in canonical order; stragglers
    /// for a closed minute are dropped (or abort, in hard invariant mode).
    pub fn process_event(&mut self, event: &MarketEvent) -> TraderResult<()> {
        let ts = event.ts_ms();
        let kind = match event {
            MarketEvent::Quote(_) => "quote",
            MarketEvent::Trade(_) => "trade",
        };
        self.invariants.check_event_time(ts, kind)?;
        self.events += 1;

        if self.clock.is_past(ts) {
            self.late_events += 1;
            warn!(ts_ms = ts, now = self.clock.now(), kind, "Dropping out-of-order event");
            return Ok(());
        }
        self.clock.advance_to(ts);

        let minute = minute_floor(ts);
        match self.current_min {
            None => self.current_min = Some(minute),
            Some(open) if minute > open => {
                let mut m = open;
                while m < minute {
                    self.close_minute(m)?;
                    m += MILLIS_PER_MINUTE;
                }
                self.current_min = Some(minute);
            }
            Some(_) => {}
        }

        match event {
            MarketEvent::Quote(q) => {
                for trade in self.sim.on_quote(q, &mut self.invariants)? {
                    self.signals.record_realized_pnl(trade.exit_ts, trade.net_pnl);
                }
                self.features.on_quote(q);
            }
            MarketEvent::Trade(t) => {
                self.features.on_trade(t);
                self.sim.on_trade(t);
            }
        }
        Ok(())
    }

    fn close_minute(&mut self, ts_min: TimestampMs) -> TraderResult<()> {
        self.minutes += 1;
        let Some(f) = self.features.close_minute(ts_min) else {
            trace!(ts_min, "Minute closed before first price");
            return Ok(());
        };

        self.invariants.check_decision_time(f.decision_ts)?;
        let full_audit = self.audit_every > 0 && self.minutes % self.audit_every == 0;
        self.invariants.check_histogram(self.features.histogram(), full_audit)?;

        let bar = self.sim.on_bar_close(&f);
        if bar.exiting {
            self.signals.mark_flat(f.ts_min);
        }
        self.equity_curve.push(EquityPoint {
            ts_ms: f.decision_ts,
            equity: bar.equity,
        });

        if let Some(signal) = self.signals.on_bar(&f) {
            self.invariants.check_signal_time(signal.decision_ts)?;
            if self.sim.submit(&signal) == SubmitOutcome::Skipped {
                self.signals.mark_flat(f.ts_min);
            }
            self.signal_log.push(signal);
        }

        debug!(
            ts_min,
            close = f.bar.close,
            va_valid = f.va.is_valid,
            val = f.va.val,
            poc = f.va.poc,
            vah = f.va.vah,
            of = f.order_flow.of_1m,
            state = ?self.signals.state(),
            equity = bar.equity,
            "Minute closed"
        );

        self.last_mark = Some(f.mid_close);
        if let Some(log) = self.feature_log.as_mut() {
            log.push(f);
        }
        Ok(())
    }

    /// Close the last open minute and collect the run. An open position is
    /// reported as-is and valued at the last mid.
    pub fn finish(mut self) -> TraderResult<RunOutput> {
        if let Some(open) = self.current_min.take() {
            self.close_minute(open)?;
        }

        let alignment = self.features.alignment_stats().clone();
        let signal_stats = self.signals.stats().clone();
        let invariant_counters = self.invariants.counters().clone();
        let final_equity = match self.last_mark {
            Some(mark) => self.sim.equity(mark),
            None => self.sim.cash(),
        };
        let report = self.sim.into_report(self.last_mark);

        info!(
            minutes = self.minutes,
            events = self.events,
            signals = self.signal_log.len(),
            trades = report.trades.len(),
            final_equity,
            "Replay finished"
        );

        Ok(RunOutput {
            minutes: self.minutes,
            events: self.events,
            late_events: self.late_events,
            signals: self.signal_log,
            fills: report.fills,
            trades: report.trades,
            equity_curve: self.equity_curve,
            features: self.feature_log.unwrap_or_default(),
            open_position: report.open_position,
            initial_capital: self.initial_capital,
            final_equity,
            total_fees: report.total_fees,
            total_funding: report.total_funding,
            alignment,
            signal_stats,
            sim_stats: report.stats,
            invariant_counters,
        })
    }
}

/// Replay a batch of events. The batch is sorted into canonical order first.
pub fn run(config: &TraderConfig, events: &[MarketEvent]) -> TraderResult<RunOutput> {
    let mut sorted = events.to_vec();
    sort_events(&mut sorted);
    run_sorted(config, &sorted)
}

/// Replay events already in canonical order.
pub fn run_sorted(config: &TraderConfig, events: &[MarketEvent]) -> TraderResult<RunOutput> {
    let mut engine = ReplayEngine::new(config)?;
    for event in events {
        engine.process_event(event)?;
    }
    engine.finish()
}

/// Replay everything a feed yields.
pub fn run_feed(config: &TraderConfig, feed: &mut dyn MarketDataFeed) -> TraderResult<RunOutput> {
    let mut engine = ReplayEngine::new(config)?;
    debug!(feed = feed.name(), remaining = ?feed.remaining(), "Starting replay");
    while let Some(event) = feed.next_event() {
        engine.process_event(&event)?;
    }
    engine.finish()
}

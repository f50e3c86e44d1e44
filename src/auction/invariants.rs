//! Mandatory Invariant Framework
//!
//! Structural invariants guard the no-look-ahead and determinism guarantees.
//! In Hard mode (the default) the first violation aborts the run with a
//! deterministic causal dump; a replay that breaks one of these is void.
//!
//! # Invariant Categories
//!
//! - **Time**: event timestamps never regress, decision times never go back
//! - **Histogram**: non-negative volume, bounded window, aggregate == sum of deltas
//! - **Signal**: signal decision times strictly increasing
//! - **Fills**: fill strictly after decision, finite prices
//!
//! # Usage
//!
//! ```ignore
//! let mut enforcer = InvariantEnforcer::new(InvariantConfig::default());
//! enforcer.check_event_time(event.ts_ms(), "trade")?;
//! enforcer.check_fill_after_decision(decision_ts, fill_ts)?;
//! ```

use crate::auction::clock::TimestampMs;
use crate::auction::histogram::{RollingHistogram, Tick, Volume};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::warn;

// =============================================================================
// INVARIANT MODE
// =============================================================================

/// Invariant enforcement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum InvariantMode {
    /// Off: No invariant checking (results are not trustworthy).
    Off,
    /// Soft: Log violations, increment counters, continue execution.
    Soft,
    /// Hard: Abort on first violation with deterministic dump.
    #[default]
    Hard,
}

impl InvariantMode {
    pub fn description(&self) -> &'static str {
        match self {
            Self::Off => "Invariants disabled",
            Self::Soft => "Soft mode: log + count violations, continue",
            Self::Hard => "Hard mode: abort on first violation",
        }
    }
}

// =============================================================================
// INVARIANT CATEGORIES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvariantCategory {
    Time,
    Histogram,
    Signal,
    Fills,
}

// =============================================================================
// INVARIANT VIOLATION
// =============================================================================

/// Violation type enumeration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ViolationType {
    // Time violations
    TimestampRegression { old: TimestampMs, new: TimestampMs },
    DecisionTimeBackward { old: TimestampMs, new: TimestampMs },

    // Histogram violations
    NegativeVolume { tick: Tick, volume: Volume },
    WindowOverflow { len: usize, max: usize },
    AggregateMismatch { tick: Tick, aggregate: Volume, expected: Volume },

    // Signal violations
    SignalTimeNotIncreasing { previous: TimestampMs, current: TimestampMs },

    // Fill violations
    FillNotAfterDecision { decision: TimestampMs, fill: TimestampMs },
    FillNaN { fill: TimestampMs },
}

impl ViolationType {
    pub fn category(&self) -> InvariantCategory {
        match self {
            Self::TimestampRegression { .. } | Self::DecisionTimeBackward { .. } => {
                InvariantCategory::Time
            }
            Self::NegativeVolume { .. }
            | Self::WindowOverflow { .. }
            | Self::AggregateMismatch { .. } => InvariantCategory::Histogram,
            Self::SignalTimeNotIncreasing { .. } => InvariantCategory::Signal,
            Self::FillNotAfterDecision { .. } | Self::FillNaN { .. } => InvariantCategory::Fills,
        }
    }
}

/// Detailed invariant violation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    pub category: InvariantCategory,
    pub violation_type: ViolationType,
    pub message: String,
    /// Latest event time observed when the violation was detected.
    pub sim_time: TimestampMs,
}

/// Compact event summary for context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSummary {
    pub ts_ms: TimestampMs,
    pub kind: String,
}

// =============================================================================
// CAUSAL DUMP
// =============================================================================

/// Minimal causal dump produced on Hard mode abort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausalDump {
    pub violation: InvariantViolation,
    /// Last N applied events, oldest first.
    pub recent_events: Vec<EventSummary>,
    pub counters: InvariantCounters,
}

impl CausalDump {
    /// Format as deterministic text for debugging.
    pub fn format_text(&self) -> String {
        let mut out = String::new();
        out.push_str("=== INVARIANT VIOLATION - CAUSAL DUMP ===\n\n");
        out.push_str(&format!("Category: {:?}\n", self.violation.category));
        out.push_str(&format!("Type: {:?}\n", self.violation.violation_type));
        out.push_str(&format!("Message: {}\n", self.violation.message));
        out.push_str(&format!("Sim Time: {} ms\n", self.violation.sim_time));

        out.push_str("\n--- Recent Events ---\n");
        if self.recent_events.is_empty() {
            out.push_str("  (none)\n");
        }
        for (i, e) in self.recent_events.iter().enumerate() {
            out.push_str(&format!("  [{}] {} @ {} ms\n", i, e.kind, e.ts_ms));
        }

        out.push_str(&format!("\n{}\n", self.counters.summary()));
        out.push_str("\n=========================================\n");
        out
    }
}

// =============================================================================
// INVARIANT COUNTERS
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvariantCounters {
    pub time_checks: u64,
    pub histogram_checks: u64,
    pub signal_checks: u64,
    pub fill_checks: u64,

    pub total_checks: u64,
    pub total_violations: u64,
}

impl InvariantCounters {
    pub fn record_check(&mut self, category: InvariantCategory) {
        self.total_checks += 1;
        match category {
            InvariantCategory::Time => self.time_checks += 1,
            InvariantCategory::Histogram => self.histogram_checks += 1,
            InvariantCategory::Signal => self.signal_checks += 1,
            InvariantCategory::Fills => self.fill_checks += 1,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "Checks: {} (T:{} H:{} S:{} F:{}) | Violations: {}",
            self.total_checks,
            self.time_checks,
            self.histogram_checks,
            self.signal_checks,
            self.fill_checks,
            self.total_violations,
        )
    }
}

// =============================================================================
// INVARIANT CONFIGURATION
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantConfig {
    pub mode: InvariantMode,
    /// Last N events to include in causal dump.
    pub event_dump_depth: usize,
}

impl Default for InvariantConfig {
    fn default() -> Self {
        Self {
            mode: InvariantMode::Hard,
            event_dump_depth: 50,
        }
    }
}

impl InvariantConfig {
    pub fn with_mode(mode: InvariantMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }
}

// =============================================================================
// INVARIANT ENFORCER
// =============================================================================

/// Error type for Hard mode aborts.
#[derive(Debug)]
pub struct InvariantAbort {
    pub dump: CausalDump,
}

impl std::fmt::Display for InvariantAbort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invariant violation: {:?}", self.dump.violation.violation_type)
    }
}

impl std::error::Error for InvariantAbort {}

pub type InvariantResult<T> = Result<T, InvariantAbort>;

/// Main invariant enforcer. One per pipeline instance.
pub struct InvariantEnforcer {
    config: InvariantConfig,
    counters: InvariantCounters,
    recent_events: VecDeque<EventSummary>,
    last_event_time: Option<TimestampMs>,
    last_decision_time: Option<TimestampMs>,
    last_signal_time: Option<TimestampMs>,
    /// First violation (for Soft mode)
    first_violation: Option<InvariantViolation>,
}

impl InvariantEnforcer {
    pub fn new(config: InvariantConfig) -> Self {
        let depth = config.event_dump_depth;
        Self {
            config,
            counters: InvariantCounters::default(),
            recent_events: VecDeque::with_capacity(depth),
            last_event_time: None,
            last_decision_time: None,
            last_signal_time: None,
            first_violation: None,
        }
    }

    pub fn mode(&self) -> InvariantMode {
        self.config.mode
    }

    pub fn counters(&self) -> &InvariantCounters {
        &self.counters
    }

    pub fn first_violation(&self) -> Option<&InvariantViolation> {
        self.first_violation.as_ref()
    }

    fn enabled(&self) -> bool {
        self.config.mode != InvariantMode::Off
    }

    fn sim_time(&self) -> TimestampMs {
        self.last_event_time.unwrap_or(0)
    }

    // =========================================================================
    // Time Invariants
    // =========================================================================

    /// Record an input event and check that event time never regresses.
    pub fn check_event_time(&mut self, ts_ms: TimestampMs, kind: &str) -> InvariantResult<()> {
        if !self.enabled() {
            return Ok(());
        }

        if self.recent_events.len() >= self.config.event_dump_depth {
            self.recent_events.pop_front();
        }
        self.recent_events.push_back(EventSummary {
            ts_ms,
            kind: kind.to_string(),
        });

        self.counters.record_check(InvariantCategory::Time);
        if let Some(last) = self.last_event_time {
            if ts_ms < last {
                return self.handle_violation(
                    ViolationType::TimestampRegression { old: last, new: ts_ms },
                    format!("Event time regressed: {} -> {}", last, ts_ms),
                );
            }
        }
        self.last_event_time = Some(ts_ms);
        Ok(())
    }

    /// Check decision (bar close) time monotonicity.
    pub fn check_decision_time(&mut self, decision: TimestampMs) -> InvariantResult<()> {
        if !self.enabled() {
            return Ok(());
        }

        self.counters.record_check(InvariantCategory::Time);
        if let Some(last) = self.last_decision_time {
            if decision < last {
                return self.handle_violation(
                    ViolationType::DecisionTimeBackward { old: last, new: decision },
                    format!("Decision time went backward: {} -> {}", last, decision),
                );
            }
        }
        self.last_decision_time = Some(decision);
        Ok(())
    }

    // =========================================================================
    // Histogram Invariants
    // =========================================================================

    /// Cheap per-minute checks: window bound and non-negative aggregate.
    /// With `full_audit`, also recompute the aggregate from the retained deltas.
    pub fn check_histogram(
        &mut self,
        histogram: &RollingHistogram,
        full_audit: bool,
    ) -> InvariantResult<()> {
        if !self.enabled() {
            return Ok(());
        }

        self.counters.record_check(InvariantCategory::Histogram);
        if histogram.window_len() > histogram.max_minutes() {
            return self.handle_violation(
                ViolationType::WindowOverflow {
                    len: histogram.window_len(),
                    max: histogram.max_minutes(),
                },
                format!(
                    "Rolling window holds {} minutes, max {}",
                    histogram.window_len(),
                    histogram.max_minutes()
                ),
            );
        }

        if let Some((tick, volume)) = histogram.aggregate().iter().find(|(_, v)| **v < 0) {
            return self.handle_violation(
                ViolationType::NegativeVolume {
                    tick: *tick,
                    volume: *volume,
                },
                format!("Negative aggregate volume {} at tick {}", volume, tick),
            );
        }

        if full_audit {
            if let Some((tick, aggregate, expected)) = histogram.first_aggregate_mismatch() {
                return self.handle_violation(
                    ViolationType::AggregateMismatch {
                        tick,
                        aggregate,
                        expected,
                    },
                    format!(
                        "Aggregate {} != sum of deltas {} at tick {}",
                        aggregate, expected, tick
                    ),
                );
            }
        }

        Ok(())
    }

    // =========================================================================
    // Signal Invariants
    // =========================================================================

    /// Signal decision times must be strictly increasing.
    pub fn check_signal_time(&mut self, ts: TimestampMs) -> InvariantResult<()> {
        if !self.enabled() {
            return Ok(());
        }

        self.counters.record_check(InvariantCategory::Signal);
        if let Some(previous) = self.last_signal_time {
            if ts <= previous {
                return self.handle_violation(
                    ViolationType::SignalTimeNotIncreasing {
                        previous,
                        current: ts,
                    },
                    format!("Signal at {} not after previous signal at {}", ts, previous),
                );
            }
        }
        self.last_signal_time = Some(ts);
        Ok(())
    }

    // =========================================================================
    // Fill Invariants
    // =========================================================================

    /// A fill must use data strictly after the decision it executes.
    pub fn check_fill_after_decision(
        &mut self,
        decision: TimestampMs,
        fill: TimestampMs,
        price: f64,
    ) -> InvariantResult<()> {
        if !self.enabled() {
            return Ok(());
        }

        self.counters.record_check(InvariantCategory::Fills);
        if fill <= decision {
            return self.handle_violation(
                ViolationType::FillNotAfterDecision { decision, fill },
                format!("Fill at {} not strictly after decision at {}", fill, decision),
            );
        }
        if !price.is_finite() {
            return self.handle_violation(
                ViolationType::FillNaN { fill },
                format!("Non-finite fill price at {}", fill),
            );
        }
        Ok(())
    }

    // =========================================================================
    // Violation handling
    // =========================================================================

    fn handle_violation(
        &mut self,
        violation_type: ViolationType,
        message: String,
    ) -> InvariantResult<()> {
        self.counters.total_violations += 1;
        let violation = InvariantViolation {
            category: violation_type.category(),
            violation_type,
            message,
            sim_time: self.sim_time(),
        };

        match self.config.mode {
            InvariantMode::Off => Ok(()),
            InvariantMode::Soft => {
                warn!(
                    category = ?violation.category,
                    "Invariant violation (soft): {}", violation.message
                );
                if self.first_violation.is_none() {
                    self.first_violation = Some(violation);
                }
                Ok(())
            }
            InvariantMode::Hard => Err(InvariantAbort {
                dump: CausalDump {
                    violation,
                    recent_events: self.recent_events.iter().cloned().collect(),
                    counters: self.counters.clone(),
                },
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mode_is_hard() {
        let enforcer = InvariantEnforcer::new(InvariantConfig::default());
        assert_eq!(enforcer.mode(), InvariantMode::Hard);
    }

    #[test]
    fn test_dump_depth_is_bounded() {
        let mut enforcer = InvariantEnforcer::new(InvariantConfig {
            mode: InvariantMode::Hard,
            event_dump_depth: 3,
        });
        for ts in 0..10 {
            enforcer.check_event_time(ts, "quote").unwrap();
        }
        let abort = enforcer.check_event_time(5, "trade").unwrap_err();
        assert_eq!(abort.dump.recent_events.len(), 3);
        assert_eq!(abort.dump.recent_events[2].ts_ms, 5);
        assert!(abort.dump.format_text().contains("TimestampRegression"));
    }

    #[test]
    fn test_off_mode_skips_checks() {
        let mut enforcer = InvariantEnforcer::new(InvariantConfig::with_mode(InvariantMode::Off));
        enforcer.check_fill_after_decision(100, 50, 1.0).unwrap();
        assert_eq!(enforcer.counters().total_checks, 0);
    }
}

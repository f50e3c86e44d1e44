//! Acceptance / Signal State Machine
//!
//! Two layers, both advanced exactly once per closed bar.
//!
//! ```text
//!   acceptance layer (pure)          position layer
//!   ┌──────────────────────┐         ┌────────────────────────────┐
//!   │ above-VAH sequence   │──k──┐   │ Flat ─signal─▶ Long/Short  │
//!   │ below-VAL sequence   │──k──┤   │ Long ─opposite─▶ Short     │
//!   └──────────────────────┘     │   │ Flat ─breakout─▶ PendingRetest
//!                                ▼   └────────────────────────────┘
//!          break-in > failed breakout > breakout  (one winner per bar)
//! ```
//!
//! Setups only fire on a valid value area. Cooldown, the daily loss
//! kill-switch and the external halt gate entries; they never stop the
//! acceptance layer from counting.

use crate::auction::clock::{minutes_between, utc_day, TimestampMs};
use crate::auction::config::TraderConfig;
use crate::auction::events::Direction;
use crate::auction::features::MinuteFeatures;
use crate::auction::order_flow::{Confirmation, ConfirmationGate, FlowThresholds, OrderFlowMetrics};
use crate::auction::value_area::ValueArea;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

// =============================================================================
// ACCEPTANCE LAYER
// =============================================================================

/// Which value-area boundary a sequence tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundarySide {
    AboveVah,
    BelowVal,
}

impl BoundarySide {
    #[inline]
    fn beyond(self, close: f64, boundary: f64) -> bool {
        match self {
            Self::AboveVah => close > boundary,
            Self::BelowVal => close < boundary,
        }
    }

    /// Continuation direction when acceptance completes.
    #[inline]
    pub fn direction(self) -> Direction {
        match self {
            Self::AboveVah => Direction::Long,
            Self::BelowVal => Direction::Short,
        }
    }
}

/// What one bar did to a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcceptanceStep {
    /// Inactive and still inside.
    Idle,
    /// First close beyond; boundary locked.
    Started,
    Extended,
    /// Count just reached k.
    Completed,
    /// Close back inside the locked boundary.
    Reset,
}

/// Consecutive-close record for one boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceSequence {
    pub side: BoundarySide,
    /// Boundary captured at the first qualifying close.
    pub locked_boundary: f64,
    pub count: u32,
    pub active: bool,
    pub started_min: Option<TimestampMs>,
}

impl AcceptanceSequence {
    pub fn new(side: BoundarySide) -> Self {
        Self {
            side,
            locked_boundary: 0.0,
            count: 0,
            active: false,
            started_min: None,
        }
    }

    /// Pure transition. `boundary` is only read when the sequence is
    /// inactive; an active sequence compares against its locked level.
    #[must_use]
    pub fn advance(
        &self,
        ts_min: TimestampMs,
        close: f64,
        boundary: f64,
        k: u32,
    ) -> (Self, AcceptanceStep) {
        if !self.active {
            if !self.side.beyond(close, boundary) {
                return (Self::new(self.side), AcceptanceStep::Idle);
            }
            let next = Self {
                side: self.side,
                locked_boundary: boundary,
                count: 1,
                active: true,
                started_min: Some(ts_min),
            };
            let step = if k <= 1 {
                AcceptanceStep::Completed
            } else {
                AcceptanceStep::Started
            };
            return (next, step);
        }

        if !self.side.beyond(close, self.locked_boundary) {
            return (Self::new(self.side), AcceptanceStep::Reset);
        }

        let next = Self {
            count: self.count + 1,
            ..*self
        };
        let step = if next.count == k {
            AcceptanceStep::Completed
        } else {
            AcceptanceStep::Extended
        };
        (next, step)
    }
}

// =============================================================================
// SIGNALS
// =============================================================================

/// Setup family, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SetupKind {
    BreakIn,
    FailedBreakout,
    Breakout,
}

impl SetupKind {
    /// Lower wins.
    #[inline]
    pub fn priority(self) -> u8 {
        match self {
            Self::BreakIn => 0,
            Self::FailedBreakout => 1,
            Self::Breakout => 2,
        }
    }

    pub fn tag(self, direction: Direction) -> &'static str {
        match (self, direction) {
            (Self::BreakIn, Direction::Long) => "breakin_long",
            (Self::BreakIn, Direction::Short) => "breakin_short",
            (Self::FailedBreakout, Direction::Long) => "failed_long",
            (Self::FailedBreakout, Direction::Short) => "failed_short",
            (Self::Breakout, Direction::Long) => "breakout_long",
            (Self::Breakout, Direction::Short) => "breakout_short",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalAction {
    /// Open from flat.
    Enter,
    /// Close the opposite position, then open.
    Flip,
}

/// An emitted trade intent. At most one per bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub ts_min: TimestampMs,
    pub decision_ts: TimestampMs,
    pub kind: SetupKind,
    pub direction: Direction,
    pub action: SignalAction,
    /// Bar close; sizing and limit-entry reference.
    pub reference_price: f64,
    pub stop: f64,
    pub tp1: f64,
    pub tp2: f64,
    pub va: ValueArea,
    pub order_flow: OrderFlowMetrics,
    pub qimb: f64,
    pub confirmation: Confirmation,
    pub reason: String,
}

/// Breakout awaiting a retest of its locked boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PendingRetest {
    pub direction: Direction,
    pub locked_boundary: f64,
    pub since_min: TimestampMs,
}

/// Position layer as seen by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PositionLayer {
    Flat,
    Long,
    Short,
    PendingRetest {
        direction: Direction,
        locked_boundary: f64,
    },
}

/// Why a winning candidate did not become a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuppressReason {
    Halted,
    DailyLoss,
    Cooldown,
    SameDirection,
    FlipDisabled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalStats {
    pub bars_evaluated: u64,
    pub bars_invalid_va: u64,
    pub candidates: u64,
    pub emitted: u64,
    pub flips: u64,
    pub retests_armed: u64,
    pub suppressed_halt: u64,
    pub suppressed_daily_loss: u64,
    pub suppressed_cooldown: u64,
    pub suppressed_same_direction: u64,
    pub suppressed_flip_disabled: u64,
}

impl SignalStats {
    fn record_suppressed(&mut self, reason: SuppressReason) {
        match reason {
            SuppressReason::Halted => self.suppressed_halt += 1,
            SuppressReason::DailyLoss => self.suppressed_daily_loss += 1,
            SuppressReason::Cooldown => self.suppressed_cooldown += 1,
            SuppressReason::SameDirection => self.suppressed_same_direction += 1,
            SuppressReason::FlipDisabled => self.suppressed_flip_disabled += 1,
        }
    }
}

// =============================================================================
// DAILY LOSS KILL-SWITCH
// =============================================================================

/// Realized loss per UTC day. Trips when the day's net realized P&L falls to
/// `-max_loss` and clears on the next UTC day.
#[derive(Debug, Clone, Default)]
pub struct DailyLossGuard {
    max_loss: Option<f64>,
    day: Option<i64>,
    realized: f64,
}

impl DailyLossGuard {
    pub fn new(max_loss: Option<f64>) -> Self {
        Self {
            max_loss,
            day: None,
            realized: 0.0,
        }
    }

    pub fn record(&mut self, ts_ms: TimestampMs, pnl: f64) {
        let day = utc_day(ts_ms);
        if self.day != Some(day) {
            self.day = Some(day);
            self.realized = 0.0;
        }
        self.realized += pnl;
    }

    pub fn realized_today(&self, ts_ms: TimestampMs) -> f64 {
        if self.day == Some(utc_day(ts_ms)) {
            self.realized
        } else {
            0.0
        }
    }

    pub fn is_tripped(&self, ts_ms: TimestampMs) -> bool {
        match self.max_loss {
            Some(max) => self.realized_today(ts_ms) <= -max,
            None => false,
        }
    }
}

// =============================================================================
// STATE MACHINE
// =============================================================================

#[derive(Debug, Clone)]
struct Candidate {
    kind: SetupKind,
    direction: Direction,
    stop: f64,
    tp1: f64,
    tp2: f64,
    confirmation: Confirmation,
    /// Breakout completion that should arm a retest instead of entering.
    arm_retest: Option<f64>,
    /// Produced by resolving a pending retest.
    from_pending: bool,
    reason: String,
}

pub struct SignalMachine {
    accept_k: u32,
    retest_enabled: bool,
    flip_on_signal: bool,
    stop_buffer: f64,
    cooldown_minutes: i64,
    gate: ConfirmationGate,
    entry: FlowThresholds,
    breakout: FlowThresholds,
    reversal: FlowThresholds,
    above: AcceptanceSequence,
    below: AcceptanceSequence,
    last_steps: (AcceptanceStep, AcceptanceStep),
    position: Option<Direction>,
    pending: Option<PendingRetest>,
    last_transition_min: Option<TimestampMs>,
    daily: DailyLossGuard,
    halted: bool,
    stats: SignalStats,
}

impl SignalMachine {
    pub fn new(config: &TraderConfig) -> Self {
        let sig = &config.signal;
        let of = &config.order_flow;
        Self {
            accept_k: sig.accept_outside_k,
            retest_enabled: sig.retest_enabled,
            flip_on_signal: sig.flip_on_signal,
            stop_buffer: config.stop_buffer(),
            cooldown_minutes: config.risk.cooldown_minutes as i64,
            gate: ConfirmationGate {
                ambiguous_frac_max: of.ambiguous_trade_frac_max,
                use_qimb: of.use_qimb,
            },
            entry: FlowThresholds {
                of_min: sig.of_entry_min,
                of_norm_min: sig.of_entry_min_norm,
                qimb_min: of.qimb_entry_min,
            },
            breakout: FlowThresholds {
                of_min: sig.of_breakout_min,
                of_norm_min: sig.of_breakout_min_norm,
                qimb_min: of.qimb_breakout_min,
            },
            // Fail limits are stated for the short reversal (flow at or
            // below them); negate to express them for a long confirmation.
            reversal: FlowThresholds {
                of_min: -sig.of_fail_max,
                of_norm_min: -sig.of_fail_max_norm,
                qimb_min: -of.qimb_fail_max,
            },
            above: AcceptanceSequence::new(BoundarySide::AboveVah),
            below: AcceptanceSequence::new(BoundarySide::BelowVal),
            last_steps: (AcceptanceStep::Idle, AcceptanceStep::Idle),
            position: None,
            pending: None,
            last_transition_min: None,
            daily: DailyLossGuard::new(config.risk.max_daily_loss),
            halted: false,
            stats: SignalStats::default(),
        }
    }

    /// Advance both layers with one closed bar.
    pub fn on_bar(&mut self, f: &MinuteFeatures) -> Option<SignalEvent> {
        self.stats.bars_evaluated += 1;
        if !f.va.is_valid {
            self.stats.bars_invalid_va += 1;
            return None;
        }

        let close = f.bar.close;
        let (prior_above, prior_below) = (self.above, self.below);
        let (above, step_above) = self.above.advance(f.ts_min, close, f.va.vah, self.accept_k);
        let (below, step_below) = self.below.advance(f.ts_min, close, f.va.val, self.accept_k);
        self.above = above;
        self.below = below;
        self.last_steps = (step_above, step_below);

        let mut candidates = Vec::new();
        if let Some(pending) = self.pending {
            if let Some(c) = self.resolve_pending(pending, f) {
                self.pending = None;
                candidates.push(c);
            }
        }
        self.break_in(f, &mut candidates);
        candidates.extend(self.failed_breakout(f, &prior_above, step_above));
        candidates.extend(self.failed_breakout(f, &prior_below, step_below));
        if step_above == AcceptanceStep::Completed {
            candidates.extend(self.breakout(f, &above));
        }
        if step_below == AcceptanceStep::Completed {
            candidates.extend(self.breakout(f, &below));
        }

        self.stats.candidates += candidates.len() as u64;
        let winner = candidates.into_iter().min_by_key(|c| c.kind.priority())?;

        if let Some(locked) = winner.arm_retest {
            self.pending = Some(PendingRetest {
                direction: winner.direction,
                locked_boundary: locked,
                since_min: f.ts_min,
            });
            self.stats.retests_armed += 1;
            debug!(
                ts_min = f.ts_min,
                direction = ?winner.direction,
                locked,
                "Breakout accepted, waiting for retest"
            );
            return None;
        }

        let action = match self.gate_entry(f, winner.direction) {
            Ok(action) => action,
            Err(reason) => {
                self.stats.record_suppressed(reason);
                debug!(
                    ts_min = f.ts_min,
                    setup = winner.kind.tag(winner.direction),
                    ?reason,
                    "Signal suppressed"
                );
                return None;
            }
        };

        if !winner.from_pending {
            self.pending = None;
        }
        self.position = Some(winner.direction);
        self.last_transition_min = Some(f.ts_min);
        self.stats.emitted += 1;
        if action == SignalAction::Flip {
            self.stats.flips += 1;
        }

        info!(
            ts_min = f.ts_min,
            setup = winner.kind.tag(winner.direction),
            ?action,
            close,
            stop = winner.stop,
            tp1 = winner.tp1,
            tp2 = winner.tp2,
            "Signal"
        );

        Some(SignalEvent {
            ts_min: f.ts_min,
            decision_ts: f.decision_ts,
            kind: winner.kind,
            direction: winner.direction,
            action,
            reference_price: close,
            stop: winner.stop,
            tp1: winner.tp1,
            tp2: winner.tp2,
            va: f.va,
            order_flow: f.order_flow,
            qimb: f.qimb_avg,
            confirmation: winner.confirmation,
            reason: winner.reason,
        })
    }

    fn confirm(&self, f: &MinuteFeatures, direction: Direction, t: FlowThresholds) -> Confirmation {
        self.gate.check(direction, &f.order_flow, f.qimb_avg, t)
    }

    fn break_in(&self, f: &MinuteFeatures, out: &mut Vec<Candidate>) {
        let bar = &f.bar;
        let va = &f.va;

        if bar.low < va.val && bar.close > va.val && f.touched_val {
            let confirmation = self.confirm(f, Direction::Long, self.entry);
            if confirmation.confirmed {
                out.push(Candidate {
                    kind: SetupKind::BreakIn,
                    direction: Direction::Long,
                    stop: bar.low - self.stop_buffer,
                    tp1: va.poc,
                    tp2: va.vah,
                    confirmation,
                    arm_retest: None,
                    from_pending: false,
                    reason: format!("Break-in long: low {} below VAL {}, closed back inside", bar.low, va.val),
                });
            }
        }

        if bar.high > va.vah && bar.close < va.vah && f.touched_vah {
            let confirmation = self.confirm(f, Direction::Short, self.entry);
            if confirmation.confirmed {
                out.push(Candidate {
                    kind: SetupKind::BreakIn,
                    direction: Direction::Short,
                    stop: bar.high + self.stop_buffer,
                    tp1: va.poc,
                    tp2: va.val,
                    confirmation,
                    arm_retest: None,
                    from_pending: false,
                    reason: format!("Break-in short: high {} above VAH {}, closed back inside", bar.high, va.vah),
                });
            }
        }
    }

    /// A sequence of 1..k closes beyond a boundary that this bar ends by
    /// closing back inside value. Completed sequences never qualify; their
    /// reversal goes through the pending retest instead.
    fn failed_breakout(
        &self,
        f: &MinuteFeatures,
        prior: &AcceptanceSequence,
        step: AcceptanceStep,
    ) -> Option<Candidate> {
        let bar = &f.bar;
        let va = &f.va;

        let aborted = step == AcceptanceStep::Reset
            && prior.active
            && prior.count >= 1
            && prior.count < self.accept_k;
        let inside = bar.close >= va.val && bar.close <= va.vah;
        let poked = match prior.side {
            BoundarySide::AboveVah => bar.high > va.vah && bar.close < va.vah,
            BoundarySide::BelowVal => bar.low < va.val && bar.close > va.val,
        };
        if !aborted || !inside || !poked {
            return None;
        }

        let direction = prior.side.direction().opposite();
        let confirmation = self.confirm(f, direction, self.reversal);
        if !confirmation.confirmed {
            return None;
        }

        let locked = prior.locked_boundary;
        let (stop, tp1, tp2) = match direction {
            Direction::Short => (bar.high + self.stop_buffer, va.poc, va.val),
            Direction::Long => (bar.low - self.stop_buffer, va.poc, va.vah),
        };
        Some(Candidate {
            kind: SetupKind::FailedBreakout,
            direction,
            stop,
            tp1,
            tp2,
            confirmation,
            arm_retest: None,
            from_pending: false,
            reason: format!(
                "Failed breakout {:?}: {} closes beyond {} then back inside",
                direction, prior.count, locked
            ),
        })
    }

    fn breakout(&self, f: &MinuteFeatures, seq: &AcceptanceSequence) -> Option<Candidate> {
        let direction = seq.side.direction();
        let confirmation = self.confirm(f, direction, self.breakout);
        if !confirmation.confirmed {
            return None;
        }
        let locked = seq.locked_boundary;
        let (stop, tp1, tp2) = self.breakout_levels(direction, locked, f.bar.close);
        Some(Candidate {
            kind: SetupKind::Breakout,
            direction,
            stop,
            tp1,
            tp2,
            confirmation,
            arm_retest: self.retest_enabled.then_some(locked),
            from_pending: false,
            reason: format!(
                "Breakout {:?}: {} closes beyond locked {}",
                direction, seq.count, locked
            ),
        })
    }

    /// Stop beyond the locked boundary, targets at 1R and 2R from `entry`.
    fn breakout_levels(&self, direction: Direction, locked: f64, entry: f64) -> (f64, f64, f64) {
        let s = direction.sign();
        let stop = locked - s * self.stop_buffer;
        let r = (entry - stop).abs();
        (stop, entry + s * r, entry + 2.0 * s * r)
    }

    fn resolve_pending(&self, p: PendingRetest, f: &MinuteFeatures) -> Option<Candidate> {
        let bar = &f.bar;
        let va = &f.va;
        let s = p.direction.sign();
        let locked = p.locked_boundary;

        let back_inside = s * (bar.close - locked) <= 0.0;
        if back_inside {
            let direction = p.direction.opposite();
            let (stop, tp1, tp2) = match direction {
                Direction::Short => (bar.high + self.stop_buffer, va.poc, va.val),
                Direction::Long => (bar.low - self.stop_buffer, va.poc, va.vah),
            };
            return Some(Candidate {
                kind: SetupKind::FailedBreakout,
                direction,
                stop,
                tp1,
                tp2,
                confirmation: Confirmation {
                    confirmed: true,
                    ..self.confirm(f, direction, self.reversal)
                },
                arm_retest: None,
                from_pending: true,
                reason: format!("Failed breakout {:?}: closed back inside locked {}", direction, locked),
            });
        }

        let extreme_toward = match p.direction {
            Direction::Long => bar.low,
            Direction::Short => bar.high,
        };
        let retested = s * (extreme_toward - locked) <= f.spread_avg;
        if retested {
            let (stop, tp1, tp2) = self.breakout_levels(p.direction, locked, bar.close);
            return Some(Candidate {
                kind: SetupKind::Breakout,
                direction: p.direction,
                stop,
                tp1,
                tp2,
                confirmation: self.confirm(f, p.direction, self.breakout),
                arm_retest: None,
                from_pending: true,
                reason: format!("Breakout {:?}: retested locked {}", p.direction, locked),
            });
        }

        None
    }

    fn gate_entry(&self, f: &MinuteFeatures, direction: Direction) -> Result<SignalAction, SuppressReason> {
        if self.halted {
            return Err(SuppressReason::Halted);
        }
        if self.daily.is_tripped(f.decision_ts) {
            return Err(SuppressReason::DailyLoss);
        }
        if self.in_cooldown(f.ts_min) {
            return Err(SuppressReason::Cooldown);
        }
        match self.position {
            None => Ok(SignalAction::Enter),
            Some(open) if open == direction => Err(SuppressReason::SameDirection),
            Some(_) if !self.flip_on_signal => Err(SuppressReason::FlipDisabled),
            Some(_) => Ok(SignalAction::Flip),
        }
    }

    pub fn in_cooldown(&self, ts_min: TimestampMs) -> bool {
        match self.last_transition_min {
            Some(last) => minutes_between(last, ts_min) < self.cooldown_minutes,
            None => false,
        }
    }

    /// The simulator closed (or never opened) the position.
    pub fn mark_flat(&mut self, ts_min: TimestampMs) {
        self.position = None;
        self.last_transition_min = Some(ts_min);
    }

    pub fn record_realized_pnl(&mut self, ts_ms: TimestampMs, pnl: f64) {
        self.daily.record(ts_ms, pnl);
    }

    pub fn set_halted(&mut self, halted: bool) {
        if halted != self.halted {
            info!(halted, "Entry halt changed");
        }
        self.halted = halted;
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn acceptance(&self, side: BoundarySide) -> &AcceptanceSequence {
        match side {
            BoundarySide::AboveVah => &self.above,
            BoundarySide::BelowVal => &self.below,
        }
    }

    /// Steps taken by (above, below) on the last valid bar.
    pub fn last_steps(&self) -> (AcceptanceStep, AcceptanceStep) {
        self.last_steps
    }

    pub fn position(&self) -> Option<Direction> {
        self.position
    }

    pub fn pending_retest(&self) -> Option<&PendingRetest> {
        self.pending.as_ref()
    }

    pub fn state(&self) -> PositionLayer {
        match (self.position, self.pending) {
            (Some(Direction::Long), _) => PositionLayer::Long,
            (Some(Direction::Short), _) => PositionLayer::Short,
            (None, Some(p)) => PositionLayer::PendingRetest {
                direction: p.direction,
                locked_boundary: p.locked_boundary,
            },
            (None, None) => PositionLayer::Flat,
        }
    }

    pub fn daily_loss(&self) -> &DailyLossGuard {
        &self.daily
    }

    pub fn stats(&self) -> &SignalStats {
        &self.stats
    }
}

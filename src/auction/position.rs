//! Position, sizing and trade records.
//!
//! Sizing is risk-based: the distance from reference price to stop sets the
//! units so a stop-out loses `risk_pct` of margin, then the leverage cap and
//! lot step are applied. A position may exit in two legs (TP1 partial, then
//! TP2 or stop on the remainder); it becomes one `TradeRecord` when flat.

use crate::auction::clock::{minutes_between, TimestampMs, MILLIS_PER_HOUR};
use crate::auction::config::SizingConfig;
use crate::auction::events::Direction;
use crate::auction::signal::SetupKind;
use serde::{Deserialize, Serialize};

/// Remaining quantity below this is treated as flat.
const QTY_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit1,
    TakeProfit2,
    TimeStop,
    SignalFlip,
}

/// Floor `qty` to a whole number of `step` lots.
#[inline]
pub fn floor_to_step(qty: f64, step: f64) -> f64 {
    if step <= 0.0 || !qty.is_finite() || qty <= 0.0 {
        return 0.0;
    }
    (qty / step + 1e-9).floor() * step
}

/// Whole lots in `qty`.
#[inline]
pub fn lots(qty: f64, step: f64) -> i64 {
    (qty / step).round() as i64
}

/// TP1 leg size, or 0 when the position is too small to split.
pub fn tp1_quantity(total: f64, tp1_pct: f64, qty_step: f64) -> f64 {
    let total_lots = lots(total, qty_step);
    if total_lots < 2 {
        return 0.0;
    }
    let tp1_lots = ((total_lots as f64) * tp1_pct).round() as i64;
    let tp1_lots = tp1_lots.min(total_lots - 1);
    if tp1_lots <= 0 {
        return 0.0;
    }
    tp1_lots as f64 * qty_step
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSizer {
    pub risk_pct: f64,
    pub max_leverage: f64,
    pub qty_step: f64,
}

impl PositionSizer {
    pub fn new(sizing: &SizingConfig, qty_step: f64) -> Self {
        Self {
            risk_pct: sizing.risk_pct,
            max_leverage: sizing.max_leverage,
            qty_step,
        }
    }

    /// Units to trade. Zero means skip the entry.
    pub fn size(&self, margin: f64, entry: f64, stop: f64) -> f64 {
        let distance = (entry - stop).abs();
        if margin <= 0.0 || entry <= 0.0 || distance <= 0.0 || !distance.is_finite() {
            return 0.0;
        }
        let mut units = margin * self.risk_pct / distance;
        let max_units = margin * self.max_leverage / entry;
        if units > max_units {
            units = max_units;
        }
        floor_to_step(units, self.qty_step)
    }
}

/// Exit legs decided at a bar close, in execution order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExitPlan {
    pub legs: Vec<(f64, ExitReason)>,
}

impl ExitPlan {
    pub fn is_empty(&self) -> bool {
        self.legs.is_empty()
    }

    pub fn total_qty(&self) -> f64 {
        self.legs.iter().map(|(q, _)| q).sum()
    }
}

/// An open position. Entry and exit prices are actual fill prices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: u64,
    pub direction: Direction,
    pub setup: SetupKind,
    pub signal_ts: TimestampMs,
    pub entry_ts: TimestampMs,
    pub entry_price: f64,
    pub initial_qty: f64,
    pub qty: f64,
    pub stop: f64,
    pub tp1: f64,
    pub tp2: f64,
    /// Zero when TP1 is skipped.
    pub tp1_qty: f64,
    pub tp1_done: bool,
    pub fees: f64,
    pub funding: f64,
    pub realized_gross: f64,
    exit_notional: f64,
    exit_qty: f64,
    partial_exits: u32,
    next_funding_ts: TimestampMs,
    /// (low, high) of trades printed after entry since the last bar check.
    excursion: Option<(f64, f64)>,
}

/// Levels and size fixed when the entry order was created.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntryPlan {
    pub direction: Direction,
    pub setup: SetupKind,
    pub signal_ts: TimestampMs,
    pub qty: f64,
    pub tp1_qty: f64,
    pub stop: f64,
    pub tp1: f64,
    pub tp2: f64,
}

impl Position {
    pub fn open(
        id: u64,
        plan: &EntryPlan,
        entry_ts: TimestampMs,
        entry_price: f64,
        entry_fee: f64,
        funding_interval_hours: u32,
    ) -> Self {
        Self {
            id,
            direction: plan.direction,
            setup: plan.setup,
            signal_ts: plan.signal_ts,
            entry_ts,
            entry_price,
            initial_qty: plan.qty,
            qty: plan.qty,
            stop: plan.stop,
            tp1: plan.tp1,
            tp2: plan.tp2,
            tp1_qty: plan.tp1_qty,
            tp1_done: false,
            fees: entry_fee,
            funding: 0.0,
            realized_gross: 0.0,
            exit_notional: 0.0,
            exit_qty: 0.0,
            partial_exits: 0,
            next_funding_ts: entry_ts + funding_interval_hours.max(1) as i64 * MILLIS_PER_HOUR,
            excursion: None,
        }
    }

    #[inline]
    pub fn unrealized(&self, mark: f64) -> f64 {
        self.direction.sign() * (mark - self.entry_price) * self.qty
    }

    /// Track post-entry price extremes for exit detection.
    pub fn observe_trade(&mut self, ts_ms: TimestampMs, price: f64) {
        if ts_ms <= self.entry_ts {
            return;
        }
        self.excursion = Some(match self.excursion {
            Some((lo, hi)) => (lo.min(price), hi.max(price)),
            None => (price, price),
        });
    }

    /// Decide exits for the bar that just closed. Stop beats target when both
    /// were touched. TP1 is recorded as done (and the stop optionally moved
    /// to break-even) at decision time.
    pub fn plan_exits(
        &mut self,
        ts_min: TimestampMs,
        mark: f64,
        max_hold_minutes: u32,
        extend_if_profitable: bool,
        move_stop_to_breakeven: bool,
    ) -> ExitPlan {
        let mut plan = ExitPlan::default();
        if let Some((low, high)) = self.excursion.take() {
            let s = self.direction.sign();
            let (adverse, favorable) = match self.direction {
                Direction::Long => (low, high),
                Direction::Short => (high, low),
            };

            if s * (adverse - self.stop) <= 0.0 {
                plan.legs.push((self.qty, ExitReason::StopLoss));
                return plan;
            }

            let mut remaining = self.qty;
            if !self.tp1_done && self.tp1_qty > 0.0 && s * (favorable - self.tp1) >= 0.0 {
                let leg = self.tp1_qty.min(remaining);
                plan.legs.push((leg, ExitReason::TakeProfit1));
                remaining -= leg;
                self.tp1_done = true;
                if move_stop_to_breakeven {
                    self.stop = self.entry_price;
                }
            }
            if remaining > QTY_EPSILON && s * (favorable - self.tp2) >= 0.0 {
                plan.legs.push((remaining, ExitReason::TakeProfit2));
            }
            if !plan.is_empty() {
                return plan;
            }
        }

        let held = minutes_between(self.entry_ts, ts_min);
        if held >= max_hold_minutes as i64 && !(extend_if_profitable && self.unrealized(mark) > 0.0) {
            plan.legs.push((self.qty, ExitReason::TimeStop));
        }
        plan
    }

    /// Charge funding for every elapsed interval up to `ts_ms`. Longs pay
    /// when the rate is positive. Returns the amount charged now.
    pub fn accrue_funding(&mut self, ts_ms: TimestampMs, mark: f64, rate_bps: f64, interval_hours: u32) -> f64 {
        let interval = interval_hours.max(1) as i64 * MILLIS_PER_HOUR;
        let mut charged = 0.0;
        while ts_ms >= self.next_funding_ts {
            charged += self.direction.sign() * self.qty * mark * rate_bps / 10_000.0;
            self.next_funding_ts += interval;
        }
        self.funding += charged;
        charged
    }

    /// Book an exit fill. Returns the realized gross P&L of this leg.
    pub fn apply_exit(&mut self, qty: f64, price: f64, fee: f64) -> f64 {
        let qty = qty.min(self.qty);
        let pnl = self.direction.sign() * (price - self.entry_price) * qty;
        self.realized_gross += pnl;
        self.fees += fee;
        self.exit_notional += price * qty;
        self.exit_qty += qty;
        self.qty -= qty;
        if self.qty <= QTY_EPSILON {
            self.qty = 0.0;
        } else {
            self.partial_exits += 1;
        }
        pnl
    }

    pub fn is_closed(&self) -> bool {
        self.qty <= QTY_EPSILON
    }

    pub fn into_record(self, exit_ts: TimestampMs, exit_reason: ExitReason) -> TradeRecord {
        let exit_price = if self.exit_qty > 0.0 {
            self.exit_notional / self.exit_qty
        } else {
            self.entry_price
        };
        TradeRecord {
            id: self.id,
            direction: self.direction,
            setup: self.setup,
            signal_ts: self.signal_ts,
            entry_ts: self.entry_ts,
            exit_ts,
            entry_price: self.entry_price,
            exit_price,
            qty: self.initial_qty,
            gross_pnl: self.realized_gross,
            fees: self.fees,
            funding: self.funding,
            net_pnl: self.realized_gross - self.fees - self.funding,
            exit_reason,
            hold_minutes: (exit_ts - self.entry_ts) as f64 / 60_000.0,
            partial_exits: self.partial_exits,
        }
    }
}

/// A completed round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: u64,
    pub direction: Direction,
    pub setup: SetupKind,
    pub signal_ts: TimestampMs,
    pub entry_ts: TimestampMs,
    pub exit_ts: TimestampMs,
    pub entry_price: f64,
    /// Quantity-weighted across exit legs.
    pub exit_price: f64,
    pub qty: f64,
    pub gross_pnl: f64,
    pub fees: f64,
    pub funding: f64,
    pub net_pnl: f64,
    /// Reason of the final leg.
    pub exit_reason: ExitReason,
    pub hold_minutes: f64,
    pub partial_exits: u32,
}

impl TradeRecord {
    pub fn is_win(&self) -> bool {
        self.net_pnl > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(direction: Direction, qty: f64, tp1_qty: f64) -> EntryPlan {
        EntryPlan {
            direction,
            setup: SetupKind::BreakIn,
            signal_ts: 59_999,
            qty,
            tp1_qty,
            stop: if direction == Direction::Long { 95.0 } else { 105.0 },
            tp1: if direction == Direction::Long { 102.0 } else { 98.0 },
            tp2: if direction == Direction::Long { 104.0 } else { 96.0 },
        }
    }

    #[test]
    fn test_sizing_by_risk() {
        let sizer = PositionSizer {
            risk_pct: 0.02,
            max_leverage: 10.0,
            qty_step: 0.001,
        };
        // 10_000 * 0.02 / 4 = 50 units
        assert!((sizer.size(10_000.0, 101.0, 97.0) - 50.0).abs() < 1e-9);
        assert_eq!(sizer.size(10_000.0, 100.0, 100.0), 0.0);
        assert_eq!(sizer.size(0.0, 100.0, 99.0), 0.0);
    }

    #[test]
    fn test_sizing_leverage_cap() {
        let sizer = PositionSizer {
            risk_pct: 0.02,
            max_leverage: 2.0,
            qty_step: 0.001,
        };
        // Risk sizing wants 200 units at 50_000; cap is 10_000 * 2 / 50_000 = 0.4.
        let units = sizer.size(10_000.0, 50_000.0, 49_999.0);
        assert!((units - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_floor_to_step() {
        assert!((floor_to_step(1.23456, 0.001) - 1.234).abs() < 1e-12);
        assert!((floor_to_step(0.3, 0.1) - 0.3).abs() < 1e-12);
        assert_eq!(floor_to_step(0.0009, 0.001), 0.0);
    }

    #[test]
    fn test_tp1_split() {
        assert!((tp1_quantity(1.0, 0.3, 0.001) - 0.3).abs() < 1e-12);
        assert_eq!(tp1_quantity(0.001, 0.3, 0.001), 0.0, "single lot cannot split");
        assert_eq!(tp1_quantity(0.002, 0.1, 0.001), 0.0, "rounds to zero lots");
        assert!((tp1_quantity(0.002, 0.3, 0.001) - 0.001).abs() < 1e-12);
    }

    #[test]
    fn test_stop_wins_over_target() {
        let mut pos = Position::open(1, &plan(Direction::Long, 1.0, 0.3), 60_100, 100.0, 0.0, 8);
        pos.observe_trade(61_000, 105.0);
        pos.observe_trade(62_000, 94.0);
        let exits = pos.plan_exits(60_000, 100.0, 60, true, true);
        assert_eq!(exits.legs, vec![(1.0, ExitReason::StopLoss)]);
        assert!(!pos.tp1_done);
    }

    #[test]
    fn test_tp1_then_breakeven_then_tp2() {
        let mut pos = Position::open(1, &plan(Direction::Long, 1.0, 0.3), 60_100, 100.0, 0.0, 8);
        pos.observe_trade(61_000, 102.5);
        let exits = pos.plan_exits(60_000, 102.5, 60, true, true);
        assert_eq!(exits.legs, vec![(0.3, ExitReason::TakeProfit1)]);
        assert!(pos.tp1_done);
        assert_eq!(pos.stop, 100.0);

        pos.apply_exit(0.3, 102.0, 0.0);
        pos.observe_trade(121_000, 104.0);
        let exits = pos.plan_exits(120_000, 104.0, 60, true, true);
        assert_eq!(exits.legs.len(), 1);
        assert_eq!(exits.legs[0].1, ExitReason::TakeProfit2);
        assert!((exits.legs[0].0 - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_tp_both_in_one_bar_for_short() {
        let mut pos = Position::open(1, &plan(Direction::Short, 1.0, 0.3), 60_100, 100.0, 0.0, 8);
        pos.observe_trade(61_000, 95.5);
        let exits = pos.plan_exits(60_000, 96.0, 60, true, true);
        assert_eq!(exits.legs.len(), 2);
        assert_eq!(exits.legs[0], (0.3, ExitReason::TakeProfit1));
        assert_eq!(exits.legs[1].1, ExitReason::TakeProfit2);
        assert!((exits.total_qty() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_trades_before_entry_ignored() {
        let mut pos = Position::open(1, &plan(Direction::Long, 1.0, 0.0), 60_500, 100.0, 0.0, 8);
        pos.observe_trade(60_200, 90.0);
        assert!(pos.plan_exits(60_000, 100.0, 60, true, true).is_empty());
    }

    #[test]
    fn test_time_stop_and_extension() {
        let mut pos = Position::open(1, &plan(Direction::Long, 1.0, 0.0), 0, 100.0, 0.0, 8);
        assert!(pos.plan_exits(59 * 60_000, 99.0, 60, true, true).is_empty());

        let profitable = pos.plan_exits(60 * 60_000, 101.0, 60, true, true);
        assert!(profitable.is_empty(), "extended while in profit");

        let losing = pos.plan_exits(60 * 60_000, 99.0, 60, true, true);
        assert_eq!(losing.legs, vec![(1.0, ExitReason::TimeStop)]);

        let strict = pos.plan_exits(60 * 60_000, 101.0, 60, false, true);
        assert_eq!(strict.legs, vec![(1.0, ExitReason::TimeStop)]);
    }

    #[test]
    fn test_funding_longs_pay() {
        let mut long = Position::open(1, &plan(Direction::Long, 2.0, 0.0), 0, 100.0, 0.0, 8);
        assert_eq!(long.accrue_funding(7 * MILLIS_PER_HOUR, 100.0, 1.0, 8), 0.0);
        let charged = long.accrue_funding(8 * MILLIS_PER_HOUR, 100.0, 1.0, 8);
        assert!((charged - 0.02).abs() < 1e-12);

        let mut short = Position::open(2, &plan(Direction::Short, 2.0, 0.0), 0, 100.0, 0.0, 8);
        let received = short.accrue_funding(17 * MILLIS_PER_HOUR, 100.0, 1.0, 8);
        assert!((received + 0.04).abs() < 1e-12, "two intervals credited");
    }

    #[test]
    fn test_record_aggregates_legs() {
        let mut pos = Position::open(7, &plan(Direction::Long, 1.0, 0.3), 0, 100.0, 0.05, 8);
        pos.apply_exit(0.3, 102.0, 0.01);
        pos.apply_exit(0.7, 104.0, 0.02);
        assert!(pos.is_closed());

        let rec = pos.into_record(120_000, ExitReason::TakeProfit2);
        assert!((rec.gross_pnl - (0.6 + 2.8)).abs() < 1e-9);
        assert!((rec.fees - 0.08).abs() < 1e-12);
        assert!((rec.net_pnl - 3.32).abs() < 1e-9);
        assert!((rec.exit_price - 103.4).abs() < 1e-9);
        assert_eq!(rec.partial_exits, 1);
        assert!((rec.hold_minutes - 2.0).abs() < 1e-12);
        assert!(rec.is_win());
    }
}

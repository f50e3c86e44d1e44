//! Fill Simulator
//!
//! Owns orders, the open position, cash and the fill/trade logs. Decisions
//! arrive at bar close (`decision_ts = minute_start + 59_999`); every order
//! they create waits for the first quote stamped strictly later.
//!
//! ```text
//! bar close ──▶ funding, limit timeouts, exit legs ──▶ order queue (FIFO)
//! signal    ──▶ [flip exit] + entry (limit or market) ─┘
//! quote     ──▶ fill every order whose decision_ts < quote.ts
//! ```

use crate::auction::clock::{minutes_between, TimestampMs};
use crate::auction::config::TraderConfig;
use crate::auction::error::TraderResult;
use crate::auction::events::{Direction, Quote, Trade};
use crate::auction::features::MinuteFeatures;
use crate::auction::fill_model::{Execution, Fill, FillIntent, FillModel, FillPurpose, OrderType, Side};
use crate::auction::invariants::InvariantEnforcer;
use crate::auction::position::{
    tp1_quantity, EntryPlan, ExitReason, Position, PositionSizer, TradeRecord,
};
use crate::auction::signal::{SignalAction, SignalEvent};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct PendingOrder {
    id: u64,
    decision_ts: TimestampMs,
    created_min: TimestampMs,
    side: Side,
    qty: f64,
    kind: OrderType,
    intent: FillIntent,
    entry: Option<EntryPlan>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimStats {
    pub orders_submitted: u64,
    pub market_fills: u64,
    pub limit_fills: u64,
    pub limit_timeouts: u64,
    pub entries_skipped: u64,
    pub orders_cancelled: u64,
    pub funding_charges: u64,
}

/// Result of handing a signal to the simulator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SubmitOutcome {
    Submitted { qty: f64 },
    /// Sizing produced zero units.
    Skipped,
}

/// What a bar close did to the book.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarOutcome {
    /// Exit legs now cover the whole position.
    pub exiting: bool,
    pub equity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub ts_ms: TimestampMs,
    pub equity: f64,
}

/// Final state of the simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorReport {
    pub fills: Vec<Fill>,
    pub trades: Vec<TradeRecord>,
    pub open_position: Option<Position>,
    pub cash: f64,
    pub unrealized: f64,
    pub total_fees: f64,
    pub total_funding: f64,
    pub stats: SimStats,
}

pub struct FillSimulator {
    model: FillModel,
    sizer: PositionSizer,
    qty_step: f64,
    tp1_pct: f64,
    move_stop_to_breakeven: bool,
    max_hold_minutes: u32,
    extend_if_profitable: bool,
    use_limit_for_entry: bool,
    limit_timeout_minutes: i64,
    funding_rate_bps: f64,
    funding_interval_hours: u32,
    cash: f64,
    position: Option<Position>,
    orders: VecDeque<PendingOrder>,
    fills: Vec<Fill>,
    trades: Vec<TradeRecord>,
    next_id: u64,
    total_fees: f64,
    total_funding: f64,
    stats: SimStats,
}

impl FillSimulator {
    pub fn new(config: &TraderConfig) -> Self {
        let exec = &config.execution;
        let qty_step = config.instrument.qty_step;
        Self {
            model: FillModel::from_config(exec, config.instrument.tick_size),
            sizer: PositionSizer::new(&config.sizing, qty_step),
            qty_step,
            tp1_pct: config.sizing.tp1_pct,
            move_stop_to_breakeven: config.sizing.move_stop_to_breakeven,
            max_hold_minutes: config.risk.max_hold_minutes,
            extend_if_profitable: config.risk.extend_if_profitable,
            use_limit_for_entry: exec.use_limit_for_entry,
            limit_timeout_minutes: exec.limit_order_timeout_minutes as i64,
            funding_rate_bps: config.backtest.funding_rate_8h_bps,
            funding_interval_hours: config.backtest.funding_interval_hours,
            cash: config.backtest.initial_capital,
            position: None,
            orders: VecDeque::new(),
            fills: Vec::new(),
            trades: Vec::new(),
            next_id: 1,
            total_fees: 0.0,
            total_funding: 0.0,
            stats: SimStats::default(),
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    // =========================================================================
    // Decisions
    // =========================================================================

    /// Turn a signal into orders. A flip first queues a market exit of the
    /// open position; unfilled entries are cancelled either way.
    pub fn submit(&mut self, signal: &SignalEvent) -> SubmitOutcome {
        let before = self.orders.len();
        self.orders.retain(|o| o.intent != FillIntent::Entry);
        self.stats.orders_cancelled += (before - self.orders.len()) as u64;

        if signal.action == SignalAction::Flip {
            if let Some(pos) = self.position.as_ref() {
                if pos.direction != signal.direction {
                    let (direction, qty) = (pos.direction, pos.qty);
                    let before = self.orders.len();
                    self.orders.retain(|o| o.entry.is_some());
                    self.stats.orders_cancelled += (before - self.orders.len()) as u64;
                    self.queue_exit(direction, qty, ExitReason::SignalFlip, signal.decision_ts, signal.ts_min);
                }
            }
        }

        let qty = self.sizer.size(self.cash, signal.reference_price, signal.stop);
        if qty <= 0.0 {
            self.stats.entries_skipped += 1;
            debug!(
                ts_min = signal.ts_min,
                margin = self.cash,
                reference = signal.reference_price,
                stop = signal.stop,
                "Entry skipped, zero size"
            );
            return SubmitOutcome::Skipped;
        }

        let plan = EntryPlan {
            direction: signal.direction,
            setup: signal.kind,
            signal_ts: signal.decision_ts,
            qty,
            tp1_qty: tp1_quantity(qty, self.tp1_pct, self.qty_step),
            stop: signal.stop,
            tp1: signal.tp1,
            tp2: signal.tp2,
        };
        let kind = if self.use_limit_for_entry {
            OrderType::Limit {
                price: signal.reference_price,
            }
        } else {
            OrderType::Market
        };
        let id = self.next_id();
        self.orders.push_back(PendingOrder {
            id,
            decision_ts: signal.decision_ts,
            created_min: signal.ts_min,
            side: Side::opening(signal.direction),
            qty,
            kind,
            intent: FillIntent::Entry,
            entry: Some(plan),
        });
        self.stats.orders_submitted += 1;
        SubmitOutcome::Submitted { qty }
    }

    fn queue_exit(
        &mut self,
        direction: Direction,
        qty: f64,
        reason: ExitReason,
        decision_ts: TimestampMs,
        ts_min: TimestampMs,
    ) {
        let id = self.next_id();
        self.orders.push_back(PendingOrder {
            id,
            decision_ts,
            created_min: ts_min,
            side: Side::closing(direction),
            qty,
            kind: OrderType::Market,
            intent: FillIntent::Exit(reason),
            entry: None,
        });
        self.stats.orders_submitted += 1;
    }

    fn has_pending_exit(&self) -> bool {
        self.orders.iter().any(|o| o.entry.is_none())
    }

    /// Bar-close bookkeeping: limit timeouts, funding, exit detection and
    /// the equity mark.
    pub fn on_bar_close(&mut self, f: &MinuteFeatures) -> BarOutcome {
        for order in self.orders.iter_mut() {
            if let OrderType::Limit { price } = order.kind {
                if minutes_between(order.created_min, f.ts_min) >= self.limit_timeout_minutes {
                    debug!(order_id = order.id, limit = price, "Limit entry timed out, converting to market");
                    order.kind = OrderType::Market;
                    order.decision_ts = f.decision_ts;
                    self.stats.limit_timeouts += 1;
                }
            }
        }

        let mark = f.mid_close;
        let mut exiting = false;
        let pending_exit = self.has_pending_exit();
        let mut legs = Vec::new();
        if let Some(pos) = self.position.as_mut() {
            let charged = pos.accrue_funding(
                f.decision_ts,
                mark,
                self.funding_rate_bps,
                self.funding_interval_hours,
            );
            if charged != 0.0 {
                self.cash -= charged;
                self.total_funding += charged;
                self.stats.funding_charges += 1;
            }

            if !pending_exit {
                let plan = pos.plan_exits(
                    f.ts_min,
                    mark,
                    self.max_hold_minutes,
                    self.extend_if_profitable,
                    self.move_stop_to_breakeven,
                );
                exiting = !plan.is_empty() && plan.total_qty() >= pos.qty - 1e-12;
                legs = plan.legs;
                if !legs.is_empty() {
                    debug!(
                        position = pos.id,
                        ts_min = f.ts_min,
                        legs = ?legs,
                        "Exit decided"
                    );
                }
            }
        }
        if let Some(direction) = self.position.as_ref().map(|p| p.direction) {
            for (qty, reason) in legs {
                self.queue_exit(direction, qty, reason, f.decision_ts, f.ts_min);
            }
        }

        BarOutcome {
            exiting,
            equity: self.equity(mark),
        }
    }

    // =========================================================================
    // Market data
    // =========================================================================

    pub fn on_trade(&mut self, trade: &Trade) {
        if let Some(pos) = self.position.as_mut() {
            pos.observe_trade(trade.ts_ms, trade.price);
        }
    }

    /// Execute every queued order this quote can fill, in queue order.
    /// Returns trades that closed.
    pub fn on_quote(
        &mut self,
        quote: &Quote,
        invariants: &mut InvariantEnforcer,
    ) -> TraderResult<Vec<TradeRecord>> {
        let mut closed = Vec::new();
        if self.orders.is_empty() {
            return Ok(closed);
        }

        let mut remaining = VecDeque::with_capacity(self.orders.len());
        while let Some(order) = self.orders.pop_front() {
            if quote.ts_ms <= order.decision_ts {
                remaining.push_back(order);
                continue;
            }
            let execution = match order.kind {
                OrderType::Market => {
                    let purpose = if order.entry.is_some() {
                        FillPurpose::Entry
                    } else {
                        FillPurpose::Exit
                    };
                    Some(self.model.market(order.side, purpose, quote, order.qty))
                }
                OrderType::Limit { price } => self.model.limit(order.side, price, quote, order.qty),
            };
            let Some(execution) = execution else {
                remaining.push_back(order);
                continue;
            };

            invariants.check_fill_after_decision(order.decision_ts, quote.ts_ms, execution.price)?;
            if let Some(record) = self.apply_fill(&order, quote.ts_ms, execution) {
                closed.push(record);
            }
        }
        self.orders = remaining;
        Ok(closed)
    }

    fn apply_fill(&mut self, order: &PendingOrder, ts_ms: TimestampMs, exec: Execution) -> Option<TradeRecord> {
        match order.kind {
            OrderType::Market => self.stats.market_fills += 1,
            OrderType::Limit { .. } => self.stats.limit_fills += 1,
        }
        self.cash -= exec.fee;
        self.total_fees += exec.fee;

        let mut qty = order.qty;
        let mut record = None;
        match (order.intent, order.entry) {
            (FillIntent::Entry, Some(plan)) => {
                let pos = Position::open(
                    order.id,
                    &plan,
                    ts_ms,
                    exec.price,
                    exec.fee,
                    self.funding_interval_hours,
                );
                info!(
                    position = pos.id,
                    direction = ?pos.direction,
                    qty = pos.qty,
                    price = exec.price,
                    ts_ms,
                    "Entry filled"
                );
                self.position = Some(pos);
            }
            (FillIntent::Exit(reason), _) => {
                let Some(pos) = self.position.as_mut() else {
                    return None;
                };
                qty = qty.min(pos.qty);
                let pnl = pos.apply_exit(qty, exec.price, exec.fee);
                self.cash += pnl;
                if pos.is_closed() {
                    if let Some(pos) = self.position.take() {
                        let trade = pos.into_record(ts_ms, reason);
                        info!(
                            position = trade.id,
                            reason = ?reason,
                            net_pnl = trade.net_pnl,
                            ts_ms,
                            "Position closed"
                        );
                        self.trades.push(trade.clone());
                        record = Some(trade);
                    }
                }
            }
            (FillIntent::Entry, None) => {}
        }

        self.fills.push(Fill {
            order_id: order.id,
            ts_ms,
            decision_ts: order.decision_ts,
            side: order.side,
            intent: order.intent,
            qty,
            price: exec.price,
            fee: exec.fee,
            slippage: exec.slippage,
            liquidity: exec.liquidity,
        });
        record
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn equity(&self, mark: f64) -> f64 {
        self.cash + self.position.as_ref().map_or(0.0, |p| p.unrealized(mark))
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn pending_orders(&self) -> usize {
        self.orders.len()
    }

    pub fn fills(&self) -> &[Fill] {
        &self.fills
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn stats(&self) -> &SimStats {
        &self.stats
    }

    pub fn into_report(self, mark: Option<f64>) -> SimulatorReport {
        let unrealized = match (&self.position, mark) {
            (Some(p), Some(m)) => p.unrealized(m),
            _ => 0.0,
        };
        SimulatorReport {
            fills: self.fills,
            trades: self.trades,
            open_position: self.position,
            cash: self.cash,
            unrealized,
            total_fees: self.total_fees,
            total_funding: self.total_funding,
            stats: self.stats,
        }
    }
}

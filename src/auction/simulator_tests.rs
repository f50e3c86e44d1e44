//! Fill simulator scenarios: signal flips, split take-profits and funding.
//!
//! Tick and lot are 1.0, fees and slippage are zero, capital is 10_000 at
//! 2% risk, so a 4-point stop sizes to 50 units.

use crate::auction::clock::{minute_close_ts, MILLIS_PER_MINUTE};
use crate::auction::config::TraderConfig;
use crate::auction::events::{Direction, MinuteBar, Quote, Trade};
use crate::auction::features::MinuteFeatures;
use crate::auction::fill_model::{FillIntent, Side};
use crate::auction::invariants::{InvariantConfig, InvariantEnforcer};
use crate::auction::order_flow::{Confirmation, OrderFlowMetrics};
use crate::auction::position::ExitReason;
use crate::auction::signal::{SetupKind, SignalAction, SignalEvent};
use crate::auction::simulator::{FillSimulator, SubmitOutcome};
use crate::auction::value_area::ValueArea;

fn config() -> TraderConfig {
    let mut config = TraderConfig::default();
    config.instrument.tick_size = 1.0;
    config.instrument.qty_step = 1.0;
    config.execution.use_limit_for_entry = false;
    config.execution.slippage_ticks_entry = 0;
    config.execution.slippage_ticks_exit = 0;
    config.execution.taker_fee_bps = 0.0;
    config.execution.maker_fee_bps = 0.0;
    config.backtest.funding_rate_8h_bps = 0.0;
    config
}

fn va() -> ValueArea {
    ValueArea {
        poc: 101.0,
        vah: 102.0,
        val: 100.0,
        bin_width: 1.0,
        coverage: 0.7,
        populated_bins: 5,
        total_volume: 120.0,
        is_valid: true,
    }
}

fn bar(minute: i64, close: f64) -> MinuteFeatures {
    let ts_min = minute * MILLIS_PER_MINUTE;
    MinuteFeatures {
        ts_min,
        decision_ts: minute_close_ts(ts_min),
        bar: MinuteBar {
            ts_min,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
            vwap: Some(close),
            trade_count: 1,
            quote_close: None,
        },
        mid_close: close,
        sigma_240: 0.0,
        bin_width: 1.0,
        candidate_bin_width: 1.0,
        rebucketed: false,
        va: va(),
        order_flow: OrderFlowMetrics::default(),
        qimb_close: 0.0,
        qimb_avg: 0.0,
        spread_avg: 1.0,
        touched_val: false,
        touched_vah: false,
        window_minutes: 240,
    }
}

fn signal(
    minute: i64,
    direction: Direction,
    action: SignalAction,
    reference_price: f64,
    levels: (f64, f64, f64),
) -> SignalEvent {
    let ts_min = minute * MILLIS_PER_MINUTE;
    let (stop, tp1, tp2) = levels;
    SignalEvent {
        ts_min,
        decision_ts: minute_close_ts(ts_min),
        kind: SetupKind::BreakIn,
        direction,
        action,
        reference_price,
        stop,
        tp1,
        tp2,
        va: va(),
        order_flow: OrderFlowMetrics::default(),
        qimb: 0.0,
        confirmation: Confirmation {
            of_ok: true,
            qimb_ok: true,
            strict: false,
            confirmed: true,
        },
        reason: "test".to_string(),
    }
}

fn quote(ts_ms: i64, bid_px: f64, ask_px: f64) -> Quote {
    Quote {
        ts_ms,
        bid_px,
        bid_sz: 5.0,
        ask_px,
        ask_sz: 5.0,
    }
}

fn print(ts_ms: i64, price: f64) -> Trade {
    Trade {
        ts_ms,
        price,
        size: 1.0,
    }
}

/// Long 50 @ 101 with stop 97, TP1 103, TP2 105, filled at minute 1.
fn open_long(sim: &mut FillSimulator, enforcer: &mut InvariantEnforcer) {
    let entry = signal(0, Direction::Long, SignalAction::Enter, 101.0, (97.0, 103.0, 105.0));
    assert_eq!(sim.submit(&entry), SubmitOutcome::Submitted { qty: 50.0 });
    let closed = sim.on_quote(&quote(MILLIS_PER_MINUTE, 100.0, 101.0), enforcer).unwrap();
    assert!(closed.is_empty());
    let pos = sim.position().unwrap();
    assert_eq!(pos.direction, Direction::Long);
    assert!((pos.entry_price - 101.0).abs() < 1e-12);
    assert!((pos.qty - 50.0).abs() < 1e-12);
}

#[test]
fn test_flip_closes_then_reopens_as_two_trades() {
    let mut sim = FillSimulator::new(&config());
    let mut enforcer = InvariantEnforcer::new(InvariantConfig::default());
    open_long(&mut sim, &mut enforcer);
    let long_id = sim.position().unwrap().id;

    let outcome = sim.on_bar_close(&bar(1, 100.5));
    assert!(!outcome.exiting);

    let flip = signal(1, Direction::Short, SignalAction::Flip, 100.0, (104.0, 98.0, 96.0));
    assert_eq!(sim.submit(&flip), SubmitOutcome::Submitted { qty: 50.0 });
    assert_eq!(sim.pending_orders(), 2);

    let closed = sim
        .on_quote(&quote(2 * MILLIS_PER_MINUTE, 100.0, 101.0), &mut enforcer)
        .unwrap();
    assert_eq!(closed.len(), 1);
    let record = &closed[0];
    assert_eq!(record.id, long_id);
    assert_eq!(record.direction, Direction::Long);
    assert_eq!(record.exit_reason, ExitReason::SignalFlip);
    assert!((record.exit_price - 100.0).abs() < 1e-12);
    assert!((record.net_pnl + 50.0).abs() < 1e-9);
    assert_eq!(sim.trades().len(), 1);

    let fills = sim.fills();
    assert_eq!(fills.len(), 3);
    assert_eq!(fills[1].intent, FillIntent::Exit(ExitReason::SignalFlip));
    assert_eq!(fills[1].side, Side::Sell);
    assert_eq!(fills[2].intent, FillIntent::Entry);
    assert_eq!(fills[2].side, Side::Sell);
    assert_eq!(fills[1].ts_ms, fills[2].ts_ms);

    let short = sim.position().unwrap();
    assert_ne!(short.id, long_id);
    assert_eq!(short.direction, Direction::Short);
    assert!((short.entry_price - 100.0).abs() < 1e-12);
    assert!((short.qty - 50.0).abs() < 1e-12);
    assert!((sim.cash() - 9_950.0).abs() < 1e-9);
    assert_eq!(sim.pending_orders(), 0);
}

#[test]
fn test_same_direction_flip_does_not_exit() {
    let mut sim = FillSimulator::new(&config());
    let mut enforcer = InvariantEnforcer::new(InvariantConfig::default());
    open_long(&mut sim, &mut enforcer);

    let again = signal(1, Direction::Long, SignalAction::Flip, 101.0, (97.0, 103.0, 105.0));
    sim.submit(&again);
    assert_eq!(sim.pending_orders(), 1, "entry only, no flip exit");
    assert_eq!(sim.stats().orders_cancelled, 0);
    assert!(sim.trades().is_empty());
}

#[test]
fn test_tp1_moves_stop_to_breakeven_then_tp2_closes_rest() {
    let mut cfg = config();
    cfg.sizing.move_stop_to_breakeven = true;
    let mut sim = FillSimulator::new(&cfg);
    let mut enforcer = InvariantEnforcer::new(InvariantConfig::default());
    open_long(&mut sim, &mut enforcer);
    assert!((sim.position().unwrap().tp1_qty - 15.0).abs() < 1e-12);

    sim.on_trade(&print(MILLIS_PER_MINUTE + 1_000, 103.5));
    let outcome = sim.on_bar_close(&bar(1, 103.0));
    assert!(!outcome.exiting, "TP1 leg covers only part of the position");
    let pos = sim.position().unwrap();
    assert!(pos.tp1_done);
    assert!((pos.stop - 101.0).abs() < 1e-12);

    let closed = sim
        .on_quote(&quote(2 * MILLIS_PER_MINUTE, 103.0, 104.0), &mut enforcer)
        .unwrap();
    assert!(closed.is_empty());
    assert!((sim.position().unwrap().qty - 35.0).abs() < 1e-12);
    assert!((sim.cash() - 10_030.0).abs() < 1e-9);
    assert_eq!(
        sim.fills().last().map(|f| f.intent),
        Some(FillIntent::Exit(ExitReason::TakeProfit1))
    );

    sim.on_trade(&print(2 * MILLIS_PER_MINUTE + 1_000, 105.5));
    let outcome = sim.on_bar_close(&bar(2, 105.0));
    assert!(outcome.exiting);

    let closed = sim
        .on_quote(&quote(3 * MILLIS_PER_MINUTE, 105.0, 106.0), &mut enforcer)
        .unwrap();
    assert_eq!(closed.len(), 1);
    let record = &closed[0];
    assert_eq!(record.exit_reason, ExitReason::TakeProfit2);
    assert!((record.qty - 50.0).abs() < 1e-12);
    assert_eq!(record.partial_exits, 1);
    // 15 * (103 - 101) + 35 * (105 - 101)
    assert!((record.gross_pnl - 170.0).abs() < 1e-9);
    assert!((record.net_pnl - 170.0).abs() < 1e-9);
    assert!((record.exit_price - 104.4).abs() < 1e-9);
    assert!(sim.position().is_none());
    assert!((sim.cash() - 10_170.0).abs() < 1e-9);
}

#[test]
fn test_breakeven_stop_after_tp1_exits_flat() {
    let mut cfg = config();
    cfg.sizing.move_stop_to_breakeven = true;
    let mut sim = FillSimulator::new(&cfg);
    let mut enforcer = InvariantEnforcer::new(InvariantConfig::default());
    open_long(&mut sim, &mut enforcer);

    sim.on_trade(&print(MILLIS_PER_MINUTE + 1_000, 103.0));
    sim.on_bar_close(&bar(1, 103.0));
    sim.on_quote(&quote(2 * MILLIS_PER_MINUTE, 103.0, 104.0), &mut enforcer)
        .unwrap();

    // Above the original 97 stop, at the moved one.
    sim.on_trade(&print(2 * MILLIS_PER_MINUTE + 1_000, 101.0));
    let outcome = sim.on_bar_close(&bar(2, 101.0));
    assert!(outcome.exiting);
    let closed = sim
        .on_quote(&quote(3 * MILLIS_PER_MINUTE, 101.0, 102.0), &mut enforcer)
        .unwrap();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].exit_reason, ExitReason::StopLoss);
    assert!((closed[0].net_pnl - 30.0).abs() < 1e-9);
}

#[test]
fn test_funding_charged_at_each_interval_boundary() {
    let mut cfg = config();
    cfg.backtest.funding_rate_8h_bps = 1.0;
    cfg.backtest.funding_interval_hours = 8;
    cfg.risk.max_hold_minutes = 2_000;
    let mut sim = FillSimulator::new(&cfg);
    let mut enforcer = InvariantEnforcer::new(InvariantConfig::default());
    open_long(&mut sim, &mut enforcer);

    // Entry at minute 1; the first boundary falls inside minute 481.
    sim.on_bar_close(&bar(480, 100.0));
    assert_eq!(sim.stats().funding_charges, 0);
    assert!((sim.cash() - 10_000.0).abs() < 1e-12);

    sim.on_bar_close(&bar(481, 100.0));
    assert_eq!(sim.stats().funding_charges, 1);
    // 50 * 100 * 1bp
    assert!((sim.cash() - 9_999.5).abs() < 1e-9);
    assert!((sim.position().unwrap().funding - 0.5).abs() < 1e-12);

    sim.on_bar_close(&bar(482, 100.0));
    assert_eq!(sim.stats().funding_charges, 1, "one charge per boundary");

    sim.on_bar_close(&bar(960, 102.0));
    assert_eq!(sim.stats().funding_charges, 1);
    sim.on_bar_close(&bar(961, 102.0));
    assert_eq!(sim.stats().funding_charges, 2);

    sim.on_trade(&print(962 * MILLIS_PER_MINUTE + 1_000, 96.0));
    assert!(sim.on_bar_close(&bar(962, 96.5)).exiting);
    let closed = sim
        .on_quote(&quote(963 * MILLIS_PER_MINUTE, 96.0, 97.0), &mut enforcer)
        .unwrap();
    assert_eq!(closed.len(), 1);
    let record = &closed[0];
    assert_eq!(record.exit_reason, ExitReason::StopLoss);
    assert!((record.funding - 1.01).abs() < 1e-9);
    assert!((record.gross_pnl + 250.0).abs() < 1e-9);
    assert!((record.net_pnl + 251.01).abs() < 1e-9);

    let report = sim.into_report(None);
    assert!((report.total_funding - 1.01).abs() < 1e-9);
    assert_eq!(report.stats.funding_charges, 2);
    assert!((report.cash - 9_748.99).abs() < 1e-9);
}

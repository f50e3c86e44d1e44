//! Integration tests for the backtest and sweep entry points.
//!
//! Fixtures are written to a temp dir: a TOML config and a JSONL event file
//! describing a break-in long that stops out two minutes later.

use auction_trader::auction::feed::write_jsonl;
use auction_trader::auction::{
    load_jsonl, run_feed, run_sweep, ExitReason, MarketEvent, PerformanceMetrics, Quote,
    RunFingerprint, SweepGrid, Trade, TraderConfig, TraderError,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const MINUTE: i64 = 60_000;

const SCENARIO_TOML: &str = r#"
[instrument]
symbol = "TESTUSDT"
tick_size = 1.0
qty_step = 1.0

[value_area]
min_va_bins = 3

[order_flow]
use_tick_rule_fallback = false

[signal]
accept_outside_k = 10

[sizing]
move_stop_to_breakeven = false

[execution]
use_limit_for_entry = false
slippage_ticks_entry = 0
slippage_ticks_exit = 0
taker_fee_bps = 0.0
maker_fee_bps = 0.0

[backtest]
funding_rate_8h_bps = 0.0
"#;

fn quote(ts_ms: i64, bid_px: f64, ask_px: f64) -> MarketEvent {
    MarketEvent::Quote(Quote {
        ts_ms,
        bid_px,
        bid_sz: 5.0,
        ask_px,
        ask_sz: 5.0,
    })
}

fn trade(ts_ms: i64, price: f64, size: f64) -> MarketEvent {
    MarketEvent::Trade(Trade { ts_ms, price, size })
}

/// Ten minutes of balanced trade around 100-102, a dip to 99 that closes
/// at 101, then a print at 96 through the stop.
fn scenario_events() -> Vec<MarketEvent> {
    let mut events = Vec::new();
    for m in 0..10 {
        let base = m * MINUTE;
        events.push(quote(base, 90.0, 110.0));
        let prints = [(99.0, 1.0), (100.0, 3.0), (102.0, 3.0), (103.0, 1.0), (101.0, 4.0)];
        for (j, (price, size)) in prints.into_iter().enumerate() {
            events.push(trade(base + 1_000 * (j as i64 + 1), price, size));
        }
    }
    events.push(quote(10 * MINUTE, 100.0, 101.0));
    events.push(trade(10 * MINUTE + 100, 99.0, 0.5));
    events.push(trade(10 * MINUTE + 200, 101.0, 2.0));
    events.push(quote(11 * MINUTE + 100, 100.0, 101.0));
    events.push(trade(11 * MINUTE + 200, 96.0, 1.0));
    events.push(quote(12 * MINUTE + 100, 100.0, 101.0));
    events
}

struct Fixture {
    _dir: TempDir,
    config: PathBuf,
    data: PathBuf,
}

fn write_fixture(config_toml: &str, events: &[MarketEvent]) -> Fixture {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("auction.toml");
    fs::write(&config, config_toml).unwrap();

    let data = dir.path().join("events.jsonl");
    let file = fs::File::create(&data).unwrap();
    write_jsonl(file, events).unwrap();

    Fixture {
        _dir: dir,
        config,
        data,
    }
}

fn run_file(config: &Path, data: &Path) -> Result<auction_trader::auction::RunOutput, TraderError> {
    let config = TraderConfig::load(config)?;
    let mut feed = load_jsonl(data)?;
    run_feed(&config, &mut feed)
}

#[test]
fn test_file_backtest_round_trip() {
    let fx = write_fixture(SCENARIO_TOML, &scenario_events());
    let output = run_file(&fx.config, &fx.data).unwrap();

    assert_eq!(output.signals.len(), 1);
    assert_eq!(output.fills.len(), 2);
    assert_eq!(output.trades.len(), 1);
    assert_eq!(output.trades[0].exit_reason, ExitReason::StopLoss);
    assert!((output.net_pnl() + 50.0).abs() < 1e-9);
    assert!(output.open_position.is_none());
    assert_eq!(output.late_events, 0);

    let metrics = PerformanceMetrics::compute(&output.trades, &output.equity_curve);
    assert_eq!(metrics.total_trades, 1);
    assert_eq!(metrics.losses, 1);
    assert!((metrics.total_pnl + 50.0).abs() < 1e-9);
    assert!(metrics.max_drawdown >= 50.0 - 1e-9);
}

#[test]
fn test_fingerprint_stable_across_runs() {
    let fx = write_fixture(SCENARIO_TOML, &scenario_events());
    let config = TraderConfig::load(&fx.config).unwrap();

    let a = run_file(&fx.config, &fx.data).unwrap();
    let b = run_file(&fx.config, &fx.data).unwrap();
    let fp_a = RunFingerprint::compute(&config, &a).unwrap();
    let fp_b = RunFingerprint::compute(&config, &b).unwrap();
    assert_eq!(fp_a, fp_b);
    assert_eq!(fp_a.hash.len(), 64);
}

#[test]
fn test_shuffled_file_replays_identically() {
    let events = scenario_events();
    let mut shuffled = events.clone();
    shuffled.reverse();

    let ordered = write_fixture(SCENARIO_TOML, &events);
    let reversed = write_fixture(SCENARIO_TOML, &shuffled);
    assert_eq!(
        run_file(&ordered.config, &ordered.data).unwrap(),
        run_file(&reversed.config, &reversed.data).unwrap()
    );
}

#[test]
fn test_invalid_config_rejected_with_exit_code_2() {
    let bad = SCENARIO_TOML.replace(
        "move_stop_to_breakeven = false",
        "move_stop_to_breakeven = false\ntp1_pct = 0.5\ntp2_pct = 0.6",
    );
    let fx = write_fixture(&bad, &scenario_events());
    let err = TraderConfig::load(&fx.config).unwrap_err();
    assert!(matches!(err, TraderError::Config(_)));
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn test_malformed_line_reports_line_number() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("bad.jsonl");
    fs::write(
        &data,
        "# header\n{\"type\":\"quote\",\"ts_ms\":0,\"bid_px\":1.0,\"bid_sz\":1.0,\"ask_px\":2.0,\"ask_sz\":1.0}\n\n{\"type\":\"trade\",\"ts_ms\":5}\n",
    )
    .unwrap();

    let err = load_jsonl(&data).unwrap_err();
    assert_eq!(err.exit_code(), 3);
    assert!(err.to_string().contains("line 4"));
}

#[test]
fn test_sweep_over_file_keeps_grid_order() {
    let fx = write_fixture(SCENARIO_TOML, &scenario_events());
    let base = TraderConfig::load(&fx.config).unwrap();
    let feed = load_jsonl(&fx.data).unwrap();
    let grid = SweepGrid {
        alpha_bin: vec![],
        accept_k: vec![10, 20],
        va_fraction: vec![0.7, 1.5],
    };

    let results = run_sweep(&base, feed.events(), &grid, Some(2)).unwrap();
    assert_eq!(results.len(), 4);
    assert_eq!(results[0].point.accept_k, 10);
    assert_eq!(results[1].point.va_fraction, 1.5);
    assert!(results[1].error.is_some());
    assert_eq!(results[2].point.accept_k, 20);
    assert!(results[0].error.is_none());
    assert!((results[0].net_pnl + 50.0).abs() < 1e-9);
    assert!(results[0].fingerprint.is_some());
}

#[test]
fn test_backtest_run_binary_exit_codes() {
    let fx = write_fixture(SCENARIO_TOML, &scenario_events());
    let out = fx.data.with_file_name("results.json");

    let status = Command::new(env!("CARGO_BIN_EXE_backtest_run"))
        .arg("--data")
        .arg(&fx.data)
        .arg("--config")
        .arg(&fx.config)
        .arg("--output")
        .arg(&out)
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(0));

    let report: serde_json::Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(report["symbol"], "TESTUSDT");
    assert_eq!(report["metrics"]["total_trades"], 1);
    assert!(report["fingerprint"]["hash"].as_str().is_some());

    let bad = fx.config.with_file_name("bad.toml");
    fs::write(&bad, "[instrument]\ntick_size = 0.0\n").unwrap();
    let status = Command::new(env!("CARGO_BIN_EXE_backtest_run"))
        .arg("--data")
        .arg(&fx.data)
        .arg("--config")
        .arg(&bad)
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(2));
}

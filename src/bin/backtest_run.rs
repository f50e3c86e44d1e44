//! Backtest Runner CLI
//!
//! Replays a JSONL file of quotes and trades through the auction engine and
//! reports performance plus a run fingerprint.
//!
//! # Usage
//!
//! ```bash
//! cargo run --release --bin backtest_run -- \
//!   --data ./data/btcusdt_2026-01-24.jsonl \
//!   --config ./auction.toml \
//!   --output results.json
//! ```
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 2: Configuration error
//! - 3: Runtime error (data, I/O, serialization)
//! - 4: Invariant abort (run is void)

use anyhow::{Context, Result};
use auction_trader::auction::{
    load_jsonl, MarketDataFeed, PerformanceMetrics, ReplayEngine, RunFingerprint, RunOutput,
    TraderConfig, TraderError,
};
use clap::Parser;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

// =============================================================================
// CLI ARGUMENTS
// =============================================================================

/// Deterministic replay of the auction trading core
#[derive(Parser, Debug)]
#[command(name = "backtest_run")]
#[command(about = "Replay recorded quotes and trades through the value-area engine")]
struct Cli {
    /// JSONL file of `{"type":"quote"|"trade", ...}` events
    #[arg(short, long)]
    data: PathBuf,

    /// TOML config (defaults when omitted)
    #[arg(short, long, env = "AUCTION_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Write the full JSON report here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Override entry and exit slippage, in ticks
    #[arg(long)]
    slippage_ticks: Option<u32>,

    /// Include per-minute feature snapshots in the JSON report
    #[arg(long)]
    feature_log: bool,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

// =============================================================================
// OUTPUT
// =============================================================================

#[derive(Debug, Serialize)]
struct BacktestRunOutput {
    data_path: String,
    symbol: String,
    fingerprint: RunFingerprint,
    metrics: PerformanceMetrics,
    net_pnl: f64,
    results: RunOutput,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = execute(&cli) {
        let code = e
            .downcast_ref::<TraderError>()
            .map(TraderError::exit_code)
            .unwrap_or(3);
        eprintln!("Error: {:#}", e);
        std::process::exit(code);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn execute(cli: &Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => TraderConfig::load(path)?,
        None => TraderConfig::default(),
    };
    if let Some(ticks) = cli.slippage_ticks {
        config.execution.slippage_ticks_entry = ticks;
        config.execution.slippage_ticks_exit = ticks;
    }

    let mut feed = load_jsonl(&cli.data)?;
    info!(
        symbol = %config.instrument.symbol,
        feed = feed.name(),
        events = feed.len(),
        "Running backtest"
    );

    let mut engine = ReplayEngine::new(&config)?;
    if cli.feature_log {
        engine = engine.with_feature_log();
    }
    while let Some(event) = feed.next_event() {
        engine.process_event(&event)?;
    }
    let results = engine.finish()?;

    let fingerprint = RunFingerprint::compute(&config, &results)?;
    let metrics = PerformanceMetrics::compute(&results.trades, &results.equity_curve);
    print_summary(&results, &metrics, &fingerprint);

    let output = BacktestRunOutput {
        data_path: cli.data.display().to_string(),
        symbol: config.instrument.symbol.clone(),
        fingerprint,
        metrics,
        net_pnl: results.net_pnl(),
        results,
    };
    let json = serde_json::to_string_pretty(&output).map_err(TraderError::from)?;

    match &cli.output {
        Some(path) => {
            write_output_atomic(path, &json)
                .with_context(|| format!("writing {}", path.display()))?;
            info!("Results written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn write_output_atomic(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).context("Failed to create directory")?;
    }

    // Write to temp file then rename (atomic on POSIX)
    let temp_path = path.with_extension("tmp");
    let file = File::create(&temp_path).context("Failed to create temp file")?;
    let mut writer = BufWriter::new(file);
    writer.write_all(content.as_bytes()).context("Failed to write")?;
    writer.flush().context("Failed to flush")?;
    drop(writer);

    fs::rename(&temp_path, path).context("Failed to rename")?;
    Ok(())
}

fn print_summary(results: &RunOutput, metrics: &PerformanceMetrics, fingerprint: &RunFingerprint) {
    eprintln!("\n{}", "=".repeat(70));
    eprintln!("BACKTEST SUMMARY");
    eprintln!("{}", "=".repeat(70));
    eprintln!("Events Processed:   {}", results.events);
    eprintln!("Late Events:        {}", results.late_events);
    eprintln!("Minutes Closed:     {}", results.minutes);
    eprintln!("Signals:            {}", results.signals.len());
    eprintln!("Fills:              {}", results.fills.len());
    eprintln!("Closed Trades:      {}", metrics.total_trades);
    eprintln!("Win Rate:           {:.1}%", metrics.win_rate * 100.0);
    eprintln!("Net PnL:            ${:.2}", results.net_pnl());
    eprintln!("Final Equity:       ${:.2}", results.final_equity);
    eprintln!("Total Fees:         ${:.2}", results.total_fees);
    eprintln!("Total Funding:      ${:.2}", results.total_funding);
    eprintln!(
        "Max Drawdown:       ${:.2} ({:.2}%)",
        metrics.max_drawdown,
        metrics.max_drawdown_pct * 100.0
    );
    eprintln!("Sharpe / Sortino:   {:.3} / {:.3}", metrics.sharpe, metrics.sortino);
    if let Some(position) = &results.open_position {
        eprintln!(
            "Open Position:      {:?} {} @ {:.2}",
            position.direction, position.qty, position.entry_price
        );
    }
    eprintln!("{}", "-".repeat(70));
    eprintln!(
        "Alignment:          {} trades, {} ambiguous, {} unresolved, {} coalesced",
        results.alignment.total_trades,
        results.alignment.ambiguous_trades,
        results.alignment.unresolved_trades,
        results.alignment.coalesced_prints
    );
    eprintln!(
        "Invariant Checks:   {} violations",
        results.invariant_counters.total_violations
    );
    eprintln!("Fingerprint:        {}", fingerprint);
    eprintln!("{}", "=".repeat(70));
}

//! Parameter Sweep CLI
//!
//! Runs the replay once per point of an `alpha_bin x accept_k x va_fraction`
//! grid, in parallel, and writes one JSON row per point.
//!
//! # Usage
//!
//! ```bash
//! cargo run --release --bin param_sweep -- \
//!   --data ./data/btcusdt_2026-01-24.jsonl \
//!   --alpha-bin 0.05,0.1,0.2 \
//!   --accept-k 2,3,4 \
//!   --va-fraction 0.68,0.7 \
//!   --workers 8 \
//!   --output sweep.json
//! ```

use anyhow::{Context, Result};
use auction_trader::auction::{
    load_jsonl, run_sweep, SweepGrid, SweepResult, TraderConfig, TraderError,
};
use clap::Parser;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Parallel parameter sweep over the value-area engine
#[derive(Parser, Debug)]
#[command(name = "param_sweep")]
#[command(about = "Grid-search alpha_bin, accept_k and va_fraction over one dataset")]
struct Cli {
    /// JSONL file of quote and trade events
    #[arg(short, long)]
    data: PathBuf,

    /// Base TOML config; grid values override it per point
    #[arg(short, long, env = "AUCTION_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Worker threads (default: config value, else half the cores)
    #[arg(short, long)]
    workers: Option<usize>,

    #[arg(long, value_delimiter = ',')]
    alpha_bin: Vec<f64>,

    #[arg(long, value_delimiter = ',')]
    accept_k: Vec<u32>,

    #[arg(long, value_delimiter = ',')]
    va_fraction: Vec<f64>,

    /// JSON table destination (stdout if not specified)
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Serialize)]
struct SweepTable {
    data_path: String,
    points: usize,
    failed: usize,
    /// Index into `results` of the highest net P&L among successful points.
    best: Option<usize>,
    results: Vec<SweepResult>,
}

fn main() {
    let cli = Cli::parse();
    let default = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = execute(&cli) {
        let code = e
            .downcast_ref::<TraderError>()
            .map(TraderError::exit_code)
            .unwrap_or(3);
        eprintln!("Error: {:#}", e);
        std::process::exit(code);
    }
}

fn execute(cli: &Cli) -> Result<()> {
    let base = match &cli.config {
        Some(path) => TraderConfig::load(path)?,
        None => TraderConfig::default(),
    };
    let grid = SweepGrid {
        alpha_bin: cli.alpha_bin.clone(),
        accept_k: cli.accept_k.clone(),
        va_fraction: cli.va_fraction.clone(),
    };
    let workers = cli.workers.or(Some(base.backtest.workers));

    let feed = load_jsonl(&cli.data)?;
    let results = run_sweep(&base, feed.events(), &grid, workers)?;

    let failed = results.iter().filter(|r| r.error.is_some()).count();
    let best = results
        .iter()
        .enumerate()
        .filter(|(_, r)| r.error.is_none())
        .max_by(|(_, a), (_, b)| a.net_pnl.total_cmp(&b.net_pnl))
        .map(|(i, _)| i);

    print_table(&results, best);

    let table = SweepTable {
        data_path: cli.data.display().to_string(),
        points: results.len(),
        failed,
        best,
        results,
    };
    let json = serde_json::to_string_pretty(&table).map_err(TraderError::from)?;
    match &cli.output {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
            info!("Sweep table written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn print_table(results: &[SweepResult], best: Option<usize>) {
    eprintln!(
        "\n{:>10} {:>8} {:>11} {:>8} {:>7} {:>12} {:>10}",
        "alpha_bin", "accept_k", "va_fraction", "signals", "trades", "net_pnl", "max_dd%"
    );
    eprintln!("{}", "-".repeat(72));
    for (i, r) in results.iter().enumerate() {
        let marker = if Some(i) == best { " *" } else { "" };
        match (&r.error, &r.metrics) {
            (Some(err), _) => eprintln!(
                "{:>10.4} {:>8} {:>11.3}  failed: {}",
                r.point.alpha_bin, r.point.accept_k, r.point.va_fraction, err
            ),
            (None, Some(m)) => eprintln!(
                "{:>10.4} {:>8} {:>11.3} {:>8} {:>7} {:>12.2} {:>9.2}%{}",
                r.point.alpha_bin,
                r.point.accept_k,
                r.point.va_fraction,
                r.signals,
                m.total_trades,
                r.net_pnl,
                m.max_drawdown_pct * 100.0,
                marker
            ),
            (None, None) => {}
        }
    }
}

//! Parameter Sweeps
//!
//! Runs one independent replay per parameter set on a dedicated rayon pool.
//! Input events are sorted once and shared read-only; results come back in
//! grid order regardless of which worker finished first.

use crate::auction::config::TraderConfig;
use crate::auction::error::{TraderError, TraderResult};
use crate::auction::events::{sort_events, MarketEvent};
use crate::auction::fingerprint::RunFingerprint;
use crate::auction::metrics::PerformanceMetrics;
use crate::auction::replay::run_sorted;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

/// One point of the grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepPoint {
    pub alpha_bin: f64,
    pub accept_k: u32,
    pub va_fraction: f64,
}

impl SweepPoint {
    pub fn apply(&self, base: &TraderConfig) -> TraderConfig {
        let mut config = base.clone();
        config.value_area.alpha_bin = self.alpha_bin;
        config.signal.accept_outside_k = self.accept_k;
        config.value_area.va_fraction = self.va_fraction;
        config
    }
}

/// Cartesian grid. An empty axis takes the base config's value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepGrid {
    pub alpha_bin: Vec<f64>,
    pub accept_k: Vec<u32>,
    pub va_fraction: Vec<f64>,
}

impl SweepGrid {
    /// Points in `alpha_bin`, then `accept_k`, then `va_fraction` order.
    pub fn points(&self, base: &TraderConfig) -> Vec<SweepPoint> {
        let or_base = |axis: &[f64], v: f64| if axis.is_empty() { vec![v] } else { axis.to_vec() };
        let alphas = or_base(&self.alpha_bin, base.value_area.alpha_bin);
        let fractions = or_base(&self.va_fraction, base.value_area.va_fraction);
        let ks = if self.accept_k.is_empty() {
            vec![base.signal.accept_outside_k]
        } else {
            self.accept_k.clone()
        };

        let mut points = Vec::with_capacity(alphas.len() * ks.len() * fractions.len());
        for &alpha_bin in &alphas {
            for &accept_k in &ks {
                for &va_fraction in &fractions {
                    points.push(SweepPoint {
                        alpha_bin,
                        accept_k,
                        va_fraction,
                    });
                }
            }
        }
        points
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepResult {
    pub point: SweepPoint,
    /// Set when the point's config was rejected or the run aborted.
    pub error: Option<String>,
    pub net_pnl: f64,
    pub signals: usize,
    pub metrics: Option<PerformanceMetrics>,
    pub fingerprint: Option<String>,
}

/// Default worker count: half the available cores, at least one.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() / 2)
        .unwrap_or(1)
        .max(1)
}

pub fn run_sweep(
    base: &TraderConfig,
    events: &[MarketEvent],
    grid: &SweepGrid,
    workers: Option<usize>,
) -> TraderResult<Vec<SweepResult>> {
    let workers = workers.filter(|w| *w > 0).unwrap_or_else(default_workers);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| TraderError::Io(std::io::Error::other(e)))?;

    let mut sorted = events.to_vec();
    sort_events(&mut sorted);
    let points = grid.points(base);
    let total = points.len();
    let completed = AtomicUsize::new(0);
    info!(points = total, workers, events = sorted.len(), "Starting parameter sweep");

    let results = pool.install(|| {
        points
            .par_iter()
            .map(|point| {
                let result = evaluate(base, point, &sorted);
                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                info!(
                    done,
                    total,
                    alpha_bin = point.alpha_bin,
                    accept_k = point.accept_k,
                    va_fraction = point.va_fraction,
                    "Sweep point finished"
                );
                result
            })
            .collect::<Vec<_>>()
    });
    Ok(results)
}

fn evaluate(base: &TraderConfig, point: &SweepPoint, events: &[MarketEvent]) -> SweepResult {
    let config = point.apply(base);
    let outcome = run_sorted(&config, events).and_then(|output| {
        let fingerprint = RunFingerprint::compute(&config, &output)?;
        Ok((output, fingerprint))
    });
    match outcome {
        Ok((output, fingerprint)) => SweepResult {
            point: *point,
            error: None,
            net_pnl: output.net_pnl(),
            signals: output.signals.len(),
            metrics: Some(PerformanceMetrics::compute(&output.trades, &output.equity_curve)),
            fingerprint: Some(fingerprint.hash),
        },
        Err(e) => {
            warn!(?point, error = %e, "Sweep point failed");
            SweepResult {
                point: *point,
                error: Some(e.to_string()),
                net_pnl: 0.0,
                signals: 0,
                metrics: None,
                fingerprint: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::events::{Quote, Trade};

    fn events() -> Vec<MarketEvent> {
        let mut out = Vec::new();
        for m in 0..30i64 {
            let base = m * 60_000;
            out.push(MarketEvent::Quote(Quote { ts_ms: base, bid_px: 99.9, bid_sz: 1.0, ask_px: 100.1, ask_sz: 1.0 }));
            for j in 0..5i64 {
                let price = 100.0 + ((m + j) % 5) as f64 * 0.1 - 0.2;
                out.push(MarketEvent::Trade(Trade { ts_ms: base + 1_000 * (j + 1), price, size: 1.0 }));
            }
        }
        out
    }

    #[test]
    fn test_grid_order() {
        let grid = SweepGrid {
            alpha_bin: vec![0.2, 0.3],
            accept_k: vec![2, 3],
            va_fraction: vec![],
        };
        let points = grid.points(&TraderConfig::default());
        assert_eq!(points.len(), 4);
        assert_eq!((points[0].alpha_bin, points[0].accept_k), (0.2, 2));
        assert_eq!((points[1].alpha_bin, points[1].accept_k), (0.2, 3));
        assert_eq!((points[3].alpha_bin, points[3].accept_k), (0.3, 3));
        assert!(points.iter().all(|p| p.va_fraction == TraderConfig::default().value_area.va_fraction));
    }

    #[test]
    fn test_default_workers_at_least_one() {
        assert!(default_workers() >= 1);
    }

    #[test]
    fn test_sweep_matches_sequential_runs() {
        let base = TraderConfig::default();
        let grid = SweepGrid {
            alpha_bin: vec![0.25],
            accept_k: vec![2, 3, 4],
            va_fraction: vec![0.7],
        };
        let events = events();
        let results = run_sweep(&base, &events, &grid, Some(2)).unwrap();
        assert_eq!(results.len(), 3);

        for (result, point) in results.iter().zip(grid.points(&base)) {
            assert_eq!(result.point, point);
            assert!(result.error.is_none());
            let config = point.apply(&base);
            let output = crate::auction::replay::run(&config, &events).unwrap();
            let expected = RunFingerprint::compute(&config, &output).unwrap();
            assert_eq!(result.fingerprint.as_deref(), Some(expected.hash.as_str()));
        }
    }

    #[test]
    fn test_rejected_point_reports_error() {
        let grid = SweepGrid {
            alpha_bin: vec![],
            accept_k: vec![0],
            va_fraction: vec![],
        };
        let results = run_sweep(&TraderConfig::default(), &events(), &grid, Some(1)).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].error.as_deref().unwrap_or("").contains("accept_outside_k"));
    }
}

//! Performance Metrics
//!
//! Summary statistics over the closed trades and the bar-close equity curve
//! of one run.

use crate::auction::position::TradeRecord;
use crate::auction::simulator::EquityPoint;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    /// `gross_profit / |gross_loss|`; infinite with no losing trades.
    pub profit_factor: f64,
    pub total_pnl: f64,
    pub avg_pnl: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub total_fees: f64,
    pub total_funding: f64,
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    /// Mean / std of per-trade net P&L (not annualized).
    pub sharpe: f64,
    pub sortino: f64,
    pub max_consecutive_wins: usize,
    pub max_consecutive_losses: usize,
    pub avg_hold_minutes: f64,
}

impl PerformanceMetrics {
    pub fn compute(trades: &[TradeRecord], equity: &[EquityPoint]) -> Self {
        let mut m = Self::default();
        let (max_drawdown, max_drawdown_pct) = max_drawdown(equity);
        m.max_drawdown = max_drawdown;
        m.max_drawdown_pct = max_drawdown_pct;
        if trades.is_empty() {
            return m;
        }

        let pnls: Vec<f64> = trades.iter().map(|t| t.net_pnl).collect();
        m.total_trades = trades.len();
        m.wins = trades.iter().filter(|t| t.is_win()).count();
        m.losses = m.total_trades - m.wins;
        m.win_rate = m.wins as f64 / m.total_trades as f64;

        m.gross_profit = pnls.iter().filter(|p| **p > 0.0).sum();
        m.gross_loss = pnls.iter().filter(|p| **p <= 0.0).sum();
        m.profit_factor = if m.gross_loss < 0.0 {
            m.gross_profit / m.gross_loss.abs()
        } else if m.gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        m.total_pnl = pnls.iter().sum();
        m.avg_pnl = m.total_pnl / m.total_trades as f64;
        if m.wins > 0 {
            m.avg_win = m.gross_profit / m.wins as f64;
        }
        if m.losses > 0 {
            m.avg_loss = m.gross_loss / m.losses as f64;
        }
        m.total_fees = trades.iter().map(|t| t.fees).sum();
        m.total_funding = trades.iter().map(|t| t.funding).sum();

        m.sharpe = sharpe(&pnls);
        m.sortino = sortino(&pnls);
        let (wins, losses) = streaks(trades);
        m.max_consecutive_wins = wins;
        m.max_consecutive_losses = losses;
        m.avg_hold_minutes = trades.iter().map(|t| t.hold_minutes).mean();
        m
    }

    pub fn summary(&self) -> String {
        format!(
            "trades={} win_rate={:.1}% pnl={:.2} pf={:.2} max_dd={:.2} ({:.2}%) sharpe={:.3} sortino={:.3} fees={:.2} funding={:.2}",
            self.total_trades,
            self.win_rate * 100.0,
            self.total_pnl,
            self.profit_factor,
            self.max_drawdown,
            self.max_drawdown_pct * 100.0,
            self.sharpe,
            self.sortino,
            self.total_fees,
            self.total_funding,
        )
    }
}

/// Largest peak-to-trough fall, absolute and as a fraction of the peak.
pub fn max_drawdown(equity: &[EquityPoint]) -> (f64, f64) {
    let mut peak = f64::NEG_INFINITY;
    let mut max_abs = 0.0f64;
    let mut max_pct = 0.0f64;
    for point in equity {
        peak = peak.max(point.equity);
        let dd = peak - point.equity;
        max_abs = max_abs.max(dd);
        if peak > 0.0 {
            max_pct = max_pct.max(dd / peak);
        }
    }
    (max_abs, max_pct)
}

fn sharpe(pnls: &[f64]) -> f64 {
    if pnls.len() < 2 {
        return 0.0;
    }
    let std = pnls.iter().std_dev();
    if std > 0.0 {
        pnls.iter().mean() / std
    } else {
        0.0
    }
}

/// Downside deviation uses a zero target over all trades.
fn sortino(pnls: &[f64]) -> f64 {
    if pnls.len() < 2 {
        return 0.0;
    }
    let downside = (pnls.iter().map(|p| p.min(0.0).powi(2)).sum::<f64>() / pnls.len() as f64).sqrt();
    if downside > 0.0 {
        pnls.iter().mean() / downside
    } else {
        0.0
    }
}

fn streaks(trades: &[TradeRecord]) -> (usize, usize) {
    let (mut best_w, mut best_l, mut w, mut l) = (0, 0, 0, 0);
    for t in trades {
        if t.is_win() {
            w += 1;
            l = 0;
        } else {
            l += 1;
            w = 0;
        }
        best_w = best_w.max(w);
        best_l = best_l.max(l);
    }
    (best_w, best_l)
}

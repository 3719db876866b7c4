//! Performance metrics: pure functions over an equity curve.
//!
//! Every metric takes the curve (one total-value sample per processed
//! timestamp) and the number of samples per year derived from the data
//! interval. No dependencies on the engine or the recorder.

use serde::{Deserialize, Serialize};

const SECONDS_PER_YEAR: f64 = 365.0 * 86_400.0;

/// Aggregate performance metrics for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub initial_value: f64,
    pub final_value: f64,
    pub total_return: f64,
    pub cagr: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub calmar: f64,
    pub max_drawdown: f64,
    pub periods: usize,
    pub fill_count: usize,
    pub total_fees: f64,
    pub realized_pnl: f64,
}

impl PerformanceMetrics {
    /// Compute the curve-based metrics. Fill counts, fees and realised PnL
    /// are filled in by the recorder.
    pub fn compute(equity_curve: &[f64], interval_secs: u64, risk_free_rate: f64) -> Self {
        let ppy = periods_per_year(interval_secs);
        Self {
            initial_value: equity_curve.first().copied().unwrap_or_default(),
            final_value: equity_curve.last().copied().unwrap_or_default(),
            total_return: total_return(equity_curve),
            cagr: cagr(equity_curve, ppy),
            sharpe: sharpe_ratio(equity_curve, risk_free_rate, ppy),
            sortino: sortino_ratio(equity_curve, risk_free_rate, ppy),
            calmar: calmar_ratio(equity_curve, ppy),
            max_drawdown: max_drawdown(equity_curve),
            periods: equity_curve.len(),
            ..Self::default()
        }
    }
}

/// Samples per year for a given data interval. A zero interval is treated
/// as daily.
pub fn periods_per_year(interval_secs: u64) -> f64 {
    if interval_secs == 0 {
        return 365.0;
    }
    SECONDS_PER_YEAR / interval_secs as f64
}

// ─── Individual metric functions ────────────────────────────────────

/// Total return as a fraction: (final - initial) / initial.
pub fn total_return(equity_curve: &[f64]) -> f64 {
    let (Some(&initial), Some(&final_eq)) = (equity_curve.first(), equity_curve.last()) else {
        return 0.0;
    };
    if equity_curve.len() < 2 || initial <= 0.0 {
        return 0.0;
    }
    (final_eq - initial) / initial
}

/// Compound annual growth rate.
///
/// Returns 0.0 for fewer than two samples or a non-positive endpoint.
pub fn cagr(equity_curve: &[f64], periods_per_year: f64) -> f64 {
    let (Some(&initial), Some(&final_eq)) = (equity_curve.first(), equity_curve.last()) else {
        return 0.0;
    };
    if equity_curve.len() < 2 || initial <= 0.0 || final_eq <= 0.0 || periods_per_year <= 0.0 {
        return 0.0;
    }
    let years = (equity_curve.len() - 1) as f64 / periods_per_year;
    if years <= 0.0 {
        return 0.0;
    }
    (final_eq / initial).powf(1.0 / years) - 1.0
}

/// Annualised Sharpe ratio.
///
/// Sharpe = mean(period returns - rf) / std(period returns) * sqrt(ppy).
/// Returns 0.0 if variance is zero or there are fewer than 2 returns.
pub fn sharpe_ratio(equity_curve: &[f64], risk_free_rate: f64, periods_per_year: f64) -> f64 {
    let returns = period_returns(equity_curve);
    if returns.len() < 2 || periods_per_year <= 0.0 {
        return 0.0;
    }
    let period_rf = risk_free_rate / periods_per_year;
    let excess: Vec<f64> = returns.iter().map(|r| r - period_rf).collect();
    let mean = mean_f64(&excess);
    let std = std_dev(&excess);
    if std < 1e-15 {
        return 0.0;
    }
    (mean / std) * periods_per_year.sqrt()
}

/// Annualised Sortino ratio (downside deviation only).
///
/// Returns 0.0 if there is no downside or fewer than 2 returns.
pub fn sortino_ratio(equity_curve: &[f64], risk_free_rate: f64, periods_per_year: f64) -> f64 {
    let returns = period_returns(equity_curve);
    if returns.len() < 2 || periods_per_year <= 0.0 {
        return 0.0;
    }
    let period_rf = risk_free_rate / periods_per_year;
    let excess: Vec<f64> = returns.iter().map(|r| r - period_rf).collect();
    let mean = mean_f64(&excess);

    let downside_sq: f64 = excess.iter().filter(|&&r| r < 0.0).map(|r| r * r).sum();
    if downside_sq == 0.0 {
        return 0.0;
    }
    let downside_std = (downside_sq / returns.len() as f64).sqrt();
    if downside_std < 1e-15 {
        return 0.0;
    }
    (mean / downside_std) * periods_per_year.sqrt()
}

/// Calmar ratio: CAGR / |max_drawdown|.
///
/// Returns 0.0 if max drawdown is zero or CAGR is non-positive.
pub fn calmar_ratio(equity_curve: &[f64], periods_per_year: f64) -> f64 {
    let c = cagr(equity_curve, periods_per_year);
    let dd = max_drawdown(equity_curve);
    if dd >= 0.0 || c <= 0.0 {
        return 0.0;
    }
    c / dd.abs()
}

/// Maximum drawdown as a negative fraction (e.g., -0.15 = 15% drawdown).
pub fn max_drawdown(equity_curve: &[f64]) -> f64 {
    let Some(&first) = equity_curve.first() else {
        return 0.0;
    };
    let mut peak = first;
    let mut max_dd = 0.0_f64;
    for &eq in equity_curve {
        if eq > peak {
            peak = eq;
        }
        if peak > 0.0 {
            max_dd = max_dd.min((eq - peak) / peak);
        }
    }
    max_dd
}

// ─── Helpers ────────────────────────────────────────────────────────

/// Simple returns between consecutive samples.
pub fn period_returns(equity_curve: &[f64]) -> Vec<f64> {
    equity_curve
        .windows(2)
        .map(|w| if w[0] > 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect()
}

pub(crate) fn mean_f64(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean_f64(values);
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

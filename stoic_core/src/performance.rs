// stoic_core/src/performance.rs

//! Performance metrics calculation engine.
//! Uses SIMD for the return statistics and the drawdown scan.

use crate::error::{TunerError, TunerResult};
use crate::trade;

/// Trading days used to annualize the per-trade Sharpe ratio.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;
/// Profit factor reported when a trade list has profits but no losses.
pub const PROFIT_FACTOR_CAP: f64 = 100.0;

const MS_PER_DAY: f64 = 86_400_000.0;

/// Structure holding all calculated performance metrics for a trade list.
/// Missing fields deserialize to zero, so partial baselines can be supplied.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PerformanceMetrics {
    /// Share of trades with positive PnL, in [0, 1].
    pub win_rate: f64,
    /// Gross profit divided by gross loss.
    pub profit_factor: f64,
    /// Annualized Sharpe ratio of per-trade returns.
    pub sharpe_ratio: f64,
    /// Largest peak-to-current drop of cumulative PnL, as a positive amount.
    pub max_drawdown: f64,
    /// Mean PnL of winning trades.
    pub avg_win: f64,
    /// Mean absolute PnL of losing trades.
    pub avg_loss: f64,
    /// Trades per elapsed day (at least one day).
    pub trades_per_day: f64,
    /// Sum of PnL in base currency.
    pub total_return: f64,
    /// Total return divided by max drawdown.
    pub recovery_factor: f64,
    /// Kelly fraction clipped to [0, 1].
    pub kelly_ratio: f64,
    /// Number of trades the metrics were computed from.
    pub trade_count: usize,
}

impl PerformanceMetrics {
    /// Converts the performance metrics into a list of key-value pairs for display.
    pub fn to_stats_list(&self) -> Vec<(String, String)> {
        let mut stats = Vec::new();

        stats.push(("Total_Return".to_string(), format!("{:.2}", self.total_return)));
        stats.push(("Win_Rate".to_string(), format!("{:.4}", self.win_rate)));
        stats.push(("Profit_Factor".to_string(), format!("{:.3}", self.profit_factor)));
        stats.push(("Sharpe_Ratio".to_string(), format!("{:.3}", self.sharpe_ratio)));
        stats.push(("Max_Drawdown".to_string(), format!("{:.2}", self.max_drawdown)));
        stats.push(("Avg_Win".to_string(), format!("{:.2}", self.avg_win)));
        stats.push(("Avg_Loss".to_string(), format!("{:.2}", self.avg_loss)));
        stats.push(("Trades_Per_Day".to_string(), format!("{:.2}", self.trades_per_day)));
        stats.push(("Recovery_Factor".to_string(), format!("{:.2}", self.recovery_factor)));
        stats.push(("Kelly_Ratio".to_string(), format!("{:.4}", self.kelly_ratio)));
        stats.push(("Deals_Count".to_string(), self.trade_count.to_string()));

        stats
    }

    /// The ten metrics as a flat feature vector, in declaration order.
    pub fn feature_vector(&self) -> Vec<f64> {
        vec![
            self.win_rate,
            self.profit_factor,
            self.sharpe_ratio,
            self.max_drawdown,
            self.avg_win,
            self.avg_loss,
            self.trades_per_day,
            self.total_return,
            self.recovery_factor,
            self.kelly_ratio,
        ]
    }
}

/// Computes `PerformanceMetrics` from a list of closed trades.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerformanceEvaluator;

impl PerformanceEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Calculates all metrics. Unsorted input is ordered by timestamp first.
    /// An empty list yields all-zero metrics.
    pub fn evaluate(&self, trades: &[trade::Trade]) -> PerformanceMetrics {
        if trades.is_empty() {
            return PerformanceMetrics::default();
        }

        let trades = trade::chronological(trades);
        let n = trades.len();

        let mut gross_profit = 0.0;
        let mut gross_loss = 0.0;
        let mut wins = 0usize;
        let mut losses = 0usize;
        let mut equity_curve = Vec::with_capacity(n);
        let mut cumulative = 0.0;

        for t in trades.iter() {
            if t.is_win() {
                wins += 1;
                gross_profit += t.pnl;
            } else if t.is_loss() {
                losses += 1;
                gross_loss += -t.pnl;
            }
            cumulative += t.pnl;
            equity_curve.push(cumulative);
        }

        let win_rate = wins as f64 / n as f64;
        let avg_win = if wins > 0 { gross_profit / wins as f64 } else { 0.0 };
        let avg_loss = if losses > 0 { gross_loss / losses as f64 } else { 0.0 };

        let profit_factor = if gross_loss > f64::EPSILON {
            (gross_profit / gross_loss).min(PROFIT_FACTOR_CAP)
        } else if gross_profit > 0.0 {
            PROFIT_FACTOR_CAP
        } else {
            0.0
        };

        let trades_per_day = n as f64 / elapsed_days(&trades);
        let returns: Vec<f64> = trades.iter().map(|t| t.return_fraction()).collect();
        let sharpe_ratio = annualized_sharpe(&returns, trades_per_day);

        let max_drawdown = calculate_max_drawdown_simd(&equity_curve);
        let total_return = cumulative;
        let recovery_factor = if max_drawdown > f64::EPSILON {
            total_return / max_drawdown
        } else {
            0.0
        };

        PerformanceMetrics {
            win_rate,
            profit_factor,
            sharpe_ratio,
            max_drawdown,
            avg_win,
            avg_loss,
            trades_per_day,
            total_return,
            recovery_factor,
            kelly_ratio: kelly_ratio(win_rate, avg_win, avg_loss),
            trade_count: n,
        }
    }

    /// Sharpe ratio that refuses to guess: fewer than two trades is an error.
    pub fn sharpe_ratio_strict(&self, trades: &[trade::Trade]) -> TunerResult<f64> {
        if trades.len() < 2 {
            return Err(TunerError::InsufficientData {
                metric: "sharpe_ratio".to_string(),
                required: 2,
                actual: trades.len(),
            });
        }

        let trades = trade::chronological(trades);
        let trades_per_day = trades.len() as f64 / elapsed_days(&trades);
        let returns: Vec<f64> = trades.iter().map(|t| t.return_fraction()).collect();
        Ok(annualized_sharpe(&returns, trades_per_day))
    }
}

/// Days between the first and last entry, never less than one.
fn elapsed_days(trades: &[trade::Trade]) -> f64 {
    match (trades.first(), trades.last()) {
        (Some(first), Some(last)) => {
            (last.timestamp.saturating_sub(first.timestamp) as f64 / MS_PER_DAY).max(1.0)
        }
        _ => 1.0,
    }
}

fn annualized_sharpe(returns: &[f64], trades_per_day: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }

    let (mean, std) = calculate_mean_std_simd(returns);
    if std <= 1e-12 {
        return 0.0;
    }

    (mean / std) * (trades_per_day * TRADING_DAYS_PER_YEAR).sqrt()
}

/// winRate - (1 - winRate) / payoff, clipped to [0, 1].
fn kelly_ratio(win_rate: f64, avg_win: f64, avg_loss: f64) -> f64 {
    if avg_win <= 0.0 {
        return 0.0;
    }
    if avg_loss <= f64::EPSILON {
        return win_rate.clamp(0.0, 1.0);
    }

    let payoff = avg_win / avg_loss;
    (win_rate - (1.0 - win_rate) / payoff).clamp(0.0, 1.0)
}

/// Mean and sample standard deviation (n - 1).
fn calculate_mean_std_simd(values: &[f64]) -> (f64, f64) {
    let n = values.len();
    if n == 0 {
        return (0.0, 0.0);
    }

    let chunks = values.chunks_exact(4);
    let remainder = chunks.remainder();

    let mut acc = wide::f64x4::splat(0.0);
    for c in chunks.clone() {
        acc = acc + wide::f64x4::from([c[0], c[1], c[2], c[3]]);
    }
    let lanes: [f64; 4] = acc.into();
    let sum: f64 = lanes.iter().sum::<f64>() + remainder.iter().sum::<f64>();
    let mean = sum / n as f64;

    if n < 2 {
        return (mean, 0.0);
    }

    let mean_vec = wide::f64x4::splat(mean);
    let mut sq_acc = wide::f64x4::splat(0.0);
    for c in chunks {
        let diff = wide::f64x4::from([c[0], c[1], c[2], c[3]]) - mean_vec;
        sq_acc = sq_acc + diff * diff;
    }
    let sq_lanes: [f64; 4] = sq_acc.into();
    let sq_sum: f64 = sq_lanes.iter().sum::<f64>()
        + remainder.iter().map(|v| (v - mean).powi(2)).sum::<f64>();

    (mean, (sq_sum / (n - 1) as f64).sqrt())
}

/// Largest drop from the running peak of a cumulative-PnL curve that starts at zero.
fn calculate_max_drawdown_simd(equity: &[f64]) -> f64 {
    let n = equity.len();
    if n == 0 {
        return 0.0;
    }

    let mut running_peaks = Vec::with_capacity(n);
    let mut peak = 0.0_f64;
    for &value in equity {
        peak = peak.max(value);
        running_peaks.push(peak);
    }

    let mut max_dd = 0.0_f64;
    let peak_chunks = running_peaks.chunks_exact(4);
    let value_chunks = equity.chunks_exact(4);
    let processed = n - value_chunks.remainder().len();

    for (p, v) in peak_chunks.zip(value_chunks) {
        let peaks = wide::f64x4::from([p[0], p[1], p[2], p[3]]);
        let values = wide::f64x4::from([v[0], v[1], v[2], v[3]]);
        let dd: [f64; 4] = (peaks - values).into();
        for d in dd {
            if d > max_dd {
                max_dd = d;
            }
        }
    }

    for i in processed..n {
        let dd = running_peaks[i] - equity[i];
        if dd > max_dd {
            max_dd = dd;
        }
    }

    max_dd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trade::{Side, Trade};

    const HOUR: i64 = 3_600_000;

    fn trade(ts: i64, pnl: f64) -> Trade {
        let entry = 100.0;
        let quantity = 1.0;
        Trade::new(ts, entry, entry + pnl / quantity, quantity, pnl, Side::Long)
    }

    #[test]
    fn test_empty_input_returns_zero_metrics() {
        let metrics = PerformanceEvaluator::new().evaluate(&[]);
        assert_eq!(metrics, PerformanceMetrics::default());
        assert!(metrics.feature_vector().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_basic_metrics() {
        let trades = vec![
            trade(0, 10.0),
            trade(HOUR, -5.0),
            trade(2 * HOUR, 20.0),
            trade(3 * HOUR, -15.0),
        ];
        let m = PerformanceEvaluator::new().evaluate(&trades);

        assert!((m.win_rate - 0.5).abs() < 1e-12);
        assert!((m.total_return - 10.0).abs() < 1e-12);
        assert!((m.profit_factor - 30.0 / 20.0).abs() < 1e-12);
        assert!((m.avg_win - 15.0).abs() < 1e-12);
        assert!((m.avg_loss - 10.0).abs() < 1e-12);
        // equity: 10, 5, 25, 10 -> worst drop 25 -> 10
        assert!((m.max_drawdown - 15.0).abs() < 1e-12);
        assert!((m.recovery_factor - 10.0 / 15.0).abs() < 1e-12);
        // span under a day counts as one day
        assert!((m.trades_per_day - 4.0).abs() < 1e-12);
        // kelly = 0.5 - 0.5 / 1.5
        assert!((m.kelly_ratio - (0.5 - 0.5 / 1.5)).abs() < 1e-12);
        assert_eq!(m.trade_count, 4);
    }

    #[test]
    fn test_unsorted_input_matches_sorted() {
        let sorted = vec![
            trade(0, 10.0),
            trade(HOUR, -30.0),
            trade(2 * HOUR, 5.0),
            trade(3 * HOUR, 1.0),
            trade(4 * HOUR, -2.0),
        ];
        let mut shuffled = sorted.clone();
        shuffled.swap(0, 3);
        shuffled.swap(1, 4);

        let evaluator = PerformanceEvaluator::new();
        assert_eq!(evaluator.evaluate(&sorted), evaluator.evaluate(&shuffled));
    }

    #[test]
    fn test_drawdown_from_initial_losses() {
        let trades = vec![trade(0, -10.0), trade(HOUR, -5.0), trade(2 * HOUR, 3.0)];
        let m = PerformanceEvaluator::new().evaluate(&trades);
        assert!((m.max_drawdown - 15.0).abs() < 1e-12);
    }

    #[test]
    fn test_drawdown_simd_matches_scalar_scan() {
        let equity: Vec<f64> = (0..37)
            .map(|i| ((i as f64) * 0.7).sin() * 10.0 + i as f64 * 0.1)
            .collect();
        let mut peak = 0.0_f64;
        let mut expected = 0.0_f64;
        for v in &equity {
            peak = peak.max(*v);
            expected = expected.max(peak - v);
        }
        assert!((calculate_max_drawdown_simd(&equity) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_sharpe_sign_and_annualization() {
        let evaluator = PerformanceEvaluator::new();
        let winners =
            vec![trade(0, 1.0), trade(HOUR, 2.0), trade(2 * HOUR, 1.5), trade(3 * HOUR, 0.5)];
        let m = evaluator.evaluate(&winners);
        assert!(m.sharpe_ratio > 0.0);

        let (mean, std) = calculate_mean_std_simd(&[0.01, 0.02, 0.015, 0.005]);
        let expected = mean / std * (4.0 * TRADING_DAYS_PER_YEAR).sqrt();
        assert!((m.sharpe_ratio - expected).abs() < 1e-9);

        let flat = vec![trade(0, 1.0), trade(HOUR, 1.0)];
        assert_eq!(evaluator.evaluate(&flat).sharpe_ratio, 0.0);
    }

    #[test]
    fn test_strict_sharpe_requires_two_trades() {
        let evaluator = PerformanceEvaluator::new();
        let result = evaluator.sharpe_ratio_strict(&[trade(0, 1.0)]);
        assert!(matches!(
            result,
            Err(TunerError::InsufficientData { required: 2, actual: 1, .. })
        ));
        assert!(evaluator.sharpe_ratio_strict(&[trade(0, 1.0), trade(HOUR, 2.0)]).is_ok());
    }

    #[test]
    fn test_profit_factor_and_kelly_without_losses() {
        let m = PerformanceEvaluator::new().evaluate(&[trade(0, 5.0), trade(HOUR, 7.0)]);
        assert_eq!(m.profit_factor, PROFIT_FACTOR_CAP);
        assert_eq!(m.kelly_ratio, 1.0);
        assert_eq!(m.recovery_factor, 0.0);
    }

    #[test]
    fn test_partial_metrics_deserialize_with_defaults() {
        let m: PerformanceMetrics = serde_json::from_str(r#"{"total_return": 12.5}"#).unwrap();
        assert_eq!(m.total_return, 12.5);
        assert_eq!(m.sharpe_ratio, 0.0);
        assert_eq!(m.trade_count, 0);
    }

    #[test]
    fn test_extreme_timestamps_do_not_overflow() {
        let trades = vec![trade(i64::MIN, 2.0), trade(0, -1.0), trade(i64::MAX, 3.0)];
        let m = PerformanceEvaluator::new().evaluate(&trades);
        assert_eq!(m.trade_count, 3);
        assert!(m.sharpe_ratio.is_finite());
        assert!(m.trades_per_day > 0.0 && m.trades_per_day < 1e-9);
    }
}

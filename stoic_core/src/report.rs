// stoic_core/src/report.rs

//! Before/after comparison of an optimization run.

use crate::behavior::BehaviorScore;
use crate::performance::PerformanceMetrics;

/// Behavior sub-scores above this are called out as still elevated.
const ELEVATED_BEHAVIOR_SCORE: f64 = 0.3;

/// Deltas and recommendations for one optimization run.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct OptimizationReport {
    /// after.total_return - before.total_return
    pub return_improvement: f64,
    /// before.max_drawdown - after.max_drawdown
    pub drawdown_reduction: f64,
    /// after.sharpe_ratio - before.sharpe_ratio
    pub sharpe_improvement: f64,
    pub before: PerformanceMetrics,
    pub after: PerformanceMetrics,
    pub behavior_before: Option<BehaviorScore>,
    pub behavior_after: Option<BehaviorScore>,
    pub recommendations: Vec<String>,
}

impl OptimizationReport {
    /// Plain-text report with a side-by-side metrics table.
    pub fn render(&self) -> String {
        let mut lines = vec!["=== Optimization Report ===".to_string()];
        lines.push(format!("{:<18} {:>14} {:>14}", "Metric", "Before", "After"));

        let rows = self.before.to_stats_list().into_iter().zip(self.after.to_stats_list());
        for ((name, before), (_, after)) in rows {
            lines.push(format!("{:<18} {:>14} {:>14}", name, before, after));
        }

        if let (Some(before), Some(after)) = (self.behavior_before, self.behavior_after) {
            for (name, b, a) in [
                ("Revenge_Trading", before.revenge_trading_score, after.revenge_trading_score),
                ("Over_Trading", before.over_trading_score, after.over_trading_score),
                ("FOMO", before.fomo_score, after.fomo_score),
            ] {
                lines.push(format!("{:<18} {:>14.3} {:>14.3}", name, b, a));
            }
        }

        lines.push(String::new());
        lines.push(format!("Return improvement:  {:+.2}", self.return_improvement));
        lines.push(format!("Drawdown reduction:  {:+.2}", self.drawdown_reduction));
        lines.push(format!("Sharpe improvement:  {:+.3}", self.sharpe_improvement));
        lines.push(String::new());
        lines.push("Recommendations:".to_string());
        lines.extend(self.recommendations.iter().map(|r| format!("- {}", r)));

        lines.join("\n")
    }
}

/// Builds an `OptimizationReport`. Pure and deterministic; never fails.
#[derive(Debug, Clone, Default)]
pub struct OptimizationReportBuilder {
    behavior: Option<(BehaviorScore, BehaviorScore)>,
}

impl OptimizationReportBuilder {
    pub fn new() -> Self {
        Self { behavior: None }
    }

    /// Adds behavior-score recommendations to the report.
    pub fn with_behavior(mut self, before: BehaviorScore, after: BehaviorScore) -> Self {
        self.behavior = Some((before, after));
        self
    }

    /// `before` usually comes from the unmodified trade history. Fields that a
    /// caller could not supply should be left at their zero default.
    pub fn build(
        &self,
        before: &PerformanceMetrics,
        after: &PerformanceMetrics,
    ) -> OptimizationReport {
        let return_improvement = finite_or_zero(after.total_return - before.total_return);
        let drawdown_reduction = finite_or_zero(before.max_drawdown - after.max_drawdown);
        let sharpe_improvement = finite_or_zero(after.sharpe_ratio - before.sharpe_ratio);

        let mut recommendations = Vec::new();

        if return_improvement > 0.0 {
            recommendations.push(format!(
                "Optimized parameters improve total return by {:.2}.",
                return_improvement
            ));
        } else if return_improvement < 0.0 {
            recommendations.push(format!(
                "Total return falls by {:.2} with the optimized parameters.",
                -return_improvement
            ));
        }

        if drawdown_reduction > 0.0 {
            recommendations.push(format!(
                "Maximum drawdown shrinks by {:.2}; keep the tighter risk limits.",
                drawdown_reduction
            ));
        } else if drawdown_reduction < 0.0 {
            recommendations.push(format!(
                "Maximum drawdown grows by {:.2}; consider narrowing the stop_loss bounds.",
                -drawdown_reduction
            ));
        }

        if sharpe_improvement > 0.0 {
            recommendations.push(format!(
                "Risk-adjusted return improves (Sharpe {:+.3}).",
                sharpe_improvement
            ));
        } else if sharpe_improvement < 0.0 {
            recommendations.push(format!(
                "Sharpe ratio drops by {:.3}.",
                -sharpe_improvement
            ));
        }

        if let Some((before, after)) = self.behavior {
            behavior_recommendations(&before, &after, &mut recommendations);
        }

        if return_improvement <= 0.0 && drawdown_reduction <= 0.0 && sharpe_improvement <= 0.0 {
            recommendations.push("No improvement found; keep the current parameters.".to_string());
        }

        OptimizationReport {
            return_improvement,
            drawdown_reduction,
            sharpe_improvement,
            before: before.clone(),
            after: after.clone(),
            behavior_before: self.behavior.map(|(b, _)| b),
            behavior_after: self.behavior.map(|(_, a)| a),
            recommendations,
        }
    }
}

fn behavior_recommendations(before: &BehaviorScore, after: &BehaviorScore, out: &mut Vec<String>) {
    let scores = [
        (
            "Revenge-trading",
            before.revenge_trading_score,
            after.revenge_trading_score,
            "enforce a cooldown after losing trades",
        ),
        (
            "Overtrading",
            before.over_trading_score,
            after.over_trading_score,
            "cap the number of trades per day",
        ),
        (
            "FOMO",
            before.fomo_score,
            after.fomo_score,
            "wait for price to settle before re-entering",
        ),
    ];

    for (name, b, a, advice) in scores {
        if a < b {
            out.push(format!("{} score drops from {:.2} to {:.2}.", name, b, a));
        } else if a > b {
            out.push(format!("{} score rises from {:.2} to {:.2}.", name, b, a));
        }
        if a > ELEVATED_BEHAVIOR_SCORE {
            out.push(format!("{} risk remains elevated ({:.2}); {}.", name, a, advice));
        }
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

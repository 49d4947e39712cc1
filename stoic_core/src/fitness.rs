// stoic_core/src/fitness.rs

//! Fitness evaluation: simulate -> metrics -> behavior score -> scalar.
//! Batches are evaluated in parallel on a bounded Rayon pool. Each worker
//! reads the shared trade slice and returns its own result; nothing mutable
//! is shared while a batch runs.

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::behavior;
use crate::error::{TunerError, TunerResult};
use crate::parameters::ParameterSet;
use crate::performance;
use crate::simulation;
use crate::trade::Trade;

/// Fitness assigned to members whose evaluation failed.
pub const WORST_FITNESS: f64 = f64::NEG_INFINITY;

/// Metric names accepted by the composite reward.
pub const VALID_COMPOSITE_METRICS: &[&str] = &[
    "Total_Return",
    "Win_Rate",
    "Profit_Factor",
    "Sharpe_Ratio",
    "Max_Drawdown",
    "Recovery_Factor",
    "Kelly_Ratio",
    "Trades_Per_Day",
];

/// Metric rewarded by the fitness function.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub enum FitnessValue {
    #[serde(rename = "Total_Return")]
    TotalReturn,
    #[serde(rename = "Sharpe_Ratio")]
    SharpeRatio,
    #[serde(rename = "Profit_Factor")]
    ProfitFactor,
    #[serde(rename = "Recovery_Factor")]
    RecoveryFactor,
    #[serde(rename = "Kelly_Ratio")]
    KellyRatio,
    #[serde(rename = "Win_Rate")]
    WinRate,
    #[serde(rename = "Composite")]
    Composite { metrics: Vec<String> },
}

impl Default for FitnessValue {
    fn default() -> Self {
        FitnessValue::SharpeRatio
    }
}

/// Converts performance metrics into the reward half of the fitness score.
/// Composite rewards weight every listed metric equally; drawdown and trade
/// frequency count against the score.
pub fn performance_reward(
    metrics: &performance::PerformanceMetrics,
    fitness_value: &FitnessValue,
) -> f64 {
    match fitness_value {
        FitnessValue::TotalReturn => metrics.total_return,
        FitnessValue::SharpeRatio => metrics.sharpe_ratio,
        FitnessValue::ProfitFactor => metrics.profit_factor,
        FitnessValue::RecoveryFactor => metrics.recovery_factor,
        FitnessValue::KellyRatio => metrics.kelly_ratio,
        FitnessValue::WinRate => metrics.win_rate,
        FitnessValue::Composite { metrics: composite_metrics } => {
            calculate_composite_score(metrics, composite_metrics)
        }
    }
}

fn calculate_composite_score(
    metrics: &performance::PerformanceMetrics,
    composite_metrics: &[String],
) -> f64 {
    if composite_metrics.is_empty() {
        return 0.0;
    }

    let weight = 1.0 / composite_metrics.len() as f64;
    composite_metrics
        .iter()
        .map(|name| {
            let value = match name.as_str() {
                "Total_Return" => metrics.total_return,
                "Win_Rate" => metrics.win_rate,
                "Profit_Factor" => metrics.profit_factor,
                "Sharpe_Ratio" => metrics.sharpe_ratio,
                "Max_Drawdown" => -metrics.max_drawdown,
                "Recovery_Factor" => metrics.recovery_factor,
                "Kelly_Ratio" => metrics.kelly_ratio,
                "Trades_Per_Day" => -metrics.trades_per_day,
                _ => 0.0,
            };
            value * weight
        })
        .sum()
}

/// Result of evaluating one parameter set.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Evaluation {
    pub parameters: ParameterSet,
    pub metrics: performance::PerformanceMetrics,
    pub behavior: behavior::BehaviorScore,
    pub fitness: f64,
    /// Reason the evaluation failed, if it did.
    pub error: Option<String>,
}

impl Evaluation {
    /// Placeholder for a member whose evaluation failed.
    pub fn failed(parameters: ParameterSet, error: &TunerError) -> Self {
        Self {
            parameters,
            metrics: performance::PerformanceMetrics::default(),
            behavior: behavior::BehaviorScore::default(),
            fitness: WORST_FITNESS,
            error: Some(error.to_string()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Scores parameter sets against a historical trade list.
#[derive(Clone)]
pub struct FitnessFunction {
    simulator: std::sync::Arc<dyn simulation::TradeSimulator>,
    performance: performance::PerformanceEvaluator,
    behavior: behavior::TradeBehaviorScorer,
    fitness_value: FitnessValue,
    behavior_penalty_weight: f64,
    fomo_penalty_weight: f64,
    min_trades: usize,
}

impl std::fmt::Debug for FitnessFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FitnessFunction")
            .field("fitness_value", &self.fitness_value)
            .field("behavior_penalty_weight", &self.behavior_penalty_weight)
            .field("fomo_penalty_weight", &self.fomo_penalty_weight)
            .field("min_trades", &self.min_trades)
            .finish()
    }
}

impl Default for FitnessFunction {
    fn default() -> Self {
        Self::new()
    }
}

impl FitnessFunction {
    /// Replay simulator, Sharpe reward, unit behavior penalty, two-trade minimum.
    pub fn new() -> Self {
        Self {
            simulator: std::sync::Arc::new(simulation::ReplaySimulator::new()),
            performance: performance::PerformanceEvaluator::new(),
            behavior: behavior::TradeBehaviorScorer::new(),
            fitness_value: FitnessValue::default(),
            behavior_penalty_weight: 1.0,
            fomo_penalty_weight: 0.0,
            min_trades: 2,
        }
    }

    /// Sets the simulator used to replay trades under a parameter set.
    pub fn with_simulator(
        mut self,
        simulator: std::sync::Arc<dyn simulation::TradeSimulator>,
    ) -> Self {
        self.simulator = simulator;
        self
    }

    /// Sets the behavior scorer.
    pub fn with_behavior_scorer(mut self, scorer: behavior::TradeBehaviorScorer) -> Self {
        self.behavior = scorer;
        self
    }

    /// Sets the rewarded metric.
    pub fn with_fitness_value(mut self, fitness_value: FitnessValue) -> Self {
        self.fitness_value = fitness_value;
        self
    }

    /// Sets the weight applied to revenge + overtrading scores.
    pub fn with_behavior_penalty_weight(mut self, weight: f64) -> Self {
        self.behavior_penalty_weight = weight;
        self
    }

    /// Sets the weight applied to the FOMO score.
    pub fn with_fomo_penalty_weight(mut self, weight: f64) -> Self {
        self.fomo_penalty_weight = weight;
        self
    }

    /// Sets the minimum number of simulated trades an evaluation needs.
    pub fn with_min_trades(mut self, min_trades: usize) -> Self {
        self.min_trades = min_trades;
        self
    }

    pub fn get_behavior_penalty_weight(&self) -> f64 {
        self.behavior_penalty_weight
    }

    pub fn get_min_trades(&self) -> usize {
        self.min_trades
    }

    pub fn get_fitness_value(&self) -> &FitnessValue {
        &self.fitness_value
    }

    /// Checks weights and the trade minimum before any search starts.
    pub fn validate(&self) -> TunerResult<()> {
        for (name, weight) in [
            ("behavior_penalty_weight", self.behavior_penalty_weight),
            ("fomo_penalty_weight", self.fomo_penalty_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(TunerError::config(format!(
                    "{} must be a finite non-negative number, got {}",
                    name, weight
                )));
            }
        }
        if self.min_trades == 0 {
            return Err(TunerError::config("min_trades must be greater than 0"));
        }
        if let FitnessValue::Composite { metrics } = &self.fitness_value {
            if metrics.is_empty() {
                return Err(TunerError::config(format!(
                    "Composite fitness must have at least one metric. One of {:?}",
                    VALID_COMPOSITE_METRICS
                )));
            }
            for metric in metrics {
                if !VALID_COMPOSITE_METRICS.contains(&metric.as_str()) {
                    return Err(TunerError::config(format!(
                        "Invalid composite metric '{}'. Must be one of: {:?}",
                        metric, VALID_COMPOSITE_METRICS
                    )));
                }
            }
        }
        Ok(())
    }

    /// Fails when the historical trade list is too short to score anything.
    pub fn check_trades(&self, trades: &[Trade]) -> TunerResult<()> {
        if trades.len() < self.min_trades {
            return Err(TunerError::InsufficientData {
                metric: "trade history".to_string(),
                required: self.min_trades,
                actual: trades.len(),
            });
        }
        Ok(())
    }

    /// Reward minus the weighted behavior penalty.
    pub fn fitness(
        &self,
        metrics: &performance::PerformanceMetrics,
        behavior: &behavior::BehaviorScore,
    ) -> f64 {
        performance_reward(metrics, &self.fitness_value)
            - self.behavior_penalty_weight
                * (behavior.revenge_trading_score + behavior.over_trading_score)
            - self.fomo_penalty_weight * behavior.fomo_score
    }

    /// Evaluates one parameter set.
    pub fn evaluate(&self, trades: &[Trade], params: &ParameterSet) -> TunerResult<Evaluation> {
        let simulated = self.simulator.simulate(trades, params)?;
        if simulated.len() < self.min_trades {
            return Err(TunerError::InsufficientData {
                metric: "simulated trades".to_string(),
                required: self.min_trades,
                actual: simulated.len(),
            });
        }

        let metrics = self.performance.evaluate(&simulated);
        let behavior = self.behavior.score(&simulated);
        let fitness = self.fitness(&metrics, &behavior);

        if !fitness.is_finite() {
            return Err(TunerError::Simulation(format!(
                "non-finite fitness for {}",
                params.format_for_display()
            )));
        }

        Ok(Evaluation {
            parameters: params.clone(),
            metrics,
            behavior,
            fitness,
            error: None,
        })
    }

    /// Evaluates one parameter set, converting any error or simulator panic
    /// into a worst-fitness member.
    pub fn evaluate_or_worst(&self, trades: &[Trade], params: &ParameterSet) -> Evaluation {
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.evaluate(trades, params)
        }))
        .unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            Err(TunerError::Simulation(format!("evaluation panicked: {}", message)))
        });

        match outcome {
            Ok(evaluation) => evaluation,
            Err(e) => {
                warn!("Evaluation failed for {}: {}", params.format_for_display(), e);
                Evaluation::failed(params.clone(), &e)
            }
        }
    }

    /// Evaluates a batch on `pool`. Results keep the input order and the call
    /// returns only once every member is done.
    pub fn evaluate_batch(
        &self,
        pool: &rayon::ThreadPool,
        trades: &[Trade],
        batch: &[ParameterSet],
    ) -> Vec<Evaluation> {
        let start_time = std::time::Instant::now();

        let results: Vec<Evaluation> = pool.install(|| {
            batch
                .par_iter()
                .map(|params| self.evaluate_or_worst(trades, params))
                .collect()
        });

        debug!(
            "Evaluated {} parameter sets in {:.3} seconds",
            batch.len(),
            start_time.elapsed().as_secs_f64()
        );

        results
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Builds the bounded worker pool used for evaluation.
/// `threads = None` uses every available CPU.
pub fn build_worker_pool(threads: Option<usize>) -> TunerResult<rayon::ThreadPool> {
    let threads = match threads {
        Some(0) => return Err(TunerError::config("'threads' cannot be zero")),
        Some(t) => t.min(num_cpus::get().max(1)),
        None => num_cpus::get().max(1),
    };

    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| TunerError::config(format!("failed to create thread pool: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::ParameterSet;
    use crate::trade::Side;

    const MINUTE: i64 = 60_000;

    struct FailingSimulator;

    impl simulation::TradeSimulator for FailingSimulator {
        fn simulate(&self, _trades: &[Trade], _params: &ParameterSet) -> TunerResult<Vec<Trade>> {
            Err(TunerError::Simulation("broken".to_string()))
        }
    }

    /// Indexes past the history for `x == 1.0`.
    struct PanickingSimulator;

    impl simulation::TradeSimulator for PanickingSimulator {
        fn simulate(&self, trades: &[Trade], params: &ParameterSet) -> TunerResult<Vec<Trade>> {
            let index = if params.get("x") == Some(1.0) { trades.len() } else { 0 };
            let first = trades[index].clone();
            Ok(vec![first.clone(), first])
        }
    }

    fn trades() -> Vec<Trade> {
        vec![
            Trade::new(0, 100.0, 95.0, 1.0, -5.0, Side::Long),
            Trade::new(2 * MINUTE, 95.0 * 1.03, 100.0, 2.0, 9.4, Side::Long),
            Trade::new(90 * MINUTE, 100.0, 104.0, 1.0, 4.0, Side::Long),
            Trade::new(300 * MINUTE, 104.0, 103.0, 1.0, -1.0, Side::Long),
        ]
    }

    #[test]
    fn test_fitness_subtracts_behavior_penalty() {
        let function = FitnessFunction::new()
            .with_fitness_value(FitnessValue::TotalReturn)
            .with_behavior_penalty_weight(2.0)
            .with_fomo_penalty_weight(1.0);
        let metrics = performance::PerformanceMetrics { total_return: 10.0, ..Default::default() };
        let behavior = behavior::BehaviorScore {
            revenge_trading_score: 0.25,
            over_trading_score: 0.5,
            fomo_score: 0.1,
        };
        assert!((function.fitness(&metrics, &behavior) - (10.0 - 1.5 - 0.1)).abs() < 1e-12);
    }

    #[test]
    fn test_composite_reward_is_equal_weighted() {
        let metrics = performance::PerformanceMetrics {
            sharpe_ratio: 2.0,
            max_drawdown: 4.0,
            ..Default::default()
        };
        let value = FitnessValue::Composite {
            metrics: vec!["Sharpe_Ratio".to_string(), "Max_Drawdown".to_string()],
        };
        assert!((performance_reward(&metrics, &value) - (-1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_validate_rejects_bad_configuration() {
        assert!(FitnessFunction::new().validate().is_ok());
        assert!(FitnessFunction::new().with_behavior_penalty_weight(-1.0).validate().is_err());
        assert!(FitnessFunction::new().with_min_trades(0).validate().is_err());
        let bad = FitnessValue::Composite { metrics: vec!["Nope".to_string()] };
        assert!(FitnessFunction::new().with_fitness_value(bad).validate().is_err());
    }

    #[test]
    fn test_evaluate_penalizes_revenge_sequence() {
        let trades = trades();
        let function = FitnessFunction::new().with_fitness_value(FitnessValue::TotalReturn);
        let evaluation = function.evaluate(&trades, &ParameterSet::new()).unwrap();

        assert!(evaluation.behavior.revenge_trading_score > 0.0);
        let expected = evaluation.metrics.total_return
            - (evaluation.behavior.revenge_trading_score + evaluation.behavior.over_trading_score);
        assert!((evaluation.fitness - expected).abs() < 1e-12);
    }

    #[test]
    fn test_failures_become_worst_fitness() {
        let pool = build_worker_pool(Some(2)).unwrap();
        let failing = FitnessFunction::new().with_simulator(std::sync::Arc::new(FailingSimulator));
        let batch = vec![ParameterSet::new(), ParameterSet::new().with_value("x", 1.0)];

        let results = failing.evaluate_batch(&pool, &trades(), &batch);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|e| e.fitness == WORST_FITNESS && e.is_failed()));
        assert_eq!(results[1].parameters, batch[1]);
    }

    #[test]
    fn test_simulator_panic_fails_only_that_member() {
        let pool = build_worker_pool(Some(2)).unwrap();
        let function = FitnessFunction::new()
            .with_fitness_value(FitnessValue::TotalReturn)
            .with_simulator(std::sync::Arc::new(PanickingSimulator));
        let batch = vec![
            ParameterSet::new().with_value("x", 0.0),
            ParameterSet::new().with_value("x", 1.0),
        ];

        let results = function.evaluate_batch(&pool, &trades(), &batch);
        assert_eq!(results.len(), 2);
        assert!(!results[0].is_failed());
        assert!(results[0].fitness.is_finite());
        assert!(results[1].is_failed());
        assert_eq!(results[1].fitness, WORST_FITNESS);
        assert!(results[1].error.as_deref().is_some_and(|e| e.contains("panicked")));
    }

    #[test]
    fn test_too_few_simulated_trades_is_insufficient_data() {
        let function = FitnessFunction::new().with_min_trades(10);
        let result = function.evaluate(&trades(), &ParameterSet::new());
        assert!(matches!(result, Err(TunerError::InsufficientData { required: 10, .. })));
        assert!(function.check_trades(&trades()).is_err());
    }

    #[test]
    fn test_batch_matches_sequential_evaluation() {
        let pool = build_worker_pool(Some(3)).unwrap();
        let function = FitnessFunction::new();
        let batch: Vec<ParameterSet> = (1..8)
            .map(|i| ParameterSet::new().with_value(simulation::STOP_LOSS, 0.01 * i as f64))
            .collect();

        let parallel = function.evaluate_batch(&pool, &trades(), &batch);
        for (params, evaluation) in batch.iter().zip(parallel.iter()) {
            assert_eq!(&function.evaluate_or_worst(&trades(), params), evaluation);
        }
    }

    #[test]
    fn test_zero_threads_is_configuration_error() {
        assert!(matches!(build_worker_pool(Some(0)), Err(TunerError::Configuration(_))));
    }
}

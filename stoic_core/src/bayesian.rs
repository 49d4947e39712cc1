// stoic_core/src/bayesian.rs

//! Sequential model-based search.
//! A random initial design is evaluated in parallel, then one point per
//! iteration is proposed by maximizing Expected Improvement under the
//! surrogate ensemble and evaluated for real.

use rand::distributions::Distribution;
use rand::SeedableRng;
use rand::rngs::StdRng;
use statrs::distribution::{Continuous, ContinuousCDF, Normal};
use tracing::{debug, info};

use crate::error::{TunerError, TunerResult};
use crate::fitness;
use crate::optimization::{self, CheckpointStats, OptimizationResult, SearchKind, TerminationReason};
use crate::parameters::{ParameterBounds, ParameterSet};
use crate::progress::{ProgressReporter, TracingProgress};
use crate::settings;
use crate::surrogate::{Sample, SurrogateConfig, SurrogatePredictor};
use crate::trade::Trade;

/// Standard deviation of incumbent perturbations, as a fraction of bound width.
const LOCAL_SEARCH_SCALE: f64 = 0.1;

/// Configuration for the Bayesian search.
#[derive(Debug, Clone, PartialEq)]
pub struct BayesianConfig {
    max_iterations: usize,
    initial_points: usize,
    patience: Option<usize>,
    candidate_pool: usize,
    xi: f64,
    seed: u64,
    threads: Option<usize>,
    max_duration: Option<std::time::Duration>,
    surrogate: SurrogateConfig,
}

impl Default for BayesianConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl BayesianConfig {
    pub fn new() -> Self {
        Self {
            max_iterations: 50,
            initial_points: 10,
            patience: None,
            candidate_pool: 256,
            xi: 0.01,
            seed: 42,
            threads: None,
            max_duration: None,
            surrogate: SurrogateConfig::default(),
        }
    }

    /// Creates a BayesianConfig from the settings file sections.
    pub fn from_settings(
        bo_params: &settings::BOParams,
        common: &settings::CommonSettings,
    ) -> Self {
        Self {
            max_iterations: bo_params.max_iterations,
            initial_points: bo_params.initial_points,
            patience: bo_params.patience,
            candidate_pool: bo_params.candidate_pool,
            xi: bo_params.xi,
            seed: common.seed,
            threads: common.threads,
            max_duration: common.max_duration_secs.map(std::time::Duration::from_secs),
            surrogate: bo_params.surrogate,
        }
    }

    pub fn with_max_iterations(mut self, value: usize) -> Self {
        self.max_iterations = value;
        self
    }

    pub fn with_initial_points(mut self, value: usize) -> Self {
        self.initial_points = value;
        self
    }

    /// Stops after this many consecutive iterations without a new best.
    pub fn with_patience(mut self, value: Option<usize>) -> Self {
        self.patience = value;
        self
    }

    /// Number of random candidates scored by the acquisition function per iteration.
    pub fn with_candidate_pool(mut self, value: usize) -> Self {
        self.candidate_pool = value;
        self
    }

    /// Exploration offset for Expected Improvement.
    pub fn with_xi(mut self, value: f64) -> Self {
        self.xi = value;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_threads(mut self, threads: Option<usize>) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_max_duration(mut self, limit: Option<std::time::Duration>) -> Self {
        self.max_duration = limit;
        self
    }

    pub fn with_surrogate_config(mut self, config: SurrogateConfig) -> Self {
        self.surrogate = config;
        self
    }

    /// --- Getters ---
    pub fn get_max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn get_initial_points(&self) -> usize {
        self.initial_points
    }

    /// Upper bound on real evaluations for one run.
    pub fn get_evaluation_budget(&self) -> usize {
        self.initial_points + self.max_iterations
    }

    pub fn validate(&self) -> TunerResult<()> {
        if self.max_iterations == 0 {
            return Err(TunerError::config("max_iterations must be greater than 0"));
        }
        if self.initial_points == 0 {
            return Err(TunerError::config("initial_points must be greater than 0"));
        }
        if self.patience == Some(0) {
            return Err(TunerError::config("patience must be greater than 0 when set"));
        }
        if self.candidate_pool == 0 {
            return Err(TunerError::config("candidate_pool must be greater than 0"));
        }
        if !self.xi.is_finite() || self.xi < 0.0 {
            return Err(TunerError::config(format!(
                "xi must be a finite non-negative number, got {}",
                self.xi
            )));
        }
        self.surrogate.validate()
    }
}

/// Runs the Bayesian search. Owns its worker pool and surrogate.
pub struct BayesianSearchOrchestrator {
    config: BayesianConfig,
    bounds: ParameterBounds,
    fitness_function: fitness::FitnessFunction,
    pool: rayon::ThreadPool,
    surrogate: SurrogatePredictor,
    noise: Normal,
}

impl BayesianSearchOrchestrator {
    pub fn new(
        config: BayesianConfig,
        bounds: ParameterBounds,
        fitness_function: fitness::FitnessFunction,
    ) -> TunerResult<Self> {
        config.validate()?;
        fitness_function.validate()?;
        let pool = fitness::build_worker_pool(config.threads)?;
        let noise = Normal::new(0.0, 1.0)
            .map_err(|e| TunerError::config(format!("invalid acquisition distribution: {}", e)))?;
        let surrogate = SurrogatePredictor::new(config.surrogate);

        Ok(Self { config, bounds, fitness_function, pool, surrogate, noise })
    }

    pub fn get_config(&self) -> &BayesianConfig {
        &self.config
    }

    /// The surrogate as trained on the last completed run.
    pub fn get_surrogate(&self) -> &SurrogatePredictor {
        &self.surrogate
    }

    /// Consumes the orchestrator, handing the trained surrogate to the caller for saving.
    pub fn into_surrogate(self) -> SurrogatePredictor {
        self.surrogate
    }

    pub fn run(&mut self, trades: &[Trade]) -> TunerResult<OptimizationResult> {
        self.run_with_progress(trades, &mut TracingProgress)
    }

    pub fn run_with_progress(
        &mut self,
        trades: &[Trade],
        progress: &mut dyn ProgressReporter,
    ) -> TunerResult<OptimizationResult> {
        self.fitness_function.check_trades(trades)?;

        let start_time = std::time::Instant::now();
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut history: Vec<CheckpointStats> = Vec::new();

        let design: Vec<ParameterSet> = (0..self.config.initial_points)
            .map(|_| self.bounds.sample_uniform(&mut rng))
            .collect();
        let mut evaluations = self.fitness_function.evaluate_batch(&self.pool, trades, &design);

        let mut incumbent = optimization::best_index(&evaluations).unwrap_or(0);
        self.record_checkpoint(0, &evaluations, incumbent, start_time, progress, &mut history);

        let mut termination = TerminationReason::MaxIterations;
        let mut stale = 0usize;

        for iteration in 1..=self.config.max_iterations {
            if let Some(limit) = self.config.max_duration {
                if start_time.elapsed() >= limit {
                    termination = TerminationReason::TimeLimit;
                    break;
                }
            }

            let samples: Vec<Sample> = evaluations
                .iter()
                .filter(|e| !e.is_failed())
                .map(|e| Sample::new(self.bounds.normalize(&e.parameters), e.fitness))
                .collect();
            self.surrogate.train(&samples);

            let incumbent_params = evaluations.get(incumbent).map(|e| e.parameters.clone());
            let best_observed = evaluations
                .get(incumbent)
                .map_or(fitness::WORST_FITNESS, |e| e.fitness);
            let candidate = self.propose(incumbent_params.as_ref(), best_observed, &mut rng);

            let evaluation = self
                .fitness_function
                .evaluate_batch(&self.pool, trades, std::slice::from_ref(&candidate))
                .into_iter()
                .next()
                .ok_or_else(|| {
                    TunerError::Simulation("evaluation batch returned no result".to_string())
                })?;

            if evaluation.fitness > best_observed {
                incumbent = evaluations.len();
                stale = 0;
            } else {
                stale += 1;
            }
            evaluations.push(evaluation);

            self.record_checkpoint(
                iteration,
                &evaluations,
                incumbent,
                start_time,
                progress,
                &mut history,
            );

            if self.config.patience.is_some_and(|patience| stale >= patience) {
                termination = TerminationReason::NoImprovement;
                break;
            }
        }

        let best = evaluations
            .get(incumbent)
            .filter(|e| !e.is_failed())
            .cloned()
            .ok_or_else(|| optimization::all_failed_error(&evaluations))?;

        info!(
            "Bayesian search finished ({:?}) after {} evaluations: best fitness {:.4} for {}",
            termination,
            evaluations.len(),
            best.fitness,
            best.parameters.format_for_display()
        );

        let real_evaluations = evaluations.len();
        Ok(OptimizationResult::new(&best, history, evaluations, real_evaluations, termination))
    }

    fn record_checkpoint(
        &self,
        index: usize,
        evaluations: &[fitness::Evaluation],
        incumbent: usize,
        start_time: std::time::Instant,
        progress: &mut dyn ProgressReporter,
        history: &mut Vec<CheckpointStats>,
    ) {
        let fitness_values: Vec<f64> = evaluations.iter().map(|e| e.fitness).collect();
        let (mean_fitness, best_fitness, worst_fitness) =
            optimization::calculate_stats(&fitness_values);
        let latest = evaluations.last().map_or(fitness::WORST_FITNESS, |e| e.fitness);

        let stat = CheckpointStats {
            kind: SearchKind::Bayesian,
            index,
            best_fitness: if index == 0 { best_fitness } else { latest },
            mean_fitness,
            worst_fitness,
            best_ever_fitness: evaluations
                .get(incumbent)
                .map_or(fitness::WORST_FITNESS, |e| e.fitness),
            best_parameters: evaluations
                .get(incumbent)
                .map(|e| e.parameters.clone())
                .unwrap_or_default(),
            evaluations: evaluations.len(),
            elapsed_secs: start_time.elapsed().as_secs_f64(),
        };
        progress.on_checkpoint(&stat);
        history.push(stat);
    }

    /// Picks the next point to evaluate.
    /// Uniform random until the surrogate is fitted, then the Expected Improvement
    /// maximizer over random candidates and perturbations of the incumbent.
    fn propose(
        &self,
        incumbent: Option<&ParameterSet>,
        best_observed: f64,
        rng: &mut StdRng,
    ) -> ParameterSet {
        if !self.surrogate.is_fitted() {
            debug!("Surrogate not fitted; proposing a random point");
            return self.bounds.sample_uniform(rng);
        }

        let mut candidates: Vec<ParameterSet> = (0..self.config.candidate_pool)
            .map(|_| self.bounds.sample_uniform(rng))
            .collect();
        if let Some(incumbent) = incumbent {
            let local = (self.config.candidate_pool / 4).max(1);
            candidates.extend((0..local).map(|_| self.perturb(incumbent, rng)));
        }

        let features: Vec<Vec<f64>> = candidates.iter().map(|c| self.bounds.normalize(c)).collect();
        let predictions = self.surrogate.predict_batch(&features);

        let mut best_idx = 0;
        let mut best_score = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for (idx, prediction) in predictions.iter().enumerate() {
            let ei = expected_improvement(
                &self.noise,
                prediction.mean,
                prediction.std,
                best_observed,
                self.config.xi,
            );
            let score = (ei, prediction.mean);
            if score.0 > best_score.0 || (score.0 == best_score.0 && score.1 > best_score.1) {
                best_score = score;
                best_idx = idx;
            }
        }

        debug!(
            "Proposed candidate {} with EI {:.6} (predicted {:.4})",
            best_idx, best_score.0, best_score.1
        );
        candidates.swap_remove(best_idx)
    }

    fn perturb(&self, params: &ParameterSet, rng: &mut StdRng) -> ParameterSet {
        let mut perturbed = params.clone();
        for (name, bound) in self.bounds.iter() {
            let value = params.get(name).unwrap_or(bound.min)
                + self.noise.sample(rng) * LOCAL_SEARCH_SCALE * bound.width();
            perturbed.set(name, value);
        }
        self.bounds.clamp(&perturbed)
    }
}

/// Expected Improvement of a Gaussian prediction over `best`, offset by `xi`.
/// With zero uncertainty it reduces to the plain positive improvement.
pub fn expected_improvement(normal: &Normal, mean: f64, std: f64, best: f64, xi: f64) -> f64 {
    if !best.is_finite() {
        return if mean.is_finite() { f64::MAX } else { 0.0 };
    }
    let improvement = mean - best - xi;
    if std <= 1e-12 {
        return improvement.max(0.0);
    }
    let z = improvement / std;
    (improvement * normal.cdf(z) + std * normal.pdf(z)).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitness::{FitnessFunction, FitnessValue};
    use crate::progress::CollectingProgress;
    use crate::simulation;
    use crate::trade::Side;

    const HOUR: i64 = 3_600_000;

    fn synthetic_trades() -> Vec<Trade> {
        (0..40)
            .map(|i| {
                let ret = ((i * 37 % 11) as f64 - 5.0) / 100.0;
                let entry = 100.0 + i as f64;
                let quantity = 1.0 + (i % 3) as f64;
                Trade::new(
                    i as i64 * 3 * HOUR,
                    entry,
                    entry * (1.0 + ret),
                    quantity,
                    ret * entry * quantity,
                    Side::Long,
                )
            })
            .collect()
    }

    fn bounds() -> ParameterBounds {
        ParameterBounds::from_ranges([
            (simulation::STOP_LOSS, 0.005, 0.06),
            (simulation::TAKE_PROFIT, 0.005, 0.06),
        ])
        .unwrap()
    }

    fn config() -> BayesianConfig {
        BayesianConfig::new()
            .with_initial_points(10)
            .with_max_iterations(8)
            .with_candidate_pool(64)
            .with_seed(5)
            .with_threads(Some(2))
            .with_surrogate_config(SurrogateConfig { members: 3, ..Default::default() })
    }

    fn orchestrator(config: BayesianConfig) -> BayesianSearchOrchestrator {
        let function = FitnessFunction::new().with_fitness_value(FitnessValue::TotalReturn);
        BayesianSearchOrchestrator::new(config, bounds(), function).unwrap()
    }

    #[test]
    fn test_rejects_invalid_configuration() {
        let function = FitnessFunction::new();
        for bad in [
            config().with_max_iterations(0),
            config().with_initial_points(0),
            config().with_patience(Some(0)),
            config().with_xi(-1.0),
            config().with_candidate_pool(0),
        ] {
            let result = BayesianSearchOrchestrator::new(bad, bounds(), function.clone());
            assert!(matches!(result, Err(TunerError::Configuration(_))));
        }
    }

    #[test]
    fn test_evaluations_never_exceed_budget() {
        let mut search = orchestrator(config());
        let mut progress = CollectingProgress::default();
        let result = search.run_with_progress(&synthetic_trades(), &mut progress).unwrap();

        assert!(result.get_real_evaluations() <= 18);
        assert_eq!(result.get_real_evaluations(), result.get_evaluations().len());
        assert_eq!(progress.checkpoints.len(), 9);
        assert_eq!(result.get_termination(), TerminationReason::MaxIterations);
        assert!(bounds().contains(result.get_optimized_parameters()));
        assert!(search.get_surrogate().is_fitted());
    }

    #[test]
    fn test_result_is_best_observed_evaluation() {
        let mut search = orchestrator(config());
        let result = search.run(&synthetic_trades()).unwrap();
        let best = result
            .get_evaluations()
            .iter()
            .map(|e| e.fitness)
            .fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(result.get_fitness(), best);

        for pair in result.get_history().windows(2) {
            assert!(pair[1].best_ever_fitness >= pair[0].best_ever_fitness);
        }
    }

    #[test]
    fn test_patience_stops_early() {
        let fixed = ParameterBounds::from_ranges([(simulation::STOP_LOSS, 0.02, 0.02)]).unwrap();
        let function = FitnessFunction::new();
        let mut search = BayesianSearchOrchestrator::new(
            config().with_initial_points(2).with_patience(Some(3)).with_max_iterations(20),
            fixed,
            function,
        )
        .unwrap();

        let result = search.run(&synthetic_trades()).unwrap();
        assert_eq!(result.get_termination(), TerminationReason::NoImprovement);
        assert_eq!(result.get_real_evaluations(), 5);
    }

    #[test]
    fn test_random_proposals_before_surrogate_is_usable() {
        let mut search = orchestrator(config().with_initial_points(2).with_max_iterations(3));
        let result = search.run(&synthetic_trades()).unwrap();
        assert_eq!(result.get_real_evaluations(), 5);
        assert!(!search.get_surrogate().is_fitted());
    }

    #[test]
    fn test_same_seed_reproduces_run() {
        let trades = synthetic_trades();
        let first = orchestrator(config()).run(&trades).unwrap();
        let second = orchestrator(config()).run(&trades).unwrap();
        assert_eq!(first.get_optimized_parameters(), second.get_optimized_parameters());
        assert_eq!(first.get_fitness(), second.get_fitness());
    }

    #[test]
    fn test_expected_improvement() {
        let normal = Normal::new(0.0, 1.0).unwrap();
        assert_eq!(expected_improvement(&normal, 2.0, 0.0, 1.0, 0.0), 1.0);
        assert_eq!(expected_improvement(&normal, 0.5, 0.0, 1.0, 0.0), 0.0);

        let at_best = expected_improvement(&normal, 1.0, 1.0, 1.0, 0.0);
        assert!((at_best - 0.398_942_280_4).abs() < 1e-9);

        let explore = expected_improvement(&normal, 1.0, 2.0, 1.0, 0.0);
        assert!(explore > at_best);
    }
}

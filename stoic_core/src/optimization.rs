// stoic_core/src/optimization.rs

//! Result types shared by the genetic and Bayesian searches.

use crate::behavior;
use crate::fitness;
use crate::parameters::ParameterSet;
use crate::performance;

/// Which control loop produced a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SearchKind {
    Genetic,
    Bayesian,
}

/// Why a search stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TerminationReason {
    /// Best and mean fitness came within the convergence threshold.
    Converged,
    MaxGenerations,
    MaxIterations,
    /// The Bayesian incumbent did not improve for `patience` iterations.
    NoImprovement,
    /// The wall-clock limit was exceeded at a checkpoint.
    TimeLimit,
}

/// Statistics recorded at every generation or iteration boundary.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct CheckpointStats {
    pub kind: SearchKind,
    /// Generation or iteration number, starting at 0.
    pub index: usize,
    pub best_fitness: f64,
    pub mean_fitness: f64,
    pub worst_fitness: f64,
    /// Best fitness seen since the run started.
    pub best_ever_fitness: f64,
    pub best_parameters: ParameterSet,
    /// Real (expensive) evaluations performed so far.
    pub evaluations: usize,
    pub elapsed_secs: f64,
}

/// Final output of a search. Immutable once built.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OptimizationResult {
    optimized_parameters: ParameterSet,
    final_metrics: performance::PerformanceMetrics,
    behavior_score: behavior::BehaviorScore,
    fitness: f64,
    history: Vec<CheckpointStats>,
    evaluations: Vec<fitness::Evaluation>,
    real_evaluations: usize,
    termination: TerminationReason,
}

impl OptimizationResult {
    pub(crate) fn new(
        best: &fitness::Evaluation,
        history: Vec<CheckpointStats>,
        evaluations: Vec<fitness::Evaluation>,
        real_evaluations: usize,
        termination: TerminationReason,
    ) -> Self {
        Self {
            optimized_parameters: best.parameters.clone(),
            final_metrics: best.metrics.clone(),
            behavior_score: best.behavior,
            fitness: best.fitness,
            history,
            evaluations,
            real_evaluations,
            termination,
        }
    }

    /// --- Getters ---
    pub fn get_optimized_parameters(&self) -> &ParameterSet {
        &self.optimized_parameters
    }

    pub fn get_final_metrics(&self) -> &performance::PerformanceMetrics {
        &self.final_metrics
    }

    pub fn get_behavior_score(&self) -> &behavior::BehaviorScore {
        &self.behavior_score
    }

    pub fn get_fitness(&self) -> f64 {
        self.fitness
    }

    /// One entry per generation or iteration.
    pub fn get_history(&self) -> &[CheckpointStats] {
        &self.history
    }

    /// Every real evaluation, in the order it was performed.
    pub fn get_evaluations(&self) -> &[fitness::Evaluation] {
        &self.evaluations
    }

    pub fn get_real_evaluations(&self) -> usize {
        self.real_evaluations
    }

    pub fn get_termination(&self) -> TerminationReason {
        self.termination
    }
}

/// Mean, best and worst of the finite fitness values. Failed members are skipped.
pub(crate) fn calculate_stats(values: &[f64]) -> (f64, f64, f64) {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return (fitness::WORST_FITNESS, fitness::WORST_FITNESS, fitness::WORST_FITNESS);
    }

    let mut sums = [0.0; 4];
    let mut mins = [f64::INFINITY; 4];
    let mut maxs = [f64::NEG_INFINITY; 4];

    let chunks = finite.chunks_exact(4);
    let remainder = chunks.remainder();

    for chunk in chunks {
        for i in 0..4 {
            sums[i] += chunk[i];
            mins[i] = mins[i].min(chunk[i]);
            maxs[i] = maxs[i].max(chunk[i]);
        }
    }

    for (i, &value) in remainder.iter().enumerate() {
        sums[i] += value;
        mins[i] = mins[i].min(value);
        maxs[i] = maxs[i].max(value);
    }

    let total_sum: f64 = sums.iter().sum();
    let global_min = mins.iter().fold(f64::INFINITY, |a, &b| a.min(b));
    let global_max = maxs.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));

    (total_sum / finite.len() as f64, global_max, global_min)
}

/// Index of the highest-fitness evaluation; ties keep the earliest.
pub(crate) fn best_index(evaluations: &[fitness::Evaluation]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, e) in evaluations.iter().enumerate() {
        match best {
            Some(b) if evaluations[b].fitness >= e.fitness => {}
            _ => best = Some(i),
        }
    }
    best
}

/// Error returned when no member of a run produced a usable evaluation.
pub(crate) fn all_failed_error(evaluations: &[fitness::Evaluation]) -> crate::error::TunerError {
    let last_error = evaluations
        .iter()
        .rev()
        .find_map(|e| e.error.clone())
        .unwrap_or_else(|| "no evaluations were performed".to_string());
    crate::error::TunerError::Simulation(format!(
        "all {} evaluations failed; last error: {}",
        evaluations.len(),
        last_error
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluation(fitness: f64) -> fitness::Evaluation {
        fitness::Evaluation {
            parameters: ParameterSet::new().with_value("x", fitness),
            metrics: performance::PerformanceMetrics::default(),
            behavior: behavior::BehaviorScore::default(),
            fitness,
            error: None,
        }
    }

    #[test]
    fn test_stats_skip_failed_members() {
        let values = [1.0, 2.0, fitness::WORST_FITNESS, 3.0, 4.0, 5.0];
        let (mean, best, worst) = calculate_stats(&values);
        assert!((mean - 3.0).abs() < 1e-12);
        assert_eq!(best, 5.0);
        assert_eq!(worst, 1.0);
    }

    #[test]
    fn test_stats_of_all_failed_population() {
        let (mean, best, worst) = calculate_stats(&[fitness::WORST_FITNESS; 3]);
        assert_eq!(mean, fitness::WORST_FITNESS);
        assert_eq!(best, fitness::WORST_FITNESS);
        assert_eq!(worst, fitness::WORST_FITNESS);
    }

    #[test]
    fn test_best_index_prefers_first_of_ties() {
        let evaluations = vec![
            evaluation(1.0),
            evaluation(3.0),
            evaluation(3.0),
            evaluation(fitness::WORST_FITNESS),
        ];
        assert_eq!(best_index(&evaluations), Some(1));
        assert_eq!(best_index(&[]), None);

        let failed = vec![evaluation(fitness::WORST_FITNESS)];
        assert_eq!(best_index(&failed), Some(0));
    }
}

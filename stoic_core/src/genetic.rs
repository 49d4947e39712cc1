// stoic_core/src/genetic.rs

//! Genetic search over continuous parameter bounds.
//!
//! Each generation is evaluated as one parallel batch on the orchestrator's
//! worker pool; selection, crossover and mutation run on the control thread
//! with a seeded RNG, so a fixed seed reproduces the whole run. Fitness
//! values are cached by the exact bits of the parameter set: elites and
//! duplicate children are never evaluated twice.

use rand::distributions::Distribution;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use tracing::{debug, info};

use crate::error::{TunerError, TunerResult};
use crate::fitness;
use crate::optimization::{self, CheckpointStats, OptimizationResult, SearchKind, TerminationReason};
use crate::parameters::{ParameterBounds, ParameterSet};
use crate::progress::{ProgressReporter, TracingProgress};
use crate::settings;
use crate::surrogate::{Sample, SurrogateConfig, SurrogatePredictor};
use crate::trade::Trade;

/// How parents are picked for recombination.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(deny_unknown_fields)]
pub enum SelectionMethod {
    /// Best of `size` uniformly drawn members.
    Tournament { size: usize },
    /// Fitness-proportional selection, shifted so the worst finite member
    /// has a small positive weight.
    Roulette,
}

impl Default for SelectionMethod {
    fn default() -> Self {
        SelectionMethod::Tournament { size: 2 }
    }
}

/// Configuration for the genetic search.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneticConfig {
    population_size: usize,
    max_generations: usize,
    convergence_threshold: f64,
    mutation_rate: f64,
    mutation_scale: f64,
    elite_count: usize,
    selection: SelectionMethod,
    seed: u64,
    threads: Option<usize>,
    max_duration: Option<std::time::Duration>,
    surrogate_oversample: usize,
    surrogate: SurrogateConfig,
}

impl Default for GeneticConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl GeneticConfig {
    pub fn new() -> Self {
        Self {
            population_size: 50,
            max_generations: 100,
            convergence_threshold: 1e-4,
            mutation_rate: 0.1,
            mutation_scale: 0.1,
            elite_count: 1,
            selection: SelectionMethod::default(),
            seed: 42,
            threads: None,
            max_duration: None,
            surrogate_oversample: 1,
            surrogate: SurrogateConfig::default(),
        }
    }

    /// Creates a GeneticConfig from the settings file sections.
    pub fn from_settings(
        ga_params: &settings::GAParams,
        common: &settings::CommonSettings,
    ) -> Self {
        Self {
            population_size: ga_params.population_size,
            max_generations: ga_params.max_generations,
            convergence_threshold: ga_params.convergence_threshold,
            mutation_rate: ga_params.mutation_rate,
            mutation_scale: ga_params.mutation_scale,
            elite_count: ga_params.elite_count,
            selection: ga_params.selection,
            seed: common.seed,
            threads: common.threads,
            max_duration: common.max_duration_secs.map(std::time::Duration::from_secs),
            surrogate_oversample: ga_params.surrogate_oversample,
            surrogate: ga_params.surrogate,
        }
    }

    pub fn with_population_size(mut self, value: usize) -> Self {
        self.population_size = value;
        self
    }

    pub fn with_max_generations(mut self, value: usize) -> Self {
        self.max_generations = value;
        self
    }

    pub fn with_convergence_threshold(mut self, value: f64) -> Self {
        self.convergence_threshold = value;
        self
    }

    pub fn with_mutation_rate(mut self, value: f64) -> Self {
        self.mutation_rate = value;
        self
    }

    /// Sets the mutation standard deviation as a fraction of each bound's width.
    pub fn with_mutation_scale(mut self, value: f64) -> Self {
        self.mutation_scale = value;
        self
    }

    pub fn with_elite_count(mut self, value: usize) -> Self {
        self.elite_count = value;
        self
    }

    pub fn with_selection(mut self, selection: SelectionMethod) -> Self {
        self.selection = selection;
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

    /// Wall-clock limit, checked between generations.
    pub fn with_max_duration(mut self, limit: Option<std::time::Duration>) -> Self {
        self.max_duration = limit;
        self
    }

    /// Generates `factor` times the needed offspring and lets the surrogate
    /// pick the most promising.
    pub fn with_surrogate_oversample(mut self, factor: usize) -> Self {
        self.surrogate_oversample = factor;
        self
    }

    pub fn with_surrogate_config(mut self, config: SurrogateConfig) -> Self {
        self.surrogate = config;
        self
    }

    /// --- Getters ---
    pub fn get_population_size(&self) -> usize {
        self.population_size
    }

    pub fn get_max_generations(&self) -> usize {
        self.max_generations
    }

    pub fn get_seed(&self) -> u64 {
        self.seed
    }

    pub fn get_selection(&self) -> SelectionMethod {
        self.selection
    }

    pub fn validate(&self) -> TunerResult<()> {
        if self.population_size == 0 {
            return Err(TunerError::config("population_size must be greater than 0"));
        }
        if self.max_generations == 0 {
            return Err(TunerError::config("max_generations must be greater than 0"));
        }
        if !(0.0..=1.0).contains(&self.mutation_rate) {
            return Err(TunerError::config(format!(
                "mutation_rate must be in [0, 1], got {}",
                self.mutation_rate
            )));
        }
        if !self.mutation_scale.is_finite() || self.mutation_scale < 0.0 {
            return Err(TunerError::config(format!(
                "mutation_scale must be a finite non-negative number, got {}",
                self.mutation_scale
            )));
        }
        if !self.convergence_threshold.is_finite() || self.convergence_threshold < 0.0 {
            return Err(TunerError::config(format!(
                "convergence_threshold must be a finite non-negative number, got {}",
                self.convergence_threshold
            )));
        }
        if self.elite_count > self.population_size {
            return Err(TunerError::config(format!(
                "elite_count ({}) cannot exceed population_size ({})",
                self.elite_count, self.population_size
            )));
        }
        if let SelectionMethod::Tournament { size } = self.selection {
            if size == 0 {
                return Err(TunerError::config("tournament size must be greater than 0"));
            }
        }
        if self.surrogate_oversample == 0 {
            return Err(TunerError::config("surrogate_oversample must be at least 1"));
        }
        if self.surrogate_oversample > 1 {
            self.surrogate.validate()?;
        }
        Ok(())
    }
}

/// Runs the genetic search. Owns its worker pool and fitness cache.
pub struct GeneticSearchOrchestrator {
    config: GeneticConfig,
    bounds: ParameterBounds,
    fitness_function: fitness::FitnessFunction,
    pool: rayon::ThreadPool,
    chromosome_bank: std::collections::HashMap<u64, fitness::Evaluation>,
    surrogate: Option<SurrogatePredictor>,
}

impl GeneticSearchOrchestrator {
    /// Validates everything up front; no search starts with a bad configuration.
    pub fn new(
        config: GeneticConfig,
        bounds: ParameterBounds,
        fitness_function: fitness::FitnessFunction,
    ) -> TunerResult<Self> {
        config.validate()?;
        fitness_function.validate()?;
        let pool = fitness::build_worker_pool(config.threads)?;
        let surrogate =
            (config.surrogate_oversample > 1).then(|| SurrogatePredictor::new(config.surrogate));

        Ok(Self {
            config,
            bounds,
            fitness_function,
            pool,
            chromosome_bank: std::collections::HashMap::new(),
            surrogate,
        })
    }

    pub fn get_config(&self) -> &GeneticConfig {
        &self.config
    }

    pub fn get_bounds(&self) -> &ParameterBounds {
        &self.bounds
    }

    /// Runs the search, logging every generation through `tracing`.
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
        let noise = statrs::distribution::Normal::new(0.0, 1.0)
            .map_err(|e| TunerError::config(format!("invalid mutation distribution: {}", e)))?;

        self.chromosome_bank.clear();
        let mut evaluations: Vec<fitness::Evaluation> = Vec::new();
        let mut history: Vec<CheckpointStats> = Vec::new();
        let mut best_ever: Option<fitness::Evaluation> = None;
        let mut termination = TerminationReason::MaxGenerations;

        let mut population: Vec<ParameterSet> = (0..self.config.population_size)
            .map(|_| self.bounds.sample_uniform(&mut rng))
            .collect();

        for gen_idx in 0..self.config.max_generations {
            let results = self.evaluate_population(trades, &population, &mut evaluations);

            let generation_best = optimization::best_index(&results);
            if let Some(idx) = generation_best {
                if best_ever.as_ref().is_none_or(|b| results[idx].fitness > b.fitness) {
                    best_ever = Some(results[idx].clone());
                }
            }

            let fitness_values: Vec<f64> = results.iter().map(|e| e.fitness).collect();
            let (mean_fitness, best_fitness, worst_fitness) =
                optimization::calculate_stats(&fitness_values);

            let stat = CheckpointStats {
                kind: SearchKind::Genetic,
                index: gen_idx,
                best_fitness,
                mean_fitness,
                worst_fitness,
                best_ever_fitness: best_ever.as_ref().map_or(fitness::WORST_FITNESS, |b| b.fitness),
                best_parameters: generation_best
                    .map(|idx| results[idx].parameters.clone())
                    .unwrap_or_default(),
                evaluations: evaluations.len(),
                elapsed_secs: start_time.elapsed().as_secs_f64(),
            };
            progress.on_checkpoint(&stat);
            history.push(stat);

            if best_fitness.is_finite()
                && best_fitness - mean_fitness < self.config.convergence_threshold
            {
                termination = TerminationReason::Converged;
                break;
            }
            if gen_idx + 1 == self.config.max_generations {
                break;
            }
            if let Some(limit) = self.config.max_duration {
                if start_time.elapsed() >= limit {
                    termination = TerminationReason::TimeLimit;
                    break;
                }
            }

            population = self.next_generation(&results, &evaluations, &mut rng, &noise);
        }

        let best = best_ever
            .filter(|b| !b.is_failed())
            .ok_or_else(|| optimization::all_failed_error(&evaluations))?;

        info!(
            "Genetic search finished ({:?}) after {} generations: best fitness {:.4} for {}",
            termination,
            history.len(),
            best.fitness,
            best.parameters.format_for_display()
        );

        let real_evaluations = evaluations.len();
        Ok(OptimizationResult::new(&best, history, evaluations, real_evaluations, termination))
    }

    /// Evaluates every member not yet in the bank as one parallel batch,
    /// then answers the whole population from the bank in population order.
    fn evaluate_population(
        &mut self,
        trades: &[Trade],
        population: &[ParameterSet],
        evaluations: &mut Vec<fitness::Evaluation>,
    ) -> Vec<fitness::Evaluation> {
        let mut pending = std::collections::HashSet::new();
        let misses: Vec<ParameterSet> = population
            .iter()
            .filter(|params| {
                let hash = params.cache_key();
                !self.chromosome_bank.contains_key(&hash) && pending.insert(hash)
            })
            .cloned()
            .collect();

        debug!(
            "{} of {} members need evaluation ({} cached)",
            misses.len(),
            population.len(),
            population.len() - misses.len()
        );

        let fresh = self.fitness_function.evaluate_batch(&self.pool, trades, &misses);
        for evaluation in fresh {
            self.chromosome_bank.insert(evaluation.parameters.cache_key(), evaluation.clone());
            evaluations.push(evaluation);
        }

        population
            .iter()
            .map(|params| self.chromosome_bank[&params.cache_key()].clone())
            .collect()
    }

    /// Builds the next population: elites first, then recombined and mutated offspring.
    fn next_generation(
        &mut self,
        results: &[fitness::Evaluation],
        evaluations: &[fitness::Evaluation],
        rng: &mut StdRng,
        noise: &statrs::distribution::Normal,
    ) -> Vec<ParameterSet> {
        let population_size = self.config.population_size;
        let mut ranked: Vec<usize> = (0..results.len()).collect();
        ranked.sort_by(|&a, &b| {
            results[b].fitness
                .partial_cmp(&results[a].fitness)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });

        let mut next_gen: Vec<ParameterSet> = ranked
            .iter()
            .take(self.config.elite_count)
            .map(|&idx| results[idx].parameters.clone())
            .collect();

        let needed = population_size - next_gen.len();
        let oversample = if self.surrogate.is_some() {
            self.config.surrogate_oversample
        } else {
            1
        };

        let offspring: Vec<ParameterSet> = (0..needed * oversample)
            .map(|_| {
                let parent_a = self.choose_parent(results, rng);
                let parent_b = self.choose_parent(results, rng);
                let child = self.crossover(
                    &results[parent_a].parameters,
                    &results[parent_b].parameters,
                    rng,
                );
                self.mutate(&child, rng, noise)
            })
            .collect();

        if oversample > 1 {
            next_gen.extend(self.prescreen(offspring, evaluations, needed));
        } else {
            next_gen.extend(offspring);
        }

        next_gen
    }

    /// Keeps the `needed` offspring the surrogate ranks highest.
    /// Falls back to generation order while the surrogate is not fitted.
    fn prescreen(
        &mut self,
        offspring: Vec<ParameterSet>,
        evaluations: &[fitness::Evaluation],
        needed: usize,
    ) -> Vec<ParameterSet> {
        let Some(surrogate) = self.surrogate.as_mut() else {
            return offspring.into_iter().take(needed).collect();
        };

        let samples: Vec<Sample> = evaluations
            .iter()
            .filter(|e| !e.is_failed())
            .map(|e| Sample::new(self.bounds.normalize(&e.parameters), e.fitness))
            .collect();
        surrogate.train(&samples);

        if !surrogate.is_fitted() {
            return offspring.into_iter().take(needed).collect();
        }

        let features: Vec<Vec<f64>> = offspring.iter().map(|p| self.bounds.normalize(p)).collect();
        let predictions = surrogate.predict_batch(&features);

        let mut order: Vec<usize> = (0..offspring.len()).collect();
        order.sort_by(|&a, &b| {
            predictions[b].mean
                .partial_cmp(&predictions[a].mean)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });

        let mut slots: Vec<Option<ParameterSet>> = offspring.into_iter().map(Some).collect();
        order
            .into_iter()
            .take(needed)
            .filter_map(|idx| slots[idx].take())
            .collect()
    }

    /// Returns the index of the selected parent.
    fn choose_parent(&self, results: &[fitness::Evaluation], rng: &mut StdRng) -> usize {
        match self.config.selection {
            SelectionMethod::Tournament { size } => {
                let mut winner = rng.gen_range(0..results.len());
                for _ in 1..size {
                    let challenger = rng.gen_range(0..results.len());
                    if results[challenger].fitness > results[winner].fitness {
                        winner = challenger;
                    }
                }
                winner
            }
            SelectionMethod::Roulette => roulette_pick(results, rng),
        }
    }

    /// Uniform crossover: each parameter comes from either parent with p = 0.5.
    fn crossover(&self, a: &ParameterSet, b: &ParameterSet, rng: &mut StdRng) -> ParameterSet {
        let mut child = ParameterSet::new();
        for (name, bound) in self.bounds.iter() {
            let (first, second) = if rng.gen_bool(0.5) { (a, b) } else { (b, a) };
            let value = first.get(name).or_else(|| second.get(name)).unwrap_or(bound.min);
            child.set(name, value);
        }
        child
    }

    /// Gaussian mutation scaled to each bound's width, clamped back into bounds.
    fn mutate(
        &self,
        params: &ParameterSet,
        rng: &mut StdRng,
        noise: &statrs::distribution::Normal,
    ) -> ParameterSet {
        let mut mutated = params.clone();
        for (name, bound) in self.bounds.iter() {
            if self.config.mutation_rate > 0.0 && rng.gen_bool(self.config.mutation_rate) {
                let sigma = self.config.mutation_scale * bound.width();
                let value = mutated.get(name).unwrap_or(bound.min) + noise.sample(rng) * sigma;
                mutated.set(name, value);
            }
        }
        self.bounds.clamp(&mutated)
    }
}

fn roulette_pick(results: &[fitness::Evaluation], rng: &mut StdRng) -> usize {
    let floor = results
        .iter()
        .map(|e| e.fitness)
        .filter(|f| f.is_finite())
        .fold(f64::INFINITY, f64::min);

    let weights: Vec<f64> = results
        .iter()
        .map(|e| if e.fitness.is_finite() { e.fitness - floor + 1e-9 } else { 0.0 })
        .collect();
    let total: f64 = weights.iter().sum();

    if !(total > 0.0) || !total.is_finite() {
        return rng.gen_range(0..results.len());
    }

    let mut target = rng.gen_range(0.0..total);
    for (idx, weight) in weights.iter().enumerate() {
        if target < *weight {
            return idx;
        }
        target -= weight;
    }
    weights.iter().rposition(|w| *w > 0.0).unwrap_or(0)
}

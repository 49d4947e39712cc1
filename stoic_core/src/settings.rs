// stoic_core/src/settings.rs

//! Configuration structures for the optimizer.
//! Loads settings from JSON files and validates them before any search starts.

use serde::Deserialize;

use crate::bayesian;
use crate::behavior;
use crate::error::{TunerError, TunerResult};
use crate::fitness;
use crate::genetic;
use crate::parameters;
use crate::surrogate;

/// Type of optimizer to use.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub enum OptimizerType {
    #[serde(rename = "Genetic")]
    Genetic { ga_params: GAParams },
    #[serde(rename = "Bayesian")]
    Bayesian { bo_params: BOParams },
}

/// Parameters for the genetic search.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct GAParams {
    pub population_size: usize,
    pub max_generations: usize,
    #[serde(default = "default_convergence_threshold")]
    pub convergence_threshold: f64,
    pub mutation_rate: f64,
    #[serde(default = "default_mutation_scale")]
    pub mutation_scale: f64,
    #[serde(default = "default_elite_count")]
    pub elite_count: usize,
    #[serde(default)]
    pub selection: genetic::SelectionMethod,
    #[serde(default = "default_surrogate_oversample")]
    pub surrogate_oversample: usize,
    #[serde(default)]
    pub surrogate: surrogate::SurrogateConfig,
}

/// Parameters for the Bayesian search.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct BOParams {
    pub max_iterations: usize,
    pub initial_points: usize,
    #[serde(default)]
    pub patience: Option<usize>,
    #[serde(default = "default_candidate_pool")]
    pub candidate_pool: usize,
    #[serde(default = "default_xi")]
    pub xi: f64,
    #[serde(default)]
    pub surrogate: surrogate::SurrogateConfig,
}

/// Settings shared by both optimizers.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct CommonSettings {
    #[serde(default)]
    pub threads: Option<usize>,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_behavior_penalty_weight")]
    pub behavior_penalty_weight: f64,
    #[serde(default)]
    pub fomo_penalty_weight: f64,
    #[serde(default = "default_min_trades")]
    pub min_trades: usize,
    #[serde(default)]
    pub fitness_value: fitness::FitnessValue,
    #[serde(default)]
    pub max_duration_secs: Option<u64>,
    #[serde(default)]
    pub behavior_thresholds: behavior::BehaviorThresholds,
}

/// Top-level settings structure.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub common: CommonSettings,

    #[serde(deserialize_with = "deserialize_parameter_bounds")]
    pub parameter_bounds: std::collections::BTreeMap<String, parameters::ParameterBound>,

    pub optimizer_type: OptimizerType,
}

impl Settings {
    /// Loads and validates settings from a JSON file.
    pub fn load<P: AsRef<std::path::Path>>(settings_file_path: P) -> TunerResult<Self> {
        let contents = std::fs::read_to_string(settings_file_path)?;
        Self::from_json_str(&contents)
    }

    /// Parses and validates settings from a JSON string.
    pub fn from_json_str(contents: &str) -> TunerResult<Self> {
        let mut settings: Settings = serde_json::from_str(contents)?;
        check_args(&mut settings)?;
        Ok(settings)
    }

    /// Validated parameter bounds.
    pub fn get_parameter_bounds(&self) -> TunerResult<parameters::ParameterBounds> {
        parameters::ParameterBounds::new(self.parameter_bounds.clone())
    }

    /// Fitness function built from the common section, using the default replay simulator.
    pub fn build_fitness_function(&self) -> fitness::FitnessFunction {
        fitness::FitnessFunction::new()
            .with_fitness_value(self.common.fitness_value.clone())
            .with_behavior_penalty_weight(self.common.behavior_penalty_weight)
            .with_fomo_penalty_weight(self.common.fomo_penalty_weight)
            .with_min_trades(self.common.min_trades)
            .with_behavior_scorer(
                behavior::TradeBehaviorScorer::new()
                    .with_thresholds(self.common.behavior_thresholds),
            )
    }
}

fn check_args(settings: &mut Settings) -> TunerResult<()> {
    // check threads
    {
        if let Some(threads) = settings.common.threads {
            if threads == 0 {
                return Err(TunerError::config("'threads' cannot be zero"));
            }
            let available_threads = num_cpus::get().max(1);
            if threads > available_threads {
                settings.common.threads = Some(available_threads);
            }
        }
    }

    // check bounds
    settings.get_parameter_bounds()?;

    // check fitness
    settings.build_fitness_function().validate()?;

    // check optimizer type
    {
        match &settings.optimizer_type {
            OptimizerType::Genetic { ga_params } => {
                genetic::GeneticConfig::from_settings(ga_params, &settings.common).validate()?;
            }
            OptimizerType::Bayesian { bo_params } => {
                bayesian::BayesianConfig::from_settings(bo_params, &settings.common).validate()?;
            }
        }
    }

    // check time limit
    {
        if settings.common.max_duration_secs == Some(0) {
            return Err(TunerError::config("'max_duration_secs' must be greater than 0 when set"));
        }
    }

    Ok(())
}

fn default_seed() -> u64 {
    42
}

fn default_behavior_penalty_weight() -> f64 {
    1.0
}

fn default_min_trades() -> usize {
    2
}

fn default_convergence_threshold() -> f64 {
    1e-4
}

fn default_mutation_scale() -> f64 {
    0.1
}

fn default_elite_count() -> usize {
    1
}

fn default_surrogate_oversample() -> usize {
    1
}

fn default_candidate_pool() -> usize {
    256
}

fn default_xi() -> f64 {
    0.01
}

// --- Deserialization Helpers ---

/// Deserializes parameter bounds written either as `{"min": a, "max": b}` or as `[a, b]`.
fn deserialize_parameter_bounds<'de, D>(
    deserializer: D,
) -> Result<std::collections::BTreeMap<String, parameters::ParameterBound>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum RawBound {
        Range { min: f64, max: f64 },
        Pair(f64, f64),
    }

    let raw_map: std::collections::BTreeMap<String, RawBound> =
        std::collections::BTreeMap::deserialize(deserializer)?;

    Ok(raw_map
        .into_iter()
        .map(|(name, raw)| {
            let bound = match raw {
                RawBound::Range { min, max } => parameters::ParameterBound::new(min, max),
                RawBound::Pair(min, max) => parameters::ParameterBound::new(min, max),
            };
            (name, bound)
        })
        .collect())
}

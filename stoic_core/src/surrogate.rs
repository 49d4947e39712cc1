// stoic_core/src/surrogate.rs

//! Surrogate model: an ensemble of independently configured random forests
//! that approximates the expensive fitness evaluation.
//!
//! Every call to `train` discards the previous members and refits all of
//! them on the full sample set. Predictions average the members with equal
//! weight; the spread between members serves as the uncertainty estimate.
//! Below `min_samples`, or after a failed fit, the predictor answers with the
//! best observed target instead of extrapolating.

use smartcore::ensemble::random_forest_regressor::{
    RandomForestRegressor, RandomForestRegressorParameters,
};
use smartcore::linalg::basic::matrix::DenseMatrix;
use tracing::{debug, warn};

use crate::error::{TunerError, TunerResult};

type Forest = RandomForestRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

/// One observed (features, target) pair.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Sample {
    pub features: Vec<f64>,
    pub target: f64,
}

impl Sample {
    pub fn new(features: Vec<f64>, target: f64) -> Self {
        Self { features, target }
    }
}

/// Mean prediction and the standard deviation across ensemble members.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub mean: f64,
    pub std: f64,
}

/// Ensemble configuration.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SurrogateConfig {
    /// Number of regressors in the ensemble.
    pub members: usize,
    /// Fewer samples than this fall back to the best observed target.
    pub min_samples: usize,
    pub seed: u64,
}

impl Default for SurrogateConfig {
    fn default() -> Self {
        Self { members: 5, min_samples: 10, seed: 42 }
    }
}

impl SurrogateConfig {
    pub fn validate(&self) -> TunerResult<()> {
        if self.members == 0 {
            return Err(TunerError::config("surrogate members must be greater than 0"));
        }
        if self.min_samples < 2 {
            return Err(TunerError::config("surrogate min_samples must be at least 2"));
        }
        Ok(())
    }
}

/// Hyperparameters of a single ensemble member.
#[derive(Debug, Clone, Copy, PartialEq)]
struct MemberConfig {
    n_trees: usize,
    max_depth: u16,
    min_samples_split: usize,
    seed: u64,
}

fn member_configs(config: &SurrogateConfig) -> Vec<MemberConfig> {
    (0..config.members)
        .map(|i| MemberConfig {
            n_trees: 16 + 8 * (i % 4),
            max_depth: 3 + (i % 5) as u16,
            min_samples_split: 2 + i % 3,
            seed: config.seed.wrapping_add(7919 * i as u64),
        })
        .collect()
}

#[derive(serde::Serialize, serde::Deserialize)]
pub struct SurrogatePredictor {
    config: SurrogateConfig,
    members: Vec<Forest>,
    best_observed: Option<f64>,
    target_spread: f64,
    sample_count: usize,
    feature_count: usize,
}

impl std::fmt::Debug for SurrogatePredictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurrogatePredictor")
            .field("config", &self.config)
            .field("members", &self.members.len())
            .field("best_observed", &self.best_observed)
            .field("sample_count", &self.sample_count)
            .finish()
    }
}

impl SurrogatePredictor {
    pub fn new(config: SurrogateConfig) -> Self {
        Self {
            config,
            members: Vec::new(),
            best_observed: None,
            target_spread: 0.0,
            sample_count: 0,
            feature_count: 0,
        }
    }

    pub fn get_config(&self) -> &SurrogateConfig {
        &self.config
    }

    /// True when the ensemble is trained and predictions come from the models.
    pub fn is_fitted(&self) -> bool {
        !self.members.is_empty()
    }

    pub fn get_sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn get_best_observed(&self) -> Option<f64> {
        self.best_observed
    }

    /// Refits every member from scratch on `samples`.
    /// Samples with non-finite values or a mismatched feature count are ignored.
    /// Training failures are logged and leave the predictor in fallback mode.
    pub fn train(&mut self, samples: &[Sample]) {
        self.train_with(samples, Self::fit_members);
    }

    fn train_with<F>(&mut self, samples: &[Sample], fit: F)
    where
        F: FnOnce(&Self, &[&Sample]) -> TunerResult<Vec<Forest>>,
    {
        self.members.clear();

        let feature_count = samples.first().map(|s| s.features.len()).unwrap_or(0);
        let usable: Vec<&Sample> = samples
            .iter()
            .filter(|s| {
                s.target.is_finite()
                    && s.features.len() == feature_count
                    && s.features.iter().all(|v| v.is_finite())
            })
            .collect();

        self.sample_count = usable.len();
        self.feature_count = feature_count;
        self.best_observed = usable.iter().map(|s| s.target).reduce(f64::max);
        self.target_spread = spread(usable.iter().map(|s| s.target));

        if usable.len() < self.config.min_samples || feature_count == 0 {
            debug!(
                "Surrogate has {} usable samples (minimum {}); using best observed target",
                usable.len(),
                self.config.min_samples
            );
            return;
        }

        match fit(self, &usable) {
            Ok(members) => self.members = members,
            Err(e) => warn!("{}; falling back to best observed target", e),
        }
    }

    fn fit_members(&self, samples: &[&Sample]) -> TunerResult<Vec<Forest>> {
        let rows: Vec<Vec<f64>> = samples.iter().map(|s| s.features.clone()).collect();
        let targets: Vec<f64> = samples.iter().map(|s| s.target).collect();
        let x = DenseMatrix::from_2d_vec(&rows)
            .map_err(|e| TunerError::ModelTraining(format!("matrix creation failed: {}", e)))?;

        let m = ((self.feature_count as f64 * 0.6).ceil() as usize).clamp(1, self.feature_count);

        member_configs(&self.config)
            .into_iter()
            .map(|member| {
                let params = RandomForestRegressorParameters::default()
                    .with_n_trees(member.n_trees)
                    .with_max_depth(member.max_depth)
                    .with_min_samples_split(member.min_samples_split)
                    .with_m(m)
                    .with_seed(member.seed);
                RandomForestRegressor::fit(&x, &targets, params)
                    .map_err(|e| TunerError::ModelTraining(e.to_string()))
            })
            .collect()
    }

    fn fallback(&self) -> Prediction {
        Prediction {
            mean: self.best_observed.unwrap_or(0.0),
            std: self.target_spread,
        }
    }

    /// Equal-weight ensemble prediction for a single feature vector.
    pub fn predict(&self, features: &[f64]) -> f64 {
        self.predict_with_uncertainty(features).mean
    }

    pub fn predict_with_uncertainty(&self, features: &[f64]) -> Prediction {
        self.predict_batch(&[features.to_vec()])
            .into_iter()
            .next()
            .unwrap_or_else(|| self.fallback())
    }

    /// Predicts many feature vectors with one matrix per member.
    pub fn predict_batch(&self, features: &[Vec<f64>]) -> Vec<Prediction> {
        if features.is_empty() {
            return Vec::new();
        }
        if !self.is_fitted() || features.iter().any(|f| f.len() != self.feature_count) {
            return vec![self.fallback(); features.len()];
        }

        match self.member_outputs(features) {
            Ok(outputs) => (0..features.len())
                .map(|row| {
                    let values: Vec<f64> = outputs.iter().map(|member| member[row]).collect();
                    let mean = values.iter().sum::<f64>() / values.len() as f64;
                    Prediction { mean, std: spread(values.into_iter()) }
                })
                .collect(),
            Err(e) => {
                warn!("Surrogate prediction failed: {}; using best observed target", e);
                vec![self.fallback(); features.len()]
            }
        }
    }

    fn member_outputs(&self, features: &[Vec<f64>]) -> TunerResult<Vec<Vec<f64>>> {
        let x = DenseMatrix::from_2d_vec(&features.to_vec())
            .map_err(|e| TunerError::ModelTraining(format!("matrix creation failed: {}", e)))?;

        self.members
            .iter()
            .map(|model| {
                model
                    .predict(&x)
                    .map_err(|e| TunerError::ModelTraining(format!("prediction failed: {}", e)))
            })
            .collect()
    }

    /// Writes the trained ensemble as JSON. Called explicitly by the owner.
    pub fn save<W: std::io::Write>(&self, writer: W) -> TunerResult<()> {
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    /// Restores an ensemble written by `save`.
    pub fn load<R: std::io::Read>(reader: R) -> TunerResult<Self> {
        let predictor: Self = serde_json::from_reader(reader)?;
        predictor.config.validate()?;
        Ok(predictor)
    }
}

/// Samples mapping each successful evaluation's metric vector to its fitness.
/// A predictor trained on them scores metrics that have no trade list behind them.
pub fn fitness_samples(evaluations: &[crate::fitness::Evaluation]) -> Vec<Sample> {
    evaluations
        .iter()
        .filter(|e| !e.is_failed())
        .map(|e| Sample::new(e.metrics.feature_vector(), e.fitness))
        .collect()
}

/// Population standard deviation; 0 for fewer than two values.
fn spread<I: Iterator<Item = f64>>(values: I) -> f64 {
    let values: Vec<f64> = values.collect();
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_samples(n: usize) -> Vec<Sample> {
        (0..n)
            .map(|i| {
                let x = i as f64 / (n - 1) as f64;
                let z = ((i * 7) % n) as f64 / n as f64;
                Sample::new(vec![x, z], 10.0 * x)
            })
            .collect()
    }

    #[test]
    fn test_falls_back_below_minimum_samples() {
        let mut predictor = SurrogatePredictor::new(SurrogateConfig::default());
        let samples = vec![
            Sample::new(vec![0.1], 1.0),
            Sample::new(vec![0.5], 4.0),
            Sample::new(vec![0.9], 2.0),
        ];
        predictor.train(&samples);

        assert!(!predictor.is_fitted());
        assert_eq!(predictor.predict(&[0.3]), 4.0);
        assert_eq!(predictor.get_best_observed(), Some(4.0));
    }

    #[test]
    fn test_training_failure_falls_back_to_best_observed() {
        let mut predictor = SurrogatePredictor::new(SurrogateConfig::default());
        predictor.train(&linear_samples(20));
        assert!(predictor.is_fitted());

        predictor.train_with(&linear_samples(20), |_, _| {
            Err(TunerError::ModelTraining("singular split".to_string()))
        });

        assert!(!predictor.is_fitted());
        assert_eq!(predictor.get_sample_count(), 20);
        assert_eq!(predictor.predict(&[0.2, 0.7]), 10.0);
        assert_eq!(predictor.get_best_observed(), Some(10.0));
        assert!(predictor.predict_with_uncertainty(&[0.2, 0.7]).std > 0.0);
    }

    #[test]
    fn test_untrained_predictor_returns_zero() {
        let predictor = SurrogatePredictor::new(SurrogateConfig::default());
        assert_eq!(predictor.predict(&[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_learns_monotone_relationship() {
        let mut predictor = SurrogatePredictor::new(SurrogateConfig::default());
        predictor.train(&linear_samples(60));

        assert!(predictor.is_fitted());
        let low = predictor.predict(&[0.1, 0.5]);
        let high = predictor.predict(&[0.9, 0.5]);
        assert!(high > low, "expected {} > {}", high, low);

        let batch = predictor.predict_batch(&[vec![0.1, 0.5], vec![0.9, 0.5]]);
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(|p| p.std >= 0.0 && p.mean.is_finite()));
    }

    #[test]
    fn test_retraining_discards_previous_samples() {
        let mut predictor = SurrogatePredictor::new(SurrogateConfig::default());
        predictor.train(&linear_samples(30));
        assert_eq!(predictor.get_best_observed(), Some(10.0));

        let shifted: Vec<Sample> = linear_samples(30)
            .into_iter()
            .map(|s| Sample::new(s.features, s.target - 20.0))
            .collect();
        predictor.train(&shifted);
        assert_eq!(predictor.get_best_observed(), Some(-10.0));
        assert_eq!(predictor.get_sample_count(), 30);
    }

    #[test]
    fn test_non_finite_targets_are_ignored() {
        let mut predictor = SurrogatePredictor::new(SurrogateConfig::default());
        let mut samples = linear_samples(12);
        samples.push(Sample::new(vec![0.5, 0.5], f64::NEG_INFINITY));
        samples.push(Sample::new(vec![f64::NAN, 0.5], 3.0));
        predictor.train(&samples);

        assert_eq!(predictor.get_sample_count(), 12);
        assert!(predictor.is_fitted());
    }

    #[test]
    fn test_mismatched_features_use_fallback() {
        let mut predictor = SurrogatePredictor::new(SurrogateConfig::default());
        predictor.train(&linear_samples(20));
        assert_eq!(predictor.predict(&[0.5]), 10.0);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let config = SurrogateConfig { members: 2, ..Default::default() };
        let mut predictor = SurrogatePredictor::new(config);
        predictor.train(&linear_samples(20));

        let mut buffer = Vec::new();
        predictor.save(&mut buffer).unwrap();
        let restored = SurrogatePredictor::load(buffer.as_slice()).unwrap();

        assert!(restored.is_fitted());
        let point = [0.4, 0.2];
        assert!((restored.predict(&point) - predictor.predict(&point)).abs() < 1e-9);
    }

    #[test]
    fn test_config_validation() {
        assert!(SurrogateConfig::default().validate().is_ok());
        assert!(SurrogateConfig { members: 0, ..Default::default() }.validate().is_err());
        assert!(SurrogateConfig { min_samples: 1, ..Default::default() }.validate().is_err());
    }

    #[test]
    fn test_fitness_samples_skip_failed_evaluations() {
        use crate::fitness::Evaluation;
        use crate::parameters::ParameterSet;
        use crate::performance::PerformanceMetrics;

        let scored = Evaluation {
            parameters: ParameterSet::new(),
            metrics: PerformanceMetrics { total_return: 4.0, trade_count: 3, ..Default::default() },
            behavior: Default::default(),
            fitness: 3.5,
            error: None,
        };
        let error = TunerError::Simulation("broken".to_string());
        let failed = Evaluation::failed(ParameterSet::new(), &error);

        let samples = fitness_samples(&[scored.clone(), failed]);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].features, scored.metrics.feature_vector());
        assert_eq!(samples[0].target, 3.5);
    }
}

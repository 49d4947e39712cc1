// Stoic_1_0/src/optimizers.rs

//! Runs the configured search and writes its artifacts.

use anyhow::Context;
use tracing::info;

/// Result of one run plus anything worth persisting alongside it.
pub struct RunOutcome {
    pub result: stoic_core::optimization::OptimizationResult,
    pub surrogate: Option<stoic_core::surrogate::SurrogatePredictor>,
    /// Maps performance metrics to fitness, trained on every successful evaluation.
    pub fitness_model: stoic_core::surrogate::SurrogatePredictor,
}

/// Flat row of the evaluation log.
#[derive(Debug, serde::Serialize)]
struct EvaluationRow {
    index: usize,
    fitness: f64,
    parameters: String,
    total_return: f64,
    sharpe_ratio: f64,
    max_drawdown: f64,
    win_rate: f64,
    trade_count: usize,
    revenge_trading_score: f64,
    over_trading_score: f64,
    fomo_score: f64,
    error: String,
}

pub struct OptimizationRunner {
    settings: stoic_core::settings::Settings,
    bounds: stoic_core::parameters::ParameterBounds,
}

impl OptimizationRunner {
    pub fn new(settings: &stoic_core::settings::Settings) -> anyhow::Result<Self> {
        let bounds = settings.get_parameter_bounds()?;
        anyhow::Ok(Self { settings: settings.clone(), bounds })
    }

    pub fn run(&self, trades: &[stoic_core::trade::Trade]) -> anyhow::Result<RunOutcome> {
        let fitness_function = self.settings.build_fitness_function();

        match &self.settings.optimizer_type {
            stoic_core::settings::OptimizerType::Genetic { ga_params } => {
                let config = stoic_core::genetic::GeneticConfig::from_settings(
                    ga_params,
                    &self.settings.common,
                );
                info!(
                    "Starting genetic search: population {}, up to {} generations, {} parameters",
                    config.get_population_size(),
                    config.get_max_generations(),
                    self.bounds.len()
                );
                let mut search = stoic_core::genetic::GeneticSearchOrchestrator::new(
                    config,
                    self.bounds.clone(),
                    fitness_function,
                )?;
                let result = search.run(trades).context("Genetic search failed")?;
                let fitness_model = self.train_fitness_model(&result);
                anyhow::Ok(RunOutcome { result, surrogate: None, fitness_model })
            }
            stoic_core::settings::OptimizerType::Bayesian { bo_params } => {
                let config = stoic_core::bayesian::BayesianConfig::from_settings(
                    bo_params,
                    &self.settings.common,
                );
                info!(
                    "Starting Bayesian search: {} initial points, up to {} iterations, {} parameters",
                    config.get_initial_points(),
                    config.get_max_iterations(),
                    self.bounds.len()
                );
                let mut search = stoic_core::bayesian::BayesianSearchOrchestrator::new(
                    config,
                    self.bounds.clone(),
                    fitness_function,
                )?;
                let result = search.run(trades).context("Bayesian search failed")?;
                let fitness_model = self.train_fitness_model(&result);
                anyhow::Ok(RunOutcome {
                    result,
                    surrogate: Some(search.into_surrogate()),
                    fitness_model,
                })
            }
        }
    }

    fn train_fitness_model(
        &self,
        result: &stoic_core::optimization::OptimizationResult,
    ) -> stoic_core::surrogate::SurrogatePredictor {
        let config = stoic_core::surrogate::SurrogateConfig {
            seed: self.settings.common.seed,
            ..Default::default()
        };
        let mut model = stoic_core::surrogate::SurrogatePredictor::new(config);
        model.train(&stoic_core::surrogate::fitness_samples(result.get_evaluations()));
        model
    }

    /// Writes `optimization_result.json`, `report.txt`, `evaluations.csv`,
    /// `fitness_model.json` when the metrics model is fitted and, for Bayesian
    /// runs with a fitted model, `surrogate.json`.
    pub fn export(
        &self,
        output_dir: &std::path::Path,
        outcome: &RunOutcome,
        report: &stoic_core::report::OptimizationReport,
    ) -> anyhow::Result<()> {
        let normalized = output_dir.to_string_lossy();
        if normalized.trim_end_matches('/').is_empty() {
            anyhow::bail!("Output path cannot be empty!");
        }
        if !output_dir.exists() {
            std::fs::create_dir_all(output_dir)?;
        } else if !output_dir.is_dir() {
            anyhow::bail!("Output path {} is not a directory!", output_dir.display());
        }

        let result_path = output_dir.join("optimization_result.json");
        let summary = serde_json::json!({
            "result": &outcome.result,
            "report": report,
        });
        std::fs::write(&result_path, serde_json::to_string_pretty(&summary)?)
            .with_context(|| format!("Failed to write {}", result_path.display()))?;

        let report_path = output_dir.join("report.txt");
        std::fs::write(&report_path, report.render())
            .with_context(|| format!("Failed to write {}", report_path.display()))?;

        let log_path = output_dir.join("evaluations.csv");
        let mut wtr = csv::Writer::from_path(&log_path)
            .with_context(|| format!("Failed to create {}", log_path.display()))?;
        for (index, evaluation) in outcome.result.get_evaluations().iter().enumerate() {
            wtr.serialize(EvaluationRow {
                index,
                fitness: evaluation.fitness,
                parameters: evaluation.parameters.format_for_display(),
                total_return: evaluation.metrics.total_return,
                sharpe_ratio: evaluation.metrics.sharpe_ratio,
                max_drawdown: evaluation.metrics.max_drawdown,
                win_rate: evaluation.metrics.win_rate,
                trade_count: evaluation.metrics.trade_count,
                revenge_trading_score: evaluation.behavior.revenge_trading_score,
                over_trading_score: evaluation.behavior.over_trading_score,
                fomo_score: evaluation.behavior.fomo_score,
                error: evaluation.error.clone().unwrap_or_default(),
            })?;
        }
        wtr.flush()?;

        if outcome.fitness_model.is_fitted() {
            let model_path = output_dir.join("fitness_model.json");
            let file = std::fs::File::create(&model_path)
                .with_context(|| format!("Failed to create {}", model_path.display()))?;
            outcome.fitness_model.save(std::io::BufWriter::new(file))?;
        }

        if let Some(surrogate) = outcome.surrogate.as_ref().filter(|s| s.is_fitted()) {
            let surrogate_path = output_dir.join("surrogate.json");
            let file = std::fs::File::create(&surrogate_path)
                .with_context(|| format!("Failed to create {}", surrogate_path.display()))?;
            surrogate.save(std::io::BufWriter::new(file))?;
        }

        info!("Results written to {}", output_dir.display());
        anyhow::Ok(())
    }
}

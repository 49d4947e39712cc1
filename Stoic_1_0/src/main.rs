// Stoic_1_0/src/main.rs

mod cli;
mod optimizers;
mod data_loader;

use anyhow::Context;
use tracing::info;

fn init_tracing() {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let start_time = std::time::Instant::now();

    let args = cli::Args::parse();
    let settings = stoic_core::settings::Settings::load(&args.config)
        .with_context(|| format!("Settings validation failed for {}", args.config.display()))?;

    let trades = data_loader::load_trades(&args.trades)?;
    info!("Loaded {} trades from {}", trades.len(), args.trades.display());

    let optimization_runner = optimizers::OptimizationRunner::new(&settings)?;
    let outcome = optimization_runner.run(&trades)?;

    let baseline = match &args.baseline {
        Some(path) => {
            let baseline = data_loader::load_baseline(path)?;
            if outcome.fitness_model.is_fitted() {
                let estimate = outcome.fitness_model.predict(&baseline.feature_vector());
                info!("Estimated fitness of the baseline metrics: {:.4}", estimate);
            }
            baseline
        }
        None => stoic_core::performance::PerformanceEvaluator::new().evaluate(&trades),
    };
    let baseline_behavior = stoic_core::behavior::TradeBehaviorScorer::new()
        .with_thresholds(settings.common.behavior_thresholds)
        .score(&trades);

    let report = stoic_core::report::OptimizationReportBuilder::new()
        .with_behavior(baseline_behavior, *outcome.result.get_behavior_score())
        .build(&baseline, outcome.result.get_final_metrics());

    println!(
        "Optimized parameters: {}",
        outcome.result.get_optimized_parameters().format_for_display()
    );
    println!(
        "Fitness: {:.4} ({} real evaluations, stopped by {:?})",
        outcome.result.get_fitness(),
        outcome.result.get_real_evaluations(),
        outcome.result.get_termination()
    );
    println!("{}", report.render());

    if let Some(output_dir) = &args.output {
        optimization_runner.export(output_dir, &outcome, &report)?;
    }

    info!("Finished in {:.3} seconds", start_time.elapsed().as_secs_f64());
    anyhow::Ok(())
}

// stoic_core/src/progress.rs

//! Synchronous progress reporting at generation/iteration checkpoints.
//! The control loop calls the reporter on its own thread after every barrier.

use tracing::info;

use crate::optimization::{CheckpointStats, SearchKind};

pub trait ProgressReporter {
    fn on_checkpoint(&mut self, stats: &CheckpointStats);
}

/// Logs every checkpoint through `tracing`.
#[derive(Debug, Default)]
pub struct TracingProgress;

impl ProgressReporter for TracingProgress {
    fn on_checkpoint(&mut self, stats: &CheckpointStats) {
        let label = match stats.kind {
            SearchKind::Genetic => "Generation",
            SearchKind::Bayesian => "Iteration",
        };
        info!(
            "{} {}: Best Fitness= {:.4}, Mean Fitness= {:.4}, Worst Fitness= {:.4}, Best Ever= {:.4}, Evaluations= {}, Elapsed= {:.3}s",
            label,
            stats.index,
            stats.best_fitness,
            stats.mean_fitness,
            stats.worst_fitness,
            stats.best_ever_fitness,
            stats.evaluations,
            stats.elapsed_secs,
        );
    }
}

/// Discards progress.
#[derive(Debug, Default)]
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn on_checkpoint(&mut self, _stats: &CheckpointStats) {}
}

/// Keeps every checkpoint in memory; useful for callers rendering live charts.
#[derive(Debug, Default)]
pub struct CollectingProgress {
    pub checkpoints: Vec<CheckpointStats>,
}

impl ProgressReporter for CollectingProgress {
    fn on_checkpoint(&mut self, stats: &CheckpointStats) {
        self.checkpoints.push(stats.clone());
    }
}

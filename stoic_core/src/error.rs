// stoic_core/src/error.rs

//! Error kinds raised by the optimizer.
//! Configuration and data errors abort a run before any search starts.
//! Training and per-member evaluation errors are recovered where they happen.

/// Errors produced by the optimization engine.
#[derive(Debug, thiserror::Error)]
pub enum TunerError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Insufficient data: {metric} needs at least {required} trades, got {actual}")]
    InsufficientData {
        metric: String,
        required: usize,
        actual: usize,
    },

    #[error("Surrogate training failed: {0}")]
    ModelTraining(String),

    #[error("Simulation failed: {0}")]
    Simulation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TunerError {
    /// Shorthand for building a configuration error from any displayable message.
    pub fn config(message: impl Into<String>) -> Self {
        TunerError::Configuration(message.into())
    }
}

pub type TunerResult<T> = std::result::Result<T, TunerError>;

// stoic_core/src/lib.rs

pub mod error;
pub mod trade;
pub mod report;
pub mod genetic;
pub mod fitness;
pub mod behavior;
pub mod bayesian;
pub mod progress;
pub mod settings;
pub mod surrogate;
pub mod parameters;
pub mod simulation;
pub mod performance;
pub mod optimization;

pub use error::{TunerError, TunerResult};

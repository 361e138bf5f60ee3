//! Simulation errors

use thiserror::Error;

/// Simulation result type
pub type Result<T> = std::result::Result<T, Error>;

/// Simulation errors
#[derive(Debug, Error)]
pub enum Error {
    #[error("dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("solver diverged after {iterations} iterations: {message}")]
    SolverDiverged { iterations: usize, message: String },

    #[error("numeric error in {context}: {message}")]
    NumericError {
        context: &'static str,
        message: String,
    },

    #[error("intent pair ({l1}, {l2}) outside subgame grid {n1}x{n2}")]
    IntentOutOfRange {
        l1: usize,
        l2: usize,
        n1: usize,
        n2: usize,
    },

    #[error("singular matrix while {context}")]
    SingularMatrix { context: &'static str },

    #[error("invalid scenario: {0}")]
    Scenario(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to parse scenario: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

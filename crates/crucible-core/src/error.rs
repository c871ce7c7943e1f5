//! Engine error taxonomy.
//!
//! Only structural failures live here: an invalid problem definition, a
//! corrupted checkpoint, or a surrogate rejecting its input shape. Low
//! surrogate confidence, agent timeouts, and rejected edits are signals, not
//! errors; they are logged and the run continues.

use crate::surrogate::SurrogateError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid problem definition: {0}")]
    InvalidProblem(String),

    #[error("surrogate failure: {0}")]
    Surrogate(#[from] SurrogateError),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("worker failure: {0}")]
    Worker(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

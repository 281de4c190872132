//! Orchestration error types

use thiserror::Error;

pub type OrchestrationResult<T> = Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {
    /// A strategy cannot be initialized without anyone to select
    #[error("Orchestration requires at least one agent")]
    NoAgents,

    #[error("Unknown orchestration mode '{0}' (expected round_robin, random or llm)")]
    UnknownMode(String),

    /// The operation is not part of this strategy's contract
    #[error("{strategy} strategy does not support {operation}")]
    UnsupportedOperation {
        strategy: &'static str,
        operation: &'static str,
    },

    #[error("Invalid orchestration state: {0}")]
    InvalidState(String),
}

impl From<serde_json::Error> for OrchestrationError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidState(e.to_string())
    }
}

//! Agent error types

use thiserror::Error;

use crate::messaging::MessagingError;
use crate::orchestration::OrchestrationError;
use crate::runtime::RuntimeError;
use crate::state::StateError;
use crate::tools::ToolRegistryError;

pub type AgentResult<T> = Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum AgentError {
    /// `start()` on an agent that is already running
    #[error("Agent '{0}' is already started")]
    AlreadyStarted(String),

    #[error("Agent '{0}' is not started")]
    NotStarted(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The workflow instance reached the failed status
    #[error("Workflow instance {instance_id} failed: {message}")]
    WorkflowFailed { instance_id: String, message: String },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Orchestration(#[from] OrchestrationError),

    #[error(transparent)]
    Tool(#[from] ToolRegistryError),

    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AgentError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

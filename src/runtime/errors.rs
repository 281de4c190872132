//! Workflow runtime error types

use thiserror::Error;

use super::history::WorkflowStatus;
use crate::state::StateError;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Workflow runtime is not started")]
    NotStarted,

    #[error("Workflow runtime is already started")]
    AlreadyStarted,

    #[error("Unknown workflow '{0}'")]
    UnknownWorkflow(String),

    #[error("Unknown activity '{0}'")]
    UnknownActivity(String),

    #[error("A {kind} named '{name}' is already registered")]
    DuplicateRegistration { kind: &'static str, name: String },

    #[error("Workflow instance not found: {0}")]
    InstanceNotFound(String),

    #[error("Workflow instance already exists: {0}")]
    InstanceExists(String),

    /// Replay asked for a different activity than history recorded at this position
    #[error("Non-deterministic workflow: history position {position} recorded '{expected}' but the workflow called '{found}'")]
    NonDeterministic {
        position: usize,
        expected: String,
        found: String,
    },

    /// No driver is left to bring the instance to a terminal status
    #[error("Workflow instance {instance_id} was interrupted while {status}")]
    Interrupted { instance_id: String, status: WorkflowStatus },

    #[error("Workflow instance {instance_id} failed: {message}")]
    WorkflowFailed { instance_id: String, message: String },

    #[error("Activity '{activity}' failed: {message}")]
    ActivityFailed { activity: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    State(#[from] StateError),
}

impl RuntimeError {
    pub fn duplicate(kind: &'static str, name: impl Into<String>) -> Self {
        Self::DuplicateRegistration {
            kind,
            name: name.into(),
        }
    }
}

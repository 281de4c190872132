//! Persisted workflow instance records and their activity history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Workflow execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    /// Scheduled, not yet picked up
    Pending,
    Running,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn name(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Recorded result of one activity call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActivityOutcome {
    Completed { result: Value },
    Failed { error: String },
}

/// One memoized activity call, in the order the workflow awaited it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub sequence: usize,
    pub activity: String,
    pub input: Value,
    #[serde(flatten)]
    pub outcome: ActivityOutcome,
    pub recorded_at: DateTime<Utc>,
}

/// Everything the runtime knows about one workflow instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub instance_id: String,
    pub workflow_name: String,
    pub input: Value,
    pub status: WorkflowStatus,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryEvent>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
    pub fn new(instance_id: impl Into<String>, workflow_name: impl Into<String>, input: Value) -> Self {
        let now = Utc::now();
        Self {
            instance_id: instance_id.into(),
            workflow_name: workflow_name.into(),
            input,
            status: WorkflowStatus::Pending,
            output: None,
            error: None,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Store key of an instance record
    pub fn key(instance_id: &str) -> String {
        format!("workflow:{}", instance_id)
    }

    pub fn record(&mut self, activity: &str, input: Value, outcome: ActivityOutcome) -> &HistoryEvent {
        let now = Utc::now();
        self.history.push(HistoryEvent {
            sequence: self.history.len(),
            activity: activity.to_string(),
            input,
            outcome,
            recorded_at: now,
        });
        self.updated_at = now;
        &self.history[self.history.len() - 1]
    }

    pub fn complete(&mut self, output: Value) {
        self.status = WorkflowStatus::Completed;
        self.output = Some(output);
        self.error = None;
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = WorkflowStatus::Failed;
        self.error = Some(error.into());
        self.updated_at = Utc::now();
    }
}

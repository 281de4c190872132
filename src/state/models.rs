//! Persisted agent workflow state
//!
//! One store key per agent holds every instance that agent has run; the map,
//! not the key, is the unit of concurrency.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::provider::Message;
use crate::tools::ToolExecutionResult;

/// Lifecycle status of one workflow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Running,
    Completed,
    Failed,
}

impl EntryStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EntryStatus::Running)
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntryStatus::Running => "running",
            EntryStatus::Completed => "completed",
            EntryStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Where a workflow instance came from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryOrigin {
    /// Sender agent or caller that triggered this instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggering_workflow_instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_context: Option<Value>,
}

impl EntryOrigin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_triggering_instance(mut self, instance_id: impl Into<String>) -> Self {
        self.triggering_workflow_instance_id = Some(instance_id.into());
        self
    }

    pub fn with_workflow_name(mut self, name: impl Into<String>) -> Self {
        self.workflow_name = Some(name.into());
        self
    }
}

/// State of a single workflow instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentWorkflowEntry {
    pub input_value: Value,
    #[serde(default)]
    pub output: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub system_messages: Vec<Message>,
    #[serde(default)]
    pub last_message: Option<Message>,
    #[serde(default)]
    pub tool_history: Vec<ToolExecutionResult>,
    #[serde(flatten)]
    pub origin: EntryOrigin,
    pub status: EntryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentWorkflowEntry {
    /// Fresh running entry with empty histories, started now
    pub fn new(input_value: Value, origin: EntryOrigin) -> Self {
        Self {
            input_value,
            output: None,
            start_time: Utc::now(),
            end_time: None,
            messages: Vec::new(),
            system_messages: Vec::new(),
            last_message: None,
            tool_history: Vec::new(),
            origin,
            status: EntryStatus::Running,
            error: None,
        }
    }

    /// Append a conversation message and track it as the last one
    pub fn push_message(&mut self, message: Message) {
        self.last_message = Some(message.clone());
        self.messages.push(message);
    }

    /// Whether a result for `tool_call_id` was already recorded
    pub fn has_tool_result(&self, tool_call_id: &str) -> bool {
        self.tool_history
            .iter()
            .any(|record| record.tool_call_id == tool_call_id)
    }

    pub fn complete(&mut self, output: impl Into<String>) {
        self.status = EntryStatus::Completed;
        self.output = Some(output.into());
        self.error = None;
        self.end_time = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.status = EntryStatus::Failed;
        self.output = Some(error.clone());
        self.error = Some(error);
        self.end_time = Some(Utc::now());
    }
}

/// Every instance an agent knows about, keyed by workflow instance id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentWorkflowState {
    #[serde(default)]
    pub instances: BTreeMap<String, AgentWorkflowEntry>,
}

impl AgentWorkflowState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, instance_id: &str) -> Option<&AgentWorkflowEntry> {
        self.instances.get(instance_id)
    }

    pub fn get_mut(&mut self, instance_id: &str) -> Option<&mut AgentWorkflowEntry> {
        self.instances.get_mut(instance_id)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

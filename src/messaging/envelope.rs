//! Message envelope carried over the pub/sub bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Team-wide message, fanned out on the broadcast topic
    Broadcast,
    /// Point-to-point message on one agent's topic
    Direct,
    /// Asks the recipient to run its agent workflow on `message.content`
    TriggerAction,
}

/// Wire envelope: who sent what to whom
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub id: String,
    pub kind: MessageKind,
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    pub message: Message,
    /// Workflow instance on the sender side this message belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_instance_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl MessageEnvelope {
    pub fn new(kind: MessageKind, sender: impl Into<String>, message: Message) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            sender: sender.into(),
            recipient: None,
            message,
            workflow_instance_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    pub fn with_workflow_instance(mut self, instance_id: impl Into<String>) -> Self {
        self.workflow_instance_id = Some(instance_id.into());
        self
    }

    /// Whether this agent sent the message itself
    pub fn is_from(&self, agent_name: &str) -> bool {
        self.sender == agent_name
    }
}

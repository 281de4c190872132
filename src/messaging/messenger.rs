//! Per-agent messaging facade.

use std::sync::Arc;

use super::bus::MessageBus;
use super::envelope::{MessageEnvelope, MessageKind};
use super::error::{MessagingError, MessagingResult};
use crate::provider::Message;
use crate::registry::PubSubInfo;

/// Sends messages on behalf of one agent
#[derive(Clone)]
pub struct AgentMessenger {
    bus: Arc<dyn MessageBus>,
    agent_name: String,
    topics: PubSubInfo,
}

impl AgentMessenger {
    pub fn new(bus: Arc<dyn MessageBus>, agent_name: impl Into<String>, topics: PubSubInfo) -> Self {
        Self {
            bus,
            agent_name: agent_name.into(),
            topics,
        }
    }

    pub fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.bus
    }

    pub fn topics(&self) -> &PubSubInfo {
        &self.topics
    }

    /// Publish to the team broadcast topic
    pub async fn broadcast(&self, message: Message, workflow_instance_id: Option<&str>) -> MessagingResult<()> {
        let topic = self
            .topics
            .broadcast_topic
            .as_deref()
            .ok_or_else(|| MessagingError::NotConfigured {
                agent: self.agent_name.clone(),
            })?;

        let mut envelope = MessageEnvelope::new(MessageKind::Broadcast, &self.agent_name, message);
        if let Some(id) = workflow_instance_id {
            envelope = envelope.with_workflow_instance(id);
        }
        self.bus.publish(topic, &envelope).await
    }

    /// Point-to-point message on `recipient_topic`
    pub async fn send_direct(&self, recipient: &str, recipient_topic: &str, message: Message) -> MessagingResult<()> {
        let envelope =
            MessageEnvelope::new(MessageKind::Direct, &self.agent_name, message).with_recipient(recipient);
        self.bus.publish(recipient_topic, &envelope).await
    }

    /// Ask `recipient` to run its workflow on `task`
    pub async fn trigger_agent(
        &self,
        recipient: &str,
        recipient_topic: &str,
        task: &str,
        workflow_instance_id: Option<&str>,
    ) -> MessagingResult<()> {
        let mut envelope = MessageEnvelope::new(
            MessageKind::TriggerAction,
            &self.agent_name,
            Message::user(task).with_name(&self.agent_name),
        )
        .with_recipient(recipient);
        if let Some(id) = workflow_instance_id {
            envelope = envelope.with_workflow_instance(id);
        }
        self.bus.publish(recipient_topic, &envelope).await
    }
}

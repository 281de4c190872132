//! Pub/sub bus abstraction and the in-process implementation.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::envelope::MessageEnvelope;
use super::error::MessagingResult;

const TOPIC_CAPACITY: usize = 256;

/// Named-topic publish/subscribe transport
#[async_trait]
pub trait MessageBus: Send + Sync {
    fn bus_type(&self) -> &'static str;

    async fn publish(&self, topic: &str, envelope: &MessageEnvelope) -> MessagingResult<()>;

    /// In-process subscription, if this transport supports one.
    ///
    /// Remote transports deliver through the sidecar instead and return `None`.
    fn subscribe(&self, topic: &str) -> Option<MessageSubscription>;
}

/// Subscription handle for receiving envelopes
pub struct MessageSubscription {
    topic: String,
    receiver: broadcast::Receiver<MessageEnvelope>,
}

impl MessageSubscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next envelope, or `None` once the topic is closed.
    ///
    /// A slow subscriber that falls behind skips the missed envelopes.
    pub async fn recv(&mut self) -> Option<MessageEnvelope> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) => return Some(envelope),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(topic = %self.topic, skipped, "subscriber lagged, envelopes dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Tokio broadcast channel per topic
#[derive(Default)]
pub struct InMemoryMessageBus {
    topics: RwLock<HashMap<String, broadcast::Sender<MessageEnvelope>>>,
}

impl InMemoryMessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<MessageEnvelope> {
        if let Some(sender) = self
            .topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
        {
            return sender.clone();
        }

        self.topics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }

    /// Number of live subscribers on `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    fn bus_type(&self) -> &'static str {
        "memory"
    }

    async fn publish(&self, topic: &str, envelope: &MessageEnvelope) -> MessagingResult<()> {
        // No subscribers is not an error: pub/sub does not promise delivery
        let delivered = self.sender(topic).send(envelope.clone()).unwrap_or(0);
        tracing::debug!(topic, sender = %envelope.sender, delivered, "published envelope");
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Option<MessageSubscription> {
        Some(MessageSubscription {
            topic: topic.to_string(),
            receiver: self.sender(topic).subscribe(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::MessageKind;
    use crate::provider::Message;

    #[tokio::test]
    async fn test_fan_out_to_all_subscribers() {
        let bus = InMemoryMessageBus::new();
        let mut first = bus.subscribe("team").unwrap();
        let mut second = bus.subscribe("team").unwrap();
        assert_eq!(bus.subscriber_count("team"), 2);

        let envelope = MessageEnvelope::new(MessageKind::Broadcast, "poet", Message::assistant("a haiku"));
        bus.publish("team", &envelope).await.unwrap();

        assert_eq!(first.recv().await.unwrap().id, envelope.id);
        assert_eq!(second.recv().await.unwrap().id, envelope.id);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = InMemoryMessageBus::new();
        let envelope = MessageEnvelope::new(MessageKind::Direct, "poet", Message::user("hi"));
        bus.publish("nobody", &envelope).await.unwrap();
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus = InMemoryMessageBus::new();
        let mut editor = bus.subscribe("editor").unwrap();

        bus.publish("poet", &MessageEnvelope::new(MessageKind::Direct, "lead", Message::user("one")))
            .await
            .unwrap();
        bus.publish("editor", &MessageEnvelope::new(MessageKind::Direct, "lead", Message::user("two")))
            .await
            .unwrap();

        assert_eq!(editor.recv().await.unwrap().message.content, "two");
    }
}

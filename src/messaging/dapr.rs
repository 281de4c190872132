//! Publish through the Dapr sidecar: `POST /v1.0/publish/<pubsub>/<topic>`.

use async_trait::async_trait;
use std::time::Duration;

use super::bus::{MessageBus, MessageSubscription};
use super::envelope::MessageEnvelope;
use super::error::{MessagingError, MessagingResult};

pub struct DaprPublisher {
    client: reqwest::Client,
    base_url: String,
    pubsub_name: String,
}

impl DaprPublisher {
    pub fn new(base_url: impl Into<String>, pubsub_name: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            pubsub_name: pubsub_name.into(),
        }
    }

    fn publish_url(&self, topic: &str) -> String {
        format!(
            "{}/v1.0/publish/{}/{}",
            self.base_url,
            urlencoding::encode(&self.pubsub_name),
            urlencoding::encode(topic)
        )
    }
}

#[async_trait]
impl MessageBus for DaprPublisher {
    fn bus_type(&self) -> &'static str {
        "dapr"
    }

    async fn publish(&self, topic: &str, envelope: &MessageEnvelope) -> MessagingResult<()> {
        let body = serde_json::to_vec(envelope)?;
        let response = self
            .client
            .post(self.publish_url(topic))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| MessagingError::publish(topic, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MessagingError::publish(topic, format!("{}: {}", status, body)));
        }

        tracing::debug!(topic, pubsub = %self.pubsub_name, "published envelope via sidecar");
        Ok(())
    }

    fn subscribe(&self, _topic: &str) -> Option<MessageSubscription> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_url() {
        let publisher = DaprPublisher::new("http://localhost:3500/", "messagepubsub");
        assert_eq!(
            publisher.publish_url("beacon_channel"),
            "http://localhost:3500/v1.0/publish/messagepubsub/beacon_channel"
        );
        assert!(publisher.subscribe("beacon_channel").is_none());
    }

    #[test]
    fn test_publish_url_encodes_both_segments() {
        let publisher = DaprPublisher::new("http://localhost:3500", "team pubsub/1");
        assert_eq!(
            publisher.publish_url("lead/direct"),
            "http://localhost:3500/v1.0/publish/team%20pubsub%2F1/lead%2Fdirect"
        );
    }
}

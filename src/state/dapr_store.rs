//! Dapr state API backend
//!
//! Talks to the sidecar's `/v1.0/state/<store>` endpoints. Conditional writes
//! use `first-write` concurrency; the sidecar answers a stale ETag with 409 or
//! 412, both of which become [`StateError::EtagMismatch`].

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;

use super::errors::{StateError, StateResult};
use super::store::{StateItem, StateStore, WriteCondition};

pub struct DaprStateStore {
    client: reqwest::Client,
    base_url: String,
    store_name: String,
}

impl DaprStateStore {
    /// `base_url` is the sidecar address, e.g. `http://127.0.0.1:3500`
    pub fn new(base_url: impl Into<String>, store_name: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            store_name: store_name.into(),
        }
    }

    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    fn state_url(&self) -> String {
        format!("{}/v1.0/state/{}", self.base_url, self.store_name)
    }

    fn key_url(&self, key: &str) -> String {
        format!("{}/{}", self.state_url(), urlencoding::encode(key))
    }

    fn save_body(key: &str, value: &Value, condition: WriteCondition<'_>) -> Value {
        let mut item = json!({ "key": key, "value": value });
        match condition {
            WriteCondition::Always => {
                item["options"] = json!({ "concurrency": "last-write" });
            }
            WriteCondition::IfAbsent => {
                item["options"] = json!({ "concurrency": "first-write" });
            }
            WriteCondition::IfMatch(etag) => {
                item["etag"] = json!(etag);
                item["options"] = json!({ "concurrency": "first-write" });
            }
        }
        json!([item])
    }
}

fn is_conflict_status(status: StatusCode) -> bool {
    status == StatusCode::CONFLICT || status == StatusCode::PRECONDITION_FAILED
}

fn transport_error(e: reqwest::Error) -> StateError {
    StateError::backend(format!("dapr state request failed: {}", e))
}

#[async_trait]
impl StateStore for DaprStateStore {
    fn backend_type(&self) -> &'static str {
        "dapr"
    }

    async fn get(&self, key: &str) -> StateResult<Option<StateItem>> {
        let response = self
            .client
            .get(self.key_url(key))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT || status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StateError::backend(format!("dapr state get returned {}: {}", status, body)));
        }

        let etag = response
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_matches('"').to_string())
            .unwrap_or_default();
        let bytes = response.bytes().await.map_err(transport_error)?;
        if bytes.is_empty() {
            return Ok(None);
        }

        let value: Value = serde_json::from_slice(&bytes)?;
        Ok(Some(StateItem { value, etag }))
    }

    async fn save(&self, key: &str, value: &Value, condition: WriteCondition<'_>) -> StateResult<String> {
        let body = Self::save_body(key, value, condition);
        let response = self
            .client
            .post(self.state_url())
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if is_conflict_status(status) {
            return Err(StateError::etag_mismatch(key));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StateError::backend(format!("dapr state save returned {}: {}", status, body)));
        }

        // The save response carries no ETag; read it back
        Ok(self.get(key).await?.map(|item| item.etag).unwrap_or_default())
    }

    async fn delete(&self, key: &str, etag: Option<&str>) -> StateResult<()> {
        let mut request = self.client.delete(self.key_url(key));
        if let Some(etag) = etag {
            request = request
                .header("If-Match", etag)
                .query(&[("metadata.concurrency", "first-write")]);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if is_conflict_status(status) {
            return Err(StateError::etag_mismatch(key));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StateError::backend(format!("dapr state delete returned {}: {}", status, body)));
        }
        Ok(())
    }
}

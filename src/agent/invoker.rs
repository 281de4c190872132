//! Agent-to-agent invocation.
//!
//! An orchestrator hands a task to another agent's `run` entry point and gets
//! back a free-form JSON reply, which [`coerce_agent_response`] turns into an
//! assistant message.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::provider::{Message, MessageRole};

/// Synchronous call into another agent
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Run `task` on `agent` and return its raw reply
    async fn invoke(&self, agent: &str, task: &str) -> Result<Value>;
}

/// Something that can run a task in-process, typically a started durable agent
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run_task(&self, task: &str) -> Result<Message>;
}

/// In-process agents addressed by name
#[derive(Clone, Default)]
pub struct LocalAgentDirectory {
    agents: Arc<RwLock<HashMap<String, Arc<dyn TaskHandler>>>>,
}

impl LocalAgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the handler for `name`
    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.agents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), handler);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    fn handler(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

#[async_trait]
impl AgentInvoker for LocalAgentDirectory {
    async fn invoke(&self, agent: &str, task: &str) -> Result<Value> {
        let handler = self
            .handler(agent)
            .ok_or_else(|| anyhow::anyhow!("no local agent named '{}'", agent))?;
        let reply = handler.run_task(task).await?;
        Ok(serde_json::to_value(reply)?)
    }
}

/// Dapr service invocation: `POST /v1.0/invoke/<app-id>/method/run` with `{"task": ...}`
#[cfg(feature = "http")]
pub struct DaprServiceInvoker {
    client: reqwest::Client,
    base_url: String,
}

#[cfg(feature = "http")]
impl DaprServiceInvoker {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn invoke_url(&self, app_id: &str) -> String {
        format!("{}/v1.0/invoke/{}/method/run", self.base_url, urlencoding::encode(app_id))
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl AgentInvoker for DaprServiceInvoker {
    async fn invoke(&self, agent: &str, task: &str) -> Result<Value> {
        use anyhow::Context;

        let response = self
            .client
            .post(self.invoke_url(agent))
            .json(&serde_json::json!({ "task": task }))
            .send()
            .await
            .with_context(|| format!("failed to invoke agent '{}'", agent))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("agent '{}' returned {}: {}", agent, status, body);
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        // Plain-text replies are kept as strings
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}

/// Turn whatever an agent replied into an assistant message named after it.
///
/// Objects with a `content` field keep their role when it is a known one;
/// strings become the content; anything else is rendered as JSON. The
/// content is never empty.
pub fn coerce_agent_response(agent: &str, reply: Value) -> Message {
    let mut message = match reply {
        Value::Object(ref map) if map.get("content").is_some_and(Value::is_string) => {
            let content = map
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let role = map
                .get("role")
                .cloned()
                .and_then(|role| serde_json::from_value::<MessageRole>(role).ok())
                .unwrap_or(MessageRole::Assistant);

            let mut message = Message::assistant(content);
            message.role = role;
            if let Some(name) = map.get("name").and_then(Value::as_str) {
                message = message.with_name(name);
            }
            message
        }
        Value::String(content) => Message::assistant(content),
        Value::Null => Message::assistant(String::new()),
        other => Message::assistant(other.to_string()),
    };

    if message.content.trim().is_empty() {
        message.content = format!("Agent {} returned an empty response", agent);
    }
    if message.name.is_none() {
        message.name = Some(agent.to_string());
    }
    message
}

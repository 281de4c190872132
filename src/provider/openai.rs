//! OpenAI-compatible chat-completions provider.
//!
//! POST {base_url}/chat/completions with bearer auth. Works against OpenAI and
//! the many gateways that mimic its wire format.

use crate::config::LlmConfig;
use crate::provider::traits::LlmProvider;
use crate::provider::types::{GenerateConfig, Message, MessageRole, ToolCall, ToolDefinition};
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Chat-completions client
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiProvider {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(300))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.into(),
            api_key,
            model: model.into(),
        }
    }

    /// Build from the `[llm]` configuration section
    pub fn from_config(config: &LlmConfig) -> Self {
        Self::new(
            config.base_url.clone().unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            config.api_key.clone(),
            config.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        )
    }

    fn request_body(&self, messages: &[Message], config: &GenerateConfig) -> Value {
        let model = config.model.clone().unwrap_or_else(|| self.model.clone());
        let mut body = json!({
            "model": model,
            "messages": messages.iter().map(wire_message).collect::<Vec<_>>(),
            "temperature": config.temperature,
        });

        if let Some(max_tokens) = config.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        if !config.tools.is_empty() {
            body["tools"] = Value::Array(config.tools.iter().map(ToolDefinition::to_wire).collect());
            if let Some(choice) = &config.tool_choice {
                body["tool_choice"] = choice.to_wire();
            }
        }

        if config.json_response {
            body["response_format"] = json!({"type": "json_object"});
        }

        body
    }
}

fn wire_message(message: &Message) -> Value {
    let mut wire = json!({
        "role": message.role.as_str(),
        "content": message.content,
    });

    if let Some(name) = &message.name {
        // Tool result names are implied by tool_call_id on this wire format
        if message.role != MessageRole::Tool {
            wire["name"] = json!(sanitize_name(name));
        }
    }

    if let Some(tool_call_id) = &message.tool_call_id {
        wire["tool_call_id"] = json!(tool_call_id);
    }

    if message.has_tool_calls() {
        wire["tool_calls"] = Value::Array(
            message
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.arguments.to_string(),
                        }
                    })
                })
                .collect(),
        );
    }

    wire
}

/// The wire format only accepts `[a-zA-Z0-9_-]` in author names
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

fn parse_choice(response: &Value) -> Result<Message> {
    let message = response
        .pointer("/choices/0/message")
        .context("response has no choices[0].message")?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .filter_map(|call| {
                    let id = call.get("id")?.as_str()?;
                    let function = call.get("function")?;
                    let name = function.get("name")?.as_str()?;
                    // Arguments arrive as a JSON-encoded string
                    let arguments = function
                        .get("arguments")
                        .and_then(Value::as_str)
                        .and_then(|raw| serde_json::from_str(raw).ok())
                        .unwrap_or_else(|| json!({}));
                    Some(ToolCall::new(id, name, arguments))
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Message::assistant_with_tools(content, tool_calls))
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiProvider {
    async fn generate(&self, messages: Vec<Message>, config: &GenerateConfig) -> Result<Message> {
        config.validate()?;

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = self.request_body(&messages, config);

        tracing::debug!(url = %url, messages = messages.len(), tools = config.tools.len(), "calling chat completions");

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.context("chat completions request failed")?;
        let status = response.status();
        let text = response
            .text()
            .await
            .context("failed to read chat completions response body")?;

        if !status.is_success() {
            anyhow::bail!("chat completions returned {}: {}", status, text);
        }

        let json: Value = serde_json::from_str(&text).context("chat completions response is not JSON")?;
        parse_choice(&json)
    }

    fn provider_name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> String {
        self.model.clone()
    }
}

//! The tool interface and a closure-backed implementation.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::provider::ToolDefinition;

/// A name-addressed callable the LLM can ask an agent to run.
///
/// `call` receives the model's structured arguments and returns a structured
/// result; an `Err` is captured as a failed [`ToolExecutionResult`] by the
/// registry and never aborts the workflow.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn call(&self, arguments: Value) -> anyhow::Result<Value>;

    fn name(&self) -> String {
        self.definition().name
    }
}

type ToolFn = dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync;

/// Adapts an async closure into a [`Tool`]
#[derive(Clone)]
pub struct FunctionTool {
    definition: ToolDefinition,
    handler: Arc<ToolFn>,
}

impl FunctionTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            definition: ToolDefinition::new(name, description, parameters),
            handler: Arc::new(move |args| handler(args).boxed()),
        }
    }
}

impl std::fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.definition.name)
            .finish()
    }
}

#[async_trait::async_trait]
impl Tool for FunctionTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn call(&self, arguments: Value) -> anyhow::Result<Value> {
        (self.handler)(arguments).await
    }

    fn name(&self) -> String {
        self.definition.name.clone()
    }
}

/// Tool execution result, as recorded in tool history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    /// Unique ID for this tool call
    pub tool_call_id: String,
    /// Name of the tool that was executed
    pub tool_name: String,
    /// Arguments the tool was called with
    #[serde(default)]
    pub arguments: Value,
    /// Tool output (or the error text when `success` is false)
    pub content: String,
    /// Whether tool execution succeeded
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolExecutionResult {
    pub fn success(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: Value,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            arguments,
            content: content.into(),
            success: true,
            error: None,
        }
    }

    pub fn failure(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: Value,
        error: impl Into<String>,
    ) -> Self {
        let error = error.into();
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            arguments,
            content: format!("Error: {}", error),
            success: false,
            error: Some(error),
        }
    }
}

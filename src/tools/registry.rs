//! Thread-safe tool registry.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;

use super::{Tool, ToolExecutionResult, ToolRegistryError, ToolRegistryResult};
use crate::provider::{ToolCall, ToolDefinition};

#[derive(Default)]
struct RegistryInner {
    /// All registered tools, in registration order.
    tools: Vec<Arc<dyn Tool>>,

    /// Index from tool name to position in tools vector.
    name_index: HashMap<String, usize>,
}

/// Thread-safe registry of the tools an agent may call.
///
/// The registry is wrapped in `Arc<RwLock<...>>` internally, making it cheap
/// to clone into activity closures.
///
/// # Example
///
/// ```rust,ignore
/// use durable_agents::tools::{FunctionTool, ToolRegistry};
/// use serde_json::json;
///
/// let registry = ToolRegistry::new();
/// registry.register(FunctionTool::new("echo", "Echo input", json!({"type": "object"}), |v| async move { Ok(v) }))?;
///
/// // Schemas for the LLM
/// let tools = registry.definitions();
/// ```
#[derive(Clone, Default)]
pub struct ToolRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl ToolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tool names must be non-empty and contain only alphanumeric
    /// characters, underscores, or hyphens.
    pub(crate) fn validate_name(name: &str) -> ToolRegistryResult<()> {
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ToolRegistryError::InvalidName(name.to_string()));
        }

        Ok(())
    }

    /// Register a tool. Returns an error if the name is taken.
    pub fn register(&self, tool: impl Tool + 'static) -> ToolRegistryResult<()> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&self, tool: Arc<dyn Tool>) -> ToolRegistryResult<()> {
        let name = tool.name();
        Self::validate_name(&name)?;

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        if inner.name_index.contains_key(&name) {
            return Err(ToolRegistryError::Conflict(name));
        }

        let idx = inner.tools.len();
        inner.name_index.insert(name, idx);
        inner.tools.push(tool);

        Ok(())
    }

    /// Find a tool by name.
    pub fn find(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .name_index
            .get(name)
            .map(|&idx| Arc::clone(&inner.tools[idx]))
    }

    /// Get a tool by name, returning an error if not found.
    pub fn get(&self, name: &str) -> ToolRegistryResult<Arc<dyn Tool>> {
        self.find(name)
            .ok_or_else(|| ToolRegistryError::NotFound(name.to_string()))
    }

    /// Schemas of all tools, in registration order, for the LLM.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.tools.iter().map(|tool| tool.definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .tools
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// List all tool names, sorted.
    pub fn tool_names(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = inner.name_index.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .name_index
            .contains_key(name)
    }

    /// Remove a tool by name.
    pub fn remove(&self, name: &str) -> ToolRegistryResult<Arc<dyn Tool>> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        let idx = inner
            .name_index
            .remove(name)
            .ok_or_else(|| ToolRegistryError::NotFound(name.to_string()))?;

        let tool = inner.tools.remove(idx);

        // Shift indices past the removed slot
        for index in inner.name_index.values_mut() {
            if *index > idx {
                *index -= 1;
            }
        }

        Ok(tool)
    }

    /// Run the tool a model asked for.
    ///
    /// Unknown tools and tool errors come back as a failed result rather than
    /// an `Err`, so one bad call cannot abort the agent loop.
    pub async fn execute(&self, call: &ToolCall) -> ToolExecutionResult {
        let tool = match self.get(&call.name) {
            Ok(tool) => tool,
            Err(e) => {
                tracing::warn!(tool = %call.name, "tool lookup failed: {}", e);
                return ToolExecutionResult::failure(&call.id, &call.name, call.arguments.clone(), e.to_string());
            }
        };

        match tool.call(call.arguments.clone()).await {
            Ok(output) => {
                let content = match output {
                    Value::String(text) => text,
                    other => other.to_string(),
                };
                ToolExecutionResult::success(&call.id, &call.name, call.arguments.clone(), content)
            }
            Err(e) => {
                tracing::warn!(tool = %call.name, tool_call_id = %call.id, "tool execution failed: {:#}", e);
                ToolExecutionResult::failure(&call.id, &call.name, call.arguments.clone(), format!("{:#}", e))
            }
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tool_names())
            .finish()
    }
}

//! What an agent sends along with its conversation: generation settings and
//! the tools the model may call.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_MAX_TOKENS: u32 = 4000;

/// A tool as the model sees it: name, description and a JSON Schema for its arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Arguments must be described by an object schema
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.parameters.get("type").and_then(Value::as_str) {
            Some("object") => Ok(()),
            Some(other) => anyhow::bail!("tool '{}' takes an object, not '{}'", self.name, other),
            None => anyhow::bail!("tool '{}' has no argument schema type", self.name),
        }
    }

    /// Function-calling wire form
    pub fn to_wire(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// Whether, and which, tool the model must call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    #[default]
    Auto,
    Required,
    None,
    Function(String),
}

impl ToolChoice {
    pub fn to_wire(&self) -> Value {
        match self {
            Self::Auto => json!("auto"),
            Self::Required => json!("required"),
            Self::None => json!("none"),
            Self::Function(name) => json!({"type": "function", "function": {"name": name}}),
        }
    }
}

/// Per-request generation settings.
///
/// Activities clone the agent's config and add what the call needs: the
/// tool-calling loop attaches tool schemas, planning calls ask for JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateConfig {
    /// `None` uses the provider's default model
    #[serde(default)]
    pub model: Option<String>,
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub tool_choice: Option<ToolChoice>,
    #[serde(default)]
    pub json_response: bool,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            model: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: Some(DEFAULT_MAX_TOKENS),
            tools: Vec::new(),
            tool_choice: None,
            json_response: false,
        }
    }
}

impl GenerateConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }

    pub fn with_json_response(mut self, enable: bool) -> Self {
        self.json_response = enable;
        self
    }

    /// Reject settings no provider would accept before anything goes on the wire
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=2.0).contains(&self.temperature) {
            anyhow::bail!("temperature {} is outside 0.0..=2.0", self.temperature);
        }
        if self.max_tokens == Some(0) {
            anyhow::bail!("max_tokens must be positive");
        }
        if let Some(ToolChoice::Function(name)) = &self.tool_choice {
            if !self.tools.iter().any(|tool| &tool.name == name) {
                anyhow::bail!("tool_choice names '{}', which is not among the offered tools", name);
            }
        }
        self.tools.iter().try_for_each(ToolDefinition::validate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup() -> ToolDefinition {
        ToolDefinition::new(
            "lookup",
            "Look up a record",
            json!({"type": "object", "properties": {"id": {"type": "integer"}}}),
        )
    }

    #[test]
    fn test_tool_schema_must_be_object() {
        assert!(lookup().validate().is_ok());
        assert!(ToolDefinition::new("bad", "", json!({"type": "string"})).validate().is_err());
        assert!(ToolDefinition::new("bad", "", json!({})).validate().is_err());
    }

    #[test]
    fn test_wire_forms() {
        assert_eq!(lookup().to_wire()["function"]["name"], "lookup");
        assert_eq!(ToolChoice::Required.to_wire(), json!("required"));
        assert_eq!(
            ToolChoice::Function("lookup".into()).to_wire()["function"]["name"],
            "lookup"
        );
    }

    #[test]
    fn test_validate_checks_tool_choice_against_tools() {
        assert!(GenerateConfig::new().validate().is_ok());
        assert!(GenerateConfig::new().with_temperature(2.5).validate().is_err());

        let forced = GenerateConfig::new().with_tool_choice(ToolChoice::Function("lookup".into()));
        assert!(forced.clone().validate().is_err());
        assert!(forced.with_tools(vec![lookup()]).validate().is_ok());
    }
}

//! TOML configuration parsing and management.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::environment::EnvironmentLoader;
use crate::orchestration::{OrchestrationError, OrchestrationMode};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub agent: AgentConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub pubsub: Option<PubSubConfig>,
    #[serde(default)]
    pub orchestration: Option<OrchestrationConfig>,
    #[serde(default)]
    pub invocation: InvocationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub llm: Option<LlmConfig>,
}

/// Agent identity and loop bound
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub goal: String,
    /// Extra system instructions, one per line in the system prompt
    #[serde(default)]
    pub instructions: Vec<String>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

fn default_role() -> String {
    "Assistant".to_string()
}

fn default_max_iterations() -> u32 {
    10
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "NO_AGENT_NAME".to_string(),
            role: default_role(),
            goal: String::new(),
            instructions: Vec::new(),
            max_iterations: default_max_iterations(),
        }
    }
}

/// Which state store backs workflow state and the team registry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    #[default]
    Memory,
    File,
    Dapr,
}

/// State store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default)]
    pub backend: StateBackend,
    /// Directory for the file backend
    #[serde(default)]
    pub path: Option<String>,
    /// Dapr state store component for workflow state
    #[serde(default = "default_store_name")]
    pub store_name: String,
    /// Dapr state store component for the team registry
    #[serde(default = "default_registry_store_name")]
    pub registry_store_name: String,
    #[serde(default = "default_team_name")]
    pub team_name: String,
    #[serde(default = "default_max_etag_attempts")]
    pub max_etag_attempts: u32,
}

fn default_store_name() -> String {
    "statestore".to_string()
}

fn default_registry_store_name() -> String {
    "agentstatestore".to_string()
}

fn default_team_name() -> String {
    "default".to_string()
}

fn default_max_etag_attempts() -> u32 {
    crate::state::DEFAULT_MAX_ATTEMPTS
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: StateBackend::Memory,
            path: None,
            store_name: default_store_name(),
            registry_store_name: default_registry_store_name(),
            team_name: default_team_name(),
            max_etag_attempts: default_max_etag_attempts(),
        }
    }
}

/// Pub/sub topics. Absent topics default to the agent name and `beacon_channel`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PubSubConfig {
    #[serde(default = "default_pubsub_name")]
    pub name: String,
    #[serde(default)]
    pub agent_topic: Option<String>,
    #[serde(default)]
    pub broadcast_topic: Option<String>,
}

fn default_pubsub_name() -> String {
    "messagepubsub".to_string()
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            name: default_pubsub_name(),
            agent_topic: None,
            broadcast_topic: None,
        }
    }
}

/// Present only for orchestrator agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    pub mode: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

impl OrchestrationConfig {
    /// Parsed mode; an unknown name is a configuration error
    pub fn mode(&self) -> Result<OrchestrationMode, OrchestrationError> {
        self.mode.parse()
    }
}

/// Agent-to-agent invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationConfig {
    #[serde(default = "default_invocation_timeout")]
    pub timeout_seconds: u64,
}

fn default_invocation_timeout() -> u64 {
    60
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_invocation_timeout(),
        }
    }
}

/// Markdown audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub log_file: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_file: None,
            log_level: default_log_level(),
        }
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// Loads and manages TOML configuration.
#[derive(Debug, Clone)]
pub struct ConfigurationLoader {
    pub config_path: Option<PathBuf>,
    pub config: Configuration,
}

impl ConfigurationLoader {
    /// Initialize configuration loader.
    ///
    /// # Arguments
    /// * `config_path` - Path to TOML config file. If None or missing, uses default config.
    pub fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = match config_path {
            Some(path) if path.exists() => Self::load_config(path)?,
            _ => Self::get_default_config(),
        };

        Ok(Self {
            config_path: config_path.map(Path::to_path_buf),
            config,
        })
    }

    /// Create a configuration loader from a pre-parsed Configuration.
    pub fn from_config(config: Configuration) -> Self {
        Self {
            config_path: None,
            config,
        }
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config = toml::from_str(content).context("Failed to parse TOML config")?;
        Ok(Self::from_config(config))
    }

    /// Load configuration from TOML file.
    fn load_config(path: &Path) -> Result<Configuration> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content).with_context(|| format!("Failed to parse TOML config: {}", path.display()))
    }

    /// Get default configuration.
    fn get_default_config() -> Configuration {
        Configuration::default()
    }

    /// Apply host-level overrides from the environment.
    pub fn apply_environment(&mut self, env: &EnvironmentLoader) {
        if let Some(name) = env.agent_name() {
            self.config.agent.name = name;
        }

        if let Some(mode) = env.orchestration_mode() {
            match &mut self.config.orchestration {
                Some(orchestration) => orchestration.mode = mode,
                None => {
                    self.config.orchestration = Some(OrchestrationConfig {
                        mode,
                        max_iterations: default_max_iterations(),
                    })
                }
            }
        }

        let (base_url, api_key, model) = (env.llm_base_url(), env.llm_api_key(), env.llm_model());
        if base_url.is_some() || api_key.is_some() || model.is_some() {
            let llm = self.config.llm.get_or_insert_with(LlmConfig::default);
            llm.base_url = base_url.or(llm.base_url.take());
            llm.api_key = api_key.or(llm.api_key.take());
            llm.model = model.or(llm.model.take());
        }
    }

    /// Orchestration mode, if this agent orchestrates. Unknown modes fail here.
    pub fn orchestration_mode(&self) -> Result<Option<OrchestrationMode>, OrchestrationError> {
        self.config
            .orchestration
            .as_ref()
            .map(OrchestrationConfig::mode)
            .transpose()
    }

    /// Get configuration value by dot-notation key.
    pub fn get_string(&self, key: &str) -> Option<String> {
        match key {
            "agent.name" => Some(self.config.agent.name.clone()),
            "agent.role" => Some(self.config.agent.role.clone()),
            "agent.goal" => Some(self.config.agent.goal.clone()),
            "state.store_name" => Some(self.config.state.store_name.clone()),
            "state.registry_store_name" => Some(self.config.state.registry_store_name.clone()),
            "state.team_name" => Some(self.config.state.team_name.clone()),
            "state.path" => self.config.state.path.clone(),
            "pubsub.name" => self.config.pubsub.as_ref().map(|p| p.name.clone()),
            "orchestration.mode" => self.config.orchestration.as_ref().map(|o| o.mode.clone()),
            "logging.log_file" => self.config.logging.log_file.clone(),
            "logging.log_level" => Some(self.config.logging.log_level.clone()),
            "llm.base_url" => self.config.llm.as_ref().and_then(|l| l.base_url.clone()),
            "llm.model" => self.config.llm.as_ref().and_then(|l| l.model.clone()),
            _ => None,
        }
    }

    /// Get numeric configuration value.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match key {
            "agent.max_iterations" => Some(u64::from(self.config.agent.max_iterations)),
            "state.max_etag_attempts" => Some(u64::from(self.config.state.max_etag_attempts)),
            "orchestration.max_iterations" => self
                .config
                .orchestration
                .as_ref()
                .map(|o| u64::from(o.max_iterations)),
            "invocation.timeout_seconds" => Some(self.config.invocation.timeout_seconds),
            "llm.max_tokens" => self
                .config
                .llm
                .as_ref()
                .and_then(|l| l.max_tokens)
                .map(u64::from),
            _ => None,
        }
    }
}

//! Environment variable loading and management.
//!
//! Host-level settings only: where the Dapr sidecar is, which agent this
//! process runs, and LLM endpoint overrides.

use std::env;
use std::path::Path;

const DEFAULT_DAPR_HOST: &str = "localhost";
const DEFAULT_DAPR_HTTP_PORT: u16 = 3500;

/// Loads environment variables from .env file and system environment.
#[derive(Debug, Clone)]
pub struct EnvironmentLoader {
    env_file: Option<String>,
}

impl EnvironmentLoader {
    /// Initialize the environment loader.
    ///
    /// # Arguments
    /// * `env_file` - Path to .env file. Nothing is loaded when None.
    pub fn new(env_file: Option<&Path>) -> Self {
        // Only load a .env file if an explicit path was provided, so tests
        // never pick up a stray repository .env
        if let Some(path) = env_file {
            if path.exists() {
                if let Err(e) = dotenv::from_path(path) {
                    tracing::warn!(path = %path.display(), "failed to load .env file: {}", e);
                }
            }
        }

        Self {
            env_file: env_file.map(|p| p.to_string_lossy().to_string()),
        }
    }

    pub fn env_file(&self) -> Option<&str> {
        self.env_file.as_deref()
    }

    fn non_empty(key: &str) -> Option<String> {
        env::var(key).ok().filter(|value| !value.trim().is_empty())
    }

    pub fn dapr_host(&self) -> String {
        Self::non_empty("DAPR_HOST").unwrap_or_else(|| DEFAULT_DAPR_HOST.to_string())
    }

    /// Sidecar HTTP port; unparseable values fall back to the default
    pub fn dapr_http_port(&self) -> u16 {
        Self::non_empty("DAPR_HTTP_PORT")
            .and_then(|port| port.trim().parse().ok())
            .unwrap_or(DEFAULT_DAPR_HTTP_PORT)
    }

    /// Base URL of the Dapr sidecar HTTP API
    pub fn dapr_base_url(&self) -> String {
        format!("http://{}:{}", self.dapr_host(), self.dapr_http_port())
    }

    pub fn agent_name(&self) -> Option<String> {
        Self::non_empty("DURABLE_AGENT_NAME")
    }

    pub fn orchestration_mode(&self) -> Option<String> {
        Self::non_empty("ORCHESTRATION_MODE")
    }

    pub fn llm_base_url(&self) -> Option<String> {
        Self::non_empty("LLM_BASE_URL")
    }

    pub fn llm_api_key(&self) -> Option<String> {
        Self::non_empty("LLM_API_KEY")
    }

    pub fn llm_model(&self) -> Option<String> {
        Self::non_empty("LLM_MODEL")
    }
}

impl Default for EnvironmentLoader {
    fn default() -> Self {
        Self::new(None)
    }
}

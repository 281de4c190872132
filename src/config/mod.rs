//! Configuration management.
//!
//! Agent settings come from a TOML file; host-level overrides (sidecar
//! address, agent name, LLM endpoint) come from the environment or an
//! explicit `.env` file.
//!
//! # Example
//!
//! ```no_run
//! use durable_agents::config::{ConfigurationLoader, EnvironmentLoader};
//! use std::path::Path;
//!
//! let env = EnvironmentLoader::new(None);
//! let mut loader = ConfigurationLoader::new(Some(Path::new("config/agent.toml"))).unwrap();
//! loader.apply_environment(&env);
//!
//! println!("Agent: {}", loader.config.agent.name);
//! println!("Sidecar: {}", env.dapr_base_url());
//! ```

pub mod config;
pub mod environment;

pub use self::config::{
    AgentConfig, Configuration, ConfigurationLoader, InvocationConfig, LlmConfig, LoggingConfig,
    OrchestrationConfig, PubSubConfig, StateBackend, StateConfig,
};
pub use self::environment::EnvironmentLoader;

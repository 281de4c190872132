//! Durable Agents - crash-safe LLM agents and multi-agent orchestration
//!
//! Agents run their reasoning loop as replay-deterministic workflows: every
//! side effect (model call, tool call, state write, message) happens in a
//! named activity whose result is recorded, so an interrupted workflow
//! resumes where it left off instead of starting over.
//!
//! - **`runtime`** - Workflow runtime with recorded activity history
//! - **`state`** - Key-value state stores with optimistic concurrency
//! - **`registry`** - Team presence directory
//! - **`messaging`** - Broadcast and direct messages between agents
//! - **`orchestration`** - Round-robin, random and LLM-planned strategies
//! - **`agent`** - The durable agent, its activities and workflows
//! - **`provider`** - LLM provider abstraction
//! - **`tools`** - Tools and the tool registry
//! - **`config`** - Configuration and environment loading
//! - **`observability`** - Markdown audit log
//!
//! # Features
//!
//! - **`http`** (default) - OpenAI-compatible provider and the Dapr sidecar
//!   state store, publisher and service invoker, over `reqwest`.
//!
//! # Example
//!
//! ```ignore
//! use durable_agents::prelude::*;
//! use std::sync::Arc;
//!
//! let runtime = WorkflowRuntime::in_memory();
//! let team_store = runtime.store();
//!
//! let poet = DurableAgentBuilder::new("poet")
//!     .role("Poet")
//!     .llm(llm.clone())
//!     .registry_store(team_store.clone())
//!     .runtime(runtime.clone())
//!     .build()?;
//!
//! let directory = LocalAgentDirectory::new();
//! directory.register("poet", Arc::new(poet.clone()));
//!
//! let lead = DurableAgentBuilder::new("lead")
//!     .llm(llm)
//!     .registry_store(team_store)
//!     .orchestration(OrchestrationMode::RoundRobin, 3)
//!     .invoker(Arc::new(directory))
//!     .runtime(runtime.clone())
//!     .build()?;
//!
//! poet.register(&runtime).await?;
//! lead.register(&runtime).await?;
//! runtime.start().await?;
//! poet.start().await?;
//! lead.start().await?;
//!
//! let summary = lead.orchestrate("write a haiku about autumn").await?;
//! ```

pub mod agent;
pub mod config;
pub mod messaging;
pub mod observability;
pub mod orchestration;
pub mod provider;
pub mod registry;
pub mod runtime;
pub mod state;
pub mod tools;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::agent::{
        AgentError, AgentInvoker, AgentResult, AgentTaskInput, ConversationMemory, DurableAgent,
        DurableAgentBuilder, InMemoryConversation, LocalAgentDirectory, TaskHandler,
    };
    pub use crate::config::{Configuration, ConfigurationLoader, EnvironmentLoader};
    pub use crate::messaging::{AgentMessenger, InMemoryMessageBus, MessageBus};
    pub use crate::observability::Logger;
    pub use crate::orchestration::{OrchestrationMode, OrchestrationStrategy};
    pub use crate::provider::{GenerateConfig, LlmProvider, Message, MessageRole, ToolCall};
    pub use crate::registry::{AgentRegistry, PubSubInfo, RegistryEntry};
    pub use crate::runtime::{WorkflowContext, WorkflowRuntime, WorkflowStatus};
    pub use crate::state::{FileStateStore, InMemoryStateStore, StateStore};
    pub use crate::tools::{FunctionTool, Tool, ToolRegistry};

    #[cfg(feature = "http")]
    pub use crate::provider::OpenAiProvider;
}

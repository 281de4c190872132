//! Team Registry Module
//!
//! Agents register themselves under a shared per-team state key on start and
//! remove themselves on stop, so orchestrators can discover workers.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use durable_agents::registry::{AgentRegistry, RegistryEntry};
//! use durable_agents::state::InMemoryStateStore;
//! use std::sync::Arc;
//!
//! let registry = AgentRegistry::new(Arc::new(InMemoryStateStore::new()), "writers");
//! registry.register_agent("poet", RegistryEntry::new("DurableAgent", "Poet", "Write verse")).await?;
//!
//! let peers = registry.list_peers("editor").await?;
//! ```

mod entry;
mod registry;

pub use entry::{AgentMetadata, PubSubInfo, RegistryEntry};
pub use registry::{format_listing, AgentRegistry, TeamAgents, NO_AVAILABLE_AGENTS};

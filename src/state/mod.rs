//! Shared state: version-tokened key-value stores, optimistic-concurrency
//! retry, and the per-agent workflow state built on them.

pub mod agent_state;
pub mod errors;
pub mod file_store;
pub mod models;
pub mod retry;
pub mod store;

#[cfg(feature = "http")]
pub mod dapr_store;

pub use agent_state::AgentStateStore;
pub use errors::{StateError, StateResult};
pub use file_store::FileStateStore;
pub use models::{AgentWorkflowEntry, AgentWorkflowState, EntryOrigin, EntryStatus};
pub use retry::{backoff_delay, with_etag_retry, DEFAULT_MAX_ATTEMPTS};
pub use store::{InMemoryStateStore, StateItem, StateStore, StateStoreExt, Versioned, WriteCondition};

#[cfg(feature = "http")]
pub use dapr_store::DaprStateStore;

//! Durable workflow runtime.
//!
//! Workflow bodies are plain async functions over a [`WorkflowContext`];
//! every side effect is an activity whose outcome is appended to the
//! instance's history and persisted before the body continues. After a
//! restart the body is re-run from the top and recorded outcomes are
//! handed back in order instead of running the activities again.

pub mod activity;
pub mod context;
pub mod engine;
pub mod errors;
pub mod history;

pub use activity::{ActivityContext, ActivityRetryPolicy};
pub use context::WorkflowContext;
pub use engine::{RuntimeOptions, WorkflowRuntime, INDEX_KEY};
pub use errors::{RuntimeError, RuntimeResult};
pub use history::{ActivityOutcome, HistoryEvent, WorkflowInstance, WorkflowStatus};

//! Observability for durable agents.
//!
//! Runtime diagnostics go through the `tracing` facade; this crate never
//! installs a subscriber. [`Logger`] additionally keeps a human-readable
//! markdown audit trail of workflow activity when a log file is configured.
//!
//! # Example
//!
//! ```no_run
//! use durable_agents::observability::Logger;
//! use durable_agents::provider::Message;
//! use std::path::Path;
//!
//! let logger = Logger::new(Path::new("logs/writer.md"), Some("DEBUG")).unwrap();
//! logger.log_workflow_start("writer", "wf-1", "draft a haiku").unwrap();
//! logger
//!     .log_llm_interaction(&[Message::user("draft a haiku")], &Message::assistant("..."), "gpt-4o-mini")
//!     .unwrap();
//! logger.log_completion("wf-1", "completed", "...").unwrap();
//! ```

pub mod logger;

pub use logger::Logger;

//! LLM adapter module
//!
//! The provider trait, the provider-agnostic message and tool types, and an
//! OpenAI-compatible HTTP implementation.

pub mod traits;
pub mod types;

#[cfg(feature = "http")]
pub mod openai;

pub use traits::LlmProvider;
pub use types::{GenerateConfig, Message, MessageRole, ToolCall, ToolChoice, ToolDefinition};

#[cfg(feature = "http")]
pub use openai::OpenAiProvider;

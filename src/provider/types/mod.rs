//! Provider-agnostic message and request types

pub mod message;
pub mod request;

pub use message::{Message, MessageRole, ToolCall};
pub use request::{GenerateConfig, ToolChoice, ToolDefinition};

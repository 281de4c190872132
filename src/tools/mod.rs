//! Tools an agent can call, and the registry that dispatches them.

mod error;
mod registry;
mod tool;

pub use error::{ToolRegistryError, ToolRegistryResult};
pub use registry::ToolRegistry;
pub use tool::{FunctionTool, Tool, ToolExecutionResult};

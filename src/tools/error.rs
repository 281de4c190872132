//! Error types for the tool registry.

use thiserror::Error;

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum ToolRegistryError {
    /// A tool with the same name is already registered.
    #[error("Tool '{0}' already registered")]
    Conflict(String),

    /// The tool name is invalid (empty or contains invalid characters).
    #[error("Invalid tool name '{0}': must be non-empty and contain only alphanumeric characters, underscores, or hyphens")]
    InvalidName(String),

    /// The requested tool was not found.
    #[error("Tool '{0}' not found")]
    NotFound(String),
}

/// Result type for registry operations.
pub type ToolRegistryResult<T> = Result<T, ToolRegistryError>;

//! Error types for the state layer

use thiserror::Error;

/// Result type for state operations
pub type StateResult<T> = Result<T, StateError>;

#[derive(Error, Debug)]
pub enum StateError {
    /// The version token presented with a conditional write no longer matches
    #[error("ETag mismatch on key '{key}'")]
    EtagMismatch { key: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("State backend error: {message}")]
    Backend { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Workflow instance not found: {instance_id}")]
    InstanceNotFound { instance_id: String },
}

impl StateError {
    pub fn etag_mismatch<S: Into<String>>(key: S) -> Self {
        Self::EtagMismatch { key: key.into() }
    }

    pub fn backend<S: Into<String>>(message: S) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Optimistic-concurrency conflicts are the only errors worth retrying
    pub fn is_conflict(&self) -> bool {
        matches!(self, StateError::EtagMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_etag_mismatch_is_conflict() {
        assert!(StateError::etag_mismatch("k").is_conflict());
        assert!(!StateError::backend("boom").is_conflict());
        assert!(!StateError::config("bad").is_conflict());
    }

    #[test]
    fn test_error_display() {
        let err = StateError::etag_mismatch("writer:workflow_state");
        assert_eq!(err.to_string(), "ETag mismatch on key 'writer:workflow_state'");
    }
}

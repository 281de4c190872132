//! Error types for messaging

use thiserror::Error;

pub type MessagingResult<T> = Result<T, MessagingError>;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Publish to topic '{topic}' failed: {message}")]
    Publish { topic: String, message: String },

    #[error("Messaging is not configured for agent '{agent}'")]
    NotConfigured { agent: String },
}

impl MessagingError {
    pub fn publish<T: Into<String>, M: Into<String>>(topic: T, message: M) -> Self {
        Self::Publish {
            topic: topic.into(),
            message: message.into(),
        }
    }
}

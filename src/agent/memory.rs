//! Conversation memory.
//!
//! Memory is a cache in front of the persisted workflow entry: activities
//! rehydrate it from the entry's messages whenever it comes up empty, so a
//! restarted process sees the same conversation.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::provider::Message;

/// Session that collects broadcast and direct messages from other agents
pub const TEAM_SESSION: &str = "team";

/// Newest team messages kept unless another window is set
pub const DEFAULT_TEAM_WINDOW: usize = 100;

/// Ordered message history per session (a workflow instance id or [`TEAM_SESSION`])
#[async_trait]
pub trait ConversationMemory: Send + Sync {
    async fn messages(&self, session: &str) -> Result<Vec<Message>>;

    async fn add_message(&self, session: &str, message: Message) -> Result<()>;

    async fn add_messages(&self, session: &str, messages: Vec<Message>) -> Result<()> {
        for message in messages {
            self.add_message(session, message).await?;
        }
        Ok(())
    }

    async fn clear(&self, session: &str) -> Result<()>;
}

/// Process-local memory.
///
/// The team session lives as long as the agent and keeps only its newest
/// `team_window` messages. Instance sessions are never trimmed: they mirror
/// the persisted entry, whose assistant turns are counted on re-execution,
/// and are cleared when the instance finalizes.
#[derive(Debug)]
pub struct InMemoryConversation {
    sessions: Mutex<HashMap<String, Vec<Message>>>,
    team_window: usize,
}

impl Default for InMemoryConversation {
    fn default() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            team_window: DEFAULT_TEAM_WINDOW,
        }
    }
}

impl InMemoryConversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_team_window(mut self, team_window: usize) -> Self {
        self.team_window = team_window.max(1);
        self
    }
}

#[async_trait]
impl ConversationMemory for InMemoryConversation {
    async fn messages(&self, session: &str) -> Result<Vec<Message>> {
        Ok(self.sessions.lock().await.get(session).cloned().unwrap_or_default())
    }

    async fn add_message(&self, session: &str, message: Message) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let messages = sessions.entry(session.to_string()).or_default();
        messages.push(message);
        if session == TEAM_SESSION && messages.len() > self.team_window {
            let excess = messages.len() - self.team_window;
            messages.drain(..excess);
        }
        Ok(())
    }

    async fn clear(&self, session: &str) -> Result<()> {
        self.sessions.lock().await.remove(session);
        Ok(())
    }
}

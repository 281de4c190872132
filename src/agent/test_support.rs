//! Scripted collaborators for unit tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::activities::{AgentDeps, AgentProfile};
use super::memory::InMemoryConversation;
use crate::provider::{GenerateConfig, LlmProvider, Message};
use crate::state::{AgentStateStore, InMemoryStateStore};
use crate::tools::ToolRegistry;

/// Replies from a queue; answers "done" once the queue is empty
#[derive(Clone, Default)]
pub(crate) struct ScriptedLlm {
    replies: Arc<Mutex<VecDeque<Message>>>,
    requests: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl ScriptedLlm {
    pub(crate) fn new(replies: Vec<Message>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into())),
            requests: Arc::default(),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub(crate) fn last_request(&self) -> Vec<Message> {
        self.requests.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn generate(&self, messages: Vec<Message>, _config: &GenerateConfig) -> anyhow::Result<Message> {
        self.requests.lock().unwrap().push(messages);
        Ok(self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Message::assistant("done")))
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> String {
        "scripted-model".to_string()
    }
}

pub(crate) fn agent_deps(llm: ScriptedLlm) -> AgentDeps {
    AgentDeps {
        profile: Arc::new(AgentProfile {
            name: "tester".into(),
            role: "Tester".into(),
            goal: "Exercise activities".into(),
            instructions: Vec::new(),
            max_iterations: 5,
        }),
        llm: Arc::new(llm),
        generate: GenerateConfig::default(),
        tools: ToolRegistry::new(),
        state: AgentStateStore::new(Arc::new(InMemoryStateStore::new()), "tester"),
        memory: Arc::new(InMemoryConversation::new()),
        logger: None,
    }
}

//! What an agent publishes about itself in the team registry.

use serde::{Deserialize, Serialize};

/// Descriptive metadata peers use to decide whom to address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMetadata {
    #[serde(rename = "type")]
    pub agent_type: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub goal: String,
    /// Orchestrators coordinate others and are never selected as workers
    #[serde(default)]
    pub orchestrator: bool,
}

/// Topics an agent listens on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubSubInfo {
    /// Pub/sub component name
    pub name: String,
    /// Direct-message topic of this agent
    pub agent_topic: String,
    /// Team-wide broadcast topic
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast_topic: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub agent: AgentMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubsub: Option<PubSubInfo>,
}

impl RegistryEntry {
    pub fn new(agent_type: impl Into<String>, role: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            agent: AgentMetadata {
                agent_type: agent_type.into(),
                role: role.into(),
                goal: goal.into(),
                orchestrator: false,
            },
            pubsub: None,
        }
    }

    pub fn as_orchestrator(mut self) -> Self {
        self.agent.orchestrator = true;
        self
    }

    pub fn with_pubsub(mut self, pubsub: PubSubInfo) -> Self {
        self.pubsub = Some(pubsub);
        self
    }

    pub fn is_orchestrator(&self) -> bool {
        self.agent.orchestrator
    }
}

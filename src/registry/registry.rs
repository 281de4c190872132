//! Team presence directory backed by a shared state key.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::RegistryEntry;
use crate::state::{with_etag_retry, StateResult, StateStore, StateStoreExt, Versioned, DEFAULT_MAX_ATTEMPTS};

/// Reply used when no peer is available
pub const NO_AVAILABLE_AGENTS: &str = "No available agents";

/// Agents of one team, keyed by agent name
pub type TeamAgents = BTreeMap<String, RegistryEntry>;

/// Shared directory agents use to find each other.
///
/// All members of a team read and write the same state key; every write is a
/// load-modify-save under EtagRetry.
#[derive(Clone)]
pub struct AgentRegistry {
    store: Arc<dyn StateStore>,
    key: String,
    max_attempts: u32,
}

impl AgentRegistry {
    pub fn new(store: Arc<dyn StateStore>, team_name: &str) -> Self {
        Self {
            store,
            key: Self::team_key(team_name),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn team_key(team_name: &str) -> String {
        format!("agents_registry:{}", team_name)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    async fn load(&self) -> StateResult<Versioned<TeamAgents>> {
        Ok(self
            .store
            .get_json::<TeamAgents>(&self.key)
            .await?
            .unwrap_or_else(|| Versioned::new(TeamAgents::new(), None)))
    }

    async fn modify<F>(&self, mutator: F) -> StateResult<()>
    where
        F: Fn(&mut TeamAgents) -> bool + Send + Sync,
    {
        let mutator = &mutator;
        with_etag_retry(self.max_attempts, move || async move {
            let mut snapshot = self.load().await?;
            if mutator(&mut snapshot.value) {
                self.store
                    .save_json(&self.key, &snapshot.value, snapshot.condition())
                    .await?;
            }
            Ok(())
        })
        .await
    }

    /// Add or replace `name` in the team
    pub async fn register_agent(&self, name: &str, entry: RegistryEntry) -> StateResult<()> {
        self.modify(|agents| {
            if agents.get(name) == Some(&entry) {
                return false;
            }
            agents.insert(name.to_string(), entry.clone());
            true
        })
        .await?;
        tracing::info!(agent = name, key = %self.key, "registered agent");
        Ok(())
    }

    /// Remove `name` from the team; absent names are a no-op
    pub async fn deregister_agent(&self, name: &str) -> StateResult<()> {
        self.modify(|agents| agents.remove(name).is_some()).await?;
        tracing::info!(agent = name, key = %self.key, "deregistered agent");
        Ok(())
    }

    pub async fn list_team_agents(&self) -> StateResult<TeamAgents> {
        Ok(self.load().await?.value)
    }

    /// Workers `name` may hand work to: everyone except itself and orchestrators
    pub async fn list_peers(&self, name: &str) -> StateResult<TeamAgents> {
        let mut agents = self.list_team_agents().await?;
        agents.retain(|peer, entry| peer != name && !entry.is_orchestrator());
        Ok(agents)
    }
}

/// Human-readable listing for prompts, or [`NO_AVAILABLE_AGENTS`]
pub fn format_listing(agents: &TeamAgents) -> String {
    if agents.is_empty() {
        return NO_AVAILABLE_AGENTS.to_string();
    }

    agents
        .iter()
        .map(|(name, entry)| {
            let mut line = format!("- {}", name);
            if !entry.agent.role.is_empty() {
                line.push_str(&format!(": {}", entry.agent.role));
            }
            if !entry.agent.goal.is_empty() {
                line.push_str(&format!(" (Goal: {})", entry.agent.goal));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

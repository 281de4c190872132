//! Agent workflow state persistence
//!
//! Load/save/ensure-instance over a shared [`StateStore`]. All read-modify-write
//! paths run inside [`with_etag_retry`], one full load-modify-save per attempt.

use serde_json::Value;
use std::sync::Arc;

use super::errors::{StateError, StateResult};
use super::models::{AgentWorkflowEntry, AgentWorkflowState, EntryOrigin};
use super::retry::{with_etag_retry, DEFAULT_MAX_ATTEMPTS};
use super::store::{StateStore, StateStoreExt, Versioned};

/// Persists one agent's [`AgentWorkflowState`] under `"<agent>:workflow_state"`
#[derive(Clone)]
pub struct AgentStateStore {
    store: Arc<dyn StateStore>,
    key: String,
    max_attempts: u32,
}

impl AgentStateStore {
    pub fn new(store: Arc<dyn StateStore>, agent_name: &str) -> Self {
        Self {
            store,
            key: Self::state_key(agent_name),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn state_key(agent_name: &str) -> String {
        format!("{}:workflow_state", agent_name)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// The stored map, or an empty one if the key is absent
    pub async fn load_state(&self) -> StateResult<AgentWorkflowState> {
        Ok(self.load_versioned().await?.value)
    }

    /// The stored map together with the ETag it was read at
    pub async fn load_versioned(&self) -> StateResult<Versioned<AgentWorkflowState>> {
        Ok(self
            .store
            .get_json::<AgentWorkflowState>(&self.key)
            .await?
            .unwrap_or_else(|| Versioned::new(AgentWorkflowState::default(), None)))
    }

    /// Compare-and-swap write of a snapshot obtained from [`load_versioned`].
    ///
    /// Exactly one attempt, never retried: re-sending a stale snapshot cannot
    /// succeed, so `EtagMismatch` goes straight back to the caller. The retried
    /// path is [`update_state`](Self::update_state), which reloads and reapplies
    /// its mutator on every attempt.
    pub async fn save_state(&self, snapshot: &Versioned<AgentWorkflowState>) -> StateResult<String> {
        self.store
            .save_json(&self.key, &snapshot.value, snapshot.condition())
            .await
    }

    /// Load, mutate and save under EtagRetry.
    ///
    /// The mutator runs once per attempt against freshly loaded state and
    /// returns `Ok(false)` to skip the write.
    pub async fn update_state<F>(&self, mutator: F) -> StateResult<AgentWorkflowState>
    where
        F: Fn(&mut AgentWorkflowState) -> StateResult<bool> + Send + Sync,
    {
        let mutator = &mutator;
        with_etag_retry(self.max_attempts, move || async move {
            let mut snapshot = self.load_versioned().await?;
            if mutator(&mut snapshot.value)? {
                self.save_state(&snapshot).await?;
            }
            Ok(snapshot.value)
        })
        .await
    }

    /// Mutate one existing instance under EtagRetry
    pub async fn update_instance<F>(&self, instance_id: &str, mutator: F) -> StateResult<AgentWorkflowEntry>
    where
        F: Fn(&mut AgentWorkflowEntry) + Send + Sync,
    {
        let state = self
            .update_state(|state| {
                let entry = state
                    .get_mut(instance_id)
                    .ok_or_else(|| StateError::InstanceNotFound {
                        instance_id: instance_id.to_string(),
                    })?;
                mutator(entry);
                Ok(true)
            })
            .await?;

        state
            .instances
            .get(instance_id)
            .cloned()
            .ok_or_else(|| StateError::InstanceNotFound {
                instance_id: instance_id.to_string(),
            })
    }

    pub async fn get_instance(&self, instance_id: &str) -> StateResult<Option<AgentWorkflowEntry>> {
        Ok(self.load_state().await?.instances.remove(instance_id))
    }

    /// Create the entry for `instance_id` if it does not exist yet.
    ///
    /// An existing entry is never touched, so a duplicate init cannot clobber
    /// messages or tool history.
    pub async fn ensure_instance(
        &self,
        instance_id: &str,
        input_value: Value,
        origin: EntryOrigin,
    ) -> StateResult<AgentWorkflowState> {
        self.update_state(|state| {
            if state.instances.contains_key(instance_id) {
                return Ok(false);
            }
            tracing::debug!(instance_id, key = %self.key, "creating workflow entry");
            state.instances.insert(
                instance_id.to_string(),
                AgentWorkflowEntry::new(input_value.clone(), origin.clone()),
            );
            Ok(true)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Message;
    use crate::state::InMemoryStateStore;
    use serde_json::json;

    fn agent_state() -> AgentStateStore {
        AgentStateStore::new(Arc::new(InMemoryStateStore::new()), "writer")
    }

    #[tokio::test]
    async fn test_load_state_defaults_to_empty() {
        let state = agent_state();
        assert_eq!(state.key(), "writer:workflow_state");
        assert!(state.load_state().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_instance_is_idempotent() {
        let state = agent_state();
        state
            .ensure_instance("wf-1", json!("draft a haiku"), EntryOrigin::new())
            .await
            .unwrap();
        state
            .update_instance("wf-1", |entry| entry.push_message(Message::user("draft a haiku")))
            .await
            .unwrap();

        let after = state
            .ensure_instance("wf-1", json!("something else"), EntryOrigin::new())
            .await
            .unwrap();
        let entry = after.get("wf-1").unwrap();
        assert_eq!(entry.input_value, json!("draft a haiku"));
        assert_eq!(entry.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_save_state_rejects_stale_snapshot() {
        let state = agent_state();
        let stale = state.load_versioned().await.unwrap();
        state
            .ensure_instance("wf-1", json!(1), EntryOrigin::new())
            .await
            .unwrap();

        let err = state.save_state(&stale).await.unwrap_err();
        assert!(err.is_conflict());
        // The rejected snapshot did not overwrite the newer write
        assert!(state.get_instance("wf-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_update_missing_instance_fails() {
        let state = agent_state();
        let err = state.update_instance("nope", |_| {}).await.unwrap_err();
        assert!(matches!(err, StateError::InstanceNotFound { .. }));
    }
}

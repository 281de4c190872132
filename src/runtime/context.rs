//! The handle a workflow body uses to call activities.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::activity::execute_activity;
use super::engine::RuntimeInner;
use super::errors::{RuntimeError, RuntimeResult};
use super::history::{ActivityOutcome, WorkflowInstance};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JournalMode {
    /// Replay recorded history, then execute and record new calls
    Live,
    /// Replay recorded history only; running past its end is an error
    ReplayOnly,
}

struct Journal {
    record: WorkflowInstance,
    cursor: usize,
    mode: JournalMode,
}

struct ContextInner {
    runtime: Arc<RuntimeInner>,
    instance_id: String,
    journal: Mutex<Journal>,
}

/// Deterministic view of one workflow instance.
///
/// This is the only thing a workflow body receives. Every side effect goes
/// through [`WorkflowContext::call_activity`], whose results come from
/// history whenever history already has them.
#[derive(Clone)]
pub struct WorkflowContext {
    inner: Arc<ContextInner>,
}

impl std::fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("instance_id", &self.inner.instance_id)
            .finish()
    }
}

impl WorkflowContext {
    pub(crate) fn new(runtime: Arc<RuntimeInner>, record: WorkflowInstance, mode: JournalMode) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                runtime,
                instance_id: record.instance_id.clone(),
                journal: Mutex::new(Journal {
                    record,
                    cursor: 0,
                    mode,
                }),
            }),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    /// True while the next activity call will be answered from history
    pub async fn is_replaying(&self) -> bool {
        let journal = self.inner.journal.lock().await;
        journal.cursor < journal.record.history.len()
    }

    /// Call the activity registered as `name`.
    ///
    /// On replay the recorded result (or recorded failure) at this history
    /// position is returned without running the activity. A different
    /// activity name at the same position is [`RuntimeError::NonDeterministic`].
    pub async fn call_activity<I, O>(&self, name: &str, input: &I) -> RuntimeResult<O>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let input = serde_json::to_value(input)?;
        let outcome = self.next_outcome(name, input).await?;

        match outcome {
            ActivityOutcome::Completed { result } => Ok(serde_json::from_value(result)?),
            ActivityOutcome::Failed { error } => Err(RuntimeError::ActivityFailed {
                activity: name.to_string(),
                message: error,
            }),
        }
    }

    async fn next_outcome(&self, name: &str, input: serde_json::Value) -> RuntimeResult<ActivityOutcome> {
        let mut journal = self.inner.journal.lock().await;
        let position = journal.cursor;

        let outcome = match journal.record.history.get(position) {
            Some(event) if event.activity != name => {
                return Err(RuntimeError::NonDeterministic {
                    position,
                    expected: event.activity.clone(),
                    found: name.to_string(),
                });
            }
            Some(event) => {
                tracing::trace!(instance_id = %self.inner.instance_id, activity = name, position, "replayed from history");
                event.outcome.clone()
            }
            None if journal.mode == JournalMode::ReplayOnly => {
                return Err(RuntimeError::NonDeterministic {
                    position,
                    expected: "<end of history>".to_string(),
                    found: name.to_string(),
                });
            }
            None => {
                let runtime = &self.inner.runtime;
                let activity = runtime.activity(name)?;
                let outcome = execute_activity(
                    &activity,
                    &runtime.options().activity_retry,
                    &self.inner.instance_id,
                    name,
                    &input,
                )
                .await;

                journal.record.record(name, input, outcome.clone());
                runtime.persist(&journal.record).await?;
                outcome
            }
        };

        journal.cursor += 1;
        Ok(outcome)
    }

    /// Copy of the instance record as this context currently sees it
    pub(crate) async fn snapshot(&self) -> WorkflowInstance {
        self.inner.journal.lock().await.record.clone()
    }
}

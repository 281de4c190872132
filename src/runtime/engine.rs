//! Workflow runtime: registration, scheduling, replay and recovery.
//!
//! Instance records live in a [`StateStore`] under `workflow:<id>`; the set
//! of unfinished instances is kept under `workflow:index` so a restarted
//! runtime can pick them up again. A resumed instance re-runs its workflow
//! body from the top against recorded history.

use anyhow::Context as _;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::activity::{ActivityContext, ActivityFn, ActivityRetryPolicy};
use super::context::{JournalMode, WorkflowContext};
use super::errors::{RuntimeError, RuntimeResult};
use super::history::{WorkflowInstance, WorkflowStatus};
use crate::state::{
    with_etag_retry, InMemoryStateStore, StateStore, StateStoreExt, Versioned, WriteCondition, DEFAULT_MAX_ATTEMPTS,
};

/// Store key of the unfinished-instance index
pub const INDEX_KEY: &str = "workflow:index";

type WorkflowFn = Arc<dyn Fn(WorkflowContext, Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuntimeOptions {
    pub activity_retry: ActivityRetryPolicy,
    /// EtagRetry attempts for index updates
    pub max_etag_attempts: u32,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            activity_retry: ActivityRetryPolicy::default(),
            max_etag_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

pub(crate) struct RuntimeInner {
    store: Arc<dyn StateStore>,
    options: RuntimeOptions,
    workflows: RwLock<HashMap<String, WorkflowFn>>,
    activities: RwLock<HashMap<String, ActivityFn>>,
    running: AtomicBool,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    watchers: Mutex<HashMap<String, watch::Sender<u64>>>,
}

impl RuntimeInner {
    pub(crate) fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    pub(crate) fn activity(&self, name: &str) -> RuntimeResult<ActivityFn> {
        self.activities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownActivity(name.to_string()))
    }

    fn workflow(&self, name: &str) -> RuntimeResult<WorkflowFn> {
        self.workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownWorkflow(name.to_string()))
    }

    /// Single writer per instance, so records are saved unconditionally
    pub(crate) async fn persist(&self, record: &WorkflowInstance) -> RuntimeResult<()> {
        self.store
            .save_json(&WorkflowInstance::key(&record.instance_id), record, WriteCondition::Always)
            .await?;
        Ok(())
    }

    async fn load(&self, instance_id: &str) -> RuntimeResult<Option<WorkflowInstance>> {
        Ok(self
            .store
            .get_json::<WorkflowInstance>(&WorkflowInstance::key(instance_id))
            .await?
            .map(|versioned| versioned.value))
    }

    async fn pending_instances(&self) -> RuntimeResult<BTreeSet<String>> {
        Ok(self
            .store
            .get_json::<BTreeSet<String>>(INDEX_KEY)
            .await?
            .map(|versioned| versioned.value)
            .unwrap_or_default())
    }

    async fn update_index(&self, instance_id: &str, add: bool) -> RuntimeResult<()> {
        let store = &self.store;
        with_etag_retry(self.options.max_etag_attempts, || async move {
            let snapshot = match store.get_json::<BTreeSet<String>>(INDEX_KEY).await? {
                Some(versioned) => versioned,
                None => Versioned::new(BTreeSet::new(), None),
            };
            let mut ids = snapshot.value.clone();
            let changed = if add {
                ids.insert(instance_id.to_string())
            } else {
                ids.remove(instance_id)
            };
            if changed {
                store.save_json(INDEX_KEY, &ids, snapshot.condition()).await?;
            }
            Ok(())
        })
        .await?;
        Ok(())
    }

    fn subscribe(&self, instance_id: &str) -> watch::Receiver<u64> {
        let mut watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
        watchers
            .entry(instance_id.to_string())
            .or_insert_with(|| watch::channel(0).0)
            .subscribe()
    }

    /// Whether a live driver task owns `instance_id`
    fn has_driver(&self, instance_id: &str) -> bool {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(instance_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    fn notify(&self, instance_id: &str) {
        let sender = self
            .watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(instance_id);
        if let Some(sender) = sender {
            sender.send_modify(|version| *version += 1);
        }
    }

    fn spawn_driver(self: &Arc<Self>, instance_id: String) {
        // Held across spawn so the task cannot deregister before it is registered
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if tasks.get(&instance_id).is_some_and(|handle| !handle.is_finished()) {
            tracing::debug!(instance_id = %instance_id, "workflow already has a driver");
            return;
        }

        let inner = Arc::clone(self);
        let id = instance_id.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = inner.drive(&id).await {
                tracing::error!(instance_id = %id, "workflow driver stopped: {}", e);
            }
            inner
                .tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            inner.notify(&id);
        });
        tasks.insert(instance_id, handle);
    }

    async fn drive(self: &Arc<Self>, instance_id: &str) -> RuntimeResult<()> {
        let mut record = self
            .load(instance_id)
            .await?
            .ok_or_else(|| RuntimeError::InstanceNotFound(instance_id.to_string()))?;

        if record.status.is_terminal() {
            return self.update_index(instance_id, false).await;
        }

        let resumed = !record.history.is_empty();
        record.status = WorkflowStatus::Running;
        record.updated_at = chrono::Utc::now();
        self.persist(&record).await?;
        tracing::info!(
            instance_id,
            workflow = %record.workflow_name,
            recorded_activities = record.history.len(),
            resumed,
            "workflow running"
        );

        let input = record.input.clone();
        let result = match self.workflow(&record.workflow_name) {
            Ok(workflow) => {
                let ctx = WorkflowContext::new(Arc::clone(self), record, JournalMode::Live);
                let result = workflow(ctx.clone(), input).await;
                record = ctx.snapshot().await;
                result
            }
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(output) => {
                tracing::info!(instance_id, "workflow completed");
                record.complete(output);
            }
            Err(e) => {
                tracing::warn!(instance_id, "workflow failed: {:#}", e);
                record.fail(format!("{:#}", e));
            }
        }

        self.persist(&record).await?;
        self.update_index(instance_id, false).await
    }
}

/// Hosts workflows and activities and drives their instances.
///
/// Cheap to clone; clones share registrations, running instances and the
/// backing store.
#[derive(Clone)]
pub struct WorkflowRuntime {
    inner: Arc<RuntimeInner>,
}

impl std::fmt::Debug for WorkflowRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRuntime")
            .field("store", &self.inner.store.backend_type())
            .field("running", &self.is_running())
            .finish()
    }
}

impl WorkflowRuntime {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self::with_options(store, RuntimeOptions::default())
    }

    pub fn with_options(store: Arc<dyn StateStore>, options: RuntimeOptions) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                store,
                options,
                workflows: RwLock::new(HashMap::new()),
                activities: RwLock::new(HashMap::new()),
                running: AtomicBool::new(false),
                tasks: Mutex::new(HashMap::new()),
                watchers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Runtime over a fresh in-memory store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStateStore::new()))
    }

    pub fn store(&self) -> Arc<dyn StateStore> {
        Arc::clone(&self.inner.store)
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.inner.options
    }

    /// Register a workflow body. Its input and output travel as JSON.
    pub fn register_workflow<I, O, F, Fut>(&self, name: impl Into<String>, workflow: F) -> RuntimeResult<()>
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        F: Fn(WorkflowContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    {
        let name = name.into();
        let workflow = Arc::new(workflow);
        let label = name.clone();
        let wrapped: WorkflowFn = Arc::new(move |ctx: WorkflowContext, input: Value| {
            let workflow = Arc::clone(&workflow);
            let label = label.clone();
            async move {
                let input: I =
                    serde_json::from_value(input).with_context(|| format!("invalid input for workflow '{}'", label))?;
                let output = workflow(ctx, input).await?;
                Ok(serde_json::to_value(output)?)
            }
            .boxed()
        });

        let mut workflows = self.inner.workflows.write().unwrap_or_else(PoisonError::into_inner);
        if workflows.contains_key(&name) {
            return Err(RuntimeError::duplicate("workflow", name));
        }
        tracing::debug!(workflow = %name, "registered workflow");
        workflows.insert(name, wrapped);
        Ok(())
    }

    /// Register an activity. Activities run at least once per history slot.
    pub fn register_activity<I, O, F, Fut>(&self, name: impl Into<String>, activity: F) -> RuntimeResult<()>
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        F: Fn(ActivityContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    {
        let name = name.into();
        let activity = Arc::new(activity);
        let label = name.clone();
        let wrapped: ActivityFn = Arc::new(move |ctx: ActivityContext, input: Value| {
            let activity = Arc::clone(&activity);
            let label = label.clone();
            async move {
                let input: I =
                    serde_json::from_value(input).with_context(|| format!("invalid input for activity '{}'", label))?;
                let output = activity(ctx, input).await?;
                Ok(serde_json::to_value(output)?)
            }
            .boxed()
        });

        let mut activities = self.inner.activities.write().unwrap_or_else(PoisonError::into_inner);
        if activities.contains_key(&name) {
            return Err(RuntimeError::duplicate("activity", name));
        }
        tracing::debug!(activity = %name, "registered activity");
        activities.insert(name, wrapped);
        Ok(())
    }

    pub fn has_workflow(&self, name: &str) -> bool {
        self.inner
            .workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn has_activity(&self, name: &str) -> bool {
        self.inner
            .activities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Start accepting work and resume every unfinished instance from the index
    pub async fn start(&self) -> RuntimeResult<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(RuntimeError::AlreadyStarted);
        }

        let pending = match self.inner.pending_instances().await {
            Ok(pending) => pending,
            Err(e) => {
                self.inner.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        tracing::info!(backend = self.inner.store.backend_type(), recovering = pending.len(), "workflow runtime started");
        for instance_id in pending {
            self.inner.spawn_driver(instance_id);
        }
        Ok(())
    }

    /// Stop driving instances. Unfinished instances stay in the index and
    /// are resumed by the next `start`.
    pub async fn stop(&self) -> RuntimeResult<()> {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return Err(RuntimeError::NotStarted);
        }

        let handles: Vec<(String, JoinHandle<()>)> = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (instance_id, handle) in &handles {
            handle.abort();
            tracing::debug!(instance_id = %instance_id, "workflow driver aborted");
        }
        for (instance_id, handle) in handles {
            let _ = handle.await;
            // Waiters on an aborted instance must not wait for a driver that is gone
            self.inner.notify(&instance_id);
        }

        tracing::info!("workflow runtime stopped");
        Ok(())
    }

    fn ensure_running(&self) -> RuntimeResult<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(RuntimeError::NotStarted)
        }
    }

    /// Create and start a new instance of `workflow_name`, returning its id
    pub async fn schedule_new_workflow<I>(
        &self,
        workflow_name: &str,
        input: &I,
        instance_id: Option<String>,
    ) -> RuntimeResult<String>
    where
        I: Serialize + ?Sized,
    {
        self.ensure_running()?;
        if !self.has_workflow(workflow_name) {
            return Err(RuntimeError::UnknownWorkflow(workflow_name.to_string()));
        }

        let instance_id = instance_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let record = WorkflowInstance::new(&instance_id, workflow_name, serde_json::to_value(input)?);

        match self
            .inner
            .store
            .save_json(&WorkflowInstance::key(&instance_id), &record, WriteCondition::IfAbsent)
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_conflict() => return Err(RuntimeError::InstanceExists(instance_id)),
            Err(e) => return Err(e.into()),
        }
        self.inner.update_index(&instance_id, true).await?;

        tracing::info!(instance_id = %instance_id, workflow = workflow_name, "workflow scheduled");
        self.inner.spawn_driver(instance_id.clone());
        Ok(instance_id)
    }

    pub async fn get_instance(&self, instance_id: &str) -> RuntimeResult<Option<WorkflowInstance>> {
        self.inner.load(instance_id).await
    }

    /// Wait until the instance reaches a terminal status.
    ///
    /// Fails with [`RuntimeError::Interrupted`] when no driver is left to
    /// finish the instance: the runtime was stopped, or the driver gave up
    /// before recording a terminal status. The instance stays in the index
    /// and a later `start` resumes it.
    pub async fn wait_for_completion(&self, instance_id: &str) -> RuntimeResult<WorkflowInstance> {
        loop {
            // Subscribe and check the driver before loading, so a driver that
            // finishes in between is seen as a terminal record or a change
            let mut changes = self.inner.subscribe(instance_id);
            let driven = self.inner.has_driver(instance_id);
            let record = self
                .inner
                .load(instance_id)
                .await?
                .ok_or_else(|| RuntimeError::InstanceNotFound(instance_id.to_string()))?;
            if record.status.is_terminal() {
                return Ok(record);
            }
            if !driven {
                return Err(RuntimeError::Interrupted {
                    instance_id: instance_id.to_string(),
                    status: record.status,
                });
            }
            if changes.changed().await.is_err() {
                tracing::trace!(instance_id, "instance watcher closed, checking again");
            }
        }
    }

    /// Drive an unfinished instance again, replaying its history first.
    /// Terminal instances are left alone.
    pub async fn resume_workflow(&self, instance_id: &str) -> RuntimeResult<()> {
        self.ensure_running()?;
        let record = self
            .inner
            .load(instance_id)
            .await?
            .ok_or_else(|| RuntimeError::InstanceNotFound(instance_id.to_string()))?;

        if record.status.is_terminal() {
            tracing::debug!(instance_id, status = %record.status, "instance already finished");
            return Ok(());
        }
        self.inner.update_index(instance_id, true).await?;
        self.inner.spawn_driver(instance_id.to_string());
        Ok(())
    }

    /// Re-run a workflow body purely from recorded history.
    ///
    /// No activity executes and nothing is written. Running past the end of
    /// history, or calling a different activity than was recorded, fails
    /// with [`RuntimeError::NonDeterministic`].
    pub async fn replay(&self, instance_id: &str) -> RuntimeResult<Value> {
        let record = self
            .inner
            .load(instance_id)
            .await?
            .ok_or_else(|| RuntimeError::InstanceNotFound(instance_id.to_string()))?;
        let workflow = self.inner.workflow(&record.workflow_name)?;
        let input = record.input.clone();
        let ctx = WorkflowContext::new(Arc::clone(&self.inner), record, JournalMode::ReplayOnly);

        workflow(ctx, input).await.map_err(|e| match e.downcast::<RuntimeError>() {
            Ok(runtime_error) => runtime_error,
            Err(other) => RuntimeError::WorkflowFailed {
                instance_id: instance_id.to_string(),
                message: format!("{:#}", other),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::history::ActivityOutcome;
    use std::sync::atomic::AtomicU32;

    fn counting_runtime(calls: Arc<AtomicU32>) -> WorkflowRuntime {
        let runtime = WorkflowRuntime::with_options(
            Arc::new(InMemoryStateStore::new()),
            RuntimeOptions {
                activity_retry: ActivityRetryPolicy::no_retry(),
                ..RuntimeOptions::default()
            },
        );

        runtime
            .register_activity("double", move |_ctx: ActivityContext, n: i64| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(n * 2)
                }
            })
            .unwrap();

        runtime
            .register_workflow("quadruple", |ctx: WorkflowContext, n: i64| async move {
                let once: i64 = ctx.call_activity("double", &n).await?;
                let twice: i64 = ctx.call_activity("double", &once).await?;
                Ok::<_, anyhow::Error>(twice)
            })
            .unwrap();

        runtime
    }

    #[tokio::test]
    async fn test_runs_workflow_to_completion() {
        let calls = Arc::new(AtomicU32::new(0));
        let runtime = counting_runtime(calls.clone());
        runtime.start().await.unwrap();

        let id = runtime.schedule_new_workflow("quadruple", &3, None).await.unwrap();
        let record = runtime.wait_for_completion(&id).await.unwrap();

        assert_eq!(record.status, WorkflowStatus::Completed);
        assert_eq!(record.output, Some(Value::from(12)));
        assert_eq!(record.history.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Finished instances leave the index
        assert!(runtime.inner.pending_instances().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replay_uses_history_without_executing() {
        let calls = Arc::new(AtomicU32::new(0));
        let runtime = counting_runtime(calls.clone());
        runtime.start().await.unwrap();

        let id = runtime.schedule_new_workflow("quadruple", &5, None).await.unwrap();
        runtime.wait_for_completion(&id).await.unwrap();

        let replayed = runtime.replay(&id).await.unwrap();
        assert_eq!(replayed, Value::from(20));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_resume_continues_after_recorded_history() {
        let calls = Arc::new(AtomicU32::new(0));
        let runtime = counting_runtime(calls.clone());

        // A crash after the first activity was recorded
        let mut record = WorkflowInstance::new("crashed", "quadruple", Value::from(1));
        record.status = WorkflowStatus::Running;
        record.record("double", Value::from(1), ActivityOutcome::Completed { result: Value::from(2) });
        runtime.inner.persist(&record).await.unwrap();
        runtime.inner.update_index("crashed", true).await.unwrap();

        runtime.start().await.unwrap();
        let record = runtime.wait_for_completion("crashed").await.unwrap();

        assert_eq!(record.status, WorkflowStatus::Completed);
        assert_eq!(record.output, Some(Value::from(4)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_context_reports_replay_until_history_runs_out() {
        let calls = Arc::new(AtomicU32::new(0));
        let runtime = counting_runtime(calls.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let flags = seen.clone();
        runtime
            .register_workflow("observed", move |ctx: WorkflowContext, n: i64| {
                let flags = flags.clone();
                async move {
                    let mut value = n;
                    for _ in 0..2 {
                        let replaying = ctx.is_replaying().await;
                        flags.lock().unwrap().push(replaying);
                        value = ctx.call_activity("double", &value).await?;
                    }
                    Ok::<_, anyhow::Error>(value)
                }
            })
            .unwrap();

        let mut record = WorkflowInstance::new("halfway", "observed", Value::from(1));
        record.record("double", Value::from(1), ActivityOutcome::Completed { result: Value::from(2) });
        runtime.inner.persist(&record).await.unwrap();
        runtime.inner.update_index("halfway", true).await.unwrap();

        runtime.start().await.unwrap();
        let record = runtime.wait_for_completion("halfway").await.unwrap();

        assert_eq!(record.output, Some(Value::from(4)));
        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_mismatched_history_fails_instance() {
        let calls = Arc::new(AtomicU32::new(0));
        let runtime = counting_runtime(calls.clone());
        runtime.start().await.unwrap();

        let mut record = WorkflowInstance::new("diverged", "quadruple", Value::from(1));
        record.record("triple", Value::from(1), ActivityOutcome::Completed { result: Value::from(3) });
        runtime.inner.persist(&record).await.unwrap();

        runtime.resume_workflow("diverged").await.unwrap();
        let record = runtime.wait_for_completion("diverged").await.unwrap();

        assert_eq!(record.status, WorkflowStatus::Failed);
        assert!(record.error.unwrap().contains("Non-deterministic"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_recorded_failure_replays_without_reexecuting() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let runtime = WorkflowRuntime::with_options(
            Arc::new(InMemoryStateStore::new()),
            RuntimeOptions {
                activity_retry: ActivityRetryPolicy::no_retry(),
                ..RuntimeOptions::default()
            },
        );
        runtime
            .register_activity("explode", move |_ctx: ActivityContext, _: Value| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<Value, _>(anyhow::anyhow!("kaboom"))
                }
            })
            .unwrap();
        runtime
            .register_workflow("fragile", |ctx: WorkflowContext, _: Value| async move {
                let out: Value = ctx.call_activity("explode", &Value::Null).await?;
                Ok::<_, anyhow::Error>(out)
            })
            .unwrap();
        runtime.start().await.unwrap();

        let id = runtime.schedule_new_workflow("fragile", &Value::Null, None).await.unwrap();
        let record = runtime.wait_for_completion(&id).await.unwrap();
        assert_eq!(record.status, WorkflowStatus::Failed);
        assert!(record.error.unwrap().contains("kaboom"));

        let replayed = runtime.replay(&id).await;
        assert!(matches!(replayed, Err(RuntimeError::ActivityFailed { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_waiter_fails_when_runtime_stops() {
        let entered = Arc::new(tokio::sync::Notify::new());
        let signal = entered.clone();
        let runtime = WorkflowRuntime::in_memory();
        runtime
            .register_activity("hang", move |_ctx: ActivityContext, _: Value| {
                let signal = signal.clone();
                async move {
                    signal.notify_one();
                    std::future::pending::<()>().await;
                    Ok::<_, anyhow::Error>(Value::Null)
                }
            })
            .unwrap();
        runtime
            .register_workflow("parked", |ctx: WorkflowContext, _: Value| async move {
                let out: Value = ctx.call_activity("hang", &Value::Null).await?;
                Ok::<_, anyhow::Error>(out)
            })
            .unwrap();
        runtime.start().await.unwrap();

        let id = runtime.schedule_new_workflow("parked", &Value::Null, None).await.unwrap();
        entered.notified().await;

        let waiter = {
            let runtime = runtime.clone();
            let id = id.clone();
            tokio::spawn(async move { runtime.wait_for_completion(&id).await })
        };
        tokio::task::yield_now().await;
        runtime.stop().await.unwrap();

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), waiter)
            .await
            .expect("waiter returned")
            .unwrap();
        assert!(matches!(
            result,
            Err(RuntimeError::Interrupted { status: WorkflowStatus::Running, .. })
        ));

        // The instance is still pending and a late waiter fails the same way
        assert!(runtime.inner.pending_instances().await.unwrap().contains(&id));
        assert!(matches!(
            runtime.wait_for_completion(&id).await,
            Err(RuntimeError::Interrupted { .. })
        ));
    }

    #[tokio::test]
    async fn test_lifecycle_misuse() {
        let runtime = WorkflowRuntime::in_memory();
        assert!(matches!(runtime.stop().await, Err(RuntimeError::NotStarted)));
        assert!(matches!(
            runtime.schedule_new_workflow("anything", &1, None).await,
            Err(RuntimeError::NotStarted)
        ));

        runtime.start().await.unwrap();
        assert!(matches!(runtime.start().await, Err(RuntimeError::AlreadyStarted)));
        runtime.stop().await.unwrap();
        assert!(!runtime.is_running());
    }

    #[tokio::test]
    async fn test_registration_and_scheduling_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let runtime = counting_runtime(calls);
        runtime.start().await.unwrap();

        let duplicate = runtime.register_activity("double", |_ctx: ActivityContext, n: i64| async move {
            Ok::<_, anyhow::Error>(n)
        });
        assert!(matches!(duplicate, Err(RuntimeError::DuplicateRegistration { .. })));

        assert!(matches!(
            runtime.schedule_new_workflow("missing", &1, None).await,
            Err(RuntimeError::UnknownWorkflow(_))
        ));

        runtime
            .schedule_new_workflow("quadruple", &1, Some("fixed".into()))
            .await
            .unwrap();
        assert!(matches!(
            runtime.schedule_new_workflow("quadruple", &1, Some("fixed".into())).await,
            Err(RuntimeError::InstanceExists(_))
        ));
    }
}

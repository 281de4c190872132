//! Durable agents.
//!
//! A [`DurableAgent`] binds its collaborators (LLM, tools, state, memory,
//! team registry, messaging) into activities, registers them together with
//! its workflows on a [`WorkflowRuntime`], and exposes a register / start /
//! stop lifecycle. Work is submitted with [`DurableAgent::run`] (tool-calling
//! loop) or [`DurableAgent::orchestrate`] (multi-agent loop).
//!
//! # Example
//!
//! ```ignore
//! use durable_agents::agent::DurableAgentBuilder;
//! use std::sync::Arc;
//!
//! let agent = DurableAgentBuilder::new("poet")
//!     .role("Poet")
//!     .goal("Write short verse")
//!     .llm(Arc::new(my_provider))
//!     .build()?;
//!
//! agent.start().await?;
//! let reply = agent.run("a haiku about rust").await?;
//! agent.stop().await?;
//! ```

pub mod activities;
pub mod builder;
pub mod errors;
pub mod invoker;
pub mod memory;
pub mod orchestration_activities;
pub mod orchestration_workflow;
pub mod workflow;

#[cfg(test)]
pub(crate) mod test_support;

pub use activities::{ActivityNames, AgentDeps, AgentProfile, AgentTaskInput, FinalizeRequest};
pub use builder::DurableAgentBuilder;
pub use errors::{AgentError, AgentResult};
pub use invoker::{coerce_agent_response, AgentInvoker, LocalAgentDirectory, TaskHandler};
pub use memory::{ConversationMemory, InMemoryConversation, DEFAULT_TEAM_WINDOW, TEAM_SESSION};
pub use orchestration_activities::OrchestrationDeps;
pub use workflow::AgentWorkflowStep;

#[cfg(feature = "http")]
pub use invoker::DaprServiceInvoker;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::messaging::{AgentMessenger, MessageEnvelope, MessageKind};
use crate::orchestration::OrchestrationMode;
use crate::provider::{Message, MessageRole};
use crate::registry::{AgentRegistry, RegistryEntry};
use crate::runtime::{RuntimeError, RuntimeOptions, WorkflowRuntime, WorkflowStatus};
use crate::state::{AgentWorkflowEntry, EntryOrigin, StateStore};

use activities::{
    with_deps, CALL_LLM, FINALIZE_WORKFLOW, RECORD_INITIAL_ENTRY, RUN_TOOL, SAVE_TOOL_RESULTS,
};
use orchestration_activities as orch;

const AGENT_TYPE: &str = "DurableAgent";

pub(crate) struct OrchestrationSetup {
    pub(crate) mode: OrchestrationMode,
    pub(crate) max_iterations: u32,
    pub(crate) deps: OrchestrationDeps,
}

#[derive(Default)]
struct Lifecycle {
    runtime: Option<WorkflowRuntime>,
    registered: bool,
    started: bool,
    /// Whether `start()` started the runtime, and so `stop()` should stop it
    owns_runtime: bool,
    cancel: Option<CancellationToken>,
    listeners: Vec<JoinHandle<()>>,
}

struct AgentInner {
    deps: AgentDeps,
    orchestration: Option<OrchestrationSetup>,
    registry: Option<AgentRegistry>,
    messenger: Option<AgentMessenger>,
    names: ActivityNames,
    store: Arc<dyn StateStore>,
    runtime_options: RuntimeOptions,
    lifecycle: Mutex<Lifecycle>,
}

/// A crash-safe LLM agent hosted on a workflow runtime. Clones share state.
#[derive(Clone)]
pub struct DurableAgent {
    inner: Arc<AgentInner>,
}

impl std::fmt::Debug for DurableAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableAgent")
            .field("name", &self.name())
            .field("orchestrator", &self.is_orchestrator())
            .finish()
    }
}

impl DurableAgent {
    pub fn builder(name: impl Into<String>) -> DurableAgentBuilder {
        DurableAgentBuilder::new(name)
    }

    pub(crate) fn assemble(
        deps: AgentDeps,
        orchestration: Option<OrchestrationSetup>,
        registry: Option<AgentRegistry>,
        messenger: Option<AgentMessenger>,
        store: Arc<dyn StateStore>,
        runtime: Option<WorkflowRuntime>,
        runtime_options: RuntimeOptions,
    ) -> Self {
        let names = ActivityNames::new(deps.profile.name.clone());
        Self {
            inner: Arc::new(AgentInner {
                deps,
                orchestration,
                registry,
                messenger,
                names,
                store,
                runtime_options,
                lifecycle: Mutex::new(Lifecycle {
                    runtime,
                    ..Lifecycle::default()
                }),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.deps.profile.name
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.inner.deps.profile
    }

    pub fn is_orchestrator(&self) -> bool {
        self.inner.orchestration.is_some()
    }

    pub fn orchestration_mode(&self) -> Option<OrchestrationMode> {
        self.inner.orchestration.as_ref().map(|setup| setup.mode)
    }

    pub fn activity_names(&self) -> &ActivityNames {
        &self.inner.names
    }

    pub async fn is_started(&self) -> bool {
        self.inner.lifecycle.lock().await.started
    }

    /// Runtime the agent is registered on, if any
    pub async fn runtime(&self) -> Option<WorkflowRuntime> {
        self.inner.lifecycle.lock().await.runtime.clone()
    }

    /// Register the agent workflow and its activities on `runtime`, plus the
    /// orchestration workflow and activities when this agent orchestrates.
    /// Registering twice is a no-op.
    pub async fn register(&self, runtime: &WorkflowRuntime) -> AgentResult<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle.registered {
            return Ok(());
        }
        self.register_on(runtime)?;
        lifecycle.runtime = Some(runtime.clone());
        lifecycle.registered = true;
        Ok(())
    }

    fn register_on(&self, runtime: &WorkflowRuntime) -> AgentResult<()> {
        let names = &self.inner.names;
        let deps = &self.inner.deps;

        runtime.register_activity(
            names.activity(RECORD_INITIAL_ENTRY),
            with_deps(deps.clone(), activities::record_initial_entry),
        )?;
        runtime.register_activity(names.activity(CALL_LLM), with_deps(deps.clone(), activities::call_llm))?;
        runtime.register_activity(names.activity(RUN_TOOL), with_deps(deps.clone(), activities::run_tool))?;
        runtime.register_activity(
            names.activity(SAVE_TOOL_RESULTS),
            with_deps(deps.clone(), activities::save_tool_results),
        )?;
        runtime.register_activity(
            names.activity(FINALIZE_WORKFLOW),
            with_deps(deps.clone(), activities::finalize_workflow),
        )?;

        let workflow_names = names.clone();
        let max_iterations = deps.profile.max_iterations;
        runtime.register_workflow(names.agent_workflow(), move |ctx, input: AgentTaskInput| {
            workflow::agent_workflow(ctx, workflow_names.clone(), max_iterations, input)
        })?;

        if let Some(setup) = &self.inner.orchestration {
            self.register_orchestration(runtime, setup)?;
        }
        tracing::info!(agent = %self.name(), orchestrator = self.is_orchestrator(), "agent registered");
        Ok(())
    }

    fn register_orchestration(&self, runtime: &WorkflowRuntime, setup: &OrchestrationSetup) -> AgentResult<()> {
        let names = &self.inner.names;
        let deps = &setup.deps;

        runtime.register_activity(
            names.activity(orch::GET_AVAILABLE_AGENTS),
            with_deps(deps.clone(), orch::get_available_agents),
        )?;
        runtime.register_activity(
            names.activity(orch::INITIALIZE_ORCHESTRATION),
            with_deps(deps.clone(), orch::initialize_orchestration),
        )?;
        runtime.register_activity(
            names.activity(orch::SELECT_NEXT_ACTION),
            with_deps(deps.clone(), orch::select_next_action),
        )?;
        runtime.register_activity(
            names.activity(orch::INVOKE_REMOTE_AGENT),
            with_deps(deps.clone(), orch::invoke_remote_agent),
        )?;
        runtime.register_activity(
            names.activity(orch::PROCESS_ORCHESTRATION_RESPONSE),
            with_deps(deps.clone(), orch::process_orchestration_response),
        )?;
        runtime.register_activity(
            names.activity(orch::SHOULD_CONTINUE_ORCHESTRATION),
            with_deps(deps.clone(), orch::should_continue_orchestration),
        )?;
        runtime.register_activity(
            names.activity(orch::FINALIZE_ORCHESTRATION),
            with_deps(deps.clone(), orch::finalize_orchestration),
        )?;
        runtime.register_activity(
            names.activity(orch::BROADCAST_MESSAGE),
            with_deps(deps.clone(), orch::broadcast_message),
        )?;
        runtime.register_activity(names.activity(orch::GENERATE_PLAN), with_deps(deps.clone(), orch::generate_plan))?;
        runtime.register_activity(
            names.activity(orch::SELECT_PLANNED_STEP),
            with_deps(deps.clone(), orch::select_planned_step),
        )?;
        runtime.register_activity(
            names.activity(orch::ASSESS_PROGRESS),
            with_deps(deps.clone(), orch::assess_progress),
        )?;

        let workflow_names = names.clone();
        let (mode, max_iterations) = (setup.mode, setup.max_iterations);
        runtime.register_workflow(names.orchestration_workflow(), move |ctx, input: AgentTaskInput| {
            orchestration_workflow::orchestration_workflow(ctx, workflow_names.clone(), mode, max_iterations, input)
        })?;
        Ok(())
    }

    /// Start serving.
    ///
    /// Creates a runtime over the agent's state store when none was injected,
    /// registers if needed, starts the runtime unless it is already running,
    /// joins the team registry (best effort) and starts listening on the
    /// agent's topics. Starting a started agent is an error.
    pub async fn start(&self) -> AgentResult<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle.started {
            return Err(AgentError::AlreadyStarted(self.name().to_string()));
        }

        let runtime = match lifecycle.runtime.clone() {
            Some(runtime) => runtime,
            None => {
                let runtime =
                    WorkflowRuntime::with_options(Arc::clone(&self.inner.store), self.inner.runtime_options);
                lifecycle.runtime = Some(runtime.clone());
                runtime
            }
        };

        if !lifecycle.registered {
            self.register_on(&runtime)?;
            lifecycle.registered = true;
        }

        if !runtime.is_running() {
            runtime.start().await?;
            lifecycle.owns_runtime = true;
        }

        self.join_team().await;

        let cancel = CancellationToken::new();
        lifecycle.listeners = self.spawn_listeners(&runtime, &cancel);
        lifecycle.cancel = Some(cancel);
        lifecycle.started = true;

        tracing::info!(agent = %self.name(), "agent started");
        Ok(())
    }

    /// Stop listening, leave the team (best effort) and stop the runtime if
    /// this agent started it.
    pub async fn stop(&self) -> AgentResult<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if !lifecycle.started {
            return Err(AgentError::NotStarted(self.name().to_string()));
        }

        if let Some(cancel) = lifecycle.cancel.take() {
            cancel.cancel();
        }
        for listener in lifecycle.listeners.drain(..) {
            if let Err(e) = listener.await {
                tracing::debug!(agent = %self.name(), error = %e, "listener ended abnormally");
            }
        }

        self.leave_team().await;

        if lifecycle.owns_runtime {
            if let Some(runtime) = &lifecycle.runtime {
                match runtime.stop().await {
                    Ok(()) | Err(RuntimeError::NotStarted) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            lifecycle.owns_runtime = false;
        }
        lifecycle.started = false;

        tracing::info!(agent = %self.name(), "agent stopped");
        Ok(())
    }

    async fn join_team(&self) {
        let Some(registry) = &self.inner.registry else {
            return;
        };

        let profile = &self.inner.deps.profile;
        let mut entry = RegistryEntry::new(AGENT_TYPE, profile.role.clone(), profile.goal.clone());
        if self.is_orchestrator() {
            entry = entry.as_orchestrator();
        }
        if let Some(messenger) = &self.inner.messenger {
            entry = entry.with_pubsub(messenger.topics().clone());
        }

        match registry.register_agent(self.name(), entry).await {
            Ok(()) => tracing::debug!(agent = %self.name(), team = %registry.key(), "joined team"),
            Err(e) => tracing::warn!(agent = %self.name(), error = %e, "team registration failed"),
        }
    }

    async fn leave_team(&self) {
        if let Some(registry) = &self.inner.registry {
            if let Err(e) = registry.deregister_agent(self.name()).await {
                tracing::warn!(agent = %self.name(), error = %e, "team deregistration failed");
            }
        }
    }

    fn spawn_listeners(&self, runtime: &WorkflowRuntime, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let Some(messenger) = &self.inner.messenger else {
            return Vec::new();
        };

        let topics = messenger.topics();
        let mut subscribed = vec![topics.agent_topic.clone()];
        if let Some(broadcast) = &topics.broadcast_topic {
            if broadcast != &topics.agent_topic {
                subscribed.push(broadcast.clone());
            }
        }

        let mut handles = Vec::new();
        for topic in subscribed {
            let Some(mut subscription) = messenger.bus().subscribe(&topic) else {
                tracing::debug!(agent = %self.name(), topic = %topic, "bus delivers through the sidecar, not subscribing");
                continue;
            };
            let listener = Listener {
                agent: self.name().to_string(),
                workflow: self.inner.names.agent_workflow(),
                runtime: runtime.clone(),
                memory: Arc::clone(&self.inner.deps.memory),
                messenger: messenger.clone(),
                registry: self.inner.registry.clone(),
            };
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        envelope = subscription.recv() => match envelope {
                            Some(envelope) => listener.handle(envelope).await,
                            None => break,
                        },
                    }
                }
            }));
        }
        handles
    }

    async fn started_runtime(&self) -> AgentResult<WorkflowRuntime> {
        let lifecycle = self.inner.lifecycle.lock().await;
        match (&lifecycle.runtime, lifecycle.started) {
            (Some(runtime), true) => Ok(runtime.clone()),
            _ => Err(AgentError::NotStarted(self.name().to_string())),
        }
    }

    /// Schedule the agent workflow and return its instance id
    pub async fn schedule(&self, input: AgentTaskInput, instance_id: Option<String>) -> AgentResult<String> {
        let runtime = self.started_runtime().await?;
        let origin = EntryOrigin {
            workflow_name: Some(self.inner.names.agent_workflow()),
            ..input.origin.clone()
        };
        let input = input.with_origin(origin);
        Ok(runtime
            .schedule_new_workflow(&self.inner.names.agent_workflow(), &input, instance_id)
            .await?)
    }

    /// Schedule the orchestration workflow and return its instance id
    pub async fn schedule_orchestration(
        &self,
        input: AgentTaskInput,
        instance_id: Option<String>,
    ) -> AgentResult<String> {
        if !self.is_orchestrator() {
            return Err(AgentError::configuration(format!(
                "agent '{}' has no orchestration strategy",
                self.name()
            )));
        }
        let runtime = self.started_runtime().await?;
        let origin = EntryOrigin {
            workflow_name: Some(self.inner.names.orchestration_workflow()),
            ..input.origin.clone()
        };
        let input = input.with_origin(origin);
        Ok(runtime
            .schedule_new_workflow(&self.inner.names.orchestration_workflow(), &input, instance_id)
            .await?)
    }

    /// Wait for an instance and return its final message
    pub async fn wait_for(&self, instance_id: &str) -> AgentResult<Message> {
        let runtime = self.started_runtime().await?;
        let record = runtime.wait_for_completion(instance_id).await?;
        match record.status {
            WorkflowStatus::Completed => Ok(serde_json::from_value(record.output.unwrap_or(Value::Null))?),
            _ => Err(AgentError::WorkflowFailed {
                instance_id: record.instance_id,
                message: record.error.unwrap_or_else(|| "unknown error".to_string()),
            }),
        }
    }

    /// Run the tool-calling loop on `task` and return the final assistant message
    pub async fn run(&self, task: &str) -> AgentResult<Message> {
        let instance_id = self.schedule(AgentTaskInput::new(task), None).await?;
        self.wait_for(&instance_id).await
    }

    /// Coordinate the team on `task` and return the orchestration summary
    pub async fn orchestrate(&self, task: &str) -> AgentResult<Message> {
        let instance_id = self.schedule_orchestration(AgentTaskInput::new(task), None).await?;
        self.wait_for(&instance_id).await
    }

    /// Persisted entry of one workflow instance
    pub async fn workflow_entry(&self, instance_id: &str) -> AgentResult<Option<AgentWorkflowEntry>> {
        Ok(self.inner.deps.state.get_instance(instance_id).await?)
    }
}

#[async_trait]
impl TaskHandler for DurableAgent {
    async fn run_task(&self, task: &str) -> anyhow::Result<Message> {
        Ok(self.run(task).await?)
    }
}

/// What a topic listener needs; holds no reference back to the agent
#[derive(Clone)]
struct Listener {
    agent: String,
    workflow: String,
    runtime: WorkflowRuntime,
    memory: Arc<dyn ConversationMemory>,
    messenger: AgentMessenger,
    registry: Option<AgentRegistry>,
}

impl Listener {
    async fn handle(&self, envelope: MessageEnvelope) {
        if envelope.is_from(&self.agent) {
            return;
        }
        if envelope.recipient.as_deref().is_some_and(|recipient| recipient != self.agent) {
            return;
        }

        match envelope.kind {
            MessageKind::TriggerAction => self.trigger(envelope).await,
            MessageKind::Broadcast | MessageKind::Direct => {
                let mut message = envelope.message;
                if message.name.is_none() {
                    message.name = Some(envelope.sender.clone());
                }
                // Other agents' words reach the model as input
                if message.role == MessageRole::Assistant {
                    message.role = MessageRole::User;
                }
                if let Err(e) = self.memory.add_message(TEAM_SESSION, message).await {
                    tracing::warn!(agent = %self.agent, error = %e, "failed to store team message");
                }
            }
        }
    }

    async fn trigger(&self, envelope: MessageEnvelope) {
        let mut origin = EntryOrigin::new()
            .with_source(envelope.sender.clone())
            .with_workflow_name(self.workflow.clone());
        if let Some(instance_id) = &envelope.workflow_instance_id {
            origin = origin.with_triggering_instance(instance_id.clone());
        }
        let input = AgentTaskInput::new(envelope.message.content).with_origin(origin);

        match self.runtime.schedule_new_workflow(&self.workflow, &input, None).await {
            Ok(instance_id) => {
                tracing::info!(agent = %self.agent, sender = %envelope.sender, instance_id = %instance_id, "triggered by message");
                let listener = self.clone();
                let sender = envelope.sender.clone();
                tokio::spawn(async move { listener.reply(&sender, &instance_id).await });
            }
            Err(e) => tracing::warn!(agent = %self.agent, sender = %envelope.sender, error = %e, "failed to schedule triggered workflow"),
        }
    }

    /// Send the outcome of a triggered instance back to the agent that asked for it
    async fn reply(&self, recipient: &str, instance_id: &str) {
        let record = match self.runtime.wait_for_completion(instance_id).await {
            Ok(record) => record,
            Err(e) => {
                tracing::debug!(agent = %self.agent, instance_id, error = %e, "triggered instance did not finish, no reply sent");
                return;
            }
        };

        let message = match record.status {
            WorkflowStatus::Completed => match serde_json::from_value::<Message>(record.output.unwrap_or(Value::Null)) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(agent = %self.agent, instance_id, error = %e, "unreadable workflow output, no reply sent");
                    return;
                }
            },
            _ => Message::assistant(format!(
                "{} could not complete the task: {}",
                self.agent,
                record.error.unwrap_or_else(|| "unknown error".to_string())
            )),
        };
        let message = if message.name.is_none() {
            message.with_name(&self.agent)
        } else {
            message
        };

        let topic = self.topic_of(recipient).await;
        match self.messenger.send_direct(recipient, &topic, message).await {
            Ok(()) => tracing::debug!(agent = %self.agent, recipient, instance_id, "replied to triggering agent"),
            Err(e) => tracing::warn!(agent = %self.agent, recipient, error = %e, "failed to reply to triggering agent"),
        }
    }

    /// Direct topic of `agent` as registered in the team, else its name
    async fn topic_of(&self, agent: &str) -> String {
        if let Some(registry) = &self.registry {
            match registry.list_team_agents().await {
                Ok(team) => {
                    if let Some(pubsub) = team.get(agent).and_then(|entry| entry.pubsub.as_ref()) {
                        return pubsub.agent_topic.clone();
                    }
                }
                Err(e) => tracing::warn!(agent = %self.agent, error = %e, "team lookup failed"),
            }
        }
        agent.to_string()
    }
}

//! Agent activities.
//!
//! Every side effect of the agent loop lives here: LLM calls, tool runs and
//! state writes. Each activity is an `async fn(deps, ctx, input)`; [`with_deps`]
//! binds the collaborators once and yields the closure the runtime registers.
//! Activities may run more than once for the same history slot, so each one
//! is written to be safe on re-execution.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use super::memory::{ConversationMemory, TEAM_SESSION};
use crate::observability::Logger;
use crate::provider::{GenerateConfig, LlmProvider, Message, MessageRole, ToolCall};
use crate::runtime::ActivityContext;
use crate::state::{AgentStateStore, AgentWorkflowEntry, EntryOrigin, EntryStatus, StateError};
use crate::tools::{ToolExecutionResult, ToolRegistry};

pub const RECORD_INITIAL_ENTRY: &str = "record_initial_entry";
pub const CALL_LLM: &str = "call_llm";
pub const RUN_TOOL: &str = "run_tool";
pub const SAVE_TOOL_RESULTS: &str = "save_tool_results";
pub const FINALIZE_WORKFLOW: &str = "finalize_workflow";

/// Registered names are namespaced by agent so several agents can share one runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityNames {
    agent: String,
}

impl ActivityNames {
    pub fn new(agent: impl Into<String>) -> Self {
        Self { agent: agent.into() }
    }

    pub fn activity(&self, base: &str) -> String {
        format!("{}.{}", self.agent, base)
    }

    pub fn agent_workflow(&self) -> String {
        format!("{}.agent_workflow", self.agent)
    }

    pub fn orchestration_workflow(&self) -> String {
        format!("{}.orchestration_workflow", self.agent)
    }
}

/// Who the agent is, as told to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub name: String,
    pub role: String,
    pub goal: String,
    pub instructions: Vec<String>,
    pub max_iterations: u32,
}

impl AgentProfile {
    pub fn system_prompt(&self) -> String {
        let mut prompt = format!("# Name\nYour name is {}.\n\n# Role\n{}", self.name, self.role);
        if !self.goal.trim().is_empty() {
            prompt.push_str(&format!("\n\n# Goal\n{}", self.goal));
        }
        if !self.instructions.is_empty() {
            prompt.push_str("\n\n# Instructions");
            for instruction in &self.instructions {
                prompt.push_str(&format!("\n- {}", instruction));
            }
        }
        prompt
    }
}

/// Collaborators shared by all agent activities; immutable once built
#[derive(Clone)]
pub struct AgentDeps {
    pub profile: Arc<AgentProfile>,
    pub llm: Arc<dyn LlmProvider>,
    pub generate: GenerateConfig,
    pub tools: ToolRegistry,
    pub state: AgentStateStore,
    pub memory: Arc<dyn ConversationMemory>,
    pub logger: Option<Arc<Logger>>,
}

impl AgentDeps {
    /// Write to the audit log if one is configured. Failures are only traced.
    pub(crate) fn audit<F>(&self, write: F)
    where
        F: FnOnce(&Logger) -> Result<()>,
    {
        if let Some(logger) = &self.logger {
            if let Err(e) = write(logger) {
                tracing::warn!(agent = %self.profile.name, error = %e, "failed to write audit log");
            }
        }
    }

    pub(crate) fn model(&self) -> String {
        self.generate.model.clone().unwrap_or_else(|| self.llm.default_model())
    }
}

/// Bind `deps` into an activity body, producing the closure the runtime registers
pub fn with_deps<D, I, O, F, Fut>(deps: D, body: F) -> impl Fn(ActivityContext, I) -> Fut + Send + Sync + 'static
where
    D: Clone + Send + Sync + 'static,
    F: Fn(D, ActivityContext, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O>> + Send + 'static,
{
    move |ctx, input| body(deps.clone(), ctx, input)
}

/// Input of a single-agent workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTaskInput {
    pub task: String,
    #[serde(default)]
    pub origin: EntryOrigin,
}

impl AgentTaskInput {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            origin: EntryOrigin::default(),
        }
    }

    pub fn with_origin(mut self, origin: EntryOrigin) -> Self {
        self.origin = origin;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizeRequest {
    pub status: EntryStatus,
    pub output: String,
}

/// Conversation for `instance_id`, rehydrating memory from the persisted entry when empty
pub(crate) async fn conversation(deps: &AgentDeps, instance_id: &str) -> Result<Vec<Message>> {
    let cached = deps.memory.messages(instance_id).await?;
    if !cached.is_empty() {
        return Ok(cached);
    }

    let persisted = deps
        .state
        .get_instance(instance_id)
        .await?
        .map(|entry| entry.messages)
        .unwrap_or_default();
    if !persisted.is_empty() {
        tracing::debug!(instance_id, messages = persisted.len(), "rehydrating conversation memory");
        deps.memory.add_messages(instance_id, persisted.clone()).await?;
    }
    Ok(persisted)
}

pub async fn record_initial_entry(deps: AgentDeps, ctx: ActivityContext, input: AgentTaskInput) -> Result<()> {
    let instance_id = ctx.instance_id.as_str();
    deps.state
        .ensure_instance(instance_id, Value::String(input.task.clone()), input.origin.clone())
        .await?;

    let task = input.task.as_str();
    deps.state
        .update_state(|state| {
            let Some(entry) = state.get_mut(instance_id) else {
                return Ok(false);
            };
            if !entry.messages.is_empty() {
                return Ok(false);
            }
            entry.push_message(Message::user(task));
            Ok(true)
        })
        .await?;

    conversation(&deps, instance_id).await?;
    tracing::info!(agent = %deps.profile.name, instance_id, "workflow entry recorded");
    deps.audit(|logger| logger.log_workflow_start(&deps.profile.name, instance_id, task));
    Ok(())
}

/// Ask the model for the next assistant message.
///
/// `turn` counts from 1. If the entry already holds an assistant reply for
/// this turn (the activity ran before but its result was not recorded), that
/// reply is returned instead of calling the model again.
pub async fn call_llm(deps: AgentDeps, ctx: ActivityContext, turn: u32) -> Result<Message> {
    let instance_id = ctx.instance_id.as_str();
    let history = conversation(&deps, instance_id).await?;

    let answered = history
        .iter()
        .filter(|message| message.role == MessageRole::Assistant)
        .nth(turn.saturating_sub(1) as usize);
    if let Some(existing) = answered {
        tracing::debug!(instance_id, turn, "turn already answered, reusing reply");
        return Ok(existing.clone());
    }

    let mut messages = vec![Message::system(deps.profile.system_prompt())];
    messages.extend(deps.memory.messages(TEAM_SESSION).await?);
    messages.extend(history);

    let mut config = deps.generate.clone();
    if !deps.tools.is_empty() {
        config = config.with_tools(deps.tools.definitions());
    }

    let mut reply = deps
        .llm
        .generate(messages.clone(), &config)
        .await
        .with_context(|| format!("LLM call failed for agent '{}'", deps.profile.name))?;
    if reply.name.is_none() {
        reply.name = Some(deps.profile.name.clone());
    }

    let persisted = reply.clone();
    deps.state
        .update_instance(instance_id, move |entry| entry.push_message(persisted.clone()))
        .await?;
    deps.memory.add_message(instance_id, reply.clone()).await?;

    tracing::debug!(
        agent = %deps.profile.name,
        instance_id,
        turn,
        tool_calls = reply.tool_calls.len(),
        "LLM replied"
    );
    deps.audit(|logger| logger.log_llm_interaction(&messages, &reply, &deps.model()));
    Ok(reply)
}

/// Run one tool call. Tool failures come back as a failed result, never as an error.
pub async fn run_tool(deps: AgentDeps, ctx: ActivityContext, call: ToolCall) -> Result<ToolExecutionResult> {
    let result = deps.tools.execute(&call).await;

    if result.success {
        tracing::debug!(instance_id = %ctx.instance_id, tool = %call.name, "tool succeeded");
    } else {
        tracing::warn!(
            instance_id = %ctx.instance_id,
            tool = %call.name,
            error = result.error.as_deref().unwrap_or_default(),
            "tool failed"
        );
    }
    deps.audit(|logger| {
        logger.log_tool_execution(&call.name, &call.arguments.to_string(), &result.content, result.success)
    });
    Ok(result)
}

/// Append tool results to the entry's tool history and conversation.
///
/// Results already recorded (by `tool_call_id`) are skipped. Returns how many
/// were added.
pub async fn save_tool_results(
    deps: AgentDeps,
    ctx: ActivityContext,
    results: Vec<ToolExecutionResult>,
) -> Result<usize> {
    let instance_id = ctx.instance_id.as_str();
    let results = &results;

    let state = deps
        .state
        .update_state(|state| {
            let entry = state.get_mut(instance_id).ok_or_else(|| StateError::InstanceNotFound {
                instance_id: instance_id.to_string(),
            })?;
            let mut changed = false;
            for result in results {
                if entry.has_tool_result(&result.tool_call_id) {
                    continue;
                }
                entry.tool_history.push(result.clone());
                entry.push_message(tool_message(result));
                changed = true;
            }
            Ok(changed)
        })
        .await?;
    let recorded = state.get(instance_id).map(|entry| entry.tool_history.len()).unwrap_or_default();

    let cached = conversation(&deps, instance_id).await?;
    let mut added = 0;
    for result in results {
        let present = cached
            .iter()
            .any(|message| message.tool_call_id.as_deref() == Some(result.tool_call_id.as_str()));
        if !present {
            deps.memory.add_message(instance_id, tool_message(result)).await?;
            added += 1;
        }
    }

    tracing::debug!(instance_id, recorded, added, "tool results saved");
    Ok(added)
}

fn tool_message(result: &ToolExecutionResult) -> Message {
    Message::tool_result(&result.tool_call_id, &result.tool_name, &result.content)
}

/// Move the entry to a terminal status. A missing entry is created first so
/// a failure before initialization is still visible.
pub async fn finalize_workflow(deps: AgentDeps, ctx: ActivityContext, request: FinalizeRequest) -> Result<()> {
    let instance_id = ctx.instance_id.as_str();
    let request = &request;

    deps.state
        .update_state(|state| {
            let entry = state
                .instances
                .entry(instance_id.to_string())
                .or_insert_with(|| AgentWorkflowEntry::new(Value::Null, EntryOrigin::default()));
            match request.status {
                EntryStatus::Completed => entry.complete(request.output.as_str()),
                EntryStatus::Failed => entry.fail(request.output.as_str()),
                EntryStatus::Running => return Ok(false),
            }
            Ok(true)
        })
        .await?;

    deps.memory.clear(instance_id).await?;

    tracing::info!(agent = %deps.profile.name, instance_id, status = %request.status, "workflow finalized");
    deps.audit(|logger| logger.log_completion(instance_id, &request.status.to_string(), &request.output));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::test_support::{agent_deps, ScriptedLlm};
    use crate::provider::ToolCall;
    use crate::tools::FunctionTool;
    use serde_json::json;

    fn ctx(activity: &str) -> ActivityContext {
        ActivityContext {
            instance_id: "wf-1".to_string(),
            activity: activity.to_string(),
            attempt: 1,
        }
    }

    #[test]
    fn test_activity_names_are_namespaced() {
        let names = ActivityNames::new("poet");
        assert_eq!(names.activity(CALL_LLM), "poet.call_llm");
        assert_eq!(names.agent_workflow(), "poet.agent_workflow");
        assert_eq!(names.orchestration_workflow(), "poet.orchestration_workflow");
    }

    #[test]
    fn test_system_prompt_sections() {
        let profile = AgentProfile {
            name: "poet".into(),
            role: "Poet".into(),
            goal: "Write verse".into(),
            instructions: vec!["Rhyme".into(), "Be brief".into()],
            max_iterations: 3,
        };

        let prompt = profile.system_prompt();
        assert!(prompt.contains("Your name is poet."));
        assert!(prompt.contains("# Goal\nWrite verse"));
        assert!(prompt.contains("- Rhyme\n- Be brief"));
    }

    #[tokio::test]
    async fn test_record_initial_entry_is_idempotent() {
        let deps = agent_deps(ScriptedLlm::new(vec![]));
        let input = AgentTaskInput::new("write a haiku");

        record_initial_entry(deps.clone(), ctx(RECORD_INITIAL_ENTRY), input.clone())
            .await
            .unwrap();
        record_initial_entry(deps.clone(), ctx(RECORD_INITIAL_ENTRY), input)
            .await
            .unwrap();

        let entry = deps.state.get_instance("wf-1").await.unwrap().unwrap();
        assert_eq!(entry.messages, vec![Message::user("write a haiku")]);
        assert_eq!(entry.status, EntryStatus::Running);
    }

    #[tokio::test]
    async fn test_call_llm_persists_and_reuses_reply() {
        let llm = ScriptedLlm::new(vec![Message::assistant("an old silent pond")]);
        let deps = agent_deps(llm.clone());
        record_initial_entry(deps.clone(), ctx(RECORD_INITIAL_ENTRY), AgentTaskInput::new("haiku"))
            .await
            .unwrap();

        let first = call_llm(deps.clone(), ctx(CALL_LLM), 1).await.unwrap();
        assert_eq!(first.content, "an old silent pond");
        assert_eq!(first.name.as_deref(), Some("tester"));

        // Re-execution of the same turn does not reach the model
        let again = call_llm(deps.clone(), ctx(CALL_LLM), 1).await.unwrap();
        assert_eq!(again, first);
        assert_eq!(llm.calls(), 1);

        let entry = deps.state.get_instance("wf-1").await.unwrap().unwrap();
        assert_eq!(entry.messages.len(), 2);
        assert_eq!(entry.last_message, Some(first));
    }

    #[tokio::test]
    async fn test_call_llm_sends_system_prompt_first() {
        let llm = ScriptedLlm::new(vec![Message::assistant("ok")]);
        let deps = agent_deps(llm.clone());
        record_initial_entry(deps.clone(), ctx(RECORD_INITIAL_ENTRY), AgentTaskInput::new("hi"))
            .await
            .unwrap();
        deps.memory
            .add_message(TEAM_SESSION, Message::user("team note").with_name("editor"))
            .await
            .unwrap();

        call_llm(deps, ctx(CALL_LLM), 1).await.unwrap();

        let sent = llm.last_request();
        assert_eq!(sent[0].role, MessageRole::System);
        assert_eq!(sent[1].content, "team note");
        assert_eq!(sent[2].content, "hi");
    }

    #[tokio::test]
    async fn test_tool_failure_is_a_result() {
        let deps = agent_deps(ScriptedLlm::new(vec![]));
        deps.tools
            .register(FunctionTool::new("explode", "Always fails", json!({"type": "object"}), |_args| async {
                Err::<Value, _>(anyhow::anyhow!("boom"))
            }))
            .unwrap();

        let result = run_tool(deps, ctx(RUN_TOOL), ToolCall::new("call-1", "explode", json!({})))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.content.contains("boom"));
    }

    #[tokio::test]
    async fn test_save_tool_results_skips_duplicates() {
        let deps = agent_deps(ScriptedLlm::new(vec![]));
        record_initial_entry(deps.clone(), ctx(RECORD_INITIAL_ENTRY), AgentTaskInput::new("count"))
            .await
            .unwrap();
        let results = vec![ToolExecutionResult::success("call-1", "counter", json!({}), "3")];

        let added = save_tool_results(deps.clone(), ctx(SAVE_TOOL_RESULTS), results.clone())
            .await
            .unwrap();
        assert_eq!(added, 1);
        let added = save_tool_results(deps.clone(), ctx(SAVE_TOOL_RESULTS), results)
            .await
            .unwrap();
        assert_eq!(added, 0);

        let entry = deps.state.get_instance("wf-1").await.unwrap().unwrap();
        assert_eq!(entry.tool_history.len(), 1);
        let tool_messages = entry
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::Tool)
            .count();
        assert_eq!(tool_messages, 1);
    }

    #[tokio::test]
    async fn test_finalize_creates_missing_entry() {
        let deps = agent_deps(ScriptedLlm::new(vec![]));
        finalize_workflow(
            deps.clone(),
            ctx(FINALIZE_WORKFLOW),
            FinalizeRequest {
                status: EntryStatus::Failed,
                output: "LLM unavailable".into(),
            },
        )
        .await
        .unwrap();

        let entry = deps.state.get_instance("wf-1").await.unwrap().unwrap();
        assert_eq!(entry.status, EntryStatus::Failed);
        assert_eq!(entry.error.as_deref(), Some("LLM unavailable"));
        assert!(entry.end_time.is_some());
    }
}

//! Orchestration activities.
//!
//! The orchestration workflow never sees a strategy object: every strategy
//! call, registry read, remote invocation and planning prompt happens in one
//! of these activities, so the decisions are recorded in history and replay
//! returns them unchanged.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::activities::AgentDeps;
use super::invoker::{coerce_agent_response, AgentInvoker};
use crate::messaging::AgentMessenger;
use crate::orchestration::plan::{
    apply_plan, apply_progress, parse_json_reply, parse_plan_reply, plan_prompt, progress_prompt, record_result,
    resolve_selection, select_prompt, ProgressReply, StepSelectionReply,
};
use crate::orchestration::{
    AgentSelection, OrchestrationState, OrchestrationStrategy, PlanState, PlanStrategy, ProcessedResponse,
};
use crate::provider::Message;
use crate::registry::{format_listing, AgentRegistry, NO_AVAILABLE_AGENTS};
use crate::runtime::ActivityContext;

pub const GET_AVAILABLE_AGENTS: &str = "get_available_agents";
pub const INITIALIZE_ORCHESTRATION: &str = "initialize_orchestration";
pub const SELECT_NEXT_ACTION: &str = "select_next_action";
pub const INVOKE_REMOTE_AGENT: &str = "invoke_remote_agent";
pub const PROCESS_ORCHESTRATION_RESPONSE: &str = "process_orchestration_response";
pub const SHOULD_CONTINUE_ORCHESTRATION: &str = "should_continue_orchestration";
pub const FINALIZE_ORCHESTRATION: &str = "finalize_orchestration";
pub const BROADCAST_MESSAGE: &str = "broadcast_message";
pub const GENERATE_PLAN: &str = "generate_plan";
pub const SELECT_PLANNED_STEP: &str = "select_planned_step";
pub const ASSESS_PROGRESS: &str = "assess_progress";

/// Collaborators of an orchestrating agent
#[derive(Clone)]
pub struct OrchestrationDeps {
    pub agent: AgentDeps,
    pub strategy: Arc<dyn OrchestrationStrategy>,
    pub registry: Option<AgentRegistry>,
    pub invoker: Arc<dyn AgentInvoker>,
    pub messenger: Option<AgentMessenger>,
    pub invocation_timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AvailableAgents {
    pub names: Vec<String>,
    /// Prompt-ready listing, or the "no available agents" sentinel
    pub listing: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializeRequest {
    pub task: String,
    pub agents: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectRequest {
    pub state: OrchestrationState,
    pub turn: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeRequest {
    pub agent: String,
    pub instruction: String,
    pub turn: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRequest {
    pub state: OrchestrationState,
    /// The agent selected for this turn
    pub agent: String,
    pub response: Message,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinueRequest {
    pub state: OrchestrationState,
    pub turn: u32,
    pub max_iterations: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRequest {
    pub task: String,
    pub agents: Vec<String>,
    pub listing: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedStepRequest {
    pub state: OrchestrationState,
    pub turn: u32,
    pub listing: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedSelection {
    pub selection: AgentSelection,
    pub updated_state: OrchestrationState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRequest {
    pub state: OrchestrationState,
    pub agent: String,
    #[serde(default)]
    pub step: Option<u32>,
    pub response: Message,
}

/// Peers from the team registry, excluding this agent and other orchestrators
pub async fn get_available_agents(deps: OrchestrationDeps, ctx: ActivityContext, _input: ()) -> Result<AvailableAgents> {
    let Some(registry) = &deps.registry else {
        tracing::warn!(instance_id = %ctx.instance_id, "no team registry configured");
        return Ok(AvailableAgents {
            names: Vec::new(),
            listing: NO_AVAILABLE_AGENTS.to_string(),
        });
    };

    let peers = registry
        .list_peers(&deps.agent.profile.name)
        .await
        .context("failed to read team registry")?;
    tracing::debug!(instance_id = %ctx.instance_id, agents = peers.len(), "discovered team agents");

    Ok(AvailableAgents {
        names: peers.keys().cloned().collect(),
        listing: format_listing(&peers),
    })
}

pub async fn initialize_orchestration(
    deps: OrchestrationDeps,
    _ctx: ActivityContext,
    request: InitializeRequest,
) -> Result<OrchestrationState> {
    Ok(deps.strategy.initialize(&request.task, &request.agents)?)
}

pub async fn select_next_action(
    deps: OrchestrationDeps,
    ctx: ActivityContext,
    request: SelectRequest,
) -> Result<AgentSelection> {
    let selection = deps.strategy.select_next_agent(&request.state, request.turn)?;
    tracing::info!(
        instance_id = %ctx.instance_id,
        turn = request.turn,
        agent = %selection.agent,
        strategy = %deps.strategy.mode(),
        "selected next agent"
    );
    Ok(selection)
}

/// Run the instruction on another agent.
///
/// Errors and timeouts become an assistant message describing the failure,
/// so one failed turn does not end the orchestration.
pub async fn invoke_remote_agent(deps: OrchestrationDeps, ctx: ActivityContext, request: InvokeRequest) -> Result<Message> {
    let outcome = tokio::time::timeout(
        deps.invocation_timeout,
        deps.invoker.invoke(&request.agent, &request.instruction),
    )
    .await;

    let response = match outcome {
        Ok(Ok(reply)) => coerce_agent_response(&request.agent, reply),
        Ok(Err(e)) => invocation_failure(&deps, &ctx, &request.agent, format!("{:#}", e)),
        Err(_) => invocation_failure(
            &deps,
            &ctx,
            &request.agent,
            format!("timed out after {}s", deps.invocation_timeout.as_secs_f64()),
        ),
    };

    deps.agent.audit(|logger| {
        logger.log_orchestration_turn(request.turn, &request.agent, &request.instruction, &response.content)
    });
    Ok(response)
}

fn invocation_failure(deps: &OrchestrationDeps, ctx: &ActivityContext, agent: &str, error: String) -> Message {
    tracing::warn!(instance_id = %ctx.instance_id, agent, error = %error, "agent invocation failed");
    deps.agent
        .audit(|logger| logger.log_error(&error, &[("instance_id", ctx.instance_id.as_str()), ("agent", agent)]));
    Message::assistant(format!("Agent {} failed to respond: {}", agent, error)).with_name(agent)
}

pub async fn process_orchestration_response(
    deps: OrchestrationDeps,
    _ctx: ActivityContext,
    request: ProcessRequest,
) -> Result<ProcessedResponse> {
    Ok(deps
        .strategy
        .process_response(request.state, &request.agent, &request.response)?)
}

pub async fn should_continue_orchestration(
    deps: OrchestrationDeps,
    _ctx: ActivityContext,
    request: ContinueRequest,
) -> Result<bool> {
    Ok(deps
        .strategy
        .should_continue(&request.state, request.turn, request.max_iterations))
}

pub async fn finalize_orchestration(
    deps: OrchestrationDeps,
    ctx: ActivityContext,
    state: OrchestrationState,
) -> Result<Message> {
    let summary = deps.strategy.finalize(&state);
    tracing::info!(instance_id = %ctx.instance_id, strategy = %deps.strategy.mode(), "orchestration finalized");
    Ok(summary)
}

/// Share a response with the team. Returns whether it was published.
pub async fn broadcast_message(deps: OrchestrationDeps, ctx: ActivityContext, message: Message) -> Result<bool> {
    let Some(messenger) = &deps.messenger else {
        return Ok(false);
    };
    match messenger.broadcast(message, Some(&ctx.instance_id)).await {
        Ok(()) => Ok(true),
        Err(e) => {
            tracing::warn!(instance_id = %ctx.instance_id, error = %e, "broadcast failed");
            Ok(false)
        }
    }
}

async fn ask_llm(deps: &OrchestrationDeps, prompt: String) -> Result<String> {
    let agent = &deps.agent;
    let messages = vec![Message::system(agent.profile.system_prompt()), Message::user(prompt)];
    let config = agent.generate.clone().with_json_response(true);

    let reply = agent
        .llm
        .generate(messages.clone(), &config)
        .await
        .with_context(|| format!("planning call failed for '{}'", agent.profile.name))?;
    agent.audit(|logger| logger.log_llm_interaction(&messages, &reply, &agent.model()));
    Ok(reply.content)
}

/// Initial plan state; a reply that cannot be parsed yields a one-step plan of the task itself
pub async fn generate_plan(deps: OrchestrationDeps, ctx: ActivityContext, request: PlanRequest) -> Result<OrchestrationState> {
    let state = PlanState::load(&PlanStrategy.initialize(&request.task, &request.agents)?)?;
    let reply = ask_llm(&deps, plan_prompt(&request.task, &request.listing)).await?;

    let plan = parse_plan_reply(&reply).unwrap_or_else(|| {
        tracing::warn!(instance_id = %ctx.instance_id, "unparseable plan, falling back to the task");
        Default::default()
    });
    let state = apply_plan(state, plan);
    tracing::info!(instance_id = %ctx.instance_id, steps = state.plan.len(), "plan generated");
    Ok(state.to_state()?)
}

pub async fn select_planned_step(
    deps: OrchestrationDeps,
    ctx: ActivityContext,
    request: PlannedStepRequest,
) -> Result<PlannedSelection> {
    let mut state = PlanState::load(&request.state)?;
    let reply = ask_llm(&deps, select_prompt(&state, &request.listing)).await?;

    let selection = resolve_selection(&mut state, parse_json_reply::<StepSelectionReply>(&reply), request.turn);
    tracing::info!(instance_id = %ctx.instance_id, turn = request.turn, agent = %selection.agent, "planned step selected");
    Ok(PlannedSelection {
        selection,
        updated_state: state.to_state()?,
    })
}

pub async fn assess_progress(
    deps: OrchestrationDeps,
    ctx: ActivityContext,
    request: ProgressRequest,
) -> Result<ProcessedResponse> {
    let state = record_result(
        PlanState::load(&request.state)?,
        &request.agent,
        request.step,
        &request.response,
    );
    let reply = ask_llm(&deps, progress_prompt(&state)).await?;

    let progress = parse_json_reply::<ProgressReply>(&reply).unwrap_or_default();
    let state = apply_progress(state, progress);
    tracing::info!(instance_id = %ctx.instance_id, verdict = ?state.verdict, "progress assessed");
    Ok(ProcessedResponse {
        verdict: state.verdict,
        updated_state: state.to_state()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::invoker::LocalAgentDirectory;
    use crate::agent::test_support::{agent_deps, ScriptedLlm};
    use crate::orchestration::{create_strategy, OrchestrationMode, StepStatus, Verdict};
    use crate::registry::RegistryEntry;
    use crate::state::InMemoryStateStore;
    use async_trait::async_trait;
    use serde_json::Value;

    struct Unreachable;

    #[async_trait]
    impl AgentInvoker for Unreachable {
        async fn invoke(&self, agent: &str, _task: &str) -> Result<Value> {
            anyhow::bail!("connection refused by {}", agent)
        }
    }

    struct Sleepy;

    #[async_trait]
    impl AgentInvoker for Sleepy {
        async fn invoke(&self, _agent: &str, _task: &str) -> Result<Value> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Value::from("too late"))
        }
    }

    fn ctx() -> ActivityContext {
        ActivityContext {
            instance_id: "orch-1".to_string(),
            activity: "test".to_string(),
            attempt: 1,
        }
    }

    fn deps(mode: OrchestrationMode, llm: ScriptedLlm, invoker: Arc<dyn AgentInvoker>) -> OrchestrationDeps {
        OrchestrationDeps {
            agent: agent_deps(llm),
            strategy: create_strategy(mode),
            registry: None,
            invoker,
            messenger: None,
            invocation_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_available_agents_from_registry() {
        let mut deps = deps(OrchestrationMode::RoundRobin, ScriptedLlm::default(), Arc::new(Unreachable));
        let empty = get_available_agents(deps.clone(), ctx(), ()).await.unwrap();
        assert!(empty.names.is_empty());
        assert_eq!(empty.listing, NO_AVAILABLE_AGENTS);

        let registry = AgentRegistry::new(Arc::new(InMemoryStateStore::new()), "team");
        registry
            .register_agent("poet", RegistryEntry::new("DurableAgent", "Poet", "Write verse"))
            .await
            .unwrap();
        registry
            .register_agent("tester", RegistryEntry::new("DurableAgent", "Lead", "Coordinate").as_orchestrator())
            .await
            .unwrap();
        deps.registry = Some(registry);

        let found = get_available_agents(deps, ctx(), ()).await.unwrap();
        assert_eq!(found.names, vec!["poet".to_string()]);
        assert!(found.listing.contains("- poet: Poet"));
    }

    #[tokio::test]
    async fn test_round_robin_through_activities() {
        let deps = deps(OrchestrationMode::RoundRobin, ScriptedLlm::default(), Arc::new(Unreachable));
        let state = initialize_orchestration(
            deps.clone(),
            ctx(),
            InitializeRequest {
                task: "story".into(),
                agents: vec!["c".into(), "a".into(), "b".into()],
            },
        )
        .await
        .unwrap();

        let mut picked = Vec::new();
        for turn in 1..=4 {
            let selection = select_next_action(
                deps.clone(),
                ctx(),
                SelectRequest {
                    state: state.clone(),
                    turn,
                },
            )
            .await
            .unwrap();
            picked.push(selection.agent);
        }
        assert_eq!(picked, vec!["a", "b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_initialize_without_agents_fails() {
        let deps = deps(OrchestrationMode::Random, ScriptedLlm::default(), Arc::new(Unreachable));
        let result = initialize_orchestration(
            deps,
            ctx(),
            InitializeRequest {
                task: "story".into(),
                agents: Vec::new(),
            },
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_invocation_error_becomes_message() {
        let deps = deps(OrchestrationMode::RoundRobin, ScriptedLlm::default(), Arc::new(Unreachable));
        let response = invoke_remote_agent(
            deps,
            ctx(),
            InvokeRequest {
                agent: "poet".into(),
                instruction: "Task: verse".into(),
                turn: 1,
            },
        )
        .await
        .unwrap();

        assert_eq!(response.name.as_deref(), Some("poet"));
        assert!(response.content.contains("failed to respond"));
        assert!(response.content.contains("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invocation_timeout_becomes_message() {
        let mut deps = deps(OrchestrationMode::RoundRobin, ScriptedLlm::default(), Arc::new(Sleepy));
        deps.invocation_timeout = Duration::from_secs(1);

        let response = invoke_remote_agent(
            deps,
            ctx(),
            InvokeRequest {
                agent: "poet".into(),
                instruction: "Task: verse".into(),
                turn: 1,
            },
        )
        .await
        .unwrap();
        assert!(response.content.contains("timed out"));
    }

    #[tokio::test]
    async fn test_local_invocation_round_trip() {
        struct Poet;

        #[async_trait]
        impl crate::agent::invoker::TaskHandler for Poet {
            async fn run_task(&self, task: &str) -> Result<Message> {
                Ok(Message::assistant(format!("verse about {}", task)))
            }
        }

        let directory = LocalAgentDirectory::new();
        directory.register("poet", Arc::new(Poet));
        let deps = deps(OrchestrationMode::RoundRobin, ScriptedLlm::default(), Arc::new(directory));

        let response = invoke_remote_agent(
            deps,
            ctx(),
            InvokeRequest {
                agent: "poet".into(),
                instruction: "the sea".into(),
                turn: 1,
            },
        )
        .await
        .unwrap();
        assert_eq!(response.content, "verse about the sea");
    }

    #[tokio::test]
    async fn test_broadcast_without_messenger_is_skipped() {
        let deps = deps(OrchestrationMode::RoundRobin, ScriptedLlm::default(), Arc::new(Unreachable));
        let published = broadcast_message(deps, ctx(), Message::assistant("hi")).await.unwrap();
        assert!(!published);
    }

    #[tokio::test]
    async fn test_plan_selection_and_progress() {
        let llm = ScriptedLlm::new(vec![
            Message::assistant(
                "```json\n{\"plan\": [{\"step\": 1, \"description\": \"Draft\"}, {\"step\": 2, \"description\": \"Edit\"}]}\n```",
            ),
            Message::assistant(r#"{"agent": "editor", "step": 1, "instruction": "Draft the poem"}"#),
            Message::assistant(r#"{"verdict": "continue", "completed_steps": [1]}"#),
        ]);
        let deps = deps(OrchestrationMode::Llm, llm, Arc::new(Unreachable));

        let state = generate_plan(
            deps.clone(),
            ctx(),
            PlanRequest {
                task: "poem".into(),
                agents: vec!["poet".into(), "editor".into()],
                listing: "- poet\n- editor".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(PlanState::load(&state).unwrap().plan.len(), 2);

        let planned = select_planned_step(
            deps.clone(),
            ctx(),
            PlannedStepRequest {
                state,
                turn: 1,
                listing: "- poet\n- editor".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(planned.selection.agent, "editor");
        assert_eq!(planned.selection.instruction, "Draft the poem");

        let processed = assess_progress(
            deps,
            ctx(),
            ProgressRequest {
                state: planned.updated_state,
                agent: "editor".into(),
                step: Some(1),
                response: Message::assistant("roses are red").with_name("editor"),
            },
        )
        .await
        .unwrap();
        assert_eq!(processed.verdict, Verdict::Continue);

        let plan = PlanState::load(&processed.updated_state).unwrap();
        assert_eq!(plan.plan[0].status, StepStatus::Completed);
        assert_eq!(plan.plan[1].status, StepStatus::NotStarted);
        assert_eq!(plan.task_history.len(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_plan_falls_back_to_task() {
        let llm = ScriptedLlm::new(vec![Message::assistant("I would rather chat")]);
        let deps = deps(OrchestrationMode::Llm, llm, Arc::new(Unreachable));

        let state = generate_plan(
            deps,
            ctx(),
            PlanRequest {
                task: "poem".into(),
                agents: vec!["poet".into()],
                listing: "- poet".into(),
            },
        )
        .await
        .unwrap();

        let plan = PlanState::load(&state).unwrap();
        assert_eq!(plan.plan.len(), 1);
        assert_eq!(plan.plan[0].description, "poem");
    }
}

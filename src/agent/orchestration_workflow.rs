//! The multi-agent orchestration loop.
//!
//! Turn-taking strategies (round robin, random) go through the generic
//! select / process / continue activities. LLM-planned orchestration swaps
//! selection and processing for planning activities but shares the rest.
//! Either way `turn` advances once per full loop and the loop ends when the
//! verdict leaves `Continue` or the continuation check says stop.

use anyhow::Result;
use serde_json::Value;

use super::activities::{ActivityNames, AgentTaskInput, RECORD_INITIAL_ENTRY};
use super::orchestration_activities::{
    AvailableAgents, ContinueRequest, InitializeRequest, InvokeRequest, PlanRequest, PlannedSelection,
    PlannedStepRequest, ProcessRequest, ProgressRequest, SelectRequest, ASSESS_PROGRESS, BROADCAST_MESSAGE,
    FINALIZE_ORCHESTRATION, GENERATE_PLAN, GET_AVAILABLE_AGENTS, INITIALIZE_ORCHESTRATION, INVOKE_REMOTE_AGENT,
    PROCESS_ORCHESTRATION_RESPONSE, SELECT_NEXT_ACTION, SELECT_PLANNED_STEP, SHOULD_CONTINUE_ORCHESTRATION,
};
use super::workflow::finish;
use crate::orchestration::{
    AgentSelection, OrchestrationError, OrchestrationMode, OrchestrationState, ProcessedResponse, Verdict,
};
use crate::provider::Message;
use crate::runtime::WorkflowContext;
use crate::state::EntryStatus;

/// Coordinate the team on `input.task` and return the strategy's summary
pub async fn orchestration_workflow(
    ctx: WorkflowContext,
    names: ActivityNames,
    mode: OrchestrationMode,
    max_iterations: u32,
    input: AgentTaskInput,
) -> Result<Message> {
    let max_iterations = max_iterations.max(1);
    let outcome = match mode {
        OrchestrationMode::Llm => planned_loop(&ctx, &names, max_iterations, &input).await,
        OrchestrationMode::RoundRobin | OrchestrationMode::Random => {
            turn_taking_loop(&ctx, &names, max_iterations, &input).await
        }
    };

    let outcome = outcome.map(|(summary, verdict)| {
        let status = if verdict == Verdict::Failed {
            EntryStatus::Failed
        } else {
            EntryStatus::Completed
        };
        (summary, status)
    });
    finish(&ctx, &names, outcome).await
}

async fn discover(ctx: &WorkflowContext, names: &ActivityNames, input: &AgentTaskInput) -> Result<AvailableAgents> {
    ctx.call_activity::<_, ()>(&names.activity(RECORD_INITIAL_ENTRY), input)
        .await?;

    let available: AvailableAgents = ctx.call_activity(&names.activity(GET_AVAILABLE_AGENTS), &()).await?;
    if available.names.is_empty() {
        return Err(OrchestrationError::NoAgents.into());
    }
    if !ctx.is_replaying().await {
        tracing::info!(instance_id = %ctx.instance_id(), agents = ?available.names, "orchestrating team");
    }
    Ok(available)
}

/// Hand the instruction to the chosen agent and share the answer with the team
async fn take_turn(
    ctx: &WorkflowContext,
    names: &ActivityNames,
    selection: &AgentSelection,
    turn: u32,
) -> Result<Message> {
    let response: Message = ctx
        .call_activity(
            &names.activity(INVOKE_REMOTE_AGENT),
            &InvokeRequest {
                agent: selection.agent.clone(),
                instruction: selection.instruction.clone(),
                turn,
            },
        )
        .await?;
    ctx.call_activity::<_, bool>(&names.activity(BROADCAST_MESSAGE), &response)
        .await?;
    Ok(response)
}

async fn should_continue(
    ctx: &WorkflowContext,
    names: &ActivityNames,
    state: &OrchestrationState,
    turn: u32,
    max_iterations: u32,
) -> Result<bool> {
    Ok(ctx
        .call_activity(
            &names.activity(SHOULD_CONTINUE_ORCHESTRATION),
            &ContinueRequest {
                state: state.clone(),
                turn,
                max_iterations,
            },
        )
        .await?)
}

async fn turn_taking_loop(
    ctx: &WorkflowContext,
    names: &ActivityNames,
    max_iterations: u32,
    input: &AgentTaskInput,
) -> Result<(Message, Verdict)> {
    let available = discover(ctx, names, input).await?;
    let mut state: OrchestrationState = ctx
        .call_activity(
            &names.activity(INITIALIZE_ORCHESTRATION),
            &InitializeRequest {
                task: input.task.clone(),
                agents: available.names,
            },
        )
        .await?;

    let mut turn = 1;
    let verdict = loop {
        let selection: AgentSelection = ctx
            .call_activity(
                &names.activity(SELECT_NEXT_ACTION),
                &SelectRequest {
                    state: state.clone(),
                    turn,
                },
            )
            .await?;
        let response = take_turn(ctx, names, &selection, turn).await?;

        let processed: ProcessedResponse = ctx
            .call_activity(
                &names.activity(PROCESS_ORCHESTRATION_RESPONSE),
                &ProcessRequest {
                    state,
                    agent: selection.agent.clone(),
                    response,
                },
            )
            .await?;
        state = processed.updated_state;

        if processed.verdict != Verdict::Continue {
            break processed.verdict;
        }
        if !should_continue(ctx, names, &state, turn, max_iterations).await? {
            break Verdict::Continue;
        }
        turn += 1;
    };

    let summary: Message = ctx
        .call_activity(&names.activity(FINALIZE_ORCHESTRATION), &state)
        .await?;
    Ok((summary, verdict))
}

async fn planned_loop(
    ctx: &WorkflowContext,
    names: &ActivityNames,
    max_iterations: u32,
    input: &AgentTaskInput,
) -> Result<(Message, Verdict)> {
    let available = discover(ctx, names, input).await?;
    let mut state: OrchestrationState = ctx
        .call_activity(
            &names.activity(GENERATE_PLAN),
            &PlanRequest {
                task: input.task.clone(),
                agents: available.names,
                listing: available.listing.clone(),
            },
        )
        .await?;

    let mut turn = 1;
    let verdict = loop {
        let planned: PlannedSelection = ctx
            .call_activity(
                &names.activity(SELECT_PLANNED_STEP),
                &PlannedStepRequest {
                    state,
                    turn,
                    listing: available.listing.clone(),
                },
            )
            .await?;
        state = planned.updated_state;
        let selection = planned.selection;
        let step = selection
            .metadata
            .get("step")
            .and_then(Value::as_u64)
            .and_then(|step| u32::try_from(step).ok());

        let response = take_turn(ctx, names, &selection, turn).await?;

        let processed: ProcessedResponse = ctx
            .call_activity(
                &names.activity(ASSESS_PROGRESS),
                &ProgressRequest {
                    state,
                    agent: selection.agent.clone(),
                    step,
                    response,
                },
            )
            .await?;
        state = processed.updated_state;

        if processed.verdict != Verdict::Continue {
            break processed.verdict;
        }
        if !should_continue(ctx, names, &state, turn, max_iterations).await? {
            break Verdict::Continue;
        }
        turn += 1;
    };

    let summary: Message = ctx
        .call_activity(&names.activity(FINALIZE_ORCHESTRATION), &state)
        .await?;
    Ok((summary, verdict))
}

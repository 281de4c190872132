//! The single-agent tool-calling loop.
//!
//! A workflow body only awaits activities through its [`WorkflowContext`];
//! it never touches the model, tools or state directly. Replaying it against
//! recorded history therefore reproduces the same sequence of decisions.

use anyhow::Result;

use super::activities::{
    ActivityNames, AgentTaskInput, FinalizeRequest, CALL_LLM, FINALIZE_WORKFLOW, RECORD_INITIAL_ENTRY, RUN_TOOL,
    SAVE_TOOL_RESULTS,
};
use crate::provider::Message;
use crate::runtime::{RuntimeError, WorkflowContext};
use crate::state::EntryStatus;
use crate::tools::ToolExecutionResult;

/// Step of the agent loop, used for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentWorkflowStep {
    Started,
    CallingLlm,
    RunningTools,
    SavingResults,
    Finalizing,
    Completed,
    Failed,
}

impl AgentWorkflowStep {
    pub fn name(&self) -> &str {
        match self {
            Self::Started => "started",
            Self::CallingLlm => "calling_llm",
            Self::RunningTools => "running_tools",
            Self::SavingResults => "saving_results",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for AgentWorkflowStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Steps answered from history were traced when they first ran
async fn trace_step(ctx: &WorkflowContext, step: AgentWorkflowStep, turn: u32) {
    if ctx.is_replaying().await {
        return;
    }
    tracing::debug!(instance_id = %ctx.instance_id(), step = %step, turn, "agent workflow step");
}

/// Run the agent loop for `input.task` and return the final assistant message
pub async fn agent_workflow(
    ctx: WorkflowContext,
    names: ActivityNames,
    max_iterations: u32,
    input: AgentTaskInput,
) -> Result<Message> {
    let outcome = tool_loop(&ctx, &names, max_iterations.max(1), &input).await;
    finish(&ctx, &names, outcome.map(|reply| (reply, EntryStatus::Completed))).await
}

async fn tool_loop(
    ctx: &WorkflowContext,
    names: &ActivityNames,
    max_iterations: u32,
    input: &AgentTaskInput,
) -> Result<Message> {
    trace_step(ctx, AgentWorkflowStep::Started, 0).await;
    ctx.call_activity::<_, ()>(&names.activity(RECORD_INITIAL_ENTRY), input)
        .await?;

    let mut turn = 1;
    loop {
        trace_step(ctx, AgentWorkflowStep::CallingLlm, turn).await;
        let mut reply: Message = ctx.call_activity(&names.activity(CALL_LLM), &turn).await?;

        if !reply.has_tool_calls() {
            return Ok(reply);
        }
        if turn >= max_iterations {
            tracing::warn!(instance_id = %ctx.instance_id(), turn, "max iterations reached with tool calls pending");
            if reply.content.trim().is_empty() {
                reply.content = format!(
                    "Stopped after {} iterations with tool calls still pending",
                    max_iterations
                );
            }
            return Ok(reply);
        }

        trace_step(ctx, AgentWorkflowStep::RunningTools, turn).await;
        let mut results = Vec::with_capacity(reply.tool_calls.len());
        for call in &reply.tool_calls {
            let result: ToolExecutionResult = ctx.call_activity(&names.activity(RUN_TOOL), call).await?;
            results.push(result);
        }

        trace_step(ctx, AgentWorkflowStep::SavingResults, turn).await;
        ctx.call_activity::<_, usize>(&names.activity(SAVE_TOOL_RESULTS), &results)
            .await?;

        turn += 1;
    }
}

/// Persist the terminal status of the entry and shape the workflow result.
///
/// A failed outcome is recorded as a failed entry carrying the error text
/// and still fails the workflow. Non-determinism is passed through untouched.
pub(crate) async fn finish(
    ctx: &WorkflowContext,
    names: &ActivityNames,
    outcome: Result<(Message, EntryStatus)>,
) -> Result<Message> {
    trace_step(ctx, AgentWorkflowStep::Finalizing, 0).await;

    let (request, result) = match outcome {
        Ok((message, EntryStatus::Failed)) => (
            FinalizeRequest {
                status: EntryStatus::Failed,
                output: message.content.clone(),
            },
            Err(anyhow::anyhow!("{}", message.content)),
        ),
        Ok((message, _)) => (
            FinalizeRequest {
                status: EntryStatus::Completed,
                output: message.content.clone(),
            },
            Ok(message),
        ),
        Err(e) if matches!(e.downcast_ref::<RuntimeError>(), Some(RuntimeError::NonDeterministic { .. })) => {
            return Err(e);
        }
        Err(e) => (
            FinalizeRequest {
                status: EntryStatus::Failed,
                output: format!("{:#}", e),
            },
            Err(e),
        ),
    };

    if let Err(e) = ctx
        .call_activity::<_, ()>(&names.activity(FINALIZE_WORKFLOW), &request)
        .await
    {
        tracing::error!(instance_id = %ctx.instance_id(), error = %e, "failed to finalize workflow entry");
        return Err(result.err().unwrap_or_else(|| e.into()));
    }

    let step = if result.is_ok() {
        AgentWorkflowStep::Completed
    } else {
        AgentWorkflowStep::Failed
    };
    trace_step(ctx, step, 0).await;
    result
}

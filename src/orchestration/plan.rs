//! LLM-planned orchestration.
//!
//! The orchestration workflow drives this mode through its own LLM activities
//! (generate a plan, pick the next step, assess progress). The strategy object
//! only owns the state shape, the continuation rule and the final summary;
//! asking it to select or process directly is an error.

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

use super::errors::{OrchestrationError, OrchestrationResult};
use super::strategy::{
    from_state, to_state, AgentSelection, OrchestrationMode, OrchestrationState, OrchestrationStrategy,
    ProcessedResponse, Verdict,
};
use crate::provider::Message;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub step: u32,
    pub description: String,
    #[serde(default)]
    pub status: StepStatus,
}

/// One agent turn, as recorded in the task history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub agent: String,
    #[serde(default)]
    pub step: Option<u32>,
    pub result: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanState {
    pub task: String,
    pub agent_names: Vec<String>,
    #[serde(default)]
    pub plan: Vec<PlanStep>,
    #[serde(default)]
    pub task_history: Vec<TaskResult>,
    #[serde(default)]
    pub verdict: Verdict,
    #[serde(default)]
    pub summary: Option<String>,
}

impl PlanState {
    pub fn load(state: &OrchestrationState) -> OrchestrationResult<Self> {
        from_state(state)
    }

    pub fn to_state(&self) -> OrchestrationResult<OrchestrationState> {
        to_state(self)
    }

    /// First step that is not completed yet
    pub fn next_open_step(&self) -> Option<&PlanStep> {
        self.plan.iter().find(|step| step.status != StepStatus::Completed)
    }

    fn step_mut(&mut self, step: u32) -> Option<&mut PlanStep> {
        self.plan.iter_mut().find(|s| s.step == step)
    }
}

/// LLM reply to the planning prompt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanReply {
    #[serde(default)]
    pub plan: Vec<PlanStepReply>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStepReply {
    #[serde(default)]
    pub step: Option<u32>,
    pub description: String,
}

/// LLM reply to the next-step prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSelectionReply {
    pub agent: String,
    #[serde(default)]
    pub step: Option<u32>,
    pub instruction: String,
}

/// LLM reply to the progress prompt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressReply {
    #[serde(default)]
    pub verdict: Verdict,
    #[serde(default)]
    pub completed_steps: Vec<u32>,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlanStrategy;

impl OrchestrationStrategy for PlanStrategy {
    fn mode(&self) -> OrchestrationMode {
        OrchestrationMode::Llm
    }

    fn initialize(&self, task: &str, agents: &[String]) -> OrchestrationResult<OrchestrationState> {
        if agents.is_empty() {
            return Err(OrchestrationError::NoAgents);
        }
        let mut agent_names = agents.to_vec();
        agent_names.sort();
        agent_names.dedup();

        PlanState {
            task: task.to_string(),
            agent_names,
            ..PlanState::default()
        }
        .to_state()
    }

    fn select_next_agent(&self, _state: &OrchestrationState, _turn: u32) -> OrchestrationResult<AgentSelection> {
        Err(OrchestrationError::UnsupportedOperation {
            strategy: "llm",
            operation: "select_next_agent",
        })
    }

    fn process_response(
        &self,
        _state: OrchestrationState,
        _agent: &str,
        _response: &Message,
    ) -> OrchestrationResult<ProcessedResponse> {
        Err(OrchestrationError::UnsupportedOperation {
            strategy: "llm",
            operation: "process_response",
        })
    }

    fn should_continue(&self, state: &OrchestrationState, turn: u32, max_iterations: u32) -> bool {
        let verdict = PlanState::load(state)
            .map(|plan| plan.verdict)
            .unwrap_or(Verdict::Failed);
        verdict == Verdict::Continue && turn < max_iterations
    }

    fn finalize(&self, state: &OrchestrationState) -> Message {
        let plan = match PlanState::load(state) {
            Ok(plan) => plan,
            Err(e) => return Message::assistant(format!("Orchestration ended without a usable result: {}", e)),
        };

        if let Some(summary) = plan.summary.as_deref().filter(|s| !s.trim().is_empty()) {
            return Message::assistant(summary);
        }

        match plan.task_history.last() {
            Some(last) if !last.result.trim().is_empty() => {
                Message::assistant(last.result.clone()).with_name(last.agent.clone())
            }
            _ => Message::assistant(format!("No agent responded to the task: {}", plan.task)),
        }
    }
}

/// Install the plan the model produced; steps are renumbered 1..=N in reply order
pub fn apply_plan(mut state: PlanState, reply: PlanReply) -> PlanState {
    state.plan = reply
        .plan
        .into_iter()
        .filter(|step| !step.description.trim().is_empty())
        .enumerate()
        .map(|(idx, step)| PlanStep {
            step: idx as u32 + 1,
            description: step.description,
            status: StepStatus::NotStarted,
        })
        .collect();

    // A plan is never empty: fall back to the task itself
    if state.plan.is_empty() {
        state.plan.push(PlanStep {
            step: 1,
            description: state.task.clone(),
            status: StepStatus::NotStarted,
        });
    }
    state
}

/// Validate a step selection against the team; unknown agents fall back to the first one
pub fn resolve_selection(state: &mut PlanState, reply: Option<StepSelectionReply>, turn: u32) -> AgentSelection {
    let fallback_step = state.next_open_step().map(|step| (step.step, step.description.clone()));

    let (agent, step, instruction) = match reply {
        Some(reply) if state.agent_names.contains(&reply.agent) => {
            let step = reply.step.or(fallback_step.as_ref().map(|(n, _)| *n));
            (reply.agent, step, reply.instruction)
        }
        other => {
            if let Some(reply) = other {
                tracing::warn!(agent = %reply.agent, "planner picked an unknown agent, using fallback");
            }
            let agent = state.agent_names.first().cloned().unwrap_or_default();
            let (step, description) = match &fallback_step {
                Some((n, description)) => (Some(*n), description.clone()),
                None => (None, state.task.clone()),
            };
            (agent, step, format!("Task: {}\n\nCurrent step: {}", state.task, description))
        }
    };

    if let Some(step) = step.and_then(|n| state.step_mut(n)) {
        if step.status == StepStatus::NotStarted {
            step.status = StepStatus::InProgress;
        }
    }

    let mut metadata = serde_json::Map::new();
    metadata.insert("turn".to_string(), Value::from(turn));
    if let Some(step) = step {
        metadata.insert("step".to_string(), Value::from(step));
    }

    AgentSelection {
        agent,
        instruction,
        metadata,
    }
}

/// Record an agent's response against the step it was working on
pub fn record_result(mut state: PlanState, agent: &str, step: Option<u32>, response: &Message) -> PlanState {
    state.task_history.push(TaskResult {
        agent: agent.to_string(),
        step,
        result: response.content.clone(),
    });
    state
}

/// Fold the model's progress assessment into state
pub fn apply_progress(mut state: PlanState, reply: ProgressReply) -> PlanState {
    for n in reply.completed_steps {
        if let Some(step) = state.step_mut(n) {
            step.status = StepStatus::Completed;
        }
    }
    if reply.summary.is_some() {
        state.summary = reply.summary;
    }
    state.verdict = reply.verdict;

    // Every step done means done, whatever the verdict said
    if state.verdict == Verdict::Continue && !state.plan.is_empty() && state.next_open_step().is_none() {
        state.verdict = Verdict::Completed;
    }
    state
}

fn render_plan(plan: &[PlanStep]) -> String {
    plan.iter()
        .map(|step| format!("{}. [{:?}] {}", step.step, step.status, step.description))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_history(history: &[TaskResult]) -> String {
    if history.is_empty() {
        return "(no results yet)".to_string();
    }
    history
        .iter()
        .map(|r| match r.step {
            Some(step) => format!("- {} (step {}): {}", r.agent, step, r.result),
            None => format!("- {}: {}", r.agent, r.result),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn plan_prompt(task: &str, agent_listing: &str) -> String {
    format!(
        "You coordinate a team of agents.\n\nTask:\n{}\n\nAvailable agents:\n{}\n\n\
         Break the task into a short ordered plan. Reply with JSON only:\n\
         {{\"plan\": [{{\"step\": 1, \"description\": \"...\"}}]}}",
        task, agent_listing
    )
}

pub fn select_prompt(state: &PlanState, agent_listing: &str) -> String {
    format!(
        "Task:\n{}\n\nPlan:\n{}\n\nResults so far:\n{}\n\nAvailable agents:\n{}\n\n\
         Choose the agent for the next open step and write their instruction. Reply with JSON only:\n\
         {{\"agent\": \"<name>\", \"step\": <number>, \"instruction\": \"...\"}}",
        state.task,
        render_plan(&state.plan),
        render_history(&state.task_history),
        agent_listing
    )
}

pub fn progress_prompt(state: &PlanState) -> String {
    format!(
        "Task:\n{}\n\nPlan:\n{}\n\nResults so far:\n{}\n\n\
         Assess progress. Use verdict \"completed\" when the task is done, \"failed\" if it cannot be done, \
         otherwise \"continue\". Reply with JSON only:\n\
         {{\"verdict\": \"continue\", \"completed_steps\": [1], \"summary\": \"final answer when completed\"}}",
        state.task,
        render_plan(&state.plan),
        render_history(&state.task_history)
    )
}

fn fenced_block() -> Option<&'static Regex> {
    static FENCED: OnceLock<Option<Regex>> = OnceLock::new();
    FENCED
        .get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").ok())
        .as_ref()
}

/// Parse a JSON reply, tolerating ```json fences and surrounding prose
pub fn parse_json_reply<T: DeserializeOwned>(text: &str) -> Option<T> {
    if let Some(re) = fenced_block() {
        for captures in re.captures_iter(text) {
            if let Some(parsed) = captures.get(1).and_then(|m| serde_json::from_str(m.as_str()).ok()) {
                return Some(parsed);
            }
        }
    }

    if let Ok(parsed) = serde_json::from_str(text.trim()) {
        return Some(parsed);
    }

    // Outermost braces, for replies that wrap JSON in prose
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// Plans may come back as `{"plan": [...]}` or as a bare array
pub fn parse_plan_reply(text: &str) -> Option<PlanReply> {
    parse_json_reply::<PlanReply>(text)
        .filter(|reply| !reply.plan.is_empty())
        .or_else(|| parse_json_reply::<Vec<PlanStepReply>>(text).map(|plan| PlanReply { plan }))
}

//! The shared strategy contract.
//!
//! Strategies are pure: every call is a function of its arguments, and the
//! state they own travels by value. The orchestration workflow never holds a
//! strategy; activities do, which keeps randomness and LLM calls inside
//! memoized history.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use super::errors::{OrchestrationError, OrchestrationResult};
use super::plan::PlanStrategy;
use super::random::RandomStrategy;
use super::round_robin::RoundRobinStrategy;
use crate::provider::Message;

/// Strategy-owned state, replaced wholesale after every call
pub type OrchestrationState = Map<String, Value>;

/// Outcome of folding a response into strategy state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    #[default]
    Continue,
    Completed,
    Failed,
}

/// Who acts next and what they are asked to do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSelection {
    pub agent: String,
    pub instruction: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedResponse {
    pub updated_state: OrchestrationState,
    pub verdict: Verdict,
}

/// Closed set of strategies, chosen once at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationMode {
    RoundRobin,
    Random,
    Llm,
}

impl OrchestrationMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::Random => "random",
            Self::Llm => "llm",
        }
    }
}

impl std::fmt::Display for OrchestrationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for OrchestrationMode {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "round_robin" | "roundrobin" => Ok(Self::RoundRobin),
            "random" => Ok(Self::Random),
            "llm" | "plan" | "llm_planned" => Ok(Self::Llm),
            _ => Err(OrchestrationError::UnknownMode(s.to_string())),
        }
    }
}

/// Decides who acts next and when orchestration ends
pub trait OrchestrationStrategy: Send + Sync {
    fn mode(&self) -> OrchestrationMode;

    /// Initial state for `task`. Fails with [`OrchestrationError::NoAgents`] on an empty team.
    fn initialize(&self, task: &str, agents: &[String]) -> OrchestrationResult<OrchestrationState>;

    fn select_next_agent(&self, state: &OrchestrationState, turn: u32) -> OrchestrationResult<AgentSelection>;

    /// Fold the reply of `agent`, the agent selected this turn, into `state`
    fn process_response(
        &self,
        state: OrchestrationState,
        agent: &str,
        response: &Message,
    ) -> OrchestrationResult<ProcessedResponse>;

    /// False once `turn >= max_iterations`, whatever the strategy thinks
    fn should_continue(&self, state: &OrchestrationState, turn: u32, max_iterations: u32) -> bool;

    /// Caller-facing summary; `content` is never empty
    fn finalize(&self, state: &OrchestrationState) -> Message;
}

pub fn create_strategy(mode: OrchestrationMode) -> Arc<dyn OrchestrationStrategy> {
    match mode {
        OrchestrationMode::RoundRobin => Arc::new(RoundRobinStrategy),
        OrchestrationMode::Random => Arc::new(RandomStrategy),
        OrchestrationMode::Llm => Arc::new(PlanStrategy),
    }
}

pub(crate) fn to_state<T: Serialize>(value: &T) -> OrchestrationResult<OrchestrationState> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(OrchestrationError::InvalidState(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

pub(crate) fn from_state<T: DeserializeOwned>(state: &OrchestrationState) -> OrchestrationResult<T> {
    Ok(serde_json::from_value(Value::Object(state.clone()))?)
}

/// State shared by the turn-taking strategies
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnTakingState {
    pub task: String,
    pub agent_names: Vec<String>,
    #[serde(default)]
    pub previous_agent: Option<String>,
    #[serde(default)]
    pub last_response: Option<String>,
    #[serde(default)]
    pub turns_taken: u32,
}

impl TurnTakingState {
    /// Agent names are sorted once so selection does not depend on discovery order
    pub fn new(task: &str, agents: &[String]) -> OrchestrationResult<Self> {
        if agents.is_empty() {
            return Err(OrchestrationError::NoAgents);
        }
        let mut agent_names = agents.to_vec();
        agent_names.sort();
        agent_names.dedup();

        Ok(Self {
            task: task.to_string(),
            agent_names,
            previous_agent: None,
            last_response: None,
            turns_taken: 0,
        })
    }

    pub fn load(state: &OrchestrationState) -> OrchestrationResult<Self> {
        let parsed: Self = from_state(state)?;
        if parsed.agent_names.is_empty() {
            return Err(OrchestrationError::NoAgents);
        }
        Ok(parsed)
    }

    /// Record the reply of `agent` as the latest turn. The reply's own `name`
    /// is not trusted: a remote agent may answer under another name.
    pub fn record(&mut self, agent: &str, response: &Message) {
        self.previous_agent = Some(agent.to_string());
        self.last_response = Some(response.content.clone());
        self.turns_taken += 1;
    }

    pub fn selection(&self, agent: String, turn: u32) -> AgentSelection {
        let mut metadata = Map::new();
        metadata.insert("turn".to_string(), Value::from(turn));
        if let Some(previous) = &self.previous_agent {
            metadata.insert("previous_agent".to_string(), Value::from(previous.clone()));
        }

        AgentSelection {
            instruction: build_instruction(&self.task, self.previous_agent.as_deref(), self.last_response.as_deref()),
            agent,
            metadata,
        }
    }

    pub fn summary(&self) -> Message {
        match (&self.last_response, &self.previous_agent) {
            (Some(response), Some(agent)) if !response.trim().is_empty() => {
                Message::assistant(response.clone()).with_name(agent.clone())
            }
            (Some(response), None) if !response.trim().is_empty() => Message::assistant(response.clone()),
            _ => Message::assistant(format!("No agent responded to the task: {}", self.task)),
        }
    }
}

/// Instruction for the next agent, embedding the previous response when there is one
pub fn build_instruction(task: &str, previous_agent: Option<&str>, last_response: Option<&str>) -> String {
    match last_response {
        Some(response) if !response.trim().is_empty() => format!(
            "Task: {}\n\nMost recent response from {}:\n{}\n\nContinue the task, building on the response above.",
            task,
            previous_agent.unwrap_or("another agent"),
            response
        ),
        _ => format!("Task: {}", task),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("round_robin".parse::<OrchestrationMode>().unwrap(), OrchestrationMode::RoundRobin);
        assert_eq!("Round-Robin".parse::<OrchestrationMode>().unwrap(), OrchestrationMode::RoundRobin);
        assert_eq!("random".parse::<OrchestrationMode>().unwrap(), OrchestrationMode::Random);
        assert_eq!("llm".parse::<OrchestrationMode>().unwrap(), OrchestrationMode::Llm);
        assert!(matches!(
            "chaos".parse::<OrchestrationMode>(),
            Err(OrchestrationError::UnknownMode(_))
        ));
    }

    #[test]
    fn test_create_strategy_matches_mode() {
        for mode in [OrchestrationMode::RoundRobin, OrchestrationMode::Random, OrchestrationMode::Llm] {
            assert_eq!(create_strategy(mode).mode(), mode);
        }
    }

    #[test]
    fn test_instruction_embeds_previous_response() {
        assert_eq!(build_instruction("write", None, None), "Task: write");
        let instruction = build_instruction("write", Some("poet"), Some("roses are red"));
        assert!(instruction.contains("poet"));
        assert!(instruction.contains("roses are red"));
    }

    #[test]
    fn test_turn_state_requires_agents() {
        assert!(matches!(TurnTakingState::new("t", &[]), Err(OrchestrationError::NoAgents)));
        let state = TurnTakingState::new("t", &["b".to_string(), "a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(state.agent_names, vec!["a", "b"]);
    }
}

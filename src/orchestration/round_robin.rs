//! Round-robin speaker selection.

use super::errors::OrchestrationResult;
use super::strategy::{
    to_state, AgentSelection, OrchestrationMode, OrchestrationState, OrchestrationStrategy, ProcessedResponse,
    TurnTakingState, Verdict,
};
use crate::provider::Message;

/// Agents act in sorted-name order: turn `t` goes to `agent_names[(t - 1) % N]`
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobinStrategy;

fn slot(turn: u32, agents: usize) -> usize {
    (turn.saturating_sub(1) as usize) % agents
}

impl OrchestrationStrategy for RoundRobinStrategy {
    fn mode(&self) -> OrchestrationMode {
        OrchestrationMode::RoundRobin
    }

    fn initialize(&self, task: &str, agents: &[String]) -> OrchestrationResult<OrchestrationState> {
        to_state(&TurnTakingState::new(task, agents)?)
    }

    fn select_next_agent(&self, state: &OrchestrationState, turn: u32) -> OrchestrationResult<AgentSelection> {
        let state = TurnTakingState::load(state)?;
        let agent = state.agent_names[slot(turn, state.agent_names.len())].clone();
        Ok(state.selection(agent, turn))
    }

    fn process_response(
        &self,
        state: OrchestrationState,
        agent: &str,
        response: &Message,
    ) -> OrchestrationResult<ProcessedResponse> {
        let mut state = TurnTakingState::load(&state)?;
        state.record(agent, response);
        Ok(ProcessedResponse {
            updated_state: to_state(&state)?,
            verdict: Verdict::Continue,
        })
    }

    fn should_continue(&self, _state: &OrchestrationState, turn: u32, max_iterations: u32) -> bool {
        turn < max_iterations
    }

    fn finalize(&self, state: &OrchestrationState) -> Message {
        match TurnTakingState::load(state) {
            Ok(state) => state.summary(),
            Err(e) => Message::assistant(format!("Orchestration ended without a usable result: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::OrchestrationError;

    fn agents(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_cycles_through_sorted_agents() {
        let strategy = RoundRobinStrategy;
        let state = strategy.initialize("task", &agents(&["C", "A", "B"])).unwrap();

        let picks: Vec<String> = (1..=4)
            .map(|turn| strategy.select_next_agent(&state, turn).unwrap().agent)
            .collect();
        assert_eq!(picks, vec!["A", "B", "C", "A"]);
    }

    #[test]
    fn test_empty_team_fails_fast() {
        let err = RoundRobinStrategy.initialize("task", &[]).unwrap_err();
        assert!(matches!(err, OrchestrationError::NoAgents));
    }

    #[test]
    fn test_response_feeds_next_instruction() {
        let strategy = RoundRobinStrategy;
        let state = strategy.initialize("write a limerick", &agents(&["A", "B"])).unwrap();
        let processed = strategy
            .process_response(state, "A", &Message::assistant("There once was..."))
            .unwrap();
        assert_eq!(processed.verdict, Verdict::Continue);

        let next = strategy.select_next_agent(&processed.updated_state, 2).unwrap();
        assert_eq!(next.agent, "B");
        assert!(next.instruction.contains("There once was..."));
        assert_eq!(next.metadata["previous_agent"], "A");
    }

    #[test]
    fn test_max_iterations_bounds_the_loop() {
        let strategy = RoundRobinStrategy;
        let state = strategy.initialize("task", &agents(&["A"])).unwrap();
        assert!(strategy.should_continue(&state, 2, 3));
        assert!(!strategy.should_continue(&state, 3, 3));
        assert!(!strategy.should_continue(&state, 7, 3));
    }

    #[test]
    fn test_finalize_without_responses_has_fallback() {
        let strategy = RoundRobinStrategy;
        let state = strategy.initialize("task", &agents(&["A"])).unwrap();
        let summary = strategy.finalize(&state);
        assert_eq!(summary.role, crate::provider::MessageRole::Assistant);
        assert!(!summary.content.is_empty());
    }
}

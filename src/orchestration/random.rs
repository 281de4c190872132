//! Random speaker selection.
//!
//! Drawing a random number is non-deterministic, so this strategy is only
//! replay-safe when called from inside an activity.

use rand::seq::SliceRandom;
use rand::Rng;

use super::errors::{OrchestrationError, OrchestrationResult};
use super::strategy::{
    to_state, AgentSelection, OrchestrationMode, OrchestrationState, OrchestrationStrategy, ProcessedResponse,
    TurnTakingState, Verdict,
};
use crate::provider::Message;

/// Uniform pick, never repeating the previous speaker when there is a choice
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomStrategy;

impl RandomStrategy {
    /// Selection with an explicit RNG
    pub fn select_with_rng<R: Rng + ?Sized>(
        &self,
        state: &OrchestrationState,
        turn: u32,
        rng: &mut R,
    ) -> OrchestrationResult<AgentSelection> {
        let state = TurnTakingState::load(state)?;
        let candidates = candidates(&state.agent_names, state.previous_agent.as_deref());
        let agent = candidates
            .choose(rng)
            .map(|name| name.to_string())
            .ok_or(OrchestrationError::NoAgents)?;
        Ok(state.selection(agent, turn))
    }
}

/// Everyone except `previous`, unless that would leave nobody
fn candidates<'a>(agent_names: &'a [String], previous: Option<&str>) -> Vec<&'a str> {
    let all: Vec<&str> = agent_names.iter().map(String::as_str).collect();
    match previous {
        Some(previous) if all.len() > 1 => {
            let others: Vec<&str> = all.iter().copied().filter(|name| *name != previous).collect();
            if others.is_empty() {
                all
            } else {
                others
            }
        }
        _ => all,
    }
}

impl OrchestrationStrategy for RandomStrategy {
    fn mode(&self) -> OrchestrationMode {
        OrchestrationMode::Random
    }

    fn initialize(&self, task: &str, agents: &[String]) -> OrchestrationResult<OrchestrationState> {
        to_state(&TurnTakingState::new(task, agents)?)
    }

    fn select_next_agent(&self, state: &OrchestrationState, turn: u32) -> OrchestrationResult<AgentSelection> {
        self.select_with_rng(state, turn, &mut rand::thread_rng())
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
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn agents(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn after_response(strategy: &RandomStrategy, state: OrchestrationState, from: &str) -> OrchestrationState {
        strategy
            .process_response(state, from, &Message::assistant("done"))
            .unwrap()
            .updated_state
    }

    #[test]
    fn test_never_repeats_previous_agent() {
        let strategy = RandomStrategy;
        let state = strategy.initialize("task", &agents(&["A", "B", "C"])).unwrap();
        let state = after_response(&strategy, state, "B");

        let mut rng = StdRng::seed_from_u64(7);
        for turn in 2..200 {
            let pick = strategy.select_with_rng(&state, turn, &mut rng).unwrap();
            assert_ne!(pick.agent, "B");
        }
    }

    #[test]
    fn test_previous_agent_is_the_selected_one_not_the_reply_name() {
        let strategy = RandomStrategy;
        let state = strategy.initialize("task", &agents(&["A", "B", "C"])).unwrap();
        // B answered under an alias
        let state = strategy
            .process_response(state, "B", &Message::assistant("done").with_name("b-service"))
            .unwrap()
            .updated_state;

        let mut rng = StdRng::seed_from_u64(11);
        for turn in 2..100 {
            let pick = strategy.select_with_rng(&state, turn, &mut rng).unwrap();
            assert_ne!(pick.agent, "B");
            assert_eq!(pick.metadata["previous_agent"], "B");
        }
    }

    #[test]
    fn test_single_agent_is_always_chosen() {
        let strategy = RandomStrategy;
        let state = strategy.initialize("task", &agents(&["solo"])).unwrap();
        let state = after_response(&strategy, state, "solo");

        for turn in 1..20 {
            assert_eq!(strategy.select_next_agent(&state, turn).unwrap().agent, "solo");
        }
    }

    #[test]
    fn test_first_turn_may_pick_anyone() {
        let strategy = RandomStrategy;
        let state = strategy.initialize("task", &agents(&["A", "B"])).unwrap();

        let mut rng = StdRng::seed_from_u64(1);
        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..100 {
            seen.insert(strategy.select_with_rng(&state, 1, &mut rng).unwrap().agent);
        }
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_bounded_by_max_iterations() {
        let strategy = RandomStrategy;
        let state = strategy.initialize("task", &agents(&["A", "B"])).unwrap();
        assert!(!strategy.should_continue(&state, 5, 5));
    }
}

//! Orchestration strategies: who acts next, and when multi-agent work is done.

pub mod errors;
pub mod plan;
pub mod random;
pub mod round_robin;
pub mod strategy;

pub use errors::{OrchestrationError, OrchestrationResult};
pub use plan::{PlanState, PlanStep, PlanStrategy, StepStatus, TaskResult};
pub use random::RandomStrategy;
pub use round_robin::RoundRobinStrategy;
pub use strategy::{
    build_instruction, create_strategy, AgentSelection, OrchestrationMode, OrchestrationState,
    OrchestrationStrategy, ProcessedResponse, TurnTakingState, Verdict,
};

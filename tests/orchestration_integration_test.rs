//! Integration tests for multi-agent orchestration
//!
//! Workers and an orchestrator share one runtime and one team registry;
//! the orchestrator reaches workers through a local directory.

use anyhow::Result;
use async_trait::async_trait;
use durable_agents::agent::{
    AgentError, AgentInvoker, AgentTaskInput, DurableAgent, DurableAgentBuilder, LocalAgentDirectory,
};
use durable_agents::orchestration::OrchestrationMode;
use durable_agents::provider::{GenerateConfig, LlmProvider, Message, MessageRole};
use durable_agents::registry::{AgentRegistry, RegistryEntry};
use durable_agents::runtime::WorkflowRuntime;
use durable_agents::state::{EntryStatus, FileStateStore, InMemoryStateStore, StateStore};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

// Mock provider replaying a fixed script
#[derive(Clone, Default)]
struct MockProvider {
    replies: Arc<Mutex<VecDeque<Message>>>,
    requests: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl MockProvider {
    fn new(replies: &[&str]) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.iter().map(|r| Message::assistant(*r)).collect())),
            requests: Arc::default(),
        }
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request(&self, index: usize) -> Vec<Message> {
        self.requests.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn generate(&self, messages: Vec<Message>, _config: &GenerateConfig) -> Result<Message> {
        self.requests.lock().unwrap().push(messages);
        let mut replies = self.replies.lock().unwrap();
        Ok(replies.pop_front().unwrap_or_else(|| Message::assistant("nothing to add")))
    }

    fn provider_name(&self) -> &str {
        "MockProvider"
    }

    fn default_model(&self) -> String {
        "mock-model".to_string()
    }
}

fn worker(name: &str, llm: &MockProvider, runtime: &WorkflowRuntime, team: &Arc<dyn StateStore>) -> Result<DurableAgent> {
    Ok(DurableAgentBuilder::new(name)
        .role("Writer")
        .llm(Arc::new(llm.clone()))
        .registry_store(Arc::clone(team))
        .team("writers")
        .runtime(runtime.clone())
        .build()?)
}

// Records every invocation and answers "<agent> reply <n>"; optionally hangs on one call
#[derive(Clone, Default)]
struct CountingInvoker {
    calls: Arc<Mutex<Vec<(String, String)>>>,
    hang_on_call: Option<usize>,
    hanging: Arc<Notify>,
}

impl CountingInvoker {
    fn hanging_on(call: usize) -> Self {
        Self {
            hang_on_call: Some(call),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    fn agents(&self) -> Vec<String> {
        self.calls().into_iter().map(|(agent, _)| agent).collect()
    }
}

#[async_trait]
impl AgentInvoker for CountingInvoker {
    async fn invoke(&self, agent: &str, task: &str) -> Result<Value> {
        let (call, nth) = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((agent.to_string(), task.to_string()));
            (calls.len(), calls.iter().filter(|(a, _)| a == agent).count())
        };
        if self.hang_on_call == Some(call) {
            self.hanging.notify_one();
            std::future::pending::<()>().await;
        }
        Ok(Value::String(format!("{} reply {}", agent, nth)))
    }
}

async fn register_writers(team: &Arc<dyn StateStore>, names: &[&str]) -> Result<()> {
    let registry = AgentRegistry::new(Arc::clone(team), "writers");
    for name in names {
        registry
            .register_agent(name, RegistryEntry::new("DurableAgent", "Writer", ""))
            .await?;
    }
    Ok(())
}

fn user_text(request: &[Message]) -> String {
    request
        .iter()
        .filter(|message| message.role == MessageRole::User)
        .map(|message| message.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[tokio::test]
async fn test_round_robin_passes_work_between_agents() -> Result<()> {
    let runtime = WorkflowRuntime::in_memory();
    let team = runtime.store();

    let alpha_llm = MockProvider::new(&["first stanza", "final poem"]);
    let beta_llm = MockProvider::new(&["edited stanza"]);
    let alpha = worker("alpha", &alpha_llm, &runtime, &team)?;
    let beta = worker("beta", &beta_llm, &runtime, &team)?;

    let directory = LocalAgentDirectory::new();
    directory.register("alpha", Arc::new(alpha.clone()));
    directory.register("beta", Arc::new(beta.clone()));

    let lead = DurableAgentBuilder::new("lead")
        .llm(Arc::new(MockProvider::default()))
        .registry_store(Arc::clone(&team))
        .team("writers")
        .orchestration(OrchestrationMode::RoundRobin, 3)
        .invoker(Arc::new(directory))
        .runtime(runtime.clone())
        .build()?;

    for agent in [&alpha, &beta, &lead] {
        agent.register(&runtime).await?;
    }
    runtime.start().await?;
    for agent in [&alpha, &beta, &lead] {
        agent.start().await?;
    }

    let summary = lead.orchestrate("write a poem about tides").await?;
    assert_eq!(summary.content, "final poem");
    assert_eq!(summary.name.as_deref(), Some("alpha"));

    // alpha, beta, alpha
    assert_eq!(alpha_llm.calls(), 2);
    assert_eq!(beta_llm.calls(), 1);
    let beta_prompt = user_text(&beta_llm.request(0));
    assert!(beta_prompt.contains("write a poem about tides"));
    assert!(beta_prompt.contains("first stanza"));
    assert!(user_text(&alpha_llm.request(1)).contains("edited stanza"));

    for agent in [&lead, &beta, &alpha] {
        agent.stop().await?;
    }
    assert!(runtime.is_running());
    runtime.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_unreachable_agent_does_not_abort_orchestration() -> Result<()> {
    let runtime = WorkflowRuntime::in_memory();
    let team = runtime.store();

    // Registered in the team, but nothing answers for it
    AgentRegistry::new(Arc::clone(&team), "writers")
        .register_agent("ghost", RegistryEntry::new("DurableAgent", "Writer", ""))
        .await?;

    let lead = DurableAgentBuilder::new("lead")
        .llm(Arc::new(MockProvider::default()))
        .registry_store(Arc::clone(&team))
        .team("writers")
        .orchestration(OrchestrationMode::Random, 1)
        .invoker(Arc::new(LocalAgentDirectory::new()))
        .runtime(runtime.clone())
        .build()?;
    lead.start().await?;

    let summary = lead.orchestrate("say hello").await?;
    assert!(summary.content.contains("ghost failed to respond"));

    lead.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_orchestration_without_team_fails() -> Result<()> {
    let lead = DurableAgentBuilder::new("lead")
        .llm(Arc::new(MockProvider::default()))
        .orchestration(OrchestrationMode::RoundRobin, 2)
        .invoker(Arc::new(LocalAgentDirectory::new()))
        .build()?;
    lead.start().await?;

    let err = lead.orchestrate("anything").await.unwrap_err();
    assert!(matches!(err, AgentError::WorkflowFailed { .. }));
    assert!(err.to_string().contains("at least one agent"));

    lead.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_orchestrate_requires_strategy() -> Result<()> {
    let agent = DurableAgentBuilder::new("solo")
        .llm(Arc::new(MockProvider::default()))
        .build()?;
    agent.start().await?;
    assert!(agent.orchestrate("anything").await.is_err());
    agent.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_llm_planned_orchestration_follows_plan_until_completed() -> Result<()> {
    let team: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
    register_writers(&team, &["alpha", "beta"]).await?;

    let lead_llm = MockProvider::new(&[
        r#"{"plan": [{"step": 1, "description": "draft the poem"}, {"step": 2, "description": "polish the poem"}]}"#,
        r#"{"agent": "alpha", "step": 1, "instruction": "Draft a poem about tides"}"#,
        r#"{"verdict": "continue", "completed_steps": [1]}"#,
        r#"{"agent": "beta", "step": 2, "instruction": "Polish the draft"}"#,
        r#"{"verdict": "completed", "completed_steps": [2], "summary": "A polished poem about tides"}"#,
    ]);
    let invoker = CountingInvoker::default();

    let lead = DurableAgentBuilder::new("lead")
        .llm(Arc::new(lead_llm.clone()))
        .registry_store(Arc::clone(&team))
        .team("writers")
        .orchestration(OrchestrationMode::Llm, 5)
        .invoker(Arc::new(invoker.clone()))
        .build()?;
    lead.start().await?;

    let instance_id = lead
        .schedule_orchestration(AgentTaskInput::new("write a poem about tides"), None)
        .await?;
    let summary = lead.wait_for(&instance_id).await?;
    assert_eq!(summary.content, "A polished poem about tides");

    // plan, then select and assess for each of the two turns
    assert_eq!(lead_llm.calls(), 5);
    let plan_prompt = user_text(&lead_llm.request(0));
    assert!(plan_prompt.contains("write a poem about tides"));
    assert!(plan_prompt.contains("alpha"));
    assert!(user_text(&lead_llm.request(4)).contains("beta reply 1"));

    assert_eq!(
        invoker.calls(),
        vec![
            ("alpha".to_string(), "Draft a poem about tides".to_string()),
            ("beta".to_string(), "Polish the draft".to_string()),
        ]
    );

    let entry = lead.workflow_entry(&instance_id).await?.unwrap();
    assert_eq!(entry.status, EntryStatus::Completed);
    assert_eq!(entry.output.as_deref(), Some("A polished poem about tides"));

    lead.stop().await?;
    Ok(())
}

fn file_lead(store: &Arc<dyn StateStore>, runtime: &WorkflowRuntime, invoker: &CountingInvoker) -> Result<DurableAgent> {
    Ok(DurableAgentBuilder::new("lead")
        .llm(Arc::new(MockProvider::default()))
        .state_store(Arc::clone(store))
        .registry_store(Arc::clone(store))
        .team("writers")
        .orchestration(OrchestrationMode::RoundRobin, 2)
        .invoker(Arc::new(invoker.clone()))
        .runtime(runtime.clone())
        .build()?)
}

#[tokio::test]
async fn test_restarted_orchestration_does_not_reinvoke_answered_agents() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let instance_id = "tides-1";

    // First process: alpha answers, beta never does
    {
        let store: Arc<dyn StateStore> = Arc::new(FileStateStore::new(dir.path())?);
        register_writers(&store, &["alpha", "beta"]).await?;
        let runtime = WorkflowRuntime::new(Arc::clone(&store));
        let invoker = CountingInvoker::hanging_on(2);
        let lead = file_lead(&store, &runtime, &invoker)?;

        lead.register(&runtime).await?;
        runtime.start().await?;
        lead.start().await?;
        lead.schedule_orchestration(AgentTaskInput::new("write a poem about tides"), Some(instance_id.to_string()))
            .await?;

        tokio::time::timeout(Duration::from_secs(5), invoker.hanging.notified()).await?;
        assert_eq!(invoker.agents(), vec!["alpha", "beta"]);

        lead.stop().await?;
        runtime.stop().await?;
        let record = runtime.get_instance(instance_id).await?.unwrap();
        assert!(!record.status.is_terminal());
    }

    // Second process over the same directory picks the instance up
    let store: Arc<dyn StateStore> = Arc::new(FileStateStore::new(dir.path())?);
    let runtime = WorkflowRuntime::new(Arc::clone(&store));
    let invoker = CountingInvoker::default();
    let lead = file_lead(&store, &runtime, &invoker)?;

    lead.register(&runtime).await?;
    runtime.start().await?;
    lead.start().await?;

    let summary = tokio::time::timeout(Duration::from_secs(5), lead.wait_for(instance_id)).await??;
    assert_eq!(summary.content, "beta reply 1");

    // alpha's answer came from history
    let calls = invoker.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "beta");
    assert!(calls[0].1.contains("alpha reply 1"));

    let entry = lead.workflow_entry(instance_id).await?.unwrap();
    assert_eq!(entry.status, EntryStatus::Completed);

    lead.stop().await?;
    runtime.stop().await?;
    Ok(())
}

//! Assembling a [`DurableAgent`] from parts or from configuration.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::activities::{AgentDeps, AgentProfile};
use super::errors::{AgentError, AgentResult};
use super::invoker::AgentInvoker;
use super::memory::{ConversationMemory, InMemoryConversation};
use super::orchestration_activities::OrchestrationDeps;
use super::{DurableAgent, OrchestrationSetup};
use crate::config::{ConfigurationLoader, EnvironmentLoader, StateBackend, StateConfig};
use crate::messaging::{AgentMessenger, MessageBus};
use crate::observability::Logger;
use crate::orchestration::{create_strategy, OrchestrationMode};
use crate::provider::{GenerateConfig, LlmProvider};
use crate::registry::{AgentRegistry, PubSubInfo};
use crate::runtime::{RuntimeOptions, WorkflowRuntime};
use crate::state::{AgentStateStore, FileStateStore, InMemoryStateStore, StateStore, DEFAULT_MAX_ATTEMPTS};
use crate::tools::{Tool, ToolRegistry};

const DEFAULT_MAX_ITERATIONS: u32 = 10;
const DEFAULT_INVOCATION_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_BROADCAST_TOPIC: &str = "beacon_channel";

/// Builder for [`DurableAgent`]
pub struct DurableAgentBuilder {
    name: String,
    role: String,
    goal: String,
    instructions: Vec<String>,
    max_iterations: u32,
    llm: Option<Arc<dyn LlmProvider>>,
    generate: GenerateConfig,
    tools: ToolRegistry,
    state_store: Option<Arc<dyn StateStore>>,
    registry_store: Option<Arc<dyn StateStore>>,
    team: String,
    memory: Option<Arc<dyn ConversationMemory>>,
    bus: Option<(Arc<dyn MessageBus>, PubSubInfo)>,
    orchestration: Option<(OrchestrationMode, u32)>,
    invoker: Option<Arc<dyn AgentInvoker>>,
    invocation_timeout: Duration,
    runtime: Option<WorkflowRuntime>,
    runtime_options: RuntimeOptions,
    max_etag_attempts: u32,
    logger: Option<Arc<Logger>>,
}

impl DurableAgentBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: "Assistant".to_string(),
            goal: String::new(),
            instructions: Vec::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            llm: None,
            generate: GenerateConfig::default(),
            tools: ToolRegistry::new(),
            state_store: None,
            registry_store: None,
            team: "default".to_string(),
            memory: None,
            bus: None,
            orchestration: None,
            invoker: None,
            invocation_timeout: DEFAULT_INVOCATION_TIMEOUT,
            runtime: None,
            runtime_options: RuntimeOptions::default(),
            max_etag_attempts: DEFAULT_MAX_ATTEMPTS,
            logger: None,
        }
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = goal.into();
        self
    }

    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instructions.push(instruction.into());
        self
    }

    pub fn instructions<I, S>(mut self, instructions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.instructions.extend(instructions.into_iter().map(Into::into));
        self
    }

    /// Upper bound on LLM turns of the tool-calling loop
    pub fn max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn generate_config(mut self, config: GenerateConfig) -> Self {
        self.generate = config;
        self
    }

    pub fn tool(self, tool: impl Tool + 'static) -> AgentResult<Self> {
        self.tools.register(tool)?;
        Ok(self)
    }

    /// Use an existing registry; tools registered on it later are visible to the agent
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Store for workflow state and runtime history. Defaults to in-memory.
    pub fn state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    /// Store holding the team registry; without one the agent joins no team
    pub fn registry_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.registry_store = Some(store);
        self
    }

    pub fn team(mut self, team: impl Into<String>) -> Self {
        self.team = team.into();
        self
    }

    pub fn memory(mut self, memory: Arc<dyn ConversationMemory>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn message_bus(mut self, bus: Arc<dyn MessageBus>, topics: PubSubInfo) -> Self {
        self.bus = Some((bus, topics));
        self
    }

    /// Make this agent an orchestrator
    pub fn orchestration(mut self, mode: OrchestrationMode, max_iterations: u32) -> Self {
        self.orchestration = Some((mode, max_iterations));
        self
    }

    pub fn invoker(mut self, invoker: Arc<dyn AgentInvoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    pub fn invocation_timeout(mut self, timeout: Duration) -> Self {
        self.invocation_timeout = timeout;
        self
    }

    /// Host the agent on an existing runtime instead of creating one on start
    pub fn runtime(mut self, runtime: WorkflowRuntime) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Options for the runtime created on start
    pub fn runtime_options(mut self, options: RuntimeOptions) -> Self {
        self.runtime_options = options;
        self
    }

    pub fn max_etag_attempts(mut self, max_attempts: u32) -> Self {
        self.max_etag_attempts = max_attempts;
        self
    }

    pub fn logger(mut self, logger: Arc<Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Validate and assemble the agent.
    ///
    /// Fails when no LLM provider is set, the name is empty, or an
    /// orchestrator has no way to invoke other agents.
    pub fn build(self) -> AgentResult<DurableAgent> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(AgentError::configuration("agent name must not be empty"));
        }
        let llm = self
            .llm
            .ok_or_else(|| AgentError::configuration(format!("agent '{}' needs an LLM provider", name)))?;

        let store = self
            .state_store
            .unwrap_or_else(|| Arc::new(InMemoryStateStore::new()) as Arc<dyn StateStore>);
        let state = AgentStateStore::new(Arc::clone(&store), &name).with_max_attempts(self.max_etag_attempts);
        let registry = self
            .registry_store
            .map(|store| AgentRegistry::new(store, &self.team).with_max_attempts(self.max_etag_attempts));
        let messenger = self
            .bus
            .map(|(bus, topics)| AgentMessenger::new(bus, name.clone(), topics));

        let deps = AgentDeps {
            profile: Arc::new(AgentProfile {
                name: name.clone(),
                role: self.role,
                goal: self.goal,
                instructions: self.instructions,
                max_iterations: self.max_iterations.max(1),
            }),
            llm,
            generate: self.generate,
            tools: self.tools,
            state,
            memory: self
                .memory
                .unwrap_or_else(|| Arc::new(InMemoryConversation::new()) as Arc<dyn ConversationMemory>),
            logger: self.logger,
        };

        let orchestration = match self.orchestration {
            Some((mode, max_iterations)) => {
                let invoker = self.invoker.ok_or_else(|| {
                    AgentError::configuration(format!("orchestrator '{}' needs an agent invoker", name))
                })?;
                Some(OrchestrationSetup {
                    mode,
                    max_iterations: max_iterations.max(1),
                    deps: OrchestrationDeps {
                        agent: deps.clone(),
                        strategy: create_strategy(mode),
                        registry: registry.clone(),
                        invoker,
                        messenger: messenger.clone(),
                        invocation_timeout: self.invocation_timeout,
                    },
                })
            }
            None => None,
        };

        let mut runtime_options = self.runtime_options;
        runtime_options.max_etag_attempts = self.max_etag_attempts;

        Ok(DurableAgent::assemble(
            deps,
            orchestration,
            registry,
            messenger,
            store,
            self.runtime,
            runtime_options,
        ))
    }

    /// Builder populated from configuration and environment.
    ///
    /// `llm` overrides the provider built from the `[llm]` section. Unknown
    /// orchestration modes and unusable state settings are reported here,
    /// before anything runs.
    pub fn from_config(
        loader: &ConfigurationLoader,
        env: &EnvironmentLoader,
        llm: Option<Arc<dyn LlmProvider>>,
    ) -> AgentResult<Self> {
        let mut loader = ConfigurationLoader::from_config(loader.config.clone());
        loader.apply_environment(env);
        let mode = loader
            .orchestration_mode()
            .map_err(|e| AgentError::configuration(e.to_string()))?;
        let config = &loader.config;

        let mut builder = Self::new(config.agent.name.clone())
            .role(config.agent.role.clone())
            .goal(config.agent.goal.clone())
            .instructions(config.agent.instructions.clone())
            .max_iterations(config.agent.max_iterations)
            .team(config.state.team_name.clone())
            .max_etag_attempts(config.state.max_etag_attempts)
            .invocation_timeout(Duration::from_secs(config.invocation.timeout_seconds));

        let (store, registry_store) = state_stores(&config.state, env)?;
        builder = builder.state_store(store).registry_store(registry_store);

        if let Some(llm_config) = &config.llm {
            let mut generate = GenerateConfig::default();
            if let Some(model) = &llm_config.model {
                generate = generate.with_model(model.clone());
            }
            if let Some(temperature) = llm_config.temperature {
                generate = generate.with_temperature(temperature);
            }
            if let Some(max_tokens) = llm_config.max_tokens {
                generate = generate.with_max_tokens(max_tokens);
            }
            builder = builder.generate_config(generate);
        }

        match llm {
            Some(llm) => builder = builder.llm(llm),
            None => builder = default_llm(builder, &loader)?,
        }

        if let (Some(mode), Some(orchestration)) = (mode, &config.orchestration) {
            builder = builder.orchestration(mode, orchestration.max_iterations);
        }

        if let Some(logfile) = &config.logging.log_file {
            let logger = Logger::new(Path::new(logfile), Some(config.logging.log_level.as_str()))
                .map_err(|e| AgentError::configuration(format!("{:#}", e)))?;
            builder = builder.logger(Arc::new(logger));
        }

        Ok(with_dapr_transport(builder, &loader, env))
    }
}

fn state_stores(
    state: &StateConfig,
    env: &EnvironmentLoader,
) -> AgentResult<(Arc<dyn StateStore>, Arc<dyn StateStore>)> {
    match state.backend {
        StateBackend::Memory => {
            let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
            Ok((Arc::clone(&store), store))
        }
        StateBackend::File => {
            let path = state
                .path
                .as_deref()
                .ok_or_else(|| AgentError::configuration("state.path is required for the file backend"))?;
            let store: Arc<dyn StateStore> = Arc::new(FileStateStore::new(path)?);
            Ok((Arc::clone(&store), store))
        }
        #[cfg(feature = "http")]
        StateBackend::Dapr => {
            use crate::state::DaprStateStore;
            let base_url = env.dapr_base_url();
            Ok((
                Arc::new(DaprStateStore::new(base_url.clone(), state.store_name.clone())),
                Arc::new(DaprStateStore::new(base_url, state.registry_store_name.clone())),
            ))
        }
        #[cfg(not(feature = "http"))]
        StateBackend::Dapr => {
            let _ = env;
            Err(AgentError::configuration("the dapr state backend requires the `http` feature"))
        }
    }
}

#[cfg(feature = "http")]
fn default_llm(builder: DurableAgentBuilder, loader: &ConfigurationLoader) -> AgentResult<DurableAgentBuilder> {
    use crate::provider::OpenAiProvider;
    let llm_config = loader.config.llm.clone().unwrap_or_default();
    Ok(builder.llm(Arc::new(OpenAiProvider::from_config(&llm_config))))
}

#[cfg(not(feature = "http"))]
fn default_llm(builder: DurableAgentBuilder, _loader: &ConfigurationLoader) -> AgentResult<DurableAgentBuilder> {
    Ok(builder)
}

/// Dapr pub/sub and service invocation, when the `[pubsub]` section or an orchestrator asks for them
#[cfg(feature = "http")]
fn with_dapr_transport(
    mut builder: DurableAgentBuilder,
    loader: &ConfigurationLoader,
    env: &EnvironmentLoader,
) -> DurableAgentBuilder {
    use super::invoker::DaprServiceInvoker;
    use crate::messaging::DaprPublisher;

    let config = &loader.config;
    if let Some(pubsub) = &config.pubsub {
        let topics = PubSubInfo {
            name: pubsub.name.clone(),
            agent_topic: pubsub.agent_topic.clone().unwrap_or_else(|| builder.name.clone()),
            broadcast_topic: Some(
                pubsub
                    .broadcast_topic
                    .clone()
                    .unwrap_or_else(|| DEFAULT_BROADCAST_TOPIC.to_string()),
            ),
        };
        builder = builder.message_bus(Arc::new(DaprPublisher::new(env.dapr_base_url(), pubsub.name.clone())), topics);
    }
    if builder.orchestration.is_some() && builder.invoker.is_none() {
        builder = builder.invoker(Arc::new(DaprServiceInvoker::new(env.dapr_base_url())));
    }
    builder
}

#[cfg(not(feature = "http"))]
fn with_dapr_transport(
    builder: DurableAgentBuilder,
    _loader: &ConfigurationLoader,
    _env: &EnvironmentLoader,
) -> DurableAgentBuilder {
    let _ = DEFAULT_BROADCAST_TOPIC;
    builder
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::test_support::ScriptedLlm;

    #[test]
    fn test_build_requires_llm() {
        let result = DurableAgentBuilder::new("poet").build();
        assert!(matches!(result, Err(AgentError::Configuration(_))));
    }

    #[test]
    fn test_orchestrator_requires_invoker() {
        let result = DurableAgentBuilder::new("lead")
            .llm(Arc::new(ScriptedLlm::default()))
            .orchestration(OrchestrationMode::RoundRobin, 3)
            .build();
        assert!(matches!(result, Err(AgentError::Configuration(_))));
    }

    #[test]
    fn test_from_config_rejects_unknown_mode() {
        let loader = ConfigurationLoader::from_toml_str(
            r#"
            [agent]
            name = "lead"

            [orchestration]
            mode = "chaos"
            "#,
        )
        .unwrap();

        let result =
            DurableAgentBuilder::from_config(&loader, &EnvironmentLoader::new(None), Some(Arc::new(ScriptedLlm::default())));
        assert!(matches!(result, Err(AgentError::Configuration(_))));
    }

    #[test]
    fn test_from_config_builds_agent() {
        let loader = ConfigurationLoader::from_toml_str(
            r#"
            [agent]
            name = "poet"
            role = "Poet"
            instructions = ["Rhyme"]
            max_iterations = 4
            "#,
        )
        .unwrap();

        let agent = DurableAgentBuilder::from_config(&loader, &EnvironmentLoader::new(None), Some(Arc::new(ScriptedLlm::default())))
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(agent.name(), "poet");
        assert_eq!(agent.profile().max_iterations, 4);
        assert!(!agent.is_orchestrator());
    }
}

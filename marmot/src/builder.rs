//! Agent builder — wires capabilities into an `Agent`.
//!
//! Defaults: Anthropic provider wrapped with retry, an empty tool registry
//! (plus `read_more`), an in-memory session backend, no event store.

use marmot_client::{AnthropicProvider, RetryingProvider};
use marmot_core::agent::{Agent, ToolDispatcher};
use marmot_core::config::AgentCoreConfig;
use marmot_core::error::{AgentError, DuplicateSkillError};
use marmot_core::event_store::EventStore;
use marmot_core::provider::Provider;
use marmot_core::session::SessionBackend;
use marmot_core::skills::{Skill, SkillRegistry};
use marmot_session::MemorySessionBackend;
use marmot_tools::{SubagentTool, ToolRegistry};
use std::sync::{Arc, RwLock};

/// Builder for an [`Agent`].
pub struct AgentBuilder {
    config: AgentCoreConfig,
    provider: Option<Arc<dyn Provider>>,
    registry: Option<Arc<ToolRegistry>>,
    skills: Arc<RwLock<SkillRegistry>>,
    sessions: Option<Arc<dyn SessionBackend>>,
    event_store: Option<Arc<dyn EventStore>>,
    enable_subagents: bool,
}

impl AgentBuilder {
    pub fn new(config: AgentCoreConfig) -> Self {
        Self {
            config,
            provider: None,
            registry: None,
            skills: Arc::new(RwLock::new(SkillRegistry::new())),
            sessions: None,
            event_store: None,
            enable_subagents: false,
        }
    }

    /// Use an explicit provider instead of the default Anthropic client.
    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Use a pre-populated tool registry.
    pub fn tools(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Register a skill.
    pub fn skill(self, skill: Skill) -> Result<Self, DuplicateSkillError> {
        self.skills.write().unwrap().register(skill)?;
        Ok(self)
    }

    /// Share a skill registry (e.g. with other agents).
    pub fn skills(mut self, skills: Arc<RwLock<SkillRegistry>>) -> Self {
        self.skills = skills;
        self
    }

    /// Use a specific session backend; in-memory otherwise.
    pub fn sessions(mut self, sessions: Arc<dyn SessionBackend>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Mirror events into a store for resumable streams.
    pub fn event_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.event_store = Some(store);
        self
    }

    /// Register the built-in `create_subagent` tool.
    pub fn subagents(mut self) -> Self {
        self.enable_subagents = true;
        self
    }

    pub fn build(self) -> Result<Agent, AgentError> {
        let provider: Arc<dyn Provider> = match self.provider {
            Some(provider) => provider,
            None => {
                let inner = AnthropicProvider::new(self.config.provider.clone())?;
                Arc::new(RetryingProvider::new(
                    inner,
                    self.config.provider.retry_policy(),
                ))
            }
        };

        let registry = self.registry.unwrap_or_default();
        let sessions: Arc<dyn SessionBackend> = self
            .sessions
            .unwrap_or_else(|| Arc::new(MemorySessionBackend::new()));

        if self.enable_subagents {
            SubagentTool::register(
                &registry,
                self.config.clone(),
                Arc::clone(&provider),
                Arc::clone(&self.skills),
                // Sub-agents run on scratch sessions, never the caller's
                // backend.
                Arc::new(MemorySessionBackend::new()),
            )
            .map_err(|e| AgentError::Config(e.to_string()))?;
        }

        let tools: Arc<dyn ToolDispatcher> = registry;
        let mut agent =
            Agent::new(self.config, provider, tools, sessions).with_skills(self.skills);
        if let Some(store) = self.event_store {
            agent = agent.with_event_store(store);
        }
        Ok(agent)
    }
}

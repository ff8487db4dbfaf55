use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;

use crate::tools::{Tool, ToolChoice, ToolRegistry};

/// One specialist agent. Built once at startup and shared read-only afterwards.
#[derive(Clone)]
pub struct AgentConfig {
    name: String,
    description: String,
    system_prompt: String,
    tools: ToolRegistry,
    confirmation_required: BTreeSet<String>,
    keywords: Vec<String>,
    tool_choice: ToolChoice,
}

impl AgentConfig {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            system_prompt: system_prompt.into(),
            tools: ToolRegistry::default(),
            confirmation_required: BTreeSet::new(),
            keywords: Vec::new(),
            tool_choice: ToolChoice::Auto,
        }
    }

    pub fn with_tool<T>(mut self, tool: T) -> Self
    where
        T: Tool + 'static,
    {
        self.tools.register(tool);
        self
    }

    /// Registers a tool that only runs after a human approves the call.
    pub fn with_gated_tool<T>(mut self, tool: T) -> Self
    where
        T: Tool + 'static,
    {
        self.confirmation_required.insert(tool.name().to_string());
        self.tools.register(tool);
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords.extend(keywords.into_iter().map(Into::into));
        self
    }

    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = tool_choice;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn tool_choice(&self) -> ToolChoice {
        self.tool_choice
    }

    pub fn requires_confirmation(&self, tool_name: &str) -> bool {
        self.confirmation_required.contains(tool_name)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("at least one agent must be registered")]
    Empty,
    #[error("agent `{0}` is registered more than once")]
    DuplicateAgent(String),
    #[error("fallback agent `{0}` is not registered")]
    UnknownFallback(String),
}

/// Registration-ordered agent set with a designated fallback.
#[derive(Clone)]
pub struct AgentRegistry {
    agents: Vec<Arc<AgentConfig>>,
    fallback: usize,
}

impl AgentRegistry {
    /// The first agent is the fallback until [`AgentRegistry::with_fallback`] says otherwise.
    pub fn new(agents: Vec<AgentConfig>) -> Result<Self, RegistryError> {
        if agents.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut seen = BTreeSet::new();
        for agent in &agents {
            if !seen.insert(agent.name.clone()) {
                return Err(RegistryError::DuplicateAgent(agent.name.clone()));
            }
        }

        Ok(Self { agents: agents.into_iter().map(Arc::new).collect(), fallback: 0 })
    }

    pub fn with_fallback(mut self, name: &str) -> Result<Self, RegistryError> {
        self.fallback = self
            .agents
            .iter()
            .position(|agent| agent.name == name)
            .ok_or_else(|| RegistryError::UnknownFallback(name.to_string()))?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<AgentConfig>> {
        self.agents.iter().find(|agent| agent.name == name)
    }

    pub fn fallback(&self) -> &Arc<AgentConfig> {
        &self.agents[self.fallback]
    }

    pub fn agents(&self) -> &[Arc<AgentConfig>] {
        &self.agents
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

//! Agent configuration and registry
//!
//! An agent is identified by a unique id and carries a role, a goal and an
//! ordered list of tool names. The registry is the roster the engine
//! schedules from.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::workflow::WorkflowError;

/// Configuration for a single agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Unique identifier for this agent
    pub id: String,

    /// Descriptive role label (e.g., "Researcher")
    pub role: String,

    /// What this agent is trying to achieve
    pub goal: String,

    /// Tool names, invoked in order
    #[serde(default)]
    pub tools: Vec<String>,
}

impl AgentConfig {
    /// Create a new agent configuration
    pub fn new(id: impl Into<String>, role: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            goal: goal.into(),
            tools: Vec::new(),
        }
    }

    /// Set the tools this agent invokes
    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }
}

/// Registry of available agents, one instance per id
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<String, AgentConfig>,
}

impl AgentRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry, rejecting duplicate ids
    pub fn from_configs(configs: impl IntoIterator<Item = AgentConfig>) -> Result<Self, WorkflowError> {
        let mut registry = Self::new();
        for config in configs {
            registry.register(config)?;
        }
        Ok(registry)
    }

    /// Register a new agent
    pub fn register(&mut self, config: AgentConfig) -> Result<(), WorkflowError> {
        if self.agents.contains_key(&config.id) {
            return Err(WorkflowError::DuplicateAgent(config.id));
        }
        self.agents.insert(config.id.clone(), config);
        Ok(())
    }

    /// Get an agent by id
    pub fn get(&self, id: &str) -> Option<&AgentConfig> {
        self.agents.get(id)
    }

    /// Check if an agent exists
    pub fn contains(&self, id: &str) -> bool {
        self.agents.contains_key(id)
    }

    /// List all agent ids
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.agents.keys().map(|s| s.as_str())
    }

    /// Iterate over all agents, sorted by id
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AgentConfig)> {
        self.agents.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

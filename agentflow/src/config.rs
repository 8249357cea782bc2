//! Workflow configuration loading
//!
//! A workflow document defines the agent roster and the topology:
//!
//! ```yaml
//! agents:
//!   - id: researcher
//!     role: Researcher
//!     goal: Collect sources
//!     tools: [web]
//!   - id: writer
//!     role: Writer
//!     goal: Draft the report
//! workflow:
//!   type: sequential
//!   steps:
//!     - agent: researcher
//!     - agent: writer
//! ```
//!
//! Documents are validated eagerly so that nothing executes against a broken
//! roster or an unsupported topology.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::agent_config::{AgentConfig, AgentRegistry};
use crate::workflow::{Step, Workflow, WorkflowError};

/// A validated roster and topology, ready for the engine
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub registry: AgentRegistry,
    pub workflow: Workflow,
}

/// Document as written, before validation
#[derive(Debug, Default, Deserialize)]
struct RawDocument {
    agents: Option<Vec<RawAgent>>,
    workflow: Option<RawWorkflow>,
}

#[derive(Debug, Deserialize)]
struct RawAgent {
    id: Option<String>,
    role: Option<String>,
    goal: Option<String>,
    #[serde(default)]
    tools: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawWorkflow {
    #[serde(rename = "type")]
    kind: Option<String>,
    steps: Option<Vec<RawStep>>,
    branches: Option<Vec<String>>,
    then: Option<RawStep>,
}

#[derive(Debug, Deserialize)]
struct RawStep {
    agent: Option<String>,
}

impl WorkflowConfig {
    /// Load a document from disk. `.toml` files are parsed as TOML, anything
    /// else as YAML.
    pub fn from_path(path: &Path) -> Result<Self, WorkflowError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| WorkflowError::IoError(format!("{}: {}", path.display(), e)))?;

        tracing::debug!(path = %path.display(), "Loading workflow config");

        if path.extension().is_some_and(|ext| ext == "toml") {
            Self::from_toml_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self, WorkflowError> {
        if yaml.trim().is_empty() {
            return validate(RawDocument::default());
        }
        let raw: Option<RawDocument> =
            serde_yaml::from_str(yaml).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
        validate(raw.unwrap_or_default())
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(toml_str: &str) -> Result<Self, WorkflowError> {
        let raw: RawDocument =
            toml::from_str(toml_str).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
        validate(raw)
    }
}

fn validate(raw: RawDocument) -> Result<WorkflowConfig, WorkflowError> {
    let agents = raw
        .agents
        .ok_or_else(|| WorkflowError::MissingField("agents".to_string()))?;
    let workflow = raw
        .workflow
        .ok_or_else(|| WorkflowError::MissingField("workflow".to_string()))?;

    let registry = build_registry(agents)?;
    let workflow = build_workflow(workflow, &registry)?;

    tracing::debug!(
        agents = registry.len(),
        kind = %workflow.kind(),
        "Workflow config validated"
    );

    Ok(WorkflowConfig { registry, workflow })
}

fn build_registry(agents: Vec<RawAgent>) -> Result<AgentRegistry, WorkflowError> {
    let mut registry = AgentRegistry::new();

    for (index, agent) in agents.into_iter().enumerate() {
        let field = |name: &str| WorkflowError::MissingField(format!("agents[{}].{}", index, name));

        let id = agent.id.ok_or_else(|| field("id"))?;
        let role = agent.role.ok_or_else(|| field("role"))?;
        let goal = agent.goal.ok_or_else(|| field("goal"))?;

        registry.register(AgentConfig::new(id, role, goal).with_tools(agent.tools.unwrap_or_default()))?;
    }

    Ok(registry)
}

fn build_workflow(raw: RawWorkflow, registry: &AgentRegistry) -> Result<Workflow, WorkflowError> {
    let kind = raw
        .kind
        .ok_or_else(|| WorkflowError::UnsupportedWorkflow("<missing>".to_string()))?;

    match kind.as_str() {
        "sequential" => {
            let steps = raw
                .steps
                .ok_or_else(|| WorkflowError::MissingField("workflow.steps".to_string()))?;

            let steps = steps
                .into_iter()
                .enumerate()
                .map(|(index, step)| -> Result<Step, WorkflowError> {
                    let agent = step.agent.ok_or_else(|| {
                        WorkflowError::MissingField(format!("workflow.steps[{}].agent", index))
                    })?;
                    require_agent(registry, "steps", &agent)?;
                    Ok(Step::new(agent))
                })
                .collect::<Result<Vec<_>, _>>()?;

            Ok(Workflow::Sequential { steps })
        }
        "parallel" => {
            let branches = raw
                .branches
                .ok_or_else(|| WorkflowError::MissingField("workflow.branches".to_string()))?;

            let mut seen = HashSet::new();
            for agent in &branches {
                require_agent(registry, "branches", agent)?;
                if !seen.insert(agent.as_str()) {
                    return Err(WorkflowError::DuplicateBranch(agent.clone()));
                }
            }

            let then = match raw.then {
                Some(step) => {
                    let agent = step.agent.ok_or_else(|| {
                        WorkflowError::MissingField("workflow.then.agent".to_string())
                    })?;
                    require_agent(registry, "then", &agent)?;
                    Some(Step::new(agent))
                }
                None => None,
            };

            Ok(Workflow::Parallel { branches, then })
        }
        other => Err(WorkflowError::UnsupportedWorkflow(other.to_string())),
    }
}

fn require_agent(registry: &AgentRegistry, location: &str, agent: &str) -> Result<(), WorkflowError> {
    if registry.contains(agent) {
        Ok(())
    } else {
        Err(WorkflowError::UnknownAgent {
            location: location.to_string(),
            agent: agent.to_string(),
        })
    }
}

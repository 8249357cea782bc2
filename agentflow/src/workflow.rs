//! Workflow definitions and primitives
//!
//! A workflow is one of two topologies:
//! - Sequential: agents run strictly one after another
//! - Parallel: branch agents fan out over the same context snapshot,
//!   optionally followed by a single aggregation agent

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::context::Context;

/// A single scheduled agent invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Id of the agent to run (must exist in the roster)
    pub agent: String,
}

impl Step {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
        }
    }
}

/// Workflow topology
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Workflow {
    /// Run steps in order; each step sees every prior step's output
    Sequential { steps: Vec<Step> },

    /// Run branches concurrently, then an optional aggregation step
    Parallel {
        branches: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        then: Option<Step>,
    },
}

impl Workflow {
    /// Create a sequential workflow from agent ids
    pub fn sequential<I, S>(agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Sequential {
            steps: agents.into_iter().map(Step::new).collect(),
        }
    }

    /// Create a parallel workflow from branch ids and an optional aggregator
    pub fn parallel<I, S>(branches: I, then: Option<&str>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Parallel {
            branches: branches.into_iter().map(Into::into).collect(),
            then: then.map(Step::new),
        }
    }

    pub fn kind(&self) -> WorkflowKind {
        match self {
            Self::Sequential { .. } => WorkflowKind::Sequential,
            Self::Parallel { .. } => WorkflowKind::Parallel,
        }
    }

    /// Every referenced agent id, in schedule order
    pub fn agent_ids(&self) -> Vec<&str> {
        match self {
            Self::Sequential { steps } => steps.iter().map(|s| s.agent.as_str()).collect(),
            Self::Parallel { branches, then } => branches
                .iter()
                .map(String::as_str)
                .chain(then.iter().map(|s| s.agent.as_str()))
                .collect(),
        }
    }
}

/// Topology tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Sequential,
    Parallel,
}

impl WorkflowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where in the topology a step ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPhase {
    /// A sequential step
    Step,
    /// A parallel branch
    Branch,
    /// The aggregation step after the branches joined
    Aggregate,
}

/// Result of executing a single agent
#[derive(Debug, Clone)]
pub struct StepResult {
    /// The agent that was executed
    pub agent: String,

    pub phase: StepPhase,

    /// Output written into the context
    pub output: String,

    /// Duration of execution
    pub duration_ms: u64,
}

/// Result of executing a complete workflow
#[derive(Debug, Clone)]
pub struct WorkflowResult {
    pub kind: WorkflowKind,

    /// Results in the order the engine merged them
    pub step_results: Vec<StepResult>,

    /// Context after the run, including entries carried over from earlier runs
    pub context: Context,
}

/// Errors that can occur with workflows
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Duplicate agent id found: {0}")]
    DuplicateAgent(String),

    #[error("Duplicate branch in parallel workflow: {0}")]
    DuplicateBranch(String),

    #[error("Unknown agent in {location}: {agent}")]
    UnknownAgent { location: String, agent: String },

    #[error("Unsupported workflow type: {0} (expected 'sequential' or 'parallel')")]
    UnsupportedWorkflow(String),

    #[error("Agent '{agent}' failed: {message}")]
    AgentFailed { agent: String, message: String },

    #[error("Agent '{agent}' timed out after {timeout_ms}ms")]
    Timeout { agent: String, timeout_ms: u64 },

    #[error("Branch task for agent '{agent}' panicked")]
    BranchPanicked { agent: String },

    #[error("Context persistence failed: {0}")]
    Persistence(String),

    #[error("{source} (completed steps not persisted: {reason})")]
    NotPersisted {
        #[source]
        source: Box<WorkflowError>,
        reason: String,
    },
}

impl WorkflowError {
    /// Configuration errors are raised before any agent executes
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::IoError(_)
                | Self::ParseError(_)
                | Self::MissingField(_)
                | Self::DuplicateAgent(_)
                | Self::DuplicateBranch(_)
                | Self::UnknownAgent { .. }
                | Self::UnsupportedWorkflow(_)
        )
    }

    /// The agent a runtime failure is attributed to
    pub fn agent(&self) -> Option<&str> {
        match self {
            Self::AgentFailed { agent, .. }
            | Self::Timeout { agent, .. }
            | Self::BranchPanicked { agent } => Some(agent),
            Self::NotPersisted { source, .. } => source.agent(),
            _ => None,
        }
    }
}

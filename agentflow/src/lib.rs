//! Declarative multi-agent workflow engine
//!
//! This crate provides:
//! - Agent roster and workflow topology loading (YAML or TOML)
//! - Sequential and parallel (fan-out / aggregate) workflow execution
//! - A shared context persisted between runs
//! - A pluggable executor seam and a tool registry
//!
//! # Example
//!
//! ```rust,ignore
//! use agentflow::{EngineConfig, JsonFileStore, WorkflowConfig, WorkflowEngine};
//!
//! let config = WorkflowConfig::from_path("workflow.yaml".as_ref())?;
//! let mut engine = WorkflowEngine::new(
//!     config.registry,
//!     config.workflow,
//!     JsonFileStore::new("memory.json"),
//!     EngineConfig::default(),
//! )?;
//!
//! let result = engine.run().await?;
//! ```

pub mod agent_config;
pub mod config;
pub mod context;
pub mod engine;
pub mod executor;
pub mod settings;
pub mod tools;
pub mod workflow;

pub use agent_config::{AgentConfig, AgentRegistry};
pub use config::WorkflowConfig;
pub use context::{Context, ContextStore, JsonFileStore, MemoryStore};
pub use engine::{EngineConfig, EngineState, FailurePolicy, WorkflowEngine};
pub use executor::{AgentExecutor, StubAgent};
pub use settings::Settings;
pub use tools::{Tool, ToolRegistry};
pub use workflow::{Step, StepPhase, StepResult, Workflow, WorkflowError, WorkflowKind, WorkflowResult};

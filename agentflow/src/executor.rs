//! Agent execution
//!
//! The engine only sees [`AgentExecutor`]. [`StubAgent`] renders a summary of
//! what it received and which tools it called; a real backend can replace it
//! per agent via `WorkflowEngine::with_executor`.

use std::fmt::Write;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::agent_config::AgentConfig;
use crate::context::Context;
use crate::tools::ToolRegistry;

/// Marker appended to every stub output
pub const COMPLETION_MARKER: &str = "Result: Task completed successfully.";

/// Runs one agent against the current context
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Id the output is stored under
    fn id(&self) -> &str;

    /// Produce this agent's output. Must not mutate shared state.
    async fn run(&self, context: &Context) -> Result<String>;
}

/// Stand-in executor that formats its inputs instead of doing real work
#[derive(Debug, Clone)]
pub struct StubAgent {
    config: AgentConfig,
    tools: Arc<ToolRegistry>,
}

impl StubAgent {
    pub fn new(config: AgentConfig, tools: Arc<ToolRegistry>) -> Self {
        Self { config, tools }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn tool_results(&self) -> Vec<String> {
        self.config
            .tools
            .iter()
            .map(|name| self.tools.invoke(name))
            .collect()
    }

    fn render(&self, context: &Context) -> String {
        let mut output = String::new();

        // Writing to a String cannot fail
        let _ = writeln!(output, "[{} | {}]", self.config.role, self.config.id);
        let _ = writeln!(output, "Goal: {}", self.config.goal);

        if !context.is_empty() {
            output.push_str("Context received:\n");
            for (agent, value) in context {
                let _ = writeln!(output, "- From {}: {}", agent, value);
            }
        }

        if !self.config.tools.is_empty() {
            output.push_str("Tools used:\n");
            for result in self.tool_results() {
                let _ = writeln!(output, "- {}", result);
            }
        }

        output.push_str(COMPLETION_MARKER);
        output
    }
}

#[async_trait]
impl AgentExecutor for StubAgent {
    fn id(&self) -> &str {
        &self.config.id
    }

    async fn run(&self, context: &Context) -> Result<String> {
        tracing::debug!(
            agent = %self.config.id,
            context_entries = context.len(),
            tools = self.config.tools.len(),
            "Running stub agent"
        );
        Ok(self.render(context))
    }
}

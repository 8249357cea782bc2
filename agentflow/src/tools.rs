//! Tool registry
//!
//! Tools are resolved by name. Names with no registered tool resolve to
//! [`UnknownTool`], which reports the name instead of failing.

use std::collections::HashMap;
use std::sync::Arc;

/// A named capability an agent can invoke
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Invoke the tool and describe the outcome
    fn invoke(&self) -> String;
}

/// Runs Python code
pub struct PythonTool;

impl Tool for PythonTool {
    fn name(&self) -> &str {
        "python"
    }

    fn invoke(&self) -> String {
        "Python tool executed successfully".to_string()
    }
}

/// Performs a web lookup
pub struct WebTool;

impl Tool for WebTool {
    fn name(&self) -> &str {
        "web"
    }

    fn invoke(&self) -> String {
        "Web tool invoked".to_string()
    }
}

/// Fallback for names with no registered tool
pub struct UnknownTool {
    name: String,
}

impl UnknownTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Tool for UnknownTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self) -> String {
        format!("Unknown tool: {}", self.name)
    }
}

/// Maps tool names to implementations
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in `python` and `web` tools
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PythonTool));
        registry.register(Arc::new(WebTool));
        registry
    }

    /// Register a tool, replacing any tool with the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Resolve a tool by name, falling back to [`UnknownTool`]
    pub fn resolve(&self, name: &str) -> Arc<dyn Tool> {
        match self.tools.get(name) {
            Some(tool) => Arc::clone(tool),
            None => {
                tracing::debug!(tool = name, "No registered tool, using unknown-tool fallback");
                Arc::new(UnknownTool::new(name))
            }
        }
    }

    /// Resolve and invoke a tool by name
    pub fn invoke(&self, name: &str) -> String {
        self.resolve(name).invoke()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

//! Settings loading (.agentflow.toml)

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

use crate::context::DEFAULT_CONTEXT_FILE;
use crate::engine::{EngineConfig, FailurePolicy};

/// Settings file name
pub const SETTINGS_FILE: &str = ".agentflow.toml";

/// Find a settings file by walking up the directory tree, then checking global config.
///
/// Search order:
/// 1. Current directory and parent directories (walking up to root)
/// 2. Global config at ~/.config/agentflow/
fn find_settings_file(filename: &str) -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let candidate = current.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_path = config_dir.join("agentflow").join(filename);
        if global_path.exists() {
            return Some(global_path);
        }
    }

    None
}

/// Top-level settings (from .agentflow.toml)
#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub engine: EngineSection,
}

/// Engine section
#[derive(Debug, Deserialize)]
pub struct EngineSection {
    /// Where the shared context is persisted
    #[serde(default = "default_context_file")]
    pub context_file: PathBuf,

    /// Per-agent timeout in seconds
    #[serde(default)]
    pub step_timeout_secs: Option<u64>,

    /// Maximum parallel branches running at once
    #[serde(default)]
    pub max_concurrency: Option<usize>,

    /// Save completed steps when an agent fails
    #[serde(default)]
    pub persist_on_failure: bool,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            context_file: default_context_file(),
            step_timeout_secs: None,
            max_concurrency: None,
            persist_on_failure: false,
        }
    }
}

fn default_context_file() -> PathBuf {
    PathBuf::from(DEFAULT_CONTEXT_FILE)
}

impl Settings {
    /// Load settings from .agentflow.toml, falling back to defaults
    pub fn load() -> Result<Self> {
        if let Some(path) = find_settings_file(SETTINGS_FILE) {
            tracing::debug!("Loading settings from: {}", path.display());
            return Self::load_from_path(&path);
        }

        tracing::debug!("No {} found, using defaults", SETTINGS_FILE);
        Ok(Self::default())
    }

    /// Load from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Engine configuration described by these settings
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            step_timeout: self.engine.step_timeout_secs.map(Duration::from_secs),
            max_concurrency: self.engine.max_concurrency,
            failure_policy: if self.engine.persist_on_failure {
                FailurePolicy::PersistCompleted
            } else {
                FailurePolicy::Discard
            },
        }
    }
}

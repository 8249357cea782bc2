//! Shared context and its persistence
//!
//! The context maps agent ids to their latest output. It is loaded when the
//! engine is built and written back once after a run.

use std::collections::BTreeMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::workflow::WorkflowError;

/// Agent id -> output. Sorted so rendering and persistence are deterministic.
pub type Context = BTreeMap<String, String>;

/// Default file name for the persisted context
pub const DEFAULT_CONTEXT_FILE: &str = "memory.json";

/// Durable storage for the shared context
pub trait ContextStore: Send + Sync {
    /// Load the persisted context; no prior state yields an empty context
    fn load(&self) -> Result<Context, WorkflowError>;

    /// Overwrite the persisted context
    fn save(&self, context: &Context) -> Result<(), WorkflowError>;
}

/// Context persisted as a pretty-printed JSON object
///
/// Saves go through a sibling temp file and a rename, so readers see either
/// the old or the new file. Separate processes sharing one file are not
/// coordinated; the last rename wins.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the persisted file. A missing file is not an error.
    pub fn clear(&self) -> Result<(), WorkflowError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(persistence_error(&self.path, e)),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_CONTEXT_FILE.to_string());
        self.path
            .with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()))
    }
}

impl ContextStore for JsonFileStore {
    fn load(&self) -> Result<Context, WorkflowError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No persisted context, starting empty");
                return Ok(Context::new());
            }
            Err(e) => return Err(persistence_error(&self.path, e)),
        };

        let context: Context = serde_json::from_str(&content).map_err(|e| {
            WorkflowError::Persistence(format!("{}: invalid context file: {}", self.path.display(), e))
        })?;

        tracing::debug!(path = %self.path.display(), entries = context.len(), "Loaded persisted context");
        Ok(context)
    }

    fn save(&self, context: &Context) -> Result<(), WorkflowError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| persistence_error(parent, e))?;
        }

        let mut json = serde_json::to_string_pretty(context)
            .map_err(|e| WorkflowError::Persistence(e.to_string()))?;
        json.push('\n');

        let temp = self.temp_path();
        let write = || -> std::io::Result<()> {
            let mut file = std::fs::File::create(&temp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
            std::fs::rename(&temp, &self.path)
        };

        if let Err(e) = write() {
            let _ = std::fs::remove_file(&temp);
            return Err(persistence_error(&self.path, e));
        }

        tracing::debug!(path = %self.path.display(), entries = context.len(), "Saved context");
        Ok(())
    }
}

fn persistence_error(path: &Path, e: std::io::Error) -> WorkflowError {
    WorkflowError::Persistence(format!("{}: {}", path.display(), e))
}

/// In-process store, for tests and runs that should not touch disk
#[derive(Debug, Default)]
pub struct MemoryStore {
    context: Mutex<Context>,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a previously persisted context
    pub fn with_context(context: Context) -> Self {
        Self {
            context: Mutex::new(context),
            saves: AtomicUsize::new(0),
        }
    }

    /// Number of completed saves
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Currently stored context
    pub fn snapshot(&self) -> Context {
        self.context
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl ContextStore for MemoryStore {
    fn load(&self) -> Result<Context, WorkflowError> {
        Ok(self.snapshot())
    }

    fn save(&self, context: &Context) -> Result<(), WorkflowError> {
        *self
            .context
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = context.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl<S: ContextStore + ?Sized> ContextStore for std::sync::Arc<S> {
    fn load(&self) -> Result<Context, WorkflowError> {
        (**self).load()
    }

    fn save(&self, context: &Context) -> Result<(), WorkflowError> {
        (**self).save(context)
    }
}

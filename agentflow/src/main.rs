//! agentflow CLI
//!
//! Usage:
//!   agentflow run workflow.yaml
//!   agentflow run workflow.yaml --fresh --timeout 30
//!   agentflow validate workflow.yaml
//!   agentflow context show
//!   agentflow context clear

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agentflow::{
    Context, ContextStore, EngineConfig, FailurePolicy, JsonFileStore, MemoryStore, Settings,
    Workflow, WorkflowConfig, WorkflowEngine, WorkflowError,
};

#[derive(Parser)]
#[command(name = "agentflow")]
#[command(about = "Run declarative multi-agent workflows over a shared context")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase verbosity (-v info, -vv debug, -vvv trace). Default is warn.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow
    Run {
        /// Workflow document (.yaml/.yml, or .toml)
        config: PathBuf,

        /// Persisted context file (overrides .agentflow.toml)
        #[arg(long, env = "AGENTFLOW_CONTEXT_FILE")]
        context_file: Option<PathBuf>,

        /// Start from an empty context instead of the persisted one
        #[arg(long)]
        fresh: bool,

        /// Do not write the context file after the run
        #[arg(long)]
        no_persist: bool,

        /// Per-agent timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Maximum parallel branches running at once
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Save completed steps even if a later agent fails
        #[arg(long)]
        persist_on_failure: bool,
    },
    /// Validate a workflow document and show its topology
    Validate {
        /// Workflow document
        config: PathBuf,
    },
    /// Inspect or reset the persisted context
    Context {
        #[command(subcommand)]
        command: ContextCommands,

        /// Persisted context file (overrides .agentflow.toml)
        #[arg(long, env = "AGENTFLOW_CONTEXT_FILE", global = true)]
        context_file: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ContextCommands {
    /// Print every persisted entry
    Show,
    /// Delete the persisted context
    Clear,
}

/// Initialize tracing with the given verbosity level
///
/// - 0: warn (default)
/// - 1: info (-v)
/// - 2: debug (-vv)
/// - 3+: trace (-vvv)
///
/// Logs go to stderr; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    // Allow RUST_LOG to override if set
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);

    if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Loads nothing, saves through to the wrapped store
struct FreshStart<S>(S);

impl<S: ContextStore> ContextStore for FreshStart<S> {
    fn load(&self) -> Result<Context, WorkflowError> {
        Ok(Context::new())
    }

    fn save(&self, context: &Context) -> Result<(), WorkflowError> {
        self.0.save(context)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            config,
            context_file,
            fresh,
            no_persist,
            timeout,
            max_concurrency,
            persist_on_failure,
        } => {
            let settings = Settings::load()?;
            let mut engine_config = settings.engine_config();
            if let Some(secs) = timeout {
                engine_config.step_timeout = Some(Duration::from_secs(secs));
            }
            if let Some(limit) = max_concurrency {
                engine_config.max_concurrency = Some(limit);
            }
            if persist_on_failure {
                engine_config.failure_policy = FailurePolicy::PersistCompleted;
            }

            let context_file = context_file.unwrap_or_else(|| settings.engine.context_file.clone());
            let options = RunOptions {
                context_file,
                fresh,
                no_persist,
            };
            run_workflow(&config, options, engine_config).await
        }
        Commands::Validate { config } => validate_workflow(&config),
        Commands::Context {
            command,
            context_file,
        } => {
            let settings = Settings::load()?;
            let store = JsonFileStore::new(
                context_file.unwrap_or_else(|| settings.engine.context_file.clone()),
            );
            run_context_command(command, &store)
        }
    }
}

struct RunOptions {
    context_file: PathBuf,
    fresh: bool,
    no_persist: bool,
}

async fn run_workflow(config_path: &Path, options: RunOptions, engine_config: EngineConfig) -> Result<()> {
    let config = WorkflowConfig::from_path(config_path)
        .with_context(|| format!("Invalid workflow config: {}", config_path.display()))?;

    println!("Loaded config: {}", config_path.display());

    let file_store = JsonFileStore::new(&options.context_file);
    let mut engine = match (options.no_persist, options.fresh) {
        (true, true) => WorkflowEngine::new(config.registry, config.workflow, MemoryStore::new(), engine_config)?,
        (true, false) => WorkflowEngine::new(
            config.registry,
            config.workflow,
            MemoryStore::with_context(file_store.load()?),
            engine_config,
        )?,
        (false, true) => WorkflowEngine::new(config.registry, config.workflow, FreshStart(file_store), engine_config)?,
        (false, false) => WorkflowEngine::new(config.registry, config.workflow, file_store, engine_config)?,
    };

    let result = engine.run().await;

    if let Err(WorkflowError::Persistence(_)) = &result {
        // The run itself finished; show what it produced before failing
        print_context(engine.context());
    }
    let result = result?;

    let total_duration: u64 = result.step_results.iter().map(|s| s.duration_ms).sum();
    println!(
        "Workflow ({}) completed: {} agent runs in {}ms",
        result.kind,
        result.step_results.len(),
        total_duration
    );
    print_context(&result.context);

    Ok(())
}

fn print_context(context: &Context) {
    println!("\nFinal Shared Context:\n");
    for (agent_id, output) in context {
        println!("--- {} ---", agent_id);
        println!("{}", output);
        println!();
    }
}

fn validate_workflow(config_path: &Path) -> Result<()> {
    let config = WorkflowConfig::from_path(config_path)
        .with_context(|| format!("Invalid workflow config: {}", config_path.display()))?;

    println!("Config OK: {}\n", config_path.display());

    println!("Agents:");
    for (id, agent) in config.registry.iter() {
        println!("  {} ({}) - {}", id, agent.role, agent.goal);
        if !agent.tools.is_empty() {
            println!("    Tools: {}", agent.tools.join(", "));
        }
    }

    println!("\nWorkflow: {}", config.workflow.kind());
    match &config.workflow {
        Workflow::Sequential { steps } => {
            for (i, step) in steps.iter().enumerate() {
                println!("  {}. {}", i + 1, step.agent);
            }
        }
        Workflow::Parallel { branches, then } => {
            println!("  Branches: {}", branches.join(", "));
            if let Some(step) = then {
                println!("  Then: {}", step.agent);
            }
        }
    }

    Ok(())
}

fn run_context_command(command: ContextCommands, store: &JsonFileStore) -> Result<()> {
    match command {
        ContextCommands::Show => {
            let context = store.load()?;
            if context.is_empty() {
                println!("No persisted context at {}", store.path().display());
            } else {
                print_context(&context);
            }
        }
        ContextCommands::Clear => {
            store.clear()?;
            println!("Cleared {}", store.path().display());
        }
    }

    Ok(())
}

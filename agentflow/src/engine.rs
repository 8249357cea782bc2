//! Workflow execution engine
//!
//! Executes a workflow over the agent roster with:
//! - Sequential steps, each seeing every earlier step's output
//! - Parallel branches over one shared snapshot, joined before aggregation
//! - A single context owner: executors return output, the engine writes it
//! - One save of the context after a successful run

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::agent_config::AgentRegistry;
use crate::context::{Context, ContextStore};
use crate::executor::{AgentExecutor, StubAgent};
use crate::tools::ToolRegistry;
use crate::workflow::{Step, StepPhase, StepResult, Workflow, WorkflowError, WorkflowResult};

/// What happens to completed work when an agent fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Abort without saving; the persisted context stays as it was
    #[default]
    Discard,
    /// Save the entries completed before the failure, then propagate it
    PersistCompleted,
}

/// Configuration for the workflow engine
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Limit for each executor invocation
    pub step_timeout: Option<Duration>,

    /// Maximum branches running at once (unbounded when unset)
    pub max_concurrency: Option<usize>,

    pub failure_policy: FailurePolicy,
}

impl EngineConfig {
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }

    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }
}

/// Where the engine is in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    /// Sequential mode, executing the step at this index
    Running { step_index: usize },
    BranchesRunning,
    Aggregating,
    Done,
    Failed,
}

/// Workflow execution engine
pub struct WorkflowEngine {
    /// Agent roster
    registry: AgentRegistry,

    workflow: Workflow,

    /// Engine configuration
    config: EngineConfig,

    store: Box<dyn ContextStore>,

    /// Executor per agent id
    executors: HashMap<String, Arc<dyn AgentExecutor>>,

    /// Shared context, written only by the engine
    context: Context,

    state: EngineState,
}

impl WorkflowEngine {
    /// Create an engine and load the persisted context
    ///
    /// Every roster entry gets a [`StubAgent`] backed by the built-in tools.
    pub fn new(
        registry: AgentRegistry,
        workflow: Workflow,
        store: impl ContextStore + 'static,
        config: EngineConfig,
    ) -> Result<Self, WorkflowError> {
        let context = store.load()?;
        tracing::debug!(entries = context.len(), "Loaded shared context");

        let mut engine = Self {
            registry,
            workflow,
            config,
            store: Box::new(store),
            executors: HashMap::new(),
            context,
            state: EngineState::Idle,
        };
        engine.install_stubs(Arc::new(ToolRegistry::with_builtins()));

        Ok(engine)
    }

    /// Rebuild the stub executors with a different tool registry
    ///
    /// Replaces every executor, so call this before [`Self::with_executor`].
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.install_stubs(Arc::new(tools));
        self
    }

    /// Substitute the executor for one agent
    pub fn with_executor(mut self, executor: Arc<dyn AgentExecutor>) -> Self {
        self.executors.insert(executor.id().to_string(), executor);
        self
    }

    fn install_stubs(&mut self, tools: Arc<ToolRegistry>) {
        self.executors = self
            .registry
            .iter()
            .map(|(id, config)| {
                let executor: Arc<dyn AgentExecutor> =
                    Arc::new(StubAgent::new(config.clone(), Arc::clone(&tools)));
                (id.to_string(), executor)
            })
            .collect();
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Execute the workflow and persist the resulting context
    ///
    /// On a persistence failure the error is returned but the in-memory
    /// context stays available through [`Self::context`].
    pub async fn run(&mut self) -> Result<WorkflowResult, WorkflowError> {
        self.preflight()?;

        let kind = self.workflow.kind();
        let started = Instant::now();
        tracing::info!(
            kind = %kind,
            agents = self.workflow.agent_ids().len(),
            "Starting workflow"
        );

        let outcome = match self.workflow.clone() {
            Workflow::Sequential { steps } => self.run_sequential(&steps).await,
            Workflow::Parallel { branches, then } => {
                self.run_parallel(&branches, then.as_ref()).await
            }
        };

        let step_results = match outcome {
            Ok(step_results) => step_results,
            Err(e) => {
                self.transition(EngineState::Failed);
                tracing::error!(kind = %kind, error = %e, "Workflow failed");
                return Err(self.persist_after_failure(e));
            }
        };

        self.transition(EngineState::Done);
        self.store.save(&self.context)?;

        tracing::info!(
            kind = %kind,
            steps = step_results.len(),
            duration_ms = elapsed_ms(started),
            "Workflow completed"
        );

        Ok(WorkflowResult {
            kind,
            step_results,
            context: self.context.clone(),
        })
    }

    /// Reject references with no executor before anything runs
    fn preflight(&self) -> Result<(), WorkflowError> {
        for agent in self.workflow.agent_ids() {
            if !self.executors.contains_key(agent) {
                return Err(WorkflowError::UnknownAgent {
                    location: "workflow".to_string(),
                    agent: agent.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn run_sequential(&mut self, steps: &[Step]) -> Result<Vec<StepResult>, WorkflowError> {
        let mut step_results = Vec::with_capacity(steps.len());

        for (step_index, step) in steps.iter().enumerate() {
            self.transition(EngineState::Running { step_index });
            tracing::info!(
                agent = %step.agent,
                step = step_index + 1,
                total = steps.len(),
                "Running agent"
            );

            let result = self.run_single(step, StepPhase::Step).await?;
            step_results.push(result);
        }

        Ok(step_results)
    }

    async fn run_parallel(
        &mut self,
        branches: &[String],
        then: Option<&Step>,
    ) -> Result<Vec<StepResult>, WorkflowError> {
        self.transition(EngineState::BranchesRunning);

        let snapshot = Arc::new(self.context.clone());
        let limiter = self
            .config
            .max_concurrency
            .map(|limit| Arc::new(Semaphore::new(limit.clamp(1, Semaphore::MAX_PERMITS))));
        let timeout = self.config.step_timeout;

        let mut tasks = JoinSet::new();
        for agent in branches {
            let executor = self.executor(agent)?;
            let snapshot = Arc::clone(&snapshot);
            let limiter = limiter.clone();
            let agent = agent.clone();

            tasks.spawn(async move {
                let _permit = match limiter {
                    Some(limiter) => limiter.acquire_owned().await.ok(),
                    None => None,
                };
                let started = Instant::now();
                let result = invoke(executor, &agent, &snapshot, timeout).await;
                (agent, result, elapsed_ms(started))
            });
        }
        tracing::info!(branches = branches.len(), "Launched parallel branches");

        // Drain every branch before reporting a failure
        let mut pending: BTreeSet<&str> = branches.iter().map(String::as_str).collect();
        let mut step_results = Vec::with_capacity(branches.len() + 1);
        let mut failure: Option<WorkflowError> = None;
        let mut panicked = false;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((agent, Ok(output), duration_ms)) => {
                    pending.remove(agent.as_str());
                    tracing::info!(agent = %agent, duration_ms, "Parallel agent finished");
                    self.context.insert(agent.clone(), output.clone());
                    step_results.push(StepResult {
                        agent,
                        phase: StepPhase::Branch,
                        output,
                        duration_ms,
                    });
                }
                Ok((agent, Err(e), _)) => {
                    pending.remove(agent.as_str());
                    tracing::warn!(agent = %agent, error = %e, "Parallel agent failed");
                    failure.get_or_insert(e);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Parallel branch task panicked");
                    panicked = true;
                }
            }
        }

        // Panicked tasks never report their id; they are the ones left pending
        if failure.is_none() && panicked {
            if let Some(agent) = pending.iter().next() {
                failure = Some(WorkflowError::BranchPanicked {
                    agent: agent.to_string(),
                });
            }
        }

        if let Some(failure) = failure {
            tracing::warn!("Skipping aggregation after branch failure");
            return Err(failure);
        }

        if let Some(step) = then {
            self.transition(EngineState::Aggregating);
            tracing::info!(agent = %step.agent, "Running aggregation agent");
            let result = self.run_single(step, StepPhase::Aggregate).await?;
            step_results.push(result);
        }

        Ok(step_results)
    }

    /// Run one agent against the current context and merge its output
    async fn run_single(&mut self, step: &Step, phase: StepPhase) -> Result<StepResult, WorkflowError> {
        let executor = self.executor(&step.agent)?;
        let started = Instant::now();

        let output = invoke(executor, &step.agent, &self.context, self.config.step_timeout).await?;
        let duration_ms = elapsed_ms(started);

        self.context.insert(step.agent.clone(), output.clone());
        tracing::debug!(agent = %step.agent, duration_ms, "Agent output merged");

        Ok(StepResult {
            agent: step.agent.clone(),
            phase,
            output,
            duration_ms,
        })
    }

    fn executor(&self, agent: &str) -> Result<Arc<dyn AgentExecutor>, WorkflowError> {
        self.executors
            .get(agent)
            .cloned()
            .ok_or_else(|| WorkflowError::UnknownAgent {
                location: "workflow".to_string(),
                agent: agent.to_string(),
            })
    }

    /// Apply the failure policy; a failed save is attached to the run's error
    fn persist_after_failure(&self, failure: WorkflowError) -> WorkflowError {
        match self.config.failure_policy {
            FailurePolicy::Discard => {
                tracing::warn!("Context not persisted; completed steps from this run are discarded");
                failure
            }
            FailurePolicy::PersistCompleted => match self.store.save(&self.context) {
                Ok(()) => {
                    tracing::info!(entries = self.context.len(), "Persisted completed steps");
                    failure
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to persist completed steps");
                    WorkflowError::NotPersisted {
                        source: Box::new(failure),
                        reason: e.to_string(),
                    }
                }
            },
        }
    }

    fn transition(&mut self, next: EngineState) {
        tracing::debug!(from = ?self.state, to = ?next, "Engine state");
        self.state = next;
    }
}

/// Invoke an executor, applying the optional timeout
async fn invoke(
    executor: Arc<dyn AgentExecutor>,
    agent: &str,
    context: &Context,
    timeout: Option<Duration>,
) -> Result<String, WorkflowError> {
    let result = match timeout {
        Some(limit) => tokio::time::timeout(limit, executor.run(context))
            .await
            .map_err(|_| WorkflowError::Timeout {
                agent: agent.to_string(),
                timeout_ms: limit.as_millis() as u64,
            })?,
        None => executor.run(context).await,
    };

    result.map_err(|e| WorkflowError::AgentFailed {
        agent: agent.to_string(),
        message: format!("{:#}", e),
    })
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::agent_config::AgentConfig;
    use crate::context::MemoryStore;

    /// Records every context it is invoked with
    struct ScriptedAgent {
        id: String,
        seen: Mutex<Vec<Context>>,
        delay: Option<Duration>,
        fail: bool,
        panic: bool,
        running: Option<Arc<(AtomicUsize, AtomicUsize)>>,
    }

    impl ScriptedAgent {
        fn new(id: &str) -> Self {
            Self {
                id: id.to_string(),
                seen: Mutex::new(Vec::new()),
                delay: None,
                fail: false,
                panic: false,
                running: None,
            }
        }

        fn delayed(mut self, millis: u64) -> Self {
            self.delay = Some(Duration::from_millis(millis));
            self
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }

        fn panicking(mut self) -> Self {
            self.panic = true;
            self
        }

        fn tracking(mut self, running: Arc<(AtomicUsize, AtomicUsize)>) -> Self {
            self.running = Some(running);
            self
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }

        fn seen(&self) -> Vec<Context> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AgentExecutor for ScriptedAgent {
        fn id(&self) -> &str {
            &self.id
        }

        async fn run(&self, context: &Context) -> anyhow::Result<String> {
            self.seen.lock().unwrap().push(context.clone());

            if let Some(running) = &self.running {
                let now = running.0.fetch_add(1, Ordering::SeqCst) + 1;
                running.1.fetch_max(now, Ordering::SeqCst);
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(running) = &self.running {
                running.0.fetch_sub(1, Ordering::SeqCst);
            }

            if self.panic {
                panic!("agent {} panicked", self.id);
            }
            if self.fail {
                anyhow::bail!("agent {} failed", self.id);
            }
            Ok(format!("output of {}", self.id))
        }
    }

    struct ReadOnlyStore;

    impl ContextStore for ReadOnlyStore {
        fn load(&self) -> Result<Context, WorkflowError> {
            Ok(Context::new())
        }

        fn save(&self, _context: &Context) -> Result<(), WorkflowError> {
            Err(WorkflowError::Persistence("read-only".to_string()))
        }
    }

    fn registry(ids: &[&str]) -> AgentRegistry {
        AgentRegistry::from_configs(
            ids.iter()
                .map(|id| AgentConfig::new(*id, id.to_uppercase(), format!("goal of {}", id))),
        )
        .unwrap()
    }

    fn engine_with(
        workflow: Workflow,
        store: Arc<MemoryStore>,
        config: EngineConfig,
        agents: &[Arc<ScriptedAgent>],
    ) -> WorkflowEngine {
        let ids: Vec<&str> = agents.iter().map(|p| p.id.as_str()).collect();
        let mut engine = WorkflowEngine::new(registry(&ids), workflow, store, config).unwrap();
        for agent in agents {
            engine = engine.with_executor(Arc::clone(agent) as Arc<dyn AgentExecutor>);
        }
        engine
    }

    #[tokio::test]
    async fn test_sequential_steps_see_prior_outputs() {
        let (a, b, c) = (
            Arc::new(ScriptedAgent::new("a")),
            Arc::new(ScriptedAgent::new("b")),
            Arc::new(ScriptedAgent::new("c")),
        );
        let store = Arc::new(MemoryStore::new());
        let mut engine = engine_with(
            Workflow::sequential(["a", "b", "c"]),
            Arc::clone(&store),
            EngineConfig::default(),
            &[a.clone(), b.clone(), c.clone()],
        );

        let result = engine.run().await.unwrap();

        assert!(a.seen()[0].is_empty());
        assert_eq!(b.seen()[0].keys().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(c.seen()[0].keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(c.seen()[0]["b"], "output of b");

        assert_eq!(result.context.len(), 3);
        assert_eq!(
            result.step_results.iter().map(|r| r.agent.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
        assert_eq!(store.saves(), 1);
        assert_eq!(store.snapshot(), result.context);
        assert_eq!(engine.state(), EngineState::Done);
    }

    #[tokio::test]
    async fn test_sequential_rerun_overwrites_entry() {
        let a = Arc::new(ScriptedAgent::new("a"));
        let b = Arc::new(ScriptedAgent::new("b"));
        let mut engine = engine_with(
            Workflow::sequential(["a", "b", "a"]),
            Arc::new(MemoryStore::new()),
            EngineConfig::default(),
            &[a.clone(), b.clone()],
        );

        let result = engine.run().await.unwrap();

        assert_eq!(a.calls(), 2);
        assert!(a.seen()[1].contains_key("b"));
        assert_eq!(result.context.len(), 2);
    }

    #[tokio::test]
    async fn test_stub_agents_scenario() {
        let registry = AgentRegistry::from_configs(vec![
            AgentConfig::new("x", "Researcher", "Find the facts"),
            AgentConfig::new("y", "Analyst", "Crunch the numbers").with_tools(["python"]),
        ])
        .unwrap();
        let mut engine = WorkflowEngine::new(
            registry,
            Workflow::sequential(["x", "y"]),
            MemoryStore::new(),
            EngineConfig::default(),
        )
        .unwrap();

        let result = engine.run().await.unwrap();
        let x = &result.context["x"];
        let y = &result.context["y"];

        assert!(x.contains("Goal: Find the facts"));
        assert!(!x.contains("Context received"));
        assert!(y.contains("Context received:"));
        assert!(y.contains(&format!("- From x: {}", x)));
        assert!(y.contains("Tools used:\n- Python tool executed successfully"));
    }

    #[tokio::test]
    async fn test_parallel_branches_share_snapshot() {
        let mut preloaded = Context::new();
        preloaded.insert("earlier".to_string(), "from a previous run".to_string());

        let (a, b) = (Arc::new(ScriptedAgent::new("a").delayed(10)), Arc::new(ScriptedAgent::new("b")));
        let store = Arc::new(MemoryStore::with_context(preloaded));
        let mut engine = engine_with(
            Workflow::parallel(["a", "b"], None),
            Arc::clone(&store),
            EngineConfig::default(),
            &[a.clone(), b.clone()],
        );

        let result = engine.run().await.unwrap();

        for agent in [&a, &b] {
            let seen = agent.seen();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0].keys().collect::<Vec<_>>(), vec!["earlier"]);
        }
        assert_eq!(
            result.context.keys().collect::<Vec<_>>(),
            vec!["a", "b", "earlier"]
        );
        assert_eq!(result.context["a"], "output of a");
        assert!(result.step_results.iter().all(|r| r.phase == StepPhase::Branch));
        assert_eq!(store.saves(), 1);
    }

    #[tokio::test]
    async fn test_parallel_aggregation_sees_all_branches() {
        let (a, b, c) = (
            Arc::new(ScriptedAgent::new("a")),
            Arc::new(ScriptedAgent::new("b").delayed(5)),
            Arc::new(ScriptedAgent::new("c")),
        );
        let mut engine = engine_with(
            Workflow::parallel(["a", "b"], Some("c")),
            Arc::new(MemoryStore::new()),
            EngineConfig::default(),
            &[a.clone(), b.clone(), c.clone()],
        );

        let result = engine.run().await.unwrap();

        let seen = c.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["a"], "output of a");
        assert_eq!(seen[0]["b"], "output of b");

        let last = result.step_results.last().unwrap();
        assert_eq!(last.agent, "c");
        assert_eq!(last.phase, StepPhase::Aggregate);
    }

    #[tokio::test]
    async fn test_parallel_failure_drains_then_fails() {
        let (a, b, c, d) = (
            Arc::new(ScriptedAgent::new("a").failing()),
            Arc::new(ScriptedAgent::new("b").delayed(20)),
            Arc::new(ScriptedAgent::new("c").delayed(5)),
            Arc::new(ScriptedAgent::new("d")),
        );
        let store = Arc::new(MemoryStore::new());
        let mut engine = engine_with(
            Workflow::parallel(["a", "b", "c"], Some("d")),
            Arc::clone(&store),
            EngineConfig::default(),
            &[a.clone(), b.clone(), c.clone(), d.clone()],
        );

        let err = engine.run().await.unwrap_err();

        assert!(matches!(err, WorkflowError::AgentFailed { ref agent, .. } if agent == "a"));
        assert_eq!(b.calls(), 1);
        assert_eq!(c.calls(), 1);
        assert_eq!(d.calls(), 0);
        // Surviving branches were merged in memory but nothing was saved
        assert!(engine.context().contains_key("b"));
        assert_eq!(store.saves(), 0);
        assert_eq!(engine.state(), EngineState::Failed);
    }

    #[tokio::test]
    async fn test_parallel_panic_is_reported() {
        let (a, b) = (Arc::new(ScriptedAgent::new("a").panicking()), Arc::new(ScriptedAgent::new("b")));
        let mut engine = engine_with(
            Workflow::parallel(["a", "b"], None),
            Arc::new(MemoryStore::new()),
            EngineConfig::default(),
            &[a.clone(), b.clone()],
        );

        let err = engine.run().await.unwrap_err();

        assert!(matches!(err, WorkflowError::BranchPanicked { ref agent } if agent == "a"));
        assert_eq!(b.calls(), 1);
    }

    #[tokio::test]
    async fn test_sequential_failure_aborts_without_saving() {
        let (a, b, c) = (
            Arc::new(ScriptedAgent::new("a")),
            Arc::new(ScriptedAgent::new("b").failing()),
            Arc::new(ScriptedAgent::new("c")),
        );
        let store = Arc::new(MemoryStore::new());
        let mut engine = engine_with(
            Workflow::sequential(["a", "b", "c"]),
            Arc::clone(&store),
            EngineConfig::default(),
            &[a.clone(), b.clone(), c.clone()],
        );

        let err = engine.run().await.unwrap_err();

        assert_eq!(err.agent(), Some("b"));
        assert!(err.to_string().contains("agent b failed"));
        assert_eq!(c.calls(), 0);
        assert!(engine.context().contains_key("a"));
        assert_eq!(store.saves(), 0);
    }

    #[tokio::test]
    async fn test_persist_completed_policy_saves_partial_progress() {
        let (a, b) = (Arc::new(ScriptedAgent::new("a")), Arc::new(ScriptedAgent::new("b").failing()));
        let store = Arc::new(MemoryStore::new());
        let mut engine = engine_with(
            Workflow::sequential(["a", "b"]),
            Arc::clone(&store),
            EngineConfig::default().with_failure_policy(FailurePolicy::PersistCompleted),
            &[a, b],
        );

        assert!(engine.run().await.is_err());
        assert_eq!(store.saves(), 1);
        assert_eq!(store.snapshot().keys().collect::<Vec<_>>(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_step_timeout() {
        let slow = Arc::new(ScriptedAgent::new("slow").delayed(500));
        let mut engine = engine_with(
            Workflow::sequential(["slow"]),
            Arc::new(MemoryStore::new()),
            EngineConfig::default().with_step_timeout(Duration::from_millis(20)),
            &[slow],
        );

        let err = engine.run().await.unwrap_err();
        assert!(
            matches!(err, WorkflowError::Timeout { ref agent, timeout_ms: 20 } if agent == "slow")
        );
    }

    #[tokio::test]
    async fn test_persist_completed_reports_save_failure() {
        let (a, b) = (Arc::new(ScriptedAgent::new("a")), Arc::new(ScriptedAgent::new("b").failing()));
        let mut engine = WorkflowEngine::new(
            registry(&["a", "b"]),
            Workflow::sequential(["a", "b"]),
            ReadOnlyStore,
            EngineConfig::default().with_failure_policy(FailurePolicy::PersistCompleted),
        )
        .unwrap()
        .with_executor(a as Arc<dyn AgentExecutor>)
        .with_executor(b as Arc<dyn AgentExecutor>);

        let err = engine.run().await.unwrap_err();

        assert!(matches!(err, WorkflowError::NotPersisted { ref source, ref reason }
            if matches!(**source, WorkflowError::AgentFailed { .. }) && reason.contains("read-only")));
        assert_eq!(err.agent(), Some("b"));
        assert!(err.to_string().contains("agent b failed"));
        assert_eq!(engine.state(), EngineState::Failed);
    }

    #[tokio::test]
    async fn test_parallel_timeout_drains_other_branches() {
        let (a, b, c) = (
            Arc::new(ScriptedAgent::new("a").delayed(500)),
            Arc::new(ScriptedAgent::new("b").delayed(5)),
            Arc::new(ScriptedAgent::new("c")),
        );
        let store = Arc::new(MemoryStore::new());
        let mut engine = engine_with(
            Workflow::parallel(["a", "b"], Some("c")),
            Arc::clone(&store),
            EngineConfig::default().with_step_timeout(Duration::from_millis(30)),
            &[a, b.clone(), c.clone()],
        );

        let err = engine.run().await.unwrap_err();

        assert!(matches!(err, WorkflowError::Timeout { ref agent, timeout_ms: 30 } if agent == "a"));
        assert_eq!(engine.context()["b"], "output of b");
        assert_eq!(b.calls(), 1);
        assert_eq!(c.calls(), 0);
        assert_eq!(store.saves(), 0);
    }

    #[tokio::test]
    async fn test_max_concurrency_above_permit_limit() {
        let (a, b) = (Arc::new(ScriptedAgent::new("a")), Arc::new(ScriptedAgent::new("b")));
        let mut engine = engine_with(
            Workflow::parallel(["a", "b"], None),
            Arc::new(MemoryStore::new()),
            EngineConfig::default().with_max_concurrency(usize::MAX),
            &[a, b],
        );

        let result = engine.run().await.unwrap();
        assert_eq!(result.context.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_max_concurrency_bounds_branches() {
        let running = Arc::new((AtomicUsize::new(0), AtomicUsize::new(0)));
        let agents: Vec<Arc<ScriptedAgent>> = ["a", "b", "c", "d"]
            .iter()
            .map(|id| Arc::new(ScriptedAgent::new(id).delayed(10).tracking(Arc::clone(&running))))
            .collect();
        let mut engine = engine_with(
            Workflow::parallel(["a", "b", "c", "d"], None),
            Arc::new(MemoryStore::new()),
            EngineConfig::default().with_max_concurrency(2),
            &agents,
        );

        engine.run().await.unwrap();

        assert!(running.1.load(Ordering::SeqCst) <= 2);
        assert!(agents.iter().all(|p| p.calls() == 1));
    }

    #[tokio::test]
    async fn test_unknown_agent_rejected_before_execution() {
        let a = Arc::new(ScriptedAgent::new("a"));
        let store = Arc::new(MemoryStore::new());
        let mut engine = engine_with(
            Workflow::sequential(["a", "ghost"]),
            Arc::clone(&store),
            EngineConfig::default(),
            &[a.clone()],
        );

        let err = engine.run().await.unwrap_err();

        assert!(matches!(err, WorkflowError::UnknownAgent { ref agent, .. } if agent == "ghost"));
        assert_eq!(a.calls(), 0);
        assert_eq!(store.saves(), 0);
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[tokio::test]
    async fn test_save_failure_keeps_context_available() {
        let mut engine = WorkflowEngine::new(
            registry(&["a"]),
            Workflow::sequential(["a"]),
            ReadOnlyStore,
            EngineConfig::default(),
        )
        .unwrap();

        let err = engine.run().await.unwrap_err();

        assert!(matches!(err, WorkflowError::Persistence(_)));
        assert!(engine.context()["a"].contains("Goal: goal of a"));
    }

    #[tokio::test]
    async fn test_custom_tool_registry() {
        struct Search;

        impl crate::tools::Tool for Search {
            fn name(&self) -> &str {
                "search"
            }

            fn invoke(&self) -> String {
                "Search returned 3 hits".to_string()
            }
        }

        let mut tools = ToolRegistry::with_builtins();
        tools.register(Arc::new(Search));
        let registry = AgentRegistry::from_configs(vec![
            AgentConfig::new("a", "A", "look things up").with_tools(["search", "fax"]),
        ])
        .unwrap();

        let mut engine = WorkflowEngine::new(
            registry,
            Workflow::sequential(["a"]),
            MemoryStore::new(),
            EngineConfig::default(),
        )
        .unwrap()
        .with_tools(tools);

        let result = engine.run().await.unwrap();
        assert!(result.context["a"].contains("- Search returned 3 hits\n- Unknown tool: fax"));
    }
}

//! Run manager: the registry of runs and their lifecycle.
//!
//! Every run owns its engine until started, a [`RunControl`] carrying its
//! state channel and cancellation token, and read handles onto its
//! portfolio and statistics. The registry mutex only guards membership and
//! is never held across an await; lifecycle transitions go through each
//! run's own state channel.

use backtester_core::data::DataServices;
use backtester_core::domain::RunId;
use backtester_core::{Config, Engine, EngineHandles, RunControl, RunState, StrategyRegistry};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::RunError;
use crate::loader;
use crate::report::{ReportSink, RunReport};

/// A point-in-time view of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: RunId,
    pub nickname: String,
    pub strategy: String,
    pub state: RunState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub live: bool,
    pub error: Option<String>,
}

/// Manager knobs that are not collaborators.
#[derive(Debug, Clone, Default)]
pub struct ManagerSettings {
    /// Base directory for relative `.strat` paths.
    pub strategy_dir: Option<PathBuf>,
}

/// Collaborators shared by every run.
#[derive(Clone)]
pub struct Services {
    pub strategies: Arc<StrategyRegistry>,
    pub data: DataServices,
    pub report_sink: Option<Arc<dyn ReportSink>>,
}

impl Default for Services {
    fn default() -> Self {
        Self {
            strategies: Arc::new(StrategyRegistry::with_defaults()),
            data: DataServices::default(),
            report_sink: None,
        }
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("strategies", &self.strategies.names())
            .field("data", &self.data)
            .field("report_sink", &self.report_sink.is_some())
            .finish()
    }
}

struct Run {
    id: RunId,
    config: Arc<Config>,
    created_at: DateTime<Utc>,
    live: bool,
    control: RunControl,
    handles: EngineHandles,
    /// Present until the run is started.
    engine: Mutex<Option<Engine>>,
    /// The supervisor task, present once started and until someone waits on it.
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Run {
    fn summary(&self) -> RunSummary {
        let status = self.control.status();
        RunSummary {
            id: self.id,
            nickname: self.config.nickname.clone(),
            strategy: self.config.strategy_settings.name.clone(),
            state: status.state,
            created_at: self.created_at,
            started_at: status.started_at,
            ended_at: status.ended_at,
            live: self.live,
            error: status.error,
        }
    }

    async fn report(&self) -> RunReport {
        let statistics = self.handles.statistics.read().await.snapshot();
        let total_value = self.handles.portfolio.read().await.total_value();
        RunReport {
            summary: self.summary(),
            fingerprint: self.config.fingerprint().to_hex(),
            total_value,
            final_holdings: statistics.pairs.iter().filter_map(|p| p.final_holding.clone()).collect(),
            statistics,
        }
    }
}

#[derive(Default)]
struct Registry {
    runs: HashMap<RunId, Arc<Run>>,
    /// Creation order.
    order: Vec<RunId>,
}

impl Registry {
    fn ordered(&self) -> impl Iterator<Item = &Arc<Run>> {
        self.order.iter().filter_map(|id| self.runs.get(id))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Map the state that refused a start to the reason reported to callers.
fn start_refused(id: RunId, state: RunState) -> RunError {
    if state.is_terminal() {
        RunError::AlreadyRan(id)
    } else {
        RunError::AlreadyRunning(id)
    }
}

/// Thread-safe registry of runs.
pub struct RunManager {
    settings: ManagerSettings,
    services: Services,
    registry: Mutex<Registry>,
}

impl std::fmt::Debug for RunManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunManager")
            .field("settings", &self.settings)
            .field("services", &self.services)
            .field("runs", &lock(&self.registry).order.len())
            .finish()
    }
}

impl RunManager {
    pub fn new(settings: ManagerSettings, services: Services) -> Self {
        Self { settings, services, registry: Mutex::new(Registry::default()) }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    fn get(&self, id: RunId) -> Result<Arc<Run>, RunError> {
        lock(&self.registry).runs.get(&id).cloned().ok_or(RunError::NotFound(id))
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.settings.strategy_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Load a `.strat` file and register a run for it. The run is not started.
    pub fn create_from_file(&self, path: &Path) -> Result<RunId, RunError> {
        let cfg = loader::load_config(&self.resolve(path))?;
        self.create_from_config(cfg)
    }

    /// Validate `cfg`, build its engine and register it in the Created state.
    pub fn create_from_config(&self, cfg: Config) -> Result<RunId, RunError> {
        cfg.validate()?;
        let engine = Engine::new(Arc::new(cfg), &self.services.strategies, self.services.data.clone())?;

        let id = RunId::new();
        let run = Arc::new(Run {
            id,
            config: Arc::clone(engine.config()),
            created_at: Utc::now(),
            live: engine.is_live(),
            control: RunControl::new(),
            handles: engine.handles(),
            engine: Mutex::new(Some(engine)),
            task: Mutex::new(None),
        });
        info!(run = %id, name = %run.config.display_name(), live = run.live, "run created");

        let mut registry = lock(&self.registry);
        registry.order.push(id);
        registry.runs.insert(id, run);
        Ok(id)
    }

    /// Move a Created run to Running and spawn its engine task.
    pub fn start(&self, id: RunId) -> Result<RunSummary, RunError> {
        let run = self.get(id)?;
        let engine = {
            let mut slot = lock(&run.engine);
            run.control.mark_running().map_err(|state| start_refused(id, state))?;
            slot.take()
        };
        let Some(engine) = engine else {
            let message = "engine missing for a created run".to_string();
            run.control.finish(RunState::Errored, Some(message.clone()));
            return Err(RunError::Internal(message));
        };

        let task = tokio::spawn(supervise(Arc::clone(&run), engine, self.services.report_sink.clone()));
        *lock(&run.task) = Some(task);
        info!(run = %id, "run started");
        Ok(run.summary())
    }

    /// Ask a running run to stop and wait until it reaches a terminal state.
    pub async fn stop(&self, id: RunId) -> Result<RunSummary, RunError> {
        let run = self.get(id)?;
        run.control.request_stop().map_err(|state| RunError::NotRunning { id, state })?;
        info!(run = %id, "run stopping");
        let status = run.control.wait_terminal().await;
        info!(run = %id, state = %status.state, "run stopped");
        Ok(run.summary())
    }

    /// Stop every registered run concurrently. Runs that are not running
    /// report `NotRunning`; one failure never aborts the rest.
    pub async fn stop_all(&self) -> Vec<(RunId, Result<RunSummary, RunError>)> {
        let ids: Vec<RunId> = lock(&self.registry).order.clone();
        let results = join_all(ids.iter().map(|&id| self.stop(id))).await;
        ids.into_iter().zip(results).collect()
    }

    /// Summaries of every run in creation order.
    pub fn list(&self) -> Vec<RunSummary> {
        lock(&self.registry).ordered().map(|run| run.summary()).collect()
    }

    pub fn summary(&self, id: RunId) -> Result<RunSummary, RunError> {
        Ok(self.get(id)?.summary())
    }

    /// Evict a run that is not running.
    pub fn clear_run(&self, id: RunId) -> Result<RunSummary, RunError> {
        let mut registry = lock(&self.registry);
        let run = registry.runs.get(&id).cloned().ok_or(RunError::NotFound(id))?;
        if run.control.state().is_active() {
            return Err(RunError::CannotClearRunning(id));
        }
        registry.runs.remove(&id);
        registry.order.retain(|other| *other != id);
        info!(run = %id, "run cleared");
        Ok(run.summary())
    }

    /// Evict every run that is not running. Returns the cleared and the
    /// remaining runs.
    pub fn clear_all_runs(&self) -> (Vec<RunSummary>, Vec<RunSummary>) {
        let mut registry = lock(&self.registry);
        let (active, idle): (Vec<Arc<Run>>, Vec<Arc<Run>>) =
            registry.ordered().cloned().partition(|run| run.control.state().is_active());
        let registry = &mut *registry;
        for run in &idle {
            registry.runs.remove(&run.id);
        }
        registry.order.retain(|id| registry.runs.contains_key(id));
        info!(cleared = idle.len(), remaining = active.len(), "runs cleared");
        (
            idle.iter().map(|run| run.summary()).collect(),
            active.iter().map(|run| run.summary()).collect(),
        )
    }

    /// Summary, statistics snapshot and final holdings of a run.
    pub async fn run_report(&self, id: RunId) -> Result<RunReport, RunError> {
        let run = self.get(id)?;
        Ok(run.report().await)
    }

    /// Wait until a started run is terminal and its report is published.
    pub async fn wait(&self, id: RunId) -> Result<RunSummary, RunError> {
        let run = self.get(id)?;
        if run.control.state() == RunState::Created {
            return Err(RunError::NotRunning { id, state: RunState::Created });
        }
        run.control.wait_terminal().await;
        let task = lock(&run.task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                return Err(RunError::Internal(format!("run supervisor failed: {e}")));
            }
        }
        Ok(run.summary())
    }
}

/// Drive one engine to completion, publish its terminal state and hand the
/// report to the sink.
async fn supervise(run: Arc<Run>, engine: Engine, sink: Option<Arc<dyn ReportSink>>) {
    let cancel = run.control.cancel_token();
    let outcome = tokio::spawn(engine.run(cancel)).await;
    match outcome {
        Ok(outcome) => run.control.finish(outcome.state, outcome.error),
        Err(e) => {
            error!(run = %run.id, error = %e, "engine task panicked");
            run.control.finish(RunState::Errored, Some(format!("engine task failed: {e}")));
        }
    }

    let status = run.control.status();
    match &status.error {
        Some(err) => warn!(run = %run.id, state = %status.state, error = %err, "run finished"),
        None => info!(run = %run.id, state = %status.state, "run finished"),
    }

    let Some(sink) = sink else { return };
    let report = run.report().await;
    let published = tokio::task::spawn_blocking(move || sink.publish(&report)).await;
    match published {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(run = %run.id, error = %e, "failed to publish run report"),
        Err(e) => warn!(run = %run.id, error = %e, "report publisher task failed"),
    }
}

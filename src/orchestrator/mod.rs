//! Task orchestration split into focused submodules.
//!
//! The `TaskOrchestrator` struct and its methods are organized by domain:
//! - [`create`] - Task creation (URL validation, metadata lookup, admission)
//! - [`control`] - Lookup and cancellation
//! - [`state`] - Serialized write-through status updates and progress publishing
//! - [`process`] - Per-task download execution under the concurrency limit
//! - [`failover`] - Error classification and switching to the next strategy
//! - [`lifecycle`] - Restore on startup and graceful shutdown

mod control;
mod create;
mod failover;
mod lifecycle;
mod process;
mod state;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::config::Config;
use crate::db::{Database, TaskStore};
use crate::error::{Error, Result};
use crate::hub::ConnectionHub;
use crate::strategy::{Strategy, StrategyRegistry, YtDlpStrategy};
use crate::types::{Task, TaskId};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

/// A task admitted to the in-memory working set
pub(crate) struct ActiveTask {
    /// Latest snapshot; the store holds the same values once a write completes
    pub(crate) task: Task,
    /// Signals cooperative cancellation to the processing loop
    pub(crate) cancel: CancellationToken,
    /// Serializes persist-then-publish for this task
    pub(crate) write_gate: Arc<Mutex<()>>,
}

impl ActiveTask {
    fn new(task: Task) -> Self {
        Self {
            task,
            cancel: CancellationToken::new(),
            write_gate: Arc::new(Mutex::new(())),
        }
    }
}

/// Working set and concurrency state
#[derive(Clone)]
pub(crate) struct TaskState {
    /// Non-terminal tasks known to this process
    pub(crate) active: Arc<Mutex<HashMap<TaskId, ActiveTask>>>,
    /// Limits concurrent downloads (max_concurrent_downloads)
    pub(crate) limiter: Arc<Semaphore>,
    /// Total number of permits in `limiter`
    pub(crate) capacity: usize,
    /// Cleared during shutdown
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Cancelled once at shutdown; processing loops stop without terminal writes
    pub(crate) shutdown: CancellationToken,
    /// Processing loops that have not returned yet
    pub(crate) in_flight: Arc<AtomicUsize>,
}

/// Decrements the in-flight counter when a processing loop ends
pub(crate) struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    pub(crate) fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Coordinates download tasks from creation to a terminal status
///
/// Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct TaskOrchestrator {
    pub(crate) config: Arc<Config>,
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) registry: Arc<StrategyRegistry>,
    pub(crate) hub: ConnectionHub,
    pub(crate) state: TaskState,
}

impl TaskOrchestrator {
    /// Create an orchestrator backed by SQLite and the strategies available on this host
    ///
    /// This initializes all core components:
    /// - Creates the download and temp directories
    /// - Opens/creates the SQLite database and runs migrations
    /// - Registers yt-dlp if configured or found in PATH
    /// - Restores unfinished tasks from the previous session
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        for (dir, what) in [
            (config.download_dir(), "download"),
            (config.temp_dir(), "temp"),
        ] {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create {} directory '{}': {}", what, dir.display(), e),
                ))
            })?;
        }

        let db = Database::new(&config.persistence.database_path).await?;
        if db.was_unclean_shutdown().await? {
            tracing::warn!("Previous session did not shut down cleanly; resuming unfinished tasks");
        }
        db.set_clean_start().await?;

        let registry = StrategyRegistry::new(&config.strategy)?;
        let ytdlp = match &config.tools.ytdlp_path {
            Some(path) => Some(YtDlpStrategy::new(path.clone(), config.temp_dir())),
            None if config.tools.search_path => YtDlpStrategy::from_path(config.temp_dir()),
            None => None,
        };
        match ytdlp {
            Some(strategy) => {
                tracing::info!(binary = %strategy.binary_path().display(), "yt-dlp strategy available");
                registry.register(Arc::new(strategy)).await;
            }
            None => tracing::warn!("yt-dlp not found; register a strategy before creating tasks"),
        }

        let hub = ConnectionHub::new(&config.hub);
        let orchestrator = Self::from_parts(config, Arc::new(db), Arc::new(registry), hub)?;

        let restored = orchestrator.restore_unfinished().await?;
        if restored > 0 {
            tracing::info!(restored, "Restored unfinished tasks from previous session");
        }

        Ok(orchestrator)
    }

    /// Assemble an orchestrator from explicit collaborators
    ///
    /// Does not touch the filesystem or restore anything; call
    /// [`restore_unfinished`](Self::restore_unfinished) to resume stored tasks.
    pub fn from_parts(
        config: Config,
        store: Arc<dyn TaskStore>,
        registry: Arc<StrategyRegistry>,
        hub: ConnectionHub,
    ) -> Result<Self> {
        config.validate()?;
        let capacity = config.download.max_concurrent_downloads;

        Ok(Self {
            config: Arc::new(config),
            store,
            registry,
            hub,
            state: TaskState {
                active: Arc::new(Mutex::new(HashMap::new())),
                limiter: Arc::new(Semaphore::new(capacity)),
                capacity,
                accepting_new: Arc::new(AtomicBool::new(true)),
                shutdown: CancellationToken::new(),
                in_flight: Arc::new(AtomicUsize::new(0)),
            },
        })
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Strategy registry used for selection and failover
    pub fn registry(&self) -> &Arc<StrategyRegistry> {
        &self.registry
    }

    /// Register an additional strategy at the lowest priority
    pub async fn register_strategy(&self, strategy: Arc<dyn Strategy>) -> usize {
        self.registry.register(strategy).await
    }

    /// Observer hub progress is published to
    pub fn hub(&self) -> &ConnectionHub {
        &self.hub
    }

    /// Number of tasks currently holding a download slot
    pub fn running_tasks(&self) -> usize {
        self.state
            .capacity
            .saturating_sub(self.state.limiter.available_permits())
    }

    /// IDs of tasks in the in-memory working set
    pub async fn active_task_ids(&self) -> Vec<TaskId> {
        self.state.active.lock().await.keys().copied().collect()
    }

    /// Whether new tasks are accepted
    pub fn is_accepting(&self) -> bool {
        self.state.accepting_new.load(Ordering::SeqCst)
    }

    /// Where the artifact of `id` is written
    pub(crate) fn output_path(&self, id: TaskId) -> PathBuf {
        self.config
            .download_dir()
            .join(format!("{}.{}", id, self.config.download.output_extension))
    }

    /// Put `task` in the working set unless it is already there
    pub(crate) async fn admit(&self, task: Task) {
        let mut active = self.state.active.lock().await;
        active
            .entry(task.id)
            .or_insert_with(|| ActiveTask::new(task));
    }

    /// Drop `id` from the working set once it has reached a terminal status
    pub(crate) async fn release_if_terminal(&self, id: TaskId) {
        let mut active = self.state.active.lock().await;
        if active
            .get(&id)
            .is_some_and(|entry| entry.task.status.is_terminal())
        {
            active.remove(&id);
        }
    }

    /// Drop `id` from the working set regardless of status
    ///
    /// Used when processing stops without reaching a terminal status; the
    /// store still holds the last persisted snapshot.
    pub(crate) async fn evict(&self, id: TaskId) {
        if let Some(entry) = self.state.active.lock().await.remove(&id) {
            entry.cancel.cancel();
            tracing::debug!(task_id = %id, status = %entry.task.status, "Evicted task from working set");
        }
    }
}

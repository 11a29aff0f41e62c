//! Test doubles shared by unit tests across modules

use crate::config::Config;
use crate::db::TaskStore;
use crate::error::{DatabaseError, Error, Result};
use crate::hub::{Connection, ConnectionHub, ConnectionId};
use crate::orchestrator::TaskOrchestrator;
use crate::strategy::{Platform, ProgressStream, Strategy, StrategyRegistry};
use crate::types::{
    AudioQuality, HubMessage, Metadata, ProgressEvent, Task, TaskId, TaskStatus, TaskUpdate,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;

/// One step of a scripted download
#[derive(Clone)]
pub enum Step {
    /// Yield an event
    Emit(ProgressEvent),
    /// Write bytes to the output path
    WriteOutput(Vec<u8>),
    /// Block until the semaphore hands out a permit
    Wait(Arc<Semaphore>),
    /// Sleep
    Sleep(Duration),
}

/// Strategy whose metadata and download stream are fixed up front
pub struct ScriptedStrategy {
    name: String,
    platform: Option<Platform>,
    accepts: bool,
    info: Option<Metadata>,
    script: Vec<Step>,
    pub download_calls: AtomicUsize,
    pub info_calls: AtomicUsize,
    pub cleanup_calls: AtomicUsize,
}

impl ScriptedStrategy {
    /// Accepts every URL, returns a titled record and writes a small file
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            platform: None,
            accepts: true,
            info: Some(Metadata {
                title: Some(format!("{name} title")),
                author: Some(format!("{name} author")),
                duration: Some(180.0),
                thumbnail: None,
            }),
            script: vec![
                Step::Emit(ProgressEvent::downloading(50.0)),
                Step::WriteOutput(b"audio bytes".to_vec()),
                Step::Emit(ProgressEvent::complete()),
            ],
            download_calls: AtomicUsize::new(0),
            info_calls: AtomicUsize::new(0),
            cleanup_calls: AtomicUsize::new(0),
        }
    }

    pub fn rejecting(mut self) -> Self {
        self.accepts = false;
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn with_info(mut self, info: Option<Metadata>) -> Self {
        self.info = info;
        self
    }

    pub fn with_script(mut self, script: Vec<Step>) -> Self {
        self.script = script;
        self
    }

    /// Script that fails immediately with `error`
    pub fn failing(self, error: &str) -> Self {
        self.with_script(vec![Step::Emit(ProgressEvent::error(error))])
    }

    pub fn downloads(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    pub fn cleanups(&self) -> usize {
        self.cleanup_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Strategy for ScriptedStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn platform(&self) -> Option<Platform> {
        self.platform
    }

    async fn validate_url(&self, _url: &str) -> bool {
        self.accepts
    }

    async fn get_info(&self, _url: &str) -> Option<Metadata> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        self.info.clone()
    }

    async fn download(&self, _url: &str, output: &Path, _quality: AudioQuality) -> ProgressStream {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        let steps = self.script.clone().into_iter();
        let output = output.to_path_buf();

        futures::stream::unfold((steps, output), |(mut steps, output)| async move {
            loop {
                match steps.next()? {
                    Step::Emit(event) => return Some((event, (steps, output))),
                    Step::WriteOutput(bytes) => {
                        if let Some(parent) = output.parent() {
                            tokio::fs::create_dir_all(parent).await.ok()?;
                        }
                        tokio::fs::write(&output, bytes).await.ok()?;
                    }
                    Step::Wait(gate) => gate.acquire().await.ok()?.forget(),
                    Step::Sleep(duration) => tokio::time::sleep(duration).await,
                }
            }
        })
        .boxed()
    }

    async fn cleanup(&self) {
        self.cleanup_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Connection that records every delivered message
pub struct RecordingConnection {
    id: ConnectionId,
    open: AtomicBool,
    fail_sends: AtomicBool,
    pub messages: Mutex<Vec<HubMessage>>,
    pub close_calls: AtomicUsize,
}

impl RecordingConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::next(),
            open: AtomicBool::new(true),
            fail_sends: AtomicBool::new(false),
            messages: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
        })
    }

    /// A connection that has not been accepted yet
    pub fn pending() -> Arc<Self> {
        let conn = Self::new();
        conn.open.store(false, Ordering::SeqCst);
        conn
    }

    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub fn received(&self) -> Vec<HubMessage> {
        self.messages.lock().unwrap().clone()
    }

    /// Progress messages only, as (status, progress)
    pub fn progress(&self) -> Vec<(TaskStatus, f32)> {
        self.received()
            .into_iter()
            .filter_map(|m| match m {
                HubMessage::Progress {
                    status, progress, ..
                } => Some((status, progress)),
                _ => None,
            })
            .collect()
    }

    /// Status lines carried by progress messages
    pub fn status_messages(&self) -> Vec<String> {
        self.received()
            .into_iter()
            .filter_map(|m| match m {
                HubMessage::Progress {
                    details: Some(details),
                    ..
                } => details.status_message,
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Connection for RecordingConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn accept(&self) -> Result<()> {
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, message: &HubMessage) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::Connection("peer went away".to_string()));
        }
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
    }
}

/// In-memory store; can be told to fail writes
#[derive(Default)]
pub struct MemoryStore {
    pub tasks: Mutex<Vec<Task>>,
    pub fail_inserts: AtomicBool,
    pub fail_updates: AtomicBool,
    pub clean_shutdown: AtomicBool,
    held_status: Mutex<Option<(TaskStatus, Arc<Semaphore>)>>,
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn insert(&self, task: &Task) -> Result<()> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(Error::Database(DatabaseError::QueryFailed(
                "disk full".to_string(),
            )));
        }
        self.tasks.lock().unwrap().push(task.clone());
        Ok(())
    }

    async fn update(&self, id: TaskId, update: &TaskUpdate) -> Result<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(Error::Database(DatabaseError::QueryFailed(
                "disk full".to_string(),
            )));
        }
        let held = self.held_status.lock().unwrap().clone();
        if let Some((status, gate)) = held
            && update.status == Some(status)
        {
            gate.acquire().await.unwrap().forget();
        }
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| Error::Database(DatabaseError::NotFound(format!("task {id}"))))?;
        update.apply_to(task);
        Ok(())
    }

    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>> {
        Ok(self.tasks.lock().unwrap().iter().find(|t| t.id == id).cloned())
    }

    async fn find_unfinished(&self) -> Result<Vec<Task>> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .iter()
            .filter(|t| !t.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn set_clean_shutdown(&self) -> Result<()> {
        self.clean_shutdown.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl MemoryStore {
    /// Block every update to `status` until `gate` hands out a permit
    pub fn hold_updates_to(&self, status: TaskStatus, gate: &Arc<Semaphore>) {
        *self.held_status.lock().unwrap() = Some((status, Arc::clone(gate)));
    }

    pub fn get(&self, id: TaskId) -> Option<Task> {
        self.tasks.lock().unwrap().iter().find(|t| t.id == id).cloned()
    }
}

/// Config pointing at `dir`, with no failover delay and fast timeouts
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.download.download_dir = dir.join("downloads");
    config.download.temp_dir = dir.join("temp");
    config.download.info_timeout = Duration::from_secs(5);
    config.strategy.failover_delay = Duration::ZERO;
    config.persistence.database_path = dir.join("media-dl.db");
    config.persistence.shutdown_timeout = Duration::from_secs(5);
    config.tools.search_path = false;
    config
}

/// Orchestrator over an in-memory store
pub struct Harness {
    pub orchestrator: TaskOrchestrator,
    pub store: Arc<MemoryStore>,
    pub hub: ConnectionHub,
    pub temp: TempDir,
}

impl Harness {
    pub async fn new(strategies: Vec<Arc<dyn Strategy>>) -> Self {
        Self::with_config(strategies, |_| {}).await
    }

    pub async fn with_config(
        strategies: Vec<Arc<dyn Strategy>>,
        adjust: impl FnOnce(&mut Config),
    ) -> Self {
        let temp = tempfile::tempdir().unwrap();
        let mut config = test_config(temp.path());
        adjust(&mut config);

        let store = Arc::new(MemoryStore::default());
        let registry =
            Arc::new(StrategyRegistry::with_strategies(&config.strategy, strategies).unwrap());
        let hub = ConnectionHub::new(&config.hub);
        let orchestrator = TaskOrchestrator::from_parts(
            config,
            Arc::clone(&store) as Arc<dyn TaskStore>,
            registry,
            hub.clone(),
        )
        .unwrap();

        Self {
            orchestrator,
            store,
            hub,
            temp,
        }
    }

    pub fn output_path(&self, id: TaskId) -> PathBuf {
        self.temp.path().join("downloads").join(format!("{id}.mp3"))
    }

    /// Poll until the task reaches a terminal status
    pub async fn wait_terminal(&self, id: TaskId) -> Task {
        for _ in 0..500 {
            if let Some(task) = self.store.get(id)
                && task.status.is_terminal()
            {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {id} did not finish: {:?}", self.store.get(id));
    }
}

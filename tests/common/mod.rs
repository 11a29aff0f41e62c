//! Common test utilities for media-dl integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use media_dl::{
    AudioQuality, Config, Connection, ConnectionId, HubMessage, Metadata, ProgressEvent,
    ProgressStream, Strategy, Task, TaskId, TaskOrchestrator,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;

/// Strategy returning a fixed list of events
pub struct MockStrategy {
    name: String,
    accepts: bool,
    events: Vec<ProgressEvent>,
    writes_output: bool,
    gate: Option<Arc<Semaphore>>,
    pub downloads: AtomicUsize,
}

impl MockStrategy {
    /// Accepting strategy that writes its output and completes
    pub fn succeeding(name: &str) -> Self {
        Self {
            name: name.to_string(),
            accepts: true,
            events: vec![
                ProgressEvent::downloading(25.0),
                ProgressEvent::downloading(75.0),
                ProgressEvent::processing(100.0),
                ProgressEvent::complete(),
            ],
            writes_output: true,
            gate: None,
            downloads: AtomicUsize::new(0),
        }
    }

    /// Strategy whose `validate_url` always says no
    pub fn rejecting(name: &str) -> Self {
        Self {
            accepts: false,
            ..Self::succeeding(name)
        }
    }

    /// Accepting strategy that emits a single error event
    pub fn failing(name: &str, error: &str) -> Self {
        Self {
            events: vec![ProgressEvent::downloading(5.0), ProgressEvent::error(error)],
            writes_output: false,
            ..Self::succeeding(name)
        }
    }

    /// Accepting strategy that reports completion without producing a file
    pub fn completing_without_output(name: &str) -> Self {
        Self {
            events: vec![ProgressEvent::downloading(50.0), ProgressEvent::complete()],
            writes_output: false,
            ..Self::succeeding(name)
        }
    }

    /// Hold every download until `gate` hands out a permit
    pub fn gated(mut self, gate: &Arc<Semaphore>) -> Self {
        self.gate = Some(Arc::clone(gate));
        self
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Strategy for MockStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn validate_url(&self, _url: &str) -> bool {
        self.accepts
    }

    async fn get_info(&self, _url: &str) -> Option<Metadata> {
        Some(Metadata {
            title: Some(format!("{} title", self.name)),
            author: Some("Test Artist".to_string()),
            duration: Some(212.0),
            thumbnail: None,
        })
    }

    async fn download(&self, _url: &str, output: &Path, _quality: AudioQuality) -> ProgressStream {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if self.writes_output {
            std::fs::write(output, b"ID3 fake audio").unwrap();
        }
        Box::pin(futures::stream::iter(self.events.clone()))
    }

    async fn cleanup(&self) {}
}

/// Connection that records every message it receives
pub struct RecordingObserver {
    id: ConnectionId,
    open: AtomicBool,
    fail_sends: AtomicBool,
    received: Mutex<Vec<HubMessage>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::next(),
            open: AtomicBool::new(true),
            fail_sends: AtomicBool::new(false),
            received: Mutex::new(Vec::new()),
        })
    }

    /// Make every later send fail
    pub fn break_channel(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    pub fn received(&self) -> Vec<HubMessage> {
        self.received.lock().unwrap().clone()
    }

    /// Received notices, in order
    pub fn notices(&self) -> Vec<String> {
        self.received()
            .into_iter()
            .filter_map(|m| match m {
                HubMessage::Notice { message, .. } => Some(message),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Connection for RecordingObserver {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&self, message: &HubMessage) -> media_dl::Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(media_dl::Error::Connection("peer went away".to_string()));
        }
        self.received.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

/// Config rooted in `dir`, with failover delay disabled and no PATH lookup
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.download.download_dir = dir.join("downloads");
    config.download.temp_dir = dir.join("temp");
    config.persistence.database_path = dir.join("media-dl.db");
    config.strategy.failover_delay = Duration::ZERO;
    config.tools.search_path = false;
    config
}

/// SQLite-backed orchestrator with `strategies` registered in order
pub async fn orchestrator_with(strategies: Vec<Arc<dyn Strategy>>) -> (TaskOrchestrator, TempDir) {
    orchestrator_with_config(strategies, |_| {}).await
}

/// Like [`orchestrator_with`], with a chance to adjust the config first
pub async fn orchestrator_with_config(
    strategies: Vec<Arc<dyn Strategy>>,
    adjust: impl FnOnce(&mut Config),
) -> (TaskOrchestrator, TempDir) {
    let temp = tempfile::tempdir().unwrap();
    let mut config = test_config(temp.path());
    adjust(&mut config);
    let orchestrator = TaskOrchestrator::new(config).await.unwrap();
    for strategy in strategies {
        orchestrator.register_strategy(strategy).await;
    }
    (orchestrator, temp)
}

/// Poll `get_task` until the task reaches a terminal status
pub async fn wait_for_terminal(orchestrator: &TaskOrchestrator, id: TaskId) -> Task {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let task = orchestrator.get_task(id).await.unwrap().unwrap();
        if task.status.is_terminal() {
            return task;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "task {id} stuck in {}",
            task.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

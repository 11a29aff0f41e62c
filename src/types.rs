//! Core types for media-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Unique identifier for a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a new random TaskId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID
    pub fn get(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TaskId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Task lifecycle status
///
/// ```text
/// Pending -> Downloading -> Processing -> Complete
///    |           |              |
///    +-----------+--------------+--> Error | Cancelled
/// ```
///
/// `Processing -> Downloading` is always a legal transition. The
/// orchestrator writes it when it fails over to another strategy after a
/// conversion step failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created, waiting for a concurrency slot
    Pending,
    /// A strategy is fetching the media
    Downloading,
    /// Download finished, converting/finalising the artifact
    Processing,
    /// Output verified and recorded
    Complete,
    /// All strategies failed
    Error,
    /// Cancelled by request
    Cancelled,
}

impl TaskStatus {
    /// Convert integer status code to TaskStatus
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => TaskStatus::Pending,
            1 => TaskStatus::Downloading,
            2 => TaskStatus::Processing,
            3 => TaskStatus::Complete,
            4 => TaskStatus::Error,
            5 => TaskStatus::Cancelled,
            _ => TaskStatus::Error, // Unknown codes surface as failures
        }
    }

    /// Convert TaskStatus to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Downloading => 1,
            TaskStatus::Processing => 2,
            TaskStatus::Complete => 3,
            TaskStatus::Error => 4,
            TaskStatus::Cancelled => 5,
        }
    }

    /// Lowercase wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Downloading => "downloading",
            TaskStatus::Processing => "processing",
            TaskStatus::Complete => "complete",
            TaskStatus::Error => "error",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Complete | TaskStatus::Error | TaskStatus::Cancelled
        )
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Self-transitions on the two working states are allowed so that
    /// progress updates can be written without changing status.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Pending, Downloading | Error | Cancelled) => true,
            (Downloading, Downloading | Processing | Error | Cancelled) => true,
            (Processing, Processing | Downloading | Complete | Error | Cancelled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested audio bitrate
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioQuality {
    /// 320 kbps
    #[serde(rename = "320k")]
    High,
    /// 192 kbps
    #[default]
    #[serde(rename = "192k")]
    Medium,
    /// 128 kbps
    #[serde(rename = "128k")]
    Low,
}

impl AudioQuality {
    /// Wire/storage representation ("192k")
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioQuality::High => "320k",
            AudioQuality::Medium => "192k",
            AudioQuality::Low => "128k",
        }
    }

    /// Bitrate in kbps
    pub fn kbps(&self) -> u32 {
        match self {
            AudioQuality::High => 320,
            AudioQuality::Medium => 192,
            AudioQuality::Low => 128,
        }
    }
}

impl std::fmt::Display for AudioQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AudioQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "320k" | "320" => Ok(AudioQuality::High),
            "192k" | "192" => Ok(AudioQuality::Medium),
            "128k" | "128" => Ok(AudioQuality::Low),
            other => Err(format!("unsupported audio quality: {other}")),
        }
    }
}

/// Media metadata returned by a strategy's info lookup
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Track or video title
    pub title: Option<String>,
    /// Uploader, channel or artist
    pub author: Option<String>,
    /// Duration in seconds
    pub duration: Option<f64>,
    /// Thumbnail URL
    pub thumbnail: Option<String>,
}

impl Metadata {
    /// A lookup that produced neither a title nor an author is treated as a failure
    pub fn is_empty(&self) -> bool {
        self.title.as_deref().is_none_or(str::is_empty)
            && self.author.as_deref().is_none_or(str::is_empty)
    }
}

/// A unit of work: one URL resolved into one audio file
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID
    pub id: TaskId,
    /// Source URL
    pub url: String,
    /// Requested quality
    pub quality: AudioQuality,
    /// Title from metadata ("Unknown" if missing)
    pub title: String,
    /// Author from metadata ("Unknown" if missing)
    pub author: String,
    /// Current status
    pub status: TaskStatus,
    /// Progress percentage (0.0 to 100.0)
    pub progress: f32,
    /// Last error text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Produced artifact, set only on completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    /// Name of the strategy currently (or last) used
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    /// When the task was created
    pub created_at: DateTime<Utc>,
    /// When the task was last modified
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Build a fresh `Pending` task from resolved metadata
    pub fn new(url: impl Into<String>, quality: AudioQuality, metadata: &Metadata) -> Self {
        let now = Utc::now();
        let or_unknown = |value: &Option<String>| {
            value
                .as_deref()
                .filter(|v| !v.is_empty())
                .unwrap_or("Unknown")
                .to_string()
        };
        Self {
            id: TaskId::new(),
            url: url.into(),
            quality,
            title: or_unknown(&metadata.title),
            author: or_unknown(&metadata.author),
            status: TaskStatus::Pending,
            progress: 0.0,
            error: None,
            output_path: None,
            strategy: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update applied to a task and written through to the store.
///
/// Only `Some` fields are changed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TaskUpdate {
    /// New status
    pub status: Option<TaskStatus>,
    /// New progress percentage
    pub progress: Option<f32>,
    /// Error text
    pub error: Option<String>,
    /// Output artifact path
    pub output_path: Option<PathBuf>,
    /// Active strategy name
    pub strategy: Option<String>,
}

impl TaskUpdate {
    /// Update that only changes the status
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Set progress
    pub fn with_progress(mut self, progress: f32) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Set error text
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Set strategy name
    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    /// Set output path
    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    /// Apply the provided fields to an in-memory task
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(progress) = self.progress {
            task.progress = progress;
        }
        if let Some(error) = &self.error {
            task.error = Some(error.clone());
        }
        if let Some(path) = &self.output_path {
            task.output_path = Some(path.clone());
        }
        if let Some(strategy) = &self.strategy {
            task.strategy = Some(strategy.clone());
        }
        task.updated_at = Utc::now();
    }
}

/// Status carried by a strategy progress event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    /// Fetching media
    Downloading,
    /// Converting / post-processing
    Processing,
    /// Finished; output should exist at the declared path
    Complete,
    /// Strategy failed; `error` holds the reason
    Error,
}

/// One update yielded by a strategy's download stream
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Event status
    pub status: ProgressStatus,
    /// Progress percentage (0.0 to 100.0)
    pub progress: f32,
    /// Error text for `Error` events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Human-readable detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProgressEvent {
    fn with_status(status: ProgressStatus, progress: f32) -> Self {
        Self {
            status,
            progress,
            error: None,
            detail: None,
        }
    }

    /// Downloading at `progress` percent
    pub fn downloading(progress: f32) -> Self {
        Self::with_status(ProgressStatus::Downloading, progress)
    }

    /// Processing at `progress` percent
    pub fn processing(progress: f32) -> Self {
        Self::with_status(ProgressStatus::Processing, progress)
    }

    /// Completed
    pub fn complete() -> Self {
        Self::with_status(ProgressStatus::Complete, 100.0)
    }

    /// Failed with `error`
    pub fn error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::with_status(ProgressStatus::Error, 0.0)
        }
    }

    /// Attach a human-readable detail
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Artifact description sent with the final progress message
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Size in bytes
    pub size: u64,
    /// Location of the artifact
    pub path: PathBuf,
}

/// Optional details attached to a progress message
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressDetails {
    /// Strategy producing the progress
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    /// Human-readable status line
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    /// Artifact info on completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_info: Option<FileInfo>,
}

/// Message delivered to observer connections
///
/// Serialized with a `type` discriminator so clients can tell control
/// messages from progress messages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubMessage {
    /// Task progress or status change
    Progress {
        /// Task ID
        task_id: TaskId,
        /// Progress percentage (0.0 to 100.0)
        progress: f32,
        /// Task status
        status: TaskStatus,
        /// Strategy / status line / file info
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<ProgressDetails>,
        /// Error text for failed tasks
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Acknowledgement sent right after registration
    ConnectionStatus {
        /// Task the connection observes
        task_id: TaskId,
        /// Always "connected"
        status: String,
        /// When the connection was registered
        timestamp: DateTime<Utc>,
    },

    /// Keepalive probe
    Ping {
        /// When the probe was sent
        timestamp: DateTime<Utc>,
    },

    /// Reply to a client ping
    Pong {
        /// When the reply was sent
        timestamp: DateTime<Utc>,
    },

    /// Hub-wide notice (e.g. server shutdown)
    Notice {
        /// Notice text
        message: String,
        /// When the notice was sent
        timestamp: DateTime<Utc>,
    },
}

impl HubMessage {
    /// Connection acknowledgement for `task_id`
    pub fn connected(task_id: TaskId) -> Self {
        HubMessage::ConnectionStatus {
            task_id,
            status: "connected".to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Keepalive ping
    pub fn ping() -> Self {
        HubMessage::Ping {
            timestamp: Utc::now(),
        }
    }

    /// Reply to a client ping
    pub fn pong() -> Self {
        HubMessage::Pong {
            timestamp: Utc::now(),
        }
    }

    /// Hub-wide notice
    pub fn notice(message: impl Into<String>) -> Self {
        HubMessage::Notice {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Progress message reflecting the current task snapshot
    pub fn snapshot(task: &Task) -> Self {
        HubMessage::Progress {
            task_id: task.id,
            progress: task.progress,
            status: task.status,
            details: task.strategy.as_ref().map(|s| ProgressDetails {
                strategy: Some(s.clone()),
                ..Default::default()
            }),
            error: task.error.clone().filter(|_| task.status == TaskStatus::Error),
        }
    }
}

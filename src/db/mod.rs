//! Database layer for media-dl
//!
//! The orchestrator talks to persistence only through the [`TaskStore`]
//! trait. [`Database`] is the SQLite implementation.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] — Database lifecycle, schema migrations
//! - [`tasks`] — Task CRUD ([`TaskStore`] implementation)
//! - [`state`] — Runtime state (shutdown tracking)

use crate::error::{DatabaseError, Error, Result};
use crate::types::{AudioQuality, Task, TaskId, TaskStatus, TaskUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};
use std::path::PathBuf;

mod migrations;
mod state;
mod tasks;

/// Persistence collaborator for task records
///
/// Implementations must give read-after-write consistency for the fields
/// just written: a `find_by_id` after a successful `update` returns the
/// updated values.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task record
    async fn insert(&self, task: &Task) -> Result<()>;

    /// Apply a partial update; unknown IDs are an error
    async fn update(&self, id: TaskId, update: &TaskUpdate) -> Result<()>;

    /// Load a task by ID
    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>>;

    /// All tasks that have not reached a terminal status, oldest first
    async fn find_unfinished(&self) -> Result<Vec<Task>>;

    /// Record that a session has started
    async fn set_clean_start(&self) -> Result<()> {
        Ok(())
    }

    /// Record that the session is shutting down gracefully
    async fn set_clean_shutdown(&self) -> Result<()> {
        Ok(())
    }

    /// Whether the previous session ended without a graceful shutdown
    async fn was_unclean_shutdown(&self) -> Result<bool> {
        Ok(false)
    }
}

/// Task record as stored in SQLite
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    /// UUID in hyphenated form
    pub id: String,
    /// Source URL
    pub url: String,
    /// Quality ("192k")
    pub quality: String,
    /// Title
    pub title: String,
    /// Author
    pub author: String,
    /// Status code (see [`TaskStatus::to_i32`])
    pub status: i32,
    /// Progress percentage
    pub progress: f64,
    /// Last error text
    pub error: Option<String>,
    /// Output artifact path
    pub output_path: Option<String>,
    /// Active strategy name
    pub strategy: Option<String>,
    /// Unix timestamp (milliseconds) of creation
    pub created_at: i64,
    /// Unix timestamp (milliseconds) of last update
    pub updated_at: i64,
}

impl TryFrom<TaskRow> for Task {
    type Error = Error;

    fn try_from(row: TaskRow) -> Result<Self> {
        let id = row.id.parse::<TaskId>().map_err(|e| {
            Error::Database(DatabaseError::CorruptRecord(format!(
                "invalid task id '{}': {}",
                row.id, e
            )))
        })?;
        let quality = row.quality.parse::<AudioQuality>().map_err(|e| {
            Error::Database(DatabaseError::CorruptRecord(format!(
                "task {}: {}",
                row.id, e
            )))
        })?;

        Ok(Task {
            id,
            url: row.url,
            quality,
            title: row.title,
            author: row.author,
            status: TaskStatus::from_i32(row.status),
            progress: row.progress as f32,
            error: row.error,
            output_path: row.output_path.map(PathBuf::from),
            strategy: row.strategy,
            created_at: from_millis(row.created_at),
            updated_at: from_millis(row.updated_at),
        })
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Database handle for media-dl
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

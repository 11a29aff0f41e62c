//! Task lookup and cancellation.

use crate::error::Result;
use crate::types::{Task, TaskId, TaskStatus, TaskUpdate};

use super::TaskOrchestrator;
use super::state::{Announcement, Applied};

impl TaskOrchestrator {
    /// Look up a task, preferring the in-memory snapshot
    ///
    /// Falls back to the store; a stored task that has not finished is
    /// re-admitted to the working set so it can be cancelled. Returns
    /// `Ok(None)` for unknown IDs.
    pub async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        if let Some(task) = self.active_snapshot(id).await {
            return Ok(Some(task));
        }

        let Some(task) = self.store.find_by_id(id).await? else {
            return Ok(None);
        };

        if !task.status.is_terminal() {
            tracing::debug!(task_id = %id, status = %task.status, "Re-admitting stored task");
            self.admit(task.clone()).await;
            // Another caller may have admitted a newer snapshot first.
            return Ok(self.active_snapshot(id).await.or(Some(task)));
        }
        Ok(Some(task))
    }

    /// Cancel a task that has not finished yet
    ///
    /// The `Cancelled` status is persisted and published before this returns.
    /// A queued task leaves the queue; a running download is abandoned at its
    /// next progress event and its partial output removed.
    ///
    /// Returns `Ok(false)` if the task is not in the working set or already
    /// finished.
    pub async fn cancel_task(&self, id: TaskId) -> Result<bool> {
        let token = {
            let active = self.state.active.lock().await;
            match active.get(&id) {
                Some(entry) if !entry.task.status.is_terminal() => entry.cancel.clone(),
                _ => return Ok(false),
            }
        };

        let applied = self
            .apply_update(
                id,
                TaskUpdate::status(TaskStatus::Cancelled),
                Announcement::message("Download cancelled"),
            )
            .await?;

        match applied {
            Applied::Written(_) => {
                token.cancel();
                self.release_if_terminal(id).await;
                tracing::info!(task_id = %id, "Task cancelled");
                Ok(true)
            }
            Applied::Skipped => Ok(false),
        }
    }
}

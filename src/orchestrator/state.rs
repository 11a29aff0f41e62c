//! Serialized write-through task updates.
//!
//! Every status or progress change goes through [`TaskOrchestrator::apply_update`]:
//! validate the transition, persist, update the in-memory snapshot, then
//! publish to observers. The per-task write gate keeps that sequence atomic
//! with respect to other writers of the same task, so observers see updates
//! in the order they were persisted.

use crate::error::{Result, TaskError};
use crate::types::{FileInfo, HubMessage, ProgressDetails, Task, TaskId, TaskStatus, TaskUpdate};

use super::TaskOrchestrator;

/// Extra text attached to the progress message of an update
#[derive(Debug, Default)]
pub(crate) struct Announcement {
    pub(crate) status_message: Option<String>,
    pub(crate) file_info: Option<FileInfo>,
}

impl Announcement {
    pub(crate) fn message(text: impl Into<String>) -> Self {
        Self {
            status_message: Some(text.into()),
            file_info: None,
        }
    }

    pub(crate) fn with_file(mut self, info: FileInfo) -> Self {
        self.file_info = Some(info);
        self
    }
}

/// Result of [`TaskOrchestrator::apply_update`]
#[derive(Debug)]
pub(crate) enum Applied {
    /// Written and published; holds the new snapshot
    Written(Task),
    /// The task left the working set or already reached a terminal status
    Skipped,
}

impl TaskOrchestrator {
    /// Persist `update` for `id`, then publish the resulting snapshot
    ///
    /// Returns an error for illegal transitions out of non-terminal states
    /// and for persistence failures; in both cases memory is left unchanged
    /// and nothing is published.
    pub(crate) async fn apply_update(
        &self,
        id: TaskId,
        update: TaskUpdate,
        announcement: Announcement,
    ) -> Result<Applied> {
        let gate = {
            let active = self.state.active.lock().await;
            match active.get(&id) {
                Some(entry) => std::sync::Arc::clone(&entry.write_gate),
                None => return Ok(Applied::Skipped),
            }
        };
        let _write = gate.lock().await;

        let mut next = {
            let active = self.state.active.lock().await;
            let Some(entry) = active.get(&id) else {
                return Ok(Applied::Skipped);
            };
            let current = entry.task.status;
            if let Some(status) = update.status
                && !current.can_transition_to(status)
            {
                if current.is_terminal() {
                    tracing::debug!(task_id = %id, from = %current, to = %status, "Ignoring update for finished task");
                    return Ok(Applied::Skipped);
                }
                return Err(TaskError::InvalidTransition {
                    id,
                    from: current,
                    to: status,
                }
                .into());
            }
            entry.task.clone()
        };
        update.apply_to(&mut next);

        self.store.update(id, &update).await.map_err(|e| {
            tracing::error!(task_id = %id, error = %e, "Failed to persist task update");
            e
        })?;

        {
            let mut active = self.state.active.lock().await;
            if let Some(entry) = active.get_mut(&id) {
                entry.task = next.clone();
            }
        }

        let delivered = self
            .hub
            .publish(id, &progress_message(&next, announcement))
            .await;
        tracing::trace!(task_id = %id, status = %next.status, progress = next.progress, delivered, "Task update published");

        Ok(Applied::Written(next))
    }

    /// Current in-memory snapshot of `id`
    pub(crate) async fn active_snapshot(&self, id: TaskId) -> Option<Task> {
        self.state
            .active
            .lock()
            .await
            .get(&id)
            .map(|entry| entry.task.clone())
    }
}

fn progress_message(task: &Task, announcement: Announcement) -> HubMessage {
    HubMessage::Progress {
        task_id: task.id,
        progress: task.progress,
        status: task.status,
        details: Some(ProgressDetails {
            strategy: task.strategy.clone(),
            status_message: announcement.status_message,
            file_info: announcement.file_info,
        }),
        error: task
            .error
            .clone()
            .filter(|_| task.status == TaskStatus::Error),
    }
}

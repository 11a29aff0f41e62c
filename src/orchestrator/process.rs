//! Per-task download execution.
//!
//! A spawned processing loop waits for a download slot, then drives the
//! selected strategy's progress stream, translating events into task
//! updates. Cancellation and shutdown are checked once per event.

use crate::error::Result;
use crate::strategy::SelectedStrategy;
use crate::types::{
    AudioQuality, FileInfo, ProgressEvent, ProgressStatus, TaskId, TaskStatus, TaskUpdate,
};
use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::state::{Announcement, Applied};
use super::{InFlightGuard, TaskOrchestrator};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// How one strategy attempt ended
#[derive(Debug)]
pub(crate) enum AttemptOutcome {
    /// Output verified and the task marked complete
    Completed,
    /// Strategy error or failed output check; holds the reason
    Failed(String),
    /// The task was cancelled
    Cancelled,
    /// Shutdown started; the task stays resumable
    Interrupted,
}

impl TaskOrchestrator {
    /// Run the processing loop for `id` in the background
    pub(crate) fn spawn_processing(&self, id: TaskId) {
        let orchestrator = self.clone();
        let guard = InFlightGuard::enter(&self.state.in_flight);

        tokio::spawn(async move {
            let _guard = guard;
            match orchestrator.process(id).await {
                Ok(()) => orchestrator.release_if_terminal(id).await,
                Err(e) => {
                    // The stored status stays non-terminal, so a restart resumes it.
                    tracing::error!(task_id = %id, error = %e, "Task processing aborted");
                    orchestrator.evict(id).await;
                }
            }
        });
    }

    async fn process(&self, id: TaskId) -> Result<()> {
        let cancel = {
            let active = self.state.active.lock().await;
            match active.get(&id) {
                Some(entry) => entry.cancel.clone(),
                None => return Ok(()),
            }
        };

        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(task_id = %id, "Task cancelled while queued");
                return Ok(());
            }
            _ = self.state.shutdown.cancelled() => return Ok(()),
            permit = Arc::clone(&self.state.limiter).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return Ok(()),
            },
        };

        let Some(task) = self.active_snapshot(id).await else {
            return Ok(());
        };
        if task.status.is_terminal() || cancel.is_cancelled() {
            return Ok(());
        }

        let Some(mut selected) = self.registry.select(&task.url).await else {
            tracing::warn!(task_id = %id, url = %task.url, "No strategy accepts task URL");
            self.fail_task(id, "No suitable download strategy found").await?;
            return Ok(());
        };

        let started = self
            .apply_update(
                id,
                TaskUpdate::status(TaskStatus::Downloading)
                    .with_progress(0.0)
                    .with_strategy(selected.strategy.name()),
                Announcement::message(format!(
                    "Downloading audio using {} (0.0%)",
                    selected.strategy.name()
                )),
            )
            .await?;
        if matches!(started, Applied::Skipped) {
            return Ok(());
        }
        tracing::info!(task_id = %id, strategy = selected.strategy.name(), "Download started");

        let output = self.output_path(id);
        let mut generic_failures = 0;

        loop {
            let outcome = self
                .run_attempt(id, &selected, &task.url, &output, task.quality, &cancel)
                .await?;

            match outcome {
                AttemptOutcome::Completed => return Ok(()),
                AttemptOutcome::Cancelled => {
                    self.discard_attempt(&selected, &output).await;
                    tracing::info!(task_id = %id, "Download abandoned after cancellation");
                    return Ok(());
                }
                AttemptOutcome::Interrupted => {
                    self.discard_attempt(&selected, &output).await;
                    tracing::info!(task_id = %id, "Download interrupted by shutdown; will resume on restart");
                    return Ok(());
                }
                AttemptOutcome::Failed(reason) => {
                    remove_partial(&output).await;
                    let next = self
                        .failover(id, &task.url, &selected, &reason, &mut generic_failures, &cancel)
                        .await?;
                    match next {
                        Some(next) => selected = next,
                        None => {
                            self.discard_attempt(&selected, &output).await;
                            self.fail_task(id, &reason).await?;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Consume one strategy's progress stream to its end
    async fn run_attempt(
        &self,
        id: TaskId,
        selected: &SelectedStrategy,
        url: &str,
        output: &Path,
        quality: AudioQuality,
        cancel: &CancellationToken,
    ) -> Result<AttemptOutcome> {
        if cancel.is_cancelled() {
            return Ok(AttemptOutcome::Cancelled);
        }
        if self.state.shutdown.is_cancelled() {
            return Ok(AttemptOutcome::Interrupted);
        }

        let name = selected.strategy.name().to_string();
        let mut stream = selected.strategy.download(url, output, quality).await;
        let mut last_progress = 0.0_f32;

        loop {
            let next = stream.next().await;

            if cancel.is_cancelled() {
                return Ok(AttemptOutcome::Cancelled);
            }
            if self.state.shutdown.is_cancelled() {
                return Ok(AttemptOutcome::Interrupted);
            }

            let Some(event) = next else {
                return Ok(AttemptOutcome::Failed(
                    "strategy ended the stream without completing".to_string(),
                ));
            };

            match event.status {
                ProgressStatus::Downloading | ProgressStatus::Processing => {
                    last_progress = clamp_progress(event.progress).max(last_progress);
                    self.report_progress(id, &name, &event, last_progress)
                        .await?;
                }
                ProgressStatus::Complete => {
                    drop(stream);
                    return match verify_output(output).await {
                        Ok(size) => self.finish_success(id, selected, output, size).await,
                        Err(reason) => Ok(AttemptOutcome::Failed(reason)),
                    };
                }
                ProgressStatus::Error => {
                    return Ok(AttemptOutcome::Failed(
                        event
                            .error
                            .unwrap_or_else(|| format!("{} reported an unspecified error", name)),
                    ));
                }
            }
        }
    }

    async fn report_progress(
        &self,
        id: TaskId,
        strategy: &str,
        event: &ProgressEvent,
        progress: f32,
    ) -> Result<()> {
        let (status, default_message) = match event.status {
            ProgressStatus::Processing => (
                TaskStatus::Processing,
                format!("Processing audio file with {}", strategy),
            ),
            _ => (
                TaskStatus::Downloading,
                format!("Downloading audio using {} ({:.1}%)", strategy, progress),
            ),
        };
        let message = event.detail.clone().unwrap_or(default_message);

        self.apply_update(
            id,
            TaskUpdate::status(status).with_progress(progress),
            Announcement::message(message),
        )
        .await?;
        Ok(())
    }

    /// Mark a verified download complete
    ///
    /// A task cancelled after the strategy finished never reaches `Complete`;
    /// the attempt is reported as cancelled so its artifact is discarded.
    async fn finish_success(
        &self,
        id: TaskId,
        selected: &SelectedStrategy,
        output: &Path,
        size: u64,
    ) -> Result<AttemptOutcome> {
        let name = selected.strategy.name();

        let current = self.active_snapshot(id).await.map(|t| t.status);
        if current == Some(TaskStatus::Downloading) {
            let processing = self
                .apply_update(
                    id,
                    TaskUpdate::status(TaskStatus::Processing).with_progress(100.0),
                    Announcement::message(format!("Processing audio file with {}", name)),
                )
                .await?;
            if matches!(processing, Applied::Skipped) {
                return Ok(self.abandoned_outcome());
            }
        }

        let applied = self
            .apply_update(
                id,
                TaskUpdate::status(TaskStatus::Complete)
                    .with_progress(100.0)
                    .with_output(output),
                Announcement::message(format!(
                    "Download complete! File size: {:.2} MB",
                    size as f64 / BYTES_PER_MB
                ))
                .with_file(FileInfo {
                    size,
                    path: output.to_path_buf(),
                }),
            )
            .await?;

        let Applied::Written(task) = applied else {
            tracing::debug!(task_id = %id, "Task finished elsewhere before completion was recorded");
            return Ok(self.abandoned_outcome());
        };

        self.registry.mark_success(selected.index).await;
        tracing::info!(
            task_id = %id,
            strategy = name,
            size_bytes = size,
            path = %output.display(),
            title = %task.title,
            "Download complete"
        );

        let strategy = Arc::clone(&selected.strategy);
        tokio::spawn(async move { strategy.cleanup().await });
        Ok(AttemptOutcome::Completed)
    }

    fn abandoned_outcome(&self) -> AttemptOutcome {
        if self.state.shutdown.is_cancelled() {
            AttemptOutcome::Interrupted
        } else {
            AttemptOutcome::Cancelled
        }
    }

    /// Persist a terminal `Error` with `reason`
    pub(crate) async fn fail_task(&self, id: TaskId, reason: &str) -> Result<()> {
        let applied = self
            .apply_update(
                id,
                TaskUpdate::status(TaskStatus::Error).with_error(reason),
                Announcement::message(format!("Download failed: {}", reason)),
            )
            .await?;
        if matches!(applied, Applied::Written(_)) {
            tracing::warn!(task_id = %id, error = %reason, "Task failed");
        }
        Ok(())
    }

    async fn discard_attempt(&self, selected: &SelectedStrategy, output: &Path) {
        selected.strategy.cleanup().await;
        remove_partial(output).await;
    }
}

fn clamp_progress(progress: f32) -> f32 {
    if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 100.0)
    }
}

/// The artifact must be a non-empty regular file
async fn verify_output(output: &Path) -> std::result::Result<u64, String> {
    match tokio::fs::metadata(output).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(meta.len()),
        Ok(meta) if meta.is_file() => Err(format!(
            "Strategy reported success but output file is empty: {}",
            output.display()
        )),
        Ok(_) => Err(format!(
            "Strategy reported success but output is not a regular file: {}",
            output.display()
        )),
        Err(_) => Err(format!(
            "Strategy reported success but output file is missing: {}",
            output.display()
        )),
    }
}

async fn remove_partial(output: &Path) {
    match tokio::fs::remove_file(output).await {
        Ok(()) => tracing::debug!(path = %output.display(), "Removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %output.display(), error = %e, "Failed to remove partial output"),
    }
}

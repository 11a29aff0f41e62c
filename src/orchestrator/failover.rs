//! Switching a failing task to the next strategy.

use crate::error::Result;
use crate::strategy::{ErrorClass, SelectedStrategy};
use crate::types::{TaskId, TaskStatus, TaskUpdate};
use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::TaskOrchestrator;
use super::state::{Announcement, Applied};

impl TaskOrchestrator {
    /// Record `error` against the current strategy and pick the next one
    ///
    /// Critical and protection errors fail over at once and do not count
    /// towards `max_strategy_attempts`; other errors do. Returns `None` when
    /// the task should be marked failed: attempts exhausted, no further
    /// healthy strategy accepts the URL, or the task stopped during the delay.
    pub(crate) async fn failover(
        &self,
        id: TaskId,
        url: &str,
        current: &SelectedStrategy,
        error: &str,
        generic_failures: &mut u32,
        cancel: &CancellationToken,
    ) -> Result<Option<SelectedStrategy>> {
        let class = self.registry.mark_failure(current.index, error).await;
        let failed_name = current.strategy.name().to_string();

        match class {
            ErrorClass::Critical | ErrorClass::Protection => {
                tracing::warn!(
                    task_id = %id,
                    strategy = %failed_name,
                    ?class,
                    error = %error,
                    "Strategy blocked, switching immediately"
                );
            }
            ErrorClass::Transient => {
                *generic_failures += 1;
                let cap = self.config.strategy.max_strategy_attempts;
                if *generic_failures >= cap {
                    tracing::warn!(
                        task_id = %id,
                        strategy = %failed_name,
                        attempts = *generic_failures,
                        error = %error,
                        "Strategy attempts exhausted"
                    );
                    return Ok(None);
                }
                tracing::warn!(
                    task_id = %id,
                    strategy = %failed_name,
                    attempt = *generic_failures,
                    max_attempts = cap,
                    error = %error,
                    "Strategy failed, trying next"
                );
            }
        }

        let Some(next) = self.registry.next(url, current.index).await else {
            tracing::warn!(task_id = %id, url, "No further strategy accepts this URL");
            return Ok(None);
        };

        let current_strategy = std::sync::Arc::clone(&current.strategy);
        tokio::spawn(async move { current_strategy.cleanup().await });

        let delay = add_jitter(self.config.strategy.failover_delay);
        if !delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(Some(next)),
                _ = self.state.shutdown.cancelled() => return Ok(Some(next)),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let next_name = next.strategy.name().to_string();
        let applied = self
            .apply_update(
                id,
                TaskUpdate::status(TaskStatus::Downloading)
                    .with_progress(0.0)
                    .with_strategy(next_name.as_str()),
                Announcement::message(format!("Trying different download method: {}", next_name)),
            )
            .await?;

        if matches!(applied, Applied::Written(_)) {
            tracing::info!(task_id = %id, from = %failed_name, to = %next_name, "Failed over to next strategy");
        }
        Ok(Some(next))
    }
}

/// Random factor in [1, 2) applied to the failover delay
fn add_jitter(delay: Duration) -> Duration {
    if delay.is_zero() {
        return delay;
    }
    let factor: f64 = rand::thread_rng().gen_range(1.0..2.0);
    delay.mul_f64(factor)
}

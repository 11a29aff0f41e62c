//! Task creation: URL validation, metadata lookup and admission.

use crate::error::{Error, Result};
use crate::strategy::SelectedStrategy;
use crate::types::{AudioQuality, Metadata, Task};
use std::sync::atomic::Ordering;

use super::TaskOrchestrator;

impl TaskOrchestrator {
    /// Create a task for `url` and schedule it for processing
    ///
    /// Resolves metadata through the first accepting strategy, failing over
    /// to the next one when a lookup comes back empty or times out. The task
    /// is persisted before this returns; processing continues in the
    /// background and is observable through the hub.
    ///
    /// # Errors
    ///
    /// - [`Error::ShuttingDown`] once shutdown has started
    /// - [`Error::InvalidUrl`] if `url` does not parse
    /// - [`Error::NoStrategy`] if no healthy strategy accepts `url`
    /// - [`Error::MetadataUnavailable`] if every lookup attempt failed
    /// - a persistence error if the task record could not be written
    pub async fn create_task(&self, url: &str, quality: Option<AudioQuality>) -> Result<Task> {
        if !self.state.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let url = url.trim();
        url::Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{}: {}", url, e)))?;

        let quality = quality.unwrap_or(self.config.download.default_quality);
        let metadata = self.resolve_metadata(url).await?;

        let task = Task::new(url, quality, &metadata);
        self.store.insert(&task).await.map_err(|e| {
            tracing::error!(task_id = %task.id, error = %e, "Failed to persist new task");
            e
        })?;

        self.admit(task.clone()).await;
        self.spawn_processing(task.id);

        tracing::info!(
            task_id = %task.id,
            url = %task.url,
            title = %task.title,
            quality = %task.quality,
            "Task created"
        );
        Ok(task)
    }

    async fn resolve_metadata(&self, url: &str) -> Result<Metadata> {
        let max_attempts = self.config.download.max_info_attempts;
        let lookup_timeout = self.config.download.info_timeout;

        let mut candidate: Option<SelectedStrategy> = self.registry.select(url).await;
        if candidate.is_none() {
            return Err(Error::NoStrategy {
                url: url.to_string(),
            });
        }

        let mut attempts = 0;
        let mut last_error = String::from("no strategy attempted");

        while let Some(selected) = candidate {
            if attempts >= max_attempts {
                break;
            }
            attempts += 1;
            let name = selected.strategy.name().to_string();

            let failure =
                match tokio::time::timeout(lookup_timeout, selected.strategy.get_info(url)).await {
                    Ok(Some(metadata)) if !metadata.is_empty() => {
                        tracing::debug!(url, strategy = %name, attempts, "Metadata resolved");
                        return Ok(metadata);
                    }
                    Ok(_) => format!("{}: Failed to get video information", name),
                    Err(_) => format!(
                        "{}: metadata lookup timed out after {}s",
                        name,
                        lookup_timeout.as_secs()
                    ),
                };

            tracing::warn!(url, strategy = %name, attempts, error = %failure, "Metadata lookup failed");
            self.registry.mark_failure(selected.index, &failure).await;
            last_error = failure;
            candidate = self.registry.next(url, selected.index).await;
        }

        Err(Error::MetadataUnavailable {
            url: url.to_string(),
            attempts,
            last_error,
        })
    }
}

//! Startup restore and shutdown coordination.

use crate::error::Result;
use crate::types::HubMessage;
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::TaskOrchestrator;

impl TaskOrchestrator {
    /// Re-admit and schedule every unfinished task from the store
    ///
    /// Tasks interrupted mid-download start over with the first accepting
    /// strategy. Returns the number of tasks scheduled.
    pub async fn restore_unfinished(&self) -> Result<usize> {
        let tasks = self.store.find_unfinished().await?;
        let mut restored = 0;

        for task in tasks {
            let id = task.id;
            let already_active = self.state.active.lock().await.contains_key(&id);
            if already_active {
                continue;
            }
            tracing::debug!(task_id = %id, status = %task.status, url = %task.url, "Restoring task");
            self.admit(task).await;
            self.spawn_processing(id);
            restored += 1;
        }

        Ok(restored)
    }

    /// Gracefully shut down the orchestrator
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new tasks
    /// 2. Signals every processing loop to stop at its next progress event;
    ///    interrupted tasks keep their non-terminal status and resume on restart
    /// 3. Waits for processing loops to return, bounded by `shutdown_timeout`
    /// 4. Notifies observers and closes every connection
    /// 5. Runs strategy cleanup
    /// 6. Marks a clean shutdown in the store
    ///
    /// Every step runs even if an earlier one fails.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.state.accepting_new.store(false, Ordering::SeqCst);
        tracing::info!("Stopped accepting new tasks");

        self.state.shutdown.cancel();
        tracing::info!("Signaled shutdown to all processing loops");

        let shutdown_timeout = self.config.persistence.shutdown_timeout;
        match tokio::time::timeout(shutdown_timeout, self.wait_for_in_flight()).await {
            Ok(()) => tracing::info!("All processing loops stopped"),
            Err(_) => tracing::warn!(
                remaining = self.state.in_flight.load(Ordering::SeqCst),
                "Timeout waiting for processing loops, proceeding with shutdown"
            ),
        }

        let notified = self
            .hub
            .broadcast_all(&HubMessage::notice("Server is shutting down"))
            .await;
        tracing::debug!(notified, "Shutdown notice sent to observers");
        self.hub.shutdown().await;

        self.registry.cleanup_all().await;
        tracing::info!("Strategy cleanup complete");

        if let Err(e) = self.store.set_clean_shutdown().await {
            tracing::error!(error = %e, "Failed to mark clean shutdown");
        } else {
            tracing::info!("Marked clean shutdown");
        }

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    async fn wait_for_in_flight(&self) {
        loop {
            let in_flight = self.state.in_flight.load(Ordering::SeqCst);
            if in_flight == 0 {
                return;
            }
            tracing::debug!(in_flight, "Waiting for processing loops to stop");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

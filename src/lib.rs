//! # media-dl
//!
//! Task orchestration for turning media URLs into audio files.
//!
//! ## Design Philosophy
//!
//! media-dl is designed to be:
//! - **Backend-agnostic** - Downloads go through interchangeable [`Strategy`]
//!   implementations, tried in priority order with automatic failover
//! - **Self-healing** - A per-strategy circuit breaker sidelines failing
//!   backends and lets them back in after a quiet period
//! - **Observable** - Every state change is persisted, then pushed to the
//!   connections watching that task
//! - **Library-first** - The HTTP surface in [`api`] is optional
//!
//! ## Quick Start
//!
//! ```no_run
//! use media_dl::{Config, TaskOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = TaskOrchestrator::new(Config::default()).await?;
//!
//!     let task = orchestrator
//!         .create_task("https://www.youtube.com/watch?v=dQw4w9WgXcQ", None)
//!         .await?;
//!     println!("queued {} ({})", task.title, task.id);
//!
//!     media_dl::run_with_shutdown(orchestrator).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST and WebSocket API
pub mod api;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Observer connections and progress fan-out
pub mod hub;
/// Task lifecycle orchestration
pub mod orchestrator;
/// Download strategies, health tracking and selection
pub mod strategy;
/// Core types and messages
pub mod types;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use config::Config;
pub use db::{Database, TaskStore};
pub use error::{ApiError, DatabaseError, Error, ErrorDetail, Result, TaskError, ToHttpStatus};
pub use hub::{Connection, ConnectionHub, ConnectionId, WsConnection};
pub use orchestrator::TaskOrchestrator;
pub use strategy::{
    ErrorClass, Platform, ProgressStream, Strategy, StrategyRegistry, YtDlpStrategy,
};
pub use types::{
    AudioQuality, FileInfo, HubMessage, Metadata, ProgressDetails, ProgressEvent, ProgressStatus,
    Task, TaskId, TaskStatus, TaskUpdate,
};

/// Run the orchestrator until a termination signal arrives, then shut it down.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use media_dl::{Config, TaskOrchestrator, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let orchestrator = TaskOrchestrator::new(Config::default()).await?;
///     run_with_shutdown(orchestrator).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(orchestrator: TaskOrchestrator) -> Result<()> {
    wait_for_signal().await;
    orchestrator.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}

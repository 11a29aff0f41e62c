//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`downloads`] — Task creation, lookup, cancellation and file retrieval
//! - [`observe`] — Live progress over WebSocket
//! - [`system`] — Health and strategy status

use serde::Deserialize;

mod downloads;
mod observe;
mod system;

pub use downloads::*;
pub use observe::*;
pub use system::*;

/// Request body for `POST /downloads`
#[derive(Debug, Deserialize)]
pub struct CreateDownloadRequest {
    /// Media URL to download
    pub url: String,
    /// Audio quality ("320k", "192k", "128k"); the configured default if absent
    #[serde(default)]
    pub quality: Option<String>,
}

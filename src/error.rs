//! Error types for media-dl
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error types (task state, persistence, strategy resolution)
//! - HTTP status code mapping for API integration
//! - Structured error responses with machine-readable error codes

use crate::types::{TaskId, TaskStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for media-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for media-dl
///
/// Strategy failures that happen while a task is downloading never surface
/// here; they are turned into error progress events and handled by the
/// orchestrator's state machine. This type covers failures visible to callers
/// of the public API.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_concurrent_downloads")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Task not found
    #[error("task not found: {0}")]
    NotFound(String),

    /// The submitted URL could not be parsed
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// No registered strategy is healthy and accepts the URL
    #[error("no download strategy available for {url}")]
    NoStrategy {
        /// The URL that no strategy accepted
        url: String,
    },

    /// Every metadata attempt returned nothing or timed out
    #[error("could not fetch media info for {url} after {attempts} attempt(s): {last_error}")]
    MetadataUnavailable {
        /// The URL metadata was requested for
        url: String,
        /// Number of strategies tried
        attempts: u32,
        /// Description of the last failure
        last_error: String,
    },

    /// Task state machine violation
    #[error("task error: {0}")]
    Task(#[from] TaskError),

    /// Shutdown in progress - not accepting new tasks
    #[error("shutdown in progress: not accepting new tasks")]
    ShuttingDown,

    /// External tool execution failed (yt-dlp, ffmpeg)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Observer connection failed to accept or send
    #[error("connection error: {0}")]
    Connection(String),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),

    /// A stored row could not be converted back into a domain value
    #[error("corrupt record: {0}")]
    CorruptRecord(String),
}

/// Task lifecycle errors
#[derive(Debug, Error)]
pub enum TaskError {
    /// Task does not exist in memory or in the store
    #[error("task {id} not found")]
    NotFound {
        /// The task ID that was not found
        id: TaskId,
    },

    /// Attempted a status change the state machine forbids
    #[error("task {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// The task ID
        id: TaskId,
        /// Current status
        from: TaskStatus,
        /// Requested status
        to: TaskStatus,
    },
}

/// API error response format
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "task_not_found",
///     "message": "task error: task 0b5e... not found",
///     "details": {
///       "task_id": "0b5e..."
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "no_strategy")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create an API error with additional details
    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }

    /// Create an "internal server error"
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - the submitted URL is unusable
            Error::Config { .. } => 400,
            Error::InvalidUrl(_) => 400,
            Error::NoStrategy { .. } => 400,

            // 404 Not Found
            Error::NotFound(_) => 404,
            Error::Task(TaskError::NotFound { .. }) => 404,
            Error::Database(DatabaseError::NotFound(_)) => 404,

            // 409 Conflict
            Error::Task(TaskError::InvalidTransition { .. }) => 409,

            // 422 Unprocessable Entity - URL accepted but media could not be resolved
            Error::MetadataUnavailable { .. } => 422,

            // 500 Internal Server Error
            Error::Database(_) => 500,
            Error::Sqlx(_) => 500,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Connection(_) => 500,

            // 502 Bad Gateway - backend tool failed
            Error::ExternalTool(_) => 502,

            // 503 Service Unavailable
            Error::ShuttingDown => 503,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(_) => "database_error",
            Error::Sqlx(_) => "database_error",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::NotFound(_) => "not_found",
            Error::InvalidUrl(_) => "invalid_url",
            Error::NoStrategy { .. } => "no_strategy",
            Error::MetadataUnavailable { .. } => "metadata_unavailable",
            Error::Task(e) => match e {
                TaskError::NotFound { .. } => "task_not_found",
                TaskError::InvalidTransition { .. } => "invalid_transition",
            },
            Error::ShuttingDown => "shutting_down",
            Error::ExternalTool(_) => "external_tool_error",
            Error::ApiServerError(_) => "api_server_error",
            Error::Connection(_) => "connection_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::Task(TaskError::NotFound { id }) => Some(serde_json::json!({
                "task_id": id,
            })),
            Error::Task(TaskError::InvalidTransition { id, from, to }) => {
                Some(serde_json::json!({
                    "task_id": id,
                    "from": from,
                    "to": to,
                }))
            }
            Error::NoStrategy { url } => Some(serde_json::json!({
                "url": url,
            })),
            Error::MetadataUnavailable { url, attempts, .. } => Some(serde_json::json!({
                "url": url,
                "attempts": attempts,
            })),
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({
                "key": key,
            })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}

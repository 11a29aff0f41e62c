//! Task management handlers.

use super::CreateDownloadRequest;
use crate::api::AppState;
use crate::error::ApiError;
use crate::types::{AudioQuality, Task, TaskId, TaskStatus};
use axum::{
    Json,
    extract::{Path, Request, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tower::ServiceExt;
use tower_http::services::ServeFile;

/// POST /downloads - Create a task for a URL
///
/// Responds `201` with the new task once metadata has been resolved.
pub async fn create_download(
    State(state): State<AppState>,
    Json(request): Json<CreateDownloadRequest>,
) -> Response {
    let quality = match request.quality.as_deref() {
        Some(raw) => match raw.parse::<AudioQuality>() {
            Ok(quality) => Some(quality),
            Err(e) => return ApiError::validation(e).into_response(),
        },
        None => None,
    };

    match state.orchestrator.create_task(&request.url, quality).await {
        Ok(task) => (StatusCode::CREATED, Json(task)).into_response(),
        Err(e) => {
            tracing::warn!(url = %request.url, error = %e, "Rejected task creation");
            e.into_response()
        }
    }
}

/// GET /downloads/:id - Get a single task
pub async fn get_download(State(state): State<AppState>, Path(id): Path<TaskId>) -> Response {
    match state.orchestrator.get_task(id).await {
        Ok(Some(task)) => (StatusCode::OK, Json(task)).into_response(),
        Ok(None) => ApiError::not_found(format!("Task {}", id)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// DELETE /downloads/:id - Cancel a task that has not finished
pub async fn cancel_download(State(state): State<AppState>, Path(id): Path<TaskId>) -> Response {
    match state.orchestrator.cancel_task(id).await {
        Ok(true) => (
            StatusCode::OK,
            Json(json!({ "message": "Download cancelled" })),
        )
            .into_response(),
        Ok(false) => ApiError::not_found(format!("Active task {}", id)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /downloads/:id/file - Stream the artifact of a completed task
///
/// `404` for unknown tasks or a missing artifact, `400` while the task has
/// not completed. Range and conditional requests are honoured.
pub async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
    request: Request,
) -> Response {
    let task = match state.orchestrator.get_task(id).await {
        Ok(Some(task)) => task,
        Ok(None) => return ApiError::not_found(format!("Task {}", id)).into_response(),
        Err(e) => return e.into_response(),
    };

    if task.status != TaskStatus::Complete {
        return ApiError::validation(format!("Download not complete (status: {})", task.status))
            .into_response();
    }

    let Some(path) = task.output_path.clone() else {
        return ApiError::not_found(format!("File for task {}", id)).into_response();
    };
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        tracing::warn!(task_id = %id, path = %path.display(), "Artifact of completed task is missing");
        return ApiError::not_found(format!("File for task {}", id)).into_response();
    }

    let mut response = match ServeFile::new(&path).oneshot(request).await {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    };
    if let Ok(value) = HeaderValue::from_str(&attachment(&task, &path)) {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, value);
    }
    tracing::debug!(task_id = %id, path = %path.display(), "Serving task artifact");
    response
}

/// `Content-Disposition` value naming the file after the task title
fn attachment(task: &Task, path: &std::path::Path) -> String {
    let stem: String = task
        .title
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_' | '(' | ')' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let stem = stem.trim();

    let name = match (stem.is_empty(), path.extension().and_then(|e| e.to_str())) {
        (false, Some(ext)) => format!("{}.{}", stem, ext),
        (false, None) => stem.to_string(),
        (true, _) => path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("download")
            .to_string(),
    };
    format!("attachment; filename=\"{}\"", name)
}

//! Health and strategy status handlers.

use crate::api::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde_json::json;

/// GET /health - Liveness check
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let orchestrator = &state.orchestrator;
    let status = if orchestrator.is_accepting() {
        "ok"
    } else {
        "shutting_down"
    };
    Json(json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "running_tasks": orchestrator.running_tasks(),
        "active_tasks": orchestrator.active_task_ids().await.len(),
    }))
}

/// GET /strategies - Health of every registered strategy, in priority order
pub async fn list_strategies(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.orchestrator.registry().health_report().await;
    (StatusCode::OK, Json(report))
}

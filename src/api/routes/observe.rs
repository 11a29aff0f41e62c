//! WebSocket progress observation.

use crate::api::AppState;
use crate::error::ApiError;
use crate::hub::{Connection, WsConnection};
use crate::types::{HubMessage, TaskId};
use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use std::sync::Arc;

/// GET /downloads/:id/ws - Observe a task's progress
///
/// After the upgrade the connection receives a `connection_status`
/// acknowledgement, then the current task snapshot, then every progress
/// update. A `{"type":"ping"}` frame is answered with a pong; any other
/// frame asks for a fresh snapshot.
pub async fn observe_download(
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
    ws: WebSocketUpgrade,
) -> Response {
    match state.orchestrator.get_task(id).await {
        Ok(Some(_)) => ws.on_upgrade(move |socket| observe_socket(socket, state, id)),
        Ok(None) => ApiError::not_found(format!("Task {}", id)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn observe_socket(socket: WebSocket, state: AppState, id: TaskId) {
    let (sink, mut frames) = socket.split();
    let connection = Arc::new(WsConnection::new(sink));
    let hub = state.orchestrator.hub();

    if !hub.register(connection.clone(), id).await {
        tracing::debug!(task_id = %id, connection = %connection.id(), "Observer rejected");
        return;
    }

    if !send_snapshot(&state, &connection, id).await {
        hub.unregister(connection.as_ref(), id).await;
        return;
    }

    while let Some(frame) = frames.next().await {
        let sent = match frame {
            Ok(Message::Text(text)) if is_ping(&text) => {
                connection.send(&HubMessage::pong()).await.is_ok()
            }
            Ok(Message::Text(_)) | Ok(Message::Binary(_)) => {
                send_snapshot(&state, &connection, id).await
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => true,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::debug!(task_id = %id, error = %e, "Observer socket error");
                break;
            }
        };
        if !sent {
            break;
        }
    }

    connection.mark_closed();
    hub.unregister(connection.as_ref(), id).await;
}

async fn send_snapshot(state: &AppState, connection: &WsConnection, id: TaskId) -> bool {
    match state.orchestrator.get_task(id).await {
        Ok(Some(task)) => connection.send(&HubMessage::snapshot(&task)).await.is_ok(),
        Ok(None) => false,
        Err(e) => {
            tracing::warn!(task_id = %id, error = %e, "Failed to load task for observer");
            false
        }
    }
}

fn is_ping(text: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(text)
        .map(|value| value["type"] == "ping")
        .unwrap_or(false)
}

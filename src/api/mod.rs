//! REST and WebSocket API server module
//!
//! A thin HTTP surface over [`TaskOrchestrator`]: submit a URL, inspect or
//! cancel a task, watch its progress live, and check strategy health.

use crate::{Config, Result, TaskOrchestrator};
use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod error_response;
pub mod routes;
pub mod state;

pub use state::AppState;

/// Create the API router with all route definitions
///
/// # Routes
///
/// All routes live under `/api/v1`.
///
/// ## Tasks
/// - `POST /downloads` - Create a task from `{url, quality?}`
/// - `GET /downloads/:id` - Get a task
/// - `DELETE /downloads/:id` - Cancel a task
/// - `GET /downloads/:id/file` - Download the artifact of a completed task
/// - `GET /downloads/:id/ws` - Observe task progress over a WebSocket
///
/// ## System
/// - `GET /strategies` - Strategy health report
/// - `GET /health` - Liveness check
pub fn create_router(orchestrator: Arc<TaskOrchestrator>, config: Arc<Config>) -> Router {
    let cors_enabled = config.server.api.cors_enabled;
    let cors_origins = config.server.api.cors_origins.clone();
    let state = AppState::new(orchestrator, config);

    let api = Router::new()
        .route("/downloads", post(routes::create_download))
        .route(
            "/downloads/:id",
            get(routes::get_download).delete(routes::cancel_download),
        )
        .route("/downloads/:id/file", get(routes::download_file))
        .route("/downloads/:id/ws", get(routes::observe_download))
        .route("/strategies", get(routes::list_strategies))
        .route("/health", get(routes::health_check));

    let mut router = Router::new()
        .nest("/api/v1", api)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if cors_enabled {
        router = router.layer(build_cors_layer(&cors_origins));
    }

    router
}

/// Build the CORS layer from the configured origin list
///
/// `"*"` or an empty list allows every origin.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Start the API server on the configured bind address.
///
/// Runs until the listener fails or the surrounding task is dropped.
///
/// # Example
///
/// ```no_run
/// use media_dl::{Config, TaskOrchestrator};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let orchestrator = Arc::new(TaskOrchestrator::new(Config::default()).await?);
///     let config = orchestrator.get_config();
///
///     media_dl::api::start_api_server(orchestrator, config).await?;
///     Ok(())
/// }
/// ```
pub async fn start_api_server(
    orchestrator: Arc<TaskOrchestrator>,
    config: Arc<Config>,
) -> Result<()> {
    let bind_address = config.server.api.bind_address;

    tracing::info!(address = %bind_address, "Starting API server");

    let app = create_router(orchestrator, config);

    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(address = %bind_address, "API server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

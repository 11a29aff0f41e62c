use super::*;
use crate::strategy::Strategy;
use crate::test_helpers::{Harness, ScriptedStrategy};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use std::time::Duration;
use tower::ServiceExt;


const URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

/// Router over a fresh in-memory harness
async fn test_app(strategies: Vec<Arc<dyn Strategy>>) -> (Router, Harness) {
    let harness = Harness::new(strategies).await;
    let orchestrator = Arc::new(harness.orchestrator.clone());
    let config = orchestrator.get_config();
    (create_router(orchestrator, config), harness)
}

fn scripted(name: &str) -> Vec<Arc<dyn Strategy>> {
    vec![Arc::new(ScriptedStrategy::new(name)) as Arc<dyn Strategy>]
}

async fn body_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_api_server_spawns() {
    let harness = Harness::new(scripted("A")).await;
    let orchestrator = Arc::new(harness.orchestrator.clone());

    let mut config = (*orchestrator.get_config()).clone();
    config.server.api.bind_address = "127.0.0.1:0".parse().unwrap();
    let config = Arc::new(config);

    let api_handle = tokio::spawn(async move { start_api_server(orchestrator, config).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!api_handle.is_finished(), "server should still be running");
    api_handle.abort();
}

#[tokio::test]
async fn test_cors_enabled() {
    let (app, _harness) = test_app(scripted("A")).await;

    let request = Request::builder()
        .uri("/api/v1/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .contains_key("access-control-allow-origin"),
        "CORS header should be present"
    );
}

#[tokio::test]
async fn test_cors_disabled() {
    let harness = Harness::new(scripted("A")).await;
    let orchestrator = Arc::new(harness.orchestrator.clone());
    let mut config = (*orchestrator.get_config()).clone();
    config.server.api.cors_enabled = false;
    let app = create_router(orchestrator, Arc::new(config));

    let request = Request::builder()
        .uri("/api/v1/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        !response
            .headers()
            .contains_key("access-control-allow-origin")
    );
}

#[tokio::test]
async fn test_cors_specific_origin() {
    let harness = Harness::new(scripted("A")).await;
    let orchestrator = Arc::new(harness.orchestrator.clone());
    let mut config = (*orchestrator.get_config()).clone();
    config.server.api.cors_origins = vec!["http://localhost:3000".to_string()];
    let app = create_router(orchestrator, Arc::new(config));

    let request = Request::builder()
        .uri("/api/v1/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "http://localhost:3000"
    );

    let request = Request::builder()
        .uri("/api/v1/health")
        .header("Origin", "http://evil.example")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert!(
        !response
            .headers()
            .contains_key("access-control-allow-origin")
    );
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let (app, _harness) = test_app(scripted("A")).await;
    let response = app.oneshot(get("/api/v1/nope")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

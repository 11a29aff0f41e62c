//! REST API server example
//!
//! Runs media-dl with the HTTP/WebSocket API on 127.0.0.1:8000. Requires
//! `yt-dlp` on `PATH` (or set `MEDIA_DL_YTDLP` to its location).
//!
//! After starting, you can:
//! - Create a task via POST http://localhost:8000/api/v1/downloads
//! - Inspect it via GET http://localhost:8000/api/v1/downloads/<id>
//! - Watch it live via ws://localhost:8000/api/v1/downloads/<id>/ws
//! - Fetch the finished file via GET http://localhost:8000/api/v1/downloads/<id>/file
//!
//! Set `RUST_LOG=media_dl=debug` for per-event logging.

use media_dl::api::start_api_server;
use media_dl::config::{ApiConfig, Config, DownloadConfig, ServerIntegrationConfig, ToolsConfig};
use media_dl::{TaskOrchestrator, run_with_shutdown};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("media_dl=info")),
        )
        .init();

    let config = Config {
        download: DownloadConfig {
            download_dir: "downloads".into(),
            temp_dir: "temp".into(),
            ..Default::default()
        },
        tools: ToolsConfig {
            ytdlp_path: std::env::var_os("MEDIA_DL_YTDLP").map(Into::into),
            ..Default::default()
        },
        server: ServerIntegrationConfig {
            api: ApiConfig {
                bind_address: "127.0.0.1:8000".parse::<SocketAddr>()?,
                ..Default::default()
            },
        },
        ..Default::default()
    };

    let orchestrator = TaskOrchestrator::new(config).await?;
    let config = orchestrator.get_config();

    println!("media-dl API: http://localhost:8000/api/v1");
    println!();
    println!("Example commands:");
    println!("  curl -X POST http://localhost:8000/api/v1/downloads \\");
    println!("    -H 'Content-Type: application/json' \\");
    println!("    -d '{{\"url\": \"https://www.youtube.com/watch?v=dQw4w9WgXcQ\", \"quality\": \"320k\"}}'");
    println!();
    println!("  curl http://localhost:8000/api/v1/strategies");
    println!();

    let server = tokio::spawn(start_api_server(Arc::new(orchestrator.clone()), config));

    run_with_shutdown(orchestrator).await?;
    server.abort();

    Ok(())
}

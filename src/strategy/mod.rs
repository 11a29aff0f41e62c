//! Download strategies and strategy selection
//!
//! A [`Strategy`] is one way of turning a media URL into an audio file:
//! a CLI tool, an alternate frontend API, a platform-specific resolver.
//! Strategies are interchangeable; the [`StrategyRegistry`] keeps them in
//! priority order, tracks per-strategy health with a circuit breaker and
//! picks the first healthy strategy that accepts a URL.
//!
//! ## Architecture
//!
//! - [`Strategy`]: the capability trait every backend implements
//! - [`StrategyRegistry`]: ordered list + health state + selection/failover
//! - [`ErrorClassifier`]: maps backend error text to an [`ErrorClass`]
//! - [`YtDlpStrategy`]: production backend driving an external `yt-dlp` binary
//!
//! ## Usage
//!
//! ```no_run
//! use media_dl::config::StrategyConfig;
//! use media_dl::strategy::{StrategyRegistry, YtDlpStrategy};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = StrategyRegistry::new(&StrategyConfig::default())?;
//! if let Some(ytdlp) = YtDlpStrategy::from_path("./temp") {
//!     registry.register(Arc::new(ytdlp)).await;
//! }
//!
//! if let Some(selected) = registry.select("https://youtu.be/dQw4w9WgXcQ").await {
//!     println!("using {} (#{})", selected.strategy.name(), selected.index);
//! }
//! # Ok(())
//! # }
//! ```

mod classify;
mod registry;
mod ytdlp;

pub use classify::{ErrorClass, ErrorClassifier};
pub use registry::{
    RECENT_ERROR_CAPACITY, SelectedStrategy, StrategyHealth, StrategyHealthReport,
    StrategyRegistry,
};
pub use ytdlp::{YtDlpStrategy, parse_progress_line};

use crate::types::{AudioQuality, Metadata, ProgressEvent};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::path::Path;

/// Lazy, finite, non-restartable sequence of progress events
///
/// The orchestrator is the only consumer. Dropping the stream abandons the
/// download; implementations must stop any background work when that happens.
pub type ProgressStream = BoxStream<'static, ProgressEvent>;

/// Media platform a URL obviously belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Platform {
    /// youtube.com, youtu.be, music.youtube.com
    YouTube,
    /// open.spotify.com and `spotify:` URIs
    Spotify,
}

impl Platform {
    /// Detect the platform from the URL's host
    ///
    /// Returns `None` for unparsable URLs or unknown hosts.
    pub fn detect(url: &str) -> Option<Platform> {
        let parsed = url::Url::parse(url.trim()).ok()?;
        if parsed.scheme() == "spotify" {
            return Some(Platform::Spotify);
        }

        let host = parsed.host_str()?.to_ascii_lowercase();
        let matches = |domain: &str| host == domain || host.ends_with(&format!(".{domain}"));

        if matches("spotify.com") {
            Some(Platform::Spotify)
        } else if matches("youtube.com") || matches("youtu.be") || matches("youtube-nocookie.com")
        {
            Some(Platform::YouTube)
        } else {
            None
        }
    }
}

/// A pluggable backend that can resolve a URL into an audio file
///
/// Implementations never return errors from [`download`](Strategy::download):
/// failures are reported as [`ProgressStatus::Error`](crate::types::ProgressStatus::Error)
/// events so the orchestrator can classify them and fail over.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Human-readable name for logs and progress messages
    fn name(&self) -> &str;

    /// Platform this strategy specialises in
    ///
    /// URLs detected as belonging to a platform try matching strategies
    /// before the general ordered scan.
    fn platform(&self) -> Option<Platform> {
        None
    }

    /// Whether this strategy can handle the URL at all
    async fn validate_url(&self, url: &str) -> bool;

    /// Fetch title/author metadata
    ///
    /// Returns `None` (or empty metadata) on failure.
    async fn get_info(&self, url: &str) -> Option<Metadata>;

    /// Start downloading `url` into `output`
    ///
    /// # Arguments
    ///
    /// * `url` - Source URL
    /// * `output` - Path the finished artifact must be written to
    /// * `quality` - Requested audio bitrate
    async fn download(&self, url: &str, output: &Path, quality: AudioQuality) -> ProgressStream;

    /// Release temporary resources held by this strategy (idempotent)
    async fn cleanup(&self);
}

//! Configuration types for media-dl

use crate::error::{Error, Result};
use crate::types::AudioQuality;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};

/// Download behavior configuration (directories, concurrency, metadata lookup)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Directory finished audio files are written to (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Scratch directory for strategy intermediates (default: "./temp")
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Maximum tasks downloading at the same time (default: 3)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// Quality used when a request does not specify one (default: 192k)
    #[serde(default)]
    pub default_quality: AudioQuality,

    /// Extension of produced files; the output path is `<download_dir>/<task id>.<ext>` (default: "mp3")
    #[serde(default = "default_output_extension")]
    pub output_extension: String,

    /// Time allowed for a single metadata lookup (default: 30s)
    #[serde(default = "default_info_timeout", with = "duration_serde")]
    pub info_timeout: Duration,

    /// Strategies tried for metadata before task creation fails (default: 3)
    #[serde(default = "default_max_info_attempts")]
    pub max_info_attempts: u32,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            temp_dir: default_temp_dir(),
            max_concurrent_downloads: default_max_concurrent(),
            default_quality: AudioQuality::default(),
            output_extension: default_output_extension(),
            info_timeout: default_info_timeout(),
            max_info_attempts: default_max_info_attempts(),
        }
    }
}

/// Strategy health and failover configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Consecutive failures before a strategy is marked unhealthy (default: 3)
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,

    /// Time after the last failure before an unhealthy strategy is retried (default: 300s)
    #[serde(default = "default_failure_reset_window", with = "duration_serde")]
    pub failure_reset_window: Duration,

    /// Generic (non-fast-path) strategy failures a task may consume (default: 3)
    #[serde(default = "default_max_strategy_attempts")]
    pub max_strategy_attempts: u32,

    /// Pause before switching strategies; jittered up to 2x (default: 1s)
    #[serde(default = "default_failover_delay", with = "duration_serde")]
    pub failover_delay: Duration,

    /// Error fragments meaning the backend is structurally broken
    ///
    /// Matching is case-insensitive substring. A match trips the circuit
    /// breaker immediately and fails over without consuming an attempt.
    #[serde(default = "default_critical_error_patterns")]
    pub critical_error_patterns: Vec<String>,

    /// Error fragments meaning the backend hit anti-bot protection or rate limiting
    ///
    /// A match fails over immediately without consuming an attempt.
    #[serde(default = "default_protection_error_patterns")]
    pub protection_error_patterns: Vec<String>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            max_failures: default_max_failures(),
            failure_reset_window: default_failure_reset_window(),
            max_strategy_attempts: default_max_strategy_attempts(),
            failover_delay: default_failover_delay(),
            critical_error_patterns: default_critical_error_patterns(),
            protection_error_patterns: default_protection_error_patterns(),
        }
    }
}

/// Observer connection hub configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HubConfig {
    /// Interval between keepalive pings (default: 30s)
    #[serde(default = "default_keepalive_interval", with = "duration_serde")]
    pub keepalive_interval: Duration,

    /// Time allowed for a single send before the connection is considered dead (default: 10s)
    #[serde(default = "default_send_timeout", with = "duration_serde")]
    pub send_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: default_keepalive_interval(),
            send_timeout: default_send_timeout(),
        }
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./media-dl.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Time shutdown waits for running tasks to stop (default: 30s)
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// External tool paths
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to yt-dlp executable (auto-detected if None)
    #[serde(default)]
    pub ytdlp_path: Option<PathBuf>,

    /// Whether to search PATH for external binaries if explicit paths not set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: None,
            search_path: true,
        }
    }
}

/// API and external server integration configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServerIntegrationConfig {
    /// REST API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:8000)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
        }
    }
}

/// Main configuration for [`TaskOrchestrator`](crate::TaskOrchestrator)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download behavior settings (directories, concurrency, metadata lookup)
    #[serde(flatten)]
    pub download: DownloadConfig,

    /// External tool paths
    #[serde(flatten)]
    pub tools: ToolsConfig,

    /// Strategy health and failover
    #[serde(default)]
    pub strategy: StrategyConfig,

    /// Observer connection hub
    #[serde(default)]
    pub hub: HubConfig,

    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// API and external server integration
    #[serde(flatten)]
    pub server: ServerIntegrationConfig,
}

impl Config {
    /// Download directory
    pub fn download_dir(&self) -> &PathBuf {
        &self.download.download_dir
    }

    /// Temporary directory
    pub fn temp_dir(&self) -> &PathBuf {
        &self.download.temp_dir
    }

    /// Reject settings the orchestrator cannot run with
    pub fn validate(&self) -> Result<()> {
        let checks: [(bool, &str, &str); 5] = [
            (
                self.download.max_concurrent_downloads == 0,
                "max_concurrent_downloads",
                "must allow at least one concurrent download",
            ),
            (
                self.download.max_info_attempts == 0,
                "max_info_attempts",
                "must allow at least one metadata attempt",
            ),
            (
                self.strategy.max_strategy_attempts == 0,
                "strategy.max_strategy_attempts",
                "must allow at least one strategy attempt",
            ),
            (
                self.strategy.max_failures == 0,
                "strategy.max_failures",
                "must be at least 1",
            ),
            (
                self.hub.keepalive_interval.is_zero(),
                "hub.keepalive_interval",
                "must be greater than zero",
            ),
        ];

        for (invalid, key, message) in checks {
            if invalid {
                return Err(Error::Config {
                    message: format!("{key} {message}"),
                    key: Some(key.to_string()),
                });
            }
        }
        Ok(())
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("./temp")
}

fn default_max_concurrent() -> usize {
    3
}

fn default_output_extension() -> String {
    "mp3".to_string()
}

fn default_info_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_info_attempts() -> u32 {
    3
}

fn default_max_failures() -> u32 {
    3
}

fn default_failure_reset_window() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_max_strategy_attempts() -> u32 {
    3
}

fn default_failover_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_critical_error_patterns() -> Vec<String> {
    [
        "signature extraction failed",
        "unable to extract",
        "video unavailable",
        "unsupported url",
        "credentials not set",
        "private video",
        "this video has been removed",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_protection_error_patterns() -> Vec<String> {
    [
        "sign in to confirm",
        "confirm you're not a bot",
        "http error 429",
        "too many requests",
        "po token",
        "precondition check failed",
        "http error 403",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_keepalive_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_send_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./media-dl.db")
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_true() -> bool {
    true
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8000))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".into()]
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

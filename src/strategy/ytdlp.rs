//! Strategy backed by an external `yt-dlp` binary

use super::{Platform, ProgressStream, Strategy};
use crate::error::Error;
use crate::types::{AudioQuality, Metadata, ProgressEvent};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::ReceiverStream;

const STRATEGY_NAME: &str = "yt-dlp";

/// Downloads audio by running `yt-dlp -x` and parsing its progress output
///
/// Every download runs in its own scratch directory under `temp_dir`; the
/// finished file is moved to the requested output path. Dropping the
/// returned stream kills the child process and removes its directory.
///
/// # Examples
///
/// ```no_run
/// use media_dl::strategy::YtDlpStrategy;
/// use std::path::PathBuf;
///
/// // Explicit binary
/// let strategy = YtDlpStrategy::new(PathBuf::from("/usr/local/bin/yt-dlp"), "./temp");
///
/// // Or auto-discover from PATH
/// let strategy = YtDlpStrategy::from_path("./temp");
/// ```
pub struct YtDlpStrategy {
    binary_path: PathBuf,
    temp_dir: PathBuf,
    workspaces: Arc<Mutex<HashSet<PathBuf>>>,
}

impl YtDlpStrategy {
    /// Create a strategy with an explicit binary path
    pub fn new(binary_path: PathBuf, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary_path,
            temp_dir: temp_dir.into(),
            workspaces: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Attempt to find `yt-dlp` in PATH
    pub fn from_path(temp_dir: impl Into<PathBuf>) -> Option<Self> {
        which::which("yt-dlp")
            .ok()
            .map(|binary| Self::new(binary, temp_dir))
    }

    /// Path of the binary this strategy runs
    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    async fn create_workspace(&self) -> std::io::Result<PathBuf> {
        let workspace = self
            .temp_dir
            .join(format!("ytdlp-{}", uuid::Uuid::new_v4().simple()));
        self.workspaces.lock().await.insert(workspace.clone());
        if let Err(e) = tokio::fs::create_dir_all(&workspace).await {
            self.workspaces.lock().await.remove(&workspace);
            return Err(e);
        }
        Ok(workspace)
    }
}

#[async_trait]
impl Strategy for YtDlpStrategy {
    fn name(&self) -> &str {
        STRATEGY_NAME
    }

    fn platform(&self) -> Option<Platform> {
        Some(Platform::YouTube)
    }

    async fn validate_url(&self, url: &str) -> bool {
        match url::Url::parse(url) {
            Ok(parsed) => {
                matches!(parsed.scheme(), "http" | "https")
                    && Platform::detect(url) != Some(Platform::Spotify)
            }
            Err(_) => false,
        }
    }

    async fn get_info(&self, url: &str) -> Option<Metadata> {
        let output = Command::new(&self.binary_path)
            .args(["--dump-single-json", "--no-playlist", "--skip-download"])
            .arg(url)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                let error = Error::ExternalTool(format!("Failed to execute yt-dlp: {}", e));
                tracing::warn!(url, error = %error, "yt-dlp metadata lookup failed");
                return None;
            }
        };

        if !output.status.success() {
            tracing::warn!(
                url,
                status = %output.status,
                stderr = %last_line(&String::from_utf8_lossy(&output.stderr)).unwrap_or_default(),
                "yt-dlp metadata lookup failed"
            );
            return None;
        }

        parse_info_json(&output.stdout)
    }

    async fn download(&self, url: &str, output: &Path, quality: AudioQuality) -> ProgressStream {
        let workspace = match self.create_workspace().await {
            Ok(workspace) => workspace,
            Err(e) => {
                return futures::stream::once(futures::future::ready(ProgressEvent::error(
                    format!("Failed to create temp directory: {}", e),
                )))
                .boxed();
            }
        };

        let (tx, rx) = mpsc::channel(32);
        let job = DownloadJob {
            binary_path: self.binary_path.clone(),
            url: url.to_string(),
            output: output.to_path_buf(),
            quality,
            workspace,
            workspaces: Arc::clone(&self.workspaces),
        };
        tokio::spawn(job.run(tx));

        ReceiverStream::new(rx).boxed()
    }

    /// Remove scratch directories left behind by downloads that are no longer running
    async fn cleanup(&self) {
        let Ok(mut entries) = tokio::fs::read_dir(&self.temp_dir).await else {
            return;
        };
        let active = self.workspaces.lock().await.clone();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let ours = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with("ytdlp-"));
            if ours && !active.contains(&path) {
                remove_workspace(&path).await;
            }
        }
    }
}

struct DownloadJob {
    binary_path: PathBuf,
    url: String,
    output: PathBuf,
    quality: AudioQuality,
    workspace: PathBuf,
    workspaces: Arc<Mutex<HashSet<PathBuf>>>,
}

impl DownloadJob {
    async fn run(self, tx: mpsc::Sender<ProgressEvent>) {
        if let Some(event) = self.execute(&tx).await {
            let _ = tx.send(event).await;
        }
        if self.workspaces.lock().await.remove(&self.workspace) {
            remove_workspace(&self.workspace).await;
        }
    }

    /// Drive the child process; returns the final event, or None if the consumer went away
    async fn execute(&self, tx: &mpsc::Sender<ProgressEvent>) -> Option<ProgressEvent> {
        let format = self
            .output
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("mp3")
            .to_string();
        let stem = self
            .output
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("download")
            .to_string();
        let template = self.workspace.join(format!("{}.%(ext)s", stem));

        let mut child = match Command::new(&self.binary_path)
            .args(["-x", "--audio-format", format.as_str()])
            .arg("--audio-quality")
            .arg(format!("{}K", self.quality.kbps()))
            .args(["--newline", "--no-playlist", "-o"])
            .arg(&template)
            .arg(&self.url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => return Some(tool_failure(format!("Failed to execute yt-dlp: {}", e))),
        };

        let stderr_tail = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                let mut last = None;
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.trim().is_empty() {
                        last = Some(line);
                    }
                }
                last
            })
        });

        let _ = tx.send(ProgressEvent::downloading(0.0)).await;

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    _ = tx.closed() => {
                        tracing::debug!(url = %self.url, "Download stream dropped, stopping yt-dlp");
                        let _ = child.kill().await;
                        return None;
                    }
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            if let Some(event) = parse_progress_line(&line)
                                && tx.send(event).await.is_err()
                            {
                                let _ = child.kill().await;
                                return None;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to read yt-dlp output");
                            break;
                        }
                    }
                }
            }
        }

        let status = match child.wait().await {
            Ok(status) => status,
            Err(e) => return Some(tool_failure(format!("Failed to wait for yt-dlp: {}", e))),
        };
        let last_stderr = match stderr_tail {
            Some(handle) => handle.await.ok().flatten(),
            None => None,
        };

        if !status.success() {
            return Some(ProgressEvent::error(last_stderr.unwrap_or_else(|| {
                format!("yt-dlp exited with {}", status)
            })));
        }

        let produced = self.workspace.join(format!("{}.{}", stem, format));
        if tokio::fs::metadata(&produced).await.is_err() {
            return Some(ProgressEvent::error("Downloaded file not found"));
        }

        match move_file(&produced, &self.output).await {
            Ok(()) => Some(ProgressEvent::complete()),
            Err(e) => Some(ProgressEvent::error(format!("Failed to move file: {}", e))),
        }
    }
}

/// Rename, falling back to copy + delete across filesystems
async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await
}

async fn remove_workspace(workspace: &Path) {
    match tokio::fs::remove_dir_all(workspace).await {
        Ok(()) => tracing::debug!(path = %workspace.display(), "Removed yt-dlp workspace"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %workspace.display(), error = %e, "Failed to remove yt-dlp workspace")
        }
    }
}

/// Map one line of `yt-dlp --newline` output to a progress event
///
/// `[download]  42.3% of ...` becomes a downloading event; any
/// `[ExtractAudio]` line means the conversion step has started. Other lines
/// yield nothing.
pub fn parse_progress_line(line: &str) -> Option<ProgressEvent> {
    let line = line.trim();
    if line.starts_with("[ExtractAudio]") {
        return Some(ProgressEvent::processing(100.0));
    }

    let rest = line.strip_prefix("[download]")?.trim_start();
    let (percent, _) = rest.split_once('%')?;
    let progress: f32 = percent.trim().parse().ok()?;
    Some(ProgressEvent::downloading(progress.clamp(0.0, 100.0)))
}

fn parse_info_json(stdout: &[u8]) -> Option<Metadata> {
    let info: serde_json::Value = match serde_json::from_slice(stdout) {
        Ok(info) => info,
        Err(e) => {
            tracing::warn!(error = %e, "yt-dlp returned unparseable metadata");
            return None;
        }
    };

    let text = |key: &str| {
        info.get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    Some(Metadata {
        title: text("title"),
        author: text("uploader").or_else(|| text("channel")),
        duration: info.get("duration").and_then(|v| v.as_f64()),
        thumbnail: text("thumbnail"),
    })
}

/// Terminal event for a child process that could not be run to completion
fn tool_failure(message: String) -> ProgressEvent {
    let event = ProgressEvent::error(message.clone());
    tracing::warn!(error = %Error::ExternalTool(message), "yt-dlp process failed");
    event
}

fn last_line(text: &str) -> Option<String> {
    text.lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .map(str::to_string)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProgressStatus;

    #[test]
    fn download_lines_become_downloading_events() {
        let event = parse_progress_line("[download]  42.3% of    3.45MiB at  1.20MiB/s ETA 00:02")
            .unwrap();
        assert_eq!(event.status, ProgressStatus::Downloading);
        assert!((event.progress - 42.3).abs() < f32::EPSILON);

        let done = parse_progress_line("[download] 100% of 3.45MiB in 00:03").unwrap();
        assert_eq!(done.progress, 100.0);
    }

    #[test]
    fn extract_audio_lines_become_processing_events() {
        let event =
            parse_progress_line("[ExtractAudio] Destination: /tmp/ytdlp-1/abc.mp3").unwrap();
        assert_eq!(event.status, ProgressStatus::Processing);
    }

    #[test]
    fn unrelated_lines_are_ignored() {
        for line in [
            "[youtube] dQw4w9WgXcQ: Downloading webpage",
            "[download] Destination: /tmp/x.webm",
            "[download] abc% of 1MiB",
            "",
        ] {
            assert!(parse_progress_line(line).is_none(), "line {line:?}");
        }
    }

    #[test]
    fn info_json_maps_uploader_and_falls_back_to_channel() {
        let meta = parse_info_json(
            br#"{"title":"Song","uploader":"Band","duration":212.5,"thumbnail":"https://i/1.jpg"}"#,
        )
        .unwrap();
        assert_eq!(meta.title.as_deref(), Some("Song"));
        assert_eq!(meta.author.as_deref(), Some("Band"));
        assert_eq!(meta.duration, Some(212.5));

        let meta = parse_info_json(br#"{"title":"Song","channel":"Label"}"#).unwrap();
        assert_eq!(meta.author.as_deref(), Some("Label"));

        let meta = parse_info_json(br#"{"id":"x"}"#).unwrap();
        assert!(meta.is_empty());

        assert!(parse_info_json(b"not json").is_none());
    }

    #[tokio::test]
    async fn validate_url_accepts_http_and_rejects_spotify() {
        let strategy = YtDlpStrategy::new(PathBuf::from("yt-dlp"), "/tmp");
        assert!(strategy.validate_url("https://youtu.be/dQw4w9WgXcQ").await);
        assert!(strategy.validate_url("http://example.com/track").await);
        assert!(
            !strategy
                .validate_url("https://open.spotify.com/track/123")
                .await
        );
        assert!(!strategy.validate_url("ftp://example.com/a.mp3").await);
        assert!(!strategy.validate_url("not a url").await);
    }

    #[test]
    fn tool_failure_keeps_message_as_error_event() {
        let event = tool_failure("Failed to wait for yt-dlp: interrupted".to_string());
        assert_eq!(event.status, ProgressStatus::Error);
        assert_eq!(
            event.error.as_deref(),
            Some("Failed to wait for yt-dlp: interrupted")
        );
    }

    #[test]
    fn from_path_matches_which() {
        let found = YtDlpStrategy::from_path("/tmp");
        assert_eq!(found.is_some(), which::which("yt-dlp").is_ok());
    }

    #[tokio::test]
    async fn missing_binary_yields_single_error_event() {
        let temp = tempfile::tempdir().unwrap();
        let strategy = YtDlpStrategy::new(
            temp.path().join("no-such-yt-dlp"),
            temp.path().join("scratch"),
        );

        let events: Vec<ProgressEvent> = strategy
            .download(
                "https://youtu.be/dQw4w9WgXcQ",
                &temp.path().join("out.mp3"),
                AudioQuality::Medium,
            )
            .await
            .collect()
            .await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, ProgressStatus::Error);
        assert!(
            events[0]
                .error
                .as_deref()
                .unwrap()
                .contains("Failed to execute yt-dlp")
        );
        assert!(strategy.get_info("https://youtu.be/dQw4w9WgXcQ").await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn fake_binary_drives_progress_to_completion() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().unwrap();
        let script = temp.path().join("fake-yt-dlp");
        std::fs::write(
            &script,
            r#"#!/bin/sh
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; shift; fi
  shift
done
echo "[download]  12.5% of 1.00MiB"
echo "[download] 100.0% of 1.00MiB"
echo "[ExtractAudio] Destination: $out"
printf 'audio' > "$(echo "$out" | sed 's/%(ext)s/mp3/')"
"#,
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let scratch = temp.path().join("scratch");
        let strategy = YtDlpStrategy::new(script, &scratch);
        let output = temp.path().join("downloads").join("task.mp3");

        let events: Vec<ProgressEvent> = strategy
            .download("https://youtu.be/dQw4w9WgXcQ", &output, AudioQuality::High)
            .await
            .collect()
            .await;

        let statuses: Vec<ProgressStatus> = events.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![
                ProgressStatus::Downloading,
                ProgressStatus::Downloading,
                ProgressStatus::Downloading,
                ProgressStatus::Processing,
                ProgressStatus::Complete,
            ]
        );
        assert_eq!(std::fs::read(&output).unwrap(), b"audio");
        // The per-download workspace is gone once the stream ends.
        assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 0);

        let stale = scratch.join("ytdlp-leftover");
        std::fs::create_dir_all(&stale).unwrap();
        strategy.cleanup().await;
        assert!(!stale.exists());
    }
}

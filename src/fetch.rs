use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::AudioConfig;
use crate::cookies::CredentialConfig;
use crate::resolver::{watch_url, ChannelRef};
use crate::transcripts::{entries_from_json3, TranscriptTrack};

/// Typed failures of the download tool. `Auth`, `NoFormats` and
/// `Extractor` stay distinguishable all the way into manifest records.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("no usable format: {0}")]
    NoFormats(String),

    #[error("extractor error: {0}")]
    Extractor(String),

    #[error("tool error: {0}")]
    Tool(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Machine-readable kind stored in manifest records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::NoFormats(_) => "no_formats",
            Self::Extractor(_) => "extractor",
            Self::Tool(_) => "tool",
            Self::Io(_) => "io",
        }
    }
}

/// Normalized metadata for one video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub id: String,
    pub title: Option<String>,
    pub channel: Option<String>,
    pub uploader: Option<String>,
    pub duration_seconds: Option<f64>,
    pub upload_date: Option<String>,
    pub language: Option<String>,
}

/// Contract of the external download/list tool.
#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Resolve metadata for a video reference.
    async fn probe(&self, reference: &str) -> Result<VideoMetadata, FetchError>;

    /// Check whether one format selector would yield usable audio,
    /// without downloading anything.
    async fn check_format(&self, video_id: &str, selector: &str) -> Result<(), FetchError>;

    /// Download audio for one format selector into `audio_dir` and
    /// return the produced file path.
    async fn download_audio(
        &self,
        video_id: &str,
        selector: &str,
        audio_dir: &Path,
        audio_format: &str,
        audio_quality: &str,
    ) -> Result<PathBuf, FetchError>;

    /// List every available transcript track for a video.
    async fn list_transcripts(&self, video_id: &str) -> Result<Vec<TranscriptTrack>, FetchError>;

    /// List the video identifiers of a channel, in channel order.
    async fn list_channel_videos(
        &self,
        channel: &ChannelRef,
        limit: Option<usize>,
    ) -> Result<Vec<String>, FetchError>;
}

/// yt-dlp subprocess implementation of the download tool contract.
pub struct YtDlp {
    bin: String,
    credentials: CredentialConfig,
}

impl YtDlp {
    pub fn new(bin: impl Into<String>, credentials: CredentialConfig) -> Self {
        Self {
            bin: bin.into(),
            credentials,
        }
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = vec!["--quiet".to_string(), "--no-warnings".to_string()];
        args.extend(self.credentials.tool_args());
        args
    }

    async fn run(&self, args: &[String]) -> Result<Vec<u8>, FetchError> {
        let mut command = tokio::process::Command::new(&self.bin);
        command
            .args(self.base_args())
            .args(args)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true);

        debug!("Running: {} {}", self.bin, args.join(" "));
        let output = command
            .output()
            .await
            .map_err(|e| FetchError::Tool(format!("failed to spawn {}: {}", self.bin, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                "{} exited with {}; retry manually: {} {}",
                self.bin,
                output.status,
                self.bin,
                args.join(" ")
            );
            return Err(classify_tool_error(&stderr));
        }
        Ok(output.stdout)
    }
}

/// Map tool stderr onto the failure taxonomy.
fn classify_tool_error(stderr: &str) -> FetchError {
    let message = stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("unknown tool error")
        .trim()
        .to_string();
    let lowered = stderr.to_lowercase();

    let auth_markers = [
        "sign in to confirm",
        "login required",
        "private video",
        "members-only",
        "member-only",
        "use --cookies",
        "http error 403",
        "account has been terminated",
    ];
    if auth_markers.iter().any(|marker| lowered.contains(marker)) {
        return FetchError::Auth(message);
    }

    let format_markers = [
        "requested format is not available",
        "no video formats found",
        "format is not available",
    ];
    if format_markers.iter().any(|marker| lowered.contains(marker)) {
        return FetchError::NoFormats(message);
    }

    let extractor_markers = ["unsupported url", "is not a valid url", "unable to extract"];
    if extractor_markers.iter().any(|marker| lowered.contains(marker)) {
        return FetchError::Extractor(message);
    }

    FetchError::Tool(message)
}

fn metadata_from_value(value: &serde_json::Value) -> Result<VideoMetadata, FetchError> {
    // A playlist-like reference resolves to its first entry.
    let info = match value.get("entries").and_then(|e| e.as_array()) {
        Some(entries) => entries
            .iter()
            .find(|entry| !entry.is_null())
            .ok_or_else(|| FetchError::Extractor("playlist resolved to no entries".to_string()))?,
        None => value,
    };

    let id = info
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| FetchError::Extractor("could not resolve video metadata".to_string()))?;

    let text = |key: &str| info.get(key).and_then(|v| v.as_str()).map(str::to_string);
    Ok(VideoMetadata {
        id: id.to_string(),
        title: text("title"),
        channel: text("channel"),
        uploader: text("uploader"),
        duration_seconds: info.get("duration").and_then(|v| v.as_f64()),
        upload_date: text("upload_date"),
        language: text("language"),
    })
}

#[async_trait]
impl MediaTool for YtDlp {
    async fn probe(&self, reference: &str) -> Result<VideoMetadata, FetchError> {
        let args = vec![
            "-J".to_string(),
            "--no-playlist".to_string(),
            reference.to_string(),
        ];
        let stdout = self.run(&args).await?;
        let value: serde_json::Value = serde_json::from_slice(&stdout)
            .map_err(|e| FetchError::Tool(format!("unparseable metadata output: {}", e)))?;
        metadata_from_value(&value)
    }

    async fn check_format(&self, video_id: &str, selector: &str) -> Result<(), FetchError> {
        let args = vec![
            "--simulate".to_string(),
            "--no-playlist".to_string(),
            "-f".to_string(),
            selector.to_string(),
            watch_url(video_id),
        ];
        self.run(&args).await.map(|_| ())
    }

    async fn download_audio(
        &self,
        video_id: &str,
        selector: &str,
        audio_dir: &Path,
        audio_format: &str,
        audio_quality: &str,
    ) -> Result<PathBuf, FetchError> {
        tokio::fs::create_dir_all(audio_dir).await?;
        let output_template = audio_dir.join("source.%(ext)s");
        let args = vec![
            "--no-playlist".to_string(),
            "--no-progress".to_string(),
            "--force-overwrites".to_string(),
            "-f".to_string(),
            selector.to_string(),
            "-x".to_string(),
            "--audio-format".to_string(),
            audio_format.to_string(),
            "--audio-quality".to_string(),
            audio_quality.to_string(),
            "-o".to_string(),
            output_template.display().to_string(),
            watch_url(video_id),
        ];
        self.run(&args).await?;

        let target = audio_dir.join(format!("source.{}", audio_format));
        if target.exists() {
            return Ok(target);
        }

        // The postprocessor may keep the native extension.
        let mut candidates = Vec::new();
        let mut entries = tokio::fs::read_dir(audio_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_file()
                && path
                    .file_stem()
                    .map_or(false, |stem| stem.to_string_lossy() == "source")
            {
                candidates.push(path);
            }
        }
        candidates.sort();
        candidates.into_iter().next().ok_or_else(|| {
            FetchError::Tool(format!(
                "download did not produce a file for video {}",
                video_id
            ))
        })
    }

    async fn list_transcripts(&self, video_id: &str) -> Result<Vec<TranscriptTrack>, FetchError> {
        let workdir = tempfile::tempdir().map_err(FetchError::Io)?;
        let mut tracks = Vec::new();

        for (flag, is_generated) in [("--write-subs", false), ("--write-auto-subs", true)] {
            let dir = workdir.path().join(if is_generated { "auto" } else { "manual" });
            tokio::fs::create_dir_all(&dir).await?;
            let args = vec![
                "--skip-download".to_string(),
                flag.to_string(),
                "--sub-langs".to_string(),
                "all".to_string(),
                "--sub-format".to_string(),
                "json3".to_string(),
                "-o".to_string(),
                dir.join("%(id)s").display().to_string(),
                watch_url(video_id),
            ];
            self.run(&args).await?;

            let prefix = format!("{}.", video_id);
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().into_owned();
                let code = match name
                    .strip_prefix(&prefix)
                    .and_then(|rest| rest.strip_suffix(".json3"))
                {
                    Some(code) if !code.is_empty() => code.to_string(),
                    _ => continue,
                };
                let content = tokio::fs::read_to_string(&path).await?;
                let raw: serde_json::Value = serde_json::from_str(&content)
                    .map_err(|e| FetchError::Tool(format!("unparseable caption payload: {}", e)))?;
                tracks.push(TranscriptTrack {
                    language: code.clone(),
                    language_code: code,
                    is_generated,
                    entries: entries_from_json3(&raw),
                });
            }
        }

        // Manual tracks first, then by language code, for stable output.
        tracks.sort_by(|a, b| {
            (a.is_generated, &a.language_code).cmp(&(b.is_generated, &b.language_code))
        });
        Ok(tracks)
    }

    async fn list_channel_videos(
        &self,
        channel: &ChannelRef,
        limit: Option<usize>,
    ) -> Result<Vec<String>, FetchError> {
        let args = vec![
            "-J".to_string(),
            "--flat-playlist".to_string(),
            channel.videos_url(),
        ];
        let stdout = self.run(&args).await?;
        let value: serde_json::Value = serde_json::from_slice(&stdout)
            .map_err(|e| FetchError::Tool(format!("unparseable channel listing: {}", e)))?;

        let entries = value
            .get("entries")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                FetchError::Extractor(format!(
                    "channel listing had no entries: {}",
                    channel.reference()
                ))
            })?;

        let ids = entries
            .iter()
            .filter_map(|entry| entry.get("id").and_then(|v| v.as_str()))
            .map(str::to_string);
        Ok(match limit {
            Some(limit) => ids.take(limit).collect(),
            None => ids.collect(),
        })
    }
}

/// A fetched unit: metadata plus the audio artifact.
#[derive(Debug, Clone)]
pub struct FetchedUnit {
    pub metadata: VideoMetadata,
    pub audio_path: PathBuf,
    /// Audio already existed and was reused without a tool invocation.
    pub audio_reused: bool,
    /// The selector that produced the audio, when downloaded this run.
    pub selector: Option<String>,
}

/// A fetch failure, remembering whether the metadata probe had
/// succeeded before the failure happened.
#[derive(Debug)]
pub struct FetchFailure {
    pub metadata_ok: bool,
    pub error: FetchError,
}

impl FetchFailure {
    fn before_metadata(error: FetchError) -> Self {
        Self {
            metadata_ok: false,
            error,
        }
    }

    fn after_metadata(error: FetchError) -> Self {
        Self {
            metadata_ok: true,
            error,
        }
    }

    /// The distinguished "auth ok, formats unavailable" condition.
    pub fn is_formats_unavailable(&self) -> bool {
        self.metadata_ok && matches!(self.error, FetchError::NoFormats(_))
    }
}

/// Download/extract adapter: idempotence skip plus the prioritized
/// format-selector fallback chain. First selector success wins.
pub struct Downloader {
    tool: Arc<dyn MediaTool>,
    audio: AudioConfig,
    overwrite: bool,
}

impl Downloader {
    pub fn new(tool: Arc<dyn MediaTool>, audio: AudioConfig, overwrite: bool) -> Self {
        Self {
            tool,
            audio,
            overwrite,
        }
    }

    pub async fn fetch(
        &self,
        video_id: &str,
        url: &str,
        video_root: &Path,
    ) -> Result<FetchedUnit, FetchFailure> {
        let metadata = self
            .tool
            .probe(url)
            .await
            .map_err(FetchFailure::before_metadata)?;

        let audio_dir = video_root.join("audio");
        let target = audio_dir.join(format!("source.{}", self.audio.format));
        if target.exists() && !self.overwrite {
            debug!("Audio already present for {}, skipping download", video_id);
            return Ok(FetchedUnit {
                metadata,
                audio_path: target,
                audio_reused: true,
                selector: None,
            });
        }

        let mut format_failures = Vec::new();
        for selector in &self.audio.format_selectors {
            match self
                .tool
                .download_audio(
                    video_id,
                    selector,
                    &audio_dir,
                    &self.audio.format,
                    &self.audio.quality,
                )
                .await
            {
                Ok(path) => {
                    debug!("Selector {} succeeded for {}", selector, video_id);
                    return Ok(FetchedUnit {
                        metadata,
                        audio_path: path,
                        audio_reused: false,
                        selector: Some(selector.clone()),
                    });
                }
                Err(error) => {
                    warn!(
                        "Selector {} failed for {}: {}, trying next",
                        selector, video_id, error
                    );
                    format_failures.push((selector.clone(), error));
                }
            }
        }

        // Prefer a non-format error as the unit's outcome; a chain that
        // failed only on formats reports the distinguished condition.
        let all_formats = format_failures
            .iter()
            .all(|(_, error)| matches!(error, FetchError::NoFormats(_)));
        if all_formats {
            let attempts = format_failures
                .iter()
                .map(|(selector, _)| selector.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            Err(FetchFailure::after_metadata(FetchError::NoFormats(format!(
                "all selectors failed: {}",
                attempts
            ))))
        } else {
            let error = format_failures
                .into_iter()
                .map(|(_, error)| error)
                .find(|error| !matches!(error, FetchError::NoFormats(_)))
                .unwrap_or_else(|| FetchError::Tool("no format selectors configured".to_string()));
            Err(FetchFailure::after_metadata(error))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SelectorTool {
        succeed_on: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MediaTool for SelectorTool {
        async fn probe(&self, _reference: &str) -> Result<VideoMetadata, FetchError> {
            Ok(VideoMetadata {
                id: "aaaaaaaaaaa".to_string(),
                title: Some("probe".to_string()),
                channel: None,
                uploader: None,
                duration_seconds: Some(10.0),
                upload_date: None,
                language: None,
            })
        }

        async fn check_format(&self, _id: &str, selector: &str) -> Result<(), FetchError> {
            if selector == self.succeed_on {
                Ok(())
            } else {
                Err(FetchError::NoFormats(selector.to_string()))
            }
        }

        async fn download_audio(
            &self,
            _video_id: &str,
            selector: &str,
            audio_dir: &Path,
            audio_format: &str,
            _audio_quality: &str,
        ) -> Result<PathBuf, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if selector == self.succeed_on {
                tokio::fs::create_dir_all(audio_dir).await?;
                let path = audio_dir.join(format!("source.{}", audio_format));
                tokio::fs::write(&path, b"audio").await?;
                Ok(path)
            } else {
                Err(FetchError::NoFormats(format!(
                    "requested format is not available: {}",
                    selector
                )))
            }
        }

        async fn list_transcripts(
            &self,
            _video_id: &str,
        ) -> Result<Vec<TranscriptTrack>, FetchError> {
            Ok(Vec::new())
        }

        async fn list_channel_videos(
            &self,
            _channel: &ChannelRef,
            _limit: Option<usize>,
        ) -> Result<Vec<String>, FetchError> {
            Ok(Vec::new())
        }
    }

    fn audio_config() -> AudioConfig {
        AudioConfig {
            format: "mp3".to_string(),
            quality: "192".to_string(),
            format_selectors: vec!["a".to_string(), "b".to_string(), "c".to_string()],
        }
    }

    #[tokio::test]
    async fn test_selector_fallback_first_success_wins() {
        let dir = tempfile::tempdir().unwrap();
        let tool = Arc::new(SelectorTool {
            succeed_on: "c",
            calls: AtomicUsize::new(0),
        });
        let downloader = Downloader::new(tool.clone(), audio_config(), false);

        let fetched = downloader
            .fetch("aaaaaaaaaaa", "https://youtu.be/aaaaaaaaaaa", dir.path())
            .await
            .unwrap();

        assert_eq!(fetched.selector.as_deref(), Some("c"));
        assert!(!fetched.audio_reused);
        assert_eq!(tool.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_all_selectors_failing_is_formats_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let tool = Arc::new(SelectorTool {
            succeed_on: "never",
            calls: AtomicUsize::new(0),
        });
        let downloader = Downloader::new(tool, audio_config(), false);

        let failure = downloader
            .fetch("aaaaaaaaaaa", "https://youtu.be/aaaaaaaaaaa", dir.path())
            .await
            .unwrap_err();

        assert!(failure.metadata_ok);
        assert!(failure.is_formats_unavailable());
    }

    #[tokio::test]
    async fn test_existing_audio_is_reused_without_tool_calls() {
        let dir = tempfile::tempdir().unwrap();
        let audio_dir = dir.path().join("audio");
        tokio::fs::create_dir_all(&audio_dir).await.unwrap();
        tokio::fs::write(audio_dir.join("source.mp3"), b"existing")
            .await
            .unwrap();

        let tool = Arc::new(SelectorTool {
            succeed_on: "a",
            calls: AtomicUsize::new(0),
        });
        let downloader = Downloader::new(tool.clone(), audio_config(), false);

        let fetched = downloader
            .fetch("aaaaaaaaaaa", "https://youtu.be/aaaaaaaaaaa", dir.path())
            .await
            .unwrap();

        assert!(fetched.audio_reused);
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_classify_tool_error() {
        assert!(matches!(
            classify_tool_error("ERROR: Sign in to confirm you're not a bot"),
            FetchError::Auth(_)
        ));
        assert!(matches!(
            classify_tool_error("ERROR: Requested format is not available"),
            FetchError::NoFormats(_)
        ));
        assert!(matches!(
            classify_tool_error("ERROR: Unsupported URL: https://example.com"),
            FetchError::Extractor(_)
        ));
        assert!(matches!(
            classify_tool_error("something exploded"),
            FetchError::Tool(_)
        ));
        assert_eq!(classify_tool_error("ERROR: Private video").kind(), "auth");
    }

    #[test]
    fn test_metadata_from_value_uses_first_playlist_entry() {
        let value = serde_json::json!({
            "entries": [null, {"id": "bbbbbbbbbbb", "title": "second", "duration": 12.5}]
        });
        let metadata = metadata_from_value(&value).unwrap();
        assert_eq!(metadata.id, "bbbbbbbbbbb");
        assert_eq!(metadata.duration_seconds, Some(12.5));

        let missing = serde_json::json!({"title": "no id"});
        assert!(metadata_from_value(&missing).is_err());
    }
}

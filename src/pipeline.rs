use anyhow::{anyhow, Result};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::config::{AudioConfig, RuntimeConfig, SegmentConfig, ToolsConfig, TranscriptConfig};
use crate::fetch::{Downloader, MediaTool};
use crate::manifest::{
    now_iso, ChannelRecord, ExpansionLog, ManifestStore, ManifestSummary, UnitRecord, UnitStatus,
};
use crate::pool::WorkerPool;
use crate::resolver::{
    channel_slug, resolve_video_units, watch_url, ChannelRef, ResolveFailure, Unit, UnitCollector,
};
use crate::segment::{SegmentCutter, SegmentSummary, Transcoder};
use crate::transcripts::{collect_segment_tracks, store_tracks, TranscriptSummary};

/// Whether credential inputs were provided, echoed into snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialFlags {
    pub cookie_file: bool,
    pub browser: bool,
}

/// Everything a run needs, resolved eagerly before any pool exists.
#[derive(Clone)]
pub struct RunConfig {
    pub dataset_root: PathBuf,
    pub runtime: RuntimeConfig,
    pub audio: AudioConfig,
    pub transcripts: TranscriptConfig,
    pub segments: SegmentConfig,
    pub tools: ToolsConfig,
    pub overwrite: bool,
    pub generate_segments: bool,
    pub max_videos_per_channel: Option<usize>,
    pub credentials: CredentialFlags,
}

/// Final run report surfaced to the CLI.
#[derive(Debug)]
pub struct RunReport {
    pub summary: ManifestSummary,
}

impl RunReport {
    /// Non-zero iff any unit failed outright. The partial condition is
    /// reported in the summary without aborting the batch.
    pub fn exit_code(&self) -> i32 {
        if self.summary.failed_count > 0 {
            1
        } else {
            0
        }
    }
}

/// Composes resolver, adapter, cutter, pools and manifest store into
/// the two entry flows.
pub struct Pipeline {
    config: Arc<RunConfig>,
    tool: Arc<dyn MediaTool>,
    transcoder: Arc<dyn Transcoder>,
}

impl Pipeline {
    pub fn new(
        config: RunConfig,
        tool: Arc<dyn MediaTool>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            tool,
            transcoder,
        }
    }

    /// URL-first flow: references are video URLs/ids.
    pub async fn run_urls(&self, references: Vec<String>) -> Result<RunReport> {
        let start = Instant::now();
        self.ensure_layout(false).await?;
        let run_id = run_id();

        let snapshot = self
            .config
            .dataset_root
            .join("links")
            .join(format!("input_{}.txt", run_id));
        write_lines(&snapshot, &references).await?;

        let (units, failures) = resolve_video_units(&references);
        info!(
            "🚀 Processing {} video(s) ({} unresolvable reference(s))",
            units.len(),
            failures.len()
        );

        let store = Arc::new(
            ManifestStore::open(&self.config.dataset_root.join("manifests"), "").await?,
        );
        self.process_units(units, failures, Arc::clone(&store))
            .await?;

        let summary = store
            .finalize(self.runtime_context(), start.elapsed().as_secs_f64())
            .await?;
        info!(
            "🎉 Run complete: {} success, {} partial, {} failed, {} skipped in {:.1}s",
            summary.success_count,
            summary.partial_count,
            summary.failed_count,
            summary.skipped_count,
            summary.elapsed_seconds
        );
        Ok(RunReport { summary })
    }

    /// Channel-first flow: references are channel handles/ids/URLs,
    /// expanded into video units first.
    pub async fn run_channels(&self, references: Vec<String>) -> Result<RunReport> {
        let start = Instant::now();
        self.ensure_layout(true).await?;
        let run_id = run_id();

        let snapshot = self
            .config
            .dataset_root
            .join("links")
            .join(format!("channel_input_{}.txt", run_id));
        write_lines(&snapshot, &references).await?;

        let expansion_log =
            Arc::new(ExpansionLog::open(&self.config.dataset_root.join("manifests")).await?);
        let total_channels = references.len();
        info!("🔍 Expanding {} channel(s)", total_channels);

        let pool = WorkerPool::new(self.config.runtime.channel_workers);
        let config = Arc::clone(&self.config);
        let tool = Arc::clone(&self.tool);
        let log = Arc::clone(&expansion_log);
        let expansions = pool
            .run(references, move |index, reference| {
                let config = Arc::clone(&config);
                let tool = Arc::clone(&tool);
                let log = Arc::clone(&log);
                async move {
                    let (record, urls) =
                        expand_channel(&config, tool.as_ref(), index, &reference).await;
                    info!(
                        "[channel {}/{}] {} -> {} ({} videos)",
                        index + 1,
                        total_channels,
                        reference,
                        record.status,
                        record.video_count
                    );
                    log.append(&record)
                        .await
                        .map_err(|e| e.to_string())
                        .map(|_| (record, urls))
                }
            })
            .await;

        let mut channel_records = Vec::new();
        let mut collector = UnitCollector::new();
        for expansion in expansions {
            let (record, urls) = expansion.map_err(|e| anyhow!("manifest write failed: {}", e))?;
            for url in &urls {
                collector.add(url, Some(&record.channel_slug));
            }
            channel_records.push(record);
        }
        let (units, failures) = collector.finish();

        let expanded_snapshot = self
            .config
            .dataset_root
            .join("links")
            .join(format!("channel_video_urls_{}.txt", run_id));
        let urls: Vec<String> = units.iter().map(|u| u.url.clone()).collect();
        write_lines(&expanded_snapshot, &urls).await?;

        info!(
            "📹 Channels expanded to {} unique video(s)",
            units.len()
        );

        let store = Arc::new(
            ManifestStore::open(&self.config.dataset_root.join("manifests"), "channel_").await?,
        );
        self.process_units(units, failures, Arc::clone(&store))
            .await?;

        let mut context = self.runtime_context();
        context.insert("channels_total".to_string(), json!(channel_records.len()));
        context.insert(
            "channels_succeeded".to_string(),
            json!(channel_records.iter().filter(|r| r.status == "success").count()),
        );
        context.insert(
            "channels_failed".to_string(),
            json!(channel_records.iter().filter(|r| r.status == "failed").count()),
        );
        context.insert(
            "channels_reused".to_string(),
            json!(channel_records.iter().filter(|r| r.reused).count()),
        );

        let summary = store
            .finalize(context, start.elapsed().as_secs_f64())
            .await?;
        info!(
            "🎉 Run complete: {} success, {} partial, {} failed, {} skipped in {:.1}s",
            summary.success_count,
            summary.partial_count,
            summary.failed_count,
            summary.skipped_count,
            summary.elapsed_seconds
        );
        Ok(RunReport { summary })
    }

    /// Shared per-unit path used by both flows.
    async fn process_units(
        &self,
        units: Vec<Unit>,
        resolve_failures: Vec<ResolveFailure>,
        store: Arc<ManifestStore>,
    ) -> Result<()> {
        for failure in &resolve_failures {
            warn!(
                "Skipping unresolvable reference {}: {}",
                failure.reference, failure.reason
            );
            let record = UnitRecord::failed(
                &failure.reference,
                None,
                "resolution",
                &failure.reason,
            );
            store.append(&record).await?;
        }

        if units.is_empty() {
            return Ok(());
        }

        let total = units.len();
        let processor = Arc::new(UnitProcessor {
            config: Arc::clone(&self.config),
            downloader: Downloader::new(
                Arc::clone(&self.tool),
                self.config.audio.clone(),
                self.config.overwrite,
            ),
            tool: Arc::clone(&self.tool),
            transcoder: Arc::clone(&self.transcoder),
            store: Arc::clone(&store),
        });

        let pool = WorkerPool::new(self.config.runtime.video_workers);
        let outcomes = pool
            .run(units, move |index, unit| {
                let processor = Arc::clone(&processor);
                async move {
                    let record = processor.process(&unit).await;
                    info!(
                        "[video {}/{}] {} -> {}",
                        index + 1,
                        total,
                        unit.url,
                        status_suffix(&record)
                    );
                    processor
                        .store
                        .append(&record)
                        .await
                        .map_err(|e| e.to_string())
                }
            })
            .await;

        for outcome in outcomes {
            outcome.map_err(|e| anyhow!("manifest write failed: {}", e))?;
        }
        Ok(())
    }

    async fn ensure_layout(&self, with_channels: bool) -> Result<()> {
        let root = &self.config.dataset_root;
        tokio::fs::create_dir_all(root.join("videos")).await?;
        tokio::fs::create_dir_all(root.join("manifests")).await?;
        tokio::fs::create_dir_all(root.join("links")).await?;
        if with_channels {
            tokio::fs::create_dir_all(root.join("channels")).await?;
        }
        Ok(())
    }

    fn runtime_context(&self) -> serde_json::Map<String, serde_json::Value> {
        let runtime = &self.config.runtime;
        let mut context = serde_json::Map::new();
        context.insert(
            "dataset_root".to_string(),
            json!(self.config.dataset_root.display().to_string()),
        );
        context.insert("system".to_string(), json!(runtime.system.as_str()));
        context.insert(
            "detected_system".to_string(),
            json!(runtime.detected_system.as_str()),
        );
        context.insert("cpu_count".to_string(), json!(runtime.cpu_count));
        context.insert("channel_workers".to_string(), json!(runtime.channel_workers));
        context.insert("video_workers".to_string(), json!(runtime.video_workers));
        context.insert("segment_workers".to_string(), json!(runtime.segment_workers));
        context.insert("ffmpeg_bin".to_string(), json!(self.config.tools.ffmpeg_bin));
        context.insert(
            "cookie_file_provided".to_string(),
            json!(self.config.credentials.cookie_file),
        );
        context.insert(
            "cookies_from_browser_provided".to_string(),
            json!(self.config.credentials.browser),
        );
        context
    }
}

/// Per-worker processing state, cloned cheaply into video workers.
struct UnitProcessor {
    config: Arc<RunConfig>,
    downloader: Downloader,
    tool: Arc<dyn MediaTool>,
    transcoder: Arc<dyn Transcoder>,
    store: Arc<ManifestStore>,
}

impl UnitProcessor {
    /// Process a single unit end to end. Every exit path yields a
    /// record; nothing here aborts sibling units.
    async fn process(&self, unit: &Unit) -> UnitRecord {
        let started_at = now_iso();

        if !self.config.overwrite && self.store.is_done(&unit.video_id).await {
            let mut record = UnitRecord::skipped(&unit.url, &unit.video_id);
            record.started_at = Some(started_at);
            return record;
        }

        let video_root = self
            .config
            .dataset_root
            .join("videos")
            .join(&unit.video_id);

        let fetched = match self
            .downloader
            .fetch(&unit.video_id, &unit.url, &video_root)
            .await
        {
            Ok(fetched) => fetched,
            Err(failure) => {
                let (status, kind) = if failure.is_formats_unavailable() {
                    (UnitStatus::Partial, "no_usable_format")
                } else {
                    (UnitStatus::Failed, failure.error.kind())
                };
                let mut record = UnitRecord::new(&unit.url, Some(&unit.video_id), status);
                record.error_kind = Some(kind.to_string());
                record.error = Some(failure.error.to_string());
                record.started_at = Some(started_at);
                return record;
            }
        };

        // Transcripts: failures are captured, never thrown upward.
        let transcripts_dir = video_root.join("transcripts");
        let mut transcript_error: Option<String> = None;
        let tracks = match self.tool.list_transcripts(&unit.video_id).await {
            Ok(tracks) => tracks,
            Err(e) => {
                transcript_error = Some(e.to_string());
                Vec::new()
            }
        };
        let transcript_summary = if transcript_error.is_none() {
            match store_tracks(
                &transcripts_dir,
                &tracks,
                self.config.transcripts.auto_language.as_deref(),
                self.config.transcripts.include_all,
                self.config.overwrite,
            )
            .await
            {
                Ok(summary) => summary,
                Err(e) => {
                    transcript_error = Some(e.to_string());
                    TranscriptSummary::default()
                }
            }
        } else {
            TranscriptSummary::default()
        };

        // Segments, short-circuited by --no-segments.
        let mut segment_error: Option<String> = None;
        let mut segment_summary: Option<SegmentSummary> = None;
        if self.config.generate_segments {
            if transcript_error.is_none() {
                let segment_tracks = collect_segment_tracks(
                    &tracks,
                    self.config.transcripts.auto_language.as_deref(),
                    self.config.transcripts.include_all,
                );
                let cutter = SegmentCutter::new(
                    Arc::clone(&self.transcoder),
                    self.config.segments.clone(),
                    self.config.runtime.segment_workers,
                    self.config.overwrite,
                );
                match cutter
                    .cut_all(&fetched.audio_path, &segment_tracks, &video_root.join("segments"))
                    .await
                {
                    Ok(summary) => {
                        segment_error = summary.error.clone();
                        segment_summary = Some(summary);
                    }
                    Err(e) => segment_error = Some(e.to_string()),
                }
            } else {
                segment_error = Some("Skipped because transcript fetch failed.".to_string());
            }
        }

        let metadata_path = video_root.join("metadata.json");
        if let Err(e) = self
            .write_metadata_snapshot(
                unit,
                &fetched.metadata,
                &fetched.audio_path,
                &transcript_summary,
                transcript_error.as_deref(),
                segment_summary.as_ref(),
                segment_error.as_deref(),
                &metadata_path,
            )
            .await
        {
            warn!("Failed to write metadata snapshot for {}: {}", unit.video_id, e);
        }

        let status = if transcript_error.is_none() && segment_error.is_none() {
            UnitStatus::Success
        } else {
            UnitStatus::Partial
        };

        let mut record = UnitRecord::new(&unit.url, Some(&unit.video_id), status);
        record.title = fetched.metadata.title.clone();
        record.duration_seconds = fetched.metadata.duration_seconds;
        record.audio_path = Some(self.relative(&fetched.audio_path));
        record.default_transcript_path = transcript_summary
            .default_path
            .as_deref()
            .map(|p| self.relative(p));
        record.auto_language = self
            .config
            .transcripts
            .auto_language
            .clone()
            .or_else(|| transcript_summary.auto_language_code.clone());
        record.auto_transcript_path = transcript_summary
            .auto_language_path
            .as_deref()
            .map(|p| self.relative(p));
        record.auto_transcript_mode = Some(transcript_summary.auto_language_mode.clone());
        record.segment_count = segment_summary
            .as_ref()
            .map(|s| s.segment_count as u64)
            .unwrap_or(0);
        record.segments_index_path = segment_summary
            .as_ref()
            .and_then(|s| s.index_path.as_deref())
            .map(|p| self.relative(p));
        record.metadata_path = Some(self.relative(&metadata_path));
        if status == UnitStatus::Partial {
            record.error_kind = Some(if transcript_error.is_some() {
                "transcripts".to_string()
            } else {
                "segments".to_string()
            });
            record.error = transcript_error.or(segment_error);
        }
        record.started_at = Some(started_at);
        record
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_metadata_snapshot(
        &self,
        unit: &Unit,
        metadata: &crate::fetch::VideoMetadata,
        audio_path: &Path,
        transcripts: &TranscriptSummary,
        transcript_error: Option<&str>,
        segments: Option<&SegmentSummary>,
        segment_error: Option<&str>,
        path: &Path,
    ) -> Result<()> {
        let available: Vec<serde_json::Value> = transcripts
            .available
            .iter()
            .map(|item| {
                json!({
                    "language": item.language,
                    "language_code": item.language_code,
                    "is_generated": item.is_generated,
                    "path": self.relative(&item.path),
                })
            })
            .collect();

        let snapshot = json!({
            "video_id": unit.video_id.clone(),
            "url": unit.url.clone(),
            "channel_slug": unit.channel_slug.clone(),
            "title": metadata.title.clone(),
            "channel": metadata.channel.clone(),
            "uploader": metadata.uploader.clone(),
            "duration_seconds": metadata.duration_seconds,
            "upload_date": metadata.upload_date.clone(),
            "language_hint": metadata.language.clone(),
            "audio_path": self.relative(audio_path),
            "transcripts": {
                "default_path": transcripts.default_path.as_deref().map(|p| self.relative(p)),
                "auto_language": self.config.transcripts.auto_language.clone()
                    .or_else(|| transcripts.auto_language_code.clone()),
                "auto_language_mode": transcripts.auto_language_mode.clone(),
                "auto_language_path": transcripts.auto_language_path.as_deref().map(|p| self.relative(p)),
                "available": available,
                "error": transcript_error,
            },
            "segments": {
                "enabled": self.config.generate_segments,
                "segment_count": segments.map(|s| s.segment_count).unwrap_or(0),
                "skipped_count": segments.map(|s| s.skipped_count).unwrap_or(0),
                "failed_count": segments.map(|s| s.failed_count).unwrap_or(0),
                "base_track": segments.and_then(|s| s.base_track.clone()),
                "segment_format": self.config.generate_segments.then(|| self.config.segments.format.clone()),
                "index_path": segments.and_then(|s| s.index_path.as_deref().map(|p| self.relative(p))),
                "segments_dir": segments.map(|s| self.relative(&s.segments_dir)),
                "error": segment_error,
            },
            "auth": {
                "cookie_file_provided": self.config.credentials.cookie_file,
                "cookies_from_browser_provided": self.config.credentials.browser,
            },
            "created_at": now_iso(),
        });

        tokio::fs::write(path, format!("{:#}\n", snapshot)).await?;
        Ok(())
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.config.dataset_root)
            .unwrap_or(path)
            .display()
            .to_string()
    }
}

/// Expand one channel reference, reusing an existing video list unless
/// overwrite is set. Failures are isolated per channel.
async fn expand_channel(
    config: &RunConfig,
    tool: &dyn MediaTool,
    index: usize,
    reference: &str,
) -> (ChannelRecord, Vec<String>) {
    let slug = channel_slug(reference, index + 1);
    let channel_root = config.dataset_root.join("channels").join(&slug);
    let videos_file = channel_root.join("videos.txt");
    let channel = ChannelRef::classify(reference);

    if videos_file.exists() && !config.overwrite {
        let urls = match tokio::fs::read_to_string(&videos_file).await {
            Ok(content) => content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>(),
            Err(e) => {
                warn!("Could not reuse {}: {}", videos_file.display(), e);
                Vec::new()
            }
        };
        if !urls.is_empty() {
            let record = ChannelRecord {
                channel_ref: reference.to_string(),
                channel_slug: slug,
                status: "success".to_string(),
                reused: true,
                video_count: urls.len(),
                error: None,
                fetched_at: now_iso(),
            };
            return (record, urls);
        }
    }

    if let Err(e) = tokio::fs::create_dir_all(&channel_root).await {
        let record = ChannelRecord {
            channel_ref: reference.to_string(),
            channel_slug: slug,
            status: "failed".to_string(),
            reused: false,
            video_count: 0,
            error: Some(e.to_string()),
            fetched_at: now_iso(),
        };
        return (record, Vec::new());
    }

    match tool
        .list_channel_videos(&channel, config.max_videos_per_channel)
        .await
    {
        Ok(ids) => {
            let mut seen = std::collections::HashSet::new();
            let urls: Vec<String> = ids
                .into_iter()
                .filter(|id| seen.insert(id.clone()))
                .map(|id| watch_url(&id))
                .collect();

            let mut content = urls.join("\n");
            if !content.is_empty() {
                content.push('\n');
            }
            let write_result = tokio::fs::write(&videos_file, content).await;

            let metadata = json!({
                "source_ref": reference,
                "resolver": channel_kind(&channel),
                "channel_slug": slug.clone(),
                "video_count": urls.len(),
                "fetched_at": now_iso(),
                "videos_file": videos_file.display().to_string(),
            });
            let _ = tokio::fs::write(
                channel_root.join("metadata.json"),
                format!("{:#}\n", metadata),
            )
            .await;

            match write_result {
                Ok(()) => {
                    let record = ChannelRecord {
                        channel_ref: reference.to_string(),
                        channel_slug: slug,
                        status: "success".to_string(),
                        reused: false,
                        video_count: urls.len(),
                        error: None,
                        fetched_at: now_iso(),
                    };
                    (record, urls)
                }
                Err(e) => {
                    let record = ChannelRecord {
                        channel_ref: reference.to_string(),
                        channel_slug: slug,
                        status: "failed".to_string(),
                        reused: false,
                        video_count: 0,
                        error: Some(e.to_string()),
                        fetched_at: now_iso(),
                    };
                    (record, Vec::new())
                }
            }
        }
        Err(e) => {
            let metadata = json!({
                "source_ref": reference,
                "channel_slug": slug.clone(),
                "status": "failed",
                "error": e.to_string(),
                "fetched_at": now_iso(),
            });
            let _ = tokio::fs::write(
                channel_root.join("metadata.json"),
                format!("{:#}\n", metadata),
            )
            .await;

            let record = ChannelRecord {
                channel_ref: reference.to_string(),
                channel_slug: slug,
                status: "failed".to_string(),
                reused: false,
                video_count: 0,
                error: Some(e.to_string()),
                fetched_at: now_iso(),
            };
            (record, Vec::new())
        }
    }
}

fn channel_kind(channel: &ChannelRef) -> &'static str {
    match channel {
        ChannelRef::Handle(_) => "handle",
        ChannelRef::ChannelId(_) => "channel_id",
        ChannelRef::Url(_) => "channel_url",
        ChannelRef::Username(_) => "username",
    }
}

fn run_id() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

async fn write_lines(path: &Path, lines: &[String]) -> Result<()> {
    let mut content = lines.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    tokio::fs::write(path, content).await?;
    Ok(())
}

/// Compact status line for the per-unit log, with the error folded in.
fn status_suffix(record: &UnitRecord) -> String {
    let status = match record.status {
        UnitStatus::Success => "success",
        UnitStatus::Partial => "partial",
        UnitStatus::Failed => "failed",
        UnitStatus::Skipped => "skipped",
    };
    match &record.error {
        Some(error) if record.status != UnitStatus::Success => {
            let compact: String = error.split_whitespace().collect::<Vec<_>>().join(" ");
            let compact = if compact.chars().count() > 180 {
                let truncated: String = compact.chars().take(177).collect();
                format!("{}...", truncated)
            } else {
                compact
            };
            format!("{} ({})", status, compact)
        }
        _ => status.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::UnitRecord;

    #[test]
    fn test_status_suffix_truncates_long_errors() {
        let record = UnitRecord::failed(
            "https://youtu.be/aaaaaaaaaaa",
            Some("aaaaaaaaaaa"),
            "auth",
            &"x".repeat(400),
        );
        let suffix = status_suffix(&record);
        assert!(suffix.starts_with("failed ("));
        assert!(suffix.ends_with("...)"));
        assert!(suffix.chars().count() < 200);
    }

    #[test]
    fn test_status_suffix_plain_success() {
        let record = UnitRecord::new(
            "https://youtu.be/aaaaaaaaaaa",
            Some("aaaaaaaaaaa"),
            UnitStatus::Success,
        );
        assert_eq!(status_suffix(&record), "success");
    }
}

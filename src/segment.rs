use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::SegmentConfig;
use crate::pool::WorkerPool;
use crate::transcripts::{SegmentTrack, TranscriptEntry};

#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    #[error("transcode failed: {0}")]
    Transcode(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Contract of the external transcoding tool: cut `[start, start+duration)`
/// from a source audio file into the target format.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn cut(
        &self,
        source: &Path,
        output: &Path,
        start: f64,
        duration: f64,
        audio_format: &str,
        bitrate: &str,
    ) -> Result<(), SegmentError>;
}

/// ffmpeg subprocess implementation.
pub struct FfmpegTranscoder {
    bin: String,
}

impl FfmpegTranscoder {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }
}

/// Codec arguments per segment format.
pub fn codec_args(audio_format: &str, bitrate: &str) -> Vec<String> {
    let owned = |args: &[&str]| args.iter().map(|s| s.to_string()).collect();
    match audio_format.to_lowercase().as_str() {
        "mp3" => owned(&["-c:a", "libmp3lame", "-b:a", bitrate]),
        "wav" | "wave" => owned(&["-c:a", "pcm_s16le"]),
        "m4a" | "aac" => owned(&["-c:a", "aac", "-b:a", bitrate]),
        "flac" => owned(&["-c:a", "flac"]),
        "opus" => owned(&["-c:a", "libopus", "-b:a", bitrate]),
        _ => Vec::new(),
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn cut(
        &self,
        source: &Path,
        output: &Path,
        start: f64,
        duration: f64,
        audio_format: &str,
        bitrate: &str,
    ) -> Result<(), SegmentError> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-threads".to_string(),
            "1".to_string(),
            "-ss".to_string(),
            format!("{:.3}", start),
            "-t".to_string(),
            format!("{:.3}", duration),
            "-i".to_string(),
            source.display().to_string(),
            "-vn".to_string(),
        ];
        args.extend(codec_args(audio_format, bitrate));
        args.push(output.display().to_string());

        let result = tokio::process::Command::new(&self.bin)
            .args(&args)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SegmentError::Transcode(format!("failed to spawn {}: {}", self.bin, e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            warn!(
                "Segment cut failed; retry manually: {} {}",
                self.bin,
                args.join(" ")
            );
            return Err(SegmentError::Transcode(
                stderr.trim().lines().last().unwrap_or("unknown error").to_string(),
            ));
        }
        Ok(())
    }
}

/// Text of every entry overlapping `[start, end)`, with matched indices.
pub fn collect_text_in_window(
    entries: &[TranscriptEntry],
    start: f64,
    end: f64,
) -> (String, Vec<usize>) {
    let mut texts = Vec::new();
    let mut matched = Vec::new();
    for (index, entry) in entries.iter().enumerate() {
        let entry_start = entry.start;
        let entry_end = entry.start + entry.duration;
        if entry_end <= start || entry_start >= end {
            continue;
        }
        let text = entry.text.trim();
        if text.is_empty() {
            continue;
        }
        texts.push(text.to_string());
        matched.push(index);
    }
    (texts.join(" ").trim().to_string(), matched)
}

/// One retained segment; its sequence index is assigned here, before
/// dispatch, so `index.jsonl` stays deterministic under parallel cuts.
#[derive(Debug, Clone)]
pub struct PlannedSegment {
    pub segment_id: String,
    pub index: usize,
    pub start: f64,
    pub duration: f64,
    pub end: f64,
    pub text: String,
    pub base_entry_index: usize,
}

#[derive(Debug, Clone)]
pub struct SegmentPlan {
    pub segments: Vec<PlannedSegment>,
    pub skipped_count: usize,
    pub base_track: String,
}

/// Plan segments from the base track: one per cue, dropping cues below
/// the configured duration/text minimums. Dropped cues are skips, not
/// failures.
pub fn plan_segments(tracks: &[SegmentTrack], config: &SegmentConfig) -> Option<SegmentPlan> {
    let base = tracks
        .iter()
        .find(|track| track.key == "default")
        .or_else(|| tracks.first())?;

    let mut segments = Vec::new();
    let mut skipped_count = 0;
    for (base_entry_index, entry) in base.entries.iter().enumerate() {
        let text = entry.text.trim();
        let start = entry.start.max(0.0);
        let duration = entry.duration;
        if duration < config.min_duration || text.chars().count() < config.min_chars {
            skipped_count += 1;
            continue;
        }

        let index = segments.len();
        segments.push(PlannedSegment {
            segment_id: format!("{:06}", index),
            index,
            start,
            duration,
            end: start + duration,
            text: text.to_string(),
            base_entry_index,
        });
    }

    Some(SegmentPlan {
        segments,
        skipped_count,
        base_track: base.key.clone(),
    })
}

/// One line of the per-video segment index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRow {
    pub segment_id: String,
    pub start: f64,
    pub duration: f64,
    pub end: f64,
    pub base_track: String,
    pub audio_path: String,
    pub transcripts_path: String,
    pub base_text: String,
}

#[derive(Serialize)]
struct SegmentBundle {
    segment_id: String,
    timing: SegmentTiming,
    tracks: BTreeMap<String, TrackWindow>,
}

#[derive(Serialize)]
struct SegmentTiming {
    start: f64,
    duration: f64,
    end: f64,
    base_track: String,
    base_entry_index: usize,
}

#[derive(Serialize)]
struct TrackWindow {
    text: String,
    entry_indices: Vec<usize>,
    language_code: Option<String>,
    is_generated: Option<bool>,
}

/// Additive per-video index: existing ids are loaded at open and never
/// re-appended, and concurrent appends are serialized per line.
struct SegmentIndex {
    path: PathBuf,
    seen: Mutex<HashSet<String>>,
}

impl SegmentIndex {
    async fn open(path: PathBuf) -> Result<Self, SegmentError> {
        let mut seen = HashSet::new();
        if path.exists() {
            let content = tokio::fs::read_to_string(&path).await?;
            for line in content.lines().filter(|l| !l.trim().is_empty()) {
                match serde_json::from_str::<IndexRow>(line) {
                    Ok(row) => {
                        seen.insert(row.segment_id);
                    }
                    Err(e) => warn!("Skipping corrupt index line in {}: {}", path.display(), e),
                }
            }
        }
        Ok(Self {
            path,
            seen: Mutex::new(seen),
        })
    }

    async fn append(&self, row: &IndexRow) -> Result<bool, SegmentError> {
        let line = format!("{}\n", serde_json::to_string(row)?);
        let mut seen = self.seen.lock().await;
        if !seen.insert(row.segment_id.clone()) {
            return Ok(false);
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(true)
    }
}

/// Summary of one video's segmentation, embedded into its metadata
/// snapshot and manifest record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentSummary {
    pub segment_count: usize,
    pub skipped_count: usize,
    pub failed_count: usize,
    pub base_track: Option<String>,
    pub index_path: Option<PathBuf>,
    pub segments_dir: PathBuf,
    pub error: Option<String>,
}

enum CutOutcome {
    Present,
    Failed(String),
}

/// Transcript-aligned segment cutter.
///
/// Layout under `output_root`:
/// - index.jsonl
/// - <segment_id>/audio.<format>
/// - <segment_id>/transcripts.json
pub struct SegmentCutter {
    transcoder: Arc<dyn Transcoder>,
    config: SegmentConfig,
    pool: WorkerPool,
    overwrite: bool,
}

impl SegmentCutter {
    pub fn new(
        transcoder: Arc<dyn Transcoder>,
        config: SegmentConfig,
        workers: usize,
        overwrite: bool,
    ) -> Self {
        Self {
            transcoder,
            config,
            pool: WorkerPool::new(workers),
            overwrite,
        }
    }

    pub async fn cut_all(
        &self,
        source_audio: &Path,
        tracks: &[SegmentTrack],
        output_root: &Path,
    ) -> Result<SegmentSummary, SegmentError> {
        let plan = match plan_segments(tracks, &self.config) {
            Some(plan) => plan,
            None => {
                return Ok(SegmentSummary {
                    segment_count: 0,
                    skipped_count: 0,
                    failed_count: 0,
                    base_track: None,
                    index_path: None,
                    segments_dir: output_root.to_path_buf(),
                    error: Some("No transcript tracks available for segmentation.".to_string()),
                })
            }
        };

        tokio::fs::create_dir_all(output_root).await?;
        let index_path = output_root.join("index.jsonl");
        let index = Arc::new(SegmentIndex::open(index_path.clone()).await?);

        let jobs: Vec<CutJob> = plan
            .segments
            .iter()
            .map(|segment| self.prepare_job(segment, tracks, &plan.base_track, output_root))
            .collect();

        let transcoder = Arc::clone(&self.transcoder);
        let audio_format = Arc::new(self.config.format.clone());
        let bitrate = Arc::new(self.config.bitrate.clone());
        let source = Arc::new(source_audio.to_path_buf());
        let overwrite = self.overwrite;
        let index_ref = Arc::clone(&index);

        let outcomes = self
            .pool
            .run(jobs, move |_, job| {
                let transcoder = Arc::clone(&transcoder);
                let audio_format = Arc::clone(&audio_format);
                let bitrate = Arc::clone(&bitrate);
                let source = Arc::clone(&source);
                let index = Arc::clone(&index_ref);
                async move {
                    materialize_segment(
                        job,
                        transcoder.as_ref(),
                        &source,
                        &audio_format,
                        &bitrate,
                        overwrite,
                        &index,
                    )
                    .await
                }
            })
            .await;

        let failed: Vec<String> = outcomes
            .iter()
            .filter_map(|outcome| match outcome {
                CutOutcome::Failed(message) => Some(message.clone()),
                CutOutcome::Present => None,
            })
            .collect();
        let failed_count = failed.len();
        let segment_count = plan.segments.len() - failed_count;

        if failed_count > 0 {
            warn!("{} segment cut(s) failed: {}", failed_count, failed.join("; "));
        }
        debug!(
            "Segments: {} present, {} skipped, {} failed under {}",
            segment_count,
            plan.skipped_count,
            failed_count,
            output_root.display()
        );

        Ok(SegmentSummary {
            segment_count,
            skipped_count: plan.skipped_count,
            failed_count,
            base_track: Some(plan.base_track),
            index_path: Some(index_path),
            segments_dir: output_root.to_path_buf(),
            error: if failed_count > 0 {
                Some(format!("{} segment(s) failed to cut", failed_count))
            } else {
                None
            },
        })
    }

    fn prepare_job(
        &self,
        segment: &PlannedSegment,
        tracks: &[SegmentTrack],
        base_track: &str,
        output_root: &Path,
    ) -> CutJob {
        let segment_dir = output_root.join(&segment.segment_id);
        let audio_path = segment_dir.join(format!("audio.{}", self.config.format));
        let bundle_path = segment_dir.join("transcripts.json");

        let mut windows = BTreeMap::new();
        for track in tracks {
            let (text, entry_indices) =
                collect_text_in_window(&track.entries, segment.start, segment.end);
            windows.insert(
                track.key.clone(),
                TrackWindow {
                    text,
                    entry_indices,
                    language_code: track.language_code.clone(),
                    is_generated: track.is_generated,
                },
            );
        }

        let bundle = SegmentBundle {
            segment_id: segment.segment_id.clone(),
            timing: SegmentTiming {
                start: segment.start,
                duration: segment.duration,
                end: segment.end,
                base_track: base_track.to_string(),
                base_entry_index: segment.base_entry_index,
            },
            tracks: windows,
        };

        let row = IndexRow {
            segment_id: segment.segment_id.clone(),
            start: segment.start,
            duration: segment.duration,
            end: segment.end,
            base_track: base_track.to_string(),
            audio_path: audio_path.display().to_string(),
            transcripts_path: bundle_path.display().to_string(),
            base_text: segment.text.clone(),
        };

        CutJob {
            segment_id: segment.segment_id.clone(),
            start: segment.start,
            duration: segment.duration,
            audio_path,
            bundle_path,
            bundle_json: serde_json::to_string_pretty(&bundle).unwrap_or_default(),
            row,
        }
    }
}

struct CutJob {
    segment_id: String,
    start: f64,
    duration: f64,
    audio_path: PathBuf,
    bundle_path: PathBuf,
    bundle_json: String,
    row: IndexRow,
}

async fn materialize_segment(
    job: CutJob,
    transcoder: &dyn Transcoder,
    source: &Path,
    audio_format: &str,
    bitrate: &str,
    overwrite: bool,
    index: &SegmentIndex,
) -> CutOutcome {
    // An existing output is skipped and still counted as present.
    if overwrite || !job.audio_path.exists() {
        if let Err(e) = transcoder
            .cut(
                source,
                &job.audio_path,
                job.start,
                job.duration,
                audio_format,
                bitrate,
            )
            .await
        {
            return CutOutcome::Failed(format!("{}: {}", job.segment_id, e));
        }
    }

    if let Some(parent) = job.bundle_path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            return CutOutcome::Failed(format!("{}: {}", job.segment_id, e));
        }
    }
    if let Err(e) = tokio::fs::write(&job.bundle_path, &job.bundle_json).await {
        return CutOutcome::Failed(format!("{}: {}", job.segment_id, e));
    }
    if let Err(e) = index.append(&job.row).await {
        return CutOutcome::Failed(format!("{}: {}", job.segment_id, e));
    }
    CutOutcome::Present
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeTranscoder {
        calls: AtomicUsize,
        fail_on: Option<&'static str>,
    }

    impl FakeTranscoder {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_on: None,
            }
        }

        fn failing_on(segment_id: &'static str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_on: Some(segment_id),
            }
        }
    }

    #[async_trait]
    impl Transcoder for FakeTranscoder {
        async fn cut(
            &self,
            _source: &Path,
            output: &Path,
            _start: f64,
            _duration: f64,
            _audio_format: &str,
            _bitrate: &str,
        ) -> Result<(), SegmentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(fail_on) = self.fail_on {
                let dir = output.parent().and_then(|p| p.file_name());
                if dir.map_or(false, |name| name.to_string_lossy() == fail_on) {
                    return Err(SegmentError::Transcode("boom".to_string()));
                }
            }
            if let Some(parent) = output.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(output, b"cut").await?;
            Ok(())
        }
    }

    fn config() -> SegmentConfig {
        SegmentConfig {
            format: "mp3".to_string(),
            bitrate: "128k".to_string(),
            min_duration: 0.25,
            min_chars: 1,
        }
    }

    fn base_track(entries: Vec<TranscriptEntry>) -> Vec<SegmentTrack> {
        vec![SegmentTrack {
            key: "default".to_string(),
            language_code: None,
            is_generated: None,
            entries,
        }]
    }

    fn entry(text: &str, start: f64, duration: f64) -> TranscriptEntry {
        TranscriptEntry {
            text: text.to_string(),
            start,
            duration,
        }
    }

    #[test]
    fn test_plan_filters_thresholds_and_keeps_indices_contiguous() {
        let tracks = base_track(vec![
            entry("too short", 0.0, 0.1),
            entry("first", 0.5, 1.0),
            entry("", 2.0, 3.0),
            entry("second", 5.0, 2.0),
        ]);
        let plan = plan_segments(&tracks, &config()).unwrap();

        assert_eq!(plan.segments.len(), 2);
        assert_eq!(plan.skipped_count, 2);
        assert_eq!(plan.segments[0].segment_id, "000000");
        assert_eq!(plan.segments[1].segment_id, "000001");
        assert_eq!(plan.segments[0].text, "first");
        assert_eq!(plan.segments[1].base_entry_index, 3);
        assert_eq!(plan.base_track, "default");
    }

    #[test]
    fn test_plan_with_no_tracks() {
        assert!(plan_segments(&[], &config()).is_none());
    }

    #[test]
    fn test_collect_text_in_window() {
        let entries = vec![
            entry("one", 0.0, 1.0),
            entry("two", 1.0, 1.0),
            entry("three", 2.5, 1.0),
        ];
        let (text, matched) = collect_text_in_window(&entries, 0.5, 2.0);
        assert_eq!(text, "one two");
        assert_eq!(matched, vec![0, 1]);

        let (text, matched) = collect_text_in_window(&entries, 3.5, 4.0);
        assert_eq!(text, "");
        assert!(matched.is_empty());
    }

    #[test]
    fn test_codec_args() {
        assert_eq!(
            codec_args("mp3", "128k"),
            vec!["-c:a", "libmp3lame", "-b:a", "128k"]
        );
        assert_eq!(codec_args("WAV", "128k"), vec!["-c:a", "pcm_s16le"]);
        assert_eq!(codec_args("opus", "96k"), vec!["-c:a", "libopus", "-b:a", "96k"]);
        assert!(codec_args("unknown", "128k").is_empty());
    }

    #[tokio::test]
    async fn test_cut_all_writes_layout_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.mp3");
        tokio::fs::write(&source, b"audio").await.unwrap();
        let output_root = dir.path().join("segments");

        let transcoder = Arc::new(FakeTranscoder::new());
        let cutter = SegmentCutter::new(transcoder.clone(), config(), 4, false);
        let tracks = base_track(vec![
            entry("first", 0.0, 1.0),
            entry("x", 1.0, 0.1),
            entry("second", 2.0, 1.5),
        ]);

        let summary = cutter.cut_all(&source, &tracks, &output_root).await.unwrap();
        assert_eq!(summary.segment_count, 2);
        assert_eq!(summary.skipped_count, 1);
        assert_eq!(summary.failed_count, 0);
        assert!(summary.error.is_none());

        assert!(output_root.join("000000/audio.mp3").exists());
        assert!(output_root.join("000000/transcripts.json").exists());
        assert!(output_root.join("000001/audio.mp3").exists());

        let index = std::fs::read_to_string(output_root.join("index.jsonl")).unwrap();
        let rows: Vec<IndexRow> = index
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(rows.len(), 2);
        let mut ids: Vec<&str> = rows.iter().map(|r| r.segment_id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["000000", "000001"]);
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.mp3");
        tokio::fs::write(&source, b"audio").await.unwrap();
        let output_root = dir.path().join("segments");
        let tracks = base_track(vec![entry("first", 0.0, 1.0), entry("second", 2.0, 1.0)]);

        let transcoder = Arc::new(FakeTranscoder::new());
        let cutter = SegmentCutter::new(transcoder.clone(), config(), 2, false);
        cutter.cut_all(&source, &tracks, &output_root).await.unwrap();
        assert_eq!(transcoder.calls.load(Ordering::SeqCst), 2);

        // Existing outputs are skipped and still counted as present,
        // and the index gains no duplicate lines.
        let summary = cutter.cut_all(&source, &tracks, &output_root).await.unwrap();
        assert_eq!(transcoder.calls.load(Ordering::SeqCst), 2);
        assert_eq!(summary.segment_count, 2);

        let index = std::fs::read_to_string(output_root.join("index.jsonl")).unwrap();
        assert_eq!(index.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_overwrite_recuts_existing_segments() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.mp3");
        tokio::fs::write(&source, b"audio").await.unwrap();
        let output_root = dir.path().join("segments");
        let tracks = base_track(vec![entry("first", 0.0, 1.0)]);

        let transcoder = Arc::new(FakeTranscoder::new());
        let cutter = SegmentCutter::new(transcoder.clone(), config(), 1, true);
        cutter.cut_all(&source, &tracks, &output_root).await.unwrap();
        cutter.cut_all(&source, &tracks, &output_root).await.unwrap();
        assert_eq!(transcoder.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_single_segment_failure_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.mp3");
        tokio::fs::write(&source, b"audio").await.unwrap();
        let output_root = dir.path().join("segments");
        let tracks = base_track(vec![
            entry("first", 0.0, 1.0),
            entry("second", 2.0, 1.0),
            entry("third", 4.0, 1.0),
        ]);

        let transcoder = Arc::new(FakeTranscoder::failing_on("000001"));
        let cutter = SegmentCutter::new(transcoder, config(), 3, false);
        let summary = cutter.cut_all(&source, &tracks, &output_root).await.unwrap();

        assert_eq!(summary.segment_count, 2);
        assert_eq!(summary.failed_count, 1);
        assert!(summary.error.is_some());
        assert!(output_root.join("000000/audio.mp3").exists());
        assert!(!output_root.join("000001/audio.mp3").exists());
        assert!(output_root.join("000002/audio.mp3").exists());

        // The failed segment is absent from the index and will be
        // retried on the next run.
        let index = std::fs::read_to_string(output_root.join("index.jsonl")).unwrap();
        assert!(!index.contains("000001"));
    }

    #[tokio::test]
    async fn test_no_tracks_reports_error_without_failing() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.mp3");
        let cutter = SegmentCutter::new(Arc::new(FakeTranscoder::new()), config(), 1, false);

        let summary = cutter
            .cut_all(&source, &[], &dir.path().join("segments"))
            .await
            .unwrap();
        assert_eq!(summary.segment_count, 0);
        assert!(summary.error.is_some());
    }

    #[tokio::test]
    async fn test_multi_track_bundle_windows() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.mp3");
        tokio::fs::write(&source, b"audio").await.unwrap();
        let output_root = dir.path().join("segments");

        let tracks = vec![
            SegmentTrack {
                key: "default".to_string(),
                language_code: None,
                is_generated: None,
                entries: vec![entry("hello there", 0.0, 2.0)],
            },
            SegmentTrack {
                key: "auto_en".to_string(),
                language_code: Some("en".to_string()),
                is_generated: Some(true),
                entries: vec![entry("hallo", 0.5, 1.0), entry("later", 10.0, 1.0)],
            },
        ];

        let cutter = SegmentCutter::new(Arc::new(FakeTranscoder::new()), config(), 1, false);
        cutter.cut_all(&source, &tracks, &output_root).await.unwrap();

        let bundle: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(output_root.join("000000/transcripts.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(bundle["timing"]["base_track"], "default");
        assert_eq!(bundle["tracks"]["default"]["text"], "hello there");
        assert_eq!(bundle["tracks"]["auto_en"]["text"], "hallo");
        assert_eq!(bundle["tracks"]["auto_en"]["entry_indices"][0], 0);
    }
}

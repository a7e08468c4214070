use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

/// Manifest I/O failures are run-fatal: the manifest is the correctness
/// anchor for resumability.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Success,
    Partial,
    Failed,
    Skipped,
}

/// Immutable per-unit outcome record. Self-describing: consumers must
/// not rely on file order for unit identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitRecord {
    pub url: String,
    pub video_id: Option<String>,
    pub status: UnitStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_transcript_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_transcript_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_transcript_mode: Option<String>,
    #[serde(default)]
    pub segment_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segments_index_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    pub finished_at: String,
}

impl UnitRecord {
    pub fn new(url: &str, video_id: Option<&str>, status: UnitStatus) -> Self {
        Self {
            url: url.to_string(),
            video_id: video_id.map(str::to_string),
            status,
            title: None,
            duration_seconds: None,
            audio_path: None,
            default_transcript_path: None,
            auto_language: None,
            auto_transcript_path: None,
            auto_transcript_mode: None,
            segment_count: 0,
            segments_index_path: None,
            metadata_path: None,
            error_kind: None,
            error: None,
            started_at: None,
            finished_at: now_iso(),
        }
    }

    pub fn skipped(url: &str, video_id: &str) -> Self {
        Self::new(url, Some(video_id), UnitStatus::Skipped)
    }

    pub fn failed(url: &str, video_id: Option<&str>, kind: &str, message: &str) -> Self {
        let mut record = Self::new(url, video_id, UnitStatus::Failed);
        record.error_kind = Some(kind.to_string());
        record.error = Some(message.to_string());
        record
    }
}

/// Aggregate computed from a full scan of the records stream; derived,
/// recomputable, never authoritative state.
#[derive(Debug, Clone, Serialize)]
pub struct ManifestSummary {
    pub created_at: String,
    pub total: usize,
    pub success_count: usize,
    pub partial_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub total_segments: u64,
    pub elapsed_seconds: f64,
    pub records_path: String,
    pub failures_path: String,
    pub csv_path: String,
    #[serde(flatten)]
    pub context: serde_json::Map<String, serde_json::Value>,
}

struct StoreState {
    done: HashSet<String>,
}

/// Append-only outcome log; the single source of truth for "already
/// done". Appends are serialized so concurrent workers never interleave
/// mid-line.
pub struct ManifestStore {
    records_path: PathBuf,
    failures_path: PathBuf,
    csv_path: PathBuf,
    summary_path: PathBuf,
    /// Records already present when this run opened the stream; the
    /// run summary covers only what this run appended after them.
    baseline: usize,
    state: Mutex<StoreState>,
}

impl ManifestStore {
    /// Open (or create) the manifest streams under `manifests_dir`.
    /// `prefix` separates the URL-first ("") and channel-first
    /// ("channel_") stream families.
    pub async fn open(manifests_dir: &Path, prefix: &str) -> Result<Self, ManifestError> {
        tokio::fs::create_dir_all(manifests_dir).await?;
        let records_path = manifests_dir.join(format!("{}records.jsonl", prefix));
        let failures_path = manifests_dir.join(format!("{}failures.jsonl", prefix));
        let csv_path = manifests_dir.join(format!("{}records.csv", prefix));
        let summary_path = manifests_dir.join(format!("{}summary.json", prefix));

        let existing = read_records(&records_path).await?;
        let baseline = existing.len();
        let mut done = HashSet::new();
        for record in existing {
            if record.status == UnitStatus::Success {
                if let Some(video_id) = record.video_id {
                    done.insert(video_id);
                }
            }
        }

        Ok(Self {
            records_path,
            failures_path,
            csv_path,
            summary_path,
            baseline,
            state: Mutex::new(StoreState { done }),
        })
    }

    /// The centralized idempotence check consulted before dispatch.
    pub async fn is_done(&self, video_id: &str) -> bool {
        self.state.lock().await.done.contains(video_id)
    }

    /// Durable append. Records are never mutated or deleted.
    pub async fn append(&self, record: &UnitRecord) -> Result<(), ManifestError> {
        let line = format!("{}\n", serde_json::to_string(record)?);
        let mut state = self.state.lock().await;
        append_line(&self.records_path, &line).await?;
        if matches!(record.status, UnitStatus::Failed | UnitStatus::Partial) {
            append_line(&self.failures_path, &line).await?;
        }
        if record.status == UnitStatus::Success {
            if let Some(video_id) = &record.video_id {
                state.done.insert(video_id.clone());
            }
        }
        Ok(())
    }

    /// Aggregate counts with a full scan of the records stream (not
    /// incremental counters, to stay correct under interrupted runs),
    /// then write the summary and the CSV projection of the success
    /// stream. The summary covers this run's records; the CSV covers
    /// the whole stream.
    pub async fn finalize(
        &self,
        context: serde_json::Map<String, serde_json::Value>,
        elapsed_seconds: f64,
    ) -> Result<ManifestSummary, ManifestError> {
        let records = read_records(&self.records_path).await?;
        let run_records = &records[self.baseline.min(records.len())..];

        let count = |status: UnitStatus| run_records.iter().filter(|r| r.status == status).count();
        let run_successes: Vec<&UnitRecord> = run_records
            .iter()
            .filter(|r| r.status == UnitStatus::Success)
            .collect();
        let all_successes: Vec<&UnitRecord> = records
            .iter()
            .filter(|r| r.status == UnitStatus::Success)
            .collect();

        let summary = ManifestSummary {
            created_at: now_iso(),
            total: run_records.len(),
            success_count: run_successes.len(),
            partial_count: count(UnitStatus::Partial),
            failed_count: count(UnitStatus::Failed),
            skipped_count: count(UnitStatus::Skipped),
            total_segments: run_successes.iter().map(|r| r.segment_count).sum(),
            elapsed_seconds,
            records_path: self.records_path.display().to_string(),
            failures_path: self.failures_path.display().to_string(),
            csv_path: self.csv_path.display().to_string(),
            context,
        };

        write_csv(&self.csv_path, &all_successes).await?;
        let json = serde_json::to_string_pretty(&summary)?;
        tokio::fs::write(&self.summary_path, format!("{}\n", json)).await?;
        Ok(summary)
    }
}

async fn read_records(path: &Path) -> Result<Vec<UnitRecord>, ManifestError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = tokio::fs::read_to_string(path).await?;
    let mut records = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<UnitRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(
                "Skipping corrupt manifest line in {}: {}",
                path.display(),
                e
            ),
        }
    }
    Ok(records)
}

async fn append_line(path: &Path, line: &str) -> Result<(), ManifestError> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

const CSV_COLUMNS: [&str; 12] = [
    "video_id",
    "url",
    "status",
    "title",
    "duration_seconds",
    "audio_path",
    "default_transcript_path",
    "auto_language",
    "auto_transcript_mode",
    "segment_count",
    "segments_index_path",
    "finished_at",
];

async fn write_csv(path: &Path, records: &[&UnitRecord]) -> Result<(), ManifestError> {
    let mut out = String::new();
    out.push_str(&CSV_COLUMNS.join(","));
    out.push('\n');

    for record in records {
        let status = match record.status {
            UnitStatus::Success => "success",
            UnitStatus::Partial => "partial",
            UnitStatus::Failed => "failed",
            UnitStatus::Skipped => "skipped",
        };
        let fields = [
            record.video_id.clone().unwrap_or_default(),
            record.url.clone(),
            status.to_string(),
            record.title.clone().unwrap_or_default(),
            record
                .duration_seconds
                .map(|d| d.to_string())
                .unwrap_or_default(),
            record.audio_path.clone().unwrap_or_default(),
            record.default_transcript_path.clone().unwrap_or_default(),
            record.auto_language.clone().unwrap_or_default(),
            record.auto_transcript_mode.clone().unwrap_or_default(),
            record.segment_count.to_string(),
            record.segments_index_path.clone().unwrap_or_default(),
            record.finished_at.clone(),
        ];
        let row: Vec<String> = fields.iter().map(|f| csv_escape(f)).collect();
        out.push_str(&row.join(","));
        out.push('\n');
    }

    tokio::fs::write(path, out).await?;
    Ok(())
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Per-channel expansion outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub channel_ref: String,
    pub channel_slug: String,
    pub status: String,
    /// Expansion reused an existing video list instead of re-fetching.
    #[serde(default)]
    pub reused: bool,
    pub video_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub fetched_at: String,
}

/// Append-only channel expansion log.
pub struct ExpansionLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ExpansionLog {
    pub async fn open(manifests_dir: &Path) -> Result<Self, ManifestError> {
        tokio::fs::create_dir_all(manifests_dir).await?;
        Ok(Self {
            path: manifests_dir.join("channel_expansions.jsonl"),
            lock: Mutex::new(()),
        })
    }

    pub async fn append(&self, record: &ChannelRecord) -> Result<(), ManifestError> {
        let line = format!("{}\n", serde_json::to_string(record)?);
        let _guard = self.lock.lock().await;
        append_line(&self.path, &line).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn success(video_id: &str, segments: u64) -> UnitRecord {
        let mut record = UnitRecord::new(
            &format!("https://youtu.be/{}", video_id),
            Some(video_id),
            UnitStatus::Success,
        );
        record.segment_count = segments;
        record
    }

    #[tokio::test]
    async fn test_append_marks_done_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::open(dir.path(), "").await.unwrap();

        assert!(!store.is_done("aaaaaaaaaaa").await);
        store.append(&success("aaaaaaaaaaa", 3)).await.unwrap();
        assert!(store.is_done("aaaaaaaaaaa").await);

        // A fresh open re-reads the stream.
        let reopened = ManifestStore::open(dir.path(), "").await.unwrap();
        assert!(reopened.is_done("aaaaaaaaaaa").await);
        assert!(!reopened.is_done("bbbbbbbbbbb").await);
    }

    #[tokio::test]
    async fn test_failures_go_to_both_streams_and_do_not_mark_done() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::open(dir.path(), "").await.unwrap();

        let record = UnitRecord::failed(
            "https://youtu.be/ccccccccccc",
            Some("ccccccccccc"),
            "auth",
            "sign in required",
        );
        store.append(&record).await.unwrap();

        assert!(!store.is_done("ccccccccccc").await);
        let failures = std::fs::read_to_string(dir.path().join("failures.jsonl")).unwrap();
        assert!(failures.contains("ccccccccccc"));
        assert!(failures.contains("\"auth\""));
    }

    #[tokio::test]
    async fn test_finalize_counts_and_csv_projection() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::open(dir.path(), "").await.unwrap();

        store.append(&success("aaaaaaaaaaa", 2)).await.unwrap();
        store.append(&success("bbbbbbbbbbb", 5)).await.unwrap();
        store
            .append(&UnitRecord::failed(
                "https://youtu.be/ccccccccccc",
                Some("ccccccccccc"),
                "auth",
                "nope",
            ))
            .await
            .unwrap();
        store
            .append(&UnitRecord::skipped(
                "https://youtu.be/ddddddddddd",
                "ddddddddddd",
            ))
            .await
            .unwrap();

        let summary = store
            .finalize(serde_json::Map::new(), 1.5)
            .await
            .unwrap();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.success_count, 2);
        assert_eq!(summary.failed_count, 1);
        assert_eq!(summary.skipped_count, 1);
        assert_eq!(summary.partial_count, 0);
        assert_eq!(summary.total_segments, 7);

        let csv = std::fs::read_to_string(dir.path().join("records.csv")).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        // Header plus only the success stream.
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("video_id,url,status"));
        assert!(!csv.contains("ccccccccccc"));

        assert!(dir.path().join("summary.json").exists());
    }

    #[tokio::test]
    async fn test_corrupt_lines_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let records_path = dir.path().join("records.jsonl");
        let good = serde_json::to_string(&success("aaaaaaaaaaa", 0)).unwrap();
        std::fs::write(&records_path, format!("{}\nnot-json\n", good)).unwrap();

        let store = ManifestStore::open(dir.path(), "").await.unwrap();
        assert!(store.is_done("aaaaaaaaaaa").await);

        // Pre-existing records belong to earlier runs, not this one,
        // but the CSV projection still covers the whole stream.
        let summary = store.finalize(serde_json::Map::new(), 0.0).await.unwrap();
        assert_eq!(summary.total, 0);
        let csv = std::fs::read_to_string(dir.path().join("records.csv")).unwrap();
        assert!(csv.contains("aaaaaaaaaaa"));
    }

    #[tokio::test]
    async fn test_concurrent_appends_stay_line_separated() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ManifestStore::open(dir.path(), "").await.unwrap());

        let mut handles = Vec::new();
        for i in 0..50 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let video_id = format!("{:011}", i);
                store.append(&success(&video_id, 1)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let content = std::fs::read_to_string(dir.path().join("records.jsonl")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 50);
        for line in lines {
            serde_json::from_str::<UnitRecord>(line).unwrap();
        }
    }

    #[tokio::test]
    async fn test_channel_prefix_separates_streams() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::open(dir.path(), "channel_").await.unwrap();
        store.append(&success("aaaaaaaaaaa", 0)).await.unwrap();

        assert!(dir.path().join("channel_records.jsonl").exists());
        assert!(!dir.path().join("records.jsonl").exists());
    }

    #[test]
    fn test_csv_escape() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}

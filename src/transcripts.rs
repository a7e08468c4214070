use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One timed transcript cue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub text: String,
    pub start: f64,
    pub duration: f64,
}

/// One transcript track as returned by the download tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptTrack {
    pub language: String,
    pub language_code: String,
    pub is_generated: bool,
    pub entries: Vec<TranscriptEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailableTranscript {
    pub language: String,
    pub language_code: String,
    pub is_generated: bool,
    pub path: PathBuf,
}

/// Summary of what was stored for one video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSummary {
    pub default_path: Option<PathBuf>,
    pub auto_language_path: Option<PathBuf>,
    pub auto_language_mode: String,
    pub auto_language_code: Option<String>,
    pub available: Vec<AvailableTranscript>,
}

impl Default for TranscriptSummary {
    fn default() -> Self {
        Self {
            default_path: None,
            auto_language_path: None,
            auto_language_mode: "missing".to_string(),
            auto_language_code: None,
            available: Vec::new(),
        }
    }
}

/// The default transcript is the first manual track, else the first track.
pub fn default_track(tracks: &[TranscriptTrack]) -> Option<&TranscriptTrack> {
    tracks
        .iter()
        .find(|track| !track.is_generated)
        .or_else(|| tracks.first())
}

/// Resolve the auto-language track.
///
/// With an explicit language code: a generated track in that language wins,
/// then any track in that language, else missing. Without one, the first
/// generated track is detected.
pub fn resolve_auto_track<'a>(
    tracks: &'a [TranscriptTrack],
    auto_language: Option<&str>,
) -> (Option<&'a TranscriptTrack>, String, Option<String>) {
    match auto_language {
        Some(code) => {
            if let Some(track) = tracks
                .iter()
                .find(|t| t.is_generated && t.language_code == code)
            {
                (Some(track), "generated".to_string(), Some(code.to_string()))
            } else if let Some(track) = tracks.iter().find(|t| t.language_code == code) {
                (Some(track), "direct".to_string(), Some(code.to_string()))
            } else {
                (None, "missing".to_string(), Some(code.to_string()))
            }
        }
        None => match tracks.iter().find(|t| t.is_generated) {
            Some(track) => (
                Some(track),
                "detected_generated".to_string(),
                Some(track.language_code.clone()),
            ),
            None => (None, "missing".to_string(), None),
        },
    }
}

/// Store transcript tracks under `transcripts_root` and return a summary.
///
/// Layout:
/// - default.json
/// - auto_<code>.json or auto_detected_<code>.json
/// - manual/<code>.json and auto/<code>.json when include_all is set
pub async fn store_tracks(
    transcripts_root: &Path,
    tracks: &[TranscriptTrack],
    auto_language: Option<&str>,
    include_all: bool,
    overwrite: bool,
) -> Result<TranscriptSummary> {
    tokio::fs::create_dir_all(transcripts_root).await?;
    let mut summary = TranscriptSummary::default();

    if let Some(track) = default_track(tracks) {
        let path = transcripts_root.join("default.json");
        write_entries(&path, &track.entries, overwrite).await?;
        summary.default_path = Some(path);
    }

    let (auto_track, mode, code) = resolve_auto_track(tracks, auto_language);
    summary.auto_language_mode = mode;
    summary.auto_language_code = code.clone();
    if let (Some(track), Some(code)) = (auto_track, code) {
        let filename = if auto_language.is_some() {
            format!("auto_{}.json", code)
        } else {
            format!("auto_detected_{}.json", code)
        };
        let path = transcripts_root.join(filename);
        write_entries(&path, &track.entries, overwrite).await?;
        summary.auto_language_path = Some(path);
    }

    if include_all {
        for track in tracks {
            let kind = if track.is_generated { "auto" } else { "manual" };
            let path = transcripts_root
                .join(kind)
                .join(format!("{}.json", track.language_code));
            write_entries(&path, &track.entries, overwrite).await?;
            summary.available.push(AvailableTranscript {
                language: track.language.clone(),
                language_code: track.language_code.clone(),
                is_generated: track.is_generated,
                path,
            });
        }
    }

    Ok(summary)
}

async fn write_entries(path: &Path, entries: &[TranscriptEntry], overwrite: bool) -> Result<()> {
    if path.exists() && !overwrite {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(entries)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}

/// Load a stored entry list (a JSON array of cues).
pub fn load_entries(path: &Path) -> Result<Vec<TranscriptEntry>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Convert a json3 caption payload into timed entries.
pub fn entries_from_json3(raw: &serde_json::Value) -> Vec<TranscriptEntry> {
    let events = match raw.get("events").and_then(|e| e.as_array()) {
        Some(events) => events,
        None => return Vec::new(),
    };

    let mut entries = Vec::new();
    for event in events {
        let start_ms = event.get("tStartMs").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let duration_ms = event
            .get("dDurationMs")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
            .max(0.0);
        let text = event
            .get("segs")
            .and_then(|segs| segs.as_array())
            .map(|segs| {
                segs.iter()
                    .filter_map(|seg| seg.get("utf8").and_then(|t| t.as_str()))
                    .collect::<String>()
            })
            .unwrap_or_default();
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        entries.push(TranscriptEntry {
            text: text.to_string(),
            start: start_ms / 1000.0,
            duration: duration_ms / 1000.0,
        });
    }
    entries
}

/// One track prepared for segment cutting, keyed the way segment bundles
/// reference it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentTrack {
    pub key: String,
    pub language_code: Option<String>,
    pub is_generated: Option<bool>,
    pub entries: Vec<TranscriptEntry>,
}

fn safe_track_key(value: &str) -> String {
    let pattern = match Regex::new(r"[^A-Za-z0-9_.-]+") {
        Ok(pattern) => pattern,
        Err(_) => return "track".to_string(),
    };
    let key = pattern.replace_all(value.trim(), "_");
    let key = key.trim_matches('_');
    if key.is_empty() {
        "track".to_string()
    } else {
        key.to_string()
    }
}

/// Collect the tracks that participate in segmentation, default first.
/// Keys are unique; collisions get a numeric suffix.
pub fn collect_segment_tracks(
    tracks: &[TranscriptTrack],
    auto_language: Option<&str>,
    include_all: bool,
) -> Vec<SegmentTrack> {
    let mut collected: Vec<SegmentTrack> = Vec::new();

    let add = |key: &str,
                   language_code: Option<String>,
                   is_generated: Option<bool>,
                   entries: &[TranscriptEntry],
                   collected: &mut Vec<SegmentTrack>| {
        let base = safe_track_key(key);
        let mut unique = base.clone();
        let mut counter = 2;
        while collected.iter().any(|t| t.key == unique) {
            unique = format!("{}_{}", base, counter);
            counter += 1;
        }
        collected.push(SegmentTrack {
            key: unique,
            language_code,
            is_generated,
            entries: entries.to_vec(),
        });
    };

    if let Some(track) = default_track(tracks) {
        add("default", None, None, &track.entries, &mut collected);
    }

    let (auto_track, _mode, code) = resolve_auto_track(tracks, auto_language);
    if let Some(track) = auto_track {
        let key = format!(
            "auto_target_{}",
            code.as_deref().unwrap_or("unknown")
        );
        add(&key, code, Some(true), &track.entries, &mut collected);
    }

    if include_all {
        for track in tracks {
            let kind = if track.is_generated { "auto" } else { "manual" };
            add(
                &format!("{}_{}", kind, track.language_code),
                Some(track.language_code.clone()),
                Some(track.is_generated),
                &track.entries,
                &mut collected,
            );
        }
    }

    collected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(code: &str, generated: bool, text: &str) -> TranscriptTrack {
        TranscriptTrack {
            language: code.to_string(),
            language_code: code.to_string(),
            is_generated: generated,
            entries: vec![TranscriptEntry {
                text: text.to_string(),
                start: 0.0,
                duration: 1.0,
            }],
        }
    }

    #[test]
    fn test_default_track_prefers_manual() {
        let tracks = vec![track("en", true, "auto"), track("de", false, "manual")];
        assert_eq!(default_track(&tracks).unwrap().language_code, "de");

        let only_auto = vec![track("en", true, "auto")];
        assert_eq!(default_track(&only_auto).unwrap().language_code, "en");
    }

    #[test]
    fn test_resolve_auto_track_explicit_language() {
        let tracks = vec![track("en", false, "manual"), track("en", true, "auto")];
        let (resolved, mode, code) = resolve_auto_track(&tracks, Some("en"));
        assert!(resolved.unwrap().is_generated);
        assert_eq!(mode, "generated");
        assert_eq!(code.as_deref(), Some("en"));

        let manual_only = vec![track("en", false, "manual")];
        let (resolved, mode, _) = resolve_auto_track(&manual_only, Some("en"));
        assert!(!resolved.unwrap().is_generated);
        assert_eq!(mode, "direct");

        let (resolved, mode, code) = resolve_auto_track(&manual_only, Some("fr"));
        assert!(resolved.is_none());
        assert_eq!(mode, "missing");
        assert_eq!(code.as_deref(), Some("fr"));
    }

    #[test]
    fn test_resolve_auto_track_detected() {
        let tracks = vec![track("de", false, "manual"), track("en", true, "auto")];
        let (resolved, mode, code) = resolve_auto_track(&tracks, None);
        assert_eq!(resolved.unwrap().language_code, "en");
        assert_eq!(mode, "detected_generated");
        assert_eq!(code.as_deref(), Some("en"));
    }

    #[tokio::test]
    async fn test_store_tracks_layout() {
        let dir = tempfile::tempdir().unwrap();
        let tracks = vec![track("en", false, "manual"), track("en", true, "auto")];

        let summary = store_tracks(dir.path(), &tracks, None, true, false)
            .await
            .unwrap();

        assert!(dir.path().join("default.json").exists());
        assert!(dir.path().join("auto_detected_en.json").exists());
        assert!(dir.path().join("manual/en.json").exists());
        assert!(dir.path().join("auto/en.json").exists());
        assert_eq!(summary.auto_language_mode, "detected_generated");
        assert_eq!(summary.available.len(), 2);

        let entries = load_entries(&dir.path().join("default.json")).unwrap();
        assert_eq!(entries[0].text, "manual");
    }

    #[tokio::test]
    async fn test_store_tracks_skips_existing_without_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("default.json");
        tokio::fs::write(&path, "[]").await.unwrap();

        let tracks = vec![track("en", false, "manual")];
        store_tracks(dir.path(), &tracks, None, false, false)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]");

        store_tracks(dir.path(), &tracks, None, false, true)
            .await
            .unwrap();
        assert_ne!(std::fs::read_to_string(&path).unwrap(), "[]");
    }

    #[test]
    fn test_entries_from_json3() {
        let raw = serde_json::json!({
            "events": [
                {"tStartMs": 0, "dDurationMs": 1500, "segs": [{"utf8": "hello "}, {"utf8": "world"}]},
                {"tStartMs": 1500, "dDurationMs": 500, "segs": [{"utf8": "\n"}]},
                {"tStartMs": 2000, "dDurationMs": 1000, "segs": [{"utf8": "again"}]}
            ]
        });
        let entries = entries_from_json3(&raw);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].text, "hello world");
        assert_eq!(entries[0].start, 0.0);
        assert_eq!(entries[0].duration, 1.5);
        assert_eq!(entries[1].start, 2.0);
    }

    #[test]
    fn test_collect_segment_tracks_default_first_and_unique_keys() {
        let tracks = vec![track("en", false, "manual"), track("en", true, "auto")];
        let collected = collect_segment_tracks(&tracks, None, true);

        assert_eq!(collected[0].key, "default");
        assert_eq!(collected[1].key, "auto_target_en");
        let keys: Vec<&str> = collected.iter().map(|t| t.key.as_str()).collect();
        assert!(keys.contains(&"manual_en"));
        assert!(keys.contains(&"auto_en"));
        let unique: std::collections::HashSet<&&str> = keys.iter().collect();
        assert_eq!(unique.len(), keys.len());
    }
}

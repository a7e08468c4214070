use anyhow::{anyhow, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use url::Url;

/// One video work-unit, deduplicated by canonical id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    /// Stable external identifier (video id)
    pub video_id: String,

    /// Canonical watch URL handed to the download tool
    pub url: String,

    /// Position in the deduplicated input sequence
    pub ordinal: usize,

    /// Owning channel slug for channel-first runs
    pub channel_slug: Option<String>,
}

/// A reference that could not be normalized. Recorded, never fatal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveFailure {
    pub reference: String,
    pub reason: String,
}

/// Accumulates units across references, deduplicating by canonical id
/// while preserving first-seen order.
#[derive(Debug, Default)]
pub struct UnitCollector {
    seen: HashSet<String>,
    units: Vec<Unit>,
    failures: Vec<ResolveFailure>,
}

impl UnitCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize one reference and add it, if its id was not seen before.
    pub fn add(&mut self, reference: &str, channel_slug: Option<&str>) {
        match canonical_video_id(reference) {
            Some(video_id) => {
                if self.seen.insert(video_id.clone()) {
                    let ordinal = self.units.len();
                    self.units.push(Unit {
                        url: watch_url(&video_id),
                        video_id,
                        ordinal,
                        channel_slug: channel_slug.map(str::to_string),
                    });
                }
            }
            None => self.failures.push(ResolveFailure {
                reference: reference.to_string(),
                reason: "could not extract a video id".to_string(),
            }),
        }
    }

    pub fn finish(self) -> (Vec<Unit>, Vec<ResolveFailure>) {
        (self.units, self.failures)
    }
}

/// Resolve a flat reference list into ordered, deduplicated units.
pub fn resolve_video_units(references: &[String]) -> (Vec<Unit>, Vec<ResolveFailure>) {
    let mut collector = UnitCollector::new();
    for reference in references {
        collector.add(reference, None);
    }
    collector.finish()
}

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}

/// Extract the canonical video id from a URL or bare id.
///
/// Accepts watch, youtu.be, shorts, embed and live URL shapes.
pub fn canonical_video_id(reference: &str) -> Option<String> {
    let reference = reference.trim();
    let id_pattern = Regex::new(r"^[A-Za-z0-9_-]{11}$").ok()?;
    if id_pattern.is_match(reference) {
        return Some(reference.to_string());
    }

    let parsed = Url::parse(reference).ok()?;
    let host = parsed.host_str()?.trim_start_matches("www.");
    let mut segments = parsed.path_segments()?.filter(|s| !s.is_empty());

    let candidate = if host == "youtu.be" {
        segments.next().map(str::to_string)
    } else if host == "youtube.com" || host.ends_with(".youtube.com") {
        match segments.next() {
            Some("watch") => parsed
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.into_owned()),
            Some("shorts") | Some("embed") | Some("live") | Some("v") => {
                segments.next().map(str::to_string)
            }
            _ => None,
        }
    } else {
        None
    };

    candidate.filter(|id| id_pattern.is_match(id))
}

/// Channel reference: @handle, channel id, URL, or username.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelRef {
    Handle(String),
    ChannelId(String),
    Url(String),
    Username(String),
}

impl ChannelRef {
    pub fn classify(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.starts_with("http://") || raw.starts_with("https://") {
            Self::Url(raw.to_string())
        } else if raw.starts_with('@') {
            Self::Handle(raw.to_string())
        } else if raw.starts_with("UC") {
            Self::ChannelId(raw.to_string())
        } else {
            Self::Username(raw.to_string())
        }
    }

    /// The reference exactly as the operator wrote it.
    pub fn reference(&self) -> &str {
        match self {
            Self::Handle(value)
            | Self::ChannelId(value)
            | Self::Url(value)
            | Self::Username(value) => value,
        }
    }

    /// Channel URL handed to the download tool's list capability.
    pub fn videos_url(&self) -> String {
        match self {
            Self::Url(url) => url.clone(),
            Self::Handle(handle) => format!("https://www.youtube.com/{}", handle),
            Self::ChannelId(id) => format!("https://www.youtube.com/channel/{}", id),
            Self::Username(name) => format!("https://www.youtube.com/user/{}", name),
        }
    }
}

/// Load a reference list from a `.txt` (one per line, `#` comments) or
/// `.json` (array, or object with a `urls`/`channels`/`references` key)
/// input file, deduplicated in first-seen order.
pub fn load_references(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Err(anyhow!("Input file not found: {}", path.display()));
    }

    let content = std::fs::read_to_string(path)?;
    let raw: Vec<String> = if path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("json"))
    {
        let value: serde_json::Value = serde_json::from_str(&content)?;
        let items = match &value {
            serde_json::Value::Array(items) => items.clone(),
            serde_json::Value::Object(map) => ["urls", "channels", "references"]
                .iter()
                .find_map(|key| map.get(*key).and_then(|v| v.as_array()).cloned())
                .ok_or_else(|| {
                    anyhow!("JSON input must be an array or an object with a urls/channels key")
                })?,
            _ => {
                return Err(anyhow!(
                    "JSON input must be an array or an object with a urls/channels key"
                ))
            }
        };
        items
            .iter()
            .filter_map(|item| item.as_str().map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty())
            .collect()
    } else {
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect()
    };

    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    for reference in raw {
        if seen.insert(reference.clone()) {
            unique.push(reference);
        }
    }
    Ok(unique)
}

/// Filesystem-safe slug for a channel reference.
pub fn slugify(value: &str) -> String {
    let cleaned = value.trim().trim_matches('/');
    let pattern = match Regex::new(r"[^A-Za-z0-9._-]+") {
        Ok(pattern) => pattern,
        Err(_) => return "channel".to_string(),
    };
    let slug = pattern.replace_all(cleaned, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "channel".to_string()
    } else {
        slug.to_string()
    }
}

pub fn channel_slug(reference: &str, index: usize) -> String {
    format!("{:04}_{}", index, slugify(reference))
}

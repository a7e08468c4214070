use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the dataset pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source audio download settings
    pub audio: AudioConfig,

    /// Transcript export settings
    pub transcripts: TranscriptConfig,

    /// Transcript-aligned segment settings
    pub segments: SegmentConfig,

    /// Worker pool and system tuning
    pub performance: PerformanceConfig,

    /// External tool binaries
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Audio codec extension for the extracted source track
    pub format: String,

    /// Audio quality passed to the extraction postprocessor
    pub quality: String,

    /// Prioritized format selectors, tried in order until one succeeds
    pub format_selectors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptConfig {
    /// Explicit language code for the auto-language export. None means
    /// the first generated track is detected and exported instead.
    pub auto_language: Option<String>,

    /// Dump every available manual/auto track, not just default + auto
    pub include_all: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentConfig {
    /// Audio format for cut segments
    pub format: String,

    /// Bitrate for compressed segment formats
    pub bitrate: String,

    /// Minimum duration (seconds) required to keep a segment
    pub min_duration: f64,

    /// Minimum text length required to keep a segment
    pub min_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Declared system profile for worker auto-tuning
    pub system: SystemProfile,

    /// Parallel channel expansion workers (0 = auto)
    pub channel_workers: usize,

    /// Parallel video workers (0 = auto)
    pub video_workers: usize,

    /// Parallel segment workers per video (0 = auto)
    pub segment_workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// yt-dlp binary path/name
    pub yt_dlp_bin: String,

    /// ffmpeg binary path/name
    pub ffmpeg_bin: String,
}

/// Target runtime system for concurrency tuning.
///
/// The two platforms have different stable concurrency ceilings for the
/// external tools being shelled out to, so an operator can declare a
/// known-good profile instead of trusting raw core count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemProfile {
    Auto,
    Mac,
    Linux,
}

impl SystemProfile {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "auto" => Ok(Self::Auto),
            "mac" => Ok(Self::Mac),
            "linux" => Ok(Self::Linux),
            other => Err(anyhow!("Unknown system profile: {}", other)),
        }
    }

    /// Detect the profile of the host we are actually running on.
    pub fn detected() -> Self {
        if cfg!(target_os = "macos") {
            Self::Mac
        } else {
            Self::Linux
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Mac => "mac",
            Self::Linux => "linux",
        }
    }
}

/// Worker bounds resolved once at startup, before any pool is constructed.
///
/// The product of `video_workers` and `segment_workers` bounds total
/// concurrent ffmpeg invocations; auto-tuning keeps that product near the
/// CPU core count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub cpu_count: usize,
    pub detected_system: SystemProfile,
    pub system: SystemProfile,
    pub channel_workers: usize,
    pub video_workers: usize,
    pub segment_workers: usize,
}

impl RuntimeConfig {
    /// Resolve `0 = auto` worker counts from the CPU count and profile.
    pub fn resolve(performance: &PerformanceConfig) -> Result<Self> {
        Self::resolve_with(performance, num_cpus::get(), SystemProfile::detected())
    }

    fn resolve_with(
        performance: &PerformanceConfig,
        cpu_count: usize,
        detected_system: SystemProfile,
    ) -> Result<Self> {
        let cpu_count = cpu_count.max(1);
        let system = match performance.system {
            SystemProfile::Auto => detected_system,
            explicit => explicit,
        };

        let video_workers = if performance.video_workers > 0 {
            performance.video_workers
        } else {
            match system {
                // macOS throttles under heavy external-tool fan-out
                SystemProfile::Mac => cpu_count.min(4),
                _ => cpu_count,
            }
        };

        let segment_workers = if performance.segment_workers > 0 {
            performance.segment_workers
        } else {
            // Keep total ffmpeg concurrency near CPU count by default.
            (cpu_count / video_workers.max(1)).max(1)
        };

        let channel_workers = if performance.channel_workers > 0 {
            performance.channel_workers
        } else {
            video_workers
        };

        Ok(Self {
            cpu_count,
            detected_system,
            system,
            channel_workers,
            video_workers,
            segment_workers,
        })
    }

    /// One-line echo of the resolved bounds for the run log.
    pub fn summary(&self) -> String {
        format!(
            "system={} detected={} cpus={} channel_workers={} video_workers={} segment_workers={}",
            self.system.as_str(),
            self.detected_system.as_str(),
            self.cpu_count,
            self.channel_workers,
            self.video_workers,
            self.segment_workers
        )
    }
}

impl Config {
    /// Load configuration defaults from a config file, if one exists
    pub fn load() -> Result<Self> {
        let config_paths = [
            "speechset.toml",
            "config/speechset.toml",
            "~/.config/speechset/config.toml",
        ];

        for path in &config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str(&config_str) {
                    Ok(config) => {
                        tracing::info!("📄 Loaded configuration from: {}", path);
                        return Ok(config);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path, e);
                    }
                }
            }
        }

        Err(anyhow!("No configuration file found"))
    }

    /// Validate configuration before the run starts
    pub fn validate(&self) -> Result<()> {
        if self.audio.format.is_empty() {
            return Err(anyhow!("audio format must not be empty"));
        }
        if self.audio.format_selectors.is_empty() {
            return Err(anyhow!("at least one audio format selector is required"));
        }
        if self.segments.min_duration < 0.0 {
            return Err(anyhow!("segment min_duration must be >= 0"));
        }
        if self.tools.yt_dlp_bin.is_empty() || self.tools.ffmpeg_bin.is_empty() {
            return Err(anyhow!("tool binary names must not be empty"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            audio: AudioConfig {
                format: "mp3".to_string(),
                quality: "192".to_string(),
                format_selectors: vec![
                    "bestaudio[ext=m4a]".to_string(),
                    "bestaudio".to_string(),
                    "best".to_string(),
                ],
            },
            transcripts: TranscriptConfig {
                auto_language: None,
                include_all: true,
            },
            segments: SegmentConfig {
                format: "mp3".to_string(),
                bitrate: "128k".to_string(),
                min_duration: 0.25,
                min_chars: 1,
            },
            performance: PerformanceConfig {
                system: SystemProfile::Auto,
                channel_workers: 0,
                video_workers: 0,
                segment_workers: 0,
            },
            tools: ToolsConfig {
                yt_dlp_bin: "yt-dlp".to_string(),
                ffmpeg_bin: "ffmpeg".to_string(),
            },
        }
    }
}

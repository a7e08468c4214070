/// speechset - ASR/TTS dataset pipeline
///
/// Builds speech datasets from online video sources: downloads audio,
/// extracts transcripts, and cuts transcript-aligned audio segments,
/// recording every outcome in durable manifests so runs are resumable.

pub mod config;
pub mod cookies;
pub mod fetch;
pub mod manifest;
pub mod pipeline;
pub mod pool;
pub mod resolver;
pub mod segment;
pub mod transcripts;

// Re-export main types for easy access
pub use crate::config::{Config, RuntimeConfig, SystemProfile};
pub use crate::cookies::{CredentialConfig, ProbeOutcome};
pub use crate::fetch::{Downloader, FetchError, MediaTool, VideoMetadata, YtDlp};
pub use crate::manifest::{ManifestStore, UnitRecord, UnitStatus};
pub use crate::pipeline::{Pipeline, RunConfig, RunReport};
pub use crate::pool::WorkerPool;
pub use crate::resolver::{ChannelRef, Unit};
pub use crate::segment::{FfmpegTranscoder, SegmentCutter, Transcoder};
pub use crate::transcripts::{TranscriptEntry, TranscriptTrack};

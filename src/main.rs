use anyhow::{anyhow, Context, Result};
use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

mod config;
mod cookies;
mod fetch;
mod manifest;
mod pipeline;
mod pool;
mod resolver;
mod segment;
mod transcripts;

use crate::config::{Config, RuntimeConfig, SystemProfile};
use crate::cookies::{probe_credentials, write_probe_report, CredentialConfig, ProbeOutcome};
use crate::fetch::YtDlp;
use crate::pipeline::{CredentialFlags, Pipeline, RunConfig};
use crate::resolver::load_references;
use crate::segment::FfmpegTranscoder;

fn common_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("input")
            .short('i')
            .long("input")
            .value_name("FILE")
            .help("Input file: .txt (one reference per line, # comments) or .json")
            .required(true),
    )
    .arg(
        Arg::new("dataset-root")
            .short('d')
            .long("dataset-root")
            .value_name("DIR")
            .help("Output dataset root directory")
            .default_value("dataset"),
    )
    .arg(
        Arg::new("system")
            .long("system")
            .value_name("PROFILE")
            .help("Target runtime system for tuning defaults: auto, mac, linux"),
    )
    .arg(
        Arg::new("cookies")
            .long("cookies")
            .value_name("FILE")
            .help("Path to Netscape-format cookies.txt for authentication"),
    )
    .arg(
        Arg::new("cookies-from-browser")
            .long("cookies-from-browser")
            .value_name("SPEC")
            .help("Browser cookie source: BROWSER[+KEYRING][:PROFILE][::CONTAINER]"),
    )
    .arg(
        Arg::new("audio-format")
            .long("audio-format")
            .value_name("EXT")
            .help("Audio codec extension for the extracted source track"),
    )
    .arg(
        Arg::new("audio-quality")
            .long("audio-quality")
            .value_name("QUALITY")
            .help("Audio quality for the extraction postprocessor"),
    )
    .arg(
        Arg::new("format-selector")
            .long("format-selector")
            .value_name("SELECTOR")
            .action(clap::ArgAction::Append)
            .help("Audio format selector; repeat to build the fallback chain"),
    )
    .arg(
        Arg::new("auto-language")
            .long("auto-language")
            .value_name("CODE")
            .help("Language code for the auto-language transcript export"),
    )
    .arg(
        Arg::new("skip-all-transcripts")
            .long("skip-all-transcripts")
            .action(clap::ArgAction::SetTrue)
            .help("Only save default and auto-language transcripts"),
    )
    .arg(
        Arg::new("overwrite")
            .long("overwrite")
            .action(clap::ArgAction::SetTrue)
            .help("Re-download and overwrite existing artifacts"),
    )
    .arg(
        Arg::new("video-workers")
            .long("video-workers")
            .value_name("NUM")
            .help("Parallel video workers (0 = auto)"),
    )
    .arg(
        Arg::new("no-segments")
            .long("no-segments")
            .action(clap::ArgAction::SetTrue)
            .help("Skip transcript-timed audio segment generation"),
    )
    .arg(
        Arg::new("segment-workers")
            .long("segment-workers")
            .value_name("NUM")
            .help("Parallel workers per video for transcript-timed cuts (0 = auto)"),
    )
    .arg(
        Arg::new("segment-format")
            .long("segment-format")
            .value_name("EXT")
            .help("Audio format for transcript-timed segments"),
    )
    .arg(
        Arg::new("segment-bitrate")
            .long("segment-bitrate")
            .value_name("BITRATE")
            .help("Bitrate for compressed segment formats"),
    )
    .arg(
        Arg::new("segment-min-duration")
            .long("segment-min-duration")
            .value_name("SECONDS")
            .help("Minimum duration required to keep a segment"),
    )
    .arg(
        Arg::new("segment-min-chars")
            .long("segment-min-chars")
            .value_name("NUM")
            .help("Minimum text length required to keep a segment"),
    )
    .arg(
        Arg::new("ffmpeg-bin")
            .long("ffmpeg-bin")
            .value_name("PATH")
            .help("ffmpeg binary path/name"),
    )
    .arg(
        Arg::new("yt-dlp-bin")
            .long("yt-dlp-bin")
            .value_name("PATH")
            .help("yt-dlp binary path/name"),
    )
}

fn cli() -> Command {
    Command::new("speechset")
        .version("0.1.0")
        .about("Batch ASR/TTS dataset pipeline for online video (audio + transcripts + aligned segments)")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(common_args(
            Command::new("urls").about("Process a list of video URLs"),
        ))
        .subcommand(
            common_args(
                Command::new("channels")
                    .about("Expand channel references into videos, then process them"),
            )
            .arg(
                Arg::new("channel-workers")
                    .long("channel-workers")
                    .value_name("NUM")
                    .help("Parallel channel expansion workers (0 = auto)"),
            )
            .arg(
                Arg::new("max-videos-per-channel")
                    .long("max-videos-per-channel")
                    .value_name("NUM")
                    .help("Optional cap on videos fetched per channel"),
            ),
        )
        .subcommand(
            Command::new("check-auth")
                .about("Validate credentials: metadata probe, then each format selector")
                .arg(
                    Arg::new("test-url")
                        .long("test-url")
                        .value_name("URL")
                        .help("Video used for the probe")
                        .default_value("https://www.youtube.com/watch?v=jNQXAC9IVRw"),
                )
                .arg(
                    Arg::new("cookies")
                        .long("cookies")
                        .value_name("FILE")
                        .help("Path to Netscape-format cookies.txt"),
                )
                .arg(
                    Arg::new("cookies-from-browser")
                        .long("cookies-from-browser")
                        .value_name("SPEC")
                        .help("Browser cookie source specifier"),
                )
                .arg(
                    Arg::new("format-selector")
                        .long("format-selector")
                        .value_name("SELECTOR")
                        .action(clap::ArgAction::Append)
                        .help("Audio format selector; repeat to build the chain"),
                )
                .arg(
                    Arg::new("yt-dlp-bin")
                        .long("yt-dlp-bin")
                        .value_name("PATH")
                        .help("yt-dlp binary path/name"),
                )
                .arg(
                    Arg::new("report")
                        .long("report")
                        .value_name("FILE")
                        .help("Write a JSON probe report to this path"),
                ),
        )
}

/// CLI flags override values loaded from speechset.toml.
fn apply_overrides(config: &mut Config, matches: &ArgMatches) -> Result<()> {
    let text = |id: &str| matches.get_one::<String>(id).cloned();

    if let Some(value) = text("system") {
        config.performance.system = SystemProfile::parse(&value)?;
    }
    if let Some(value) = text("audio-format") {
        config.audio.format = value;
    }
    if let Some(value) = text("audio-quality") {
        config.audio.quality = value;
    }
    if let Some(values) = matches.get_many::<String>("format-selector") {
        config.audio.format_selectors = values.cloned().collect();
    }
    if let Some(value) = text("auto-language") {
        config.transcripts.auto_language = Some(value);
    }
    if matches.get_flag("skip-all-transcripts") {
        config.transcripts.include_all = false;
    }
    if let Some(value) = text("video-workers") {
        config.performance.video_workers = value
            .parse()
            .with_context(|| format!("invalid --video-workers: {}", value))?;
    }
    if let Some(value) = text("segment-workers") {
        config.performance.segment_workers = value
            .parse()
            .with_context(|| format!("invalid --segment-workers: {}", value))?;
    }
    if let Some(value) = text("segment-format") {
        config.segments.format = value;
    }
    if let Some(value) = text("segment-bitrate") {
        config.segments.bitrate = value;
    }
    if let Some(value) = text("segment-min-duration") {
        config.segments.min_duration = value
            .parse()
            .with_context(|| format!("invalid --segment-min-duration: {}", value))?;
    }
    if let Some(value) = text("segment-min-chars") {
        config.segments.min_chars = value
            .parse()
            .with_context(|| format!("invalid --segment-min-chars: {}", value))?;
    }
    if let Some(value) = text("ffmpeg-bin") {
        config.tools.ffmpeg_bin = value;
    }
    if let Some(value) = text("yt-dlp-bin") {
        config.tools.yt_dlp_bin = value;
    }
    Ok(())
}

async fn run_pipeline(matches: &ArgMatches, channel_first: bool) -> Result<i32> {
    let mut config = Config::load().unwrap_or_else(|e| {
        warn!("No config file loaded ({}), using defaults", e);
        Config::default()
    });
    apply_overrides(&mut config, matches)?;

    if channel_first {
        if let Some(value) = matches.get_one::<String>("channel-workers") {
            config.performance.channel_workers = value
                .parse()
                .with_context(|| format!("invalid --channel-workers: {}", value))?;
        }
    }
    config.validate()?;

    let credentials = CredentialConfig::from_cli(
        matches.get_one::<String>("cookies").map(String::as_str),
        matches
            .get_one::<String>("cookies-from-browser")
            .map(String::as_str),
    )?;

    let runtime = RuntimeConfig::resolve(&config.performance)?;
    info!("🔧 Runtime config: {}", runtime.summary());

    let dataset_root = PathBuf::from(matches.get_one::<String>("dataset-root").ok_or_else(
        || anyhow!("--dataset-root missing"),
    )?);
    tokio::fs::create_dir_all(&dataset_root).await?;
    let dataset_root = dataset_root
        .canonicalize()
        .with_context(|| format!("cannot resolve dataset root {}", dataset_root.display()))?;
    info!("📂 Dataset root: {}", dataset_root.display());

    let input = PathBuf::from(
        matches
            .get_one::<String>("input")
            .ok_or_else(|| anyhow!("--input missing"))?,
    );
    let references = load_references(&input)?;
    if references.is_empty() {
        warn!("Input file {} contains no references", input.display());
    }

    let max_videos_per_channel = match matches.try_get_one::<String>("max-videos-per-channel") {
        Ok(Some(value)) => Some(
            value
                .parse()
                .with_context(|| format!("invalid --max-videos-per-channel: {}", value))?,
        ),
        _ => None,
    };

    let run_config = RunConfig {
        dataset_root,
        runtime,
        audio: config.audio.clone(),
        transcripts: config.transcripts.clone(),
        segments: config.segments.clone(),
        tools: config.tools.clone(),
        overwrite: matches.get_flag("overwrite"),
        generate_segments: !matches.get_flag("no-segments"),
        max_videos_per_channel,
        credentials: CredentialFlags {
            cookie_file: credentials.cookie_file.is_some(),
            browser: credentials.browser.is_some(),
        },
    };

    let tool = Arc::new(YtDlp::new(config.tools.yt_dlp_bin.clone(), credentials));
    let transcoder = Arc::new(FfmpegTranscoder::new(config.tools.ffmpeg_bin.clone()));
    let pipeline = Pipeline::new(run_config, tool, transcoder);

    let report = if channel_first {
        pipeline.run_channels(references).await?
    } else {
        pipeline.run_urls(references).await?
    };

    println!("{}", serde_json::to_string_pretty(&report.summary)?);
    Ok(report.exit_code())
}

async fn run_check_auth(matches: &ArgMatches) -> Result<i32> {
    let mut config = Config::load().unwrap_or_else(|_| Config::default());
    if let Some(value) = matches.get_one::<String>("yt-dlp-bin") {
        config.tools.yt_dlp_bin = value.clone();
    }
    if let Some(values) = matches.get_many::<String>("format-selector") {
        config.audio.format_selectors = values.cloned().collect();
    }

    let credentials = CredentialConfig::from_cli(
        matches.get_one::<String>("cookies").map(String::as_str),
        matches
            .get_one::<String>("cookies-from-browser")
            .map(String::as_str),
    )?;
    let test_url = matches
        .get_one::<String>("test-url")
        .ok_or_else(|| anyhow!("--test-url missing"))?;

    let tool = YtDlp::new(config.tools.yt_dlp_bin.clone(), credentials);
    let outcome = probe_credentials(&tool, test_url, &config.audio.format_selectors).await;

    match &outcome {
        ProbeOutcome::AuthOk { selector } => {
            info!("✅ Auth ok; first usable selector: {}", selector);
        }
        ProbeOutcome::FormatsUnavailable { attempts } => {
            warn!("⚠️ Auth ok but no usable format ({} attempts)", attempts.len());
        }
        ProbeOutcome::AuthFailed { error } => {
            warn!("❌ Auth failed: {}", error);
        }
    }
    println!("{}", outcome.guidance());

    if let Some(report_path) = matches.get_one::<String>("report") {
        write_probe_report(&PathBuf::from(report_path), test_url, &outcome).await?;
        info!("💾 Probe report written to {}", report_path);
    }

    Ok(match outcome {
        ProbeOutcome::AuthOk { .. } => 0,
        ProbeOutcome::FormatsUnavailable { .. } => 2,
        ProbeOutcome::AuthFailed { .. } => 1,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("speechset=info,warn")
        .init();

    let matches = cli().get_matches();
    let exit_code = match matches.subcommand() {
        Some(("urls", sub)) => run_pipeline(sub, false).await?,
        Some(("channels", sub)) => run_pipeline(sub, true).await?,
        Some(("check-auth", sub)) => run_check_auth(sub).await?,
        _ => unreachable!("subcommand is required"),
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

//! TileLens - tiled text recognition over a live feed
//!
//! Serves an image file as a live capture device, runs it through the
//! recognition pipeline and prints each result.

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam_channel::{select, Receiver};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tilelens::bridge::BridgeEvent;
use tilelens::capture::{CameraViewStatus, CaptureEvent, StillImageDevice};
use tilelens::config::{self, AppConfig};
use tilelens::recognition::{plan_tiles, OcrResult, RecognizerFactory, TilingOptions};
use tilelens::Pipeline;

/// TileLens - real-time tiled text recognition
#[derive(Parser, Debug)]
#[command(name = "tilelens")]
#[command(about = "Recognize text in a live feed by splitting frames into overlapping tiles")]
struct Args {
    /// Image served as the live feed
    #[arg(short, long, required_unless_present = "plan")]
    input: Option<PathBuf>,

    /// Configuration file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Recognition language
    #[arg(short, long)]
    language: Option<String>,

    /// Tile edge in pixels
    #[arg(long)]
    tile_size: Option<u32>,

    /// Confidence floor (0.0 - 1.0)
    #[arg(long)]
    min_confidence: Option<f32>,

    /// How long to run before exiting
    #[arg(long, default_value = "5")]
    duration_secs: u64,

    /// Print each result as one JSON line
    #[arg(long)]
    json: bool,

    /// Print the tile plan for a WIDTHxHEIGHT frame and exit
    #[arg(long, value_name = "WxH", value_parser = parse_frame_size)]
    plan: Option<(u32, u32)>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_frame_size(value: &str) -> Result<(u32, u32), String> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", value))?;
    let width = width.trim().parse().map_err(|e| format!("invalid width: {}", e))?;
    let height = height.trim().parse().map_err(|e| format!("invalid height: {}", e))?;
    Ok((width, height))
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so JSON output stays clean
    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = apply_overrides(load_config(args.config.as_deref())?, &args);

    if let Some((width, height)) = args.plan {
        print_plan(width, height, &config);
        return Ok(());
    }

    let input = args.input.clone().context("--input is required")?;
    run(input, config, &args)
}

/// Load the given config file, or the user's config if present
fn load_config(path: Option<&std::path::Path>) -> Result<AppConfig> {
    if let Some(path) = path {
        let config = config::load_config(path)?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }

    match config::default_config_path() {
        Ok(path) if path.exists() => {
            let config = config::load_config(&path)?;
            info!("Loaded configuration from {:?}", path);
            Ok(config)
        }
        Ok(_) => {
            info!("Using default configuration");
            Ok(AppConfig::default())
        }
        Err(e) => {
            warn!("No config directory ({}), using default configuration", e);
            Ok(AppConfig::default())
        }
    }
}

fn apply_overrides(mut config: AppConfig, args: &Args) -> AppConfig {
    if let Some(language) = &args.language {
        config.recognition.language = language.clone();
    }
    if let Some(tile_size) = args.tile_size {
        config.recognition.tile_size = tile_size;
    }
    if let Some(min_confidence) = args.min_confidence {
        config.recognition.min_confidence = min_confidence;
    }
    config
}

fn print_plan(width: u32, height: u32, config: &AppConfig) {
    let options = TilingOptions {
        tile_size: config.recognition.tile_size,
        overlap_ratio: config.recognition.overlap_ratio,
    };
    let tiles = plan_tiles(width, height, &options);
    println!(
        "{} tiles for {}x{} (tile_size={}, overlap={})",
        tiles.len(),
        width,
        height,
        options.tile_size,
        options.overlap_ratio
    );
    for (index, tile) in tiles.iter().enumerate() {
        println!(
            "  [{:>3}] x={:<5} y={:<5} {}x{}",
            index, tile.x, tile.y, tile.width, tile.height
        );
    }
}

fn recognizer_factory() -> Arc<dyn RecognizerFactory> {
    #[cfg(windows)]
    {
        Arc::new(tilelens::recognition::WindowsOcr::factory())
    }
    #[cfg(not(windows))]
    {
        warn!("No recognition backend on this platform, results will be empty");
        Arc::new(tilelens::recognition::NoopRecognizer::factory())
    }
}

fn run(input: PathBuf, config: AppConfig, args: &Args) -> Result<()> {
    info!("TileLens starting on {:?}", input);

    let device = Arc::new(StillImageDevice::new(input));
    let mut pipeline = Pipeline::new(device, recognizer_factory(), &config)?;
    let capture_events = pipeline.capture_events();
    let bridge_events = pipeline.bridge_events();
    pipeline.start()?;

    let outcome = watch(
        &capture_events,
        &bridge_events,
        Duration::from_secs(args.duration_secs),
        args.json,
    );

    let (capture_stats, bridge_stats) = pipeline.stats();
    pipeline.stop();
    info!(
        "Frames rendered: {}, sampled: {}, dispatched: {}, results: {}, frame errors: {}",
        capture_stats.frames_rendered,
        capture_stats.samples_taken,
        bridge_stats.dispatched,
        bridge_stats.results,
        bridge_stats.frame_errors
    );
    info!("TileLens shutdown complete");
    outcome
}

/// Print results until the deadline or a terminal failure
fn watch(
    capture_events: &Receiver<CaptureEvent>,
    bridge_events: &Receiver<BridgeEvent>,
    duration: Duration,
    json: bool,
) -> Result<()> {
    let deadline = Instant::now() + duration;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(());
        }

        select! {
            recv(capture_events) -> event => match event {
                Ok(CaptureEvent::StatusChanged(CameraViewStatus::PermissionDenied)) => {
                    bail!("Access to the capture device was denied");
                }
                Ok(CaptureEvent::Error(message)) => warn!("Capture: {}", message),
                Ok(CaptureEvent::StatusChanged(CameraViewStatus::Error)) => {
                    bail!("Capture device failed");
                }
                Ok(_) => {}
                Err(_) => return Ok(()),
            },
            recv(bridge_events) -> event => match event {
                Ok(BridgeEvent::Result(result)) => print_result(&result, json)?,
                Ok(BridgeEvent::Error(message)) => warn!("Recognition: {}", message),
                Ok(BridgeEvent::StatusChanged(status)) => info!("Recognition status: {}", status.name()),
                Err(_) => return Ok(()),
            },
            default(remaining) => return Ok(()),
        }
    }
}

fn print_result(result: &OcrResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(result)?);
        return Ok(());
    }

    println!(
        "[{}] {} words in {:.1}ms: {}",
        result.timestamp,
        result.words.len(),
        result.duration_ms,
        result.full_text
    );
    for word in &result.words {
        println!(
            "    {:<24} {:>5.1}%  at ({:.3}, {:.3}) {:.3}x{:.3}",
            word.text,
            word.confidence * 100.0,
            word.bbox.x,
            word.bbox.y,
            word.bbox.width,
            word.bbox.height
        );
    }
    Ok(())
}

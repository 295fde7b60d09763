//! Application Configuration
//!
//! User settings stored in TOML format. Missing sections and fields fall
//! back to their defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bridge::BridgeConfig;
use crate::capture::{CaptureLoopConfig, CaptureRequest, FacingMode};
use crate::recognition::tiling::{DEFAULT_OVERLAP_RATIO, DEFAULT_TILE_SIZE};
use crate::recognition::{
    Preprocessing, WorkerConfig, DEFAULT_LANGUAGE, DEFAULT_MIN_AREA, DEFAULT_MIN_CONFIDENCE,
};
use crate::worker::HostOptions;

/// Name of the configuration file inside the config directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Application settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Capture settings
    pub capture: CaptureSettings,
    /// Recognition settings
    pub recognition: RecognitionSettings,
    /// Bridge settings
    pub bridge: BridgeSettings,
}

/// Capture-related settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Preferred camera facing
    pub facing: FacingMode,
    /// Resolution hint, best effort
    pub width: u32,
    pub height: u32,
    /// Minimum time between sampled frames
    pub sample_interval_ms: u64,
    /// Render tick period
    pub render_interval_ms: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            facing: FacingMode::Environment,
            width: 1280,
            height: 720,
            sample_interval_ms: 480,
            render_interval_ms: 16,
        }
    }
}

impl CaptureSettings {
    pub fn loop_config(&self) -> CaptureLoopConfig {
        CaptureLoopConfig {
            request: CaptureRequest {
                facing: self.facing,
                width: self.width,
                height: self.height,
            },
            sample_interval: Duration::from_millis(self.sample_interval_ms),
            render_interval: Duration::from_millis(self.render_interval_ms.max(1)),
        }
    }
}

/// Recognition-related settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionSettings {
    /// Engine language code
    pub language: String,
    /// Tile edge in pixels
    pub tile_size: u32,
    /// Confidence floor (0.0 - 1.0)
    pub min_confidence: f32,
    /// Fraction of a tile shared with its neighbour
    pub overlap_ratio: f32,
    /// Normalized area below which words are dropped
    pub min_area: f32,
    /// Frame preprocessing filters
    pub preprocessing: Preprocessing,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            language: DEFAULT_LANGUAGE.to_string(),
            tile_size: DEFAULT_TILE_SIZE,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            overlap_ratio: DEFAULT_OVERLAP_RATIO,
            min_area: DEFAULT_MIN_AREA,
            preprocessing: Preprocessing::default(),
        }
    }
}

impl RecognitionSettings {
    /// Settings sent to the worker on `INIT`
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig::default().merged(
            Some(&self.language),
            Some(self.tile_size),
            Some(self.min_confidence),
        )
    }

    /// Settings fixed for a host's lifetime
    pub fn host_options(&self) -> HostOptions {
        HostOptions {
            overlap_ratio: self.overlap_ratio,
            min_area: self.min_area,
            preprocessing: self.preprocessing.clone(),
        }
    }
}

/// Bridge-related settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Minimum time between frames dispatched to the worker
    pub dispatch_interval_ms: u64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            dispatch_interval_ms: 480,
        }
    }
}

impl AppConfig {
    /// Bridge configuration for the current recognition settings
    pub fn bridge_config(&self) -> BridgeConfig {
        let worker = self.recognition.worker_config();
        BridgeConfig {
            language: worker.language,
            min_confidence: Some(worker.min_confidence),
            tile_size: Some(worker.tile_size),
            dispatch_interval: Duration::from_millis(self.bridge.dispatch_interval_ms),
        }
    }
}

/// Get the configuration directory, creating it if needed
pub fn config_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("org", "tilelens", "TileLens")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    let config_dir = proj_dirs.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}

/// Default location of the configuration file
pub fn default_config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config {}", path.display()))?;
    Ok(config)
}

/// Load configuration, using defaults when the file does not exist
pub fn load_or_default(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(AppConfig::default())
    }
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

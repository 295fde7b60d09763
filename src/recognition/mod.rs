//! Recognition Layer
//!
//! Tile planning, the recognition engine seam and per-frame aggregation of
//! recognized words. Backends:
//! - Windows OCR API (Windows only)
//! - Noop engine (everywhere else, and for wiring tests)

pub mod aggregate;
pub mod engine;
pub mod preprocess;
pub mod tiling;
#[cfg(windows)]
pub mod windows_ocr;

use serde::{Deserialize, Serialize};

pub use aggregate::{FrameAggregator, DEDUP_PRECISION, DEFAULT_MIN_AREA};
pub use engine::{
    normalize_confidence, EngineError, NoopRecognizer, PixelBox, RawToken, RecognizerFactory,
    TextRecognizer, TileRecognition,
};
pub use preprocess::Preprocessing;
pub use tiling::{plan_tiles, Tile, TilingOptions};
#[cfg(windows)]
pub use windows_ocr::{WindowsOcr, WindowsOcrFactory};

/// Default recognition language
pub const DEFAULT_LANGUAGE: &str = "eng";

/// Default confidence floor
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.6;

/// Box expressed as fractions of the full frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl NormalizedBoundingBox {
    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Inside `[0, 1]` with a positive size
    pub fn is_valid(&self) -> bool {
        let in_unit = |v: f32| (0.0..=1.0).contains(&v);
        in_unit(self.x)
            && in_unit(self.y)
            && in_unit(self.width)
            && in_unit(self.height)
            && self.width > 0.0
            && self.height > 0.0
    }
}

/// One recognized token after deduplication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedWord {
    /// Trimmed, never empty
    pub text: String,
    #[serde(rename = "box")]
    pub bbox: NormalizedBoundingBox,
    /// `0..=1`
    pub confidence: f32,
}

/// Aggregated recognition of one frame. Replaces any earlier result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrResult {
    /// Sorted top to bottom, then left to right
    pub words: Vec<RecognizedWord>,
    /// Whitespace-normalized transcript of every tile
    pub full_text: String,
    /// Time spent recognizing the frame, in milliseconds
    #[serde(rename = "duration")]
    pub duration_ms: f64,
    /// Timestamp of the frame this result belongs to
    pub timestamp: u64,
}

impl OcrResult {
    /// A result with no words for the frame taken at `timestamp`
    pub fn empty(timestamp: u64) -> Self {
        Self {
            timestamp,
            ..Default::default()
        }
    }
}

/// Recognition settings living inside the worker. Changed only by `INIT`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub language: String,
    pub tile_size: u32,
    pub min_confidence: f32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            language: DEFAULT_LANGUAGE.to_string(),
            tile_size: tiling::DEFAULT_TILE_SIZE,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

impl WorkerConfig {
    /// This config with the provided overrides applied
    pub fn merged(
        &self,
        language: Option<&str>,
        tile_size: Option<u32>,
        min_confidence: Option<f32>,
    ) -> Self {
        Self {
            language: language
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| self.language.clone()),
            tile_size: tile_size.unwrap_or(self.tile_size),
            min_confidence: min_confidence
                .filter(|c| c.is_finite())
                .map(|c| c.clamp(0.0, 1.0))
                .unwrap_or(self.min_confidence),
        }
    }
}

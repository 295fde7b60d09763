//! Recognition engine seam
//!
//! The host only needs an engine that can load a language, read an arbitrary
//! rectangle of a frame and report tokens with a confidence and a
//! tile-local bounding box.

use image::RgbaImage;
use thiserror::Error;

use crate::recognition::tiling::Tile;

/// Engine failures
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("recognition engine not initialized")]
    NotInitialized,
    #[error("language '{0}' is not available")]
    LanguageUnavailable(String),
    #[error("operation not supported by this engine: {0}")]
    Unsupported(&'static str),
    #[error("recognition failed: {0}")]
    Recognition(String),
    #[error("frame processing cancelled")]
    Cancelled,
    #[error("backend error: {0}")]
    Backend(String),
}

impl EngineError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

/// Axis-aligned box in tile-local pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl PixelBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Build from origin and size
    pub fn from_rect(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::new(x, y, x + width, y + height)
    }
}

/// One recognized token as reported by an engine
#[derive(Debug, Clone, PartialEq)]
pub struct RawToken {
    pub text: String,
    /// Either `0..=1` or `0..=100`; normalized by the host
    pub confidence: f32,
    pub bbox: PixelBox,
}

impl RawToken {
    pub fn new(text: impl Into<String>, confidence: f32, bbox: PixelBox) -> Self {
        Self {
            text: text.into(),
            confidence,
            bbox,
        }
    }
}

/// Everything an engine read from one tile
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileRecognition {
    /// The engine's own transcript of the tile
    pub text: String,
    pub tokens: Vec<RawToken>,
}

impl TileRecognition {
    /// For engines without a separate transcript: join the token texts
    pub fn from_tokens(tokens: Vec<RawToken>) -> Self {
        let text = tokens
            .iter()
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        Self { text, tokens }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// A text recognition engine bound to one language
pub trait TextRecognizer: Send {
    fn name(&self) -> &'static str;

    /// Language the engine is currently loaded with
    fn language(&self) -> &str;

    /// Switch language in place. Engines that can only be rebuilt keep the
    /// default, and the host falls back to a full reinitialize.
    fn reconfigure(&mut self, _language: &str) -> Result<(), EngineError> {
        Err(EngineError::Unsupported("reconfigure"))
    }

    /// Recognize text inside `region` of `frame`
    fn recognize(&mut self, frame: &RgbaImage, region: &Tile) -> Result<TileRecognition, EngineError>;

    /// Free engine resources. Called once before the engine is dropped.
    fn shutdown(&mut self) {}
}

/// Builds recognizers on demand
pub trait RecognizerFactory: Send + Sync {
    fn create(&self, language: &str) -> Result<Box<dyn TextRecognizer>, EngineError>;
}

impl<F> RecognizerFactory for F
where
    F: Fn(&str) -> Result<Box<dyn TextRecognizer>, EngineError> + Send + Sync,
{
    fn create(&self, language: &str) -> Result<Box<dyn TextRecognizer>, EngineError> {
        self(language)
    }
}

/// Bring an engine confidence onto `[0, 1]`. Values above 1 are read as
/// percentages.
pub fn normalize_confidence(raw: f32) -> f32 {
    if !raw.is_finite() {
        return 0.0;
    }
    let value = if raw > 1.0 { raw / 100.0 } else { raw };
    value.clamp(0.0, 1.0)
}

/// Engine that never finds any text. Used where no real backend exists.
#[derive(Debug, Clone)]
pub struct NoopRecognizer {
    language: String,
}

impl NoopRecognizer {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
        }
    }

    /// Factory producing noop engines for any language
    pub fn factory() -> impl RecognizerFactory {
        |language: &str| -> Result<Box<dyn TextRecognizer>, EngineError> {
            Ok(Box::new(NoopRecognizer::new(language)))
        }
    }
}

impl TextRecognizer for NoopRecognizer {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn language(&self) -> &str {
        &self.language
    }

    fn reconfigure(&mut self, language: &str) -> Result<(), EngineError> {
        self.language = language.to_string();
        Ok(())
    }

    fn recognize(&mut self, _frame: &RgbaImage, _region: &Tile) -> Result<TileRecognition, EngineError> {
        Ok(TileRecognition::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_confidence_scales() {
        assert!((normalize_confidence(0.9) - 0.9).abs() < 1e-6);
        assert!((normalize_confidence(87.0) - 0.87).abs() < 1e-6);
        assert_eq!(normalize_confidence(1.0), 1.0);
        assert_eq!(normalize_confidence(100.0), 1.0);
        assert_eq!(normalize_confidence(250.0), 1.0);
        assert_eq!(normalize_confidence(-3.0), 0.0);
        assert_eq!(normalize_confidence(f32::NAN), 0.0);
    }

    #[test]
    fn test_tile_recognition_from_tokens() {
        let tokens = vec![
            RawToken::new("EXIT", 90.0, PixelBox::from_rect(0.0, 0.0, 10.0, 5.0)),
            RawToken::new("ONLY", 80.0, PixelBox::from_rect(12.0, 0.0, 10.0, 5.0)),
        ];
        let recognition = TileRecognition::from_tokens(tokens);
        assert_eq!(recognition.text, "EXIT ONLY");
        assert_eq!(recognition.tokens.len(), 2);
    }

    #[test]
    fn test_noop_factory_and_reconfigure() {
        let factory = NoopRecognizer::factory();
        let mut engine = factory.create("eng").unwrap();
        assert_eq!(engine.language(), "eng");
        engine.reconfigure("deu").unwrap();
        assert_eq!(engine.language(), "deu");

        let tile = Tile {
            x: 0,
            y: 0,
            width: 4,
            height: 4,
        };
        let result = engine.recognize(&RgbaImage::new(4, 4), &tile).unwrap();
        assert!(result.tokens.is_empty());
    }
}

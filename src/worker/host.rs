//! Recognition Engine Host
//!
//! Owns at most one recognition engine and answers worker requests. The
//! engine is created lazily by the first `INIT` and reconfigured in place by
//! later ones when it can be; otherwise it is torn down and rebuilt.
//!
//! Every frame handed to the host is released exactly once, whatever the
//! outcome.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use image::RgbaImage;
use tracing::{debug, error, info, warn};

use crate::capture::FrameBitmap;
use crate::recognition::{
    plan_tiles, EngineError, FrameAggregator, OcrResult, Preprocessing, RecognizerFactory,
    TextRecognizer, TilingOptions, WorkerConfig, DEFAULT_MIN_AREA,
};
use crate::recognition::tiling::DEFAULT_OVERLAP_RATIO;
use crate::worker::panic_message;
use crate::worker::protocol::{WorkerRequest, WorkerResponse};

/// Host settings that are fixed for the host's lifetime
#[derive(Debug, Clone, PartialEq)]
pub struct HostOptions {
    /// Fraction of a tile shared with its neighbour
    pub overlap_ratio: f32,
    /// Normalized area below which a word is dropped
    pub min_area: f32,
    pub preprocessing: Preprocessing,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            overlap_ratio: DEFAULT_OVERLAP_RATIO,
            min_area: DEFAULT_MIN_AREA,
            preprocessing: Preprocessing::default(),
        }
    }
}

/// Answers `INIT` and `PROCESS_FRAME` requests
pub struct RecognitionHost {
    factory: Arc<dyn RecognizerFactory>,
    options: HostOptions,
    config: WorkerConfig,
    engine: Option<Box<dyn TextRecognizer>>,
    cancel: Arc<AtomicBool>,
}

impl RecognitionHost {
    pub fn new(factory: Arc<dyn RecognizerFactory>, options: HostOptions) -> Self {
        Self {
            factory,
            options,
            config: WorkerConfig::default(),
            engine: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Abandon frame work as soon as this flag is raised. Checked between tiles.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Whether an engine is loaded
    pub fn is_ready(&self) -> bool {
        self.engine.is_some()
    }

    /// Current worker configuration
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Handle one request. Never panics; failures become `ERROR` responses.
    pub fn handle(&mut self, request: WorkerRequest) -> WorkerResponse {
        match request {
            WorkerRequest::Init {
                language,
                tile_size,
                min_confidence,
            } => self.init(language.as_deref(), tile_size, min_confidence),
            WorkerRequest::ProcessFrame {
                bitmap,
                width,
                height,
                timestamp,
            } => self.process_frame(bitmap, width, height, timestamp),
        }
    }

    fn init(
        &mut self,
        language: Option<&str>,
        tile_size: Option<u32>,
        min_confidence: Option<f32>,
    ) -> WorkerResponse {
        let requested = self.config.merged(language, tile_size, min_confidence);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.load_engine(&requested.language)));

        match outcome {
            Ok(Ok(())) => {
                info!(
                    "Recognition host ready: language={}, tile_size={}, min_confidence={}",
                    requested.language, requested.tile_size, requested.min_confidence
                );
                self.config = requested;
                WorkerResponse::Ready
            }
            Ok(Err(e)) => {
                error!("Recognition engine initialization failed: {}", e);
                WorkerResponse::error(e.to_string())
            }
            Err(payload) => {
                self.engine = None;
                let message = format!("recognition engine panicked during initialization: {}", panic_message(&*payload));
                error!("{}", message);
                WorkerResponse::error(message)
            }
        }
    }

    /// Make sure an engine for `language` is loaded, reusing the current one
    /// when possible
    fn load_engine(&mut self, language: &str) -> Result<(), EngineError> {
        if let Some(engine) = self.engine.as_mut() {
            if engine.language() == language {
                debug!("Engine already loaded for '{}'", language);
                return Ok(());
            }

            match engine.reconfigure(language) {
                Ok(()) => {
                    info!("Reconfigured {} engine to '{}'", engine.name(), language);
                    return Ok(());
                }
                Err(e) => {
                    info!(
                        "Engine {} cannot switch to '{}' in place ({}), reinitializing",
                        engine.name(),
                        language,
                        e
                    );
                }
            }
        }

        if let Some(mut old) = self.engine.take() {
            old.shutdown();
        }

        let engine = self.factory.create(language)?;
        info!("Created {} engine for '{}'", engine.name(), language);
        self.engine = Some(engine);
        Ok(())
    }

    fn process_frame(
        &mut self,
        bitmap: FrameBitmap,
        width: u32,
        height: u32,
        timestamp: u64,
    ) -> WorkerResponse {
        if self.engine.is_none() {
            bitmap.release();
            warn!("Frame {} received before the engine was initialized", timestamp);
            return WorkerResponse::error(EngineError::NotInitialized.to_string());
        }

        if bitmap.dimensions() != (width, height) {
            let message = format!(
                "frame is {}x{} but the request describes {}x{}",
                bitmap.width(),
                bitmap.height(),
                width,
                height
            );
            bitmap.release();
            return WorkerResponse::error(message);
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.recognize_frame(bitmap.image(), timestamp)
        }));
        bitmap.release();

        match outcome {
            Ok(Ok(result)) => {
                debug!(
                    "Frame {} recognized: {} words in {:.1}ms",
                    timestamp,
                    result.words.len(),
                    result.duration_ms
                );
                WorkerResponse::Result { payload: result }
            }
            Ok(Err(e)) => {
                warn!("Frame {} failed: {}", timestamp, e);
                WorkerResponse::error(e.to_string())
            }
            Err(payload) => {
                let message = format!("recognition engine panicked: {}", panic_message(&*payload));
                error!("Frame {}: {}", timestamp, message);
                WorkerResponse::error(message)
            }
        }
    }

    /// Tile, recognize and aggregate one frame
    fn recognize_frame(&mut self, frame: &RgbaImage, timestamp: u64) -> Result<OcrResult, EngineError> {
        let started = Instant::now();
        let engine = self.engine.as_mut().ok_or(EngineError::NotInitialized)?;

        let preprocessed = self.options.preprocessing.apply(frame);
        let image = preprocessed.as_ref().unwrap_or(frame);

        let tiles = plan_tiles(
            image.width(),
            image.height(),
            &TilingOptions {
                tile_size: self.config.tile_size,
                overlap_ratio: self.options.overlap_ratio,
            },
        );
        debug!(
            "Recognizing {}x{} frame in {} tiles",
            image.width(),
            image.height(),
            tiles.len()
        );

        let mut aggregator = FrameAggregator::new(
            image.width(),
            image.height(),
            self.config.min_confidence,
            self.options.min_area,
        );
        for tile in &tiles {
            if self.cancel.load(Ordering::SeqCst) {
                return Err(EngineError::Cancelled);
            }
            let recognition = engine.recognize(image, tile)?;
            aggregator.push_tile(tile, recognition);
        }

        if aggregator.dropped() > 0 {
            debug!("Dropped {} tokens", aggregator.dropped());
        }
        Ok(aggregator.finish(started.elapsed(), timestamp))
    }

    /// Release the engine
    pub fn shutdown(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            info!("Shutting down {} engine", engine.name());
            engine.shutdown();
        }
    }
}

impl Drop for RecognitionHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}

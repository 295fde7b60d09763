//! TileLens - real-time tiled text recognition
//!
//! Frames flow one way through the pipeline:
//!
//! ```text
//! device -> CaptureLoop -> (throttled) -> OcrBridge -> worker thread
//!        -> RecognitionHost -> tiles -> engine -> OcrResult -> OcrBridge
//! ```

pub mod bridge;
pub mod capture;
pub mod config;
pub mod pipeline;
pub mod recognition;
pub mod worker;

pub use bridge::{BridgeConfig, BridgeEvent, BridgeSnapshot, BridgeStatus, OcrBridge};
pub use capture::{CameraViewStatus, CaptureLoop, FrameBitmap, FrameMetadata};
pub use pipeline::Pipeline;
pub use recognition::{plan_tiles, OcrResult, RecognizedWord, Tile, TilingOptions};

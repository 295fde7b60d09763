//! Frame resources handed from the capture loop to the recognition worker
//!
//! A [`FrameBitmap`] is a finite, explicitly managed resource. Ownership moves
//! with the value; whoever holds it last calls [`FrameBitmap::release`].
//! Dropping a bitmap without releasing it is counted as a leak by its
//! [`BitmapTracker`] and logged, but never panics.

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::warn;

/// Errors raised while building a frame from raw pixels
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("pixel buffer holds {actual} bytes, expected {expected} for {width}x{height} RGBA")]
    BufferSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// Metadata describing a single sampled frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMetadata {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Capture time in milliseconds since the Unix epoch
    pub timestamp: u64,
}

impl FrameMetadata {
    /// Metadata for a frame sampled right now
    pub fn now(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            timestamp: unix_millis(),
        }
    }
}

/// Milliseconds since the Unix epoch (0 if the clock is before it)
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Default)]
struct TrackerCounts {
    created: AtomicUsize,
    released: AtomicUsize,
    leaked: AtomicUsize,
}

/// Accounting for frame bitmaps produced by one owner
///
/// Cloning shares the counters.
#[derive(Debug, Clone, Default)]
pub struct BitmapTracker {
    counts: Arc<TrackerCounts>,
}

impl BitmapTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bitmaps created through this tracker
    pub fn created(&self) -> usize {
        self.counts.created.load(Ordering::SeqCst)
    }

    /// Bitmaps released explicitly
    pub fn released(&self) -> usize {
        self.counts.released.load(Ordering::SeqCst)
    }

    /// Bitmaps dropped without a release
    pub fn leaked(&self) -> usize {
        self.counts.leaked.load(Ordering::SeqCst)
    }

    /// Bitmaps still owned by someone
    pub fn live(&self) -> usize {
        self.created()
            .saturating_sub(self.released())
            .saturating_sub(self.leaked())
    }

    fn on_create(&self) {
        self.counts.created.fetch_add(1, Ordering::SeqCst);
    }

    fn on_release(&self) {
        self.counts.released.fetch_add(1, Ordering::SeqCst);
    }

    fn on_leak(&self) {
        self.counts.leaked.fetch_add(1, Ordering::SeqCst);
    }
}

/// Immutable RGBA snapshot of the offscreen raster surface
pub struct FrameBitmap {
    image: RgbaImage,
    tracker: Option<BitmapTracker>,
}

impl FrameBitmap {
    /// Wrap an image and register it with `tracker`
    pub fn new(image: RgbaImage, tracker: &BitmapTracker) -> Self {
        tracker.on_create();
        Self {
            image,
            tracker: Some(tracker.clone()),
        }
    }

    /// Wrap an image without leak accounting
    pub fn untracked(image: RgbaImage) -> Self {
        Self {
            image,
            tracker: None,
        }
    }

    /// Build a bitmap from a raw RGBA buffer
    pub fn from_rgba(
        data: Vec<u8>,
        width: u32,
        height: u32,
        tracker: &BitmapTracker,
    ) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * 4;
        let actual = data.len();
        let image = RgbaImage::from_raw(width, height, data).ok_or(FrameError::BufferSize {
            width,
            height,
            expected,
            actual,
        })?;
        Ok(Self::new(image, tracker))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Pixel data
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Give the resource back. Consumes the bitmap, so it can only happen once.
    pub fn release(mut self) {
        if let Some(tracker) = self.tracker.take() {
            tracker.on_release();
        }
    }
}

impl Drop for FrameBitmap {
    fn drop(&mut self) {
        if let Some(tracker) = self.tracker.take() {
            tracker.on_leak();
            warn!(
                "Frame bitmap {}x{} dropped without release",
                self.image.width(),
                self.image.height()
            );
        }
    }
}

impl fmt::Debug for FrameBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBitmap")
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .field("tracked", &self.tracker.is_some())
            .finish()
    }
}

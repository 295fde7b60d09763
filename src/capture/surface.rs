//! Offscreen raster surface painted by the render loop

use image::RgbaImage;

use crate::capture::frame::{BitmapTracker, FrameBitmap};

/// Holds the latest painted device frame
#[derive(Debug, Default)]
pub struct RasterSurface {
    pixels: Option<RgbaImage>,
}

impl RasterSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Paint a device frame, reusing the buffer while the size is unchanged
    pub fn paint(&mut self, frame: &RgbaImage) {
        match self.pixels.as_mut() {
            Some(pixels) if pixels.dimensions() == frame.dimensions() => {
                pixels.copy_from_slice(frame.as_raw());
            }
            _ => self.pixels = Some(frame.clone()),
        }
    }

    /// Whether anything has been painted since the last detach
    pub fn has_frame(&self) -> bool {
        self.pixels.is_some()
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.pixels.as_ref().map(|p| p.dimensions())
    }

    /// Copy the surface into an immutable bitmap owned by the caller
    pub fn snapshot(&self, tracker: &BitmapTracker) -> Option<FrameBitmap> {
        self.pixels
            .as_ref()
            .map(|pixels| FrameBitmap::new(pixels.clone(), tracker))
    }

    /// Drop the backing buffer
    pub fn detach(&mut self) {
        self.pixels = None;
    }
}

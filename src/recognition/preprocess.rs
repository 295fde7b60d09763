//! Optional frame preprocessing
//!
//! Simple enhancements applied once per frame before tiling. They help with
//! low-contrast signage and light text on dark backgrounds. Geometry is never
//! changed, so tile coordinates stay valid for the original frame.

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Preprocessing filters. Disabled by default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preprocessing {
    pub enabled: bool,
    /// Luminance grayscale, alpha kept
    pub grayscale: bool,
    /// Invert RGB channels
    pub invert: bool,
    /// Contrast factor around mid-gray. 1.0 leaves the frame untouched.
    pub contrast: f32,
}

impl Default for Preprocessing {
    fn default() -> Self {
        Self {
            enabled: false,
            grayscale: true,
            invert: false,
            contrast: 1.0,
        }
    }
}

impl Preprocessing {
    /// Whether `apply` would change anything
    pub fn is_active(&self) -> bool {
        self.enabled && (self.grayscale || self.invert || self.has_contrast())
    }

    fn has_contrast(&self) -> bool {
        self.contrast.is_finite() && (self.contrast - 1.0).abs() > 0.01
    }

    /// Filtered copy of `frame`, or `None` when preprocessing is inactive
    pub fn apply(&self, frame: &RgbaImage) -> Option<RgbaImage> {
        if !self.is_active() {
            return None;
        }

        debug!(
            "Preprocessing frame {}x{}: grayscale={}, invert={}, contrast={}",
            frame.width(),
            frame.height(),
            self.grayscale,
            self.invert,
            self.contrast
        );

        let mut out = frame.clone();
        if self.has_contrast() {
            apply_contrast(&mut out, self.contrast);
        }
        if self.grayscale {
            apply_grayscale(&mut out);
        }
        if self.invert {
            apply_invert(&mut out);
        }
        Some(out)
    }
}

fn apply_contrast(image: &mut RgbaImage, factor: f32) {
    for pixel in image.pixels_mut() {
        for channel in pixel.0.iter_mut().take(3) {
            *channel = ((*channel as f32 - 128.0) * factor + 128.0).clamp(0.0, 255.0) as u8;
        }
    }
}

fn apply_grayscale(image: &mut RgbaImage) {
    for pixel in image.pixels_mut() {
        let [r, g, b, _] = pixel.0;
        let gray = (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32) as u8;
        pixel.0[0] = gray;
        pixel.0[1] = gray;
        pixel.0[2] = gray;
    }
}

fn apply_invert(image: &mut RgbaImage) {
    for pixel in image.pixels_mut() {
        for channel in pixel.0.iter_mut().take(3) {
            *channel = 255 - *channel;
        }
    }
}

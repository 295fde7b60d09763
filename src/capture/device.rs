//! Video capture device seam
//!
//! A [`CaptureDevice`] hands out a [`VideoStream`] on acquisition. The stream
//! is owned exclusively by the capture loop and stopped on deactivation.

use image::{imageops::FilterType, RgbaImage};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Which camera to prefer when several are available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacingMode {
    /// Front camera, facing the user
    User,
    /// Rear camera, facing the scene
    #[default]
    Environment,
}

/// Activation hints passed to the device. Best effort, not contractual.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    pub facing: FacingMode,
    /// Preferred frame width in pixels
    pub width: u32,
    /// Preferred frame height in pixels
    pub height: u32,
}

impl Default for CaptureRequest {
    fn default() -> Self {
        Self {
            facing: FacingMode::Environment,
            width: 1280,
            height: 720,
        }
    }
}

/// Device acquisition failures
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("capture permission denied: {0}")]
    PermissionDenied(String),
    #[error("capture not supported: {0}")]
    Unsupported(String),
    #[error("capture device unavailable: {0}")]
    Unavailable(String),
    #[error("capture device error: {0}")]
    Other(String),
}

impl DeviceError {
    /// Whether the user or OS refused access (as opposed to a generic failure)
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, DeviceError::PermissionDenied(_))
    }
}

impl From<io::Error> for DeviceError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => DeviceError::PermissionDenied(err.to_string()),
            io::ErrorKind::NotFound => DeviceError::Unavailable(err.to_string()),
            io::ErrorKind::Unsupported => DeviceError::Unsupported(err.to_string()),
            _ => DeviceError::Other(err.to_string()),
        }
    }
}

/// A source of live video frames
pub trait CaptureDevice: Send + Sync {
    fn name(&self) -> &str;

    /// Request access to the device. May block while the OS prompts the user.
    fn acquire(&self, request: &CaptureRequest) -> Result<Box<dyn VideoStream>, DeviceError>;
}

/// An acquired stream of frames
pub trait VideoStream: Send {
    /// The most recent frame the device produced, if any
    fn current_frame(&mut self) -> Option<&RgbaImage>;

    /// Whether the stream's tracks are still delivering frames
    fn is_live(&self) -> bool;

    /// Stop all tracks. Must be idempotent.
    fn stop(&mut self);
}

/// Serves a single image file as a live feed
///
/// Useful for tuning tile sizes against a known picture and for running the
/// pipeline on machines without a camera.
#[derive(Debug, Clone)]
pub struct StillImageDevice {
    path: PathBuf,
}

impl StillImageDevice {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CaptureDevice for StillImageDevice {
    fn name(&self) -> &str {
        "still-image"
    }

    fn acquire(&self, request: &CaptureRequest) -> Result<Box<dyn VideoStream>, DeviceError> {
        let image = image::open(&self.path).map_err(|e| match e {
            image::ImageError::IoError(io) => DeviceError::from(io),
            image::ImageError::Unsupported(u) => DeviceError::Unsupported(u.to_string()),
            other => DeviceError::Other(other.to_string()),
        })?;

        // Honor the resolution hint by scaling down, never up
        let image = if image.width() > request.width || image.height() > request.height {
            debug!(
                "Scaling {}x{} still image to fit {}x{}",
                image.width(),
                image.height(),
                request.width,
                request.height
            );
            image.resize(request.width.max(1), request.height.max(1), FilterType::Triangle)
        } else {
            image
        };

        let frame = image.to_rgba8();
        info!(
            "Still image device acquired {:?} ({}x{})",
            self.path,
            frame.width(),
            frame.height()
        );
        Ok(Box::new(StillImageStream { frame, live: true }))
    }
}

struct StillImageStream {
    frame: RgbaImage,
    live: bool,
}

impl VideoStream for StillImageStream {
    fn current_frame(&mut self) -> Option<&RgbaImage> {
        if self.live {
            Some(&self.frame)
        } else {
            None
        }
    }

    fn is_live(&self) -> bool {
        self.live
    }

    fn stop(&mut self) {
        self.live = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_io_error_classification() {
        let denied = DeviceError::from(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(denied.is_permission_denied());

        let missing = DeviceError::from(io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(missing, DeviceError::Unavailable(_)));
        assert!(!missing.is_permission_denied());
    }

    #[test]
    fn test_still_image_missing_file() {
        let device = StillImageDevice::new("/nonexistent/frame.png");
        let result = device.acquire(&CaptureRequest::default());
        assert!(matches!(result, Err(DeviceError::Unavailable(_))));
    }

    #[test]
    fn test_still_image_stream_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        RgbaImage::from_pixel(32, 16, Rgba([10, 20, 30, 255]))
            .save(&path)
            .unwrap();

        let device = StillImageDevice::new(&path);
        let mut stream = device.acquire(&CaptureRequest::default()).unwrap();
        assert!(stream.is_live());
        assert_eq!(stream.current_frame().map(|f| f.dimensions()), Some((32, 16)));

        stream.stop();
        stream.stop();
        assert!(!stream.is_live());
        assert!(stream.current_frame().is_none());
    }

    #[test]
    fn test_still_image_scales_down_to_hint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("large.png");
        RgbaImage::new(400, 200).save(&path).unwrap();

        let device = StillImageDevice::new(&path);
        let request = CaptureRequest {
            width: 200,
            height: 200,
            ..Default::default()
        };
        let mut stream = device.acquire(&request).unwrap();
        let (w, h) = stream.current_frame().unwrap().dimensions();
        assert_eq!((w, h), (200, 100));
    }
}

//! Messages exchanged with the recognition worker
//!
//! Requests flow into the worker, responses flow back out. Nothing else
//! crosses the thread boundary.

use serde::{Deserialize, Serialize};

use crate::capture::FrameBitmap;
use crate::recognition::OcrResult;

/// Message sent to the worker
#[derive(Debug)]
pub enum WorkerRequest {
    /// Load or reconfigure the engine. Missing fields keep their current value.
    Init {
        language: Option<String>,
        tile_size: Option<u32>,
        min_confidence: Option<f32>,
    },
    /// Recognize one frame. The bitmap now belongs to the worker.
    ProcessFrame {
        bitmap: FrameBitmap,
        width: u32,
        height: u32,
        timestamp: u64,
    },
}

impl WorkerRequest {
    /// Wire name of the message type
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Init { .. } => "INIT",
            Self::ProcessFrame { .. } => "PROCESS_FRAME",
        }
    }

    /// Release any frame carried by an undelivered request
    pub fn release(self) {
        if let Self::ProcessFrame { bitmap, .. } = self {
            bitmap.release();
        }
    }
}

/// Message sent back by the worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerResponse {
    Ready,
    Result { payload: OcrResult },
    Error { error: String },
}

impl WorkerResponse {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    /// Wire name of the message type
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Result { .. } => "RESULT",
            Self::Error { .. } => "ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::BitmapTracker;
    use image::RgbaImage;

    #[test]
    fn test_response_wire_shape() {
        let ready = serde_json::to_value(WorkerResponse::Ready).unwrap();
        assert_eq!(ready, serde_json::json!({ "type": "READY" }));

        let error = serde_json::to_value(WorkerResponse::error("boom")).unwrap();
        assert_eq!(error, serde_json::json!({ "type": "ERROR", "error": "boom" }));

        let result = serde_json::to_value(WorkerResponse::Result {
            payload: OcrResult::empty(9),
        })
        .unwrap();
        assert_eq!(result["type"], "RESULT");
        assert_eq!(result["payload"]["timestamp"], 9);
        assert_eq!(result["payload"]["fullText"], "");
    }

    #[test]
    fn test_undelivered_request_releases_frame() {
        let tracker = BitmapTracker::new();
        let request = WorkerRequest::ProcessFrame {
            bitmap: FrameBitmap::new(RgbaImage::new(2, 2), &tracker),
            width: 2,
            height: 2,
            timestamp: 0,
        };
        assert_eq!(request.type_name(), "PROCESS_FRAME");
        request.release();
        assert_eq!(tracker.released(), 1);
        assert_eq!(tracker.leaked(), 0);
        assert_eq!(tracker.live(), 0);
    }
}

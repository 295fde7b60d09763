//! Pipeline Coordinator
//!
//! Wires a capture loop to a recognition bridge and manages both lifecycles.

use anyhow::Result;
use crossbeam_channel::Receiver;
use std::sync::Arc;
use tracing::info;

use crate::bridge::{BridgeConfig, BridgeEvent, BridgeSnapshot, BridgeStats, OcrBridge};
use crate::capture::{CameraViewStatus, CaptureDevice, CaptureEvent, CaptureLoop, CaptureStats};
use crate::config::AppConfig;
use crate::recognition::RecognizerFactory;

/// Capture loop feeding a recognition bridge
pub struct Pipeline {
    /// Stops before the bridge so no frame arrives at a torn-down bridge
    capture: CaptureLoop,
    bridge: Arc<OcrBridge>,
}

impl Pipeline {
    /// Build the pipeline. The bridge starts loading right away; capture
    /// starts with [`Pipeline::start`].
    pub fn new(
        device: Arc<dyn CaptureDevice>,
        factory: Arc<dyn RecognizerFactory>,
        config: &AppConfig,
    ) -> Result<Self> {
        let bridge = Arc::new(OcrBridge::new(
            factory,
            config.recognition.host_options(),
            config.bridge_config(),
        )?);
        let capture = CaptureLoop::new(device, bridge.clone(), config.capture.loop_config());

        info!(
            "Pipeline created (language={}, tile_size={})",
            config.recognition.language, config.recognition.tile_size
        );
        Ok(Self { capture, bridge })
    }

    /// Start capturing
    pub fn start(&mut self) -> Result<()> {
        self.capture.activate()
    }

    /// Stop capturing. The bridge stays up and keeps its last result.
    pub fn pause(&mut self) {
        self.capture.deactivate();
    }

    /// Stop capturing and terminate the worker
    pub fn stop(&mut self) {
        self.capture.deactivate();
        self.bridge.shutdown();
        info!("Pipeline stopped");
    }

    /// Switch recognition settings; capture keeps running
    pub fn reconfigure(&self, config: BridgeConfig) -> Result<()> {
        self.bridge.reconfigure(config)
    }

    pub fn bridge(&self) -> &OcrBridge {
        &self.bridge
    }

    pub fn capture(&self) -> &CaptureLoop {
        &self.capture
    }

    pub fn capture_status(&self) -> CameraViewStatus {
        self.capture.status()
    }

    pub fn snapshot(&self) -> BridgeSnapshot {
        self.bridge.snapshot()
    }

    /// Capture and bridge counters
    pub fn stats(&self) -> (CaptureStats, BridgeStats) {
        (self.capture.stats(), self.bridge.stats())
    }

    pub fn capture_events(&self) -> Receiver<CaptureEvent> {
        self.capture.subscribe()
    }

    pub fn bridge_events(&self) -> Receiver<BridgeEvent> {
        self.bridge.subscribe()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

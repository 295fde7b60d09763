//! Capture Loop Controller
//!
//! Owns the video device for the duration of an activation, paints every
//! device frame into an offscreen [`RasterSurface`] at render cadence, and
//! forwards at most one snapshot per sampling interval to a [`FrameHandler`].
//! A snapshot is never forwarded while the previous one is still being
//! handled.
//!
//! Status transitions:
//!
//! ```text
//! idle -> initializing -> ready
//!                      -> permission-denied
//!                      -> error
//! any  -> idle (deactivate)
//! ```

pub mod device;
pub mod frame;
pub mod surface;
pub mod throttle;

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub use device::{CaptureDevice, CaptureRequest, DeviceError, FacingMode, StillImageDevice, VideoStream};
pub use frame::{BitmapTracker, FrameBitmap, FrameMetadata};
pub use surface::RasterSurface;
pub use throttle::{GateDecision, SampleGate};

/// Default minimum time between two forwarded frames
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(480);

/// Default render tick (about 60 Hz)
pub const DEFAULT_RENDER_INTERVAL: Duration = Duration::from_millis(16);

/// Externally observable capture lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CameraViewStatus {
    #[default]
    Idle,
    Initializing,
    Ready,
    PermissionDenied,
    Error,
}

impl CameraViewStatus {
    pub fn name(&self) -> &'static str {
        match self {
            CameraViewStatus::Idle => "idle",
            CameraViewStatus::Initializing => "initializing",
            CameraViewStatus::Ready => "ready",
            CameraViewStatus::PermissionDenied => "permission-denied",
            CameraViewStatus::Error => "error",
        }
    }
}

/// Notifications published by the capture loop
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// The lifecycle status changed
    StatusChanged(CameraViewStatus),
    /// A device or frame handler failure. Handler failures do not change status.
    Error(String),
}

/// What a frame handler reports back after taking a frame
pub enum HandlerOutcome {
    /// Handling finished synchronously
    Done,
    /// Handling continues elsewhere; the loop stays busy until this yields
    /// a value or disconnects
    Pending(Receiver<Result<()>>),
}

/// Receives sampled frames. Takes ownership of the bitmap and must release it.
pub trait FrameHandler: Send + Sync {
    fn on_frame(&self, frame: FrameBitmap, metadata: FrameMetadata) -> Result<HandlerOutcome>;
}

impl<F> FrameHandler for F
where
    F: Fn(FrameBitmap, FrameMetadata) -> Result<HandlerOutcome> + Send + Sync,
{
    fn on_frame(&self, frame: FrameBitmap, metadata: FrameMetadata) -> Result<HandlerOutcome> {
        self(frame, metadata)
    }
}

/// Capture loop settings
#[derive(Debug, Clone, Copy)]
pub struct CaptureLoopConfig {
    /// Hints passed to the device on activation
    pub request: CaptureRequest,
    /// Minimum time between forwarded frames
    pub sample_interval: Duration,
    /// Render tick period
    pub render_interval: Duration,
}

impl Default for CaptureLoopConfig {
    fn default() -> Self {
        Self {
            request: CaptureRequest::default(),
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            render_interval: DEFAULT_RENDER_INTERVAL,
        }
    }
}

/// Counters for the current capture loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Device frames painted to the surface
    pub frames_rendered: u64,
    /// Snapshots handed to the frame handler
    pub samples_taken: u64,
    /// Ticks skipped because the handler was still busy
    pub skipped_busy: u64,
    /// Ticks skipped because the sampling interval had not elapsed
    pub skipped_throttled: u64,
    /// Handler invocations that failed
    pub handler_failures: u64,
}

/// State shared between the controller and its render thread
struct LoopShared {
    status: RwLock<CameraViewStatus>,
    listeners: Mutex<Vec<Sender<CaptureEvent>>>,
    stats: Mutex<CaptureStats>,
}

impl LoopShared {
    fn new() -> Self {
        Self {
            status: RwLock::new(CameraViewStatus::Idle),
            listeners: Mutex::new(Vec::new()),
            stats: Mutex::new(CaptureStats::default()),
        }
    }

    fn publish(&self, event: CaptureEvent) {
        self.listeners
            .lock()
            .retain(|listener| listener.send(event.clone()).is_ok());
    }

    fn set_status(&self, status: CameraViewStatus) {
        {
            let mut current = self.status.write();
            if *current == status {
                return;
            }
            *current = status;
        }
        info!("Capture status: {}", status.name());
        self.publish(CaptureEvent::StatusChanged(status));
    }

    /// Update status from the render thread unless the session was cancelled.
    /// The cancel flag is raised under the same lock, so a cancelled session
    /// can never overwrite the controller's final status.
    fn set_status_if_active(&self, cancel: &AtomicBool, status: CameraViewStatus) -> bool {
        {
            let mut current = self.status.write();
            if cancel.load(Ordering::SeqCst) {
                return false;
            }
            if *current == status {
                return true;
            }
            *current = status;
        }
        info!("Capture status: {}", status.name());
        self.publish(CaptureEvent::StatusChanged(status));
        true
    }

    fn report_error(&self, message: String) {
        self.publish(CaptureEvent::Error(message));
    }
}

/// One activation: the render thread and its cancel flag
struct LoopSession {
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Drives a capture device and samples frames for downstream processing
pub struct CaptureLoop {
    device: Arc<dyn CaptureDevice>,
    handler: Arc<dyn FrameHandler>,
    config: CaptureLoopConfig,
    tracker: BitmapTracker,
    shared: Arc<LoopShared>,
    session: Option<LoopSession>,
}

impl CaptureLoop {
    /// Create an inactive capture loop
    pub fn new(
        device: Arc<dyn CaptureDevice>,
        handler: Arc<dyn FrameHandler>,
        config: CaptureLoopConfig,
    ) -> Self {
        Self {
            device,
            handler,
            config,
            tracker: BitmapTracker::new(),
            shared: Arc::new(LoopShared::new()),
            session: None,
        }
    }

    /// Account snapshots against an existing tracker
    pub fn with_tracker(mut self, tracker: BitmapTracker) -> Self {
        self.tracker = tracker;
        self
    }

    /// Tracker counting the snapshots this loop produces
    pub fn tracker(&self) -> &BitmapTracker {
        &self.tracker
    }

    pub fn status(&self) -> CameraViewStatus {
        *self.shared.status.read()
    }

    pub fn stats(&self) -> CaptureStats {
        *self.shared.stats.lock()
    }

    /// Whether an activation is in progress (acquiring or running)
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Receive status changes and errors from now on
    pub fn subscribe(&self) -> Receiver<CaptureEvent> {
        let (tx, rx) = unbounded();
        self.shared.listeners.lock().push(tx);
        rx
    }

    /// Follow an activation flag
    pub fn set_active(&mut self, active: bool) -> Result<()> {
        if active {
            self.activate()
        } else {
            self.deactivate();
            Ok(())
        }
    }

    /// Start acquiring the device and, once acquired, the render loop.
    /// Does nothing while an activation is already in progress.
    pub fn activate(&mut self) -> Result<()> {
        if self.session.is_some() {
            debug!("Capture loop already active");
            return Ok(());
        }

        self.shared.set_status(CameraViewStatus::Initializing);
        *self.shared.stats.lock() = CaptureStats::default();

        let cancel = Arc::new(AtomicBool::new(false));
        let context = RenderContext {
            device: self.device.clone(),
            handler: self.handler.clone(),
            config: self.config,
            tracker: self.tracker.clone(),
            shared: self.shared.clone(),
            cancel: cancel.clone(),
        };

        let spawned = std::thread::Builder::new()
            .name("tilelens-capture".to_string())
            .spawn(move || context.run());

        match spawned {
            Ok(handle) => {
                self.session = Some(LoopSession { cancel, handle });
                Ok(())
            }
            Err(e) => {
                self.shared.set_status(CameraViewStatus::Error);
                self.shared
                    .report_error(format!("Failed to start capture thread: {}", e));
                Err(e.into())
            }
        }
    }

    /// Stop the render loop, stop all device tracks and return to `idle`.
    ///
    /// Safe to call any number of times. If device acquisition is still
    /// pending this waits for it to return so the acquired stream is stopped
    /// before this call completes.
    pub fn deactivate(&mut self) {
        if let Some(session) = self.session.take() {
            {
                let _status = self.shared.status.write();
                session.cancel.store(true, Ordering::SeqCst);
            }
            if session.handle.join().is_err() {
                error!("Capture thread panicked during shutdown");
            }
            info!("Capture loop deactivated");
        }
        self.shared.set_status(CameraViewStatus::Idle);
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.deactivate();
    }
}

/// Everything the render thread needs, moved into it on activation
struct RenderContext {
    device: Arc<dyn CaptureDevice>,
    handler: Arc<dyn FrameHandler>,
    config: CaptureLoopConfig,
    tracker: BitmapTracker,
    shared: Arc<LoopShared>,
    cancel: Arc<AtomicBool>,
}

impl RenderContext {
    fn run(self) {
        info!(
            "Acquiring capture device '{}' ({:?}, {}x{})",
            self.device.name(),
            self.config.request.facing,
            self.config.request.width,
            self.config.request.height
        );

        let mut stream = match self.device.acquire(&self.config.request) {
            Ok(stream) => stream,
            Err(e) => {
                let status = if e.is_permission_denied() {
                    CameraViewStatus::PermissionDenied
                } else {
                    CameraViewStatus::Error
                };
                warn!("Capture device acquisition failed: {}", e);
                if self.shared.set_status_if_active(&self.cancel, status) {
                    self.shared.report_error(e.to_string());
                }
                return;
            }
        };

        if !self.shared.set_status_if_active(&self.cancel, CameraViewStatus::Ready) {
            debug!("Capture deactivated during acquisition, stopping stream");
            stream.stop();
            return;
        }

        self.render_loop(stream.as_mut());

        stream.stop();
        debug!("Capture stream stopped");
    }

    fn render_loop(&self, stream: &mut dyn VideoStream) {
        let mut surface = RasterSurface::new();
        let mut gate = SampleGate::new(self.config.sample_interval);
        let mut pending: Option<Receiver<Result<()>>> = None;

        while !self.cancel.load(Ordering::SeqCst) {
            let tick_started = Instant::now();

            if !stream.is_live() {
                warn!("Capture stream ended unexpectedly");
                if self
                    .shared
                    .set_status_if_active(&self.cancel, CameraViewStatus::Error)
                {
                    self.shared.report_error("Capture stream ended".to_string());
                }
                break;
            }

            if let Some(frame) = stream.current_frame() {
                surface.paint(frame);
                self.shared.stats.lock().frames_rendered += 1;
            }

            self.poll_pending(&mut pending, &mut gate);
            self.sample_frame(&surface, &mut gate, &mut pending, tick_started);

            let elapsed = tick_started.elapsed();
            if elapsed < self.config.render_interval {
                std::thread::sleep(self.config.render_interval - elapsed);
            }
        }

        surface.detach();
    }

    /// Clear the busy flag once an asynchronous handler settles
    fn poll_pending(&self, pending: &mut Option<Receiver<Result<()>>>, gate: &mut SampleGate) {
        let Some(receiver) = pending.as_ref() else {
            return;
        };

        match receiver.try_recv() {
            Err(TryRecvError::Empty) => return,
            Ok(Ok(())) | Err(TryRecvError::Disconnected) => {}
            Ok(Err(e)) => self.handler_failed(format!("Frame handler failed: {:#}", e)),
        }
        *pending = None;
        gate.finish();
    }

    fn sample_frame(
        &self,
        surface: &RasterSurface,
        gate: &mut SampleGate,
        pending: &mut Option<Receiver<Result<()>>>,
        now: Instant,
    ) {
        if !surface.has_frame() {
            return;
        }

        match gate.try_begin(now) {
            GateDecision::Open => {}
            GateDecision::Busy => {
                self.shared.stats.lock().skipped_busy += 1;
                return;
            }
            GateDecision::Throttled => {
                self.shared.stats.lock().skipped_throttled += 1;
                return;
            }
        }

        let Some(bitmap) = surface.snapshot(&self.tracker) else {
            gate.finish();
            return;
        };
        let metadata = FrameMetadata::now(bitmap.width(), bitmap.height());
        self.shared.stats.lock().samples_taken += 1;
        debug!("Sampled {}x{} frame at {}", metadata.width, metadata.height, metadata.timestamp);

        let handler = &self.handler;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.on_frame(bitmap, metadata)));

        match outcome {
            Ok(Ok(HandlerOutcome::Pending(receiver))) => *pending = Some(receiver),
            Ok(Ok(HandlerOutcome::Done)) => gate.finish(),
            Ok(Err(e)) => {
                self.handler_failed(format!("Frame handler failed: {:#}", e));
                gate.finish();
            }
            Err(_) => {
                self.handler_failed("Frame handler panicked".to_string());
                gate.finish();
            }
        }
    }

    fn handler_failed(&self, message: String) {
        warn!("{}", message);
        self.shared.stats.lock().handler_failures += 1;
        self.shared.report_error(message);
    }
}

//! Worker Bridge
//!
//! Owns the recognition worker for one configuration, throttles frames into
//! it and folds its responses into a snapshot a consumer can read at any
//! time (`words`, `full_text`, `status`, `error`).
//!
//! ```text
//! loading -> ready   (READY)
//! loading -> error   (ERROR while loading)
//! ready   -> ready   (RESULT, or ERROR for a single frame)
//! any     -> loading (reconfigure)
//! ```
//!
//! Responses are applied by a pump thread per worker. Each worker gets a new
//! generation number so responses from a torn-down worker are ignored.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::capture::{
    FrameBitmap, FrameHandler, FrameMetadata, GateDecision, HandlerOutcome, SampleGate,
};
use crate::recognition::{OcrResult, RecognizedWord, RecognizerFactory};
use crate::worker::{HostOptions, RecognitionHost, WorkerHandle, WorkerRequest, WorkerResponse};

/// Default minimum time between two dispatched frames
pub const DEFAULT_DISPATCH_INTERVAL: Duration = Duration::from_millis(480);

/// Bridge lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeStatus {
    #[default]
    Loading,
    Ready,
    Error,
}

impl BridgeStatus {
    pub fn name(&self) -> &'static str {
        match self {
            BridgeStatus::Loading => "loading",
            BridgeStatus::Ready => "ready",
            BridgeStatus::Error => "error",
        }
    }
}

/// Consumer-facing bridge configuration
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub language: String,
    pub min_confidence: Option<f32>,
    pub tile_size: Option<u32>,
    /// Minimum time between two dispatched frames
    pub dispatch_interval: Duration,
}

impl BridgeConfig {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            ..Default::default()
        }
    }

    fn init_request(&self) -> WorkerRequest {
        WorkerRequest::Init {
            language: Some(self.language.clone()),
            tile_size: self.tile_size,
            min_confidence: self.min_confidence,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            language: crate::recognition::DEFAULT_LANGUAGE.to_string(),
            min_confidence: None,
            tile_size: None,
            dispatch_interval: DEFAULT_DISPATCH_INTERVAL,
        }
    }
}

/// Everything a consumer can observe, taken atomically
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeSnapshot {
    pub status: BridgeStatus,
    pub words: Vec<RecognizedWord>,
    pub full_text: String,
    pub error: Option<String>,
    /// Timestamp of the frame the words belong to
    pub timestamp: Option<u64>,
}

/// Pushed to subscribers as the bridge changes
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    StatusChanged(BridgeStatus),
    Result(OcrResult),
    /// Engine or frame failure. Frame failures leave the status alone.
    Error(String),
}

/// Dispatch counters, cumulative over the bridge's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    pub dispatched: u64,
    pub dropped_not_ready: u64,
    pub dropped_busy: u64,
    pub dropped_throttled: u64,
    pub results: u64,
    pub frame_errors: u64,
}

/// What happened to a submitted frame
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Sent to the worker. Yields once the frame's response has been applied
    /// and disconnects if the worker goes away first.
    Dispatched(Receiver<Result<()>>),
    /// Dropped: the bridge is not ready
    NotReady,
    /// Dropped: a previous frame is still in flight
    Busy,
    /// Dropped: the dispatch interval has not elapsed
    Throttled,
}

impl SubmitOutcome {
    pub fn is_dispatched(&self) -> bool {
        matches!(self, SubmitOutcome::Dispatched(_))
    }
}

struct BridgeState {
    generation: u64,
    snapshot: BridgeSnapshot,
    gate: SampleGate,
    /// Notified when the in-flight frame's response arrives
    in_flight: Option<Sender<Result<()>>>,
    stats: BridgeStats,
}

struct WorkerSlot {
    config: BridgeConfig,
    handle: Option<WorkerHandle>,
}

struct BridgeInner {
    factory: Arc<dyn RecognizerFactory>,
    host_options: HostOptions,
    // Lock order: worker, then state
    worker: Mutex<WorkerSlot>,
    state: RwLock<BridgeState>,
    listeners: Mutex<Vec<Sender<BridgeEvent>>>,
}

impl BridgeInner {
    fn publish(&self, events: Vec<BridgeEvent>) {
        if events.is_empty() {
            return;
        }
        self.listeners.lock().retain(|listener| {
            events
                .iter()
                .all(|event| listener.send(event.clone()).is_ok())
        });
    }

    /// Tear down the current worker (if any) and start a fresh one for
    /// `slot.config`
    fn start_worker(self: &Arc<Self>, slot: &mut WorkerSlot) -> Result<()> {
        if let Some(mut old) = slot.handle.take() {
            old.terminate();
        }

        let generation = {
            let mut state = self.state.write();
            state.generation += 1;
            state.snapshot = BridgeSnapshot::default();
            state.gate = SampleGate::new(slot.config.dispatch_interval);
            state.in_flight = None;
            state.generation
        };
        self.publish(vec![BridgeEvent::StatusChanged(BridgeStatus::Loading)]);

        let host = RecognitionHost::new(self.factory.clone(), self.host_options.clone());
        let spawned = WorkerHandle::spawn(host).context("Failed to start recognition worker");
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.fail(generation, format!("{:#}", e));
                return Err(e);
            }
        };

        if handle.post(slot.config.init_request()).is_err() {
            self.fail(generation, "recognition worker exited before INIT".to_string());
            anyhow::bail!("recognition worker exited before INIT");
        }

        let responses = handle.responses().clone();
        let weak = Arc::downgrade(self);
        let pump = std::thread::Builder::new()
            .name(format!("tilelens-bridge-{}", generation))
            .spawn(move || pump_responses(weak, generation, responses));
        if let Err(e) = pump {
            self.fail(generation, format!("Failed to start response pump: {}", e));
            return Err(e.into());
        }

        info!(
            "Recognition worker {} starting (language={}, generation={})",
            handle.id(),
            slot.config.language,
            generation
        );
        slot.handle = Some(handle);
        Ok(())
    }

    fn fail(&self, generation: u64, message: String) {
        self.apply(generation, WorkerResponse::Error { error: message });
    }

    /// Fold one worker response into the snapshot
    fn apply(&self, generation: u64, response: WorkerResponse) {
        let mut events = Vec::new();
        let completion;
        {
            let mut state = self.state.write();
            if state.generation != generation {
                debug!(
                    "Ignoring {} from retired worker generation {}",
                    response.type_name(),
                    generation
                );
                return;
            }

            match response {
                WorkerResponse::Ready => {
                    completion = None;
                    if state.snapshot.status != BridgeStatus::Ready {
                        state.snapshot.status = BridgeStatus::Ready;
                        state.snapshot.error = None;
                        info!("Recognition bridge ready");
                        events.push(BridgeEvent::StatusChanged(BridgeStatus::Ready));
                    }
                }
                WorkerResponse::Result { payload } => {
                    completion = state.in_flight.take();
                    state.gate.finish();
                    state.stats.results += 1;
                    state.snapshot.words = payload.words.clone();
                    state.snapshot.full_text = payload.full_text.clone();
                    state.snapshot.timestamp = Some(payload.timestamp);
                    events.push(BridgeEvent::Result(payload));
                }
                WorkerResponse::Error { error: message } => {
                    let frame_in_flight = state.gate.is_busy();
                    completion = state.in_flight.take();
                    state.gate.finish();

                    if state.snapshot.status == BridgeStatus::Ready && frame_in_flight {
                        // One bad frame; later frames proceed
                        state.stats.frame_errors += 1;
                        warn!("Frame recognition failed: {}", message);
                    } else {
                        error!("Recognition engine error: {}", message);
                        if state.snapshot.status != BridgeStatus::Error {
                            state.snapshot.status = BridgeStatus::Error;
                            events.push(BridgeEvent::StatusChanged(BridgeStatus::Error));
                        }
                        state.snapshot.error = Some(message.clone());
                    }
                    events.push(BridgeEvent::Error(message));
                }
            }
        }

        self.publish(events);
        if let Some(done) = completion {
            let _ = done.send(Ok(()));
        }
    }
}

/// Apply responses from one worker until it goes away or the bridge does
fn pump_responses(bridge: Weak<BridgeInner>, generation: u64, responses: Receiver<WorkerResponse>) {
    for response in responses.iter() {
        let Some(inner) = bridge.upgrade() else {
            break;
        };
        inner.apply(generation, response);
    }
    debug!("Response pump for generation {} finished", generation);
}

/// Client side of the recognition worker
pub struct OcrBridge {
    inner: Arc<BridgeInner>,
}

impl OcrBridge {
    /// Start a worker for `config`. Status begins at `loading`.
    pub fn new(
        factory: Arc<dyn RecognizerFactory>,
        host_options: HostOptions,
        config: BridgeConfig,
    ) -> Result<Self> {
        let inner = Arc::new(BridgeInner {
            factory,
            host_options,
            worker: Mutex::new(WorkerSlot {
                config: config.clone(),
                handle: None,
            }),
            state: RwLock::new(BridgeState {
                generation: 0,
                snapshot: BridgeSnapshot::default(),
                gate: SampleGate::new(config.dispatch_interval),
                in_flight: None,
                stats: BridgeStats::default(),
            }),
            listeners: Mutex::new(Vec::new()),
        });

        {
            let mut slot = inner.worker.lock();
            inner.start_worker(&mut slot)?;
        }
        Ok(Self { inner })
    }

    /// Switch to a new configuration. A changed configuration replaces the
    /// worker and starts over at `loading`. An unchanged one does nothing,
    /// unless the bridge is in `error`, where it retries initialization.
    pub fn reconfigure(&self, config: BridgeConfig) -> Result<()> {
        let mut slot = self.inner.worker.lock();
        let failed = self.inner.state.read().snapshot.status == BridgeStatus::Error;
        if slot.config == config && slot.handle.is_some() && !failed {
            debug!("Bridge configuration unchanged");
            return Ok(());
        }
        info!("Reconfiguring recognition bridge: {:?}", config);
        slot.config = config;
        self.inner.start_worker(&mut slot)
    }

    pub fn config(&self) -> BridgeConfig {
        self.inner.worker.lock().config.clone()
    }

    /// Hand a frame to the worker, or release it right away when the bridge
    /// is not ready, busy or throttled. Frames are never queued.
    pub fn submit_frame(&self, bitmap: FrameBitmap, metadata: FrameMetadata) -> SubmitOutcome {
        let slot = self.inner.worker.lock();
        let mut state = self.inner.state.write();

        let Some(handle) = slot.handle.as_ref() else {
            state.stats.dropped_not_ready += 1;
            drop(state);
            bitmap.release();
            return SubmitOutcome::NotReady;
        };

        if state.snapshot.status != BridgeStatus::Ready {
            state.stats.dropped_not_ready += 1;
            drop(state);
            bitmap.release();
            return SubmitOutcome::NotReady;
        }

        match state.gate.try_begin(Instant::now()) {
            GateDecision::Open => {}
            GateDecision::Busy => {
                state.stats.dropped_busy += 1;
                drop(state);
                bitmap.release();
                return SubmitOutcome::Busy;
            }
            GateDecision::Throttled => {
                state.stats.dropped_throttled += 1;
                drop(state);
                bitmap.release();
                return SubmitOutcome::Throttled;
            }
        }

        let (done_tx, done_rx) = bounded(1);
        state.in_flight = Some(done_tx);
        state.stats.dispatched += 1;
        drop(state);

        let request = WorkerRequest::ProcessFrame {
            bitmap,
            width: metadata.width,
            height: metadata.height,
            timestamp: metadata.timestamp,
        };
        match handle.post(request) {
            Ok(()) => {
                debug!("Dispatched frame {}", metadata.timestamp);
                SubmitOutcome::Dispatched(done_rx)
            }
            Err(request) => {
                request.release();
                let mut state = self.inner.state.write();
                state.gate.finish();
                state.in_flight = None;
                state.stats.dispatched -= 1;
                state.stats.dropped_not_ready += 1;
                warn!("Recognition worker is gone, frame dropped");
                SubmitOutcome::NotReady
            }
        }
    }

    /// Forget the current words and transcript
    pub fn clear(&self) {
        let mut state = self.inner.state.write();
        state.snapshot.words.clear();
        state.snapshot.full_text.clear();
        state.snapshot.timestamp = None;
    }

    /// Consistent copy of the observable state
    pub fn snapshot(&self) -> BridgeSnapshot {
        self.inner.state.read().snapshot.clone()
    }

    pub fn status(&self) -> BridgeStatus {
        self.inner.state.read().snapshot.status
    }

    pub fn words(&self) -> Vec<RecognizedWord> {
        self.inner.state.read().snapshot.words.clone()
    }

    pub fn full_text(&self) -> String {
        self.inner.state.read().snapshot.full_text.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.inner.state.read().snapshot.error.clone()
    }

    pub fn stats(&self) -> BridgeStats {
        self.inner.state.read().stats
    }

    /// Receive bridge events from now on
    pub fn subscribe(&self) -> Receiver<BridgeEvent> {
        let (tx, rx) = unbounded();
        self.inner.listeners.lock().push(tx);
        rx
    }

    /// Terminate the worker regardless of in-flight work. Later responses
    /// are ignored. The status drops back to `loading` until the next
    /// `reconfigure`; the last words are kept. Idempotent.
    pub fn shutdown(&self) {
        let mut slot = self.inner.worker.lock();
        let Some(mut handle) = slot.handle.take() else {
            return;
        };
        handle.terminate();

        let changed = {
            let mut state = self.inner.state.write();
            state.generation += 1;
            state.in_flight = None;
            state.gate.reset();
            state.snapshot.error = None;
            let previous = std::mem::replace(&mut state.snapshot.status, BridgeStatus::Loading);
            previous != BridgeStatus::Loading
        };
        if changed {
            self.inner
                .publish(vec![BridgeEvent::StatusChanged(BridgeStatus::Loading)]);
        }
        info!("Recognition bridge shut down");
    }
}

impl Drop for OcrBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl FrameHandler for OcrBridge {
    fn on_frame(&self, frame: FrameBitmap, metadata: FrameMetadata) -> Result<HandlerOutcome> {
        Ok(match self.submit_frame(frame, metadata) {
            SubmitOutcome::Dispatched(done) => HandlerOutcome::Pending(done),
            _ => HandlerOutcome::Done,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::BitmapTracker;
    use crate::recognition::{
        EngineError, NoopRecognizer, PixelBox, RawToken, TextRecognizer, Tile, TileRecognition,
    };
    use image::RgbaImage;
    use std::sync::atomic::{AtomicBool, Ordering};

    const WAIT: Duration = Duration::from_secs(5);

    /// Engine whose recognition waits for a go signal, then either reads one
    /// word or fails
    struct ScriptedEngine {
        go: Option<Receiver<()>>,
        fail: bool,
    }

    impl TextRecognizer for ScriptedEngine {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn language(&self) -> &str {
            "eng"
        }

        fn recognize(&mut self, _frame: &RgbaImage, _region: &Tile) -> Result<TileRecognition, EngineError> {
            if let Some(go) = &self.go {
                let _ = go.recv_timeout(WAIT);
            }
            if self.fail {
                return Err(EngineError::Recognition("unreadable".to_string()));
            }
            Ok(TileRecognition::from_tokens(vec![RawToken::new(
                "Exit",
                95.0,
                PixelBox::from_rect(4.0, 4.0, 30.0, 12.0),
            )]))
        }
    }

    fn scripted_factory(go: Option<Receiver<()>>, fail: bool) -> Arc<dyn RecognizerFactory> {
        Arc::new(move |_language: &str| -> Result<Box<dyn TextRecognizer>, EngineError> {
            Ok(Box::new(ScriptedEngine {
                go: go.clone(),
                fail,
            }))
        })
    }

    fn config(interval_ms: u64) -> BridgeConfig {
        BridgeConfig {
            dispatch_interval: Duration::from_millis(interval_ms),
            ..BridgeConfig::new("eng")
        }
    }

    fn frame(tracker: &BitmapTracker, timestamp: u64) -> (FrameBitmap, FrameMetadata) {
        (
            FrameBitmap::new(RgbaImage::new(64, 64), tracker),
            FrameMetadata {
                width: 64,
                height: 64,
                timestamp,
            },
        )
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn ready_bridge(factory: Arc<dyn RecognizerFactory>, interval_ms: u64) -> OcrBridge {
        let bridge = OcrBridge::new(factory, HostOptions::default(), config(interval_ms)).unwrap();
        assert!(wait_until(|| bridge.status() == BridgeStatus::Ready));
        bridge
    }

    #[test]
    fn test_frames_released_while_loading() {
        let (release_init, init_gate) = bounded::<()>(1);
        let factory: Arc<dyn RecognizerFactory> =
            Arc::new(move |language: &str| -> Result<Box<dyn TextRecognizer>, EngineError> {
                let _ = init_gate.recv_timeout(WAIT);
                Ok(Box::new(NoopRecognizer::new(language)))
            });
        let bridge = OcrBridge::new(factory, HostOptions::default(), config(0)).unwrap();
        let tracker = BitmapTracker::new();

        assert_eq!(bridge.status(), BridgeStatus::Loading);
        for timestamp in 0..3 {
            let (bitmap, metadata) = frame(&tracker, timestamp);
            assert!(matches!(bridge.submit_frame(bitmap, metadata), SubmitOutcome::NotReady));
        }
        assert_eq!(tracker.released(), 3);
        assert_eq!(tracker.live(), 0);
        assert_eq!(bridge.stats().dropped_not_ready, 3);
        assert_eq!(bridge.stats().dispatched, 0);

        release_init.send(()).unwrap();
        assert!(wait_until(|| bridge.status() == BridgeStatus::Ready));
    }

    #[test]
    fn test_busy_frames_released_and_result_applied() {
        let (go, go_rx) = bounded::<()>(4);
        let bridge = ready_bridge(scripted_factory(Some(go_rx), false), 0);
        let events = bridge.subscribe();
        let tracker = BitmapTracker::new();

        let (bitmap, metadata) = frame(&tracker, 1);
        let SubmitOutcome::Dispatched(done) = bridge.submit_frame(bitmap, metadata) else {
            panic!("first frame should be dispatched");
        };

        let (bitmap, metadata) = frame(&tracker, 2);
        assert!(matches!(bridge.submit_frame(bitmap, metadata), SubmitOutcome::Busy));
        assert_eq!(tracker.released(), 1);

        go.send(()).unwrap();
        assert!(done.recv_timeout(WAIT).unwrap().is_ok());

        let snapshot = bridge.snapshot();
        assert_eq!(snapshot.status, BridgeStatus::Ready);
        assert_eq!(snapshot.words.len(), 1);
        assert_eq!(snapshot.words[0].text, "Exit");
        assert_eq!(snapshot.full_text, "Exit");
        assert_eq!(snapshot.timestamp, Some(1));
        assert_eq!(tracker.released(), 2);
        assert_eq!(tracker.leaked(), 0);

        let received: Vec<BridgeEvent> = events.try_iter().collect();
        assert!(received.iter().any(|e| matches!(e, BridgeEvent::Result(r) if r.timestamp == 1)));

        let stats = bridge.stats();
        assert_eq!(stats.dispatched, 1);
        assert_eq!(stats.dropped_busy, 1);
        assert_eq!(stats.results, 1);
    }

    #[test]
    fn test_dispatch_interval_throttles() {
        let bridge = ready_bridge(scripted_factory(None, false), 60_000);
        let tracker = BitmapTracker::new();

        let (bitmap, metadata) = frame(&tracker, 1);
        let SubmitOutcome::Dispatched(done) = bridge.submit_frame(bitmap, metadata) else {
            panic!("first frame should be dispatched");
        };
        done.recv_timeout(WAIT).unwrap().unwrap();

        let (bitmap, metadata) = frame(&tracker, 2);
        assert!(matches!(bridge.submit_frame(bitmap, metadata), SubmitOutcome::Throttled));
        assert_eq!(tracker.released(), 2);
        assert_eq!(bridge.stats().dropped_throttled, 1);
    }

    #[test]
    fn test_init_failure_moves_to_error() {
        let factory: Arc<dyn RecognizerFactory> =
            Arc::new(|language: &str| -> Result<Box<dyn TextRecognizer>, EngineError> {
                Err(EngineError::LanguageUnavailable(language.to_string()))
            });
        let bridge = OcrBridge::new(factory, HostOptions::default(), config(0)).unwrap();

        assert!(wait_until(|| bridge.status() == BridgeStatus::Error));
        let error = bridge.error().unwrap();
        assert!(error.contains("eng"), "unexpected error text: {}", error);

        let tracker = BitmapTracker::new();
        let (bitmap, metadata) = frame(&tracker, 1);
        assert!(matches!(bridge.submit_frame(bitmap, metadata), SubmitOutcome::NotReady));
        assert_eq!(tracker.released(), 1);
    }

    #[test]
    fn test_reconfigure_same_config_retries_after_init_failure() {
        let installed = Arc::new(AtomicBool::new(false));
        let flag = installed.clone();
        let factory: Arc<dyn RecognizerFactory> =
            Arc::new(move |language: &str| -> Result<Box<dyn TextRecognizer>, EngineError> {
                if flag.load(Ordering::SeqCst) {
                    Ok(Box::new(NoopRecognizer::new(language)))
                } else {
                    Err(EngineError::LanguageUnavailable(language.to_string()))
                }
            });
        let bridge = OcrBridge::new(factory, HostOptions::default(), config(0)).unwrap();
        assert!(wait_until(|| bridge.status() == BridgeStatus::Error));

        // Language pack installed; retry without changing anything
        installed.store(true, Ordering::SeqCst);
        bridge.reconfigure(config(0)).unwrap();
        assert!(wait_until(|| bridge.status() == BridgeStatus::Ready));
        assert!(bridge.error().is_none());
    }

    #[test]
    fn test_frame_error_keeps_bridge_ready() {
        let bridge = ready_bridge(scripted_factory(None, true), 0);
        let events = bridge.subscribe();
        let tracker = BitmapTracker::new();

        let (bitmap, metadata) = frame(&tracker, 1);
        let SubmitOutcome::Dispatched(done) = bridge.submit_frame(bitmap, metadata) else {
            panic!("frame should be dispatched");
        };
        done.recv_timeout(WAIT).unwrap().unwrap();

        assert_eq!(bridge.status(), BridgeStatus::Ready);
        assert!(bridge.error().is_none());
        assert_eq!(bridge.stats().frame_errors, 1);
        let received: Vec<BridgeEvent> = events.try_iter().collect();
        assert!(received.iter().any(|e| matches!(e, BridgeEvent::Error(m) if m.contains("unreadable"))));
        assert!(!received.contains(&BridgeEvent::StatusChanged(BridgeStatus::Error)));

        // The next frame goes through
        let (bitmap, metadata) = frame(&tracker, 2);
        assert!(bridge.submit_frame(bitmap, metadata).is_dispatched());
        assert!(wait_until(|| tracker.released() == 2));
    }

    #[test]
    fn test_reconfigure_restarts_at_loading() {
        let bridge = ready_bridge(scripted_factory(None, false), 0);
        let tracker = BitmapTracker::new();
        let (bitmap, metadata) = frame(&tracker, 1);
        let SubmitOutcome::Dispatched(done) = bridge.submit_frame(bitmap, metadata) else {
            panic!("frame should be dispatched");
        };
        done.recv_timeout(WAIT).unwrap().unwrap();
        assert_eq!(bridge.words().len(), 1);

        let events = bridge.subscribe();
        bridge.reconfigure(BridgeConfig::new("deu")).unwrap();
        assert!(bridge.words().is_empty());
        assert!(wait_until(|| bridge.status() == BridgeStatus::Ready));
        assert_eq!(bridge.config().language, "deu");

        let received: Vec<BridgeEvent> = events.try_iter().collect();
        assert_eq!(received.first(), Some(&BridgeEvent::StatusChanged(BridgeStatus::Loading)));

        // Same config again is a no-op
        bridge.reconfigure(BridgeConfig::new("deu")).unwrap();
        assert_eq!(bridge.status(), BridgeStatus::Ready);
    }

    #[test]
    fn test_shutdown_mid_flight_releases_frame() {
        let (go, go_rx) = bounded::<()>(1);
        let bridge = ready_bridge(scripted_factory(Some(go_rx), false), 0);
        let tracker = BitmapTracker::new();

        let (bitmap, metadata) = frame(&tracker, 1);
        let SubmitOutcome::Dispatched(done) = bridge.submit_frame(bitmap, metadata) else {
            panic!("frame should be dispatched");
        };
        bridge.shutdown();
        bridge.shutdown();
        go.send(()).unwrap();

        // The worker finishes or abandons the frame and releases it either way
        assert!(wait_until(|| tracker.released() == 1));
        assert_eq!(tracker.leaked(), 0);
        assert!(done.recv_timeout(WAIT).is_err());
        assert!(bridge.words().is_empty());
        assert_eq!(bridge.status(), BridgeStatus::Loading);

        let (bitmap, metadata) = frame(&tracker, 2);
        assert!(matches!(bridge.submit_frame(bitmap, metadata), SubmitOutcome::NotReady));
        assert_eq!(tracker.released(), 2);
    }

    #[test]
    fn test_shutdown_leaves_ready_and_reconfigure_restarts() {
        let bridge = ready_bridge(scripted_factory(None, false), 0);
        let events = bridge.subscribe();

        bridge.shutdown();
        assert_eq!(bridge.status(), BridgeStatus::Loading);
        let received: Vec<BridgeEvent> = events.try_iter().collect();
        assert_eq!(received, vec![BridgeEvent::StatusChanged(BridgeStatus::Loading)]);

        bridge.reconfigure(config(0)).unwrap();
        assert!(wait_until(|| bridge.status() == BridgeStatus::Ready));
    }

    #[test]
    fn test_clear_forgets_words() {
        let bridge = ready_bridge(scripted_factory(None, false), 0);
        let tracker = BitmapTracker::new();
        let (bitmap, metadata) = frame(&tracker, 1);
        if let SubmitOutcome::Dispatched(done) = bridge.submit_frame(bitmap, metadata) {
            done.recv_timeout(WAIT).unwrap().unwrap();
        }
        assert!(!bridge.full_text().is_empty());

        bridge.clear();
        assert!(bridge.words().is_empty());
        assert!(bridge.full_text().is_empty());
        assert_eq!(bridge.status(), BridgeStatus::Ready);
    }
}

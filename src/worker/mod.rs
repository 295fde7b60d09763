//! Background recognition worker
//!
//! A dedicated thread owning a [`RecognitionHost`]. The only way in or out is
//! a pair of channels carrying [`WorkerRequest`] and [`WorkerResponse`]
//! messages.

pub mod host;
pub mod protocol;

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, error, info};
use uuid::Uuid;

pub use host::{HostOptions, RecognitionHost};
pub use protocol::{WorkerRequest, WorkerResponse};

/// Readable text from a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Thread body: serves requests until shut down or disconnected
pub struct RecognitionWorker {
    id: Uuid,
    host: RecognitionHost,
    requests: Receiver<WorkerRequest>,
    responses: Sender<WorkerResponse>,
    shutdown: Arc<AtomicBool>,
}

impl RecognitionWorker {
    fn run(mut self) {
        info!("Recognition worker {} started", self.id);

        while let Ok(request) = self.requests.recv() {
            if self.shutdown.load(Ordering::SeqCst) {
                request.release();
                break;
            }

            let kind = request.type_name();
            debug!("Worker {} handling {}", self.id, kind);
            let host = &mut self.host;
            let response = match panic::catch_unwind(AssertUnwindSafe(|| host.handle(request))) {
                Ok(response) => response,
                Err(payload) => {
                    let message = panic_message(&*payload);
                    error!("Worker {} panicked handling {}: {}", self.id, kind, message);
                    WorkerResponse::error(message)
                }
            };

            if self.shutdown.load(Ordering::SeqCst) {
                debug!("Worker {} terminated, dropping {}", self.id, response.type_name());
                break;
            }
            if self.responses.send(response).is_err() {
                break;
            }
        }

        // Anything still queued carries frames nobody else will release
        for request in self.requests.try_iter() {
            request.release();
        }
        self.host.shutdown();
        info!("Recognition worker {} stopped", self.id);
    }
}

/// Owner's end of a running worker
pub struct WorkerHandle {
    id: Uuid,
    requests: Option<Sender<WorkerRequest>>,
    responses: Receiver<WorkerResponse>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Start a worker thread around `host`
    pub fn spawn(host: RecognitionHost) -> io::Result<Self> {
        let id = Uuid::new_v4();
        let shutdown = Arc::new(AtomicBool::new(false));
        let (request_tx, request_rx) = unbounded();
        let (response_tx, response_rx) = unbounded();

        let worker = RecognitionWorker {
            id,
            host: host.with_cancel_flag(shutdown.clone()),
            requests: request_rx,
            responses: response_tx,
            shutdown: shutdown.clone(),
        };

        let thread = std::thread::Builder::new()
            .name(format!("tilelens-worker-{}", &id.simple().to_string()[..8]))
            .spawn(move || worker.run())?;

        Ok(Self {
            id,
            requests: Some(request_tx),
            responses: response_rx,
            shutdown,
            thread: Some(thread),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue a request. Hands the request back when the worker is gone.
    pub fn post(&self, request: WorkerRequest) -> Result<(), WorkerRequest> {
        match &self.requests {
            Some(sender) if !self.is_terminated() => sender.send(request).map_err(|e| e.into_inner()),
            _ => Err(request),
        }
    }

    /// Responses in the order the worker produced them
    pub fn responses(&self) -> &Receiver<WorkerResponse> {
        &self.responses
    }

    pub fn is_terminated(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Stop the worker without waiting for it. In-flight work is abandoned at
    /// the next tile boundary and its frame released by the worker.
    pub fn terminate(&mut self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        self.requests = None;
        // Detach; the thread exits on its own
        self.thread.take();
        info!("Recognition worker {} terminated", self.id);
    }

    /// Stop the worker and wait for its thread to exit
    pub fn join(mut self) {
        let thread = self.thread.take();
        self.terminate();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                error!("Recognition worker {} thread panicked", self.id);
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.terminate();
    }
}

//! Cross-task transport: calls multiplexed over one channel pair to a
//! worker.
//!
//! A [`WorkerConnection`] owns the client end. Each call gets an id; its
//! `Start` frame goes to the worker on the shared request channel, and
//! every response frame comes back tagged with that id. A dispatcher task
//! routes frames to the originating call's sink. Cancelling a call sends a
//! `Cancel` frame for its id only, so other calls on the connection are
//! unaffected.
//!
//! The worker runs a [`WorkerHandler`] per call, each in its own task.
//! [`spawn_worker`] runs worker and dispatcher on the current runtime;
//! [`serve_worker`] plus [`WorkerConnection::connect`] put the worker
//! anywhere else, e.g. a dedicated thread with its own runtime.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use super::event::{CallError, CallStatus, Metadata, StatusCode, TransportEvent};
use super::settings::{ClientSettings, SettingsRegistry};
use super::source::{CallGuard, CallKind, EventSink};
use super::{RawCall, Transport, TransportFactory};
use crate::Result;

/// Responses of a server-streaming handler. An `Err` item ends the stream
/// with that status.
pub type ResponseStream =
    Pin<Box<dyn Stream<Item = std::result::Result<Bytes, CallStatus>> + Send>>;

/// Worker-side implementation of the calls a connection carries.
#[async_trait]
pub trait WorkerHandler: Send + Sync + 'static {
    /// Answer a unary call with a payload and trailers, or a failure status.
    async fn unary(&self, call: RawCall) -> std::result::Result<(Bytes, Metadata), CallStatus>;

    /// Answer a server-streaming call.
    async fn server_stream(&self, call: RawCall) -> std::result::Result<ResponseStream, CallStatus>;
}

/// Client-to-worker frame.
#[derive(Debug, Clone)]
pub enum WorkerRequest {
    Start { id: u64, kind: CallKind, call: RawCall },
    Cancel { id: u64 },
}

/// Worker-to-client frame.
#[derive(Debug, Clone)]
pub struct WorkerFrame {
    pub id: u64,
    pub event: TransportEvent<Bytes>,
}

type CallMap = Arc<Mutex<HashMap<u64, EventSink<Bytes>>>>;

// =============================================================================
// Worker side
// =============================================================================

/// Serve calls from `requests` until every client end is dropped.
///
/// Each call runs in its own task so a slow call never delays another.
/// `Cancel` aborts the call's task; frames it already sent are dropped by
/// the client end.
pub async fn serve_worker(
    handler: Arc<dyn WorkerHandler>,
    mut requests: mpsc::UnboundedReceiver<WorkerRequest>,
    frames: mpsc::UnboundedSender<WorkerFrame>,
) {
    let mut running: HashMap<u64, AbortHandle> = HashMap::new();

    while let Some(request) = requests.recv().await {
        match request {
            WorkerRequest::Start { id, kind, call } => {
                running.retain(|_, task| !task.is_finished());
                tracing::trace!(id, path = %call.path, %kind, "worker starting call");

                let handler = Arc::clone(&handler);
                let frames = frames.clone();
                let task = tokio::spawn(async move {
                    match kind {
                        CallKind::Unary => run_unary(handler, id, call, frames).await,
                        CallKind::ServerStream => run_stream(handler, id, call, frames).await,
                    }
                });
                running.insert(id, task.abort_handle());
            }
            WorkerRequest::Cancel { id } => {
                if let Some(task) = running.remove(&id) {
                    tracing::trace!(id, "worker aborting call");
                    task.abort();
                }
            }
        }
    }

    for task in running.into_values() {
        task.abort();
    }
    tracing::debug!("worker stopped");
}

async fn run_unary(
    handler: Arc<dyn WorkerHandler>,
    id: u64,
    call: RawCall,
    frames: mpsc::UnboundedSender<WorkerFrame>,
) {
    let send = |event| {
        let _ = frames.send(WorkerFrame { id, event });
    };
    match handler.unary(call).await {
        Ok((payload, trailers)) => {
            send(TransportEvent::Data(payload));
            send(TransportEvent::Status(CallStatus::ok_with(trailers)));
        }
        Err(status) => send(TransportEvent::Status(status)),
    }
}

async fn run_stream(
    handler: Arc<dyn WorkerHandler>,
    id: u64,
    call: RawCall,
    frames: mpsc::UnboundedSender<WorkerFrame>,
) {
    let send = |event| frames.send(WorkerFrame { id, event }).is_ok();
    let mut responses = match handler.server_stream(call).await {
        Ok(responses) => responses,
        Err(status) => {
            send(TransportEvent::Status(status));
            return;
        }
    };

    while let Some(item) = responses.next().await {
        match item {
            Ok(payload) => {
                if !send(TransportEvent::Data(payload)) {
                    return; // client end gone
                }
            }
            Err(status) => {
                send(TransportEvent::Status(status));
                return;
            }
        }
    }
    send(TransportEvent::Status(CallStatus::ok()));
}

// =============================================================================
// Client side
// =============================================================================

/// Client end of a worker channel pair. Clones share the connection.
#[derive(Clone)]
pub struct WorkerConnection {
    requests: mpsc::UnboundedSender<WorkerRequest>,
    calls: CallMap,
    next_id: Arc<AtomicU64>,
}

impl fmt::Debug for WorkerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerConnection")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl WorkerConnection {
    /// Attach to a worker served elsewhere and spawn the frame dispatcher.
    ///
    /// # Panics
    ///
    /// Requires a tokio runtime context.
    pub fn connect(
        requests: mpsc::UnboundedSender<WorkerRequest>,
        frames: mpsc::UnboundedReceiver<WorkerFrame>,
    ) -> Self {
        let calls: CallMap = Arc::default();
        tokio::spawn(dispatch(frames, Arc::clone(&calls)));
        Self {
            requests,
            calls,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Calls started and not yet terminated or cancelled.
    pub fn in_flight(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn start(&self, kind: CallKind, call: RawCall, sink: EventSink<Bytes>) -> CallGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, sink.clone());

        if self
            .requests
            .send(WorkerRequest::Start { id, kind, call })
            .is_err()
        {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            sink.error(CallError::new(
                StatusCode::Unavailable,
                "worker is not running",
            ));
            return CallGuard::noop();
        }

        let requests = self.requests.clone();
        let calls = Arc::clone(&self.calls);
        CallGuard::new(move || {
            calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            let _ = requests.send(WorkerRequest::Cancel { id });
        })
    }
}

/// Route worker frames to their calls. Ends when the worker drops its
/// frame sender; calls still waiting then fail with `UNAVAILABLE`.
async fn dispatch(mut frames: mpsc::UnboundedReceiver<WorkerFrame>, calls: CallMap) {
    while let Some(WorkerFrame { id, event }) = frames.recv().await {
        let sink = {
            let mut calls = calls.lock().unwrap_or_else(PoisonError::into_inner);
            if event.is_terminal() {
                calls.remove(&id)
            } else {
                calls.get(&id).cloned()
            }
        };

        match sink {
            Some(sink) => sink.emit(event),
            None => tracing::trace!(id, "dropping frame for finished call"),
        }
    }

    let orphaned: Vec<_> = calls
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .drain()
        .map(|(_, sink)| sink)
        .collect();
    if !orphaned.is_empty() {
        tracing::warn!(calls = orphaned.len(), "worker stopped with calls in flight");
    }
    for sink in orphaned {
        sink.error(CallError::new(StatusCode::Unavailable, "worker stopped"));
    }
}

/// Run `handler` as a worker on the current runtime and connect to it.
///
/// # Panics
///
/// Requires a tokio runtime context.
pub fn spawn_worker(handler: impl WorkerHandler) -> WorkerConnection {
    let (requests_tx, requests_rx) = mpsc::unbounded_channel();
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    tokio::spawn(serve_worker(Arc::new(handler), requests_rx, frames_tx));
    WorkerConnection::connect(requests_tx, frames_rx)
}

// =============================================================================
// Transport
// =============================================================================

/// [`Transport`] over a [`WorkerConnection`].
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    connection: WorkerConnection,
    host: String,
}

impl ChannelTransport {
    pub fn new(connection: WorkerConnection, host: impl Into<String>) -> Self {
        Self {
            connection,
            host: host.into(),
        }
    }

    /// Host from the settings this transport was created with. The worker
    /// connection is fixed, so it only labels the transport.
    pub fn host(&self) -> &str {
        &self.host
    }
}

impl Transport for ChannelTransport {
    fn name(&self) -> &str {
        "channel"
    }

    fn start_unary(&self, call: RawCall, sink: EventSink<Bytes>) -> CallGuard {
        self.connection.start(CallKind::Unary, call, sink)
    }

    fn start_server_stream(&self, call: RawCall, sink: EventSink<Bytes>) -> CallGuard {
        self.connection.start(CallKind::ServerStream, call, sink)
    }
}

/// Creates [`ChannelTransport`]s sharing one connection.
#[derive(Debug, Clone)]
pub struct ChannelTransportFactory {
    connection: WorkerConnection,
    registry: SettingsRegistry,
    default: Option<ClientSettings>,
}

impl ChannelTransportFactory {
    /// Consults the global [`SettingsRegistry`] and has no default.
    pub fn new(connection: WorkerConnection) -> Self {
        Self {
            connection,
            registry: SettingsRegistry::global().clone(),
            default: None,
        }
    }

    pub fn with_registry(mut self, registry: SettingsRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_default(mut self, settings: ClientSettings) -> Self {
        self.default = Some(settings);
        self
    }
}

impl TransportFactory for ChannelTransportFactory {
    fn create_transport(
        &self,
        service_id: &str,
        settings: Option<ClientSettings>,
    ) -> Result<Arc<dyn Transport>> {
        let settings = self
            .registry
            .resolve(service_id, settings, self.default.as_ref())?;
        Ok(Arc::new(ChannelTransport::new(
            self.connection.clone(),
            settings.host,
        )))
    }
}

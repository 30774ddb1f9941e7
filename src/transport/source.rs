//! Cold, cancellable event sources.
//!
//! An [`EventSource`] describes one call without starting it. Each
//! [`EventSource::subscribe`] starts a fresh underlying call and returns a
//! [`Subscription`], a [`Stream`] of [`TransportEvent`]s.
//!
//! Every activation runs its own state machine:
//!
//! ```text
//! (EventSource) --subscribe--> Active --terminal event--> Terminated
//!                                 \
//!                                  `------cancel-------> Cancelled
//! ```
//!
//! Transports push events into an [`EventSink`]; the state machine decides
//! what reaches the consumer. Nothing is delivered once the call left
//! `Active`, even events the transport had already produced. Unary calls
//! hold their single `Data` event back until the terminal status arrives, so
//! a consumer only ever observes `[Data, Status(OK)]`, `[Status(non-OK)]`
//! or `[Error]`.

use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::deadline::Deadline;
use super::event::{CallError, CallStatus, Metadata, StatusCode, TransportEvent};
use crate::{ProtolaneError, Result, telemetry};

/// Call shape, which decides the legal event sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Unary,
    ServerStream,
}

impl CallKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CallKind::Unary => "unary",
            CallKind::ServerStream => "server_stream",
        }
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a call in logs and metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallLabel {
    pub transport: String,
    pub kind: CallKind,
    pub path: String,
}

/// Abort hook for an in-flight call, returned by a transport when it starts
/// one.
///
/// Dropping a guard does not abort anything. The state machine invokes the
/// hook once, when the consumer cancels (or when it rejects the call's
/// output and terminates it early).
pub struct CallGuard {
    abort: Option<Box<dyn FnOnce() + Send>>,
}

impl CallGuard {
    pub fn new(abort: impl FnOnce() + Send + 'static) -> Self {
        Self {
            abort: Some(Box::new(abort)),
        }
    }

    /// A guard for calls that cannot be interrupted, or finished already.
    pub fn noop() -> Self {
        Self { abort: None }
    }

    /// Abort the spawned task driving the call.
    pub fn from_task<T>(task: &tokio::task::JoinHandle<T>) -> Self {
        let handle = task.abort_handle();
        Self::new(move || handle.abort())
    }

    pub(crate) fn abort(mut self) {
        if let Some(abort) = self.abort.take() {
            abort();
        }
    }
}

impl fmt::Debug for CallGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallGuard")
            .field("armed", &self.abort.is_some())
            .finish()
    }
}

/// Receiver of a call's raw event stream.
pub trait EventTarget<T>: Send + Sync {
    fn emit(&self, event: TransportEvent<T>);

    /// Terminate the call with `error` and abort the underlying work.
    fn fail(&self, error: CallError) {
        self.emit(TransportEvent::Error(error));
    }

    /// Whether further events would be dropped.
    fn is_closed(&self) -> bool;
}

/// Handle a transport uses to report a call's events.
pub struct EventSink<T> {
    target: Arc<dyn EventTarget<T>>,
}

impl<T> Clone for EventSink<T> {
    fn clone(&self) -> Self {
        Self {
            target: Arc::clone(&self.target),
        }
    }
}

impl<T> fmt::Debug for EventSink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("closed", &self.target.is_closed())
            .finish()
    }
}

impl<T: Send + 'static> EventSink<T> {
    pub fn new(target: Arc<dyn EventTarget<T>>) -> Self {
        Self { target }
    }

    pub fn emit(&self, event: TransportEvent<T>) {
        self.target.emit(event);
    }

    pub fn data(&self, value: T) {
        self.emit(TransportEvent::Data(value));
    }

    pub fn status(&self, status: CallStatus) {
        self.emit(TransportEvent::Status(status));
    }

    pub fn error(&self, error: CallError) {
        self.emit(TransportEvent::Error(error));
    }

    pub fn fail(&self, error: CallError) {
        self.target.fail(error);
    }

    /// True once the call terminated or was cancelled. Transports may poll
    /// this to stop producing early.
    pub fn is_closed(&self) -> bool {
        self.target.is_closed()
    }

    /// A byte-level sink that decodes each payload before forwarding it.
    /// A payload that fails to decode terminates the call with `INTERNAL`.
    pub fn decoding(self, decode: fn(&[u8]) -> Result<T>) -> EventSink<Bytes> {
        EventSink::new(Arc::new(Decoding {
            inner: self,
            decode,
        }))
    }
}

struct Decoding<T> {
    inner: EventSink<T>,
    decode: fn(&[u8]) -> Result<T>,
}

impl<T: Send + 'static> EventTarget<Bytes> for Decoding<T> {
    fn emit(&self, event: TransportEvent<Bytes>) {
        match event {
            TransportEvent::Data(payload) => match (self.decode)(&payload) {
                Ok(value) => self.inner.data(value),
                Err(e) => self.inner.fail(CallError::new(
                    StatusCode::Internal,
                    format!("failed to decode response: {e}"),
                )),
            },
            TransportEvent::Status(status) => self.inner.status(status),
            TransportEvent::Error(error) => self.inner.error(error),
        }
    }

    fn fail(&self, error: CallError) {
        self.inner.fail(error);
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

// =============================================================================
// Per-activation state machine
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Active,
    Terminated,
    Cancelled,
}

struct CallState<T> {
    phase: Phase,
    /// Unary response held back until the terminal status.
    pending: Option<T>,
    events: Option<mpsc::UnboundedSender<TransportEvent<T>>>,
    guard: Option<CallGuard>,
    /// Set when the call was rejected before `start` handed over its guard.
    abort_requested: bool,
}

struct CallShared<T> {
    label: CallLabel,
    started: Instant,
    state: Mutex<CallState<T>>,
}

impl<T> CallShared<T> {
    fn lock(&self) -> MutexGuard<'_, CallState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move Active -> Cancelled and abort the underlying call. Returns
    /// whether the call was still active.
    fn cancel(&self) -> bool {
        let guard = {
            let mut state = self.lock();
            if state.phase != Phase::Active {
                return false;
            }
            state.phase = Phase::Cancelled;
            state.events = None;
            state.pending = None;
            state.guard.take()
        };

        metrics::counter!(telemetry::CANCELLATIONS_TOTAL,
            "transport" => self.label.transport.clone(),
            "kind" => self.label.kind.as_str(),
        )
        .increment(1);
        tracing::debug!(
            transport = %self.label.transport,
            path = %self.label.path,
            "call cancelled"
        );

        // Abort outside the lock: the hook may synchronously emit.
        if let Some(guard) = guard {
            guard.abort();
        }
        true
    }

    fn suppress(&self, reason: &'static str) {
        metrics::counter!(telemetry::SUPPRESSED_EVENTS_TOTAL, "reason" => reason).increment(1);
        tracing::trace!(path = %self.label.path, reason, "event suppressed");
    }

    fn send(state: &mut CallState<T>, event: TransportEvent<T>) {
        if let Some(events) = &state.events {
            // A closed receiver means the subscription is gone; nothing to do.
            let _ = events.send(event);
        }
    }

    /// Deliver the terminal event and close the call. Returns the guard,
    /// which the caller drops or aborts after releasing the lock.
    fn finish(&self, state: &mut CallState<T>, event: TransportEvent<T>) -> Option<CallGuard> {
        let code = event.code().unwrap_or(StatusCode::Unknown);
        Self::send(state, event);
        state.phase = Phase::Terminated;
        state.events = None;

        metrics::counter!(telemetry::CALL_OUTCOMES_TOTAL,
            "transport" => self.label.transport.clone(),
            "kind" => self.label.kind.as_str(),
            "code" => code.name(),
        )
        .increment(1);
        metrics::histogram!(telemetry::CALL_DURATION_SECONDS,
            "transport" => self.label.transport.clone(),
            "kind" => self.label.kind.as_str(),
        )
        .record(self.started.elapsed().as_secs_f64());
        tracing::debug!(
            transport = %self.label.transport,
            path = %self.label.path,
            code = %code,
            "call terminated"
        );

        state.guard.take()
    }

    /// Terminate with an `INTERNAL` error because the transport broke the
    /// event contract. The transport's call is aborted.
    fn violation(
        &self,
        state: &mut CallState<T>,
        message: &'static str,
        reason: &'static str,
    ) -> Option<CallGuard> {
        tracing::warn!(
            transport = %self.label.transport,
            path = %self.label.path,
            "{message}"
        );
        self.suppress(reason);
        state.pending = None;
        let guard = self.finish(
            state,
            TransportEvent::Error(CallError::new(StatusCode::Internal, message)),
        );
        state.abort_requested = guard.is_none();
        guard
    }

    fn check_active(&self, state: &CallState<T>) -> bool {
        match state.phase {
            Phase::Active => true,
            Phase::Terminated => {
                self.suppress("after_terminal");
                false
            }
            Phase::Cancelled => {
                self.suppress("after_cancel");
                false
            }
        }
    }
}

impl<T: Send + 'static> EventTarget<T> for CallShared<T> {
    fn emit(&self, event: TransportEvent<T>) {
        let abort = {
            let mut state = self.lock();
            if !self.check_active(&state) {
                return;
            }

            match (self.label.kind, event) {
                (CallKind::ServerStream, TransportEvent::Data(value)) => {
                    Self::send(&mut state, TransportEvent::Data(value));
                    None
                }
                (CallKind::ServerStream, terminal) => {
                    // Natural completion: the guard is dropped, not aborted.
                    drop(self.finish(&mut state, terminal));
                    None
                }
                (CallKind::Unary, TransportEvent::Data(value)) => {
                    if state.pending.is_some() {
                        self.violation(
                            &mut state,
                            "unary call produced more than one response",
                            "unary_extra_data",
                        )
                    } else {
                        state.pending = Some(value);
                        None
                    }
                }
                (CallKind::Unary, TransportEvent::Status(status)) if status.code.is_ok() => {
                    match state.pending.take() {
                        Some(value) => {
                            Self::send(&mut state, TransportEvent::Data(value));
                            drop(self.finish(&mut state, TransportEvent::Status(status)));
                            None
                        }
                        None => self.violation(
                            &mut state,
                            "unary call completed without a response",
                            "unary_without_data",
                        ),
                    }
                }
                (CallKind::Unary, terminal) => {
                    if state.pending.take().is_some() {
                        self.suppress("unary_data_on_failure");
                    }
                    drop(self.finish(&mut state, terminal));
                    None
                }
            }
        };

        if let Some(guard) = abort {
            guard.abort();
        }
    }

    fn fail(&self, error: CallError) {
        let guard = {
            let mut state = self.lock();
            if !self.check_active(&state) {
                return;
            }
            state.pending = None;
            let guard = self.finish(&mut state, TransportEvent::Error(error));
            state.abort_requested = guard.is_none();
            guard
        };
        if let Some(guard) = guard {
            guard.abort();
        }
    }

    fn is_closed(&self) -> bool {
        self.lock().phase != Phase::Active
    }
}

// =============================================================================
// EventSource
// =============================================================================

type StartFn<T> = dyn Fn(EventSink<T>) -> CallGuard + Send + Sync;

/// A cold description of one call.
///
/// Constructing an `EventSource` has no side effects. Every
/// [`subscribe`](EventSource::subscribe) starts a new, independent
/// underlying call.
pub struct EventSource<T> {
    label: CallLabel,
    start: Arc<StartFn<T>>,
}

impl<T> Clone for EventSource<T> {
    fn clone(&self) -> Self {
        Self {
            label: self.label.clone(),
            start: Arc::clone(&self.start),
        }
    }
}

impl<T> fmt::Debug for EventSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSource")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> EventSource<T> {
    /// `start` is invoked once per subscription with a fresh sink, and
    /// returns the abort hook for the call it started.
    pub fn new(
        label: CallLabel,
        start: impl Fn(EventSink<T>) -> CallGuard + Send + Sync + 'static,
    ) -> Self {
        Self {
            label,
            start: Arc::new(start),
        }
    }

    pub fn label(&self) -> &CallLabel {
        &self.label
    }

    /// Start the call. Never blocks: events arrive on the returned stream.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(CallShared {
            label: self.label.clone(),
            started: Instant::now(),
            state: Mutex::new(CallState {
                phase: Phase::Active,
                pending: None,
                events: Some(tx),
                guard: None,
                abort_requested: false,
            }),
        });

        metrics::counter!(telemetry::CALLS_TOTAL,
            "transport" => self.label.transport.clone(),
            "kind" => self.label.kind.as_str(),
        )
        .increment(1);
        tracing::debug!(
            transport = %self.label.transport,
            kind = %self.label.kind,
            path = %self.label.path,
            "call activated"
        );

        let sink = EventSink::new(Arc::clone(&shared) as Arc<dyn EventTarget<T>>);
        let guard = (self.start)(sink);
        let rejected = {
            // A transport may finish synchronously inside `start`.
            let mut state = shared.lock();
            if state.phase == Phase::Active {
                state.guard = Some(guard);
                None
            } else if state.abort_requested {
                Some(guard)
            } else {
                None
            }
        };
        if let Some(guard) = rejected {
            guard.abort();
        }

        Subscription {
            shared,
            events: UnboundedReceiverStream::new(rx),
            cancelled: false,
        }
    }

    /// Run the call to completion and return its single response with the
    /// trailing metadata. Meant for unary calls; for a stream, the last
    /// response is returned.
    pub async fn response(&self) -> Result<(T, Metadata)> {
        let mut subscription = self.subscribe();
        let mut response = None;

        while let Some(event) = subscription.next().await {
            match event {
                TransportEvent::Data(value) => response = Some(value),
                TransportEvent::Status(status) if status.code.is_ok() => {
                    return response.map(|value| (value, status.metadata)).ok_or_else(|| {
                        ProtolaneError::Transport {
                            code: StatusCode::Internal,
                            message: "call completed without a response".to_string(),
                        }
                    });
                }
                TransportEvent::Status(status) => {
                    return Err(ProtolaneError::Transport {
                        code: status.code,
                        message: status.message,
                    });
                }
                TransportEvent::Error(error) => {
                    return Err(ProtolaneError::Transport {
                        code: error.code,
                        message: error.message,
                    });
                }
            }
        }

        Err(ProtolaneError::Cancelled)
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// One activation of an [`EventSource`]. Dropping it cancels the call.
pub struct Subscription<T> {
    shared: Arc<CallShared<T>>,
    events: UnboundedReceiverStream<TransportEvent<T>>,
    cancelled: bool,
}

impl<T> Subscription<T> {
    /// Cancel the call.
    ///
    /// Requests the transport to abort and guarantees no further event is
    /// yielded, including events already queued. A no-op once the call
    /// has terminated or was cancelled before.
    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        self.shared.cancel();
        self.events.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn label(&self) -> &CallLabel {
        &self.shared.label
    }

    /// Cancel the call if no terminal event arrives within `timeout`, and
    /// yield a terminal `DEADLINE_EXCEEDED` error in that case.
    ///
    /// # Panics
    ///
    /// Requires a tokio runtime context with the timer enabled.
    pub fn with_deadline(self, timeout: Duration) -> Deadline<T> {
        Deadline::new(self, timeout)
    }
}

impl<T: Send + 'static> Subscription<T> {
    /// Drain every remaining event.
    pub async fn collect_events(self) -> Vec<TransportEvent<T>> {
        self.collect().await
    }
}

impl<T> Stream for Subscription<T> {
    type Item = TransportEvent<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.cancelled {
            return Poll::Ready(None);
        }
        this.events.poll_next_unpin(cx)
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("label", &self.shared.label)
            .field("cancelled", &self.cancelled)
            .finish()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if !self.cancelled {
            self.shared.cancel();
        }
    }
}

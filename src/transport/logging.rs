//! Tracing decorators for transports and factories.
//!
//! [`LoggingTransport`] wraps any [`Transport`] and logs each call's start,
//! every event it reports and cancellation, at `info` level under the
//! `protolane::calls` target. Events are logged as the transport reports
//! them, before the call state machine filters anything.

use std::sync::Arc;

use bytes::Bytes;
use tracing::info;

use super::event::{CallError, TransportEvent};
use super::settings::ClientSettings;
use super::source::{CallGuard, EventSink, EventTarget};
use super::{RawCall, Transport, TransportFactory};
use crate::Result;

const TARGET: &str = "protolane::calls";

/// A [`Transport`] that traces everything passing through it.
pub struct LoggingTransport {
    inner: Arc<dyn Transport>,
}

impl LoggingTransport {
    pub fn new(inner: Arc<dyn Transport>) -> Self {
        Self { inner }
    }

    fn start(
        &self,
        call: RawCall,
        sink: EventSink<Bytes>,
        start: impl FnOnce(&dyn Transport, RawCall, EventSink<Bytes>) -> CallGuard,
    ) -> CallGuard {
        info!(
            target: TARGET,
            transport = self.inner.name(),
            path = %call.path,
            request_bytes = call.payload.len(),
            metadata = ?call.metadata,
            "call started"
        );

        let path: Arc<str> = Arc::from(call.path.as_str());
        let logged = EventSink::new(Arc::new(LoggedTarget {
            path: Arc::clone(&path),
            inner: sink,
        }));
        let guard = start(self.inner.as_ref(), call, logged);

        CallGuard::new(move || {
            info!(target: TARGET, path = %path, "call cancelled");
            guard.abort();
        })
    }
}

impl Transport for LoggingTransport {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn start_unary(&self, call: RawCall, sink: EventSink<Bytes>) -> CallGuard {
        self.start(call, sink, |transport, call, sink| {
            transport.start_unary(call, sink)
        })
    }

    fn start_server_stream(&self, call: RawCall, sink: EventSink<Bytes>) -> CallGuard {
        self.start(call, sink, |transport, call, sink| {
            transport.start_server_stream(call, sink)
        })
    }
}

struct LoggedTarget {
    path: Arc<str>,
    inner: EventSink<Bytes>,
}

impl EventTarget<Bytes> for LoggedTarget {
    fn emit(&self, event: TransportEvent<Bytes>) {
        match &event {
            TransportEvent::Data(payload) => {
                info!(target: TARGET, path = %self.path, bytes = payload.len(), "data");
            }
            TransportEvent::Status(status) => {
                info!(
                    target: TARGET,
                    path = %self.path,
                    code = %status.code,
                    message = %status.message,
                    trailers = ?status.metadata,
                    "status"
                );
            }
            TransportEvent::Error(error) => {
                info!(
                    target: TARGET,
                    path = %self.path,
                    code = %error.code,
                    message = %error.message,
                    "error"
                );
            }
        }
        self.inner.emit(event);
    }

    fn fail(&self, error: CallError) {
        info!(target: TARGET, path = %self.path, code = %error.code, "call failed");
        self.inner.fail(error);
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// Wraps every transport a factory creates in a [`LoggingTransport`].
pub struct LoggingFactory {
    inner: Arc<dyn TransportFactory>,
}

impl LoggingFactory {
    pub fn new(inner: Arc<dyn TransportFactory>) -> Self {
        Self { inner }
    }
}

impl TransportFactory for LoggingFactory {
    fn create_transport(
        &self,
        service_id: &str,
        settings: Option<ClientSettings>,
    ) -> Result<Arc<dyn Transport>> {
        let inner = self.inner.create_transport(service_id, settings)?;
        Ok(Arc::new(LoggingTransport::new(inner)))
    }
}

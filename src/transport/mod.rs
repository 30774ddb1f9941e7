//! Transport contract and adapters.
//!
//! Generated clients never talk to an RPC library directly. They build a
//! [`RawCall`] and hand it to a [`Transport`], which starts the call when
//! the resulting [`EventSource`] is subscribed and reports what happens as
//! [`TransportEvent`]s.
//!
//! # Adapters
//!
//! - [`GrpcTransport`] (feature `grpc`): HTTP/2 via tonic.
//! - [`ChannelTransport`]: calls multiplexed over one in-process channel to
//!   a worker task.
//! - [`LoggingTransport`]: decorator that traces every call and event.

mod codec;
pub mod channel;
mod deadline;
mod event;
#[cfg(feature = "grpc")]
pub mod grpc;
mod logging;
mod settings;
mod source;

use std::sync::Arc;

use bytes::Bytes;

pub use channel::{
    ChannelTransport, ChannelTransportFactory, WorkerConnection, WorkerHandler, spawn_worker,
};
pub use codec::{MessageCodec, server_stream_call, unary_call};
pub use deadline::Deadline;
pub use event::{CallError, CallStatus, Metadata, StatusCode, TransportEvent};
#[cfg(feature = "grpc")]
pub use grpc::{GrpcTransport, GrpcTransportFactory};
pub use logging::{LoggingFactory, LoggingTransport};
pub use settings::{ClientSettings, SettingsRegistry};
pub use source::{
    CallGuard, CallKind, CallLabel, EventSink, EventSource, EventTarget, Subscription,
};

use crate::Result;

/// An encoded request on its way to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCall {
    /// `/<package>.<service>/<method>`.
    pub path: String,
    pub payload: Bytes,
    pub metadata: Metadata,
}

/// One RPC mechanism.
///
/// `start_*` is called once per activation, must not block, and reports
/// the call's events to `sink` from wherever the mechanism runs. The
/// returned guard aborts the call. Implementations may share one
/// connection across calls but must route each call's events to its own
/// sink only.
pub trait Transport: Send + Sync {
    /// Short adapter name for logs and metrics (e.g. "grpc").
    fn name(&self) -> &str;

    /// Start a call with one response: `Data` then `Status(OK)`, or a
    /// failure.
    fn start_unary(&self, call: RawCall, sink: EventSink<Bytes>) -> CallGuard;

    /// Start a call with any number of responses before the terminal event.
    fn start_server_stream(&self, call: RawCall, sink: EventSink<Bytes>) -> CallGuard;
}

/// Creates the transport a client uses, given the client's service
/// identifier and call-site settings.
///
/// Implementations resolve settings in this order: call-site settings, the
/// [`SettingsRegistry`] entry for the service, the factory's own default.
/// When none is present they fail with
/// [`ProtolaneError::Configuration`](crate::ProtolaneError::Configuration).
pub trait TransportFactory: Send + Sync {
    fn create_transport(
        &self,
        service_id: &str,
        settings: Option<ClientSettings>,
    ) -> Result<Arc<dyn Transport>>;
}

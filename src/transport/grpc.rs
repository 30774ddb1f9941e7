//! HTTP/2 gRPC transport over tonic.
//!
//! Payloads are already encoded by the caller's [`MessageCodec`], so the
//! tonic client runs with a pass-through bytes codec. One lazily connected
//! [`Channel`] is shared by every call of a transport; each activation runs
//! in its own task, which the call guard aborts on cancellation.
//!
//! [`MessageCodec`]: super::MessageCodec

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use bytes::{Buf, BufMut, Bytes};
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue, KeyAndValueRef, MetadataMap};
use tonic::transport::{Channel, Endpoint};

use super::event::{CallError, CallStatus, Metadata, StatusCode};
use super::settings::{ClientSettings, SettingsRegistry};
use super::source::{CallGuard, EventSink};
use super::{RawCall, Transport, TransportFactory};
use crate::{ProtolaneError, Result};

/// gRPC [`Transport`] for one endpoint.
#[derive(Debug, Clone)]
pub struct GrpcTransport {
    inner: Arc<GrpcInner>,
}

#[derive(Debug)]
struct GrpcInner {
    endpoint: Endpoint,
    channel: OnceLock<Channel>,
}

impl GrpcTransport {
    /// Validate `host` as an endpoint URI. No connection is made until the
    /// first call is activated.
    pub fn new(host: &str) -> Result<Self> {
        let endpoint = Endpoint::from_shared(host.to_string()).map_err(|e| {
            ProtolaneError::Configuration(format!("invalid gRPC endpoint {host:?}: {e}"))
        })?;
        Ok(Self {
            inner: Arc::new(GrpcInner {
                endpoint,
                channel: OnceLock::new(),
            }),
        })
    }

    /// Shared channel, created on first use. Must run inside the runtime.
    fn channel(&self) -> Channel {
        self.inner
            .channel
            .get_or_init(|| self.inner.endpoint.connect_lazy())
            .clone()
    }

    fn spawn<F>(&self, call: RawCall, sink: EventSink<Bytes>, run: F) -> CallGuard
    where
        F: FnOnce(Channel, tonic::Request<Bytes>, PathAndQuery, EventSink<Bytes>) -> BoxedCall
            + Send
            + 'static,
    {
        let path = match PathAndQuery::try_from(call.path.as_str()) {
            Ok(path) => path,
            Err(e) => {
                sink.error(CallError::new(
                    StatusCode::Internal,
                    format!("invalid method path {:?}: {e}", call.path),
                ));
                return CallGuard::noop();
            }
        };

        let metadata = match to_metadata_map(&call.metadata) {
            Ok(metadata) => metadata,
            Err(error) => {
                sink.error(error);
                return CallGuard::noop();
            }
        };

        let mut request = tonic::Request::new(call.payload);
        *request.metadata_mut() = metadata;

        let transport = self.clone();
        let task = tokio::spawn(async move {
            let channel = transport.channel();
            run(channel, request, path, sink).await;
        });
        CallGuard::from_task(&task)
    }
}

type BoxedCall = std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

impl Transport for GrpcTransport {
    fn name(&self) -> &str {
        "grpc"
    }

    fn start_unary(&self, call: RawCall, sink: EventSink<Bytes>) -> CallGuard {
        self.spawn(call, sink, |channel, request, path, sink| {
            Box::pin(async move {
                let mut grpc = tonic::client::Grpc::new(channel);
                if let Err(e) = grpc.ready().await {
                    sink.error(CallError::new(
                        StatusCode::Unavailable,
                        format!("channel not ready: {e}"),
                    ));
                    return;
                }

                match grpc.unary(request, path, BytesCodec).await {
                    Ok(response) => {
                        // tonic merges trailers into the response metadata.
                        let (metadata, payload, _) = response.into_parts();
                        sink.data(payload);
                        sink.status(CallStatus::ok_with(from_metadata_map(&metadata)));
                    }
                    Err(status) => sink.status(from_status(&status)),
                }
            })
        })
    }

    fn start_server_stream(&self, call: RawCall, sink: EventSink<Bytes>) -> CallGuard {
        self.spawn(call, sink, |channel, request, path, sink| {
            Box::pin(async move {
                let mut grpc = tonic::client::Grpc::new(channel);
                if let Err(e) = grpc.ready().await {
                    sink.error(CallError::new(
                        StatusCode::Unavailable,
                        format!("channel not ready: {e}"),
                    ));
                    return;
                }

                let mut stream = match grpc.server_streaming(request, path, BytesCodec).await {
                    Ok(response) => response.into_inner(),
                    Err(status) => {
                        sink.status(from_status(&status));
                        return;
                    }
                };

                loop {
                    match stream.message().await {
                        Ok(Some(payload)) => {
                            if sink.is_closed() {
                                return;
                            }
                            sink.data(payload);
                        }
                        Ok(None) => break,
                        Err(status) => {
                            sink.status(from_status(&status));
                            return;
                        }
                    }
                }

                match stream.trailers().await {
                    Ok(trailers) => sink.status(CallStatus::ok_with(
                        trailers.as_ref().map(from_metadata_map).unwrap_or_default(),
                    )),
                    Err(status) => sink.status(from_status(&status)),
                }
            })
        })
    }
}

fn from_status(status: &tonic::Status) -> CallStatus {
    CallStatus::new(
        StatusCode::from_i32(status.code() as i32),
        status.message(),
        from_metadata_map(status.metadata()),
    )
}

/// ASCII entries only; binary (`-bin`) metadata has no string form.
fn from_metadata_map(map: &MetadataMap) -> Metadata {
    map.iter()
        .filter_map(|entry| match entry {
            KeyAndValueRef::Ascii(key, value) => value
                .to_str()
                .ok()
                .map(|value| (key.as_str().to_string(), value.to_string())),
            KeyAndValueRef::Binary(..) => None,
        })
        .collect()
}

fn to_metadata_map(metadata: &Metadata) -> std::result::Result<MetadataMap, CallError> {
    let mut map = MetadataMap::new();
    for (key, value) in metadata.iter() {
        let invalid = |what: &str| {
            CallError::new(
                StatusCode::Internal,
                format!("invalid metadata {what} for key {key:?}"),
            )
        };
        let key = AsciiMetadataKey::from_bytes(key.as_bytes()).map_err(|_| invalid("key"))?;
        let value = AsciiMetadataValue::try_from(value).map_err(|_| invalid("value"))?;
        map.insert(key, value);
    }
    Ok(map)
}

/// Pass-through codec: messages are encoded before reaching the transport.
#[derive(Debug, Clone, Copy, Default)]
struct BytesCodec;

impl Codec for BytesCodec {
    type Encode = Bytes;
    type Decode = Bytes;
    type Encoder = BytesCodec;
    type Decoder = BytesCodec;

    fn encoder(&mut self) -> Self::Encoder {
        BytesCodec
    }

    fn decoder(&mut self) -> Self::Decoder {
        BytesCodec
    }
}

impl Encoder for BytesCodec {
    type Item = Bytes;
    type Error = tonic::Status;

    fn encode(
        &mut self,
        item: Self::Item,
        dst: &mut EncodeBuf<'_>,
    ) -> std::result::Result<(), Self::Error> {
        dst.put(item);
        Ok(())
    }
}

impl Decoder for BytesCodec {
    type Item = Bytes;
    type Error = tonic::Status;

    fn decode(
        &mut self,
        src: &mut DecodeBuf<'_>,
    ) -> std::result::Result<Option<Self::Item>, Self::Error> {
        let len = src.remaining();
        Ok(Some(src.copy_to_bytes(len)))
    }
}

/// Creates [`GrpcTransport`]s, one per distinct host, shared between
/// clients.
#[derive(Debug, Clone)]
pub struct GrpcTransportFactory {
    registry: SettingsRegistry,
    default: Option<ClientSettings>,
    transports: Arc<Mutex<HashMap<String, GrpcTransport>>>,
}

impl Default for GrpcTransportFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl GrpcTransportFactory {
    /// Consults the global [`SettingsRegistry`] and has no default.
    pub fn new() -> Self {
        Self {
            registry: SettingsRegistry::global().clone(),
            default: None,
            transports: Arc::default(),
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

impl TransportFactory for GrpcTransportFactory {
    fn create_transport(
        &self,
        service_id: &str,
        settings: Option<ClientSettings>,
    ) -> Result<Arc<dyn Transport>> {
        let settings = self
            .registry
            .resolve(service_id, settings, self.default.as_ref())?;

        let mut transports = self
            .transports
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = transports.get(&settings.host) {
            return Ok(Arc::new(existing.clone()));
        }

        let transport = GrpcTransport::new(&settings.host)?;
        tracing::debug!(service = %service_id, host = %settings.host, "created gRPC transport");
        transports.insert(settings.host, transport.clone());
        Ok(Arc::new(transport))
    }
}

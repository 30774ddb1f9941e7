//! Typed call entry points over the byte-level [`Transport`].

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use super::event::Metadata;
use super::source::{CallKind, CallLabel, EventSource};
use super::{RawCall, Transport};
use crate::{ProtolaneError, Result};

/// Request encoder and response decoder for one method.
pub struct MessageCodec<Req, Resp> {
    encode: fn(&Req) -> Bytes,
    decode: fn(&[u8]) -> Result<Resp>,
}

impl<Req, Resp> Clone for MessageCodec<Req, Resp> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Req, Resp> Copy for MessageCodec<Req, Resp> {}

impl<Req, Resp> fmt::Debug for MessageCodec<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageCodec").finish_non_exhaustive()
    }
}

impl<Req, Resp> MessageCodec<Req, Resp> {
    pub fn new(encode: fn(&Req) -> Bytes, decode: fn(&[u8]) -> Result<Resp>) -> Self {
        Self { encode, decode }
    }

    pub fn encode(&self, request: &Req) -> Bytes {
        (self.encode)(request)
    }

    pub fn decode(&self, payload: &[u8]) -> Result<Resp> {
        (self.decode)(payload)
    }
}

impl<Req, Resp> MessageCodec<Req, Resp>
where
    Req: prost::Message,
    Resp: prost::Message + Default,
{
    /// Protobuf binary encoding.
    pub fn prost() -> Self {
        Self::new(encode_message::<Req>, decode_message::<Resp>)
    }
}

fn encode_message<M: prost::Message>(message: &M) -> Bytes {
    Bytes::from(message.encode_to_vec())
}

fn decode_message<M: prost::Message + Default>(payload: &[u8]) -> Result<M> {
    M::decode(payload).map_err(|e| ProtolaneError::Decode(e.to_string()))
}

/// Describe a unary call. Nothing is sent until the source is subscribed.
pub fn unary_call<Req, Resp: Send + 'static>(
    transport: Arc<dyn Transport>,
    path: impl Into<String>,
    request: &Req,
    metadata: Metadata,
    codec: MessageCodec<Req, Resp>,
) -> EventSource<Resp> {
    call(transport, CallKind::Unary, path.into(), request, metadata, codec)
}

/// Describe a server-streaming call. Nothing is sent until the source is
/// subscribed.
pub fn server_stream_call<Req, Resp: Send + 'static>(
    transport: Arc<dyn Transport>,
    path: impl Into<String>,
    request: &Req,
    metadata: Metadata,
    codec: MessageCodec<Req, Resp>,
) -> EventSource<Resp> {
    call(
        transport,
        CallKind::ServerStream,
        path.into(),
        request,
        metadata,
        codec,
    )
}

fn call<Req, Resp: Send + 'static>(
    transport: Arc<dyn Transport>,
    kind: CallKind,
    path: String,
    request: &Req,
    metadata: Metadata,
    codec: MessageCodec<Req, Resp>,
) -> EventSource<Resp> {
    let label = CallLabel {
        transport: transport.name().to_string(),
        kind,
        path: path.clone(),
    };
    let raw = RawCall {
        path,
        payload: codec.encode(request),
        metadata,
    };
    let decode = codec.decode;

    EventSource::new(label, move |sink| {
        let sink = sink.decoding(decode);
        match kind {
            CallKind::Unary => transport.start_unary(raw.clone(), sink),
            CallKind::ServerStream => transport.start_server_stream(raw.clone(), sink),
        }
    })
}

//! [`ServiceClient`]: typed calls over a [`Transport`].

use std::fmt;
use std::sync::Arc;

use crate::Result;
use crate::transport::{
    ClientSettings, EventSource, MessageCodec, Metadata, Transport, TransportFactory,
    server_stream_call, unary_call,
};

/// Transport handle for one service.
///
/// Cloning is cheap and shares the transport.
#[derive(Clone)]
pub struct ServiceClient {
    service_id: String,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceClient")
            .field("service_id", &self.service_id)
            .field("transport", &self.transport.name())
            .finish()
    }
}

impl ServiceClient {
    /// Ask `factory` for a transport. Settings come from `settings` when
    /// given, then from the registry entry for `service_id`, then from the
    /// factory default.
    pub fn new(
        service_id: impl Into<String>,
        settings: Option<ClientSettings>,
        factory: &dyn TransportFactory,
    ) -> Result<Self> {
        let service_id = service_id.into();
        let transport = factory.create_transport(&service_id, settings)?;
        tracing::debug!(service = %service_id, transport = transport.name(), "created client");
        Ok(Self {
            service_id,
            transport,
        })
    }

    pub fn with_transport(service_id: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            service_id: service_id.into(),
            transport,
        }
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Describe a unary call to `path`. The request is encoded now; nothing
    /// is sent until the source is subscribed.
    pub fn unary<Req, Resp>(
        &self,
        path: &str,
        request: &Req,
        metadata: Option<Metadata>,
    ) -> EventSource<Resp>
    where
        Req: prost::Message,
        Resp: prost::Message + Default + Send + 'static,
    {
        unary_call(
            Arc::clone(&self.transport),
            path,
            request,
            metadata.unwrap_or_default(),
            MessageCodec::prost(),
        )
    }

    /// Describe a server-streaming call to `path`.
    pub fn server_stream<Req, Resp>(
        &self,
        path: &str,
        request: &Req,
        metadata: Option<Metadata>,
    ) -> EventSource<Resp>
    where
        Req: prost::Message,
        Resp: prost::Message + Default + Send + 'static,
    {
        server_stream_call(
            Arc::clone(&self.transport),
            path,
            request,
            metadata.unwrap_or_default(),
            MessageCodec::prost(),
        )
    }
}

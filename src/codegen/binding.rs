//! Method bindings: what the generated client does per RPC.

use std::fmt;

use crate::resolve::{Scope, TypeResolver};
use crate::schema::{FileId, MessageId, MethodCardinality, ServiceDescriptor, TypeHandle, qualify};
use crate::{ProtolaneError, Result};

/// How a generated method issues its call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallStyle {
    /// Through `unary_call`.
    Unary,
    /// Through `server_stream_call`.
    ServerStream,
    /// Client-streaming and bidi methods need a duplex call the transport
    /// contract does not offer. Reported, not bound.
    Unsupported,
}

impl CallStyle {
    pub fn for_cardinality(cardinality: MethodCardinality) -> Self {
        match cardinality {
            MethodCardinality::Unary => CallStyle::Unary,
            MethodCardinality::ServerStreaming => CallStyle::ServerStream,
            MethodCardinality::ClientStreaming | MethodCardinality::BidiStreaming => {
                CallStyle::Unsupported
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallStyle::Unary => "unary_call",
            CallStyle::ServerStream => "server_stream_call",
            CallStyle::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for CallStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a client finds its settings: the call-site value, then the
/// registry entry stored under `registry_key`, then the factory default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsRule {
    pub registry_key: String,
}

/// One RPC of a generated client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodBinding {
    pub name: String,
    /// `/<package>.<service>/<method>`.
    pub path: String,
    pub request: MessageId,
    pub response: MessageId,
    pub cardinality: MethodCardinality,
    pub call: CallStyle,
    pub settings: SettingsRule,
}

/// All bindings of one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceBinding {
    /// `<package>.<service>`, also the settings registry key.
    pub service_id: String,
    pub name: String,
    pub file: FileId,
    pub methods: Vec<MethodBinding>,
}

/// Resolve a service's request/response types and derive its bindings.
pub fn bind_service(
    resolver: &TypeResolver<'_>,
    file: FileId,
    service: &ServiceDescriptor,
) -> Result<ServiceBinding> {
    let schema = resolver.schema();
    let scope = Scope::of_file(schema, file);
    let service_id = qualify(&schema.file(file).package, &service.name);

    let message = |reference: &str, method: &str, role: &str| -> Result<MessageId> {
        match resolver.resolve(reference, &scope)? {
            TypeHandle::Message(id) => Ok(id),
            TypeHandle::Enum(id) => Err(ProtolaneError::InvalidSchema(format!(
                "{role} type of {service_id}.{method} is the enum {}",
                schema.enum_type(id).full_name
            ))),
        }
    };

    let methods = service
        .methods
        .iter()
        .map(|method| {
            Ok(MethodBinding {
                path: format!("/{service_id}/{}", method.name),
                request: message(&method.input_type, &method.name, "request")?,
                response: message(&method.output_type, &method.name, "response")?,
                cardinality: method.cardinality,
                call: CallStyle::for_cardinality(method.cardinality),
                settings: SettingsRule {
                    registry_key: service_id.clone(),
                },
                name: method.name.clone(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ServiceBinding {
        name: service.name.clone(),
        file,
        methods,
        service_id,
    })
}

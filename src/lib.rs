//! Protolane - typed RPC clients from protobuf schemas
//!
//! This crate reads protobuf schema declarations, resolves the type
//! references between them, classifies every field into a plain data
//! shape, and generates Rust client code whose methods return cold,
//! cancellable event streams. The same crate is the runtime those clients
//! link against: the transport contract, its adapters, and the keyed
//! representation of messages.
//!
//! # Generating
//!
//! ```rust,no_run
//! use protolane::{Generator, GeneratorOptions, SchemaSet};
//!
//! fn main() -> protolane::Result<()> {
//!     let bytes = std::fs::read("descriptors.pb")?;
//!     let schema = SchemaSet::from_descriptor_bytes(&bytes)?;
//!     let output = Generator::new(GeneratorOptions::default()).generate(&schema)?;
//!     for file in &output.files {
//!         std::fs::write(&file.name, &file.source)?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Calling
//!
//! ```rust,ignore
//! use protolane::{ClientSettings, GrpcTransportFactory, TransportEvent};
//! use futures_util::StreamExt;
//!
//! let factory = GrpcTransportFactory::new();
//! let client = echo::EchoServiceClient::new(
//!     Some(ClientSettings::new("http://localhost:8080")),
//!     &factory,
//! )?;
//!
//! // Nothing is sent until the source is subscribed.
//! let source = client.echo(&echo::EchoRequest { text: "hi".into() }, None);
//! let mut events = source.subscribe();
//! while let Some(event) = events.next().await {
//!     match event {
//!         TransportEvent::Data(reply) => println!("{}", reply.text),
//!         TransportEvent::Status(status) => println!("done: {}", status.code),
//!         TransportEvent::Error(error) => eprintln!("failed: {}", error.message),
//!     }
//! }
//! ```

pub mod classify;
pub mod client;
pub mod codegen;
pub mod config;
pub mod error;
pub mod keyed;
pub mod resolve;
pub mod schema;
pub mod telemetry;
pub mod transport;

/// Package version from Cargo.toml.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export main types at crate root
pub use classify::{DataType, FieldClassifier, FieldShape, MapKey};
pub use client::ServiceClient;
pub use codegen::{GenerationOutput, Generator, GeneratorOptions};
pub use config::{Config, TransportKind};
pub use error::{ProtolaneError, Result};
pub use keyed::Keyed;
pub use resolve::{Scope, TypeResolver};
pub use schema::{FileId, MessageId, SchemaSet, TypeHandle};

// Re-export the runtime surface generated code refers to
pub use transport::{
    CallError, CallStatus, ChannelTransport, ChannelTransportFactory, ClientSettings, EventSource,
    Metadata, SettingsRegistry, StatusCode, Subscription, Transport, TransportEvent,
    TransportFactory,
};
#[cfg(feature = "grpc")]
pub use transport::{GrpcTransport, GrpcTransportFactory};

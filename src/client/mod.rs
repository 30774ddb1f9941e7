//! Runtime side of generated clients.
//!
//! Every generated `<Service>Client` wraps a [`ServiceClient`], which owns
//! the service's transport and turns typed requests into cold
//! [`EventSource`](crate::transport::EventSource)s.

mod service_client;

pub use service_client::ServiceClient;

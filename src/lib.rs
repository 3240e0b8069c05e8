//! # Plexus
//!
//! Multiplexed-transport core of an HTTP client.
//!
//! Plexus provides the pieces of an HTTP client that sit directly on top of
//! the byte stream:
//!
//! - [`HeaderParser`]: incremental HTTP/1.x status line and header parsing
//! - [`WindowUpdateSender`]: HTTP/2 receive credit, safe under concurrent callers
//! - [`ConnectionRegistry`]: one shared connection per origin, established once
//! - [`PushGroup`]: completion of a response together with its server pushes
//!
//! TLS, DNS, proxies and request building live elsewhere; the registry only
//! sees them through the [`Connector`] trait.

pub mod completion;
pub mod config;
pub mod error;
pub mod headers;

// Transport layer
pub mod transport;

// Connection pooling
pub mod pool;

// Re-exports
pub use completion::Completion;
pub use config::TransportConfig;
pub use error::{Error, Result};
pub use headers::ResponseHeaders;
pub use pool::{ConnectionRegistry, RegistryStats};
pub use transport::connector::{Connection, ConnectionKey, Connector, TransportKind};
pub use transport::h1::{read_response_head, HeaderParser, ResponseHead};
pub use transport::h2::{
    CreditSink, PushGroup, PushPromise, PushPromiseHandler, PushedResponse, WindowUpdateFrame,
    WindowUpdateSender,
};

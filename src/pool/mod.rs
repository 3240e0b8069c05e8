//! Connection pooling for HTTP/2 multiplexing.
//!
//! One connection per origin, established at most once at a time. See
//! [`multiplexer`] for the single-flight rules.

pub mod multiplexer;

pub use multiplexer::{ConnectionRegistry, RegistryStats};

//! Error types for plexus crate.

use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the transport core.
///
/// Errors are `Clone`: a single establishment failure is delivered to every
/// caller waiting on the same key, and a push failure to every consumer of
/// the group outcome.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// HTTP protocol error (malformed status line, unexpected byte, ...).
    #[error("HTTP protocol error: {0}")]
    HttpProtocol(String),

    /// Header block exceeded the configured size limit.
    #[error("Response headers too large (limit {limit} bytes)")]
    HeadersTooLarge { limit: usize },

    /// ALPN did not select h2. Callers should fall back to another path.
    #[error("ALPN negotiation fallback: {0}")]
    AlpnFallback(String),

    /// Flow-control violation (peer exceeded the advertised window).
    #[error("FLOW_CONTROL_ERROR: {0}")]
    FlowControl(String),

    /// Connection establishment or connection state error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Connect timeout (TCP + TLS handshake + protocol negotiation).
    #[error("Connect timeout after {0:?}")]
    ConnectTimeout(Duration),

    /// The connection registry has been shut down.
    #[error("Connection registry is shut down")]
    RegistryClosed,

    /// A pushed response failed.
    #[error("Push error: {0}")]
    Push(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(Arc<io::Error>),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl Error {
    /// Create an HTTP protocol error.
    pub fn http_protocol(message: impl Into<String>) -> Self {
        Self::HttpProtocol(message.into())
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create an ALPN fallback signal.
    pub fn alpn_fallback(message: impl Into<String>) -> Self {
        Self::AlpnFallback(message.into())
    }

    /// Create a flow-control error.
    pub fn flow_control(message: impl Into<String>) -> Self {
        Self::FlowControl(message.into())
    }

    /// Create a push error.
    pub fn push(message: impl Into<String>) -> Self {
        Self::Push(message.into())
    }

    /// Whether this is the recoverable "h2 not negotiated, use another path" signal.
    pub fn is_alpn_fallback(&self) -> bool {
        matches!(self, Self::AlpnFallback(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alpn_fallback_classification() {
        assert!(Error::alpn_fallback("HTTP/1.1 ALPN returned").is_alpn_fallback());
        assert!(!Error::connection("refused").is_alpn_fallback());
        assert!(!Error::ConnectTimeout(Duration::from_secs(1)).is_alpn_fallback());
    }

    #[test]
    fn test_io_error_is_cloneable() {
        let err: Error = io::Error::new(io::ErrorKind::ConnectionReset, "reset").into();
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
        assert!(copy.to_string().contains("reset"));
    }
}

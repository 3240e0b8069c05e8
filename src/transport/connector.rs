//! Transport capability traits.
//!
//! The registry never deals with sockets directly. It asks a [`Connector`] to
//! establish a [`Connection`] for a [`ConnectionKey`] and then only needs to
//! probe liveness and close it. Plain TCP, TLS and proxy tunnels are the same
//! interface, told apart by [`TransportKind`].

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;

use http::uri::Scheme;
use http::Uri;

use crate::error::{Error, Result};

/// Kind of transport underneath a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Cleartext TCP.
    Plain,
    /// TLS over TCP.
    Tls,
    /// CONNECT tunnel through a proxy.
    Tunnel,
}

/// Identity of a shareable connection.
///
/// Two requests with equal keys share one multiplexed connection.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub enum ConnectionKey {
    /// Direct connection to an origin.
    Origin {
        scheme: Scheme,
        host: String,
        port: u16,
    },
    /// Connection through a proxy.
    Tunnel { proxy: SocketAddr },
}

impl ConnectionKey {
    /// Create an origin key.
    pub fn origin(scheme: Scheme, host: impl Into<String>, port: u16) -> Self {
        Self::Origin {
            scheme,
            host: host.into().to_ascii_lowercase(),
            port,
        }
    }

    /// Create a proxy tunnel key.
    pub fn tunnel(proxy: SocketAddr) -> Self {
        Self::Tunnel { proxy }
    }

    /// Derive an origin key from a request URI, applying default ports.
    pub fn from_uri(uri: &Uri) -> Result<Self> {
        let scheme = uri
            .scheme()
            .cloned()
            .ok_or_else(|| Error::connection(format!("URI has no scheme: {}", uri)))?;
        let host = uri
            .host()
            .ok_or_else(|| Error::connection(format!("URI has no host: {}", uri)))?;
        let port = match uri.port_u16() {
            Some(port) => port,
            None if scheme == Scheme::HTTPS => 443,
            None if scheme == Scheme::HTTP => 80,
            None => {
                return Err(Error::connection(format!(
                    "No default port for scheme {}",
                    scheme
                )))
            }
        };
        Ok(Self::origin(scheme, host, port))
    }

    /// Whether the key refers to a TLS origin.
    pub fn is_secure(&self) -> bool {
        matches!(self, Self::Origin { scheme, .. } if *scheme == Scheme::HTTPS)
    }

    pub fn transport_kind(&self) -> TransportKind {
        match self {
            Self::Tunnel { .. } => TransportKind::Tunnel,
            _ if self.is_secure() => TransportKind::Tls,
            _ => TransportKind::Plain,
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Origin { scheme, host, port } => write!(f, "{}:{}:{}", scheme, host, port),
            Self::Tunnel { proxy } => write!(f, "proxy:{}", proxy),
        }
    }
}

/// A live, shareable connection.
pub trait Connection: Send + Sync + 'static {
    /// Key the connection was established for.
    fn key(&self) -> &ConnectionKey;

    fn kind(&self) -> TransportKind;

    /// Whether new streams can still be opened on this connection.
    fn is_open(&self) -> bool;

    /// Close the connection. Must not block on the peer.
    fn close(&self) -> Result<()>;
}

/// Establishes connections for keys.
///
/// A connector that completes the handshake but does not negotiate h2 must
/// fail with [`Error::AlpnFallback`] so callers can take another path.
pub trait Connector: Send + Sync + 'static {
    type Connection: Connection;

    fn connect(
        &self,
        key: &ConnectionKey,
    ) -> impl Future<Output = Result<Self::Connection>> + Send;
}

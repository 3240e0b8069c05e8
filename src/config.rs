//! Transport configuration.
//!
//! Collects the knobs the transport core reads at construction time:
//!
//! - **connect_timeout**: deadline for one connection establishment attempt
//! - **max_header_bytes**: upper bound on a single HTTP/1.x header block
//! - **initial_window_size** / **max_frame_size**: negotiated HTTP/2 values
//!   that determine when receive credit is handed back to the peer
//! - **enable_push**: whether server push promises are accepted at all
//!
//! # Usage
//!
//! ```rust
//! use plexus::TransportConfig;
//! use std::time::Duration;
//!
//! let config = TransportConfig::new()
//!     .with_connect_timeout(Some(Duration::from_secs(5)))
//!     .with_initial_window_size(1 << 20)
//!     .with_enable_push(false);
//! assert_eq!(config.initial_window_size, 1 << 20);
//! ```

use std::time::Duration;

use crate::transport::h2::frame::{DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE};

/// Default maximum response header size (64KB).
pub const DEFAULT_MAX_HEADER_BYTES: usize = 64 * 1024;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the transport core.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Deadline for a single establishment attempt (TCP + TLS + ALPN).
    ///
    /// When the deadline passes every caller waiting on that key receives
    /// `Error::ConnectTimeout`. `None` disables the deadline.
    ///
    /// Default: 10s
    pub connect_timeout: Option<Duration>,

    /// Maximum number of bytes accepted for one header block, status line included.
    ///
    /// Default: 64KB
    pub max_header_bytes: usize,

    /// Initial flow-control window size advertised to the peer.
    ///
    /// Default: 65535 (RFC 9113)
    pub initial_window_size: u32,

    /// Maximum frame size negotiated with the peer.
    ///
    /// Default: 16384 (RFC 9113)
    pub max_frame_size: u32,

    /// Accept server push promises.
    ///
    /// Default: true
    pub enable_push: bool,
}

impl TransportConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the header block size limit.
    pub fn with_max_header_bytes(mut self, limit: usize) -> Self {
        self.max_header_bytes = limit;
        self
    }

    /// Set the initial window size.
    pub fn with_initial_window_size(mut self, size: u32) -> Self {
        self.initial_window_size = size;
        self
    }

    /// Set the maximum frame size.
    pub fn with_max_frame_size(mut self, size: u32) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Enable or disable server push.
    pub fn with_enable_push(mut self, enable: bool) -> Self {
        self.enable_push = enable;
        self
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            enable_push: true,
        }
    }
}

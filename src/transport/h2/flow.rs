//! Receive-side flow-control credit (RFC 9113 Section 6.9).
//!
//! A [`WindowUpdateSender`] accumulates the number of bytes the application
//! has consumed on a stream (or on the whole connection) and hands that credit
//! back to the peer in batches. Credit is returned once the accumulated amount
//! crosses a threshold derived from the initial window and the frame size, so
//! the peer never stalls on an exhausted window and we do not send a
//! WINDOW_UPDATE per DATA frame.
//!
//! `update` may be called concurrently from any number of tasks. The counter
//! is atomic; only the compare-and-flush step runs under a lock, and nothing
//! is awaited while it is held.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::transport::h2::frame::{WindowUpdateFrame, MAX_WINDOW_INCREMENT};

/// Destination for credit-replenishment frames.
///
/// The framing layer owns the write half of the connection; implementations
/// must not block.
pub trait CreditSink: Send + Sync {
    fn send_window_update(&self, frame: WindowUpdateFrame);
}

impl CreditSink for mpsc::UnboundedSender<WindowUpdateFrame> {
    fn send_window_update(&self, frame: WindowUpdateFrame) {
        if self.send(frame).is_err() {
            tracing::debug!(
                "WINDOW_UPDATE for stream {} dropped: writer is gone",
                frame.stream_id
            );
        }
    }
}

impl<S: CreditSink + ?Sized> CreditSink for Arc<S> {
    fn send_window_update(&self, frame: WindowUpdateFrame) {
        (**self).send_window_update(frame)
    }
}

/// Compute the credit threshold for a window.
///
/// `min(max(0, window - frame), round_up(window, frame) / 2)`: at most half
/// the window, and always leaving room for one more full frame.
pub fn credit_limit(max_frame_size: u32, initial_window_size: u32) -> u64 {
    let window = u64::from(initial_window_size);
    let frame = u64::from(max_frame_size.max(1));
    let v0 = window.saturating_sub(frame);
    let v1 = window.div_ceil(frame) * frame / 2;
    v0.min(v1)
}

/// Per-stream or per-connection receive credit tracker.
pub struct WindowUpdateSender<S> {
    stream_id: u32,
    limit: u64,
    window_size: u64,
    /// Bytes consumed but not yet credited back.
    received: AtomicU64,
    /// Bytes the peer has sent that have not been credited back yet.
    outstanding: AtomicU64,
    closed: AtomicBool,
    flush_lock: Mutex<()>,
    sink: S,
}

impl<S: CreditSink> WindowUpdateSender<S> {
    /// Create a tracker for `stream_id` (0 is the connection).
    pub fn new(stream_id: u32, max_frame_size: u32, initial_window_size: u32, sink: S) -> Self {
        let limit = credit_limit(max_frame_size, initial_window_size);
        tracing::trace!(
            "WindowUpdateSender for stream {}: window {}, frame {}, limit {}",
            stream_id,
            initial_window_size,
            max_frame_size,
            limit
        );
        Self {
            stream_id,
            limit,
            window_size: u64::from(initial_window_size),
            received: AtomicU64::new(0),
            outstanding: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            flush_lock: Mutex::new(()),
            sink,
        }
    }

    /// Connection-level tracker using the negotiated values in `config`.
    pub fn for_connection(config: &TransportConfig, sink: S) -> Self {
        Self::new(0, config.max_frame_size, config.initial_window_size, sink)
    }

    /// Stream-level tracker using the negotiated values in `config`.
    pub fn for_stream(stream_id: u32, config: &TransportConfig, sink: S) -> Self {
        Self::new(stream_id, config.max_frame_size, config.initial_window_size, sink)
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Threshold above which accumulated credit is flushed.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Credit accumulated but not yet sent.
    pub fn pending(&self) -> u64 {
        self.received.load(Ordering::Acquire)
    }

    /// Account for a DATA payload of `len` bytes arriving from the peer.
    ///
    /// Fails with a flow-control error if the peer has sent more than the
    /// window allows without waiting for credit.
    pub fn on_data_received(&self, len: u32) -> Result<()> {
        let total = self
            .outstanding
            .fetch_add(u64::from(len), Ordering::AcqRel)
            + u64::from(len);
        if total > self.window_size {
            tracing::warn!(
                "Stream {} window exceeded ({} > {})",
                self.stream_id,
                total,
                self.window_size
            );
            return Err(Error::flow_control(format!(
                "stream {} window exceeded ({} > {})",
                self.stream_id, total, self.window_size
            )));
        }
        Ok(())
    }

    /// Record that `delta` received bytes have been consumed.
    ///
    /// Emits one WINDOW_UPDATE once the accumulated amount exceeds the
    /// limit. Never blocks beyond the short flush section.
    pub fn update(&self, delta: u32) {
        if delta == 0 || self.closed.load(Ordering::Acquire) {
            return;
        }

        let total = self.received.fetch_add(u64::from(delta), Ordering::AcqRel) + u64::from(delta);
        if total <= self.limit {
            return;
        }

        let _guard = self
            .flush_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // Another caller may have flushed while we waited for the lock.
        // Credit above the largest legal increment goes out in several frames.
        loop {
            let to_send = self.received.load(Ordering::Acquire);
            if to_send <= self.limit || self.closed.load(Ordering::Acquire) {
                return;
            }

            let increment = to_send.min(u64::from(MAX_WINDOW_INCREMENT));
            self.received.fetch_sub(increment, Ordering::AcqRel);
            let _ = self
                .outstanding
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                    Some(v.saturating_sub(increment))
                });

            // increment <= MAX_WINDOW_INCREMENT, so the cast is lossless
            let frame = WindowUpdateFrame::new(self.stream_id, increment as u32);
            tracing::trace!("Sending WINDOW_UPDATE stream={} increment={}", self.stream_id, increment);
            self.sink.send_window_update(frame);
        }
    }

    /// Stop emitting credit. Used when the stream has ended.
    pub fn close(&self) {
        let _guard = self
            .flush_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl<S> std::fmt::Debug for WindowUpdateSender<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowUpdateSender")
            .field("stream_id", &self.stream_id)
            .field("limit", &self.limit)
            .field("received", &self.received.load(Ordering::Relaxed))
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

//! HTTP/2 WINDOW_UPDATE framing (RFC 9113 Section 6.9).
//!
//! The credit tracker only produces window increments; this module turns them
//! into wire frames and writes them out.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Frame header size (9 bytes per RFC 9113).
pub const FRAME_HEADER_SIZE: usize = 9;

/// Default maximum frame size (16KB per RFC 9113).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16384;

/// Initial window size per RFC 9113.
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65535;

/// Largest legal window increment (2^31 - 1).
pub const MAX_WINDOW_INCREMENT: u32 = 0x7fff_ffff;

/// Stream identifiers are 31 bits; the high bit is reserved.
const STREAM_ID_MASK: u32 = 0x7fff_ffff;

/// WINDOW_UPDATE frame type identifier.
const FRAME_TYPE_WINDOW_UPDATE: u8 = 0x8;

/// WINDOW_UPDATE frame: grants the peer `increment` more bytes on `stream_id`
/// (0 for the connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowUpdateFrame {
    pub stream_id: u32,
    pub increment: u32,
}

impl WindowUpdateFrame {
    /// Create a new WINDOW_UPDATE frame.
    pub fn new(stream_id: u32, increment: u32) -> Self {
        Self { stream_id, increment }
    }

    /// Serialize to bytes (including frame header).
    pub fn serialize(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 4);

        // Length (24 bits), always 4
        buf.put_u8(0);
        buf.put_u8(0);
        buf.put_u8(4);
        buf.put_u8(FRAME_TYPE_WINDOW_UPDATE);
        // No flags defined for WINDOW_UPDATE
        buf.put_u8(0);
        // Stream ID (31 bits, high bit reserved)
        buf.put_u32(self.stream_id & STREAM_ID_MASK);
        // Window size increment (31 bits, high bit reserved)
        buf.put_u32(self.increment & MAX_WINDOW_INCREMENT);

        buf
    }

    /// Parse a complete frame (header + payload).
    ///
    /// Per RFC 9113 Section 6.9, an increment of 0 is a FLOW_CONTROL_ERROR.
    pub fn parse(mut frame: Bytes) -> Result<Self> {
        if frame.len() != FRAME_HEADER_SIZE + 4 {
            return Err(Error::http_protocol(format!(
                "FRAME_SIZE_ERROR: WINDOW_UPDATE must be {} bytes, got {}",
                FRAME_HEADER_SIZE + 4,
                frame.len()
            )));
        }

        let length = (u32::from(frame.get_u8()) << 16)
            | (u32::from(frame.get_u8()) << 8)
            | u32::from(frame.get_u8());
        let frame_type = frame.get_u8();
        let _flags = frame.get_u8();
        if frame_type != FRAME_TYPE_WINDOW_UPDATE || length != 4 {
            return Err(Error::http_protocol(format!(
                "Not a WINDOW_UPDATE frame (type {:#x}, length {})",
                frame_type, length
            )));
        }

        let stream_id = frame.get_u32() & STREAM_ID_MASK;
        let increment = frame.get_u32() & MAX_WINDOW_INCREMENT;
        if increment == 0 {
            return Err(Error::flow_control("WINDOW_UPDATE increment must be > 0"));
        }

        Ok(Self { stream_id, increment })
    }
}

/// Drain queued WINDOW_UPDATE frames onto `writer` until the channel closes.
///
/// Returns the number of frames written.
pub async fn write_window_updates<W>(
    mut rx: mpsc::UnboundedReceiver<WindowUpdateFrame>,
    writer: &mut W,
) -> Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while let Some(frame) = rx.recv().await {
        writer.write_all(&frame.serialize()).await?;
        // Drain whatever else is already queued before flushing
        while let Ok(frame) = rx.try_recv() {
            writer.write_all(&frame.serialize()).await?;
            written += 1;
        }
        writer.flush().await?;
        written += 1;
        tracing::trace!("Flushed WINDOW_UPDATE frames (total {})", written);
    }
    Ok(written)
}

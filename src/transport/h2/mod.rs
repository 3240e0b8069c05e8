//! HTTP/2 receive-side machinery.
//!
//! - **flow**: batches consumed-byte credit into WINDOW_UPDATE frames
//! - **frame**: WINDOW_UPDATE wire format and writer
//! - **push**: aggregates a primary response with its server pushes
//!
//! ## Usage
//!
//! ```
//! use plexus::transport::h2::{WindowUpdateFrame, WindowUpdateSender};
//! use plexus::TransportConfig;
//! use tokio::sync::mpsc;
//!
//! let (tx, mut rx) = mpsc::unbounded_channel::<WindowUpdateFrame>();
//! let conn_credit = WindowUpdateSender::for_connection(&TransportConfig::default(), tx);
//!
//! // The application consumed two 20KB DATA payloads
//! conn_credit.update(20_000);
//! conn_credit.update(20_000);
//!
//! assert_eq!(rx.try_recv().unwrap(), WindowUpdateFrame::new(0, 40_000));
//! ```

pub mod flow;
pub mod frame;
pub mod push;

pub use flow::{credit_limit, CreditSink, WindowUpdateSender};
pub use frame::{
    write_window_updates, WindowUpdateFrame, DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE,
    FRAME_HEADER_SIZE, MAX_WINDOW_INCREMENT,
};
pub use push::{PushGroup, PushPromise, PushPromiseHandler, PushedResponse};

//! HTTP/1.x response head parsing.
//!
//! [`HeaderParser`] is an incremental state machine over raw bytes. It is fed
//! chunks as they arrive from the transport, with line boundaries anywhere
//! (down to one byte per chunk), and reports completion once the blank line
//! ending the header block has been consumed. Bytes after the header block
//! stay in the caller's buffer: they are body data.
//!
//! Per RFC 9112 Section 5.2, obsolete line folding is replaced by a single
//! space, and horizontal tabs inside field lines are normalized to spaces.

use bytes::{Buf, BytesMut};
use http::{StatusCode, Version};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::{TransportConfig, DEFAULT_MAX_HEADER_BYTES};
use crate::error::{Error, Result};
use crate::headers::{HeadersBuilder, ResponseHeaders};

const CR: u8 = b'\r';
const LF: u8 = b'\n';
const SP: u8 = b' ';
const HT: u8 = b'\t';

/// Minimum length of a valid status line: `HTTP/1.x NNN`.
const MIN_STATUS_LINE_LEN: usize = 12;

/// Read size used by [`read_response_head`].
const READ_CHUNK: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Accumulating the status line.
    StatusLine,
    /// Saw CR terminating the status line, LF must follow.
    StatusLineFoundCr,
    /// Status line done: either a header starts or the block ends.
    StatusLineEnd,
    /// CR directly after the status line (empty header block).
    StatusLineEndCr,
    /// Accumulating a header line.
    Header,
    /// Saw CR ending a header line.
    HeaderFoundCr,
    /// Header line ended: continuation, next header, or end of block.
    HeaderFoundCrLf,
    /// Blank line CR seen, LF ends the block.
    HeaderFoundCrLfCr,
    /// Skipping leading whitespace of a folded continuation line.
    Continuation,
    Finished,
    Failed,
}

/// Parsed status line and header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub version: Version,
    pub status: StatusCode,
    pub status_line: String,
    pub headers: ResponseHeaders,
}

impl ResponseHead {
    /// Numeric status code.
    pub fn response_code(&self) -> u16 {
        self.status.as_u16()
    }
}

/// Incremental HTTP/1.x status line and header parser.
#[derive(Debug)]
pub struct HeaderParser {
    state: State,
    /// Current line being accumulated. Released once parsing finishes.
    line: Vec<u8>,
    builder: Option<HeadersBuilder>,
    status_line: Option<String>,
    status: Option<StatusCode>,
    version: Option<Version>,
    headers: Option<ResponseHeaders>,
    consumed: usize,
    limit: usize,
    failure: Option<Error>,
}

impl HeaderParser {
    /// Create a parser with the default header size limit.
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_HEADER_BYTES)
    }

    /// Create a parser that rejects header blocks larger than `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            state: State::StatusLine,
            line: Vec::with_capacity(128),
            builder: Some(HeadersBuilder::default()),
            status_line: None,
            status: None,
            version: None,
            headers: None,
            consumed: 0,
            limit,
            failure: None,
        }
    }

    /// Create a parser using the limit from `config`.
    pub fn from_config(config: &TransportConfig) -> Self {
        Self::with_limit(config.max_header_bytes)
    }

    /// Feed the next chunk of bytes.
    ///
    /// Consumes bytes from `input` until the header block is complete or the
    /// input is exhausted. Returns `Ok(true)` once the block is complete; any
    /// bytes left in `input` at that point belong to the body.
    ///
    /// After an error the parser is unusable and keeps returning that error.
    pub fn parse<B: Buf>(&mut self, input: &mut B) -> Result<bool> {
        match self.state {
            State::Finished => return Ok(true),
            State::Failed => {
                return Err(self
                    .failure
                    .clone()
                    .unwrap_or_else(|| Error::http_protocol("Header parser failed")))
            }
            _ => {}
        }

        while input.has_remaining() {
            let byte = input.get_u8();
            self.consumed += 1;
            if self.consumed > self.limit {
                return Err(self.fail(Error::HeadersTooLarge { limit: self.limit }));
            }
            if let Err(e) = self.step(byte) {
                return Err(self.fail(e));
            }
            if self.state == State::Finished {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn step(&mut self, byte: u8) -> Result<()> {
        match self.state {
            State::StatusLine => match byte {
                CR => self.state = State::StatusLineFoundCr,
                LF => self.end_status_line()?,
                _ => self.line.push(byte),
            },
            State::StatusLineFoundCr => {
                if byte != LF {
                    return Err(Error::http_protocol(format!(
                        "Bad trailing char {:?} when parsing status line {:?}",
                        byte as char,
                        latin1(&self.line)
                    )));
                }
                self.end_status_line()?;
            }
            State::StatusLineEnd => match byte {
                CR => self.state = State::StatusLineEndCr,
                LF => self.finish(),
                _ => {
                    self.line.push(fold_tab(byte));
                    self.state = State::Header;
                }
            },
            State::StatusLineEndCr => {
                if byte != LF {
                    return Err(Error::http_protocol(format!(
                        "Unexpected {:?} after status line CR",
                        byte as char
                    )));
                }
                self.finish();
            }
            State::Header => match byte {
                CR => self.state = State::HeaderFoundCr,
                LF => self.state = State::HeaderFoundCrLf,
                _ => self.line.push(fold_tab(byte)),
            },
            State::HeaderFoundCr => {
                if byte != LF {
                    return Err(Error::http_protocol(format!(
                        "Unexpected {:?} after header CR",
                        byte as char
                    )));
                }
                self.state = State::HeaderFoundCrLf;
            }
            State::HeaderFoundCrLf => match byte {
                CR => {
                    self.flush_header();
                    self.state = State::HeaderFoundCrLfCr;
                }
                LF => {
                    self.flush_header();
                    self.finish();
                }
                SP | HT => {
                    // obs-fold: the previous value continues on this line
                    while matches!(self.line.last(), Some(&SP)) {
                        self.line.pop();
                    }
                    self.line.push(SP);
                    self.state = State::Continuation;
                }
                _ => {
                    self.flush_header();
                    self.line.push(byte);
                    self.state = State::Header;
                }
            },
            State::Continuation => match byte {
                SP | HT => {}
                CR => self.state = State::HeaderFoundCr,
                LF => self.state = State::HeaderFoundCrLf,
                _ => {
                    self.line.push(byte);
                    self.state = State::Header;
                }
            },
            State::HeaderFoundCrLfCr => {
                if byte != LF {
                    return Err(Error::http_protocol(format!(
                        "Unexpected {:?} after CR LF CR",
                        byte as char
                    )));
                }
                self.finish();
            }
            State::Finished | State::Failed => {
                return Err(Error::http_protocol("Header parser already terminated"));
            }
        }
        Ok(())
    }

    fn end_status_line(&mut self) -> Result<()> {
        let raw = std::mem::take(&mut self.line);
        let line = latin1(&raw);

        if !raw.starts_with(b"HTTP/1.") {
            return Err(Error::http_protocol(format!("Invalid status line: {:?}", line)));
        }
        if raw.len() < MIN_STATUS_LINE_LEN {
            return Err(Error::http_protocol(format!("Status line too short: {:?}", line)));
        }

        // Any later 1.x minor version is treated as 1.1
        let version = match raw[7] {
            b'0' => Version::HTTP_10,
            _ => Version::HTTP_11,
        };

        let code = &raw[9..12];
        if !code.iter().all(u8::is_ascii_digit) {
            return Err(Error::http_protocol(format!(
                "Invalid status code in status line: {:?}",
                line
            )));
        }
        let status = StatusCode::from_bytes(code)
            .map_err(|_| Error::http_protocol(format!("Invalid status code: {:?}", line)))?;

        self.version = Some(version);
        self.status = Some(status);
        self.status_line = Some(line);
        self.line = Vec::with_capacity(128);
        self.state = State::StatusLineEnd;
        Ok(())
    }

    fn flush_header(&mut self) {
        if self.line.is_empty() {
            return;
        }
        let line = latin1(&self.line);
        self.line.clear();
        if let Some(builder) = self.builder.as_mut() {
            builder.add_line(&line);
        }
    }

    fn finish(&mut self) {
        let headers = self.builder.take().unwrap_or_default().build();
        self.headers = Some(headers);
        self.line = Vec::new();
        self.state = State::Finished;
    }

    fn fail(&mut self, err: Error) -> Error {
        tracing::debug!("HTTP/1 header parse failed: {}", err);
        self.state = State::Failed;
        self.line = Vec::new();
        self.builder = None;
        self.failure = Some(err.clone());
        err
    }

    /// True once the blank line ending the header block has been consumed.
    pub fn is_finished(&self) -> bool {
        self.state == State::Finished
    }

    /// The raw status line, once it has been parsed.
    pub fn status_line(&self) -> Option<&str> {
        self.status_line.as_deref()
    }

    /// Numeric status code, once the status line has been parsed.
    pub fn response_code(&self) -> Option<u16> {
        self.status.map(|s| s.as_u16())
    }

    pub fn version(&self) -> Option<Version> {
        self.version
    }

    /// Parsed headers, available after completion.
    pub fn headers(&self) -> Option<&ResponseHeaders> {
        self.headers.as_ref()
    }

    /// Consume the parser and return the response head if parsing finished.
    pub fn into_head(self) -> Option<ResponseHead> {
        if self.state != State::Finished {
            return None;
        }
        Some(ResponseHead {
            version: self.version?,
            status: self.status?,
            status_line: self.status_line?,
            headers: self.headers?,
        })
    }
}

impl Default for HeaderParser {
    fn default() -> Self {
        Self::new()
    }
}

fn fold_tab(byte: u8) -> u8 {
    if byte == HT {
        SP
    } else {
        byte
    }
}

/// Decode bytes as ISO-8859-1, one char per byte.
fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Read a final response head from `reader`.
///
/// `buf` may already hold bytes read earlier from the same connection. Per
/// RFC 9112 Section 6, interim 1xx responses are consumed and skipped, except
/// `101 Switching Protocols` which is returned to the caller. On success,
/// `buf` holds whatever body bytes were read past the header block.
pub async fn read_response_head<R>(
    reader: &mut R,
    buf: &mut BytesMut,
    config: &TransportConfig,
) -> Result<ResponseHead>
where
    R: AsyncRead + Unpin,
{
    loop {
        let mut parser = HeaderParser::from_config(config);
        loop {
            if !buf.is_empty() && parser.parse(buf)? {
                break;
            }

            buf.reserve(READ_CHUNK);
            let n = reader.read_buf(buf).await?;
            if n == 0 {
                return Err(Error::http_protocol(
                    "Connection closed before response headers complete",
                ));
            }
        }

        let head = parser
            .into_head()
            .ok_or_else(|| Error::http_protocol("Header parser finished without a response head"))?;

        if head.status.is_informational() && head.status != StatusCode::SWITCHING_PROTOCOLS {
            tracing::debug!("Skipping interim response: {}", head.status_line);
            continue;
        }
        return Ok(head);
    }
}

//! RESP (Redis Serialization Protocol) implementation
//!
//! Based on the RESP specification: https://redis.io/docs/reference/protocol-spec/
//!
//! Decoding first checks that the buffer holds a whole frame, then parses it
//! from a borrowed view and advances the buffer past it. A frame split across
//! socket reads is left in place until the rest arrives.

use bytes::{Buf, Bytes, BytesMut};
use std::io::{self, Write};
use thiserror::Error;

/// Largest bulk string accepted, matching Redis' default `proto-max-bulk-len`
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Deepest array nesting accepted in one frame
pub const MAX_NESTING: usize = 128;

/// RESP protocol errors
#[derive(Error, Debug)]
pub enum RespError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Protocol parsing error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid encoding
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),
}

pub type RespResult<T> = Result<T, RespError>;

/// RESP value types
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Simple string: +OK\r\n
    SimpleString(String),
    /// Error: -ERR message\r\n
    Error(String),
    /// Integer: :1000\r\n
    Integer(i64),
    /// Bulk string: $6\r\nfoobar\r\n (or $-1\r\n for null)
    BulkString(Option<Bytes>),
    /// Array: *2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n
    Array(Vec<RespValue>),
    /// Null: _\r\n (RESP3), also produced for the null array *-1\r\n
    Null,
}

impl RespValue {
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn error(message: impl Into<String>) -> Self {
        RespValue::Error(message.into())
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(Some(data.into()))
    }

    /// Build a command array out of bulk strings
    pub fn command<I, T>(parts: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        RespValue::Array(parts.into_iter().map(RespValue::bulk).collect())
    }

    /// Encode RESP value to bytes
    pub fn encode(&self, buf: &mut Vec<u8>) -> io::Result<()> {
        match self {
            RespValue::SimpleString(s) => {
                write!(buf, "+{}\r\n", s)?;
            }
            RespValue::Error(e) => {
                write!(buf, "-{}\r\n", e)?;
            }
            RespValue::Integer(i) => {
                write!(buf, ":{}\r\n", i)?;
            }
            RespValue::BulkString(None) => {
                write!(buf, "$-1\r\n")?;
            }
            RespValue::BulkString(Some(data)) => {
                write!(buf, "${}\r\n", data.len())?;
                buf.extend_from_slice(data);
                write!(buf, "\r\n")?;
            }
            RespValue::Array(items) => {
                write!(buf, "*{}\r\n", items.len())?;
                for item in items {
                    item.encode(buf)?;
                }
            }
            RespValue::Null => {
                write!(buf, "_\r\n")?;
            }
        }
        Ok(())
    }

    /// Encode into a fresh buffer
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Parse one RESP value from the front of `buf`.
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched when the buffer does not
    /// yet hold a complete value. Each call scans from the start of `buf`;
    /// connections that read a frame in many pieces use [`RespDecoder`].
    pub fn decode(buf: &mut BytesMut) -> RespResult<Option<RespValue>> {
        let mut scan = FrameScan::default();
        match scan.advance(&buf[..])? {
            Some(end) => {
                let (value, _) = Self::parse(&buf[..end], 0, 0)?;
                buf.advance(end);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Parse a complete, already scanned value starting at `pos`, returning it
    /// with the position just past it
    fn parse(data: &[u8], pos: usize, depth: usize) -> RespResult<(RespValue, usize)> {
        let (line, next) = Self::read_line(data, pos)
            .ok_or_else(|| RespError::Protocol("Truncated frame".to_string()))?;
        let header = Header::parse(line)?;

        let value = match header {
            Header::Simple(value) => (value, next),
            Header::Bulk(len) => {
                let payload = data
                    .get(next..next + len)
                    .ok_or_else(|| RespError::Protocol("Truncated bulk string".to_string()))?;
                let payload = Bytes::copy_from_slice(payload);
                (RespValue::BulkString(Some(payload)), next + len + 2)
            }
            Header::Array(len) => {
                if depth >= MAX_NESTING {
                    return Err(RespError::Protocol("Nesting too deep".to_string()));
                }
                let mut elements = Vec::with_capacity(len.min(1024));
                let mut cursor = next;
                for _ in 0..len {
                    let (value, after) = Self::parse(data, cursor, depth + 1)?;
                    elements.push(value);
                    cursor = after;
                }
                (RespValue::Array(elements), cursor)
            }
        };
        Ok(value)
    }

    /// Find the CRLF-terminated line starting at `pos`
    fn read_line(data: &[u8], pos: usize) -> Option<(&[u8], usize)> {
        let rest = data.get(pos..)?;
        let end = rest.windows(2).position(|w| w == b"\r\n")?;
        Some((&rest[..end], pos + end + 2))
    }

    fn utf8(bytes: &[u8]) -> RespResult<String> {
        String::from_utf8(bytes.to_vec()).map_err(|e| RespError::InvalidEncoding(e.to_string()))
    }

    fn integer(bytes: &[u8]) -> RespResult<i64> {
        Self::utf8(bytes)?
            .parse::<i64>()
            .map_err(|e| RespError::Protocol(format!("Invalid integer: {}", e)))
    }

    /// Convert to array or error
    pub fn as_array(&self) -> RespResult<&[RespValue]> {
        match self {
            RespValue::Array(arr) => Ok(arr),
            _ => Err(RespError::Protocol("Expected array".to_string())),
        }
    }

    /// Convert to bulk string or error
    pub fn as_bulk_string(&self) -> RespResult<Option<&Bytes>> {
        match self {
            RespValue::BulkString(Some(data)) => Ok(Some(data)),
            RespValue::BulkString(None) => Ok(None),
            _ => Err(RespError::Protocol("Expected bulk string".to_string())),
        }
    }

    /// Convert bulk string to UTF-8 string
    pub fn as_string(&self) -> RespResult<Option<String>> {
        match self.as_bulk_string()? {
            Some(bytes) => Ok(Some(Self::utf8(bytes)?)),
            None => Ok(None),
        }
    }
}

/// Decoded type line of a RESP value
enum Header {
    /// A value complete in its header line, including null bulk strings and arrays
    Simple(RespValue),
    /// Bulk string payload length; payload and CRLF follow
    Bulk(usize),
    /// Number of array elements that follow
    Array(usize),
}

impl Header {
    fn parse(line: &[u8]) -> RespResult<Self> {
        let Some((&kind, body)) = line.split_first() else {
            return Err(RespError::Protocol("Empty RESP line".to_string()));
        };

        let header = match kind {
            b'+' => Header::Simple(RespValue::SimpleString(RespValue::utf8(body)?)),
            b'-' => Header::Simple(RespValue::Error(RespValue::utf8(body)?)),
            b':' => Header::Simple(RespValue::Integer(RespValue::integer(body)?)),
            b'_' => {
                if !body.is_empty() {
                    return Err(RespError::Protocol("Invalid null value".to_string()));
                }
                Header::Simple(RespValue::Null)
            }
            b'$' => match RespValue::integer(body)? {
                -1 => Header::Simple(RespValue::BulkString(None)),
                len => Header::Bulk(
                    usize::try_from(len)
                        .ok()
                        .filter(|len| *len <= MAX_BULK_LEN)
                        .ok_or_else(|| {
                            RespError::Protocol(format!("Invalid bulk string length: {}", len))
                        })?,
                ),
            },
            b'*' => match RespValue::integer(body)? {
                -1 => Header::Simple(RespValue::Null),
                len => Header::Array(usize::try_from(len).map_err(|_| {
                    RespError::Protocol(format!("Invalid array length: {}", len))
                })?),
            },
            other => {
                return Err(RespError::Protocol(format!(
                    "Unknown RESP type: {}",
                    other as char
                )))
            }
        };
        Ok(header)
    }
}

/// Resumable check that a buffer holds one complete frame.
///
/// Walks headers iteratively with a stack of open arrays, so neither nesting
/// nor element count grows the call stack. Progress is kept between calls and
/// only bytes that arrived since the last call are examined.
#[derive(Debug, Default)]
struct FrameScan {
    /// Offset of the next header to examine
    pos: usize,
    /// Elements still expected by each open array, innermost last
    open: Vec<usize>,
}

impl FrameScan {
    /// Returns the length of the frame at the start of `data` once it is
    /// complete, or `None` if more bytes are needed
    fn advance(&mut self, data: &[u8]) -> RespResult<Option<usize>> {
        loop {
            let Some((line, next)) = RespValue::read_line(data, self.pos) else {
                return Ok(None);
            };

            match Header::parse(line)? {
                Header::Simple(_) | Header::Array(0) => self.pos = next,
                Header::Bulk(len) => {
                    // Payload plus trailing \r\n
                    if data.len() < next + len + 2 {
                        return Ok(None);
                    }
                    if &data[next + len..next + len + 2] != b"\r\n" {
                        return Err(RespError::Protocol(
                            "Missing \\r\\n after bulk string".to_string(),
                        ));
                    }
                    self.pos = next + len + 2;
                }
                Header::Array(len) => {
                    if self.open.len() >= MAX_NESTING {
                        return Err(RespError::Protocol("Nesting too deep".to_string()));
                    }
                    self.open.push(len);
                    self.pos = next;
                    continue;
                }
            }

            // A value just completed; close every array it fills up
            loop {
                match self.open.last_mut() {
                    None => return Ok(Some(self.pos)),
                    Some(remaining) => {
                        *remaining -= 1;
                        if *remaining > 0 {
                            break;
                        }
                        self.open.pop();
                    }
                }
            }
        }
    }
}

/// Read buffer that decodes frames arriving in arbitrary pieces.
///
/// Remembers how far the pending frame has been checked, so a large reply
/// read in many chunks is scanned once overall rather than once per chunk.
#[derive(Debug, Default)]
pub struct RespDecoder {
    buffer: BytesMut,
    scan: FrameScan,
}

impl RespDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            scan: FrameScan::default(),
        }
    }

    /// Buffer to read socket data into; bytes may only be appended
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Take the next complete value out of the buffer
    pub fn next_value(&mut self) -> RespResult<Option<RespValue>> {
        let Some(end) = self.scan.advance(&self.buffer[..])? else {
            return Ok(None);
        };
        let (value, _) = RespValue::parse(&self.buffer[..end], 0, 0)?;
        self.buffer.advance(end);
        self.scan = FrameScan::default();
        Ok(Some(value))
    }
}

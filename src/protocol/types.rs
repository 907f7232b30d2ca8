//! Wire Types for the RESP Subset
//!
//! Requests arrive as [`Frame`]s and responses leave as [`Reply`]s. The two
//! sides are deliberately asymmetric: clients only ever send arrays of bulk
//! strings, and the server only ever answers with one of four reply shapes.
//!
//! ## Request Format
//!
//! - `$` Bulk String: `$5\r\nhello\r\n`
//! - `*` Array: `*2\r\n$3\r\nGET\r\n$4\r\nname\r\n`
//!
//! ## Reply Format
//!
//! - Status: `+OK\r\n`
//! - Bulk String: `$5\r\nhello\r\n`
//! - Null: `_\r\n`
//! - Error: `-ERR unknown command\r\n`

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP type prefixes understood or produced by the server
pub mod prefix {
    pub const STATUS: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
    pub const NULL: u8 = b'_';
}

/// A decoded request frame.
///
/// A frame is either a leaf payload or an ordered sequence of frames.
/// Commands are flat arrays of bulk strings, with the verb first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Length-prefixed binary-safe payload.
    /// Format: `$<length>\r\n<data>\r\n`
    Bulk(Bytes),

    /// Ordered sequence of frames.
    /// Format: `*<count>\r\n<element1><element2>...`
    Array(Vec<Frame>),
}

impl Frame {
    /// Builds a command array from string tokens.
    ///
    /// # Example
    /// ```
    /// use sider::protocol::Frame;
    /// let frame = Frame::command(&["GET", "name"]);
    /// assert_eq!(frame.serialize(), b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n");
    /// ```
    pub fn command(tokens: &[&str]) -> Self {
        Frame::Array(
            tokens
                .iter()
                .map(|t| Frame::Bulk(Bytes::copy_from_slice(t.as_bytes())))
                .collect(),
        )
    }

    /// Returns the payload if this is a bulk string.
    pub fn as_bulk(&self) -> Option<&Bytes> {
        match self {
            Frame::Bulk(b) => Some(b),
            Frame::Array(_) => None,
        }
    }

    /// Returns the elements if this is an array.
    pub fn as_array(&self) -> Option<&[Frame]> {
        match self {
            Frame::Array(values) => Some(values),
            Frame::Bulk(_) => None,
        }
    }

    /// Serializes the frame to its wire encoding.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the frame into an existing buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            Frame::Bulk(data) => {
                buf.push(prefix::BULK_STRING);
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            Frame::Array(values) => {
                buf.push(prefix::ARRAY);
                buf.extend_from_slice(values.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for value in values {
                    value.serialize_into(buf);
                }
            }
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Bulk(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
            Frame::Array(values) => {
                write!(f, "[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// A reply sent back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+OK\r\n`
    Ok,

    /// `$<len>\r\n<value>\r\n`
    Bulk(Bytes),

    /// `_\r\n`
    Null,

    /// `-ERR <message>\r\n`
    Error(&'static str),
}

const OK_REPLY: &[u8] = b"+OK\r\n";
const NULL_REPLY: &[u8] = b"_\r\n";

impl Reply {
    /// Creates an error reply. The `ERR ` tag is added on the wire.
    pub fn error(message: &'static str) -> Self {
        Reply::Error(message)
    }

    /// Returns true if this is an error reply.
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Encodes the reply into an existing buffer.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Reply::Ok => buf.put_slice(OK_REPLY),
            Reply::Null => buf.put_slice(NULL_REPLY),
            Reply::Bulk(data) => {
                buf.reserve(data.len() + 16);
                buf.put_u8(prefix::BULK_STRING);
                buf.put_slice(data.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                buf.put_slice(data);
                buf.put_slice(CRLF);
            }
            Reply::Error(message) => {
                buf.put_u8(prefix::ERROR);
                buf.put_slice(b"ERR ");
                buf.put_slice(message.as_bytes());
                buf.put_slice(CRLF);
            }
        }
    }

    /// Converts the reply into the bytes handed to the writer queue.
    ///
    /// Status and null replies are static and never allocate.
    pub fn into_bytes(self) -> Bytes {
        match self {
            Reply::Ok => Bytes::from_static(OK_REPLY),
            Reply::Null => Bytes::from_static(NULL_REPLY),
            other => {
                let mut buf = BytesMut::new();
                other.encode_into(&mut buf);
                buf.freeze()
            }
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ok => write!(f, "OK"),
            Reply::Null => write!(f, "(nil)"),
            Reply::Error(message) => write!(f, "(error) ERR {}", message),
            Reply::Bulk(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
        }
    }
}

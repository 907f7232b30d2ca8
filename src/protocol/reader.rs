//! Streaming RESP Frame Reader
//!
//! [`FrameReader`] pulls exactly one request frame per call out of an ordered
//! byte source. Unlike a slice parser it never has to re-scan a partially
//! received command: it suspends on the socket until the bytes it needs are
//! available.
//!
//! ## Buffer Strategy
//!
//! The reader sits on a 32 KiB buffered reader and keeps one reusable scratch
//! buffer (8 KiB by default):
//!
//! - **Small payloads** (length <= scratch capacity) are read into the scratch
//!   buffer and copied out into a fresh `Bytes`. Command verbs and typical
//!   keys take this path.
//! - **Large payloads** get a dedicated allocation of exactly their length,
//!   which is handed to the returned frame as-is. The reader keeps no
//!   reference to it, so the caller owns it outright.
//!
//! ## Failure Model
//!
//! Any framing error (bad prefix, bad length, missing CRLF) leaves the stream
//! at an unknown offset. The reader makes no attempt to find the next frame
//! boundary; callers are expected to drop the connection.

use crate::protocol::types::{prefix, Frame, CRLF};
use bytes::Bytes;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

/// Default capacity of the buffered reader, sized for pipelined workloads.
pub const DEFAULT_READ_BUFFER: usize = 32 * 1024;

/// Default capacity of the reusable scratch buffer.
pub const DEFAULT_SCRATCH_CAPACITY: usize = 8192;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum array nesting depth
pub const MAX_NESTING_DEPTH: usize = 32;

/// Longest accepted length line, CRLF included.
const MAX_LINE_LENGTH: u64 = 32;

/// Upper bound on up-front allocation for an announced array length.
const MAX_PREALLOC: usize = 1024;

/// Errors that can occur while decoding a frame.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Unknown type prefix, missing CRLF, or excessive nesting
    #[error("malformed frame")]
    Malformed,

    /// Length line is empty, non-numeric, negative or out of range
    #[error("bad length")]
    BadLength,

    /// Bulk string exceeds [`MAX_BULK_SIZE`]
    #[error("bulk string too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    /// The stream ended in the middle of a frame
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// The underlying source failed
    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for DecodeError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            DecodeError::UnexpectedEof
        } else {
            DecodeError::Io(err)
        }
    }
}

/// Decodes request frames from an async byte source.
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: BufReader<R>,
    scratch: Vec<u8>,
    line: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Creates a reader with the default buffer sizes.
    pub fn new(inner: R) -> Self {
        Self::with_capacity(inner, DEFAULT_READ_BUFFER, DEFAULT_SCRATCH_CAPACITY)
    }

    /// Creates a reader with explicit read-buffer and scratch capacities.
    pub fn with_capacity(inner: R, read_buffer: usize, scratch_capacity: usize) -> Self {
        Self {
            reader: BufReader::with_capacity(read_buffer, inner),
            scratch: vec![0; scratch_capacity],
            line: Vec::with_capacity(MAX_LINE_LENGTH as usize),
        }
    }

    /// Reads the next frame.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(frame))` - A complete frame was decoded
    /// - `Ok(None)` - The source ended cleanly between frames
    /// - `Err(e)` - The stream is unusable from here on
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
        let first = {
            let buf = self.reader.fill_buf().await?;
            match buf.first() {
                Some(&b) => b,
                None => return Ok(None),
            }
        };
        self.reader.consume(1);

        self.decode(first).await.map(Some)
    }

    /// Decodes one frame whose type byte has already been consumed.
    ///
    /// Arrays are assembled on an explicit stack so nesting never recurses
    /// through async frames.
    async fn decode(&mut self, mut kind: u8) -> Result<Frame, DecodeError> {
        let mut open: Vec<(Vec<Frame>, usize)> = Vec::new();

        loop {
            let mut frame = match kind {
                prefix::BULK_STRING => Frame::Bulk(self.read_bulk().await?),
                prefix::ARRAY => {
                    let len = self.read_length().await?;
                    if len == 0 {
                        Frame::Array(Vec::new())
                    } else {
                        if open.len() >= MAX_NESTING_DEPTH {
                            return Err(DecodeError::Malformed);
                        }
                        open.push((Vec::with_capacity(len.min(MAX_PREALLOC)), len));
                        kind = self.reader.read_u8().await?;
                        continue;
                    }
                }
                _ => return Err(DecodeError::Malformed),
            };

            // Fold the finished frame into its parents, closing every array
            // that just received its last element.
            loop {
                let Some((items, expected)) = open.last_mut() else {
                    return Ok(frame);
                };
                items.push(frame);
                if items.len() < *expected {
                    break;
                }
                frame = Frame::Array(std::mem::take(items));
                open.pop();
            }

            kind = self.reader.read_u8().await?;
        }
    }

    /// Reads a bulk string body: `<length>\r\n<data>\r\n`
    async fn read_bulk(&mut self) -> Result<Bytes, DecodeError> {
        let len = self.read_length().await?;
        if len > MAX_BULK_SIZE {
            return Err(DecodeError::TooLarge {
                size: len,
                max: MAX_BULK_SIZE,
            });
        }

        let data = if len <= self.scratch.len() {
            let buf = &mut self.scratch[..len];
            self.reader.read_exact(buf).await?;
            Bytes::copy_from_slice(buf)
        } else {
            let mut owned = vec![0u8; len];
            self.reader.read_exact(&mut owned).await?;
            Bytes::from(owned)
        };

        self.expect_crlf().await?;
        Ok(data)
    }

    /// Reads a length line and validates it as a non-negative size.
    async fn read_length(&mut self) -> Result<usize, DecodeError> {
        let line = self.read_line().await?;
        let value = parse_length(line)?;
        usize::try_from(value).map_err(|_| DecodeError::BadLength)
    }

    /// Reads one CRLF-terminated line and returns it without the terminator.
    async fn read_line(&mut self) -> Result<&[u8], DecodeError> {
        self.line.clear();
        let n = (&mut self.reader)
            .take(MAX_LINE_LENGTH)
            .read_until(b'\n', &mut self.line)
            .await?;

        if self.line.last() != Some(&b'\n') {
            // Either the source ran dry or the line is absurdly long
            return if (n as u64) < MAX_LINE_LENGTH {
                Err(DecodeError::UnexpectedEof)
            } else {
                Err(DecodeError::Malformed)
            };
        }

        if !self.line.ends_with(CRLF) {
            return Err(DecodeError::Malformed);
        }

        Ok(&self.line[..self.line.len() - 2])
    }

    async fn expect_crlf(&mut self) -> Result<(), DecodeError> {
        let cr = self.reader.read_u8().await?;
        let lf = self.reader.read_u8().await?;
        if cr != b'\r' || lf != b'\n' {
            return Err(DecodeError::Malformed);
        }
        Ok(())
    }
}

/// Parses an ASCII decimal with an optional leading `-`.
fn parse_length(line: &[u8]) -> Result<i64, DecodeError> {
    let (negative, digits) = match line.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, line),
    };

    if digits.is_empty() {
        return Err(DecodeError::BadLength);
    }

    let mut value: i64 = 0;
    for &c in digits {
        if !c.is_ascii_digit() {
            return Err(DecodeError::BadLength);
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(i64::from(c - b'0')))
            .ok_or(DecodeError::BadLength)?;
    }

    Ok(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    async fn decode_one(input: &[u8]) -> Result<Option<Frame>, DecodeError> {
        FrameReader::new(input).read_frame().await
    }

    #[tokio::test]
    async fn test_read_bulk_string() {
        let frame = decode_one(b"$5\r\nhello\r\n").await.unwrap().unwrap();
        assert_eq!(frame, Frame::Bulk(Bytes::from("hello")));
    }

    #[tokio::test]
    async fn test_read_empty_bulk_string() {
        let frame = decode_one(b"$0\r\n\r\n").await.unwrap().unwrap();
        assert_eq!(frame, Frame::Bulk(Bytes::new()));
    }

    #[tokio::test]
    async fn test_read_command_array() {
        let frame = decode_one(b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame, Frame::command(&["SET", "key", "value"]));
    }

    #[tokio::test]
    async fn test_read_empty_array() {
        let frame = decode_one(b"*0\r\n").await.unwrap().unwrap();
        assert_eq!(frame, Frame::Array(vec![]));
    }

    #[tokio::test]
    async fn test_read_nested_array() {
        let frame = decode_one(b"*2\r\n*2\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            frame,
            Frame::Array(vec![
                Frame::Array(vec![
                    Frame::Bulk(Bytes::from("a")),
                    Frame::Bulk(Bytes::from("b")),
                ]),
                Frame::Bulk(Bytes::from("c")),
            ])
        );
    }

    #[tokio::test]
    async fn test_read_nested_empty_array() {
        let frame = decode_one(b"*2\r\n*0\r\n$1\r\nx\r\n").await.unwrap().unwrap();
        assert_eq!(
            frame,
            Frame::Array(vec![Frame::Array(vec![]), Frame::Bulk(Bytes::from("x"))])
        );
    }

    #[tokio::test]
    async fn test_pipelined_frames_then_eof() {
        let input = b"*2\r\n$3\r\nGET\r\n$1\r\na\r\n*2\r\n$3\r\nGET\r\n$1\r\nb\r\n";
        let mut reader = FrameReader::new(&input[..]);

        assert_eq!(
            reader.read_frame().await.unwrap(),
            Some(Frame::command(&["GET", "a"]))
        );
        assert_eq!(
            reader.read_frame().await.unwrap(),
            Some(Frame::command(&["GET", "b"]))
        );
        assert_eq!(reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clean_eof_on_empty_input() {
        assert_eq!(decode_one(b"").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_large_payload_bypasses_scratch() {
        let payload = vec![b'x'; 100];
        let mut input = b"$100\r\n".to_vec();
        input.extend_from_slice(&payload);
        input.extend_from_slice(b"\r\n");
        input.extend_from_slice(b"$2\r\nok\r\n");

        let mut reader = FrameReader::with_capacity(&input[..], 64, 16);
        let frame = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame, Frame::Bulk(Bytes::from(payload)));

        // The scratch path still works after a large read
        let frame = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame, Frame::Bulk(Bytes::from("ok")));
    }

    #[tokio::test]
    async fn test_small_payload_not_aliased_by_scratch() {
        let input = b"$3\r\nabc\r\n$3\r\nxyz\r\n";
        let mut reader = FrameReader::new(&input[..]);

        let first = reader.read_frame().await.unwrap().unwrap();
        let second = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(first, Frame::Bulk(Bytes::from("abc")));
        assert_eq!(second, Frame::Bulk(Bytes::from("xyz")));
    }

    #[tokio::test]
    async fn test_binary_safe_bulk_string() {
        let frame = decode_one(b"$5\r\nhe\r\no\r\n").await.unwrap().unwrap();
        assert_eq!(frame, Frame::Bulk(Bytes::from(&b"he\r\no"[..])));
    }

    #[tokio::test]
    async fn test_split_reads() {
        let mock = Builder::new()
            .read(b"*2\r\n$3\r")
            .read(b"\nGET\r\n$")
            .read(b"4\r\nna")
            .read(b"me\r\n")
            .build();

        let mut reader = FrameReader::new(mock);
        let frame = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame, Frame::command(&["GET", "name"]));
        assert_eq!(reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_prefix_is_malformed() {
        let result = decode_one(b"+OK\r\n").await;
        assert!(matches!(result, Err(DecodeError::Malformed)));

        let result = decode_one(b"*1\r\n:1\r\n").await;
        assert!(matches!(result, Err(DecodeError::Malformed)));
    }

    #[tokio::test]
    async fn test_non_numeric_length() {
        let result = decode_one(b"$abc\r\nxyz\r\n").await;
        assert!(matches!(result, Err(DecodeError::BadLength)));

        let result = decode_one(b"*1x\r\n").await;
        assert!(matches!(result, Err(DecodeError::BadLength)));
    }

    #[tokio::test]
    async fn test_empty_length() {
        let result = decode_one(b"$\r\n").await;
        assert!(matches!(result, Err(DecodeError::BadLength)));

        let result = decode_one(b"*-\r\n").await;
        assert!(matches!(result, Err(DecodeError::BadLength)));
    }

    #[tokio::test]
    async fn test_negative_length_rejected() {
        let result = decode_one(b"$-1\r\n").await;
        assert!(matches!(result, Err(DecodeError::BadLength)));

        let result = decode_one(b"*-1\r\n").await;
        assert!(matches!(result, Err(DecodeError::BadLength)));
    }

    #[tokio::test]
    async fn test_overflowing_length() {
        let result = decode_one(b"$99999999999999999999\r\n").await;
        assert!(matches!(result, Err(DecodeError::BadLength)));
    }

    #[tokio::test]
    async fn test_too_large() {
        let result = decode_one(b"$600000000\r\n").await;
        assert!(matches!(result, Err(DecodeError::TooLarge { .. })));
    }

    #[tokio::test]
    async fn test_missing_payload_crlf() {
        let result = decode_one(b"$3\r\nabcXY").await;
        assert!(matches!(result, Err(DecodeError::Malformed)));
    }

    #[tokio::test]
    async fn test_length_line_without_cr() {
        let result = decode_one(b"$3\nabc\r\n").await;
        assert!(matches!(result, Err(DecodeError::Malformed)));
    }

    #[tokio::test]
    async fn test_overlong_length_line() {
        let result = decode_one(b"$000000000000000000000000000000000000000000003\r\n").await;
        assert!(matches!(result, Err(DecodeError::Malformed)));
    }

    #[tokio::test]
    async fn test_truncated_payload() {
        let result = decode_one(b"$5\r\nhel").await;
        assert!(matches!(result, Err(DecodeError::UnexpectedEof)));
    }

    #[tokio::test]
    async fn test_truncated_array() {
        let result = decode_one(b"*2\r\n$3\r\nGET\r\n").await;
        assert!(matches!(result, Err(DecodeError::UnexpectedEof)));

        let result = decode_one(b"*2\r\n$3").await;
        assert!(matches!(result, Err(DecodeError::UnexpectedEof)));
    }

    #[tokio::test]
    async fn test_nesting_limit() {
        let input = b"*1\r\n".repeat(MAX_NESTING_DEPTH + 1);
        let result = decode_one(&input).await;
        assert!(matches!(result, Err(DecodeError::Malformed)));
    }

    #[tokio::test]
    async fn test_io_error_propagates() {
        let mock = Builder::new()
            .read(b"*1\r\n")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();

        let result = FrameReader::new(mock).read_frame().await;
        assert!(matches!(result, Err(DecodeError::Io(ref e)) if e.kind() == io::ErrorKind::ConnectionReset));
    }

    #[test]
    fn test_parse_length() {
        assert_eq!(parse_length(b"0").unwrap(), 0);
        assert_eq!(parse_length(b"42").unwrap(), 42);
        assert_eq!(parse_length(b"-7").unwrap(), -7);
        assert!(matches!(parse_length(b""), Err(DecodeError::BadLength)));
        assert!(matches!(parse_length(b"-"), Err(DecodeError::BadLength)));
        assert!(matches!(parse_length(b"1 2"), Err(DecodeError::BadLength)));
        assert!(matches!(parse_length(b"+3"), Err(DecodeError::BadLength)));
    }
}

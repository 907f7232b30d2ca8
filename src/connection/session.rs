//! Session Read Loop
//!
//! Each accepted connection becomes a session made of two tasks: this read
//! loop, which decodes and executes commands, and the flush loop from the
//! [`writer`](super::writer) module, which writes replies. They share nothing
//! but the reply queue.
//!
//! ## Session Lifecycle
//!
//! ```text
//! 1. Connected: registered, both tasks spawned
//!        │
//!        ▼
//! 2. ┌──────────────────────────────┐
//!    │      Processing              │
//!    │                              │
//!    │  read_frame() ─> execute()   │
//!    │        ▲            │        │
//!    │        └── enqueue()┘        │
//!    └──────────────────────────────┘
//!        │  EOF, protocol error, empty request,
//!        │  writer failure, or close signal
//!        ▼
//! 3. Disconnecting: deregistered, read side closed, writer stopped
//!        │
//!        ▼
//! 4. Closed
//! ```
//!
//! Command errors are replies and keep the loop going. Anything that leaves
//! the byte stream or the writer in doubt ends the session.

use crate::commands::CommandHandler;
use crate::connection::writer::{ReplyWriter, WriterError};
use crate::connection::signalled;
use crate::protocol::{DecodeError, FrameReader};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Process-unique, strictly increasing session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub(crate) u64);

impl SessionId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: u64) {
        self.bytes_written.fetch_add(count, Ordering::Relaxed);
    }
}

/// Reasons a session ends abnormally.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The byte stream could not be decoded
    #[error("protocol error: {0}")]
    Protocol(#[from] DecodeError),

    /// The request was an empty array or not an array at all
    #[error("empty request")]
    EmptyRequest,

    /// The reply queue is closed or the flush task failed
    #[error("writer error: {0}")]
    Writer(#[from] WriterError),
}

/// The read/dispatch half of a session.
pub struct Session<R> {
    id: SessionId,
    peer: String,
    reader: FrameReader<R>,
    handler: CommandHandler,
    replies: ReplyWriter,
    close_rx: watch::Receiver<bool>,
    stats: Arc<ConnectionStats>,
}

impl<R: AsyncRead + Unpin> Session<R> {
    /// Creates a session.
    ///
    /// # Arguments
    ///
    /// * `id` - The id the session was registered under
    /// * `peer` - The client's address (for logging)
    /// * `reader` - Decoder over the connection's read half
    /// * `handler` - The command handler for executing commands
    /// * `replies` - Producer side of the session's reply queue
    /// * `close_rx` - Flips to `true` when the session is disconnected
    /// * `stats` - Shared connection statistics
    pub fn new(
        id: SessionId,
        peer: String,
        reader: FrameReader<R>,
        handler: CommandHandler,
        replies: ReplyWriter,
        close_rx: watch::Receiver<bool>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        Self {
            id,
            peer,
            reader,
            handler,
            replies,
            close_rx,
            stats,
        }
    }

    /// Runs the read-execute-enqueue loop until the session ends.
    ///
    /// Returns `Ok(())` on a clean end of stream or when the session was
    /// closed from outside.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(session = %self.id, client = %self.peer, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(session = %self.id, client = %self.peer, "Client disconnected"),
            Err(ConnectionError::Protocol(DecodeError::Io(e)))
                if e.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(session = %self.id, client = %self.peer, "Connection reset by client")
            }
            Err(ConnectionError::Writer(WriterError::Closed)) => {
                debug!(session = %self.id, client = %self.peer, "Reply queue closed")
            }
            Err(e) => warn!(session = %self.id, client = %self.peer, error = %e, "Connection error"),
        }

        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            let frame = tokio::select! {
                biased;
                _ = signalled(&mut self.close_rx) => return Ok(()),
                frame = self.reader.read_frame() => frame?,
            };

            let Some(frame) = frame else {
                return Ok(());
            };

            let args = match frame.as_array() {
                Some(args) if !args.is_empty() => args,
                _ => return Err(ConnectionError::EmptyRequest),
            };

            let reply = self.handler.execute(args);
            self.stats.command_processed();
            if reply.is_error() {
                debug!(session = %self.id, reply = %reply, "Command rejected");
            }

            // A full queue parks us here; a disconnect must still get through
            tokio::select! {
                biased;
                _ = signalled(&mut self.close_rx) => return Ok(()),
                sent = self.replies.enqueue(reply.into_bytes()) => sent?,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::writer::reply_channel;
    use crate::storage::ShardedStore;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    struct Harness {
        client: DuplexStream,
        close_tx: watch::Sender<bool>,
        stats: Arc<ConnectionStats>,
        session: tokio::task::JoinHandle<Result<(), ConnectionError>>,
    }

    fn start_session() -> Harness {
        let (client, server) = tokio::io::duplex(4096);
        let (read_half, write_half) = tokio::io::split(server);
        let (replies, writer, flush) = reply_channel(write_half, 64, 16);
        let (close_tx, close_rx) = watch::channel(false);
        let stats = Arc::new(ConnectionStats::new());

        let session = Session::new(
            SessionId(1),
            "test".to_string(),
            FrameReader::new(read_half),
            CommandHandler::new(Arc::new(ShardedStore::new())),
            replies,
            close_rx,
            Arc::clone(&stats),
        );

        tokio::spawn(async move {
            let _writer = writer;
            let _ = flush.run().await;
        });
        let session = tokio::spawn(session.run());

        Harness {
            client,
            close_tx,
            stats,
            session,
        }
    }

    async fn read_exactly(client: &mut DuplexStream, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        client.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_set_get() {
        let mut h = start_session();

        h.client
            .write_all(b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n")
            .await
            .unwrap();
        assert_eq!(read_exactly(&mut h.client, 5).await, b"+OK\r\n");

        h.client
            .write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n")
            .await
            .unwrap();
        assert_eq!(read_exactly(&mut h.client, 11).await, b"$5\r\nvalue\r\n");

        assert_eq!(h.stats.commands_processed.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_command_error_keeps_session_open() {
        let mut h = start_session();

        h.client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        assert_eq!(
            read_exactly(&mut h.client, 22).await,
            b"-ERR unknown command\r\n"
        );

        h.client.write_all(b"*2\r\n$3\r\nGET\r\n$1\r\nx\r\n").await.unwrap();
        assert_eq!(read_exactly(&mut h.client, 3).await, b"_\r\n");
    }

    #[tokio::test]
    async fn test_clean_eof_ends_session() {
        let h = start_session();
        drop(h.client);

        assert!(h.session.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_protocol_error_ends_session() {
        let mut h = start_session();
        h.client.write_all(b"?garbage\r\n").await.unwrap();

        let result = h.session.await.unwrap();
        assert!(matches!(
            result,
            Err(ConnectionError::Protocol(DecodeError::Malformed))
        ));
    }

    #[tokio::test]
    async fn test_empty_request_ends_session() {
        let mut h = start_session();
        h.client.write_all(b"*0\r\n").await.unwrap();

        let result = h.session.await.unwrap();
        assert!(matches!(result, Err(ConnectionError::EmptyRequest)));
    }

    #[tokio::test]
    async fn test_bare_bulk_string_ends_session() {
        let mut h = start_session();
        h.client.write_all(b"$3\r\nGET\r\n").await.unwrap();

        let result = h.session.await.unwrap();
        assert!(matches!(result, Err(ConnectionError::EmptyRequest)));
    }

    #[tokio::test]
    async fn test_close_signal_ends_blocked_read() {
        let h = start_session();

        h.close_tx.send_replace(true);
        let result = tokio::time::timeout(std::time::Duration::from_secs(2), h.session)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}

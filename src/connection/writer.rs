//! Asynchronous Reply Writer
//!
//! Replies are not written to the socket by the task that produced them.
//! The read/dispatch task pushes encoded replies onto a bounded queue and
//! goes straight back to decoding; a separate flush task drains the queue
//! and writes whatever has accumulated in one call.
//!
//! ```text
//!  read/dispatch task            flush task
//! ┌──────────────────┐        ┌──────────────────┐
//! │ ReplyWriter      │  mpsc  │ FlushLoop        │
//! │  enqueue(bytes) ─┼───────>│  recv_many()     │
//! │                  │ (FIFO, │  concat + write  │──> socket
//! └──────────────────┘bounded)└──────────────────┘
//!                                      ▲
//!   WriterHandle::stop() / abort() ────┘ (watch)
//! ```
//!
//! ## Backpressure
//!
//! The queue holds at most `capacity` replies. When a client stops reading,
//! `enqueue` suspends until the flush task frees a slot, which in turn stops
//! the session from decoding further requests.
//!
//! ## Shutdown
//!
//! After [`WriterHandle::stop`], `enqueue` fails with [`WriterError::Closed`].
//! The flush task writes out everything already queued, shuts down its half
//! of the connection and exits.
//!
//! [`WriterHandle::abort`] also stops the writer, but abandons queued replies
//! and any write in progress. The flush task drops the write half right away,
//! even if the client has stopped reading.

use super::signalled;
use bytes::{Bytes, BytesMut};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::trace;

/// Default number of replies the queue can hold.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default maximum number of replies coalesced into one write.
pub const DEFAULT_MAX_BATCH: usize = 256;

/// Errors surfaced by the writer.
#[derive(Debug, Error)]
pub enum WriterError {
    /// The writer has been stopped or its flush task is gone
    #[error("writer is closed")]
    Closed,

    /// Writing to the connection failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Producer side of the queue.
#[derive(Debug, Clone)]
pub struct ReplyWriter {
    tx: mpsc::Sender<Bytes>,
    stopped: watch::Receiver<bool>,
}

impl ReplyWriter {
    /// Appends encoded reply bytes to the queue.
    ///
    /// Suspends while the queue is full.
    pub async fn enqueue(&self, bytes: Bytes) -> Result<(), WriterError> {
        if *self.stopped.borrow() {
            return Err(WriterError::Closed);
        }
        self.tx.send(bytes).await.map_err(|_| WriterError::Closed)
    }
}

/// Signals the flush task to drain and exit.
///
/// Dropping the handle has the same effect as calling [`stop`](Self::stop).
#[derive(Debug)]
pub struct WriterHandle {
    stop_tx: watch::Sender<bool>,
    abort_tx: watch::Sender<bool>,
}

impl WriterHandle {
    /// Requests shutdown. Idempotent.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Stops the writer and releases the connection without draining.
    pub fn abort(&self) {
        self.stop();
        self.abort_tx.send_replace(true);
    }

    /// Returns true once [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }
}

/// Consumer side: owns the write half of the connection.
#[derive(Debug)]
pub struct FlushLoop<W> {
    rx: mpsc::Receiver<Bytes>,
    stop_rx: watch::Receiver<bool>,
    abort_rx: watch::Receiver<bool>,
    writer: W,
    max_batch: usize,
    batch: BytesMut,
    written: u64,
}

/// Creates a bounded reply queue over `writer`.
///
/// Returns the producer, the stop handle, and the flush loop to spawn.
pub fn reply_channel<W>(
    writer: W,
    capacity: usize,
    max_batch: usize,
) -> (ReplyWriter, WriterHandle, FlushLoop<W>)
where
    W: AsyncWrite + Unpin,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (stop_tx, stop_rx) = watch::channel(false);
    let (abort_tx, abort_rx) = watch::channel(false);

    let producer = ReplyWriter {
        tx,
        stopped: stop_rx.clone(),
    };
    let flush = FlushLoop {
        rx,
        stop_rx,
        abort_rx,
        writer,
        max_batch: max_batch.max(1),
        batch: BytesMut::new(),
        written: 0,
    };

    (producer, WriterHandle { stop_tx, abort_tx }, flush)
}

impl<W: AsyncWrite + Unpin> FlushLoop<W> {
    /// Runs until stopped, aborted, every producer is gone, or a write fails.
    ///
    /// # Returns
    ///
    /// The number of bytes written to the connection.
    pub async fn run(mut self) -> Result<u64, WriterError> {
        let mut abort_rx = self.abort_rx.clone();
        let finished = tokio::select! {
            biased;
            _ = aborted(&mut abort_rx) => None,
            result = self.flush_until_stopped() => Some(result),
        };

        match finished {
            Some(result) => result,
            None => {
                // The write half goes down with `self`, mid-write or not
                trace!(bytes = self.written, "Flush loop aborted");
                Ok(self.written)
            }
        }
    }

    async fn flush_until_stopped(&mut self) -> Result<u64, WriterError> {
        let mut pending = Vec::with_capacity(self.max_batch);

        loop {
            let received = tokio::select! {
                biased;
                _ = signalled(&mut self.stop_rx) => break,
                n = self.rx.recv_many(&mut pending, self.max_batch) => n,
            };

            if received == 0 {
                break;
            }
            self.written += self.write_batch(&mut pending).await?;
        }

        // Refuse new replies, then flush whatever made it into the queue
        self.rx.close();
        loop {
            if self.rx.recv_many(&mut pending, self.max_batch).await == 0 {
                break;
            }
            self.written += self.write_batch(&mut pending).await?;
        }

        self.writer.shutdown().await?;
        trace!(bytes = self.written, "Flush loop finished");
        Ok(self.written)
    }

    /// Writes every pending reply with a single write call.
    async fn write_batch(&mut self, pending: &mut Vec<Bytes>) -> Result<u64, WriterError> {
        let len = if let [single] = pending.as_slice() {
            self.writer.write_all(single).await?;
            single.len()
        } else {
            for reply in pending.iter() {
                self.batch.extend_from_slice(reply);
            }
            self.writer.write_all(&self.batch).await?;
            let len = self.batch.len();
            self.batch.clear();
            len
        };
        self.writer.flush().await?;

        trace!(replies = pending.len(), bytes = len, "Flushed batch");
        pending.clear();
        Ok(len as u64)
    }
}

/// Resolves on an explicit abort only; a dropped handle means drain.
async fn aborted(abort_rx: &mut watch::Receiver<bool>) {
    if abort_rx.wait_for(|aborted| *aborted).await.is_err() {
        std::future::pending::<()>().await;
    }
}

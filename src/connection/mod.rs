//! Connection Module
//!
//! This module manages individual client sessions. Each accepted connection
//! is split into its read and write halves, and each half gets its own async
//! task, so a slow client only ever stalls itself.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Listener                             │
//! │                     (server module)                         │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ accept()
//!                        ▼
//!           ┌────────────────────────┐
//!           │   For each client...   │
//!           └────────────┬───────────┘
//!                        │
//!                        │ spawn two tasks
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Session                              │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │ Read frame  │───>│ Execute cmd │───>│ Enqueue     │      │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘      │
//! │                                               │ bounded     │
//! │                                               ▼ queue       │
//! │                                      ┌─────────────┐        │
//! │                                      │ FlushLoop   │──> socket
//! │                                      └─────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Pipelining**: Requests keep being decoded while replies are in flight
//! - **Write batching**: Queued replies leave in a single write
//! - **Backpressure**: A full reply queue pauses decoding for that session
//! - **Statistics**: Tracks connection and command metrics

use tokio::sync::watch;

pub mod session;
pub mod writer;

// Re-export commonly used types
pub use session::{ConnectionError, ConnectionStats, Session, SessionId};
pub use writer::{
    reply_channel, FlushLoop, ReplyWriter, WriterError, WriterHandle, DEFAULT_MAX_BATCH,
    DEFAULT_QUEUE_CAPACITY,
};

/// Resolves once the flag is raised or its sender is dropped.
pub(crate) async fn signalled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|raised| *raised).await;
}

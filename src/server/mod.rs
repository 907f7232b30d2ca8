//! Server Core
//!
//! The [`Server`] owns a pre-bound [`Listener`], the sharded store, and the
//! session registry. [`Server::start`] runs the accept loop; every accepted
//! connection becomes a session with two tasks (read/dispatch and flush).
//! [`Server::stop`] tears everything down.
//!
//! ## Lifecycle
//!
//! ```text
//!   Created ──start()──> Started ──stop()──> Stopped
//!      │                                        ▲
//!      └────────────────stop()──────────────────┘
//! ```
//!
//! `Stopped` is terminal. A second `start` fails with
//! [`ServerError::AlreadyStarted`], a `start` after `stop` with
//! [`ServerError::Stopped`], and a second `stop` does nothing.

pub mod listener;
pub mod registry;

pub use listener::{Connection, Listener};

use crate::commands::CommandHandler;
use crate::connection::{
    reply_channel, signalled, ConnectionStats, Session, DEFAULT_MAX_BATCH,
    DEFAULT_QUEUE_CAPACITY,
};
use crate::protocol::reader::{DEFAULT_READ_BUFFER, DEFAULT_SCRATCH_CAPACITY};
use crate::protocol::FrameReader;
use crate::storage::{ShardedStore, DEFAULT_SHARDS};
use registry::{SessionHandle, SessionRegistry};
use std::io;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Server tuning knobs.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Number of store shards
    pub shards: usize,
    /// Replies a session may have queued before its reader is paused
    pub queue_capacity: usize,
    /// Maximum replies coalesced into one socket write
    pub max_batch: usize,
    /// Size of each session's socket read buffer
    pub read_buffer: usize,
    /// Bulk strings up to this size are copied; larger ones get their own buffer
    pub scratch_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            shards: DEFAULT_SHARDS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_batch: DEFAULT_MAX_BATCH,
            read_buffer: DEFAULT_READ_BUFFER,
            scratch_capacity: DEFAULT_SCRATCH_CAPACITY,
        }
    }
}

/// Errors returned by [`Server::start`] and [`Server::stop`].
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server is already started")]
    AlreadyStarted,

    #[error("server is stopped")]
    Stopped,

    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    #[error("failed to close listener: {0}")]
    Close(#[source] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Started,
    Stopped,
}

/// State shared with every session task.
struct Shared {
    store: Arc<ShardedStore>,
    registry: SessionRegistry,
    stats: Arc<ConnectionStats>,
    config: ServerConfig,
}

/// A sharded key-value server bound to one listener.
pub struct Server<L: Listener> {
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
    /// Present until `start` takes it; handed back when the accept loop is
    /// told to stop, so `stop` can close it.
    listener: Mutex<Option<L>>,
    shutdown_tx: watch::Sender<bool>,
    accept_done: watch::Sender<bool>,
}

impl<L: Listener> Server<L> {
    /// Creates a server with the default configuration.
    pub fn new(listener: L) -> Self {
        Self::with_config(listener, ServerConfig::default())
    }

    /// Creates a server with a custom configuration.
    pub fn with_config(listener: L, config: ServerConfig) -> Self {
        let shared = Shared {
            store: Arc::new(ShardedStore::with_shards(config.shards)),
            registry: SessionRegistry::new(),
            stats: Arc::new(ConnectionStats::new()),
            config,
        };

        Self {
            shared: Arc::new(shared),
            lifecycle: Mutex::new(Lifecycle::Created),
            listener: Mutex::new(Some(listener)),
            shutdown_tx: watch::Sender::new(false),
            accept_done: watch::Sender::new(false),
        }
    }

    /// The store backing this server.
    pub fn store(&self) -> &Arc<ShardedStore> {
        &self.shared.store
    }

    /// Connection and command counters.
    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.shared.stats
    }

    /// Number of sessions currently registered.
    pub fn session_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listener_slot(&self) -> MutexGuard<'_, Option<L>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs the accept loop until [`stop`](Self::stop) is called.
    ///
    /// # Errors
    ///
    /// - [`ServerError::AlreadyStarted`] if another `start` is running
    /// - [`ServerError::Stopped`] if the server has been stopped
    /// - [`ServerError::Accept`] if accepting fails; the listener is closed
    ///   before returning
    pub async fn start(&self) -> Result<(), ServerError> {
        let listener = {
            let mut state = self.lifecycle();
            match *state {
                Lifecycle::Started => return Err(ServerError::AlreadyStarted),
                Lifecycle::Stopped => return Err(ServerError::Stopped),
                Lifecycle::Created => {}
            }
            match self.listener_slot().take() {
                Some(listener) => {
                    *state = Lifecycle::Started;
                    listener
                }
                None => return Err(ServerError::Stopped),
            }
        };

        AcceptLoop {
            server: self,
            listener: Some(listener),
        }
        .run()
        .await
    }

    /// Stops the server: refuses new sessions, disconnects every live one,
    /// then closes the listener.
    ///
    /// Calling `stop` again is a no-op.
    pub async fn stop(&self) -> Result<(), ServerError> {
        let previous = std::mem::replace(&mut *self.lifecycle(), Lifecycle::Stopped);
        if previous == Lifecycle::Stopped {
            return Ok(());
        }

        self.shutdown_tx.send_replace(true);
        let sessions = self.shared.registry.close();

        if previous == Lifecycle::Started {
            signalled(&mut self.accept_done.subscribe()).await;
        }

        let listener = self.listener_slot().take();
        let closed = match listener {
            Some(listener) => listener.close(),
            None => Ok(()),
        };

        let stats = &self.shared.stats;
        info!(
            sessions,
            keys = self.shared.store.len(),
            accepted = stats.connections_accepted.load(Ordering::Relaxed),
            commands = stats.commands_processed.load(Ordering::Relaxed),
            bytes_written = stats.bytes_written.load(Ordering::Relaxed),
            "Server stopped"
        );

        closed.map_err(ServerError::Close)
    }
}

/// The running accept loop.
///
/// Dropping it hands the listener back to the server and wakes `stop`, also
/// when the `start` future is cancelled mid-accept.
struct AcceptLoop<'a, L: Listener> {
    server: &'a Server<L>,
    listener: Option<L>,
}

impl<L: Listener> AcceptLoop<'_, L> {
    async fn run(mut self) -> Result<(), ServerError> {
        let server = self.server;
        let Some(listener) = self.listener.as_ref() else {
            return Ok(());
        };

        match listener.local_addr() {
            Ok(addr) => info!(addr = %addr, "Accepting connections"),
            Err(e) => warn!(error = %e, "Accepting connections on unknown address"),
        }

        let mut shutdown = server.shutdown_tx.subscribe();
        let result = loop {
            let accepted = tokio::select! {
                biased;
                _ = signalled(&mut shutdown) => break Ok(()),
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((conn, peer)) => Shared::spawn_session(&server.shared, conn, peer),
                Err(e) => break Err(e),
            }
        };

        // On a clean exit the listener goes back to the server; stop closes it
        // once every session is torn down
        result.map_err(|e| {
            error!(error = %e, "Failed to accept connection");
            if let Some(listener) = self.listener.take() {
                if let Err(close_err) = listener.close() {
                    warn!(error = %close_err, "Failed to close listener");
                }
            }
            ServerError::Accept(e)
        })
    }
}

impl<L: Listener> Drop for AcceptLoop<'_, L> {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            *self.server.listener_slot() = Some(listener);
        }
        self.server.accept_done.send_replace(true);
        debug!("Accept loop finished");
    }
}

impl Shared {
    /// Registers a freshly accepted connection and spawns its two tasks.
    fn spawn_session<C: Connection>(shared: &Arc<Self>, conn: C, peer: String) {
        let config = &shared.config;
        let (read_half, write_half) = conn.into_split();
        let (replies, writer, flush) =
            reply_channel(write_half, config.queue_capacity, config.max_batch);
        let (handle, close_rx) = SessionHandle::new(peer.clone(), writer);

        let Some(id) = shared.registry.register(handle) else {
            // Dropping both halves closes the connection
            debug!(client = %peer, "Refusing connection, server is stopping");
            return;
        };
        shared.stats.connection_opened();

        let reader =
            FrameReader::with_capacity(read_half, config.read_buffer, config.scratch_capacity);
        let session = Session::new(
            id,
            peer,
            reader,
            CommandHandler::new(Arc::clone(&shared.store)),
            replies,
            close_rx,
            Arc::clone(&shared.stats),
        );

        let flush_shared = Arc::clone(shared);
        tokio::spawn(async move {
            match flush.run().await {
                Ok(written) => flush_shared.stats.bytes_written(written),
                Err(e) => warn!(session = %id, error = %e, "Flush loop failed"),
            }
            flush_shared.registry.disconnect(id);
        });

        let read_shared = Arc::clone(shared);
        tokio::spawn(async move {
            // Errors are logged by the session itself. After a clean end of
            // stream the flush task deregisters once the queue is drained.
            if session.run().await.is_err() {
                read_shared.registry.disconnect(id);
            }
            read_shared.stats.connection_closed();
        });
    }
}

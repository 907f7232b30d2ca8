//! Session Registry
//!
//! The registry maps live session ids to the handles needed to tear them
//! down. It is owned by the server and only reachable through the methods
//! below; the map itself never escapes the lock.
//!
//! Removal from the map is the single point where a session's teardown
//! handle changes hands. Whoever removes the entry performs the teardown;
//! everyone else finds nothing and does nothing.

use crate::connection::{SessionId, WriterHandle};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::debug;

/// Everything needed to tear a session down from outside its tasks.
#[derive(Debug)]
pub struct SessionHandle {
    peer: String,
    close_tx: watch::Sender<bool>,
    writer: WriterHandle,
}

impl SessionHandle {
    /// Creates a handle and the close signal the session's read loop watches.
    pub fn new(peer: String, writer: WriterHandle) -> (Self, watch::Receiver<bool>) {
        let (close_tx, close_rx) = watch::channel(false);
        (
            Self {
                peer,
                close_tx,
                writer,
            },
            close_rx,
        )
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Closes the read side, then aborts the writer so the write half is
    /// released even if the client stopped reading.
    fn shutdown(&self) {
        self.close_tx.send_replace(true);
        self.writer.abort();
    }
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<SessionId, SessionHandle>,
    last_id: u64,
    closed: bool,
}

/// Shared map of live sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // The lock is never held across a panic-prone call, so a poisoned
    // registry is still consistent.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocates the next id and registers `handle` under it.
    ///
    /// Returns `None` once the registry has been closed; the caller should
    /// drop the connection.
    pub fn register(&self, handle: SessionHandle) -> Option<SessionId> {
        let mut inner = self.lock();
        if inner.closed {
            return None;
        }

        inner.last_id += 1;
        let id = SessionId(inner.last_id);
        inner.sessions.insert(id, handle);
        Some(id)
    }

    /// Tears down a session if it is still registered.
    ///
    /// # Returns
    ///
    /// `true` if this call performed the teardown, `false` if the session
    /// was already gone.
    pub fn disconnect(&self, id: SessionId) -> bool {
        debug!(session = %id, "Disconnecting session");

        // Check and remove under one lock acquisition, tear down outside it
        let Some(handle) = self.lock().sessions.remove(&id) else {
            return false;
        };

        handle.shutdown();
        debug!(session = %id, peer = %handle.peer(), "Session torn down");
        true
    }

    /// Refuses further registrations and tears down every live session.
    ///
    /// # Returns
    ///
    /// The number of sessions torn down.
    pub fn close(&self) -> usize {
        let drained: Vec<(SessionId, SessionHandle)> = {
            let mut inner = self.lock();
            inner.closed = true;
            inner.sessions.drain().collect()
        };

        for (id, handle) in &drained {
            handle.shutdown();
            debug!(session = %id, peer = %handle.peer(), "Session torn down");
        }
        drained.len()
    }

    /// Returns true if the session is still registered.
    pub fn contains(&self, id: SessionId) -> bool {
        self.lock().sessions.contains_key(&id)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

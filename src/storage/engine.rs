//! Sharded Storage Engine
//!
//! This module implements the keyspace for sider: a fixed arena of shards,
//! each a `HashMap` behind its own `RwLock`.
//!
//! ## Design Decisions
//!
//! 1. **Fixed Shards**: The shard count is chosen at construction and never
//!    changes, so a key's shard is stable for the life of the process.
//! 2. **FNV-1a Placement**: Keys are assigned with a 64-bit FNV-1a hash. It
//!    is fast, deterministic across runs, and needs no per-process seed.
//! 3. **One Lock at a Time**: Every operation touches exactly one shard lock.
//!    Cross-shard deadlock is impossible; multi-key atomicity is not offered.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ShardedStore                            │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Readers of the same shard proceed in parallel; a writer excludes everyone
//! else on that shard only.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Default number of shards.
pub const DEFAULT_SHARDS: usize = 1000;

const FNV_OFFSET_BASIS: u64 = 14695981039346656037;
const FNV_PRIME: u64 = 1099511628211;

/// 64-bit FNV-1a hash of `key`.
#[inline]
pub fn fnv1a(key: &[u8]) -> u64 {
    key.iter().fold(FNV_OFFSET_BASIS, |hash, &b| {
        (hash ^ u64::from(b)).wrapping_mul(FNV_PRIME)
    })
}

/// Maps a key onto one of `shards` partitions.
#[inline]
pub fn shard_of(key: &[u8], shards: usize) -> usize {
    (fnv1a(key) % shards as u64) as usize
}

/// A single partition of the keyspace.
#[derive(Debug, Default)]
struct Shard {
    data: RwLock<HashMap<Bytes, Bytes>>,
}

impl Shard {
    // Every critical section leaves the map consistent, so a panic in
    // another holder is no reason to refuse access.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<Bytes, Bytes>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Bytes, Bytes>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Operation counters for the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of keys currently stored
    pub keys: u64,
    /// Total GET operations
    pub gets: u64,
    /// Total SET operations
    pub sets: u64,
    /// Total DEL operations
    pub deletes: u64,
}

/// The shared keyspace.
///
/// Wrap it in an `Arc` and hand a clone to every session. All operations are
/// thread-safe and none of them block on more than one shard.
///
/// # Example
///
/// ```
/// use sider::storage::ShardedStore;
/// use bytes::Bytes;
///
/// let store = ShardedStore::new();
///
/// store.set(Bytes::from("name"), Bytes::from("sider"));
/// assert_eq!(store.get(b"name"), Some(Bytes::from("sider")));
///
/// assert!(store.delete(b"name"));
/// assert_eq!(store.get(b"name"), None);
/// ```
pub struct ShardedStore {
    shards: Box<[Shard]>,

    key_count: AtomicU64,
    get_count: AtomicU64,
    set_count: AtomicU64,
    del_count: AtomicU64,
}

impl std::fmt::Debug for ShardedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedStore")
            .field("shards", &self.shards.len())
            .field("key_count", &self.key_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for ShardedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ShardedStore {
    /// Creates a store with [`DEFAULT_SHARDS`] partitions.
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    /// Creates a store with `shards` partitions (at least one).
    pub fn with_shards(shards: usize) -> Self {
        let shards = (0..shards.max(1)).map(|_| Shard::default()).collect();

        Self {
            shards,
            key_count: AtomicU64::new(0),
            get_count: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
        }
    }

    /// Number of partitions.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Determines which shard a key belongs to.
    #[inline]
    pub fn shard_index(&self, key: &[u8]) -> usize {
        shard_of(key, self.shards.len())
    }

    #[inline]
    fn shard(&self, key: &[u8]) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    /// Gets the value for a key.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.get_count.fetch_add(1, Ordering::Relaxed);
        self.shard(key).read().get(key).cloned()
    }

    /// Sets a key-value pair, overwriting any previous value.
    pub fn set(&self, key: Bytes, value: Bytes) {
        self.set_count.fetch_add(1, Ordering::Relaxed);

        let mut data = self.shard(&key).write();
        if data.insert(key, value).is_none() {
            self.key_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Deletes a key.
    ///
    /// # Returns
    ///
    /// Returns `true` if the key was deleted, `false` if it didn't exist.
    pub fn delete(&self, key: &[u8]) -> bool {
        self.del_count.fetch_add(1, Ordering::Relaxed);

        let mut data = self.shard(key).write();
        if data.remove(key).is_some() {
            self.key_count.fetch_sub(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Number of keys in the store.
    pub fn len(&self) -> u64 {
        self.key_count.load(Ordering::Relaxed)
    }

    /// Returns true if the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the operation counters.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.key_count.load(Ordering::Relaxed),
            gets: self.get_count.load(Ordering::Relaxed),
            sets: self.set_count.load(Ordering::Relaxed),
            deletes: self.del_count.load(Ordering::Relaxed),
        }
    }
}

//! Storage Engine Module
//!
//! The keyspace is a fixed array of shards, each a `HashMap` behind its own
//! `RwLock`. Keys are placed with FNV-1a modulo the shard count.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ShardedStore                            │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │...1000  │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod engine;

// Re-export commonly used types
pub use engine::{fnv1a, shard_of, ShardedStore, StorageStats, DEFAULT_SHARDS};

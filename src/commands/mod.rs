//! Command Handler Module
//!
//! This module implements the command processing layer for sider.
//! It receives decoded request arrays, executes them against the sharded
//! store, and returns the reply to enqueue.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  FrameReader    │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │  ShardedStore   │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - `GET`, `SET`, `DEL`

pub mod handler;

// Re-export the main command handler
pub use handler::CommandHandler;

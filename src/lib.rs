//! # sider - A Sharded, Pipelined In-Memory Key-Value Server
//!
//! sider serves `GET`, `SET` and `DEL` over a minimal subset of the RESP
//! wire protocol. It is built for many concurrent, pipelining clients: every
//! connection decodes requests and writes replies on separate tasks, and the
//! keyspace is split into independently locked shards.
//!
//! ## Features
//!
//! - **Streaming decoder**: Frames are decoded straight off the socket
//! - **Sharded storage**: 1000 shards by default, each behind its own RwLock
//! - **Batched replies**: Queued replies leave the process in one write
//! - **Backpressure**: A bounded reply queue pauses readers of slow clients
//! - **Pluggable listeners**: TCP and Unix-domain sockets out of the box
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               sider                                     │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │   Server    │───>│   Session   │───>│  Command    │                  │
//! │  │ (Listener)  │    │ read loop   │    │  Handler    │                  │
//! │  └──────┬──────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │         │                  │                  │                         │
//! │         ▼                  ▼                  ▼                         │
//! │  ┌─────────────┐    ┌─────────────┐  ┌────────────────────────────────┐ │
//! │  │  Session    │    │ FrameReader │  │         ShardedStore           │ │
//! │  │  Registry   │    │ (RESP)      │  │ ┌───────┐ ┌───────┐ ┌────────┐ │ │
//! │  └─────────────┘    └─────────────┘  │ │Shard 0│ │Shard 1│ │...999  │ │ │
//! │                                      │ │RwLock │ │RwLock │ │        │ │ │
//! │  ┌─────────────┐                     │ └───────┘ └───────┘ └────────┘ │ │
//! │  │ FlushLoop   │──> socket           └────────────────────────────────┘ │
//! │  │ (per client)│                                                        │
//! │  └─────────────┘                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use sider::Server;
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let listener = TcpListener::bind("127.0.0.1:3000").await?;
//!     let server = Arc::new(Server::new(listener));
//!
//!     let running = tokio::spawn({
//!         let server = Arc::clone(&server);
//!         async move { server.start().await }
//!     });
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await?;
//!     running.await??;
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `GET key` - bulk string, or `_` when the key is missing
//! - `SET key value` - always `+OK`
//! - `DEL key` - `+OK` if the key existed, `_` otherwise
//!
//! Verbs are case-insensitive. Bad arity or an unknown verb produces an
//! `-ERR` reply and the connection stays open; a malformed frame closes it.
//!
//! ## Module Overview
//!
//! - [`protocol`]: Frame types, reply encoding and the streaming decoder
//! - [`storage`]: FNV-1a sharded key-value store
//! - [`commands`]: Command dispatch
//! - [`connection`]: Per-session read loop and reply writer
//! - [`server`]: Listener abstraction, session registry, lifecycle

pub mod commands;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::CommandHandler;
pub use connection::ConnectionStats;
pub use protocol::{DecodeError, Frame, FrameReader, Reply};
pub use server::{Connection, Listener, Server, ServerConfig, ServerError};
pub use storage::ShardedStore;

/// The default port sider listens on
pub const DEFAULT_PORT: u16 = 3000;

/// The default host sider binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of sider
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! RESP Protocol Subset
//!
//! Requests are arrays of bulk strings; replies are status, error, bulk
//! string or null. Nothing else from RESP is understood.
//!
//! ## Modules
//!
//! - `types`: `Frame` (requests) and `Reply` (responses) with their encodings
//! - `reader`: streaming decoder that pulls one frame at a time off a socket
//!
//! ## Example
//!
//! ```ignore
//! use sider::protocol::{FrameReader, Reply};
//!
//! let mut reader = FrameReader::new(socket_read_half);
//! while let Some(frame) = reader.read_frame().await? {
//!     // dispatch...
//! }
//!
//! let bytes = Reply::Ok.into_bytes();
//! ```

pub mod reader;
pub mod types;

// Re-export commonly used types for convenience
pub use reader::{DecodeError, FrameReader};
pub use types::{Frame, Reply};

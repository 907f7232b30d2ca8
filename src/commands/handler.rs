//! Command Handler Module
//!
//! This module turns decoded request frames into store operations and
//! replies.
//!
//! ## Supported Commands
//!
//! - `GET key` - Bulk reply with the value, or null if absent
//! - `SET key value` - Overwrite the value, reply `+OK`
//! - `DEL key` - Reply `+OK` if the key existed, null otherwise
//!
//! Verbs are matched case-insensitively. Extra arguments are ignored.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │  execute()  │───>│  dispatch() │───>│   cmd_*()   │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │                                               │             │
//! │                                               ▼             │
//! │                                      ShardedStore           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Command errors are replies, never failures: the session always keeps
//! reading after an error reply.

use crate::protocol::{Frame, Reply};
use crate::storage::ShardedStore;
use bytes::Bytes;
use std::sync::Arc;

const ERR_MISSING_KEY: &str = "missing key";
const ERR_MISSING_KEY_AND_VALUE: &str = "missing key and value";
const ERR_UNKNOWN_COMMAND: &str = "unknown command";
const ERR_INVALID_ARGUMENT: &str = "invalid argument";

/// The verbs the server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Get,
    Set,
    Del,
}

impl Verb {
    fn parse(name: &[u8]) -> Option<Self> {
        if name.eq_ignore_ascii_case(b"GET") {
            Some(Verb::Get)
        } else if name.eq_ignore_ascii_case(b"SET") {
            Some(Verb::Set)
        } else if name.eq_ignore_ascii_case(b"DEL") {
            Some(Verb::Del)
        } else {
            None
        }
    }
}

/// Handles commands by dispatching them to the store.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    storage: Arc<ShardedStore>,
}

impl CommandHandler {
    /// Creates a new command handler over the given store.
    pub fn new(storage: Arc<ShardedStore>) -> Self {
        Self { storage }
    }

    /// Executes one command and returns its reply.
    ///
    /// # Arguments
    ///
    /// * `args` - The elements of the request array, verb first
    pub fn execute(&self, args: &[Frame]) -> Reply {
        let verb = match args.first().and_then(Frame::as_bulk) {
            Some(name) => Verb::parse(name),
            None => None,
        };

        match verb {
            Some(verb) => self.dispatch(verb, args),
            None => Reply::error(ERR_UNKNOWN_COMMAND),
        }
    }

    fn dispatch(&self, verb: Verb, args: &[Frame]) -> Reply {
        match verb {
            Verb::Get => self.cmd_get(args),
            Verb::Set => self.cmd_set(args),
            Verb::Del => self.cmd_del(args),
        }
    }

    /// GET key
    fn cmd_get(&self, args: &[Frame]) -> Reply {
        if args.len() < 2 {
            return Reply::error(ERR_MISSING_KEY);
        }

        let Some(key) = args[1].as_bulk() else {
            return Reply::error(ERR_INVALID_ARGUMENT);
        };

        match self.storage.get(key) {
            Some(value) => Reply::Bulk(value),
            None => Reply::Null,
        }
    }

    /// SET key value
    fn cmd_set(&self, args: &[Frame]) -> Reply {
        if args.len() < 3 {
            return Reply::error(ERR_MISSING_KEY_AND_VALUE);
        }

        let (Some(key), Some(value)) = (args[1].as_bulk(), args[2].as_bulk()) else {
            return Reply::error(ERR_INVALID_ARGUMENT);
        };

        // Bytes clones share the decoded buffer, no payload copy here
        self.storage.set(Bytes::clone(key), Bytes::clone(value));
        Reply::Ok
    }

    /// DEL key
    fn cmd_del(&self, args: &[Frame]) -> Reply {
        if args.len() < 2 {
            return Reply::error(ERR_MISSING_KEY);
        }

        let Some(key) = args[1].as_bulk() else {
            return Reply::error(ERR_INVALID_ARGUMENT);
        };

        if self.storage.delete(key) {
            Reply::Ok
        } else {
            Reply::Null
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_handler() -> CommandHandler {
        let storage = Arc::new(ShardedStore::new());
        CommandHandler::new(storage)
    }

    fn execute(handler: &CommandHandler, tokens: &[&str]) -> Reply {
        match Frame::command(tokens) {
            Frame::Array(args) => handler.execute(&args),
            Frame::Bulk(_) => unreachable!(),
        }
    }

    #[test]
    fn test_set_get() {
        let handler = create_handler();

        let response = execute(&handler, &["SET", "key", "value"]);
        assert_eq!(response, Reply::Ok);

        let response = execute(&handler, &["GET", "key"]);
        assert_eq!(response, Reply::Bulk(Bytes::from("value")));
    }

    #[test]
    fn test_get_nonexistent() {
        let handler = create_handler();

        let response = execute(&handler, &["GET", "nonexistent"]);
        assert_eq!(response, Reply::Null);
    }

    #[test]
    fn test_verbs_case_insensitive() {
        let handler = create_handler();

        assert_eq!(execute(&handler, &["set", "k", "v"]), Reply::Ok);
        assert_eq!(
            execute(&handler, &["gEt", "k"]),
            Reply::Bulk(Bytes::from("v"))
        );
        assert_eq!(execute(&handler, &["Del", "k"]), Reply::Ok);
    }

    #[test]
    fn test_del() {
        let handler = create_handler();

        execute(&handler, &["SET", "key1", "value1"]);

        assert_eq!(execute(&handler, &["DEL", "key1"]), Reply::Ok);
        assert_eq!(execute(&handler, &["GET", "key1"]), Reply::Null);
        assert_eq!(execute(&handler, &["DEL", "key1"]), Reply::Null);
    }

    #[test]
    fn test_arity_errors() {
        let handler = create_handler();

        let response = execute(&handler, &["GET"]);
        assert_eq!(response.into_bytes(), Bytes::from_static(b"-ERR missing key\r\n"));

        let response = execute(&handler, &["SET", "key"]);
        assert_eq!(
            response.into_bytes(),
            Bytes::from_static(b"-ERR missing key and value\r\n")
        );

        let response = execute(&handler, &["DEL"]);
        assert_eq!(response.into_bytes(), Bytes::from_static(b"-ERR missing key\r\n"));
    }

    #[test]
    fn test_extra_arguments_ignored() {
        let handler = create_handler();

        assert_eq!(execute(&handler, &["SET", "k", "v", "EX", "10"]), Reply::Ok);
        assert_eq!(
            execute(&handler, &["GET", "k", "other"]),
            Reply::Bulk(Bytes::from("v"))
        );
    }

    #[test]
    fn test_unknown_command() {
        let handler = create_handler();

        let response = execute(&handler, &["UNKNOWN"]);
        assert_eq!(
            response.into_bytes(),
            Bytes::from_static(b"-ERR unknown command\r\n")
        );
    }

    #[test]
    fn test_non_bulk_arguments() {
        let handler = create_handler();

        let nested = vec![
            Frame::Bulk(Bytes::from("GET")),
            Frame::Array(vec![Frame::Bulk(Bytes::from("k"))]),
        ];
        assert_eq!(handler.execute(&nested), Reply::error("invalid argument"));

        let verb_array = vec![Frame::Array(vec![])];
        assert_eq!(handler.execute(&verb_array), Reply::error("unknown command"));
    }

    #[test]
    fn test_binary_values() {
        let handler = create_handler();

        let args = vec![
            Frame::Bulk(Bytes::from("SET")),
            Frame::Bulk(Bytes::from("bin")),
            Frame::Bulk(Bytes::from(&b"\x00\r\n\xff"[..])),
        ];
        assert_eq!(handler.execute(&args), Reply::Ok);
        assert_eq!(
            execute(&handler, &["GET", "bin"]).into_bytes(),
            Bytes::from(&b"$4\r\n\x00\r\n\xff\r\n"[..])
        );
    }
}

//! High-level Database API and REPL interface.
//!
//! This module provides the user-facing [`Database`] handle, the version
//! chain it advances, value framing, and an interactive command interpreter.

mod api;
mod chain;
mod config;
mod error;
mod record;
mod repl;

pub use api::{Database, VALUE_LINK};
pub use chain::Head;
pub use config::{BackendKind, DatabaseConfig, DEFAULT_KEY_SIZE};
pub use error::{DatabaseError, DatabaseResult};
pub use record::{split, wrap, wrap_at, Entry, METADATA_LEN, SEPARATOR};
pub use repl::{Command, Outcome, ParseError, Repl, ReplConfig, ReplError};

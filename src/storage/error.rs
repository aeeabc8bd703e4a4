//! Storage backend error types
//!
//! Every backend reports failures through `BackendError`. The two main
//! classes are transport failures (the backend could not be reached) and
//! command failures (the backend answered and refused the request).

use thiserror::Error;

use crate::storage::types::InvalidNameError;

/// the main error type for backend operations
#[derive(Debug, Error)]
pub enum BackendError {
    /// backend unreachable, timed out or failed below the command level
    #[error("transport error: {0}")]
    Transport(String),

    /// the backend rejected the request
    #[error("{}", command_display(.command, .message, .code))]
    Command {
        command: String,
        message: String,
        code: i32,
    },

    /// nothing is stored at the requested path or name
    #[error("not found: {0}")]
    NotFound(String),

    /// the backend returned a hash or name we cannot represent
    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    /// a subscription was used after it was closed
    #[error("subscription closed: {0}")]
    SubscriptionClosed(String),

    /// I/O error (filesystem level)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    /// build a command error
    pub fn command(command: impl Into<String>, message: impl Into<String>, code: i32) -> Self {
        BackendError::Command {
            command: command.into(),
            message: message.into(),
            code,
        }
    }

    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound(_))
    }

    /// check if the backend could not be reached at all
    pub fn is_transport(&self) -> bool {
        matches!(self, BackendError::Transport(_) | BackendError::Io(_))
    }
}

fn command_display(command: &str, message: &str, code: &i32) -> String {
    let mut out = String::new();
    if !command.is_empty() {
        out.push_str(command);
        out.push_str(": ");
    }
    if *code != 0 {
        out.push_str(&format!("{}: ", code));
    }
    out.push_str(message);
    out
}

/// result type alias for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

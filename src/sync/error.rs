//! Replication error types.

use thiserror::Error;

use crate::storage::BackendError;
use crate::sync::operation::OperationError;

/// Result type for replication operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while starting, stopping or publishing.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("operation error: {0}")]
    Operation(#[from] OperationError),

    /// Replication is already running for another database.
    #[error("replication already running for '{0}'")]
    AlreadyRunning(String),

    #[error("replication is not running")]
    NotRunning,

    /// The listener thread could not be started.
    #[error("failed to spawn listener: {0}")]
    Spawn(#[from] std::io::Error),
}

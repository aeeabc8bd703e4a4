//! Database error types.

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::storage::{BackendError, InvalidNameError};
use crate::sync::SyncError;

/// Result type for database operations.
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Database errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("replication error: {0}")]
    Sync(#[from] SyncError),

    /// No database has been created or selected.
    #[error("no database in use")]
    NotOpen,

    /// The key has no link under the current head.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Nothing is published under the database's peer identity.
    #[error("no published head for database '{0}'")]
    HeadNotPublished(String),

    #[error("invalid key: {0}")]
    InvalidKey(#[from] InvalidNameError),

    /// Decrypted bytes do not carry record metadata.
    #[error("malformed value: {0}")]
    MalformedValue(String),

    /// The loaded keypair belongs to another database.
    #[error("identity '{identity}' does not belong to database '{database}'")]
    IdentityMismatch { identity: String, database: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DatabaseError {
    /// check if this error indicates the key or head doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DatabaseError::KeyNotFound(_) | DatabaseError::HeadNotPublished(_)
        )
    }

    /// check if this error came from encryption or key handling
    pub fn is_crypto(&self) -> bool {
        matches!(
            self,
            DatabaseError::Crypto(_) | DatabaseError::IdentityMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(DatabaseError::KeyNotFound("color".into()).is_not_found());
        assert!(DatabaseError::HeadNotPublished("db".into()).is_not_found());
        assert!(!DatabaseError::NotOpen.is_not_found());

        let crypto: DatabaseError = CryptoError::NoIdentity.into();
        assert!(crypto.is_crypto());
        assert!(!crypto.is_not_found());
    }
}

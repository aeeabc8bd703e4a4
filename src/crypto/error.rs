//! Crypto error types.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors raised by identities and the keystore.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The plaintext does not fit into a single RSA block.
    #[error("payload too large: {len} bytes exceeds the key's maximum of {max}")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("encryption failed: {0}")]
    Encrypt(String),

    /// Malformed ciphertext, or ciphertext produced by another key.
    #[error("decryption failed: {0}")]
    Decrypt(String),

    /// No persisted keypair, or one that cannot be parsed.
    #[error("failed to load key '{name}': {reason}")]
    KeyLoad { name: String, reason: String },

    /// An operation needed a loaded keypair.
    #[error("no identity loaded")]
    NoIdentity,

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("key encoding failed: {0}")]
    KeyEncoding(String),

    #[error("key '{name}' already exists at {path}")]
    KeyExists { name: String, path: PathBuf },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CryptoError {
    /// check if the error is about a missing or unusable keypair
    pub fn is_identity(&self) -> bool {
        matches!(self, CryptoError::KeyLoad { .. } | CryptoError::NoIdentity)
    }
}

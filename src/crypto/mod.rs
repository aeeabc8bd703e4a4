//! Cryptographic identity of a database.
//!
//! Each database name owns one RSA keypair. Values are encrypted with it
//! before they reach the backend, and its public key derives the peer
//! identity the head is published under.
//!
//! Holders that replicate the same database must hold the same keypair;
//! use [`Keystore::export`] and [`Keystore::import`] to distribute it.

mod error;
mod identity;
mod keystore;

pub use error::{CryptoError, CryptoResult};
pub use identity::Identity;
pub use keystore::{key_path, read_key_file, write_key_file, KeySource, Keystore};

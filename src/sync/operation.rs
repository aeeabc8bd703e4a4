//! Replication records.
//!
//! An operation describes a mutation by reference: a `set` names the hash of
//! a value object the sender already stored, a `del` names only the key.
//! Receivers never see plaintext or ciphertext on the channel.
//!
//! Wire format (JSON):
//! ```text
//! {"type":"set","database":"dbname","key":"x","hash":"Qm...","origin":"01J..."}
//! ```
//! Capitalized field names are accepted on input.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::{ContentHash, InvalidNameError, RecordKey};

/// Kind of mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    #[serde(alias = "Set", alias = "SET")]
    Set,
    #[serde(alias = "Del", alias = "DEL")]
    Del,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Set => write!(f, "set"),
            OperationKind::Del => write!(f, "del"),
        }
    }
}

/// A replicated mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "type", alias = "Type")]
    pub kind: OperationKind,
    #[serde(alias = "Database")]
    pub database: String,
    #[serde(alias = "Key")]
    pub key: String,
    /// value object hash, present for `set` only
    #[serde(default, alias = "Hash", skip_serializing_if = "Option::is_none")]
    pub hash: Option<ContentHash>,
    /// replicator that sent the operation
    #[serde(default, alias = "Origin", skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

/// Why an inbound operation was rejected.
#[derive(Debug, Error)]
pub enum OperationError {
    #[error("invalid operation json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("set operation without a value hash")]
    MissingHash,

    #[error("invalid key: {0}")]
    InvalidKey(#[from] InvalidNameError),
}

impl Operation {
    pub fn set(database: impl Into<String>, key: &RecordKey, hash: ContentHash) -> Self {
        Self {
            kind: OperationKind::Set,
            database: database.into(),
            key: key.to_string(),
            hash: Some(hash),
            origin: None,
        }
    }

    pub fn del(database: impl Into<String>, key: &RecordKey) -> Self {
        Self {
            kind: OperationKind::Del,
            database: database.into(),
            key: key.to_string(),
            hash: None,
            origin: None,
        }
    }

    /// tag the operation with the sending replicator
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// validated record key
    pub fn record_key(&self) -> Result<RecordKey, InvalidNameError> {
        RecordKey::new(self.key.as_str())
    }

    /// serialize for the wire
    pub fn encode(&self) -> Result<String, OperationError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse and validate an inbound payload.
    pub fn decode(payload: &str) -> Result<Self, OperationError> {
        let op: Operation = serde_json::from_str(payload)?;
        op.record_key()?;
        match (&op.kind, &op.hash) {
            (OperationKind::Set, None) => return Err(OperationError::MissingHash),
            // serde does not run the hash constructor
            (_, Some(hash)) => {
                ContentHash::new(hash.as_str())?;
            }
            (OperationKind::Del, None) => {}
        }
        Ok(op)
    }
}

//! core type-safe wrappers shared by the storage backends.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Content hash of an immutable object in the backend store.
///
/// The textual form is backend specific (hex git oids, base58 multihashes)
/// but never contains a `/`, so a hash can always start a backend path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// parse a hash, rejecting empty strings and path separators
    pub fn new(hash: impl Into<String>) -> Result<Self, InvalidNameError> {
        let hash = hash.into();
        if hash.is_empty() {
            return Err(InvalidNameError::Empty);
        }
        if let Some(position) = hash.find(|c: char| c == '/' || c.is_whitespace()) {
            let char = hash[position..].chars().next().unwrap_or('/');
            return Err(InvalidNameError::InvalidCharacter { char, position });
        }
        Ok(Self(hash))
    }

    /// extract the hash from a resolved name path such as `/git/<hash>`
    pub fn from_path(path: &str) -> Result<Self, InvalidNameError> {
        let last = path.rsplit('/').next().unwrap_or_default();
        Self::new(last)
    }

    /// base58 form of a multihash; the base58 alphabet has no separators
    pub(crate) fn from_multihash(multihash: &[u8]) -> Self {
        Self(bs58::encode(multihash).into_string())
    }

    /// get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// short form for log lines
    pub fn short(&self) -> &str {
        let end = self.0.char_indices().nth(10).map(|(i, _)| i).unwrap_or(self.0.len());
        &self.0[..end]
    }

    /// path to a named link below this object
    pub fn join(&self, segment: &str) -> String {
        format!("{}/{}", self.0, segment)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ContentHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A validated record key.
///
/// Keys become link names inside root objects, so they are restricted the
/// same way a single path segment is:
/// - 1-255 bytes
/// - no `/` and no control characters
/// - not `.` or `..`
/// - not a name git reserves for its own directory (`.git`, `git~1`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey(String);

impl RecordKey {
    /// the self-descriptive key every database root carries
    pub const DATABASE_NAME: &'static str = "__database_name";

    const MAX_LEN: usize = 255;

    /// create a new RecordKey, validating the input
    pub fn new(key: impl Into<String>) -> Result<Self, InvalidNameError> {
        let key = key.into();
        Self::validate(&key)?;
        Ok(Self(key))
    }

    /// the reserved database-name key
    pub fn database_name() -> Self {
        Self(Self::DATABASE_NAME.to_string())
    }

    fn validate(key: &str) -> Result<(), InvalidNameError> {
        if key.is_empty() {
            return Err(InvalidNameError::Empty);
        }

        if key.len() > Self::MAX_LEN {
            return Err(InvalidNameError::TooLong(key.len()));
        }

        if key == "." || key == ".." {
            return Err(InvalidNameError::InvalidPath(key.to_string()));
        }

        for (i, c) in key.chars().enumerate() {
            if c == '/' || c.is_control() {
                return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
            }
        }

        if is_git_dir_alias(key) {
            return Err(InvalidNameError::InvalidPath(key.to_string()));
        }

        Ok(())
    }

    /// check if the key belongs to the database rather than the caller
    pub fn is_reserved(&self) -> bool {
        self.0 == Self::DATABASE_NAME
    }

    /// get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// convert to owned String
    pub fn into_string(self) -> String {
        self.0
    }
}

/// Names git refuses as tree entries: `.git` in any case, its 8.3 short
/// name `git~1`, either with trailing dots or spaces or an NTFS stream
/// suffix, and `.git` spelled with HFS-ignorable code points.
fn is_git_dir_alias(key: &str) -> bool {
    let folded: String = key
        .chars()
        .filter(|c| !is_hfs_ignorable(*c))
        .collect::<String>()
        .to_ascii_lowercase();
    if folded == ".git" {
        return true;
    }

    let stem = folded.split(':').next().unwrap_or_default();
    let stem = stem.trim_end_matches(['.', ' ']);
    stem == ".git" || stem == "git~1"
}

fn is_hfs_ignorable(c: char) -> bool {
    matches!(c, '\u{200c}'..='\u{200f}' | '\u{202a}'..='\u{202e}' | '\u{206a}'..='\u{206f}' | '\u{feff}')
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RecordKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Options for [`Backend::put`](crate::storage::Backend::put).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    /// store the blob as the single `name` entry of a new directory node
    /// and return the directory's hash instead of the blob's
    pub wrap_with_directory: Option<String>,
}

impl PutOptions {
    /// plain blob
    pub fn blob() -> Self {
        Self::default()
    }

    /// blob wrapped in a directory under `name`
    pub fn wrapped(name: impl Into<String>) -> Self {
        Self {
            wrap_with_directory: Some(name.into()),
        }
    }
}

/// Parameters for provisioning a keypair in a backend keystore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyOptions {
    /// RSA modulus size in bits
    pub bits: usize,
}

impl KeyOptions {
    pub fn rsa(bits: usize) -> Self {
        Self { bits }
    }
}

/// A naming record returned by a publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameRecord {
    /// the identity the value is published under
    pub name: String,
    /// the published path, e.g. `/git/<hash>`
    pub value: String,
}

/// error type for invalid names (keys, hashes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidNameError {
    Empty,
    TooLong(usize),
    InvalidCharacter { char: char, position: usize },
    Reserved(String),
    InvalidPath(String),
}

impl fmt::Display for InvalidNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "name cannot be empty"),
            Self::TooLong(len) => write!(f, "name too long: {} bytes", len),
            Self::InvalidCharacter { char, position } => {
                write!(f, "invalid character {:?} at position {}", char, position)
            }
            Self::Reserved(name) => write!(f, "'{}' is a reserved name", name),
            Self::InvalidPath(path) => write!(f, "invalid path: '{}'", path),
        }
    }
}

impl std::error::Error for InvalidNameError {}

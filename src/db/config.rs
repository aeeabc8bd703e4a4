//! Database configuration.

use std::path::PathBuf;

use super::error::{DatabaseError, DatabaseResult};
use crate::crypto::Keystore;

/// Default RSA modulus size for new databases.
pub const DEFAULT_KEY_SIZE: usize = 2048;

const MIN_KEY_SIZE: usize = 512;
const MAX_KEY_SIZE: usize = 16384;

/// Which object store backs the database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackendKind {
    /// bare git repository on disk
    #[default]
    Git,
    /// process-local store, gone on exit
    Memory,
}

/// Database configuration options.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the object store.
    pub path: PathBuf,
    /// Key directory; `<path>/keystore` when unset.
    pub keystore: Option<PathBuf>,
    /// Generate throwaway keys instead of reading the key directory.
    pub ephemeral_keys: bool,
    /// Key size used by `create` when none is given.
    pub key_size: usize,
    /// Object store implementation.
    pub backend: BackendKind,
    /// Enable verbose logging.
    pub verbose: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".prismdb"),
            keystore: None,
            ephemeral_keys: false,
            key_size: DEFAULT_KEY_SIZE,
            backend: BackendKind::Git,
            verbose: false,
        }
    }
}

impl DatabaseConfig {
    /// Create a new configuration with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Resolve the configuration from the process environment.
    ///
    /// Only the binary calls this, once, at startup.
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let path = var("PRISMDB_PATH").map(PathBuf::from).unwrap_or_else(|| {
            var("HOME")
                .map(|home| PathBuf::from(home).join(".prismdb"))
                .unwrap_or_else(|| PathBuf::from(".prismdb"))
        });
        Self {
            keystore: var("PRISMDB_KEYSTORE").map(PathBuf::from),
            ..Self::new(path)
        }
    }

    /// Set the key directory.
    pub fn keystore_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.keystore = Some(dir.into());
        self
    }

    /// Set ephemeral_keys flag.
    pub fn ephemeral_keys(mut self, value: bool) -> Self {
        self.ephemeral_keys = value;
        self
    }

    /// Set the default key size.
    pub fn key_size(mut self, bits: usize) -> Self {
        self.key_size = bits;
        self
    }

    /// Set the backend kind.
    pub fn backend(mut self, kind: BackendKind) -> Self {
        self.backend = kind;
        self
    }

    /// Set verbose flag.
    pub fn verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    /// The effective key directory.
    pub fn keystore_path(&self) -> PathBuf {
        self.keystore.clone().unwrap_or_else(|| self.path.join("keystore"))
    }

    /// Build the keystore this configuration describes.
    pub fn open_keystore(&self) -> Keystore {
        if self.ephemeral_keys {
            Keystore::ephemeral(self.key_size)
        } else {
            Keystore::directory(self.keystore_path())
        }
    }

    pub fn validate(&self) -> DatabaseResult<()> {
        validate_key_size(self.key_size)
    }
}

pub(crate) fn validate_key_size(bits: usize) -> DatabaseResult<()> {
    if !(MIN_KEY_SIZE..=MAX_KEY_SIZE).contains(&bits) {
        return Err(DatabaseError::InvalidConfig(format!(
            "key size {} outside {}..={}",
            bits, MIN_KEY_SIZE, MAX_KEY_SIZE
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeySource;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = DatabaseConfig::new("/tmp/db");
        assert_eq!(config.key_size, DEFAULT_KEY_SIZE);
        assert_eq!(config.backend, BackendKind::Git);
        assert_eq!(config.keystore_path(), PathBuf::from("/tmp/db/keystore"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = DatabaseConfig::new("/tmp/db")
            .keystore_dir("/tmp/keys")
            .ephemeral_keys(true)
            .key_size(1024)
            .backend(BackendKind::Memory)
            .verbose(true);
        assert_eq!(config.keystore_path(), PathBuf::from("/tmp/keys"));
        assert_eq!(config.open_keystore().source(), &KeySource::Ephemeral { bits: 1024 });
        assert!(config.verbose);
    }

    #[test]
    fn test_from_vars() {
        let config = DatabaseConfig::from_vars(vars(&[("HOME", "/home/ada")]));
        assert_eq!(config.path, PathBuf::from("/home/ada/.prismdb"));
        assert_eq!(config.keystore_path(), PathBuf::from("/home/ada/.prismdb/keystore"));

        let config = DatabaseConfig::from_vars(vars(&[
            ("HOME", "/home/ada"),
            ("PRISMDB_PATH", "/srv/prism"),
            ("PRISMDB_KEYSTORE", "/srv/keys"),
        ]));
        assert_eq!(config.path, PathBuf::from("/srv/prism"));
        assert_eq!(
            config.open_keystore().source(),
            &KeySource::Directory(PathBuf::from("/srv/keys"))
        );

        let config = DatabaseConfig::from_vars(vars(&[]));
        assert_eq!(config.path, PathBuf::from(".prismdb"));
    }

    #[test]
    fn test_key_size_bounds() {
        assert!(DatabaseConfig::default().key_size(256).validate().is_err());
        assert!(DatabaseConfig::default().key_size(4096).validate().is_ok());
        assert!(validate_key_size(32768).is_err());
    }
}

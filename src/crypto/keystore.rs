//! Keystore: loads the identity of the database in use.
//!
//! Keys live as PKCS#8 DER files named after the database inside a keystore
//! directory. In ephemeral mode nothing touches disk and every load of a new
//! name generates a fresh keypair, which is only useful for tests.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::crypto::error::{CryptoError, CryptoResult};
use crate::crypto::identity::Identity;

/// Where keypairs come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// persisted keys under this directory
    Directory(PathBuf),
    /// generated on load, never persisted
    Ephemeral { bits: usize },
}

/// Holds the currently loaded identity.
#[derive(Debug)]
pub struct Keystore {
    source: KeySource,
    current: Option<Arc<Identity>>,
}

impl Keystore {
    pub fn new(source: KeySource) -> Self {
        Self { source, current: None }
    }

    /// keystore backed by a directory
    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self::new(KeySource::Directory(path.into()))
    }

    /// keystore that generates keys on demand
    pub fn ephemeral(bits: usize) -> Self {
        Self::new(KeySource::Ephemeral { bits })
    }

    pub fn source(&self) -> &KeySource {
        &self.source
    }

    /// check if keys survive the process
    pub fn is_persistent(&self) -> bool {
        matches!(self.source, KeySource::Directory(_))
    }

    /// Load the identity for `name`.
    ///
    /// Returns immediately when `name` is already loaded.
    pub fn load(&mut self, name: &str) -> CryptoResult<Arc<Identity>> {
        if let Some(current) = self.current.as_ref().filter(|id| id.name() == name) {
            return Ok(current.clone());
        }

        let identity = match &self.source {
            KeySource::Directory(dir) => read_key_file(dir, name)?,
            KeySource::Ephemeral { bits } => Identity::generate(name, *bits)?,
        };
        debug!(name, bits = identity.bits(), "identity loaded");
        Ok(self.install(identity))
    }

    /// Generate and load a new identity for `name`.
    ///
    /// Persistent keystores refuse to overwrite an existing key file.
    pub fn generate(&mut self, name: &str, bits: usize) -> CryptoResult<Arc<Identity>> {
        let identity = Identity::generate(name, bits)?;
        if let KeySource::Directory(dir) = &self.source {
            write_key_file(dir, &identity)?;
        }
        debug!(name, bits, "identity generated");
        Ok(self.install(identity))
    }

    /// Export the PKCS#8 DER of `name` for out-of-band distribution.
    pub fn export(&self, name: &str) -> CryptoResult<Vec<u8>> {
        match &self.source {
            KeySource::Directory(dir) => Ok(fs::read(key_path(dir, name)?)?),
            KeySource::Ephemeral { .. } => match &self.current {
                Some(current) if current.name() == name => current.to_pkcs8_der(),
                _ => Err(CryptoError::KeyLoad {
                    name: name.to_string(),
                    reason: "not loaded".to_string(),
                }),
            },
        }
    }

    /// Install a keypair received out of band under `name` and load it.
    pub fn import(&mut self, name: &str, der: &[u8]) -> CryptoResult<Arc<Identity>> {
        let identity = Identity::from_pkcs8_der(name, der)?;
        if let KeySource::Directory(dir) = &self.source {
            write_key_file(dir, &identity)?;
        }
        Ok(self.install(identity))
    }

    /// the loaded identity
    pub fn current(&self) -> CryptoResult<Arc<Identity>> {
        self.current.clone().ok_or(CryptoError::NoIdentity)
    }

    /// forget the loaded identity
    pub fn unload(&mut self) {
        self.current = None;
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        self.current()?.encrypt(plaintext)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
        self.current()?.decrypt(ciphertext)
    }

    pub fn peer_id(&self) -> CryptoResult<String> {
        self.current()?.peer_id()
    }

    fn install(&mut self, identity: Identity) -> Arc<Identity> {
        let identity = Arc::new(identity);
        self.current = Some(identity.clone());
        identity
    }
}

/// Path of the key file for `name` inside `dir`.
pub fn key_path(dir: &Path, name: &str) -> CryptoResult<PathBuf> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(CryptoError::KeyLoad {
            name: name.to_string(),
            reason: "invalid key name".to_string(),
        });
    }
    Ok(dir.join(name))
}

/// Read and parse the key file for `name`.
pub fn read_key_file(dir: &Path, name: &str) -> CryptoResult<Identity> {
    let path = key_path(dir, name)?;
    let der = fs::read(&path).map_err(|e| CryptoError::KeyLoad {
        name: name.to_string(),
        reason: format!("{}: {}", path.display(), e),
    })?;
    Identity::from_pkcs8_der(name, &der)
}

/// Persist `identity` under its name. Fails if the file already exists.
pub fn write_key_file(dir: &Path, identity: &Identity) -> CryptoResult<PathBuf> {
    let path = key_path(dir, identity.name())?;
    fs::create_dir_all(dir)?;

    let der = identity.to_pkcs8_der()?;
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::AlreadyExists {
            CryptoError::KeyExists {
                name: identity.name().to_string(),
                path: path.clone(),
            }
        } else {
            CryptoError::Io(e)
        }
    })?;
    file.write_all(&der)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::identity::tests::test_identity;
    use tempfile::TempDir;

    fn persisted(dir: &Path, name: &str) -> Identity {
        let der = test_identity().to_pkcs8_der().unwrap();
        let identity = Identity::from_pkcs8_der(name, &der).unwrap();
        write_key_file(dir, &identity).unwrap();
        identity
    }

    #[test]
    fn test_load_from_directory() {
        let dir = TempDir::new().unwrap();
        let expected = persisted(dir.path(), "dbname");

        let mut keystore = Keystore::directory(dir.path());
        let identity = keystore.load("dbname").unwrap();
        assert_eq!(identity.name(), "dbname");
        assert_eq!(identity.peer_id().unwrap(), expected.peer_id().unwrap());
        assert_eq!(keystore.peer_id().unwrap(), expected.peer_id().unwrap());
    }

    #[test]
    fn test_load_missing_key_fails() {
        let dir = TempDir::new().unwrap();
        let mut keystore = Keystore::directory(dir.path());
        let err = keystore.load("missing").unwrap_err();
        assert!(matches!(err, CryptoError::KeyLoad { .. }));
        assert!(matches!(keystore.current(), Err(CryptoError::NoIdentity)));
    }

    #[test]
    fn test_load_is_idempotent() {
        let mut keystore = Keystore::ephemeral(1024);
        let first = keystore.load("dbname").unwrap();
        let second = keystore.load("dbname").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_ephemeral_load_switches_identity() {
        let mut keystore = Keystore::ephemeral(1024);
        let a = keystore.load("a").unwrap();
        let b = keystore.load("b").unwrap();
        assert_ne!(a.peer_id().unwrap(), b.peer_id().unwrap());
        assert_eq!(keystore.current().unwrap().name(), "b");
    }

    #[test]
    fn test_operations_without_identity() {
        let keystore = Keystore::ephemeral(1024);
        assert!(matches!(keystore.peer_id(), Err(CryptoError::NoIdentity)));
        assert!(matches!(keystore.encrypt(b"x"), Err(CryptoError::NoIdentity)));
    }

    #[test]
    fn test_write_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let identity = persisted(dir.path(), "dbname");
        let err = write_key_file(dir.path(), &identity).unwrap_err();
        assert!(matches!(err, CryptoError::KeyExists { .. }));
    }

    #[test]
    fn test_export_import_shares_keypair() {
        let source_dir = TempDir::new().unwrap();
        let target_dir = TempDir::new().unwrap();
        persisted(source_dir.path(), "shared");

        let source = Keystore::directory(source_dir.path());
        let der = source.export("shared").unwrap();

        let mut target = Keystore::directory(target_dir.path());
        let imported = target.import("shared", &der).unwrap();
        assert!(target_dir.path().join("shared").exists());

        let mut reloaded = Keystore::directory(source_dir.path());
        let original = reloaded.load("shared").unwrap();
        let enc = original.encrypt(b"hello").unwrap();
        assert_eq!(imported.decrypt(&enc).unwrap(), b"hello");
    }

    #[test]
    fn test_invalid_key_names() {
        let dir = TempDir::new().unwrap();
        assert!(key_path(dir.path(), "../escape").is_err());
        assert!(key_path(dir.path(), "").is_err());
        assert!(key_path(dir.path(), "ok").is_ok());
    }
}

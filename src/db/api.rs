//! Database API - high-level interface for PrismDB.
//!
//! A [`Database`] is `Unopened` until `create` or `use_database` succeeds,
//! and falls back to `Unopened` whenever either fails. Values are framed
//! with their write time, encrypted with the database's public key and
//! stored as a `value` link inside a fresh directory, which is then linked
//! under the record key on a new root.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::chain::{Head, VersionChain};
use super::config::{validate_key_size, BackendKind, DatabaseConfig};
use super::error::{DatabaseError, DatabaseResult};
use super::record::{self, Entry};
use crate::crypto::{Identity, Keystore};
use crate::storage::{
    Backend, ContentHash, GitBackend, InvalidNameError, KeyOptions, MemoryBackend, NameRecord, PutOptions,
    RecordKey,
};
use crate::sync::{ListenerStats, Operation, Replicator};

/// name of the link holding the ciphertext inside a value directory
pub const VALUE_LINK: &str = "value";

/// The main database handle.
pub struct Database<B: Backend = GitBackend> {
    config: DatabaseConfig,
    backend: Arc<B>,
    keystore: Keystore,
    chain: Arc<VersionChain<B>>,
    replicator: Replicator,
}

impl Database<GitBackend> {
    /// Open the object store at the given path.
    pub fn open(path: impl AsRef<Path>) -> DatabaseResult<Self> {
        Self::open_with_config(DatabaseConfig::new(path.as_ref()))
    }

    /// Open the object store with custom configuration.
    pub fn open_with_config(config: DatabaseConfig) -> DatabaseResult<Self> {
        if config.backend != BackendKind::Git {
            return Err(DatabaseError::InvalidConfig(format!(
                "expected a git backend, got {:?}",
                config.backend
            )));
        }
        let backend = GitBackend::open_or_init(&config.path, config.keystore_path())?;
        Self::with_backend(config, backend)
    }
}

impl Database<MemoryBackend> {
    /// Create a process-local database.
    pub fn in_memory(config: DatabaseConfig) -> DatabaseResult<Self> {
        let backend = if config.ephemeral_keys {
            MemoryBackend::new()
        } else {
            MemoryBackend::with_keystore(config.keystore_path())
        };
        Self::with_backend(config.backend(BackendKind::Memory), backend)
    }
}

impl<B: Backend> Database<B> {
    /// Wrap an existing backend. The keystore comes from `config`.
    pub fn with_backend(config: DatabaseConfig, backend: B) -> DatabaseResult<Self> {
        config.validate()?;
        let backend = Arc::new(backend);
        Ok(Self {
            keystore: config.open_keystore(),
            chain: Arc::new(VersionChain::new(backend.clone())),
            backend,
            replicator: Replicator::new(),
            config,
        })
    }

    /// Provision a keypair for `name` and open a new database holding only
    /// the reserved name record. Returns the first head.
    pub fn create(&mut self, name: &str, key_size: usize) -> DatabaseResult<ContentHash> {
        self.replicator.stop();
        self.chain.close();

        match self.try_create(name, key_size) {
            Ok(head) => {
                info!(database = name, head = %head, bits = key_size, "database created");
                Ok(head)
            }
            Err(e) => {
                self.reset();
                Err(e)
            }
        }
    }

    fn try_create(&mut self, name: &str, key_size: usize) -> DatabaseResult<ContentHash> {
        validate_key_size(key_size)?;
        RecordKey::new(name)?;

        self.keystore.unload();
        let identity = if self.keystore.is_persistent() {
            self.backend.key_generate(name, &KeyOptions::rsa(key_size))?;
            self.keystore.load(name)?
        } else {
            self.keystore.generate(name, key_size)?
        };

        let root = self.backend.empty_directory()?;
        let value = self.store_value(&identity, name.as_bytes())?;
        let head = self.backend.link_add(&root, RecordKey::DATABASE_NAME, &value)?;
        self.chain.open(Head {
            database: name.to_string(),
            hash: head.clone(),
        });
        Ok(head)
    }

    /// Open an existing database at the head last published under its
    /// identity. Using the open database again re-reads the published head.
    pub fn use_database(&mut self, name: &str) -> DatabaseResult<ContentHash> {
        if self.replicator.database().is_some_and(|db| db != name) {
            self.replicator.stop();
        }

        match self.try_use(name) {
            Ok(head) => {
                info!(database = name, head = %head, "database opened");
                Ok(head)
            }
            Err(e) => {
                self.reset();
                Err(e)
            }
        }
    }

    fn try_use(&mut self, name: &str) -> DatabaseResult<ContentHash> {
        let identity = self.keystore.load(name)?;
        let peer = identity.peer_id()?;
        let path = self.backend.name_resolve(&peer).map_err(|e| {
            if e.is_not_found() {
                DatabaseError::HeadNotPublished(name.to_string())
            } else {
                e.into()
            }
        })?;

        let hash = ContentHash::from_path(&path)?;
        self.chain.open(Head {
            database: name.to_string(),
            hash: hash.clone(),
        });
        Ok(hash)
    }

    /// Store `value` under `key`. Returns the new head.
    pub fn set(&self, key: &str, value: &[u8]) -> DatabaseResult<ContentHash> {
        let key = writable_key(key)?;
        let head = self.require_open()?;
        let identity = self.identity_for(&head.database)?;

        let value_hash = self.store_value(&identity, value)?;
        let new_head = self.chain.link(&head.database, &key, &value_hash)?;
        debug!(database = %head.database, key = %key, head = %new_head.short(), "set");

        self.broadcast(Operation::set(head.database, &key, value_hash));
        Ok(new_head)
    }

    /// Read the value under `key` at the current head.
    pub fn get(&self, key: &str) -> DatabaseResult<Entry> {
        let key = RecordKey::new(key)?;
        let head = self.require_open()?;
        let identity = self.identity_for(&head.database)?;

        let path = format!("{}/{}/{}", head.hash, key, VALUE_LINK);
        let sealed = self.backend.get(&path).map_err(|e| {
            if e.is_not_found() {
                DatabaseError::KeyNotFound(key.to_string())
            } else {
                e.into()
            }
        })?;
        record::split(&identity.decrypt(&sealed)?)
    }

    /// Remove `key`. Returns the new head.
    pub fn del(&self, key: &str) -> DatabaseResult<ContentHash> {
        let key = writable_key(key)?;
        let head = self.require_open()?;

        let new_head = self.chain.unlink(&head.database, &key)?;
        debug!(database = %head.database, key = %key, head = %new_head.short(), "del");

        self.broadcast(Operation::del(head.database, &key));
        Ok(new_head)
    }

    /// Publish the current head under the database's identity.
    pub fn save(&self) -> DatabaseResult<NameRecord> {
        let head = self.require_open()?;
        let peer = self.identity_for(&head.database)?.peer_id()?;
        let record = self.backend.name_publish(&head.hash, &peer)?;
        info!(database = %head.database, name = %record.name, value = %record.value, "head published");
        Ok(record)
    }

    /// Start replicating the open database.
    pub fn start_sync(&mut self) -> DatabaseResult<()> {
        let head = self.require_open()?;
        self.replicator
            .start(self.backend.as_ref(), &head.database, self.chain.clone())?;
        Ok(())
    }

    /// Stop replicating. Returns the listener's stats if it was running.
    pub fn stop_sync(&mut self) -> Option<ListenerStats> {
        self.replicator.stop()
    }

    pub fn is_syncing(&self) -> bool {
        self.replicator.is_running()
    }

    /// Export the open database's keypair for another holder.
    pub fn export_identity(&self) -> DatabaseResult<Vec<u8>> {
        let head = self.require_open()?;
        Ok(self.keystore.export(&head.database)?)
    }

    /// Install a keypair received from another holder.
    ///
    /// The open database is closed; follow with `use_database(name)`.
    pub fn import_identity(&mut self, name: &str, der: &[u8]) -> DatabaseResult<String> {
        self.reset();
        let identity = self.keystore.import(name, der)?;
        Ok(identity.peer_id()?)
    }

    /// name of the open database
    pub fn name(&self) -> Option<String> {
        self.chain.snapshot().map(|head| head.database)
    }

    /// current head
    pub fn head(&self) -> Option<ContentHash> {
        self.chain.snapshot().map(|head| head.hash)
    }

    pub fn is_open(&self) -> bool {
        self.chain.snapshot().is_some()
    }

    /// Peer identity the open database publishes under.
    pub fn peer_identity(&self) -> DatabaseResult<String> {
        let head = self.require_open()?;
        Ok(self.identity_for(&head.database)?.peer_id()?)
    }

    /// Get the configuration.
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Get the backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn require_open(&self) -> DatabaseResult<Head> {
        self.chain.snapshot().ok_or(DatabaseError::NotOpen)
    }

    fn identity_for(&self, database: &str) -> DatabaseResult<Arc<Identity>> {
        let identity = self.keystore.current()?;
        if identity.name() != database {
            return Err(DatabaseError::IdentityMismatch {
                identity: identity.name().to_string(),
                database: database.to_string(),
            });
        }
        Ok(identity)
    }

    fn store_value(&self, identity: &Identity, value: &[u8]) -> DatabaseResult<ContentHash> {
        let sealed = identity.encrypt(&record::wrap(value))?;
        Ok(self.backend.put(&sealed, &PutOptions::wrapped(VALUE_LINK))?)
    }

    // the local mutation already landed; a lost broadcast only delays peers
    fn broadcast(&self, op: Operation) {
        if !self.replicator.is_running() {
            return;
        }
        if let Err(e) = self.replicator.publish(self.backend.as_ref(), op) {
            warn!(error = %e, "failed to broadcast operation");
        }
    }

    fn reset(&mut self) {
        self.replicator.stop();
        self.chain.close();
        self.keystore.unload();
    }
}

fn writable_key(key: &str) -> DatabaseResult<RecordKey> {
    let key = RecordKey::new(key)?;
    if key.is_reserved() {
        return Err(InvalidNameError::Reserved(key.into_string()).into());
    }
    Ok(key)
}

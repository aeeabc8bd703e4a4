//! The version chain: the single owner of `(database, head)`.
//!
//! Every head change, local or remote, goes through the mutex in
//! [`VersionChain`], and the lock is held across the backend link call so
//! the read-link-advance sequence is atomic. Two writers racing on the same
//! key therefore produce last-writer-wins, never a lost update.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::error::{DatabaseError, DatabaseResult};
use crate::storage::{Backend, BackendResult, ContentHash, InvalidNameError, RecordKey};
use crate::sync::{Operation, OperationKind, OperationSink};

/// The open database and the hash of its current root object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Head {
    pub database: String,
    pub hash: ContentHash,
}

pub(crate) struct VersionChain<B> {
    backend: Arc<B>,
    state: Mutex<Option<Head>>,
}

impl<B: Backend> VersionChain<B> {
    pub(crate) fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            state: Mutex::new(None),
        }
    }

    /// consistent copy of `(database, head)`
    pub(crate) fn snapshot(&self) -> Option<Head> {
        self.state.lock().clone()
    }

    /// transition to `Open(head)`
    pub(crate) fn open(&self, head: Head) {
        debug!(database = %head.database, head = %head.hash.short(), "chain opened");
        *self.state.lock() = Some(head);
    }

    /// back to `Unopened`
    pub(crate) fn close(&self) {
        *self.state.lock() = None;
    }

    /// Link `target` under `key` on the head of `database`.
    pub(crate) fn link(&self, database: &str, key: &RecordKey, target: &ContentHash) -> DatabaseResult<ContentHash> {
        self.advance(database, |backend, head| backend.link_add(head, key.as_str(), target))?
            .ok_or(DatabaseError::NotOpen)
    }

    /// Remove `key` from the head of `database`.
    pub(crate) fn unlink(&self, database: &str, key: &RecordKey) -> DatabaseResult<ContentHash> {
        self.advance(database, |backend, head| backend.link_remove(head, key.as_str()))
            .map_err(|e| match e {
                DatabaseError::Backend(e) if e.is_not_found() => DatabaseError::KeyNotFound(key.to_string()),
                e => e,
            })?
            .ok_or(DatabaseError::NotOpen)
    }

    /// Run one head transition under the lock.
    ///
    /// Returns `None` without touching the backend when `database` is not
    /// the open database.
    fn advance<F>(&self, database: &str, f: F) -> DatabaseResult<Option<ContentHash>>
    where
        F: FnOnce(&B, &ContentHash) -> BackendResult<ContentHash>,
    {
        let mut state = self.state.lock();
        let head = match state.as_mut() {
            Some(head) if head.database == database => head,
            _ => return Ok(None),
        };

        let next = f(&self.backend, &head.hash)?;
        debug!(database, from = %head.hash.short(), to = %next.short(), "head advanced");
        head.hash = next.clone();
        Ok(Some(next))
    }
}

impl<B: Backend> OperationSink for VersionChain<B> {
    type Error = DatabaseError;

    fn apply_remote(&self, op: &Operation) -> DatabaseResult<Option<ContentHash>> {
        let key = op.record_key()?;
        if key.is_reserved() {
            return Err(InvalidNameError::Reserved(op.key.clone()).into());
        }
        match op.kind {
            OperationKind::Set => {
                let target = op
                    .hash
                    .as_ref()
                    .ok_or_else(|| DatabaseError::MalformedValue("set operation without hash".into()))?;
                self.advance(&op.database, |backend, head| backend.link_add(head, key.as_str(), target))
            }
            OperationKind::Del => {
                // already absent locally: keep the head as it is
                self.advance(&op.database, |backend, head| {
                    match backend.link_remove(head, key.as_str()) {
                        Err(e) if e.is_not_found() => Ok(head.clone()),
                        other => other,
                    }
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryBackend, PutOptions};

    fn setup() -> (MemoryBackend, VersionChain<MemoryBackend>, ContentHash) {
        let backend = MemoryBackend::new();
        let chain = VersionChain::new(Arc::new(backend.clone()));
        let root = backend.empty_directory().unwrap();
        chain.open(Head {
            database: "db".into(),
            hash: root.clone(),
        });
        (backend, chain, root)
    }

    fn key(name: &str) -> RecordKey {
        RecordKey::new(name).unwrap()
    }

    #[test]
    fn test_link_advances_head() {
        let (backend, chain, root) = setup();
        let value = backend.put(b"v", &PutOptions::wrapped("value")).unwrap();

        let head = chain.link("db", &key("k"), &value).unwrap();
        assert_ne!(head, root);
        assert_eq!(chain.snapshot().unwrap().hash, head);
    }

    #[test]
    fn test_link_on_other_database_is_not_open() {
        let (backend, chain, root) = setup();
        let value = backend.put(b"v", &PutOptions::wrapped("value")).unwrap();

        assert!(matches!(chain.link("other", &key("k"), &value), Err(DatabaseError::NotOpen)));
        assert_eq!(chain.snapshot().unwrap().hash, root);

        chain.close();
        assert!(matches!(chain.link("db", &key("k"), &value), Err(DatabaseError::NotOpen)));
    }

    #[test]
    fn test_unlink_missing_key() {
        let (_backend, chain, root) = setup();
        assert!(matches!(chain.unlink("db", &key("k")), Err(DatabaseError::KeyNotFound(_))));
        assert_eq!(chain.snapshot().unwrap().hash, root);
    }

    #[test]
    fn test_failed_link_keeps_head() {
        let (_backend, chain, root) = setup();
        let ghost = ContentHash::new("QmGhost").unwrap();
        assert!(chain.link("db", &key("k"), &ghost).is_err());
        assert_eq!(chain.snapshot().unwrap().hash, root);
    }

    #[test]
    fn test_apply_remote_filters_database() {
        let (backend, chain, root) = setup();
        let value = backend.put(b"v", &PutOptions::wrapped("value")).unwrap();

        let foreign = Operation::set("other", &key("k"), value.clone());
        assert_eq!(chain.apply_remote(&foreign).unwrap(), None);
        assert_eq!(chain.snapshot().unwrap().hash, root);

        let local = Operation::set("db", &key("k"), value);
        let head = chain.apply_remote(&local).unwrap().unwrap();
        assert_eq!(chain.snapshot().unwrap().hash, head);
    }

    #[test]
    fn test_apply_remote_rejects_reserved_keys() {
        let (backend, chain, root) = setup();
        let value = backend.put(b"v", &PutOptions::wrapped("value")).unwrap();

        let op = Operation::set("db", &RecordKey::database_name(), value);
        assert!(matches!(chain.apply_remote(&op), Err(DatabaseError::InvalidKey(_))));
        assert_eq!(chain.snapshot().unwrap().hash, root);
    }

    #[test]
    fn test_apply_remote_del_is_idempotent() {
        let (backend, chain, root) = setup();
        let value = backend.put(b"v", &PutOptions::wrapped("value")).unwrap();
        chain.link("db", &key("k"), &value).unwrap();

        let del = Operation::del("db", &key("k"));
        assert_eq!(chain.apply_remote(&del).unwrap(), Some(root.clone()));
        assert_eq!(chain.apply_remote(&del).unwrap(), Some(root));
    }

    #[test]
    fn test_concurrent_links_are_serialized() {
        let (backend, chain, _root) = setup();
        let chain = Arc::new(chain);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let chain = chain.clone();
                let backend = backend.clone();
                std::thread::spawn(move || {
                    for j in 0..10 {
                        let value = backend
                            .put(format!("{}-{}", i, j).as_bytes(), &PutOptions::wrapped("value"))
                            .unwrap();
                        chain.link("db", &key(&format!("k{}-{}", i, j)), &value).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let head = chain.snapshot().unwrap().hash;
        for i in 0..8 {
            for j in 0..10 {
                let got = backend.get(&format!("{}/k{}-{}/value", head, i, j)).unwrap();
                assert_eq!(got, format!("{}-{}", i, j).as_bytes());
            }
        }
    }
}

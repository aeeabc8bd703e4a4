//! Git object database as the content-addressed store.
//!
//! Blobs are git blobs, directory nodes are git trees and content hashes
//! are object ids. Linking rebuilds a single tree level with a tree builder
//! seeded from the old tree, so every old root stays readable and unchanged
//! subtrees are shared by id. Names are refs under `refs/names/`.
//!
//! Pub/sub is an in-process hub: every clone of a `GitBackend` shares it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::{ErrorCode, FileMode, ObjectType, Oid, Reference, Repository};
use parking_lot::Mutex;
use tracing::debug;

use crate::crypto::{self, CryptoError, Identity};
use crate::storage::backend::Backend;
use crate::storage::error::{BackendError, BackendResult};
use crate::storage::pubsub::{PubSubHub, Subscription};
use crate::storage::types::{ContentHash, KeyOptions, NameRecord, PutOptions};

/// path namespace of resolved names
pub const NAME_NAMESPACE: &str = "git";

const NAMES_PREFIX: &str = "refs/names/";

/// A git-backed [`Backend`].
///
/// Clone this to share across threads - it uses Arc internally.
#[derive(Clone)]
pub struct GitBackend {
    inner: Arc<GitBackendInner>,
}

struct GitBackendInner {
    repo: Mutex<Repository>,
    path: PathBuf,
    keystore_dir: PathBuf,
    hub: PubSubHub,
}

impl GitBackend {
    /// Open the object database at `path`, initializing a bare repository
    /// if none exists. Keys provisioned by `key_generate` go to `keystore_dir`.
    pub fn open_or_init(path: impl AsRef<Path>, keystore_dir: impl Into<PathBuf>) -> BackendResult<Self> {
        let path = path.as_ref();
        let repo = match Repository::open(path) {
            Ok(repo) => repo,
            Err(e) if e.code() == ErrorCode::NotFound => {
                debug!(path = %path.display(), "initializing object store");
                Repository::init_bare(path).map_err(|e| command_error("init", e))?
            }
            Err(e) => return Err(command_error("open", e)),
        };

        Ok(Self {
            inner: Arc::new(GitBackendInner {
                repo: Mutex::new(repo),
                path: path.to_path_buf(),
                keystore_dir: keystore_dir.into(),
                hub: PubSubHub::new(),
            }),
        })
    }

    /// Get the repository path.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Directory of the backend keystore.
    pub fn keystore_dir(&self) -> &Path {
        &self.inner.keystore_dir
    }

    /// The pub/sub hub shared by all clones.
    pub fn hub(&self) -> &PubSubHub {
        &self.inner.hub
    }

    /// Execute a function with exclusive access to the repository.
    fn with_repo<F, T>(&self, f: F) -> BackendResult<T>
    where
        F: FnOnce(&Repository) -> BackendResult<T>,
    {
        let repo = self.inner.repo.lock();
        f(&repo)
    }
}

impl Backend for GitBackend {
    fn put(&self, data: &[u8], options: &PutOptions) -> BackendResult<ContentHash> {
        self.with_repo(|repo| {
            let blob = repo.blob(data).map_err(|e| command_error("add", e))?;
            let oid = match &options.wrap_with_directory {
                Some(name) => {
                    let mut builder = repo.treebuilder(None).map_err(|e| command_error("add", e))?;
                    builder
                        .insert(name.as_str(), blob, FileMode::Blob.into())
                        .map_err(|e| command_error("add", e))?;
                    builder.write().map_err(|e| command_error("add", e))?
                }
                None => blob,
            };
            to_hash(oid)
        })
    }

    fn get(&self, path: &str) -> BackendResult<Vec<u8>> {
        self.with_repo(|repo| {
            let mut segments = path.trim_matches('/').split('/');
            let root = segments.next().unwrap_or_default();
            let mut object = find_object(repo, parse_oid(root)?, path)?;

            for segment in segments.filter(|s| !s.is_empty()) {
                let tree = object
                    .as_tree()
                    .ok_or_else(|| BackendError::command("cat", format!("{}: not a directory", path), 0))?;
                let id = tree
                    .get_name(segment)
                    .map(|entry| entry.id())
                    .ok_or_else(|| BackendError::NotFound(path.to_string()))?;
                object = find_object(repo, id, path)?;
            }

            match object.as_blob() {
                Some(blob) => Ok(blob.content().to_vec()),
                None => Err(BackendError::command("cat", "this dag node is a directory", 0)),
            }
        })
    }

    fn empty_directory(&self) -> BackendResult<ContentHash> {
        self.with_repo(|repo| {
            let builder = repo.treebuilder(None).map_err(|e| command_error("object/new", e))?;
            to_hash(builder.write().map_err(|e| command_error("object/new", e))?)
        })
    }

    fn link_add(&self, root: &ContentHash, name: &str, target: &ContentHash) -> BackendResult<ContentHash> {
        const COMMAND: &str = "object/patch/add-link";
        self.with_repo(|repo| {
            let tree = find_object(repo, parse_oid(root.as_str())?, root.as_str())?
                .into_tree()
                .map_err(|_| BackendError::command(COMMAND, format!("{} is not a directory", root), 0))?;
            let target_object = find_object(repo, parse_oid(target.as_str())?, target.as_str())?;
            let mode = match target_object.kind() {
                Some(ObjectType::Tree) => FileMode::Tree,
                _ => FileMode::Blob,
            };

            let mut builder = repo.treebuilder(Some(&tree)).map_err(|e| command_error(COMMAND, e))?;
            builder
                .insert(name, target_object.id(), mode.into())
                .map_err(|e| command_error(COMMAND, e))?;
            to_hash(builder.write().map_err(|e| command_error(COMMAND, e))?)
        })
    }

    fn link_remove(&self, root: &ContentHash, name: &str) -> BackendResult<ContentHash> {
        const COMMAND: &str = "object/patch/rm-link";
        self.with_repo(|repo| {
            let tree = find_object(repo, parse_oid(root.as_str())?, root.as_str())?
                .into_tree()
                .map_err(|_| BackendError::command(COMMAND, format!("{} is not a directory", root), 0))?;
            if tree.get_name(name).is_none() {
                return Err(BackendError::NotFound(root.join(name)));
            }

            let mut builder = repo.treebuilder(Some(&tree)).map_err(|e| command_error(COMMAND, e))?;
            builder.remove(name).map_err(|e| command_error(COMMAND, e))?;
            to_hash(builder.write().map_err(|e| command_error(COMMAND, e))?)
        })
    }

    fn key_generate(&self, name: &str, options: &KeyOptions) -> BackendResult<()> {
        provision_key(self.keystore_dir(), name, options)
    }

    fn name_publish(&self, hash: &ContentHash, identity: &str) -> BackendResult<NameRecord> {
        const COMMAND: &str = "name/publish";
        let refname = name_ref(identity)?;
        self.with_repo(|repo| {
            let oid = find_object(repo, parse_oid(hash.as_str())?, hash.as_str())?.id();
            repo.reference(&refname, oid, true, &format!("publish {}", hash))
                .map_err(|e| command_error(COMMAND, e))?;
            Ok(NameRecord {
                name: identity.to_string(),
                value: format!("/{}/{}", NAME_NAMESPACE, hash),
            })
        })
    }

    fn name_resolve(&self, identity: &str) -> BackendResult<String> {
        let refname = name_ref(identity)?;
        self.with_repo(|repo| {
            let reference = match repo.find_reference(&refname) {
                Ok(reference) => reference,
                Err(e) if e.code() == ErrorCode::NotFound => {
                    return Err(BackendError::NotFound(format!("/names/{}", identity)))
                }
                Err(e) => return Err(command_error("name/resolve", e)),
            };
            let oid = reference
                .target()
                .ok_or_else(|| BackendError::command("name/resolve", "symbolic name record", 0))?;
            Ok(format!("/{}/{}", NAME_NAMESPACE, oid))
        })
    }

    fn pubsub_publish(&self, topic: &str, payload: &str) -> BackendResult<()> {
        let delivered = self.inner.hub.publish(topic, payload)?;
        debug!(topic, delivered, "pubsub publish");
        Ok(())
    }

    fn pubsub_subscribe(&self, topic: &str) -> BackendResult<Subscription> {
        Ok(self.inner.hub.subscribe(topic))
    }
}

/// Generate an RSA key for `name` and write it into `dir`.
///
/// Shared by every backend that keeps its keystore on disk.
pub(crate) fn provision_key(dir: &Path, name: &str, options: &KeyOptions) -> BackendResult<()> {
    const COMMAND: &str = "key/gen";
    let identity = Identity::generate(name, options.bits)
        .map_err(|e| BackendError::command(COMMAND, e.to_string(), 0))?;
    match crypto::write_key_file(dir, &identity) {
        Ok(path) => {
            debug!(name, bits = options.bits, path = %path.display(), "key provisioned");
            Ok(())
        }
        Err(CryptoError::KeyExists { name, .. }) => Err(BackendError::command(
            COMMAND,
            format!("key with name '{}' already exists", name),
            0,
        )),
        Err(CryptoError::Io(e)) => Err(BackendError::Io(e)),
        Err(e) => Err(BackendError::command(COMMAND, e.to_string(), 0)),
    }
}

fn name_ref(identity: &str) -> BackendResult<String> {
    let refname = format!("{}{}", NAMES_PREFIX, identity);
    if identity.is_empty() || !Reference::is_valid_name(&refname) {
        return Err(BackendError::command("name", format!("invalid identity '{}'", identity), 0));
    }
    Ok(refname)
}

fn parse_oid(hash: &str) -> BackendResult<Oid> {
    Oid::from_str(hash).map_err(|_| BackendError::command("resolve", format!("invalid hash '{}'", hash), 0))
}

fn find_object<'r>(repo: &'r Repository, oid: Oid, path: &str) -> BackendResult<git2::Object<'r>> {
    repo.find_object(oid, None).map_err(|e| {
        if e.code() == ErrorCode::NotFound {
            BackendError::NotFound(path.to_string())
        } else {
            command_error("resolve", e)
        }
    })
}

fn to_hash(oid: Oid) -> BackendResult<ContentHash> {
    Ok(ContentHash::new(oid.to_string())?)
}

fn command_error(command: &str, e: git2::Error) -> BackendError {
    BackendError::command(command, e.message(), e.raw_code())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, GitBackend) {
        let dir = TempDir::new().unwrap();
        let backend = GitBackend::open_or_init(dir.path().join("objects"), dir.path().join("keystore")).unwrap();
        (dir, backend)
    }

    #[test]
    fn test_open_or_init_reopens() {
        let (dir, backend) = setup();
        let hash = backend.put(b"persisted", &PutOptions::blob()).unwrap();
        drop(backend);

        let reopened = GitBackend::open_or_init(dir.path().join("objects"), dir.path().join("keystore")).unwrap();
        assert_eq!(reopened.get(hash.as_str()).unwrap(), b"persisted");
    }

    #[test]
    fn test_put_and_get_blob() {
        let (_dir, backend) = setup();
        let hash = backend.put(b"some value", &PutOptions::blob()).unwrap();
        assert_eq!(hash.as_str().len(), 40);
        assert_eq!(backend.get(hash.as_str()).unwrap(), b"some value");
    }

    #[test]
    fn test_put_wrapped_in_directory() {
        let (_dir, backend) = setup();
        let dir_hash = backend.put(b"wrapped", &PutOptions::wrapped("value")).unwrap();
        assert_eq!(backend.get(&dir_hash.join("value")).unwrap(), b"wrapped");
        assert!(backend.get(dir_hash.as_str()).is_err());
    }

    #[test]
    fn test_link_add_is_copy_on_write() {
        let (_dir, backend) = setup();
        let empty = backend.empty_directory().unwrap();
        let value = backend.put(b"blue", &PutOptions::wrapped("value")).unwrap();

        let root = backend.link_add(&empty, "color", &value).unwrap();
        assert_ne!(root, empty);
        assert_eq!(backend.get(&format!("{}/color/value", root)).unwrap(), b"blue");

        // the old root still exists and has no link
        assert!(backend.get(&format!("{}/color/value", empty)).unwrap_err().is_not_found());

        let other = backend.put(b"red", &PutOptions::wrapped("value")).unwrap();
        let replaced = backend.link_add(&root, "color", &other).unwrap();
        assert_eq!(backend.get(&format!("{}/color/value", replaced)).unwrap(), b"red");
        assert_eq!(backend.get(&format!("{}/color/value", root)).unwrap(), b"blue");
    }

    #[test]
    fn test_link_remove() {
        let (_dir, backend) = setup();
        let empty = backend.empty_directory().unwrap();
        let value = backend.put(b"x", &PutOptions::wrapped("value")).unwrap();
        let root = backend.link_add(&empty, "k", &value).unwrap();

        let removed = backend.link_remove(&root, "k").unwrap();
        assert_eq!(removed, empty);
        assert!(backend.link_remove(&removed, "k").unwrap_err().is_not_found());
    }

    #[test]
    fn test_get_missing_object() {
        let (_dir, backend) = setup();
        let err = backend.get("0123456789012345678901234567890123456789").unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(backend.get("not-a-hash"), Err(BackendError::Command { .. })));
    }

    #[test]
    fn test_name_publish_and_resolve() {
        let (_dir, backend) = setup();
        let empty = backend.empty_directory().unwrap();

        assert!(backend.name_resolve("QmPeer").unwrap_err().is_not_found());

        let record = backend.name_publish(&empty, "QmPeer").unwrap();
        assert_eq!(record.name, "QmPeer");
        assert_eq!(record.value, format!("/git/{}", empty));

        let path = backend.name_resolve("QmPeer").unwrap();
        assert_eq!(ContentHash::from_path(&path).unwrap(), empty);
    }

    #[test]
    fn test_key_generate_writes_keystore() {
        let (_dir, backend) = setup();
        backend.key_generate("dbname", &KeyOptions::rsa(1024)).unwrap();
        assert!(backend.keystore_dir().join("dbname").exists());

        let err = backend.key_generate("dbname", &KeyOptions::rsa(1024)).unwrap_err();
        assert!(matches!(err, BackendError::Command { ref command, .. } if command == "key/gen"));
    }

    #[test]
    fn test_pubsub_shared_between_clones() {
        let (_dir, backend) = setup();
        let clone = backend.clone();
        let subscription = clone.pubsub_subscribe("db").unwrap();

        backend.pubsub_publish("db", "payload").unwrap();
        let frame = subscription.recv().unwrap();
        assert_eq!(crate::storage::Message::decode(&frame).unwrap(), "payload");
    }
}

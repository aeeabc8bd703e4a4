//! In-memory content-addressed store.
//!
//! An arena of immutable nodes keyed by the base58 SHA-256 multihash of
//! their canonical encoding. Directory nodes map link names to child hashes,
//! so a new root produced by a link mutation shares every unchanged child
//! with its predecessor. Nothing is ever removed from the arena.
//!
//! Every handle records the calls it served, which tests use to check what
//! went over the wire.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};

use crate::storage::backend::Backend;
use crate::storage::error::{BackendError, BackendResult};
use crate::storage::git::provision_key;
use crate::storage::pubsub::{PubSubHub, Subscription};
use crate::storage::types::{ContentHash, KeyOptions, NameRecord, PutOptions};

/// path namespace of resolved names
pub const NAME_NAMESPACE: &str = "mem";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Blob(Vec<u8>),
    Directory(BTreeMap<String, ContentHash>),
}

impl Node {
    /// canonical bytes the node is addressed by
    fn encode(&self) -> Vec<u8> {
        match self {
            Node::Blob(data) => {
                let mut out = b"blob\0".to_vec();
                out.extend_from_slice(data);
                out
            }
            Node::Directory(links) => {
                let mut out = b"dir\0".to_vec();
                for (name, hash) in links {
                    out.extend_from_slice(name.as_bytes());
                    out.push(0);
                    out.extend_from_slice(hash.as_str().as_bytes());
                    out.push(b'\n');
                }
                out
            }
        }
    }

    fn hash(&self) -> ContentHash {
        let digest = Sha256::digest(self.encode());
        let mut multihash = vec![0x12, 0x20];
        multihash.extend_from_slice(&digest);
        ContentHash::from_multihash(&multihash)
    }
}

/// A single recorded publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
}

#[derive(Default)]
struct MemoryBackendInner {
    objects: RwLock<HashMap<ContentHash, Node>>,
    names: RwLock<HashMap<String, ContentHash>>,
    published: Mutex<Vec<Published>>,
    keystore_dir: Option<PathBuf>,
    hub: PubSubHub,
}

/// An in-memory [`Backend`].
///
/// Clone this to share across threads - it uses Arc internally.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<MemoryBackendInner>,
}

impl MemoryBackend {
    /// Backend without a keystore; `key_generate` is refused.
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that provisions keys into `dir`.
    pub fn with_keystore(dir: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(MemoryBackendInner {
                keystore_dir: Some(dir.into()),
                ..Default::default()
            }),
        }
    }

    /// Every payload published so far, in order.
    pub fn published(&self) -> Vec<Published> {
        self.inner.published.lock().clone()
    }

    /// Number of stored objects.
    pub fn object_count(&self) -> usize {
        self.inner.objects.read().len()
    }

    /// The pub/sub hub shared by all clones.
    pub fn hub(&self) -> &PubSubHub {
        &self.inner.hub
    }

    fn store(&self, node: Node) -> ContentHash {
        let hash = node.hash();
        self.inner.objects.write().entry(hash.clone()).or_insert(node);
        hash
    }

    fn node(&self, hash: &ContentHash) -> BackendResult<Node> {
        self.inner
            .objects
            .read()
            .get(hash)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(hash.to_string()))
    }

    fn directory(&self, hash: &ContentHash, command: &str) -> BackendResult<BTreeMap<String, ContentHash>> {
        match self.node(hash)? {
            Node::Directory(links) => Ok(links),
            Node::Blob(_) => Err(BackendError::command(command, format!("{} is not a directory", hash), 0)),
        }
    }
}

impl Backend for MemoryBackend {
    fn put(&self, data: &[u8], options: &PutOptions) -> BackendResult<ContentHash> {
        let blob = self.store(Node::Blob(data.to_vec()));
        Ok(match &options.wrap_with_directory {
            Some(name) => self.store(Node::Directory(BTreeMap::from([(name.clone(), blob)]))),
            None => blob,
        })
    }

    fn get(&self, path: &str) -> BackendResult<Vec<u8>> {
        let mut segments = path.trim_matches('/').split('/');
        let root = ContentHash::new(segments.next().unwrap_or_default())?;
        let mut node = self.node(&root).map_err(|_| BackendError::NotFound(path.to_string()))?;

        for segment in segments.filter(|s| !s.is_empty()) {
            let Node::Directory(links) = node else {
                return Err(BackendError::command("cat", format!("{}: not a directory", path), 0));
            };
            let child = links
                .get(segment)
                .ok_or_else(|| BackendError::NotFound(path.to_string()))?;
            node = self.node(child)?;
        }

        match node {
            Node::Blob(data) => Ok(data),
            Node::Directory(_) => Err(BackendError::command("cat", "this dag node is a directory", 0)),
        }
    }

    fn empty_directory(&self) -> BackendResult<ContentHash> {
        Ok(self.store(Node::Directory(BTreeMap::new())))
    }

    fn link_add(&self, root: &ContentHash, name: &str, target: &ContentHash) -> BackendResult<ContentHash> {
        let mut links = self.directory(root, "object/patch/add-link")?;
        self.node(target)?;
        links.insert(name.to_string(), target.clone());
        Ok(self.store(Node::Directory(links)))
    }

    fn link_remove(&self, root: &ContentHash, name: &str) -> BackendResult<ContentHash> {
        let mut links = self.directory(root, "object/patch/rm-link")?;
        if links.remove(name).is_none() {
            return Err(BackendError::NotFound(root.join(name)));
        }
        Ok(self.store(Node::Directory(links)))
    }

    fn key_generate(&self, name: &str, options: &KeyOptions) -> BackendResult<()> {
        match &self.inner.keystore_dir {
            Some(dir) => provision_key(dir, name, options),
            None => Err(BackendError::command("key/gen", "backend has no keystore", 0)),
        }
    }

    fn name_publish(&self, hash: &ContentHash, identity: &str) -> BackendResult<NameRecord> {
        self.node(hash)?;
        self.inner
            .names
            .write()
            .insert(identity.to_string(), hash.clone());
        Ok(NameRecord {
            name: identity.to_string(),
            value: format!("/{}/{}", NAME_NAMESPACE, hash),
        })
    }

    fn name_resolve(&self, identity: &str) -> BackendResult<String> {
        self.inner
            .names
            .read()
            .get(identity)
            .map(|hash| format!("/{}/{}", NAME_NAMESPACE, hash))
            .ok_or_else(|| BackendError::NotFound(format!("/names/{}", identity)))
    }

    fn pubsub_publish(&self, topic: &str, payload: &str) -> BackendResult<()> {
        self.inner.published.lock().push(Published {
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
        self.inner.hub.publish(topic, payload)?;
        Ok(())
    }

    fn pubsub_subscribe(&self, topic: &str) -> BackendResult<Subscription> {
        Ok(self.inner.hub.subscribe(topic))
    }
}

//! The storage backend capability interface.

use crate::storage::error::BackendResult;
use crate::storage::pubsub::Subscription;
use crate::storage::types::{ContentHash, KeyOptions, NameRecord, PutOptions};

/// Everything the database needs from a content-addressed store.
///
/// Objects are immutable: `link_add` and `link_remove` return the hash of a
/// brand-new directory node and leave `root` untouched. All calls are
/// blocking single-shot requests.
pub trait Backend: Send + Sync + 'static {
    /// Store an immutable blob.
    fn put(&self, data: &[u8], options: &PutOptions) -> BackendResult<ContentHash>;

    /// Fetch the blob reachable at `hash[/segment]*`.
    fn get(&self, path: &str) -> BackendResult<Vec<u8>>;

    /// Hash of the empty directory node.
    fn empty_directory(&self) -> BackendResult<ContentHash>;

    /// New directory equal to `root` with `name` linked to `target`.
    fn link_add(&self, root: &ContentHash, name: &str, target: &ContentHash) -> BackendResult<ContentHash>;

    /// New directory equal to `root` without `name`.
    fn link_remove(&self, root: &ContentHash, name: &str) -> BackendResult<ContentHash>;

    /// Provision an asymmetric keypair named `name` in the backend keystore.
    fn key_generate(&self, name: &str, options: &KeyOptions) -> BackendResult<()>;

    /// Bind `identity` to `hash` in the naming system.
    fn name_publish(&self, hash: &ContentHash, identity: &str) -> BackendResult<NameRecord>;

    /// Resolve `identity` to the path it is currently bound to.
    fn name_resolve(&self, identity: &str) -> BackendResult<String>;

    /// Broadcast `payload` on `topic`.
    fn pubsub_publish(&self, topic: &str, payload: &str) -> BackendResult<()>;

    /// Subscribe to the raw frames of `topic`.
    fn pubsub_subscribe(&self, topic: &str) -> BackendResult<Subscription>;
}

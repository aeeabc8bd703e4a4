//! storage backend layer for PrismDB
//!
//! The database never talks to a store directly. It talks to the
//! [`Backend`] capability trait: content-addressed put/get, immutable
//! link-graph mutation, name publish/resolve and pub/sub.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      trait Backend                          │
//! │   put/get, link_add/link_remove, names, keys, pub/sub       │
//! └─────────────────────────────────────────────────────────────┘
//!                 │                             │
//!                 ▼                             ▼
//!          ┌─────────────┐               ┌─────────────┐
//!          │ GitBackend  │               │MemoryBackend│
//!          │ (git2 odb)  │               │   (arena)   │
//!          └─────────────┘               └─────────────┘
//!                 │                             │
//!                 └──────────────┬──────────────┘
//!                                ▼
//!                         ┌─────────────┐
//!                         │  PubSubHub  │
//!                         │ (in-process)│
//!                         └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use prismdb::storage::{Backend, GitBackend, PutOptions};
//!
//! let backend = GitBackend::open_or_init("./objects", "./keystore")?;
//! let empty = backend.empty_directory()?;
//! let value = backend.put(b"blue", &PutOptions::wrapped("value"))?;
//! let root = backend.link_add(&empty, "color", &value)?;
//! let blue = backend.get(&format!("{}/color/value", root))?;
//! ```

mod backend;
mod error;
mod git;
mod memory;
mod pubsub;
mod types;

pub use backend::Backend;
pub use error::{BackendError, BackendResult};
pub use git::GitBackend;
pub use memory::{MemoryBackend, Published};
pub use pubsub::{FrameError, Message, PubSubHub, Subscription, SubscriptionCloser};
pub use types::{ContentHash, InvalidNameError, KeyOptions, NameRecord, PutOptions, RecordKey};

//! Live replication of mutations between holders of the same database.
//!
//! Local `set`/`del` calls broadcast an [`Operation`] on a topic named after
//! the database. Remote operations are applied to the local version chain
//! through an [`OperationSink`] and never re-broadcast. There is no merge:
//! whichever mutation reaches the head last wins.

mod channel;
mod error;
mod operation;

pub use channel::{ListenerStats, OperationSink, Replicator};
pub use error::{SyncError, SyncResult};
pub use operation::{Operation, OperationError, OperationKind};

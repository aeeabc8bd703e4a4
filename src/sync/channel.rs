//! The replication channel.
//!
//! A [`Replicator`] owns at most one subscription, on the topic named after
//! the open database, and one listener thread draining it. The listener
//! unwraps each frame, decodes an [`Operation`], drops anything that is
//! malformed, addressed to another database or sent by this replicator
//! itself, and hands the rest to an [`OperationSink`]. Sink failures are
//! logged and skipped; only end-of-stream stops the listener.
//!
//! State machine: `Stopped -> Subscribed -> Stopped`.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::storage::{Backend, ContentHash, Message, Subscription, SubscriptionCloser};
use crate::sync::error::{SyncError, SyncResult};
use crate::sync::operation::Operation;

/// Receiver of remote operations.
///
/// Implementations apply the operation without re-broadcasting it.
pub trait OperationSink: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Apply `op`. Returns the new head, or `None` if the operation no
    /// longer targets the open database.
    fn apply_remote(&self, op: &Operation) -> Result<Option<ContentHash>, Self::Error>;
}

struct Running {
    database: String,
    closer: SubscriptionCloser,
    listener: JoinHandle<ListenerStats>,
}

/// What a listener did before its stream ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerStats {
    pub applied: u64,
    pub dropped: u64,
    pub failed: u64,
}

/// Publishes local operations and listens for remote ones.
pub struct Replicator {
    origin: String,
    running: Option<Running>,
}

impl Replicator {
    pub fn new() -> Self {
        Self {
            origin: ulid::Ulid::new().to_string(),
            running: None,
        }
    }

    /// the id this replicator tags its operations with
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// database the replicator is subscribed for
    pub fn database(&self) -> Option<&str> {
        self.running.as_ref().map(|r| r.database.as_str())
    }

    /// Subscribe to `database`'s topic and spawn the listener.
    ///
    /// Starting again for the same database is a no-op.
    pub fn start<B, S>(&mut self, backend: &B, database: &str, sink: Arc<S>) -> SyncResult<()>
    where
        B: Backend,
        S: OperationSink,
    {
        if let Some(running) = &self.running {
            if running.database == database {
                return Ok(());
            }
            return Err(SyncError::AlreadyRunning(running.database.clone()));
        }

        let subscription = backend.pubsub_subscribe(database)?;
        let closer = subscription.closer();
        let listener = {
            let database = database.to_string();
            let origin = self.origin.clone();
            thread::Builder::new()
                .name(format!("prismdb-sync-{}", database))
                .spawn(move || listen(subscription, &database, &origin, sink.as_ref()))
        };
        let listener = match listener {
            Ok(handle) => handle,
            Err(e) => {
                closer.close();
                return Err(SyncError::Spawn(e));
            }
        };

        info!(database, origin = %self.origin, "replication started");
        self.running = Some(Running {
            database: database.to_string(),
            closer,
            listener,
        });
        Ok(())
    }

    /// Close the subscription and wait for the listener to exit.
    ///
    /// Idempotent; returns the listener's stats when it was running.
    pub fn stop(&mut self) -> Option<ListenerStats> {
        let running = self.running.take()?;
        running.closer.close();
        match running.listener.join() {
            Ok(stats) => {
                info!(
                    database = %running.database,
                    applied = stats.applied,
                    dropped = stats.dropped,
                    failed = stats.failed,
                    "replication stopped"
                );
                Some(stats)
            }
            Err(_) => {
                warn!(database = %running.database, "replication listener panicked");
                None
            }
        }
    }

    /// Broadcast a local operation on the running topic.
    pub fn publish<B: Backend>(&self, backend: &B, op: Operation) -> SyncResult<()> {
        let running = self.running.as_ref().ok_or(SyncError::NotRunning)?;
        let op = op.with_origin(self.origin.as_str());
        let payload = op.encode()?;
        backend.pubsub_publish(&running.database, &payload)?;
        debug!(database = %op.database, key = %op.key, kind = %op.kind, "operation published");
        Ok(())
    }
}

impl Default for Replicator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Replicator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn listen<S: OperationSink>(subscription: Subscription, database: &str, origin: &str, sink: &S) -> ListenerStats {
    let mut stats = ListenerStats::default();

    while let Some(frame) = subscription.recv() {
        let op = match Message::decode(&frame)
            .map_err(|e| e.to_string())
            .and_then(|payload| Operation::decode(&payload).map_err(|e| e.to_string()))
        {
            Ok(op) => op,
            Err(reason) => {
                warn!(database, %reason, "dropping malformed frame");
                stats.dropped += 1;
                continue;
            }
        };

        if op.database != database {
            debug!(database, other = %op.database, "dropping operation for another database");
            stats.dropped += 1;
            continue;
        }
        if op.origin.as_deref() == Some(origin) {
            continue;
        }

        match sink.apply_remote(&op) {
            Ok(Some(head)) => {
                debug!(database, key = %op.key, kind = %op.kind, head = %head.short(), "remote operation applied");
                stats.applied += 1;
            }
            Ok(None) => stats.dropped += 1,
            Err(e) => {
                warn!(database, key = %op.key, error = %e, "failed to apply remote operation");
                stats.failed += 1;
            }
        }
    }

    stats
}

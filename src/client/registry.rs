//! Correlation registry: in-flight call id → single-use response channel.
//!
//! The registry is the only structure touched by both caller tasks and the
//! decode loop. An entry is created immediately before its call envelope is
//! flushed, and consumed-and-removed atomically when the matching result
//! arrives — the oneshot sender enforces at-most-once delivery to the
//! waiting caller by construction.
//!
//! If the connection terminates while entries remain, [`InFlightRegistry::drain`]
//! delivers a synthetic error envelope to every pending caller so none of
//! them blocks forever.

use std::collections::HashMap;

use tokio::sync::{oneshot, Mutex};
use tracing::debug;

use crate::proto::ResultEnvelope;

/// Thread-safe map from correlation id to a waiting caller's channel.
#[derive(Debug, Default)]
pub struct InFlightRegistry {
    entries: Mutex<HashMap<String, oneshot::Sender<ResultEnvelope>>>,
}

impl InFlightRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending call and return the receiver its result will
    /// arrive on.
    ///
    /// Ids are 128-bit random, so a duplicate registration indicates a
    /// caller bug; the previous entry is replaced and its caller will see a
    /// closed channel.
    pub async fn register(&self, id: &str) -> oneshot::Receiver<ResultEnvelope> {
        let (tx, rx) = oneshot::channel();
        self.entries.lock().await.insert(id.to_owned(), tx);
        rx
    }

    /// Remove a pending entry without delivering anything.
    ///
    /// Used by callers that failed to flush their envelope after
    /// registering. Idempotent.
    pub async fn forget(&self, id: &str) {
        self.entries.lock().await.remove(id);
    }

    /// Route a result envelope to the caller that sent its id.
    ///
    /// The lookup and removal are one atomic step under the map lock.
    /// Returns `false` when no caller is waiting on the envelope's id (an
    /// orphaned response — logged and discarded by the decode loop).
    pub async fn deliver(&self, envelope: ResultEnvelope) -> bool {
        let sender = self.entries.lock().await.remove(&envelope.id);
        match sender {
            Some(tx) => tx.send(envelope).is_ok(),
            None => false,
        }
    }

    /// Number of calls currently awaiting a response.
    pub async fn pending(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Deliver a synthetic error envelope to every pending caller and empty
    /// the registry.
    ///
    /// Called on every decode-loop exit path, clean or not, so no caller is
    /// left blocked on a dead connection.
    pub async fn drain(&self, error: &str) {
        let entries = std::mem::take(&mut *self.entries.lock().await);
        if entries.is_empty() {
            return;
        }
        debug!(pending = entries.len(), "draining in-flight calls");
        for (id, tx) in entries {
            let _ = tx.send(ResultEnvelope::failure(&id, "", error));
        }
    }
}

//! Correlation table: in-flight request id → single-use completion slot.
//!
//! The dispatch loop is the only producer (`deliver`); each caller owns the
//! consumer side of exactly one slot. Removal is idempotent: whichever of
//! delivery, cancellation, or closure happens first takes the entry, and
//! the others find nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use crate::message::{Outcome, RequestId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
    #[error("request id {0} is already in flight")]
    Duplicate(RequestId),
    #[error("connection closed")]
    Closed,
}

#[derive(Default)]
struct Inner {
    slots: HashMap<String, oneshot::Sender<Outcome>>,
    closed: bool,
}

/// Shared map of outstanding requests. Cheap to clone.
#[derive(Clone, Default)]
pub struct PendingCalls {
    inner: Arc<Mutex<Inner>>,
}

impl PendingCalls {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // The map stays consistent across a panic in another holder; recover it.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a fresh slot for `id` and return the receiving end.
    pub fn register(&self, id: &RequestId) -> Result<oneshot::Receiver<Outcome>, RegisterError> {
        let key = id.canonical_key();
        let mut inner = self.lock();
        if inner.closed {
            return Err(RegisterError::Closed);
        }
        if inner.slots.contains_key(&key) {
            return Err(RegisterError::Duplicate(id.clone()));
        }
        let (tx, rx) = oneshot::channel();
        inner.slots.insert(key, tx);
        Ok(rx)
    }

    /// Hand the response outcome to the waiter for `id`. Returns whether a waiter existed.
    pub fn deliver(&self, id: &RequestId, outcome: Outcome) -> bool {
        let sender = self.lock().slots.remove(&id.canonical_key());
        match sender {
            // A receiver dropped between removal and send is the same race as
            // cancellation; the response is discarded either way.
            Some(tx) => tx.send(outcome).is_ok(),
            None => {
                tracing::debug!(%id, "dropping response with no pending request");
                false
            }
        }
    }

    /// Remove the slot for `id` without delivering. Idempotent.
    pub fn cancel(&self, id: &RequestId) {
        self.lock().slots.remove(&id.canonical_key());
    }

    /// Fail every waiter and refuse further registrations.
    pub fn close(&self) {
        let drained: Vec<_> = {
            let mut inner = self.lock();
            inner.closed = true;
            inner.slots.drain().collect()
        };
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "failing pending requests on close");
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// Cancels its slot on drop, covering timeouts and dropped call futures.
pub(crate) struct PendingGuard<'a> {
    table: &'a PendingCalls,
    id: RequestId,
}

impl<'a> PendingGuard<'a> {
    pub fn new(table: &'a PendingCalls, id: RequestId) -> Self {
        Self { table, id }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.cancel(&self.id);
    }
}

//! Request correlation for the JSON-RPC client
//!
//! # Request Lifecycle
//!
//! 1. **Reserve ID**: take the next value of a per-client counter (first id
//!    is 1, never reset, not even across reconnects)
//! 2. **Register**: store a oneshot sender and the deadline under that id
//! 3. **Send**: the caller enqueues the encoded frame
//! 4. **Wait**: the caller races the receiver against the deadline and its
//!    cancellation token
//! 5. **Complete**: the inbound loop removes the entry and resolves it
//!
//! An entry is removed exactly once: by the matching response, by the
//! caller giving up, or by `fail_all` when the connection goes away. Whoever
//! removes it owns the outcome, so duplicate and late responses find nothing
//! and are dropped.

use moonwire_core::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A request waiting for its response
pub(crate) struct PendingRequest {
    pub(crate) method: String,
    pub(crate) deadline: Instant,
    tx: oneshot::Sender<Result<Value>>,
}

/// Handle returned by [`RequestCorrelator::register`]
pub(crate) struct ResponseSlot {
    pub(crate) id: u64,
    pub(crate) deadline: Instant,
    pub(crate) timeout: Duration,
    rx: oneshot::Receiver<Result<Value>>,
}

/// Pending-request table and id counter for one client
pub struct RequestCorrelator {
    pending: Mutex<HashMap<u64, PendingRequest>>,
    next_id: AtomicU64,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Reserve the next correlation id
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) async fn register(
        &self,
        id: u64,
        method: impl Into<String>,
        timeout: Duration,
    ) -> ResponseSlot {
        let (tx, rx) = oneshot::channel();
        let deadline = Instant::now() + timeout;
        let pending = PendingRequest {
            method: method.into(),
            deadline,
            tx,
        };
        self.pending.lock().await.insert(id, pending);

        ResponseSlot {
            id,
            deadline,
            timeout,
            rx,
        }
    }

    /// Resolve the request with this id; false if nothing was waiting for it
    pub async fn complete(&self, id: u64, outcome: Result<Value>) -> bool {
        let pending = self.pending.lock().await.remove(&id);
        match pending {
            Some(pending) => {
                tracing::trace!(
                    id,
                    method = %pending.method,
                    remaining_ms = pending.deadline.saturating_duration_since(Instant::now()).as_millis() as u64,
                    "Response matched"
                );
                let _ = pending.tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Drop the entry without resolving it; false if it was already gone
    pub async fn remove(&self, id: u64) -> bool {
        self.pending.lock().await.remove(&id).is_some()
    }

    /// Fail every pending request with the same error
    pub async fn fail_all(&self, error: Error) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut pending = self.pending.lock().await;
            pending.drain().map(|(_, p)| p).collect()
        };
        let count = drained.len();
        for pending in drained {
            let _ = pending.tx.send(Err(error.clone()));
        }
        count
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_pending(&self, id: u64) -> bool {
        self.pending.lock().await.contains_key(&id)
    }

    /// Wait for the response, the deadline or cancellation
    ///
    /// On timeout or cancellation the entry is removed so a late response is
    /// dropped. If the entry is already gone a response (or connection
    /// failure) won the race and that outcome is returned instead.
    pub(crate) async fn wait(
        &self,
        mut slot: ResponseSlot,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let give_up = tokio::select! {
            outcome = &mut slot.rx => {
                return outcome.unwrap_or(Err(Error::ConnectionClosed));
            }
            _ = tokio::time::sleep_until(slot.deadline) => Error::Timeout(slot.timeout),
            _ = cancel.cancelled() => Error::Cancelled,
        };

        if self.remove(slot.id).await {
            tracing::debug!(id = slot.id, reason = give_up.kind(), "Request abandoned");
            return Err(give_up);
        }

        // The remover sends right after releasing the lock.
        match slot.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(give_up),
        }
    }
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

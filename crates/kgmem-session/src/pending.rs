//! Correlation table: request id -> waiter.
//!
//! All access goes through one mutex that is never held across an await. A slot is
//! removed exactly once: by its response, by its owner dropping the `PendingSlot`
//! (timeout or cancellation), or by `fail_all` when the session ends.

use kgmem_types::ClientError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

pub(crate) type Outcome = Result<Value, ClientError>;

struct PendingState {
    next_id: u64,
    waiters: HashMap<u64, oneshot::Sender<Outcome>>,
    /// Set once the session has ended; later registrations fail with it.
    closed: Option<ClientError>,
}

pub(crate) struct PendingTable {
    inner: Mutex<PendingState>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(PendingState {
                next_id: 1,
                waiters: HashMap::new(),
                closed: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, PendingState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocate an id and its waiter. Fails if the session already ended.
    pub(crate) fn register(
        self: &Arc<Self>,
    ) -> Result<(PendingSlot, oneshot::Receiver<Outcome>), ClientError> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state();
        if let Some(ref reason) = state.closed {
            return Err(reason.clone());
        }
        let id = state.next_id;
        state.next_id += 1;
        state.waiters.insert(id, tx);
        Ok((
            PendingSlot {
                table: Arc::clone(self),
                id,
            },
            rx,
        ))
    }

    /// Deliver an outcome. Returns false if no waiter holds `id`.
    pub(crate) fn complete(&self, id: u64, outcome: Outcome) -> bool {
        let waiter = self.state().waiters.remove(&id);
        match waiter {
            // The receiver may have been dropped between removal and send; that is fine.
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    fn cancel(&self, id: u64) {
        self.state().waiters.remove(&id);
    }

    /// Fail every waiter with `reason` and refuse new registrations. Returns how many failed.
    pub(crate) fn fail_all(&self, reason: ClientError) -> usize {
        let drained: Vec<_> = {
            let mut state = self.state();
            if state.closed.is_none() {
                state.closed = Some(reason.clone());
            }
            state.waiters.drain().map(|(_, tx)| tx).collect()
        };
        let n = drained.len();
        for tx in drained {
            let _ = tx.send(Err(reason.clone()));
        }
        n
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.state().waiters.len()
    }
}

/// Ownership of one correlation slot; dropping it releases the slot.
pub(crate) struct PendingSlot {
    table: Arc<PendingTable>,
    id: u64,
}

impl PendingSlot {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.table.cancel(self.id);
    }
}

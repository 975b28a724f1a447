//! The table of calls waiting for a Response.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use packwire_protocol::{MsgId, Value};
use packwire_transport::ResponseHandler;
use tokio::sync::oneshot;

/// What a pending call eventually receives: the `result` slot, or the
/// non-nil `error` slot.
pub(crate) type Outcome = Result<Value, Value>;

struct Table {
    next_id: MsgId,
    calls: HashMap<MsgId, oneshot::Sender<Outcome>>,
}

/// Allocates ids and tracks calls in flight.
///
/// Shared between the [`Session`](crate::Session), which registers calls,
/// and the transport's reader task, which completes them through
/// [`ResponseHandler::on_response`].
pub(crate) struct PendingCalls {
    table: Mutex<Table>,
}

impl PendingCalls {
    pub(crate) fn new() -> Self {
        Self {
            table: Mutex::new(Table {
                next_id: 0,
                calls: HashMap::new(),
            }),
        }
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocates the next free id and registers a call under it.
    ///
    /// Ids count up from the starting value and wrap at `u32::MAX`. An id
    /// still in use by an older call is skipped.
    pub(crate) fn register(&self) -> (MsgId, oneshot::Receiver<Outcome>) {
        let mut table = self.table();
        let id = loop {
            let candidate = table.next_id;
            table.next_id = candidate.wrapping_add(1);
            if !table.calls.contains_key(&candidate) {
                break candidate;
            }
        };
        let (tx, rx) = oneshot::channel();
        table.calls.insert(id, tx);
        (id, rx)
    }

    /// Resolves the call registered under `id` and frees the id.
    ///
    /// A non-nil `error` rejects the call even if `result` is also set.
    /// Returns `false` if no call is waiting on `id`.
    pub(crate) fn complete(&self, id: MsgId, error: Value, result: Value) -> bool {
        let Some(tx) = self.table().calls.remove(&id) else {
            return false;
        };
        let outcome = if error.is_nil() { Ok(result) } else { Err(error) };
        // The caller may have given up already.
        let _ = tx.send(outcome);
        true
    }

    /// Forgets the call registered under `id` without resolving it.
    pub(crate) fn abandon(&self, id: MsgId) -> bool {
        self.table().calls.remove(&id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.table().calls.len()
    }
}

impl ResponseHandler for PendingCalls {
    fn on_response(&self, id: MsgId, error: Value, result: Value) {
        if !self.complete(id, error, result) {
            tracing::debug!(id, "discarding response with no pending call");
        }
    }
}

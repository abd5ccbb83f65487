//! Session allocation and the pending-reply table.
//!
//! Correlation IDs are 16-bit, assigned by a wrapping counter that skips 0.
//! Each allocated ID owns exactly one pending reply: a [`tokio::sync::oneshot`]
//! receiver that the reader task resolves (or fails) exactly once.

use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::filter::CallContext;

const SESSION_MAX: u16 = 65535;

/// Raised by [`SessionRegistry::allocate`] when the wrapping counter lands on
/// an ID that is already pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no session slot available")]
pub struct NoSlot;

/// Outcome delivered to a caller awaiting its reply.
pub type PendingResult = Result<CallContext, crate::error::ConnectionFault>;

/// Owns the wrapping session counter and the table of pending replies.
///
/// Not `Send`-shared directly: the connection driver guards this behind a
/// mutex so the reader task and concurrent callers serialize on it (see
/// `crate::connection`).
pub struct SessionRegistry {
    counter: u16,
    pending: HashMap<u16, oneshot::Sender<PendingResult>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            counter: 0,
            pending: HashMap::new(),
        }
    }

    /// Allocate a fresh session ID and register its pending reply.
    ///
    /// Increments the counter, wrapping from 65535 back to 0 (so the next
    /// allocation lands on 1, never 0). If the resulting ID already has a
    /// live pending reply, fails with [`NoSlot`] without disturbing the
    /// existing entry.
    pub fn allocate(&mut self) -> Result<(u16, oneshot::Receiver<PendingResult>), NoSlot> {
        self.counter = self.counter.wrapping_add(1);
        if self.counter == 0 {
            // `wrapping_add` just carried 65535 over to 0; skip straight to 1
            // so 0 is never handed out.
            self.counter = 1;
        }
        let id = self.counter;

        if self.pending.contains_key(&id) {
            return Err(NoSlot);
        }

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        Ok((id, rx))
    }

    /// Resolve the pending reply for `session_id` with `ctx`, removing it
    /// from the table. Returns `false` if no reply was pending for that ID
    /// (an `UnknownSession` condition from the caller's point of view).
    pub fn resolve(&mut self, session_id: u16, ctx: CallContext) -> bool {
        match self.pending.remove(&session_id) {
            Some(tx) => {
                let _ = tx.send(Ok(ctx));
                true
            }
            None => false,
        }
    }

    /// Remove a pending reply without resolving it, used by caller-side
    /// cancellation so a later reply does not find an orphaned session.
    pub fn remove(&mut self, session_id: u16) {
        self.pending.remove(&session_id);
    }

    /// Fail every still-pending reply with `cause`, emptying the table.
    pub fn fail_all(&mut self, cause: crate::error::ConnectionFault) {
        for (_, tx) in self.pending.drain() {
            let _ = tx.send(Err(cause.clone()));
        }
    }

    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

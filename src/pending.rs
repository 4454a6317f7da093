//! Per-connection operation registry.
//!
//! Two lists: `operations` holds every live operation that is not waiting
//! for a response; `pending` holds the submitted operations whose
//! correlation id is in flight. The whole table sits behind one mutex on
//! the connection; critical sections never block and never run user code,
//! so the table is safe to touch from the receive dispatcher.
//!
//! Removal from `pending` is the exactly-once linearization point: the
//! response path and the timeout path both try it, and whichever wins owns
//! delivery of the completion.

use std::sync::Arc;

use crate::operation::Operation;

pub(crate) struct PendingTable {
    /// Live operations not awaiting a response.
    operations: Vec<Arc<Operation>>,
    /// Submitted operations awaiting a response, keyed by their id.
    pending: Vec<Arc<Operation>>,
    /// Monotonic 16-bit id source; wraps, skipping zero.
    op_cycle: u16,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self {
            operations: Vec::new(),
            pending: Vec::new(),
            op_cycle: 0,
        }
    }

    /// Register a newly created operation.
    pub(crate) fn insert(&mut self, operation: Arc<Operation>) {
        self.operations.push(operation);
    }

    /// Assign the next correlation id and move the operation into the
    /// pending list. Zero is reserved for "unassigned" and is skipped on
    /// wrap, as is any id still held by a pending operation.
    pub(crate) fn insert_pending(&mut self, operation: &Arc<Operation>) -> u16 {
        let id = loop {
            self.op_cycle = self.op_cycle.wrapping_add(1);
            let candidate = self.op_cycle;
            if candidate == 0 {
                continue;
            }
            if self.pending.iter().any(|p| p.id() == candidate) {
                continue;
            }
            break candidate;
        };
        operation.set_id(id);
        self.operations.retain(|o| !Arc::ptr_eq(o, operation));
        self.pending.push(Arc::clone(operation));
        id
    }

    /// Move the operation from pending back to the operations list.
    ///
    /// Returns false when the operation is not pending — some other path
    /// already claimed its completion.
    pub(crate) fn remove_pending(&mut self, operation: &Arc<Operation>) -> bool {
        match self
            .pending
            .iter()
            .position(|p| Arc::ptr_eq(p, operation))
        {
            Some(pos) => {
                let operation = self.pending.remove(pos);
                self.operations.push(operation);
                true
            }
            None => false,
        }
    }

    /// Claim the pending operation with the given id, moving it back to
    /// the operations list.
    pub(crate) fn take_pending(&mut self, id: u16) -> Option<Arc<Operation>> {
        let pos = self.pending.iter().position(|p| p.id() == id)?;
        let operation = self.pending.remove(pos);
        self.operations.push(Arc::clone(&operation));
        Some(operation)
    }

    /// Drop the operation from both lists.
    pub(crate) fn unlink(&mut self, operation: &Arc<Operation>) {
        self.operations.retain(|o| !Arc::ptr_eq(o, operation));
        self.pending.retain(|o| !Arc::ptr_eq(o, operation));
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// All live operations on the connection, pending included.
    pub(crate) fn live_len(&self) -> usize {
        self.operations.len() + self.pending.len()
    }

    #[cfg(test)]
    pub(crate) fn set_op_cycle(&mut self, value: u16) {
        self.op_cycle = value;
    }
}

//! # Per-kind operation registry.
//!
//! [`OpSlab`] maps operation ids to in-flight operations of one kind.
//! Completed entries stay in the slab until the next operation of the same
//! kind is started (lazy sweep) or the topology is torn down.
//!
//! ## Rules
//! - `insert` asserts id uniqueness: operation ids are random 64-bit values
//!   and a collision is a fatal invariant violation, not a recoverable
//!   error.
//! - `sweep` is called by each entry point for **its own** kind only.

use std::collections::HashMap;

use super::OpId;

/// Lifecycle hook shared by all operation kinds.
pub(crate) trait PendingOp {
    /// Whether the operation has already delivered its result.
    fn is_completed(&self) -> bool;
}

/// Id → operation map for one operation kind.
pub(crate) struct OpSlab<T> {
    ops: HashMap<OpId, T>,
}

impl<T: PendingOp> OpSlab<T> {
    pub fn new() -> Self {
        Self {
            ops: HashMap::new(),
        }
    }

    /// Drops entries that have already completed.
    pub fn sweep(&mut self) {
        self.ops.retain(|_, op| !op.is_completed());
    }

    pub fn insert(&mut self, id: OpId, op: T) {
        let prev = self.ops.insert(id, op);
        assert!(prev.is_none(), "operation id collision: {id:#018x}");
    }

    pub fn get_mut(&mut self, id: OpId) -> Option<&mut T> {
        self.ops.get_mut(&id)
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.ops.values_mut()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

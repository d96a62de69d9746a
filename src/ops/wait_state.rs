//! # State-wait operation.
//!
//! Purely observational: waits for selected devices to reach a
//! `(last, current)` state pair. No outbound command is sent; the operation
//! only watches the state table. `Undefined` as the last-state target acts
//! as a wildcard.

use std::collections::HashSet;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::device::{DeviceState, StateTable, TaskId};
use crate::error::OpError;

use super::{FailureKind, PendingOp, StateUpdate, WaitForStateResult};

pub(crate) struct WaitForStateOp {
    target_last: DeviceState,
    target_current: DeviceState,
    selected: HashSet<TaskId>,
    done: HashSet<TaskId>,
    failed: Vec<TaskId>,
    reply: Option<oneshot::Sender<WaitForStateResult>>,
    deadline: CancellationToken,
}

impl PendingOp for WaitForStateOp {
    fn is_completed(&self) -> bool {
        self.reply.is_none()
    }
}

impl WaitForStateOp {
    pub fn new(
        target_last: DeviceState,
        target_current: DeviceState,
        selected: impl IntoIterator<Item = TaskId>,
    ) -> (
        Self,
        oneshot::Receiver<WaitForStateResult>,
        CancellationToken,
    ) {
        let (tx, rx) = oneshot::channel();
        let deadline = CancellationToken::new();
        let op = Self {
            target_last,
            target_current,
            selected: selected.into_iter().collect(),
            done: HashSet::new(),
            failed: Vec::new(),
            reply: Some(tx),
            deadline: deadline.clone(),
        };
        (op, rx, deadline)
    }

    fn matches(&self, last: DeviceState, current: DeviceState) -> bool {
        (self.target_last == DeviceState::Undefined || last == self.target_last)
            && current == self.target_current
    }

    /// Routes one state notification into the operation.
    pub fn update(&mut self, u: &StateUpdate, table: &StateTable) {
        if self.is_completed() || !self.selected.contains(&u.task) {
            return;
        }
        if self.matches(u.last, u.current) || u.failure == FailureKind::Absorbed {
            self.done.insert(u.task);
            self.try_complete(table);
        } else if u.failure == FailureKind::Fatal {
            self.failed.push(u.task);
            self.complete(Err(OpError::ChangeStateFailed));
        }
    }

    /// Accounts devices that already satisfy the wait (or are ignored).
    pub fn reset_count(&mut self, table: &StateTable) {
        if self.is_completed() {
            return;
        }
        for &task in &self.selected {
            if let Some(d) = table.get(task) {
                if d.ignored || self.matches(d.last_state, d.state) {
                    self.done.insert(task);
                }
            }
        }
    }

    pub fn try_complete(&mut self, _table: &StateTable) {
        if !self.is_completed() && self.done.len() == self.selected.len() {
            self.complete(Ok(()));
        }
    }

    /// Deadline expiry: outstanding devices become the failed list.
    pub fn timeout(&mut self) {
        if self.is_completed() {
            return;
        }
        let mut remaining: Vec<TaskId> = self
            .selected
            .iter()
            .filter(|t| !self.done.contains(t))
            .copied()
            .collect();
        remaining.sort_unstable();
        self.failed.extend(remaining);
        self.complete(Err(OpError::Timeout));
    }

    /// Topology teardown.
    pub fn cancel(&mut self) {
        if !self.is_completed() {
            self.complete(Err(OpError::Canceled));
        }
    }

    fn complete(&mut self, outcome: Result<(), OpError>) {
        if let Some(tx) = self.reply.take() {
            self.deadline.cancel();
            let _ = tx.send(WaitForStateResult {
                outcome,
                failed: std::mem::take(&mut self.failed),
            });
        }
    }
}

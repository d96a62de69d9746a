//! # State-change operation.
//!
//! Drives one transition across a device subset and waits for every
//! selected device to reach the transition's target state (or have its
//! failure absorbed).
//!
//! ## Completion
//! - **Ok** once every selected device reached the target or was absorbed.
//! - **InvalidTransition** when a device refuses the transition and is not
//!   already at the target.
//! - **ChangeStateFailed** when a selected, non-absorbed device fails.
//! - **Timeout** at the deadline; devices still outstanding are listed in
//!   `failed`.

use std::collections::HashSet;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::device::{DeviceState, StateTable, TaskId};
use crate::error::OpError;

use super::{ChangeStateResult, FailureKind, PendingOp, StateUpdate};

pub(crate) struct ChangeStateOp {
    target: DeviceState,
    selected: HashSet<TaskId>,
    done: HashSet<TaskId>,
    failed: Vec<TaskId>,
    reply: Option<oneshot::Sender<ChangeStateResult>>,
    deadline: CancellationToken,
}

impl PendingOp for ChangeStateOp {
    fn is_completed(&self) -> bool {
        self.reply.is_none()
    }
}

impl ChangeStateOp {
    pub fn new(
        target: DeviceState,
        selected: impl IntoIterator<Item = TaskId>,
    ) -> (
        Self,
        oneshot::Receiver<ChangeStateResult>,
        CancellationToken,
    ) {
        let (tx, rx) = oneshot::channel();
        let deadline = CancellationToken::new();
        let op = Self {
            target,
            selected: selected.into_iter().collect(),
            done: HashSet::new(),
            failed: Vec::new(),
            reply: Some(tx),
            deadline: deadline.clone(),
        };
        (op, rx, deadline)
    }

    pub fn target(&self) -> DeviceState {
        self.target
    }

    pub fn contains(&self, task: TaskId) -> bool {
        self.selected.contains(&task)
    }

    /// Routes one state notification into the operation.
    pub fn update(&mut self, u: &StateUpdate, table: &StateTable) {
        if self.is_completed() || !self.selected.contains(&u.task) {
            return;
        }
        // target match wins over the failure disposition: an op that drives
        // devices into Error must count devices arriving there
        if u.current == self.target || u.failure == FailureKind::Absorbed {
            self.done.insert(u.task);
            self.try_complete(table);
        } else if u.failure == FailureKind::Fatal {
            self.failed.push(u.task);
            self.complete(Err(OpError::ChangeStateFailed), table);
        }
    }

    /// Accounts devices that already satisfy the operation (already at the
    /// target, or already ignored).
    pub fn reset_count(&mut self, table: &StateTable) {
        if self.is_completed() {
            return;
        }
        for &task in &self.selected {
            if let Some(d) = table.get(task) {
                if d.ignored || d.state == self.target {
                    self.done.insert(task);
                }
            }
        }
    }

    pub fn try_complete(&mut self, table: &StateTable) {
        if !self.is_completed() && self.done.len() == self.selected.len() {
            self.complete(Ok(()), table);
        }
    }

    /// Completes with a per-device failure code.
    pub fn fail(&mut self, code: OpError, task: TaskId, table: &StateTable) {
        if self.is_completed() {
            return;
        }
        self.failed.push(task);
        self.complete(Err(code), table);
    }

    /// Deadline expiry: outstanding devices become the failed list.
    pub fn timeout(&mut self, table: &StateTable) {
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
        self.complete(Err(OpError::Timeout), table);
    }

    /// Topology teardown.
    pub fn cancel(&mut self, table: &StateTable) {
        if !self.is_completed() {
            self.complete(Err(OpError::Canceled), table);
        }
    }

    fn complete(&mut self, outcome: Result<(), OpError>, table: &StateTable) {
        if let Some(tx) = self.reply.take() {
            self.deadline.cancel();
            let _ = tx.send(ChangeStateResult {
                outcome,
                state: table.snapshot(),
                failed: std::mem::take(&mut self.failed),
            });
        }
    }
}

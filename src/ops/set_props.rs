//! # Property-write operation.
//!
//! Confirms property writes across selected devices. A failure reply from
//! an expendable (absorbed) device is tolerated; from a non-expendable
//! device it is recorded and fails the operation once every device has
//! reported. Exit events feed this operation as failure replies, so a dead
//! device does not stall the write until the deadline.

use std::collections::HashSet;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::commands::CmdResult;
use crate::device::{StateTable, TaskId};
use crate::error::OpError;

use super::{PendingOp, SetPropertiesResult};

pub(crate) struct SetPropertiesOp {
    selected: HashSet<TaskId>,
    done: HashSet<TaskId>,
    failed: Vec<TaskId>,
    reply: Option<oneshot::Sender<SetPropertiesResult>>,
    deadline: CancellationToken,
}

impl PendingOp for SetPropertiesOp {
    fn is_completed(&self) -> bool {
        self.reply.is_none()
    }
}

impl SetPropertiesOp {
    pub fn new(
        selected: impl IntoIterator<Item = TaskId>,
    ) -> (
        Self,
        oneshot::Receiver<SetPropertiesResult>,
        CancellationToken,
    ) {
        let (tx, rx) = oneshot::channel();
        let deadline = CancellationToken::new();
        let op = Self {
            selected: selected.into_iter().collect(),
            done: HashSet::new(),
            failed: Vec::new(),
            reply: Some(tx),
            deadline: deadline.clone(),
        };
        (op, rx, deadline)
    }

    /// Records one confirmation (or synthesized failure from the exit
    /// sink). `absorbed` marks failures the failure policy tolerated.
    pub fn update(&mut self, task: TaskId, result: CmdResult, absorbed: bool) {
        if self.is_completed() || !self.selected.contains(&task) || !self.done.insert(task) {
            return;
        }
        if result == CmdResult::Failure && !absorbed {
            self.failed.push(task);
        }
        self.try_complete();
    }

    /// Accounts devices that were ignored after selection.
    pub fn reset_count(&mut self, table: &StateTable) {
        if self.is_completed() {
            return;
        }
        for &task in &self.selected {
            if table.get(task).is_some_and(|d| d.ignored) {
                self.done.insert(task);
            }
        }
    }

    pub fn try_complete(&mut self) {
        if !self.is_completed() && self.done.len() == self.selected.len() {
            let outcome = if self.failed.is_empty() {
                Ok(())
            } else {
                Err(OpError::SetPropertiesFailed)
            };
            self.complete(outcome);
        }
    }

    /// Deadline expiry: silent devices become the failed list.
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
            let _ = tx.send(SetPropertiesResult {
                outcome,
                failed: std::mem::take(&mut self.failed),
            });
        }
    }
}

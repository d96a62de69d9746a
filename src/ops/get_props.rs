//! # Property-query operation.
//!
//! Aggregates `Properties` replies from selected devices, routed by request
//! id. Failure replies and successful replies coexist in the result; the
//! operation completes once every selected device reported, or at the
//! deadline with whatever was collected.

use std::collections::{HashMap, HashSet};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::commands::CmdResult;
use crate::device::{DeviceProperties, TaskId};
use crate::error::OpError;

use super::{GetPropertiesResult, PendingOp};

pub(crate) struct GetPropertiesOp {
    selected: HashSet<TaskId>,
    done: HashSet<TaskId>,
    props: HashMap<TaskId, DeviceProperties>,
    failed: Vec<TaskId>,
    reply: Option<oneshot::Sender<GetPropertiesResult>>,
    deadline: CancellationToken,
}

impl PendingOp for GetPropertiesOp {
    fn is_completed(&self) -> bool {
        self.reply.is_none()
    }
}

impl GetPropertiesOp {
    pub fn new(
        selected: impl IntoIterator<Item = TaskId>,
    ) -> (
        Self,
        oneshot::Receiver<GetPropertiesResult>,
        CancellationToken,
    ) {
        let (tx, rx) = oneshot::channel();
        let deadline = CancellationToken::new();
        let op = Self {
            selected: selected.into_iter().collect(),
            done: HashSet::new(),
            props: HashMap::new(),
            failed: Vec::new(),
            reply: Some(tx),
            deadline: deadline.clone(),
        };
        (op, rx, deadline)
    }

    /// Records one device reply. The first reply per device wins.
    pub fn update(&mut self, task: TaskId, result: CmdResult, props: DeviceProperties) {
        if self.is_completed() || !self.selected.contains(&task) || !self.done.insert(task) {
            return;
        }
        match result {
            CmdResult::Ok => {
                self.props.insert(task, props);
            }
            CmdResult::Failure => self.failed.push(task),
        }
        self.try_complete();
    }

    pub fn try_complete(&mut self) {
        if !self.is_completed() && self.done.len() == self.selected.len() {
            let outcome = if self.failed.is_empty() {
                Ok(())
            } else {
                Err(OpError::GetPropertiesFailed)
            };
            self.complete(outcome);
        }
    }

    /// Deadline expiry: silent devices become the failed list, collected
    /// replies are surfaced as partial results.
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
            let _ = tx.send(GetPropertiesResult {
                outcome,
                props: std::mem::take(&mut self.props),
                failed: std::mem::take(&mut self.failed),
            });
        }
    }
}

//! # Inbound command dispatch.
//!
//! Frames received from the custom command channel are decoded and each
//! command is applied to the core state under the mutex. Commands arriving
//! concurrently from many devices are serialized here; per-device order is
//! the order the deployment service delivered them.
//!
//! ## Rules
//! - A malformed frame is logged and dropped; it never fails an operation.
//! - Replies for unknown tasks or unknown request ids are logged and
//!   dropped; the affected op (if any) stays pending until its deadline.
//! - A late subscription ack from an already-ignored device is discarded,
//!   preserving the `ignored ⇒ !subscribed` invariant.

use tracing::{debug, error, warn};

use crate::commands::{Cmd, CmdBundle, CmdResult};
use crate::deploy::InboundRaw;
use crate::device::{DeviceProperties, DeviceState, SubscriptionAck, TaskId, Transition};
use crate::error::OpError;
use crate::ops::{FailureKind, PendingOp, StateUpdate};

use super::topology::Inner;

impl Inner {
    /// Decodes one inbound frame and applies every command it carries.
    pub(crate) fn handle_frame(&self, frame: InboundRaw) {
        let bundle = match CmdBundle::decode(&frame.payload) {
            Ok(bundle) => bundle,
            Err(err) => {
                warn!(
                    partition = %self.partition,
                    sender = frame.sender,
                    %err,
                    "dropping malformed command frame"
                );
                return;
            }
        };

        for cmd in bundle {
            match cmd {
                Cmd::StateChangeSubscription {
                    result,
                    device_id,
                    task_id,
                } => self.on_subscription_ack(result, &device_id, task_id),
                Cmd::StateChangeUnsubscription {
                    result,
                    device_id,
                    task_id,
                } => self.on_unsubscription_ack(result, &device_id, task_id),
                Cmd::StateChange {
                    task_id,
                    last_state,
                    current_state,
                    ..
                } => self.on_state_change(task_id, last_state, current_state),
                Cmd::TransitionStatus {
                    device_id,
                    task_id,
                    transition,
                    result,
                    current_state,
                } => {
                    if result != CmdResult::Ok {
                        self.on_transition_refused(&device_id, task_id, transition, current_state);
                    }
                }
                Cmd::Properties {
                    request_id,
                    device_id,
                    task_id,
                    result,
                    props,
                } => self.on_properties(request_id, &device_id, task_id, result, props),
                Cmd::PropertiesSet {
                    request_id,
                    device_id,
                    task_id,
                    result,
                } => self.on_properties_set(request_id, &device_id, task_id, result),
                other => {
                    warn!(
                        partition = %self.partition,
                        sender = frame.sender,
                        cmd = ?other,
                        "unexpected command received"
                    );
                }
            }
        }
    }

    fn on_subscription_ack(&self, result: CmdResult, device_id: &str, task_id: TaskId) {
        if result != CmdResult::Ok {
            error!(device = device_id, task = task_id, "state change subscription failed");
            return;
        }
        let ack = {
            let mut core = self.core.lock();
            if core.table.get(task_id).is_some_and(|d| d.ignored) {
                // late ack from a device that already failed
                return;
            }
            core.table.confirm_subscribed(task_id)
        };
        match ack {
            SubscriptionAck::Applied => self.subs_notify.notify_waiters(),
            SubscriptionAck::Duplicate => {
                warn!(task = task_id, "task sent subscription confirmation more than once");
            }
            SubscriptionAck::UnknownTask => {
                error!(task = task_id, "subscription confirmation for unknown task");
            }
        }
    }

    fn on_unsubscription_ack(&self, result: CmdResult, device_id: &str, task_id: TaskId) {
        if result != CmdResult::Ok {
            error!(device = device_id, task = task_id, "state change unsubscription failed");
            return;
        }
        let ack = { self.core.lock().table.confirm_unsubscribed(task_id) };
        match ack {
            SubscriptionAck::Applied => self.subs_notify.notify_waiters(),
            SubscriptionAck::Duplicate => {}
            SubscriptionAck::UnknownTask => {
                error!(task = task_id, "unsubscription confirmation for unknown task");
            }
        }
    }

    /// Applies one state-change notification: updates the table, runs the
    /// failure policy on unexpected failure states, feeds the in-flight
    /// operations.
    fn on_state_change(&self, task_id: TaskId, last: DeviceState, current: DeviceState) {
        let mut core = self.core.lock();
        let core = &mut *core;

        let prev = match core.table.get_mut(task_id) {
            Some(device) => {
                let prev = device.state;
                device.last_state = last;
                device.state = current;
                prev
            }
            None => {
                error!(task = task_id, "state change for unknown task");
                return;
            }
        };

        // a device arriving in Error, or in Exiting from anywhere but Idle,
        // will make no further progress
        let unexpected = current == DeviceState::Error
            || (current == DeviceState::Exiting && prev != DeviceState::Idle);

        let failure = if unexpected {
            error!(
                partition = %self.partition,
                run = self.run_nr(),
                task = task_id,
                state = %current,
                "device unexpectedly reached a failure state"
            );
            let absorbed = core.policy.absorb(&mut core.table, task_id);
            for op in core.set.values_mut() {
                op.update(task_id, CmdResult::Failure, absorbed);
            }
            if absorbed {
                FailureKind::Absorbed
            } else {
                FailureKind::Fatal
            }
        } else {
            FailureKind::None
        };

        let update = StateUpdate {
            task: task_id,
            last,
            current,
            failure,
        };
        for op in core.change.values_mut() {
            op.update(&update, &core.table);
        }
        for op in core.wait.values_mut() {
            op.update(&update, &core.table);
        }
    }

    /// A device refused a transition. Unless it already sits at the op's
    /// target state, the affected state-change ops fail.
    fn on_transition_refused(
        &self,
        device_id: &str,
        task_id: TaskId,
        transition: Transition,
        current: DeviceState,
    ) {
        let mut core = self.core.lock();
        let core = &mut *core;
        let state = core.table.get(task_id).map(|d| d.state);
        for op in core.change.values_mut() {
            if op.is_completed() || !op.contains(task_id) {
                continue;
            }
            if state == Some(op.target()) {
                debug!(
                    device = device_id,
                    task = task_id,
                    %transition,
                    "transition refused but device is already at the target state"
                );
            } else {
                error!(
                    device = device_id,
                    task = task_id,
                    %transition,
                    state = %current,
                    "transition failed"
                );
                op.fail(OpError::InvalidTransition, task_id, &core.table);
            }
        }
    }

    fn on_properties(
        &self,
        request_id: u64,
        device_id: &str,
        task_id: TaskId,
        result: CmdResult,
        props: DeviceProperties,
    ) {
        let mut core = self.core.lock();
        match core.get.get_mut(request_id) {
            Some(op) => op.update(task_id, result, props),
            None => debug!(
                request = request_id,
                device = device_id,
                task = task_id,
                "property reply for unknown operation (probably completed or timed out), discarding"
            ),
        }
    }

    fn on_properties_set(
        &self,
        request_id: u64,
        device_id: &str,
        task_id: TaskId,
        result: CmdResult,
    ) {
        let mut core = self.core.lock();
        let core = &mut *core;
        // a failed write on an expendable (or already dropped) device does
        // not fail the operation
        let absorbed = result == CmdResult::Failure
            && core
                .table
                .get(task_id)
                .is_some_and(|d| d.expendable || d.ignored);
        match core.set.get_mut(request_id) {
            Some(op) => op.update(task_id, result, absorbed),
            None => debug!(
                request = request_id,
                device = device_id,
                task = task_id,
                "property-set reply for unknown operation (probably completed or timed out), discarding"
            ),
        }
    }
}

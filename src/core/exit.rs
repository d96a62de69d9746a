//! # Exit-event sink.
//!
//! Consumes task-termination notifications from the deployment service.
//! An exit is **expected** when the device left from `Idle` or `Exiting`
//! with exit code 0; anything else is a failure routed through the failure
//! policy.
//!
//! ## Rules
//! - The exiting device stops publishing: its subscription flag is cleared
//!   and the publisher count adjusted.
//! - On an unexpected exit the device enters `Error` and the in-flight
//!   property writes receive a synthesized failure (absorbed when the
//!   policy tolerated it). Property queries are not fed from here; a
//!   silent exited device surfaces at the query deadline.
//! - State operations are fed in both cases.

use tracing::{debug, error, warn};

use crate::commands::CmdResult;
use crate::deploy::TaskDoneEvent;
use crate::device::{DeviceState, SubscriptionAck};
use crate::ops::{FailureKind, StateUpdate};

use super::topology::Inner;

impl Inner {
    /// Applies one task-termination event under the core mutex.
    pub(crate) fn on_task_done(&self, ev: TaskDoneEvent) {
        let last_known;
        let unexpected;
        {
            let mut core = self.core.lock();
            let core = &mut *core;

            // the process is gone; it no longer publishes state changes
            if core.table.confirm_unsubscribed(ev.task_id) == SubscriptionAck::UnknownTask {
                warn!(task = ev.task_id, "exit event for unknown task");
                return;
            }

            let (last, current) = {
                let Some(device) = core.table.get_mut(ev.task_id) else {
                    return;
                };
                device.exit_code = Some(ev.exit_code);
                device.signal = Some(ev.signal);
                device.last_state = device.state;
                last_known = device.state;

                unexpected = !matches!(last_known, DeviceState::Idle | DeviceState::Exiting)
                    || ev.exit_code != 0;
                device.state = if unexpected {
                    DeviceState::Error
                } else {
                    DeviceState::Exiting
                };
                (device.last_state, device.state)
            };

            let failure = if unexpected {
                let absorbed = core.policy.absorb(&mut core.table, ev.task_id);
                for op in core.set.values_mut() {
                    op.update(ev.task_id, CmdResult::Failure, absorbed);
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
                task: ev.task_id,
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

        if unexpected {
            error!(
                partition = %self.partition,
                run = self.run_nr(),
                task = ev.task_id,
                last_state = %last_known,
                exit_code = ev.exit_code,
                signal = ev.signal,
                path = %ev.path,
                host = %ev.host,
                work_dir = %ev.work_dir,
                "task exited unexpectedly"
            );
        } else {
            debug!(
                partition = %self.partition,
                run = self.run_nr(),
                task = ev.task_id,
                last_state = %last_known,
                exit_code = ev.exit_code,
                signal = ev.signal,
                "task exited"
            );
        }
    }
}

//! Operation multiplexer: the four topology operations and their registry.
//!
//! Several operations can be in flight at once, each spanning many devices,
//! each with its own deadline. All of them share one lifecycle shape:
//!
//! ```text
//! entry point (facade)
//!   ├─► sweep completed entries of the SAME kind
//!   ├─► insert op under a fresh random id
//!   ├─► broadcast the outbound command (if the kind has one)
//!   ├─► reset_count()  - account devices that already satisfy the op
//!   └─► try_complete() - handles the empty-selection degenerate case
//!
//! updates (command dispatch / exit sink, under the core mutex)
//!   └─► op.update(..) → remain pending | complete ok | complete with error
//!
//! deadline task (per op, when a timeout is set)
//!   └─► expiry → op.timeout() → complete with OperationTimeout + partials
//!
//! teardown
//!   └─► every pending op completes with OperationCanceled
//! ```
//!
//! ## Rules
//! - Completion happens **exactly once**: the oneshot reply sender is taken
//!   on completion and every later update is a no-op.
//! - A device counts toward completion when it satisfies the op's predicate
//!   **or** when its failure was absorbed by the failure policy.
//! - A non-absorbed failure of a selected device fails the whole op.
//! - Results always carry partial state; on timeout the devices that never
//!   reported are listed in `failed`.
//!
//! ## Files & responsibilities
//! - **registry.rs**: [`OpSlab`] - per-kind id → op map with sweep,
//!   collision check, and teardown cancel.
//! - **change_state.rs** / **wait_state.rs**: state operations, fed from
//!   state-change notifications and exit events.
//! - **get_props.rs** / **set_props.rs**: property operations, fed from
//!   request-id-routed replies (set additionally from exit events).

mod change_state;
mod get_props;
mod registry;
mod set_props;
mod wait_state;

pub(crate) use change_state::ChangeStateOp;
pub(crate) use get_props::GetPropertiesOp;
pub(crate) use registry::{OpSlab, PendingOp};
pub(crate) use set_props::SetPropertiesOp;
pub(crate) use wait_state::WaitForStateOp;

use std::collections::HashMap;

use crate::device::{DeviceProperties, DeviceState, DeviceStatus, TaskId};
use crate::error::OpError;

/// Identifier of one in-flight operation; random 64-bit, unique with high
/// probability (a collision is a fatal invariant violation).
pub type OpId = u64;

/// How a device update relates to the failure policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureKind {
    /// Ordinary progress report.
    None,
    /// The device failed but the failure policy absorbed it.
    Absorbed,
    /// The device failed and the failure cannot be absorbed.
    Fatal,
}

/// One state notification routed to the state operations.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StateUpdate {
    pub task: TaskId,
    pub last: DeviceState,
    pub current: DeviceState,
    pub failure: FailureKind,
}

/// Outcome of a state-change operation.
#[derive(Debug)]
pub struct ChangeStateResult {
    /// Completion code; `Ok` when every selected device reached the target
    /// or was absorbed.
    pub outcome: Result<(), OpError>,
    /// Snapshot of the full device table at completion.
    pub state: Vec<DeviceStatus>,
    /// Devices that failed or never reached the target.
    pub failed: Vec<TaskId>,
}

impl ChangeStateResult {
    pub(crate) fn canceled() -> Self {
        Self {
            outcome: Err(OpError::Canceled),
            state: Vec::new(),
            failed: Vec::new(),
        }
    }
}

/// Outcome of a state-wait operation.
#[derive(Debug)]
pub struct WaitForStateResult {
    pub outcome: Result<(), OpError>,
    /// Devices that had not reached the awaited state at completion.
    pub failed: Vec<TaskId>,
}

impl WaitForStateResult {
    pub(crate) fn canceled() -> Self {
        Self {
            outcome: Err(OpError::Canceled),
            failed: Vec::new(),
        }
    }
}

/// Outcome of a property query. Successful replies and failures coexist.
#[derive(Debug)]
pub struct GetPropertiesResult {
    pub outcome: Result<(), OpError>,
    /// Properties of every device that replied successfully.
    pub props: HashMap<TaskId, DeviceProperties>,
    /// Devices that replied with a failure or never replied.
    pub failed: Vec<TaskId>,
}

impl GetPropertiesResult {
    pub(crate) fn canceled() -> Self {
        Self {
            outcome: Err(OpError::Canceled),
            props: HashMap::new(),
            failed: Vec::new(),
        }
    }
}

/// Outcome of a property write.
#[derive(Debug)]
pub struct SetPropertiesResult {
    pub outcome: Result<(), OpError>,
    /// Non-expendable devices that failed to apply the write, plus devices
    /// that never confirmed before the deadline.
    pub failed: Vec<TaskId>,
}

impl SetPropertiesResult {
    pub(crate) fn canceled() -> Self {
        Self {
            outcome: Err(OpError::Canceled),
            failed: Vec::new(),
        }
    }
}

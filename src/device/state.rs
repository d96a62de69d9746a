//! # Device state machine, as visible to the controller.
//!
//! Devices walk a fixed state machine; the controller commands edges
//! ([`Transition`]) and observes vertices ([`DeviceState`]):
//!
//! ```text
//! Idle -InitDevice→ InitializingDevice -CompleteInit→ Initialized -Bind→ Bound
//! Bound -Connect→ DeviceReady -InitTask→ Ready -Run→ Running
//! Running -Stop→ Ready -ResetTask→ DeviceReady -ResetDevice→ Idle
//! Any -ErrorFound→ Error
//! Idle -End→ Exiting (terminal)
//! ```
//!
//! ## Rules
//! - Every transition has exactly one target state ([`Transition::target`]).
//! - `Error` and unexpected `Exiting` are sinks for control purposes:
//!   operations stop expecting further progress from such a device.
//! - `Undefined` doubles as the wildcard for last-state matching in
//!   state waits.

use std::fmt;

use serde::{Deserialize, Serialize};

/// State of a single device, as reported over the command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    /// Not yet reported; also the wildcard in last-state predicates.
    Undefined,
    Ok,
    /// Failure sink; entered on `ErrorFound` or unexpected termination.
    Error,
    Idle,
    InitializingDevice,
    Initialized,
    Binding,
    Bound,
    Connecting,
    DeviceReady,
    InitializingTask,
    Ready,
    Running,
    ResettingTask,
    ResettingDevice,
    /// Terminal; expected only from `Idle` via `End`.
    Exiting,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Edge in the device state machine, commanded by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    InitDevice,
    CompleteInit,
    Bind,
    Connect,
    InitTask,
    Run,
    Stop,
    ResetTask,
    ResetDevice,
    End,
    ErrorFound,
}

impl Transition {
    /// The state a device reaches when it completes this transition.
    pub fn target(&self) -> DeviceState {
        match self {
            Transition::InitDevice => DeviceState::InitializingDevice,
            Transition::CompleteInit => DeviceState::Initialized,
            Transition::Bind => DeviceState::Bound,
            Transition::Connect => DeviceState::DeviceReady,
            Transition::InitTask => DeviceState::Ready,
            Transition::Run => DeviceState::Running,
            Transition::Stop => DeviceState::Ready,
            Transition::ResetTask => DeviceState::DeviceReady,
            Transition::ResetDevice => DeviceState::Idle,
            Transition::End => DeviceState::Exiting,
            Transition::ErrorFound => DeviceState::Error,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

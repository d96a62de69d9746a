//! # Error types exposed by the topology core.
//!
//! [`OpError`] is the completion-code taxonomy of topology operations.
//! Wire decoding failures live in [`commands`](crate::commands) as
//! `CodecError` and never cross the public operation surface.
//!
//! [`OpError`] provides `as_label` for log/metric labels and a
//! `is_device_failure` classification helper.

use thiserror::Error;

/// # Completion codes for topology operations.
///
/// Every operation (state change, state wait, property get/set) finishes
/// exactly once, either cleanly or with one of these codes. Per-device
/// failures that the expendability policy absorbs never surface here.
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpError {
    /// The operation deadline was reached; the result carries whatever
    /// partial state was collected up to that point.
    #[error("operation deadline reached")]
    Timeout,

    /// Topology teardown aborted the operation.
    ///
    /// This is the only way in-flight operations are canceled en masse;
    /// there is no per-operation user cancel.
    #[error("operation canceled by topology teardown")]
    Canceled,

    /// A conflicting operation was already running on the same scope.
    #[error("conflicting operation already in progress")]
    InProgress,

    /// A device refused the commanded transition and is not already at the
    /// target state.
    #[error("device refused the state transition")]
    InvalidTransition,

    /// A non-expendable device reached `Error` (or exited unexpectedly)
    /// while a state operation was in flight.
    #[error("device failed during state operation")]
    ChangeStateFailed,

    /// One or more devices failed to report the queried properties.
    #[error("device failed to report properties")]
    GetPropertiesFailed,

    /// One or more non-expendable devices failed to apply a property write.
    #[error("device failed to apply properties")]
    SetPropertiesFailed,

    /// The initial state-change subscription round did not reach every
    /// device within the connect window (only when the topology is asked to
    /// block until connected).
    #[error("not every device confirmed the state-change subscription")]
    ConnectionRefused,
}

impl OpError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            OpError::Timeout => "op_timeout",
            OpError::Canceled => "op_canceled",
            OpError::InProgress => "op_in_progress",
            OpError::InvalidTransition => "device_invalid_transition",
            OpError::ChangeStateFailed => "device_change_state_failed",
            OpError::GetPropertiesFailed => "device_get_properties_failed",
            OpError::SetPropertiesFailed => "device_set_properties_failed",
            OpError::ConnectionRefused => "connection_refused",
        }
    }

    /// True when the code reports a per-device failure (as opposed to a
    /// lifecycle outcome of the operation itself).
    pub fn is_device_failure(&self) -> bool {
        matches!(
            self,
            OpError::InvalidTransition
                | OpError::ChangeStateFailed
                | OpError::GetPropertiesFailed
                | OpError::SetPropertiesFailed
        )
    }
}

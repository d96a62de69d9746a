//! # Typed envelope for controller↔device messages.
//!
//! [`Cmd`] is the tagged union of every message exchanged over the custom
//! command channel; [`CmdBundle`] is the frame actually put on the wire (a
//! single message may carry several commands). Serialization is JSON with
//! an internal `type` tag.
//!
//! ## Rules
//! - Outbound commands (controller → devices): subscribe, heartbeat,
//!   unsubscribe, change-state, get-properties, set-properties.
//! - Inbound commands (devices → controller): subscription and
//!   unsubscription confirmations, state changes, transition status,
//!   property replies.
//! - The tag vocabulary is wire-compatible across controller versions;
//!   unknown tags fail decoding of the whole frame and the frame is
//!   dropped by the dispatcher.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::{DeviceProperties, DeviceState, TaskId, Transition};

/// Outcome flag carried by device replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmdResult {
    Ok,
    Failure,
}

/// One command on the controller↔device channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Cmd {
    // === controller → devices ===
    SubscribeToStateChange {
        interval_ms: u64,
    },
    SubscriptionHeartbeat {
        interval_ms: u64,
    },
    UnsubscribeFromStateChange,
    ChangeState {
        transition: Transition,
    },
    GetProperties {
        request_id: u64,
        query: String,
    },
    SetProperties {
        request_id: u64,
        props: DeviceProperties,
    },

    // === devices → controller ===
    StateChangeSubscription {
        result: CmdResult,
        device_id: String,
        task_id: TaskId,
    },
    StateChangeUnsubscription {
        result: CmdResult,
        device_id: String,
        task_id: TaskId,
    },
    StateChange {
        device_id: String,
        task_id: TaskId,
        last_state: DeviceState,
        current_state: DeviceState,
    },
    TransitionStatus {
        device_id: String,
        task_id: TaskId,
        transition: Transition,
        result: CmdResult,
        current_state: DeviceState,
    },
    Properties {
        request_id: u64,
        device_id: String,
        task_id: TaskId,
        result: CmdResult,
        props: DeviceProperties,
    },
    PropertiesSet {
        request_id: u64,
        device_id: String,
        task_id: TaskId,
        result: CmdResult,
    },
}

/// Error produced when a command frame cannot be decoded or encoded.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed command frame: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("command frame could not be encoded: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Wire frame carrying one or more commands.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CmdBundle {
    cmds: Vec<Cmd>,
}

impl CmdBundle {
    /// Frame holding a single command (the common case).
    pub fn of(cmd: Cmd) -> Self {
        Self { cmds: vec![cmd] }
    }

    pub fn push(&mut self, cmd: Cmd) {
        self.cmds.push(cmd);
    }

    pub fn len(&self) -> usize {
        self.cmds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cmds.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cmd> {
        self.cmds.iter()
    }

    /// Serializes the frame for the broadcast channel.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(CodecError::Encode)
    }

    /// Parses a frame received from the command channel.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(bytes).map_err(CodecError::Malformed)
    }
}

impl IntoIterator for CmdBundle {
    type Item = Cmd;
    type IntoIter = std::vec::IntoIter<Cmd>;

    fn into_iter(self) -> Self::IntoIter {
        self.cmds.into_iter()
    }
}

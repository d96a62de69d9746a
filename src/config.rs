//! # Topology configuration.
//!
//! Provides [`TopologyConfig`] (timing knobs of the subscription machinery)
//! and [`TopologyOptions`] (identity and fleet policy inputs supplied by the
//! enclosing controller).
//!
//! ## Sentinel values
//! - Per-operation timeout `Duration::ZERO` (passed per call, not stored
//!   here) → no deadline.
//! - `collections` entries with `n_min = 0` → no minimum defined; a failure
//!   in such a collection can never be absorbed.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use crate::device::{CollectionInfo, TaskId};

/// Timing configuration for the topology core.
///
/// Defines:
/// - **Subscription heartbeats**: renewal cadence devices expect
/// - **Connect gate**: how long to wait for every device to confirm its
///   state-change subscription, and at what granularity to poll
///
/// ## Field semantics
/// - `heartbeat_interval`: period of the subscription-renewal broadcast;
///   also carried inside subscribe/heartbeat commands so devices know the
///   expected cadence
/// - `connect_wait`: upper bound on the publisher-count wait (used both for
///   the optional connect gate and for the unsubscribe drain at teardown)
/// - `poll_interval`: granularity of the publisher-count wait
/// - `block_until_connected`: when true, attachment fails with
///   [`ConnectionRefused`](crate::OpError::ConnectionRefused) unless every
///   device confirms within `connect_wait`
#[derive(Clone, Debug)]
pub struct TopologyConfig {
    /// Interval between subscription heartbeat broadcasts.
    pub heartbeat_interval: Duration,

    /// Maximum time to wait for the expected publisher count.
    pub connect_wait: Duration,

    /// Poll granularity of the publisher-count wait.
    pub poll_interval: Duration,

    /// Whether attachment blocks until all devices confirmed subscriptions.
    pub block_until_connected: bool,
}

impl Default for TopologyConfig {
    /// Default configuration:
    ///
    /// - `heartbeat_interval = 600_000 ms`
    /// - `connect_wait = 30 s`
    /// - `poll_interval = 50 ms`
    /// - `block_until_connected = false`
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(600_000),
            connect_wait: Duration::from_secs(30),
            poll_interval: Duration::from_millis(50),
            block_until_connected: false,
        }
    }
}

/// Identity and fleet policy for one topology attachment.
///
/// These inputs come from the enclosing controller: which partition this
/// topology belongs to, the shared run-number counter stamped into logs,
/// which tasks may be silently dropped on failure, and the per-collection
/// minimum-instance accounting.
#[derive(Clone, Debug, Default)]
pub struct TopologyOptions {
    /// Partition this topology belongs to (carried in every log line).
    pub partition: String,

    /// Run number of the current activation, shared with the controller.
    pub run: Arc<AtomicU64>,

    /// Tasks whose failure may be silently absorbed.
    pub expendable: HashSet<TaskId>,

    /// Collection accounting, keyed by collection type name.
    pub collections: HashMap<String, CollectionInfo>,
}

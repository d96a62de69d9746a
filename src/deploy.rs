//! # Deployment-service seam.
//!
//! [`DeployClient`] is the contract the topology core consumes from the
//! lower-level distributed deployment service: task iteration, command
//! broadcast, and the two event subscriptions (inbound custom commands,
//! task termination). Production code wraps the real service; tests plug in
//! a scripted in-memory fleet.
//!
//! ## Contract
//! - `broadcast` must be non-blocking: it enqueues the frame and returns.
//!   The core calls it while holding its mutex.
//! - `subscribe_commands` / `subscribe_task_done` hand out receivers the
//!   core drains from dedicated listener tasks; per-device ordering on each
//!   channel must match the order the service observed.
//! - `tasks` and `collection` are synchronous lookups against the deployed
//!   topology description.

use tokio::sync::mpsc;

use crate::device::{CollectionId, TaskId};

/// One deployed task, as enumerated by the deployment service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub id: TaskId,
    /// Runtime collection the task belongs to; `0` if standalone.
    pub collection: CollectionId,
    /// Hierarchical topology path (used for subset selection).
    pub path: String,
    pub name: String,
}

/// Termination notification for one task.
#[derive(Debug, Clone)]
pub struct TaskDoneEvent {
    pub task_id: TaskId,
    pub exit_code: i32,
    pub signal: i32,
    pub path: String,
    pub host: String,
    pub work_dir: String,
}

/// Resolved runtime collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRecord {
    pub path: String,
    /// Collection type name; the key of the nMin accounting.
    pub name: String,
}

/// Raw inbound frame from the custom command channel.
#[derive(Debug, Clone)]
pub struct InboundRaw {
    pub payload: Vec<u8>,
    /// Channel id of the sending device (diagnostics only).
    pub sender: u64,
}

/// Client interface of the deployment service, as consumed by the core.
pub trait DeployClient: Send + Sync + 'static {
    /// Enumerates deployed tasks, optionally restricted to a topology path
    /// (empty selects all). Path matching is owned by the deployment
    /// service; the core only intersects the result with its own ignore
    /// flags.
    fn tasks(&self, path: &str) -> Vec<TaskRecord>;

    /// Broadcasts an encoded command frame to tasks matching `path`
    /// (empty selects all). Non-blocking by contract.
    fn broadcast(&self, payload: Vec<u8>, path: &str);

    /// Subscribes to inbound custom commands. Called once per topology.
    fn subscribe_commands(&self) -> mpsc::UnboundedReceiver<InboundRaw>;

    /// Subscribes to task termination events. Called once per topology.
    fn subscribe_task_done(&self) -> mpsc::UnboundedReceiver<TaskDoneEvent>;

    /// Whether the deployment session is still running.
    fn is_running(&self) -> bool;

    /// Deployment session identifier (diagnostics only).
    fn session_id(&self) -> String;

    /// Resolves a runtime collection id to its path and type name.
    fn collection(&self, id: CollectionId) -> Option<CollectionRecord>;
}

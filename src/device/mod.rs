//! Device model: states, the indexed status table, and the failure policy.
//!
//! ## Files & responsibilities
//! - **state.rs**: the externally visible device state machine —
//!   [`DeviceState`], [`Transition`], and the deterministic
//!   transition → target-state mapping.
//! - **table.rs**: [`StateTable`], the dense indexed table of per-device
//!   status; single source of truth, mutated only under the core mutex.
//! - **expendable.rs**: [`FailurePolicy`], which decides whether a device
//!   failure is absorbed (expendable flag, collection nMin accounting) or
//!   fails the in-flight operations.

mod expendable;
mod state;
mod table;

pub use expendable::{CollectionInfo, FailurePolicy};
pub use state::{DeviceState, Transition};
pub use table::{DeviceStatus, StateTable, SubscriptionAck};

/// Opaque 64-bit id of a managed worker process.
pub type TaskId = u64;

/// Runtime id of a co-scheduled device group; `0` means none.
pub type CollectionId = u64;

/// Key/value property list exchanged with devices.
pub type DeviceProperties = Vec<(String, String)>;

//! # topovisor
//!
//! **Topovisor** is the topology control core of an online device
//! controller: it drives a fleet of distributed worker processes
//! ("devices") through a prescribed state machine across a cluster,
//! handling partial failures, subscriptions, and asynchronous
//! request-response interactions with a lower-level deployment service.
//!
//! ## Features
//!
//! | Area                | Description                                                           | Key types / traits                          |
//! |---------------------|-----------------------------------------------------------------------|---------------------------------------------|
//! | **Facade**          | Attach to a deployed topology; run operations; orderly teardown.      | [`Topology`]                                |
//! | **Operations**      | Concurrent state changes, state waits, property gets/sets.            | [`ChangeStateResult`], [`WaitForStateResult`], [`GetPropertiesResult`], [`SetPropertiesResult`] |
//! | **Device model**    | The visible device state machine and per-device status.               | [`DeviceState`], [`Transition`], [`DeviceStatus`] |
//! | **Failure policy**  | Expendable devices and collection nMin accounting.                    | [`CollectionInfo`]                          |
//! | **Commands**        | Typed controller↔device envelope.                                     | [`Cmd`], [`CmdBundle`], [`CmdResult`]       |
//! | **Deployment seam** | Contract consumed from the deployment service.                        | [`DeployClient`]                            |
//! | **Errors**          | Operation completion codes.                                           | [`OpError`]                                 |
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use topovisor::{Topology, TopologyConfig, TopologyOptions, Transition};
//! # async fn demo(deploy: Arc<dyn topovisor::DeployClient>) -> Result<(), topovisor::OpError> {
//! let topo = Topology::attach(deploy, TopologyConfig::default(), TopologyOptions::default()).await?;
//!
//! // Walk the whole fleet to Running.
//! for step in [
//!     Transition::InitDevice,
//!     Transition::CompleteInit,
//!     Transition::Bind,
//!     Transition::Connect,
//!     Transition::InitTask,
//!     Transition::Run,
//! ] {
//!     let res = topo.change_state(step, "", Duration::from_secs(10)).await;
//!     res.outcome?;
//! }
//!
//! topo.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency model
//! The core owns no thread of its own: it is driven by the deployment
//! service's event channels, per-operation deadline timers, and caller
//! tasks. Every mutation of shared state happens under one core mutex;
//! operation results are delivered over per-op channels, so completion
//! handlers never run under the lock.
//!
//! ---

mod commands;
mod config;
mod core;
mod deploy;
mod device;
mod error;
mod ops;

// ---- Public re-exports ----

pub use commands::{Cmd, CmdBundle, CmdResult, CodecError};
pub use config::{TopologyConfig, TopologyOptions};
pub use core::Topology;
pub use deploy::{CollectionRecord, DeployClient, InboundRaw, TaskDoneEvent, TaskRecord};
pub use device::{
    CollectionId, CollectionInfo, DeviceProperties, DeviceState, DeviceStatus, TaskId, Transition,
};
pub use error::OpError;
pub use ops::{
    ChangeStateResult, GetPropertiesResult, OpId, SetPropertiesResult, WaitForStateResult,
};

//! Topology core: facade, command dispatch, subscriptions, exit sink.
//!
//! This module contains the embedded implementation of the topology
//! control core. The only public API re-exported from here is
//! [`Topology`]. Everything else is an internal building block the facade
//! wires together.
//!
//! ## Files & responsibilities
//! - **topology.rs**: public facade; owns the guarded core (state table,
//!   failure policy, op registries), spawns the listener tasks, registers
//!   operations, drives teardown.
//! - **dispatch.rs**: inbound command handling: decodes frames from the
//!   custom command channel and applies each command under the core mutex.
//! - **subscription.rs**: subscribe / heartbeat / unsubscribe lifecycle
//!   with the devices, plus the publisher-count wait.
//! - **exit.rs**: task-termination sink; classifies exits, applies the
//!   failure policy, feeds the in-flight operations.
//!
//! ## Wiring (module-level flow)
//! ```text
//! Topology::attach()
//!   ├─ build StateTable from the deployment task iteration
//!   ├─ spawn command listener  ──► dispatch::handle_frame (under M)
//!   ├─ spawn task-done listener ─► exit::on_task_done     (under M)
//!   ├─ broadcast SubscribeToStateChange + spawn heartbeat loop
//!   └─ optional: wait until every device confirmed (connect gate)
//!
//! caller ──► change_state / wait_for_state / get_properties / set_properties
//!   └─ under M: sweep own registry, insert op, broadcast command,
//!      reset_count, try_complete; then await the op's reply channel
//!
//! deployment events ──► listeners ──► mutate table under M
//!   └─ notify every matching in-flight op → pending | ok | error
//!
//! Topology::shutdown()
//!   ├─ cancel heartbeat, broadcast UnsubscribeFromStateChange
//!   ├─ wait for publisher count 0
//!   └─ complete every pending op with OperationCanceled
//! ```
//!
//! ## Rules
//! - Every mutation of the state table and the op registries happens under
//!   the single core mutex; no other lock guards core invariants.
//! - Listener and heartbeat tasks hold only weak references to the core,
//!   so dropping the last [`Topology`] handle tears the topology down.
//! - Per-device event order is preserved: each source channel is drained
//!   by one task and each message is applied atomically under the mutex.

mod dispatch;
mod exit;
mod subscription;
mod topology;

pub use topology::Topology;

//! # Topology facade.
//!
//! [`Topology`] is the caller-facing entry API of the control core. It is a
//! cheap clonable handle; the shared state behind it is owned by one
//! [`Inner`] guarded by the single core mutex.
//!
//! ## Entry points
//! Each operation has an async entry returning the op outcome and a
//! `*_blocking` wrapper for synchronous callers (must not be called from
//! async context). Timeout `Duration::ZERO` means no deadline.
//!
//! ## Teardown
//! [`Topology::shutdown`] is the orderly path: stop heartbeats,
//! unsubscribe, drain confirmations, cancel pending operations. Dropping
//! the last handle without `shutdown()` still cancels every pending
//! operation, so completion handlers fire exactly once in all paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::commands::{Cmd, CmdBundle};
use crate::config::{TopologyConfig, TopologyOptions};
use crate::deploy::{DeployClient, TaskRecord};
use crate::device::{
    DeviceProperties, DeviceState, DeviceStatus, FailurePolicy, StateTable, TaskId, Transition,
};
use crate::error::OpError;
use crate::ops::{
    ChangeStateOp, ChangeStateResult, GetPropertiesOp, GetPropertiesResult, OpId, OpSlab,
    SetPropertiesOp, SetPropertiesResult, WaitForStateOp, WaitForStateResult,
};

/// State guarded by the core mutex. Single serialization point of the
/// whole topology.
pub(crate) struct Core {
    pub table: StateTable,
    pub policy: FailurePolicy,
    pub change: OpSlab<ChangeStateOp>,
    pub wait: OpSlab<WaitForStateOp>,
    pub get: OpSlab<GetPropertiesOp>,
    pub set: OpSlab<SetPropertiesOp>,
}

/// Shared state behind the [`Topology`] handles.
pub(crate) struct Inner {
    pub deploy: Arc<dyn DeployClient>,
    pub cfg: TopologyConfig,
    pub partition: String,
    pub run: Arc<AtomicU64>,
    /// Runtime handle captured at attachment; lets blocking callers arm
    /// deadline timers without being on the runtime themselves.
    pub rt: tokio::runtime::Handle,
    pub core: Mutex<Core>,
    /// Wakes publisher-count waiters after subscription-ack mutations.
    pub subs_notify: Notify,
    /// Cancels the heartbeat loop (child of `stop`).
    pub heartbeat: CancellationToken,
    /// Cancels the listener tasks.
    pub stop: CancellationToken,
    /// Teardown latch; flips exactly once.
    pub down: AtomicBool,
}

/// Which registry a deadline timer belongs to.
#[derive(Debug, Clone, Copy)]
enum OpDeadline {
    ChangeState(OpId),
    WaitForState(OpId),
    GetProperties(OpId),
    SetProperties(OpId),
}

/// Handle to an attached topology.
///
/// Clonable; all clones drive the same topology. See the module docs for
/// the lifecycle.
#[derive(Clone)]
pub struct Topology {
    inner: Arc<Inner>,
}

impl Topology {
    /// Attaches the control core to a deployed topology.
    ///
    /// Builds the device table from the deployment task iteration, starts
    /// the command and exit listeners, subscribes every device to state
    /// changes and starts the heartbeat loop. With
    /// [`block_until_connected`](TopologyConfig::block_until_connected)
    /// set, waits until every device confirmed its subscription and fails
    /// with [`OpError::ConnectionRefused`] when the connect window closes
    /// first.
    pub async fn attach(
        deploy: Arc<dyn DeployClient>,
        cfg: TopologyConfig,
        opts: TopologyOptions,
    ) -> Result<Topology, OpError> {
        let records = deploy.tasks("");
        let table = StateTable::new(
            records.iter().map(|r| (r.id, r.collection)),
            &opts.expendable,
        );

        // resolve collection names once, so the failure policy never calls
        // out to the deployment service under the core mutex
        let mut names = HashMap::new();
        for record in &records {
            if record.collection != 0 && !names.contains_key(&record.collection) {
                match deploy.collection(record.collection) {
                    Some(col) => {
                        names.insert(record.collection, col.name);
                    }
                    None => warn!(
                        partition = %opts.partition,
                        collection = record.collection,
                        "runtime collection cannot be resolved"
                    ),
                }
            }
        }

        let expected = table.len();
        let stop = CancellationToken::new();
        let inner = Arc::new(Inner {
            deploy,
            partition: opts.partition,
            run: opts.run,
            rt: tokio::runtime::Handle::current(),
            core: Mutex::new(Core {
                table,
                policy: FailurePolicy::new(opts.collections, names),
                change: OpSlab::new(),
                wait: OpSlab::new(),
                get: OpSlab::new(),
                set: OpSlab::new(),
            }),
            subs_notify: Notify::new(),
            heartbeat: stop.child_token(),
            stop,
            down: AtomicBool::new(false),
            cfg,
        });

        inner.spawn_listeners();
        inner.subscribe_to_state_changes();

        if inner.cfg.block_until_connected && !inner.wait_for_publishers(expected).await {
            error!(
                partition = %inner.partition,
                run = inner.run_nr(),
                expected,
                "devices did not confirm state-change subscriptions in time"
            );
            return Err(OpError::ConnectionRefused);
        }

        info!(
            partition = %inner.partition,
            run = inner.run_nr(),
            session = %inner.deploy.session_id(),
            devices = expected,
            "topology attached"
        );
        Ok(Topology { inner })
    }

    /// Initiates a state transition on selected devices and waits for all
    /// of them to reach the transition's target state.
    pub async fn change_state(
        &self,
        transition: Transition,
        path: &str,
        timeout: Duration,
    ) -> ChangeStateResult {
        let rx = self.inner.start_change_state(transition, path, timeout);
        rx.await.unwrap_or_else(|_| ChangeStateResult::canceled())
    }

    /// Blocking variant of [`change_state`](Self::change_state). Must not
    /// be called from async context.
    pub fn change_state_blocking(
        &self,
        transition: Transition,
        path: &str,
        timeout: Duration,
    ) -> ChangeStateResult {
        let rx = self.inner.start_change_state(transition, path, timeout);
        rx.blocking_recv()
            .unwrap_or_else(|_| ChangeStateResult::canceled())
    }

    /// Waits for selected devices to reach the given `(last, current)`
    /// state pair. [`DeviceState::Undefined`] as `target_last` matches any
    /// last state. Sends no device traffic.
    pub async fn wait_for_state(
        &self,
        target_last: DeviceState,
        target_current: DeviceState,
        path: &str,
        timeout: Duration,
    ) -> WaitForStateResult {
        let rx = self
            .inner
            .start_wait_for_state(target_last, target_current, path, timeout);
        rx.await.unwrap_or_else(|_| WaitForStateResult::canceled())
    }

    /// Blocking variant of [`wait_for_state`](Self::wait_for_state).
    pub fn wait_for_state_blocking(
        &self,
        target_last: DeviceState,
        target_current: DeviceState,
        path: &str,
        timeout: Duration,
    ) -> WaitForStateResult {
        let rx = self
            .inner
            .start_wait_for_state(target_last, target_current, path, timeout);
        rx.blocking_recv()
            .unwrap_or_else(|_| WaitForStateResult::canceled())
    }

    /// Queries properties matching `query` (a key regex interpreted by the
    /// devices) on selected devices.
    pub async fn get_properties(
        &self,
        query: &str,
        path: &str,
        timeout: Duration,
    ) -> GetPropertiesResult {
        let rx = self.inner.start_get_properties(query, path, timeout);
        rx.await.unwrap_or_else(|_| GetPropertiesResult::canceled())
    }

    /// Blocking variant of [`get_properties`](Self::get_properties).
    pub fn get_properties_blocking(
        &self,
        query: &str,
        path: &str,
        timeout: Duration,
    ) -> GetPropertiesResult {
        let rx = self.inner.start_get_properties(query, path, timeout);
        rx.blocking_recv()
            .unwrap_or_else(|_| GetPropertiesResult::canceled())
    }

    /// Writes properties on selected devices and collects confirmations.
    pub async fn set_properties(
        &self,
        props: DeviceProperties,
        path: &str,
        timeout: Duration,
    ) -> SetPropertiesResult {
        let rx = self.inner.start_set_properties(props, path, timeout);
        rx.await.unwrap_or_else(|_| SetPropertiesResult::canceled())
    }

    /// Blocking variant of [`set_properties`](Self::set_properties).
    pub fn set_properties_blocking(
        &self,
        props: DeviceProperties,
        path: &str,
        timeout: Duration,
    ) -> SetPropertiesResult {
        let rx = self.inner.start_set_properties(props, path, timeout);
        rx.blocking_recv()
            .unwrap_or_else(|_| SetPropertiesResult::canceled())
    }

    /// Snapshot of the full device table.
    pub fn current_state(&self) -> Vec<DeviceStatus> {
        self.inner.core.lock().table.snapshot()
    }

    /// State shared by all non-ignored devices, if they agree.
    pub fn aggregated_state(&self) -> Option<DeviceState> {
        self.inner.core.lock().table.aggregated_state()
    }

    /// Whether every non-ignored device currently sits in `state`.
    pub fn state_equals(&self, state: DeviceState) -> bool {
        self.aggregated_state() == Some(state)
    }

    /// Number of devices currently publishing state changes.
    pub fn publisher_count(&self) -> usize {
        self.inner.core.lock().table.publishers()
    }

    pub fn config(&self) -> &TopologyConfig {
        &self.inner.cfg
    }

    /// Orderly teardown: stop heartbeats, unsubscribe from state changes,
    /// wait for the confirmations to drain, cancel every pending
    /// operation with [`OpError::Canceled`]. Idempotent.
    pub async fn shutdown(&self) {
        if self.inner.down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.unsubscribe_from_state_changes().await;
        self.inner.stop.cancel();
        self.inner.cancel_pending_ops();
        info!(
            partition = %self.inner.partition,
            run = self.inner.run_nr(),
            "topology detached"
        );
    }
}

impl Inner {
    pub(crate) fn run_nr(&self) -> u64 {
        self.run.load(Ordering::Relaxed)
    }

    /// Encodes and broadcasts one command. Sends are enqueue-only by the
    /// deployment contract, so this is safe to call under the core mutex.
    pub(crate) fn send(&self, cmd: Cmd, path: &str) {
        match CmdBundle::of(cmd).encode() {
            Ok(bytes) => self.deploy.broadcast(bytes, path),
            Err(err) => error!(
                partition = %self.partition,
                %err,
                "failed to encode outbound command"
            ),
        }
    }

    /// Spawns the two listener tasks. They hold only weak references so
    /// the topology tears down when the last handle is dropped.
    fn spawn_listeners(self: &Arc<Self>) {
        let mut cmd_rx = self.deploy.subscribe_commands();
        let weak = Arc::downgrade(self);
        let stop = self.stop.clone();
        self.rt.spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    frame = cmd_rx.recv() => {
                        let Some(frame) = frame else { break };
                        let Some(inner) = weak.upgrade() else { break };
                        inner.handle_frame(frame);
                    }
                }
            }
        });

        let mut done_rx = self.deploy.subscribe_task_done();
        let weak = Arc::downgrade(self);
        let stop = self.stop.clone();
        self.rt.spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    ev = done_rx.recv() => {
                        let Some(ev) = ev else { break };
                        let Some(inner) = weak.upgrade() else { break };
                        inner.on_task_done(ev);
                    }
                }
            }
        });
    }

    /// Live (non-ignored) task ids out of a path selection.
    fn live_selection(table: &StateTable, records: &[TaskRecord]) -> Vec<TaskId> {
        records
            .iter()
            .filter(|r| table.get(r.id).is_some_and(|d| !d.ignored))
            .map(|r| r.id)
            .collect()
    }

    fn start_change_state(
        self: &Arc<Self>,
        transition: Transition,
        path: &str,
        timeout: Duration,
    ) -> oneshot::Receiver<ChangeStateResult> {
        let records = self.deploy.tasks(path);
        let id = rand::random::<OpId>();

        let mut core = self.core.lock();
        let core = &mut *core;
        core.change.sweep();
        let selected = Self::live_selection(&core.table, &records);
        let (mut op, rx, deadline) = ChangeStateOp::new(transition.target(), selected);
        self.send(Cmd::ChangeState { transition }, path);
        op.reset_count(&core.table);
        op.try_complete(&core.table);
        core.change.insert(id, op);
        self.arm_deadline(OpDeadline::ChangeState(id), timeout, deadline);
        rx
    }

    fn start_wait_for_state(
        self: &Arc<Self>,
        target_last: DeviceState,
        target_current: DeviceState,
        path: &str,
        timeout: Duration,
    ) -> oneshot::Receiver<WaitForStateResult> {
        let records = self.deploy.tasks(path);
        let id = rand::random::<OpId>();

        let mut core = self.core.lock();
        let core = &mut *core;
        core.wait.sweep();
        let selected = Self::live_selection(&core.table, &records);
        let (mut op, rx, deadline) = WaitForStateOp::new(target_last, target_current, selected);
        op.reset_count(&core.table);
        op.try_complete(&core.table);
        core.wait.insert(id, op);
        self.arm_deadline(OpDeadline::WaitForState(id), timeout, deadline);
        rx
    }

    fn start_get_properties(
        self: &Arc<Self>,
        query: &str,
        path: &str,
        timeout: Duration,
    ) -> oneshot::Receiver<GetPropertiesResult> {
        let records = self.deploy.tasks(path);
        let id = rand::random::<OpId>();

        let mut core = self.core.lock();
        let core = &mut *core;
        core.get.sweep();
        let selected = Self::live_selection(&core.table, &records);
        let (mut op, rx, deadline) = GetPropertiesOp::new(selected);
        self.send(
            Cmd::GetProperties {
                request_id: id,
                query: query.to_string(),
            },
            path,
        );
        op.try_complete();
        core.get.insert(id, op);
        self.arm_deadline(OpDeadline::GetProperties(id), timeout, deadline);
        rx
    }

    fn start_set_properties(
        self: &Arc<Self>,
        props: DeviceProperties,
        path: &str,
        timeout: Duration,
    ) -> oneshot::Receiver<SetPropertiesResult> {
        let records = self.deploy.tasks(path);
        let id = rand::random::<OpId>();

        let mut core = self.core.lock();
        let core = &mut *core;
        core.set.sweep();
        let selected = Self::live_selection(&core.table, &records);
        let (mut op, rx, deadline) = SetPropertiesOp::new(selected);
        self.send(
            Cmd::SetProperties {
                request_id: id,
                props,
            },
            path,
        );
        op.reset_count(&core.table);
        op.try_complete();
        core.set.insert(id, op);
        self.arm_deadline(OpDeadline::SetProperties(id), timeout, deadline);
        rx
    }

    /// Arms a per-op deadline timer. `Duration::ZERO` disables the
    /// deadline. The timer holds a weak reference only; completion cancels
    /// it through the op's token.
    fn arm_deadline(self: &Arc<Self>, which: OpDeadline, timeout: Duration, token: CancellationToken) {
        if timeout.is_zero() {
            return;
        }
        let weak = Arc::downgrade(self);
        self.rt.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    let Some(inner) = weak.upgrade() else { return };
                    let mut core = inner.core.lock();
                    let core = &mut *core;
                    match which {
                        OpDeadline::ChangeState(id) => {
                            if let Some(op) = core.change.get_mut(id) {
                                op.timeout(&core.table);
                            }
                        }
                        OpDeadline::WaitForState(id) => {
                            if let Some(op) = core.wait.get_mut(id) {
                                op.timeout();
                            }
                        }
                        OpDeadline::GetProperties(id) => {
                            if let Some(op) = core.get.get_mut(id) {
                                op.timeout();
                            }
                        }
                        OpDeadline::SetProperties(id) => {
                            if let Some(op) = core.set.get_mut(id) {
                                op.timeout();
                            }
                        }
                    }
                }
            }
        });
    }

    /// Completes every pending operation with [`OpError::Canceled`].
    pub(crate) fn cancel_pending_ops(&self) {
        let mut core = self.core.lock();
        let core = &mut *core;
        for op in core.change.values_mut() {
            op.cancel(&core.table);
        }
        for op in core.wait.values_mut() {
            op.cancel();
        }
        for op in core.get.values_mut() {
            op.cancel();
        }
        for op in core.set.values_mut() {
            op.cancel();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // best-effort teardown when the last handle is dropped without an
        // explicit shutdown(): no waiting is possible here, but pending
        // operations still complete exactly once
        if !self.down.swap(true, Ordering::SeqCst) {
            self.heartbeat.cancel();
            self.stop.cancel();
            self.send(Cmd::UnsubscribeFromStateChange, "");
        }
        self.cancel_pending_ops();
    }
}

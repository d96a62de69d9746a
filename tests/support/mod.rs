//! Scripted in-memory deployment fleet used by the integration tests.
//!
//! [`SimFleet`] implements [`DeployClient`] over tokio channels: every
//! broadcast frame is decoded and answered synchronously per device,
//! according to that device's scripted behavior (well-behaved, silent,
//! transition-rejecting, property-write-failing). Exit events are injected
//! explicitly with [`SimFleet::exit`].

// not every test binary exercises every helper
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use topovisor::{
    Cmd, CmdBundle, CmdResult, CollectionId, CollectionRecord, DeployClient, DeviceProperties,
    DeviceState, InboundRaw, TaskDoneEvent, TaskId, TaskRecord, Transition,
};

/// Scripted behavior of one simulated device.
struct Behavior {
    state: DeviceState,
    silent: bool,
    reject_transitions: bool,
    fail_get: bool,
    fail_set: bool,
    props: DeviceProperties,
}

impl Behavior {
    fn well_behaved() -> Self {
        Self {
            state: DeviceState::Idle,
            silent: false,
            reject_transitions: false,
            fail_get: false,
            fail_set: false,
            props: vec![("severity".into(), "info".into())],
        }
    }
}

struct FleetInner {
    records: Vec<TaskRecord>,
    collections: HashMap<CollectionId, CollectionRecord>,
    behaviors: Mutex<HashMap<TaskId, Behavior>>,
    cmd_tx: Mutex<Option<mpsc::UnboundedSender<InboundRaw>>>,
    done_tx: Mutex<Option<mpsc::UnboundedSender<TaskDoneEvent>>>,
    running: AtomicBool,
    heartbeats: AtomicU64,
}

/// In-memory stand-in for the deployment service.
pub struct SimFleet {
    inner: FleetInner,
}

/// Builds a [`SimFleet`] with deterministic task ids (1, 2, 3, …).
pub struct FleetBuilder {
    records: Vec<TaskRecord>,
    collections: HashMap<CollectionId, CollectionRecord>,
    next_task: TaskId,
    next_collection: CollectionId,
}

impl FleetBuilder {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            collections: HashMap::new(),
            next_task: 1,
            next_collection: 100,
        }
    }

    /// Adds one standalone device under the given topology path.
    pub fn device(mut self, path: &str) -> Self {
        let id = self.next_task;
        self.next_task += 1;
        self.records.push(TaskRecord {
            id,
            collection: 0,
            path: path.to_string(),
            name: format!("device{id}"),
        });
        self
    }

    /// Adds `n` standalone devices under `main/device<i>` paths.
    pub fn devices(mut self, n: usize) -> Self {
        for _ in 0..n {
            let id = self.next_task;
            self = self.device(&format!("main/device{id}"));
        }
        self
    }

    /// Adds one runtime instance of collection type `name` with `members`
    /// devices.
    pub fn collection_instance(mut self, name: &str, members: usize) -> Self {
        let collection = self.next_collection;
        self.next_collection += 1;
        let instance = collection - 100;
        self.collections.insert(
            collection,
            CollectionRecord {
                path: format!("main/{name}/{instance}"),
                name: name.to_string(),
            },
        );
        for m in 0..members {
            let id = self.next_task;
            self.next_task += 1;
            self.records.push(TaskRecord {
                id,
                collection,
                path: format!("main/{name}/{instance}/worker{m}"),
                name: format!("worker{m}"),
            });
        }
        self
    }

    pub fn build(self) -> Arc<SimFleet> {
        let behaviors = self
            .records
            .iter()
            .map(|r| (r.id, Behavior::well_behaved()))
            .collect();
        Arc::new(SimFleet {
            inner: FleetInner {
                records: self.records,
                collections: self.collections,
                behaviors: Mutex::new(behaviors),
                cmd_tx: Mutex::new(None),
                done_tx: Mutex::new(None),
                running: AtomicBool::new(true),
                heartbeats: AtomicU64::new(0),
            },
        })
    }
}

impl SimFleet {
    /// Task ids of every simulated device, in construction order.
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.inner.records.iter().map(|r| r.id).collect()
    }

    /// Injects a (possibly duplicate) subscription confirmation.
    pub fn push_subscription_ack(&self, id: TaskId) {
        self.reply(
            id,
            Cmd::StateChangeSubscription {
                result: CmdResult::Ok,
                device_id: format!("device-{id}"),
                task_id: id,
            },
        );
    }

    pub fn set_silent(&self, id: TaskId, silent: bool) {
        self.inner.behaviors.lock().get_mut(&id).unwrap().silent = silent;
    }

    pub fn set_reject_transitions(&self, id: TaskId) {
        self.inner
            .behaviors
            .lock()
            .get_mut(&id)
            .unwrap()
            .reject_transitions = true;
    }

    pub fn set_fail_get(&self, id: TaskId) {
        self.inner.behaviors.lock().get_mut(&id).unwrap().fail_get = true;
    }

    pub fn set_fail_set(&self, id: TaskId) {
        self.inner.behaviors.lock().get_mut(&id).unwrap().fail_set = true;
    }

    pub fn set_session_running(&self, running: bool) {
        self.inner.running.store(running, Ordering::SeqCst);
    }

    /// Number of heartbeat broadcasts observed so far.
    pub fn heartbeats(&self) -> u64 {
        self.inner.heartbeats.load(Ordering::SeqCst)
    }

    /// Terminates one device: it goes silent and a task-done event is
    /// delivered to the controller.
    pub fn exit(&self, id: TaskId, exit_code: i32, signal: i32) {
        let path = self
            .inner
            .records
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.path.clone())
            .unwrap_or_default();
        self.set_silent(id, true);
        if let Some(tx) = &*self.inner.done_tx.lock() {
            let _ = tx.send(TaskDoneEvent {
                task_id: id,
                exit_code,
                signal,
                path,
                host: "sim-host".into(),
                work_dir: "/tmp/sim".into(),
            });
        }
    }

    /// Injects a raw state-change notification for one device.
    pub fn push_state_change(&self, id: TaskId, last: DeviceState, current: DeviceState) {
        self.reply(
            id,
            Cmd::StateChange {
                device_id: format!("device-{id}"),
                task_id: id,
                last_state: last,
                current_state: current,
            },
        );
    }

    fn reply(&self, sender: TaskId, cmd: Cmd) {
        if let Some(tx) = &*self.inner.cmd_tx.lock() {
            let payload = CmdBundle::of(cmd).encode().expect("encode sim reply");
            let _ = tx.send(InboundRaw { payload, sender });
        }
    }

    fn matches(record: &TaskRecord, path: &str) -> bool {
        path.is_empty() || record.path.starts_with(path)
    }

    fn handle(&self, record: &TaskRecord, cmd: &Cmd) {
        let id = record.id;
        let mut behaviors = self.inner.behaviors.lock();
        let behavior = behaviors.get_mut(&id).expect("behavior");
        if behavior.silent {
            return;
        }
        match cmd {
            Cmd::SubscribeToStateChange { .. } => {
                drop(behaviors);
                self.reply(
                    id,
                    Cmd::StateChangeSubscription {
                        result: CmdResult::Ok,
                        device_id: format!("device-{id}"),
                        task_id: id,
                    },
                );
            }
            Cmd::UnsubscribeFromStateChange => {
                drop(behaviors);
                self.reply(
                    id,
                    Cmd::StateChangeUnsubscription {
                        result: CmdResult::Ok,
                        device_id: format!("device-{id}"),
                        task_id: id,
                    },
                );
            }
            Cmd::ChangeState { transition } => {
                if behavior.reject_transitions {
                    let state = behavior.state;
                    drop(behaviors);
                    self.reply(
                        id,
                        Cmd::TransitionStatus {
                            device_id: format!("device-{id}"),
                            task_id: id,
                            transition: *transition,
                            result: CmdResult::Failure,
                            current_state: state,
                        },
                    );
                } else {
                    let last = behavior.state;
                    behavior.state = transition.target();
                    let current = behavior.state;
                    drop(behaviors);
                    self.push_state_change(id, last, current);
                }
            }
            Cmd::GetProperties { request_id, .. } => {
                let (result, props) = if behavior.fail_get {
                    (CmdResult::Failure, Vec::new())
                } else {
                    (CmdResult::Ok, behavior.props.clone())
                };
                let request_id = *request_id;
                drop(behaviors);
                self.reply(
                    id,
                    Cmd::Properties {
                        request_id,
                        device_id: format!("device-{id}"),
                        task_id: id,
                        result,
                        props,
                    },
                );
            }
            Cmd::SetProperties { request_id, props } => {
                let result = if behavior.fail_set {
                    CmdResult::Failure
                } else {
                    behavior.props.extend(props.iter().cloned());
                    CmdResult::Ok
                };
                let request_id = *request_id;
                drop(behaviors);
                self.reply(
                    id,
                    Cmd::PropertiesSet {
                        request_id,
                        device_id: format!("device-{id}"),
                        task_id: id,
                        result,
                    },
                );
            }
            // heartbeats are counted fleet-wide in broadcast()
            _ => {}
        }
    }
}

impl DeployClient for SimFleet {
    fn tasks(&self, path: &str) -> Vec<TaskRecord> {
        self.inner
            .records
            .iter()
            .filter(|r| Self::matches(r, path))
            .cloned()
            .collect()
    }

    fn broadcast(&self, payload: Vec<u8>, path: &str) {
        let bundle = CmdBundle::decode(&payload).expect("decode broadcast frame");
        for cmd in bundle.iter() {
            if matches!(cmd, Cmd::SubscriptionHeartbeat { .. }) {
                self.inner.heartbeats.fetch_add(1, Ordering::SeqCst);
                continue;
            }
            for record in &self.inner.records {
                if Self::matches(record, path) {
                    self.handle(record, cmd);
                }
            }
        }
    }

    fn subscribe_commands(&self) -> mpsc::UnboundedReceiver<InboundRaw> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.cmd_tx.lock() = Some(tx);
        rx
    }

    fn subscribe_task_done(&self) -> mpsc::UnboundedReceiver<TaskDoneEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.done_tx.lock() = Some(tx);
        rx
    }

    fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    fn session_id(&self) -> String {
        "sim-session".into()
    }

    fn collection(&self, id: CollectionId) -> Option<CollectionRecord> {
        self.inner.collections.get(&id).cloned()
    }
}

/// Transitions from `Idle` all the way to `Running`.
pub const TO_RUNNING: &[Transition] = &[
    Transition::InitDevice,
    Transition::CompleteInit,
    Transition::Bind,
    Transition::Connect,
    Transition::InitTask,
    Transition::Run,
];

/// Drives the whole fleet through the given transitions, asserting each
/// step completes cleanly.
pub async fn drive(topo: &topovisor::Topology, steps: &[Transition]) {
    for &step in steps {
        let res = topo
            .change_state(step, "", std::time::Duration::ZERO)
            .await;
        assert!(res.outcome.is_ok(), "transition {step} failed: {res:?}");
    }
}

/// Lets every queued event drain. Only meaningful under a paused clock,
/// where time advances once all tasks are idle.
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
}

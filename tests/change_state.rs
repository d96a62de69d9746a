//! State-change operations against a scripted fleet.

mod support;

use std::sync::Arc;
use std::time::Duration;

use support::{drive, settle, FleetBuilder, SimFleet, TO_RUNNING};
use topovisor::{
    DeviceState, OpError, Topology, TopologyConfig, TopologyOptions, Transition,
};

async fn attach(fleet: Arc<SimFleet>) -> Topology {
    Topology::attach(fleet, TopologyConfig::default(), TopologyOptions::default())
        .await
        .expect("attach")
}

#[tokio::test(start_paused = true)]
async fn whole_fleet_reaches_the_target_state() {
    let fleet = FleetBuilder::new().devices(6).build();
    let topo = attach(fleet.clone()).await;

    let res = topo
        .change_state(Transition::InitDevice, "", Duration::ZERO)
        .await;
    assert!(res.outcome.is_ok(), "{res:?}");
    assert_eq!(res.state.len(), 6);
    for device in topo.current_state() {
        assert_eq!(device.state, DeviceState::InitializingDevice);
    }
    assert!(topo.state_equals(DeviceState::InitializingDevice));

    topo.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn init_then_reset_returns_to_idle() {
    let fleet = FleetBuilder::new().devices(3).build();
    let topo = attach(fleet).await;

    drive(&topo, &[Transition::InitDevice, Transition::ResetDevice]).await;
    assert!(topo.state_equals(DeviceState::Idle));

    topo.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn fleet_walks_to_running_and_back() {
    let fleet = FleetBuilder::new().devices(4).build();
    let topo = attach(fleet).await;

    drive(&topo, TO_RUNNING).await;
    assert!(topo.state_equals(DeviceState::Running));

    drive(
        &topo,
        &[
            Transition::Stop,
            Transition::ResetTask,
            Transition::ResetDevice,
        ],
    )
    .await;
    assert!(topo.state_equals(DeviceState::Idle));

    topo.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn refused_transition_fails_the_operation() {
    let fleet = FleetBuilder::new().devices(2).build();
    let topo = attach(fleet.clone()).await;

    fleet.set_reject_transitions(1);
    let res = topo
        .change_state(Transition::InitDevice, "", Duration::ZERO)
        .await;
    assert_eq!(res.outcome, Err(OpError::InvalidTransition));
    assert!(res.failed.contains(&1), "{res:?}");

    topo.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn refusal_from_device_already_at_target_is_tolerated() {
    let fleet = FleetBuilder::new().devices(2).build();
    let topo = attach(fleet.clone()).await;

    drive(&topo, &[Transition::InitDevice]).await;

    // device 1 now refuses, but it already sits at the target state
    fleet.set_reject_transitions(1);
    let res = topo
        .change_state(Transition::InitDevice, "", Duration::ZERO)
        .await;
    assert!(res.outcome.is_ok(), "{res:?}");

    topo.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn path_selection_only_touches_matching_devices() {
    let fleet = FleetBuilder::new()
        .device("main/samplers/s0")
        .device("main/sinks/k0")
        .build();
    let topo = attach(fleet).await;

    let res = topo
        .change_state(Transition::InitDevice, "main/samplers", Duration::ZERO)
        .await;
    assert!(res.outcome.is_ok());

    let state = topo.current_state();
    assert_eq!(state[0].state, DeviceState::InitializingDevice);
    assert_eq!(state[1].state, DeviceState::Undefined);

    topo.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn empty_selection_completes_immediately() {
    let fleet = FleetBuilder::new().devices(2).build();
    let topo = attach(fleet).await;

    let res = topo
        .change_state(Transition::Run, "no/such/path", Duration::ZERO)
        .await;
    assert!(res.outcome.is_ok());
    assert!(res.failed.is_empty());

    topo.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn silent_device_times_out_and_is_reported() {
    let fleet = FleetBuilder::new().devices(3).build();
    let topo = attach(fleet.clone()).await;

    fleet.set_silent(3, true);
    let res = topo
        .change_state(Transition::InitDevice, "", Duration::from_millis(500))
        .await;
    assert_eq!(res.outcome, Err(OpError::Timeout));
    assert_eq!(res.failed, vec![3]);

    topo.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn wait_completes_synchronously_after_a_successful_transition() {
    let fleet = FleetBuilder::new().devices(3).build();
    let topo = attach(fleet.clone()).await;

    drive(&topo, &TO_RUNNING[..5]).await; // up to InitTask → Ready
    settle().await;

    // no further device traffic is needed for the wait to complete
    for id in fleet.task_ids() {
        fleet.set_silent(id, true);
    }
    let res = topo
        .wait_for_state(
            DeviceState::Undefined,
            DeviceState::Ready,
            "",
            Duration::ZERO,
        )
        .await;
    assert!(res.outcome.is_ok(), "{res:?}");

    let res = topo
        .wait_for_state(
            DeviceState::DeviceReady,
            DeviceState::Ready,
            "",
            Duration::ZERO,
        )
        .await;
    assert!(res.outcome.is_ok(), "{res:?}");

    topo.shutdown().await;
}

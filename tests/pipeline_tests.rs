use lband_relay::config::ConfigKey;
use lband_relay::deployment::{Deployment, Region};
use lband_relay::device::{DeviceAddress, DeviceRole};
use lband_relay::keys::GpsTime;
use lband_relay::pipeline::*;
use lband_relay::retry::RetryPolicy;
use lband_relay::sim::{RecordingSleeper, SimulatedBus, SimulatedDevice};
use lband_relay::DeviceHandle;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

const RETRY: Duration = Duration::from_secs(2);

fn chain(bus: SimulatedBus) -> CorrectionChain<SimulatedBus> {
    CorrectionChain::new(bus, Deployment::default()).unwrap()
}

fn configurator() -> Configurator<RecordingSleeper> {
    Configurator::new(RetryPolicy::new(RETRY), RecordingSleeper::new())
}

fn position_device(chain: &CorrectionChain<SimulatedBus>) -> &SimulatedDevice {
    chain.bus().role(DeviceRole::PositionReceiver).unwrap()
}

fn correction_device(chain: &CorrectionChain<SimulatedBus>) -> &SimulatedDevice {
    chain.bus().role(DeviceRole::CorrectionReceiver).unwrap()
}

#[test]
fn test_happy_path_reaches_ready() {
    let mut chain = chain(SimulatedBus::default());
    let mut configurator = configurator();

    let result = configurator.run(&mut chain);

    assert_eq!(result.state, PipelineState::Ready);
    assert!(result.is_success());
    assert!(result.errors().is_empty());
    assert_eq!(result.correction_discovery.unwrap().attempts, 1);
    assert_eq!(result.position_discovery.unwrap().attempts, 1);
    assert_eq!(result.persist, PersistOutcome::Saved);
    assert_eq!(result.keys_loaded, Some(true));
    assert!(configurator.sleeper().sleeps().is_empty());

    let correction = correction_device(&chain);
    assert_eq!(correction.resets(), 1);
    assert_eq!(
        correction.active_value(ConfigKey::PmpCenterFrequency),
        Some(Region::Us.center_frequency_hz())
    );
    assert_eq!(correction.active_value(ConfigKey::Uart2Baudrate), Some(38_400));

    let position = position_device(&chain);
    assert_eq!(position.resets(), 0);
    assert_eq!(position.active_value(ConfigKey::Uart2Baudrate), Some(38_400));
    assert_eq!(position.persisted_value(ConfigKey::Uart1Baudrate), Some(115_200));
    assert_eq!(
        position.keys_installed(),
        Some((GpsTime::new(2224, 518_400), GpsTime::new(2228, 518_400)))
    );
}

#[test]
fn test_every_item_is_reported_in_order() {
    let deployment = Deployment::default();
    let mut chain = chain(SimulatedBus::default());
    let result = configurator().run(&mut chain);

    let correction = result.correction_config.unwrap();
    let expected: Vec<ConfigKey> = deployment.correction_config_set().iter().map(|i| i.key).collect();
    let applied: Vec<ConfigKey> = correction.items.iter().map(|i| i.key).collect();
    assert_eq!(applied, expected);

    let position = result.position_config.unwrap();
    assert_eq!(position.items.len(), deployment.position_config_set().len());
    assert!(position.accepted());
}

#[test]
fn test_eu_region_tunes_eu_frequency() {
    let mut chain = CorrectionChain::new(SimulatedBus::default(), Deployment::for_region(Region::Eu)).unwrap();
    configurator().run(&mut chain);

    assert_eq!(
        correction_device(&chain).active_value(ConfigKey::PmpCenterFrequency),
        Some(1_545_260_000)
    );
}

#[test]
fn test_discovery_retries_until_present() {
    for failures in 0..5u32 {
        let mut bus = SimulatedBus::default();
        bus.role_mut(DeviceRole::CorrectionReceiver)
            .unwrap()
            .faults_mut()
            .probe_failures = failures;

        let mut chain = chain(bus);
        let mut configurator = configurator();
        let result = configurator.run(&mut chain);

        assert_eq!(result.state, PipelineState::Ready, "failures = {}", failures);
        assert_eq!(result.correction_discovery.unwrap().attempts, failures + 1);
        assert_eq!(correction_device(&chain).probes(), failures + 1);

        let sleeps = configurator.sleeper().sleeps();
        assert_eq!(sleeps.len() as u32, failures);
        assert!(sleeps.iter().all(|d| *d == RETRY));
    }
}

#[test]
fn test_each_device_gets_its_own_attempt_count() {
    let mut bus = SimulatedBus::default();
    bus.role_mut(DeviceRole::CorrectionReceiver).unwrap().faults_mut().probe_failures = 2;
    bus.role_mut(DeviceRole::PositionReceiver).unwrap().faults_mut().probe_failures = 1;

    let mut chain = chain(bus);
    let mut configurator = configurator();
    let result = configurator.run(&mut chain);

    assert_eq!(result.correction_discovery.unwrap().attempts, 3);
    assert_eq!(result.position_discovery.unwrap().attempts, 2);
    assert_eq!(configurator.sleeper().sleeps().len(), 3);
}

#[test]
fn test_bounded_discovery_fails() {
    let mut bus = SimulatedBus::default();
    bus.role_mut(DeviceRole::CorrectionReceiver).unwrap().faults_mut().probe_failures = 10;

    let mut chain = chain(bus);
    let mut configurator = Configurator::new(RetryPolicy::new(RETRY).with_max_attempts(3), RecordingSleeper::new());
    let result = configurator.run(&mut chain);

    assert_eq!(result.state, PipelineState::Failed);
    assert_eq!(result.failed_stage(), Some(Stage::Discovery));
    assert!(result.position_discovery.is_none());
    assert!(result.correction_config.is_none());
    assert_eq!(configurator.sleeper().sleeps().len(), 2);
    assert_eq!(
        result.errors(),
        vec![PipelineError::DiscoveryTimeout {
            device: DeviceAddress::correction_receiver(),
            attempts: 3,
        }]
    );
}

#[test]
fn test_absent_device_is_never_found() {
    let mut bus = SimulatedBus::new();
    bus.attach(SimulatedDevice::new(DeviceAddress::correction_receiver()));

    let mut chain = chain(bus);
    let mut configurator = Configurator::new(RetryPolicy::new(RETRY).with_max_attempts(2), RecordingSleeper::new());
    let result = configurator.run(&mut chain);

    assert_eq!(result.state, PipelineState::Failed);
    assert!(result.correction_discovery.unwrap().connected);
    assert!(!result.position_discovery.unwrap().connected);
}

#[test]
fn test_rejected_item_does_not_stop_configuration() {
    let mut bus = SimulatedBus::default();
    bus.role_mut(DeviceRole::PositionReceiver)
        .unwrap()
        .faults_mut()
        .rejected_keys = vec![ConfigKey::Uart1Baudrate];

    let mut chain = chain(bus);
    let result = configurator().run(&mut chain);

    assert_eq!(result.state, PipelineState::Ready);
    assert!(!result.is_success());
    assert_eq!(result.failed_stage(), Some(Stage::PositionConfig));
    assert!(result.correction_config.as_ref().unwrap().accepted());

    let report = result.position_config.as_ref().unwrap();
    let rejected: Vec<ConfigKey> = report.rejected().map(|i| i.key).collect();
    assert_eq!(rejected, vec![ConfigKey::Uart1Baudrate]);
    assert_eq!(report.items.iter().filter(|i| i.accepted).count(), report.items.len() - 1);

    // Items after the rejected one were still applied
    let position = position_device(&chain);
    assert_eq!(position.config_value(ConfigKey::Uart1Baudrate), None);
    assert_eq!(position.config_value(ConfigKey::Uart1OutProtNmea), Some(1));
    assert_eq!(position.config_value(ConfigKey::MsgOutRxmCorI2c), Some(1));

    assert_eq!(result.keys_loaded, Some(true));
    assert_eq!(
        result.errors(),
        vec![PipelineError::ConfigWriteRejected {
            device: DeviceAddress::position_receiver(),
            key: ConfigKey::Uart1Baudrate,
            value: 115_200,
        }]
    );
}

#[test]
fn test_correction_receiver_is_reset_after_partial_failure() {
    let mut bus = SimulatedBus::default();
    bus.role_mut(DeviceRole::CorrectionReceiver)
        .unwrap()
        .faults_mut()
        .rejected_keys = vec![ConfigKey::PmpServiceId];

    let mut chain = chain(bus);
    let result = configurator().run(&mut chain);

    assert_eq!(result.failed_stage(), Some(Stage::CorrectionConfig));
    assert!(result.position_config.as_ref().unwrap().accepted());
    assert_eq!(correction_device(&chain).resets(), 1);
    assert_eq!(chain.correction().status().soft_resets, 1);
}

#[test]
fn test_lenient_key_rejection_still_ready() {
    let mut bus = SimulatedBus::default();
    bus.role_mut(DeviceRole::PositionReceiver).unwrap().faults_mut().reject_key_load = true;

    let mut chain = chain(bus);
    let result = configurator().run(&mut chain);

    assert_eq!(result.state, PipelineState::Ready);
    assert_eq!(result.keys_loaded, Some(false));
    assert_eq!(result.failed_stage(), Some(Stage::KeyLoad));
    assert!(position_device(&chain).keys_installed().is_none());
    assert_eq!(
        result.errors(),
        vec![PipelineError::KeyLoadRejected {
            device: DeviceAddress::position_receiver(),
        }]
    );
}

#[test]
fn test_strict_key_rejection_fails() {
    let mut bus = SimulatedBus::default();
    bus.role_mut(DeviceRole::PositionReceiver).unwrap().faults_mut().reject_key_load = true;

    let mut chain = chain(bus);
    let mut configurator = configurator().with_key_policy(KeyLoadPolicy::Strict);
    let result = configurator.run(&mut chain);

    assert_eq!(result.state, PipelineState::Failed);
    assert_eq!(configurator.state(), PipelineState::Failed);
    assert_eq!(result.failed_stage(), Some(Stage::KeyLoad));
}

#[test]
fn test_persist_outcomes() {
    let mut bus = SimulatedBus::default();
    bus.role_mut(DeviceRole::PositionReceiver).unwrap().faults_mut().persist_unsupported = true;
    let mut unsupported = chain(bus);
    let result = configurator().run(&mut unsupported);
    assert_eq!(result.persist, PersistOutcome::Unsupported);
    assert!(result.is_success());

    let mut bus = SimulatedBus::default();
    bus.role_mut(DeviceRole::PositionReceiver).unwrap().faults_mut().persist_fails = true;
    let mut failing = chain(bus);
    let result = configurator().run(&mut failing);
    assert_eq!(result.persist, PersistOutcome::Failed);
    assert_eq!(result.state, PipelineState::Ready);
    assert_eq!(result.failed_stage(), Some(Stage::Persist));
    assert_eq!(result.keys_loaded, Some(true));
}

#[test]
fn test_step_walks_every_state() {
    let mut chain = chain(SimulatedBus::default());
    let mut configurator = configurator();
    assert_eq!(configurator.state(), PipelineState::Idle);

    let mut states = Vec::new();
    while !configurator.state().is_terminal() {
        states.push(configurator.step(&mut chain));
    }

    assert_eq!(
        states,
        vec![
            PipelineState::DiscoveringCorrectionReceiver,
            PipelineState::DiscoveringPositionReceiver,
            PipelineState::ConfiguringCorrectionReceiver,
            PipelineState::ConfiguringPositionReceiver,
            PipelineState::LoadingKeys,
            PipelineState::Ready,
        ]
    );
    // Terminal states hold
    assert_eq!(configurator.step(&mut chain), PipelineState::Ready);
}

#[test]
fn test_snapshot_during_discovery() {
    let mut bus = SimulatedBus::default();
    bus.role_mut(DeviceRole::CorrectionReceiver).unwrap().faults_mut().probe_failures = 3;

    let mut chain = chain(bus);
    let mut configurator = configurator();
    configurator.step(&mut chain);
    configurator.step(&mut chain);
    configurator.step(&mut chain);

    let snapshot = configurator.snapshot();
    assert_eq!(snapshot.state, PipelineState::DiscoveringCorrectionReceiver);
    let discovery = snapshot.correction_discovery.unwrap();
    assert_eq!(discovery.attempts, 2);
    assert!(!discovery.connected);
}

#[test]
fn test_rerun_reaches_ready_again() {
    let mut chain = chain(SimulatedBus::default());
    let mut configurator = configurator();

    let first = configurator.run(&mut chain);
    let second = configurator.run(&mut chain);

    assert!(first.is_success());
    assert!(second.is_success());
    assert_eq!(second.correction_discovery.unwrap().attempts, 1);
    assert_eq!(correction_device(&chain).resets(), 2);
    assert_eq!(
        position_device(&chain).active_value(ConfigKey::Uart1Baudrate),
        Some(115_200)
    );
}

#[test]
fn test_attempt_callback() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let retry = RetryPolicy::new(RETRY).on_attempt(move |device, attempt, connected| {
        sink.borrow_mut().push((device.bus_address(), attempt, connected));
    });

    let mut bus = SimulatedBus::default();
    bus.role_mut(DeviceRole::CorrectionReceiver).unwrap().faults_mut().probe_failures = 2;

    let mut chain = chain(bus);
    Configurator::new(retry, RecordingSleeper::new()).run(&mut chain);

    assert_eq!(
        *seen.borrow(),
        vec![(0x43, 1, false), (0x43, 2, false), (0x43, 3, true), (0x42, 1, true)]
    );
}

#[test]
fn test_apply_config_set_aggregates_with_and() {
    let deployment = Deployment::default();
    let set = deployment.position_config_set();

    let mut bus = SimulatedBus::default();
    bus.role_mut(DeviceRole::PositionReceiver)
        .unwrap()
        .faults_mut()
        .rejected_keys = vec![ConfigKey::Uart2InProtUbx, ConfigKey::MsgOutRxmCorI2c];
    let mut receiver = lband_relay::Receiver::new(DeviceAddress::position_receiver());
    assert!(receiver.connect(&mut bus));

    let report = apply_config_set(&mut receiver, &mut bus, &set);
    assert!(!report.accepted());
    assert_eq!(report.rejected().count(), 2);
    assert_eq!(report.items.len(), set.len());
    assert_eq!(report.errors().len(), 2);
}

#[test]
fn test_chain_refuses_conflicting_addresses() {
    let mut shared = Deployment::default();
    shared.position_receiver = DeviceAddress::new(0x43, DeviceRole::PositionReceiver);
    assert_eq!(
        CorrectionChain::new(SimulatedBus::default(), shared).unwrap_err(),
        PipelineError::AddressConflict {
            correction: DeviceAddress::correction_receiver(),
            position: DeviceAddress::new(0x43, DeviceRole::PositionReceiver),
        }
    );

    let mut swapped = Deployment::default();
    std::mem::swap(&mut swapped.correction_receiver, &mut swapped.position_receiver);
    assert!(matches!(
        CorrectionChain::new(SimulatedBus::default(), swapped),
        Err(PipelineError::AddressConflict { .. })
    ));

    let mut mislabelled = Deployment::default();
    mislabelled.correction_receiver = DeviceAddress::new(0x43, DeviceRole::PositionReceiver);
    assert!(CorrectionChain::new(SimulatedBus::default(), mislabelled).is_err());
}

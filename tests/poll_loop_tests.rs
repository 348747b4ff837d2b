use lband_relay::deployment::Deployment;
use lband_relay::device::{DeviceRole, CORRECTION_RECEIVER_ADDRESS, POSITION_RECEIVER_ADDRESS};
use lband_relay::pipeline::{Configurator, CorrectionChain};
use lband_relay::poll_loop::{PollLoop, DEFAULT_POLL_CADENCE};
use lband_relay::protocol::CarrierSolution;
use lband_relay::retry::RetryPolicy;
use lband_relay::sim::{BusOp, RecordingSleeper, SimulatedBus};
use lband_relay::{DeviceHandle, PipelineState};
use std::time::Duration;

fn ready_chain(bus: SimulatedBus) -> CorrectionChain<SimulatedBus> {
    let mut chain = CorrectionChain::new(bus, Deployment::default()).unwrap();
    let result = Configurator::new(RetryPolicy::unbounded(), RecordingSleeper::new()).run(&mut chain);
    assert_eq!(result.state, PipelineState::Ready);
    chain
}

#[test]
fn test_correction_receiver_is_polled_first() {
    let mut chain = ready_chain(SimulatedBus::default());
    let mut poll_loop = PollLoop::default();

    for _ in 0..3 {
        chain.bus_mut().clear_log();
        poll_loop.tick(&mut chain);

        let reads: Vec<u8> = chain
            .bus()
            .log()
            .iter()
            .filter(|access| access.op == BusOp::Read)
            .map(|access| access.address)
            .collect();

        assert_eq!(reads.first(), Some(&CORRECTION_RECEIVER_ADDRESS));
        assert_eq!(reads.last(), Some(&POSITION_RECEIVER_ADDRESS));
        let first_position = reads.iter().position(|a| *a == POSITION_RECEIVER_ADDRESS).unwrap();
        assert!(reads[first_position..].iter().all(|a| *a == POSITION_RECEIVER_ADDRESS));
    }
}

#[test]
fn test_run_stops_at_tick_limit() {
    let mut chain = ready_chain(SimulatedBus::default());
    let mut poll_loop = PollLoop::default();
    let mut sleeper = RecordingSleeper::new();

    poll_loop.run(&mut chain, &mut sleeper, Some(10));

    assert_eq!(poll_loop.stats().ticks, 10);
    assert_eq!(sleeper.sleeps().len(), 10);
    assert_eq!(sleeper.total(), DEFAULT_POLL_CADENCE * 10);
    assert_eq!(chain.correction().status().polls, 10);
    assert_eq!(chain.position().status().polls, 10);
}

#[test]
fn test_custom_cadence() {
    let mut chain = ready_chain(SimulatedBus::default());
    let mut poll_loop = PollLoop::new(Duration::from_millis(250));
    let mut sleeper = RecordingSleeper::new();

    poll_loop.run(&mut chain, &mut sleeper, Some(4));
    assert_eq!(poll_loop.cadence(), Duration::from_millis(250));
    assert_eq!(sleeper.total(), Duration::from_secs(1));
}

#[test]
fn test_zero_tick_limit_does_nothing() {
    let mut chain = ready_chain(SimulatedBus::default());
    let mut poll_loop = PollLoop::default();
    let mut sleeper = RecordingSleeper::new();

    poll_loop.run(&mut chain, &mut sleeper, Some(0));
    assert_eq!(poll_loop.stats().ticks, 0);
    assert!(sleeper.sleeps().is_empty());
}

#[test]
fn test_polling_keeps_status_current() {
    let mut chain = ready_chain(SimulatedBus::default());
    let mut poll_loop = PollLoop::default().with_summary_every(5);

    poll_loop.run(&mut chain, &mut RecordingSleeper::new(), Some(20));

    let correction = chain.correction().status();
    assert!(correction.last_pmp.unwrap().locked);

    let position = chain.position().status();
    assert!(position.keys_confirmed);
    assert_eq!(position.last_fix.unwrap().carrier, CarrierSolution::Fixed);
    assert!(position.last_correction.unwrap().decrypted);
    assert!(position.frames_drained > 0);

    assert_eq!(poll_loop.stats().summaries, 4);
}

#[test]
fn test_no_carrier_fix_without_keys() {
    let mut bus = SimulatedBus::default();
    bus.role_mut(DeviceRole::PositionReceiver).unwrap().faults_mut().reject_key_load = true;
    let mut chain = ready_chain(bus);

    PollLoop::default().run(&mut chain, &mut RecordingSleeper::new(), Some(20));

    let position = chain.position().status();
    assert!(!position.keys_confirmed);
    assert_eq!(position.last_fix.unwrap().carrier, CarrierSolution::None);
    assert!(position.last_correction.is_none());
}

#[test]
fn test_loop_does_not_start_after_failed_setup() {
    let mut chain = CorrectionChain::new(SimulatedBus::new(), Deployment::default()).unwrap();
    let retry = RetryPolicy::unbounded().with_max_attempts(2);
    let result = Configurator::new(retry, RecordingSleeper::new()).run(&mut chain);
    assert_eq!(result.state, PipelineState::Failed);
    assert!(!PollLoop::may_start(&result));

    let mut poll_loop = PollLoop::default();
    let mut sleeper = RecordingSleeper::new();
    assert!(!poll_loop.run_after(&result, &mut chain, &mut sleeper, Some(5)));

    assert_eq!(poll_loop.stats().ticks, 0);
    assert!(sleeper.sleeps().is_empty());
    assert_eq!(chain.correction().status().polls, 0);
}

#[test]
fn test_loop_starts_after_ready_setup() {
    let mut chain = CorrectionChain::new(SimulatedBus::default(), Deployment::default()).unwrap();
    let result = Configurator::new(RetryPolicy::unbounded(), RecordingSleeper::new()).run(&mut chain);

    let mut poll_loop = PollLoop::default();
    assert!(poll_loop.run_after(&result, &mut chain, &mut RecordingSleeper::new(), Some(3)));
    assert_eq!(poll_loop.stats().ticks, 3);
    assert_eq!(chain.position().status().polls, 3);
}

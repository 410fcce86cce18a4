use critical_section::CriticalSection;
use heapless::Vec;

use node_core::energy::{EnergyArbiter, EnergyFault, EnergyMode, SleepControl};
use node_core::scheduler::{EventId, EventScheduler};

#[derive(Default)]
struct SleepLog {
    entered: Vec<EnergyMode, 16>,
}

impl SleepControl for SleepLog {
    fn enter(&mut self, _cs: CriticalSection<'_>, mode: EnergyMode) {
        self.entered.push(mode).unwrap();
    }
}

#[test]
fn interleaved_votes_track_shallowest_block() {
    let arbiter = EnergyArbiter::new();

    arbiter.block(EnergyMode::Em2).unwrap();
    arbiter.block(EnergyMode::Em3).unwrap();
    arbiter.unblock(EnergyMode::Em2).unwrap();

    assert_eq!(arbiter.current_floor(), EnergyMode::Em3);
}

#[test]
fn system_floor_and_transient_votes_compose() {
    let arbiter = EnergyArbiter::new();
    let mut sleep = SleepLog::default();

    // Node-wide floor plus a serial frame and a bus transaction in flight.
    arbiter.block(EnergyMode::Em3).unwrap();
    arbiter.block(EnergyMode::Em3).unwrap();
    arbiter.block(EnergyMode::Em2).unwrap();
    assert_eq!(arbiter.enter_idle(&mut sleep, || true), Some(EnergyMode::Em1));

    arbiter.unblock(EnergyMode::Em2).unwrap();
    assert_eq!(arbiter.enter_idle(&mut sleep, || true), Some(EnergyMode::Em2));

    arbiter.unblock(EnergyMode::Em3).unwrap();
    assert_eq!(arbiter.enter_idle(&mut sleep, || true), Some(EnergyMode::Em2));

    arbiter.unblock(EnergyMode::Em3).unwrap();
    assert_eq!(arbiter.enter_idle(&mut sleep, || true), Some(EnergyMode::Em3));

    assert_eq!(
        sleep.entered.as_slice(),
        &[
            EnergyMode::Em1,
            EnergyMode::Em2,
            EnergyMode::Em2,
            EnergyMode::Em3
        ]
    );
}

#[test]
fn blocking_em0_keeps_the_core_awake() {
    let arbiter = EnergyArbiter::new();
    let mut sleep = SleepLog::default();
    arbiter.block(EnergyMode::Em0).unwrap();

    assert_eq!(arbiter.enter_idle(&mut sleep, || true), None);
    assert!(sleep.entered.is_empty());
}

#[test]
fn unbalanced_unblock_leaves_floor_alone() {
    let arbiter = EnergyArbiter::new();
    arbiter.block(EnergyMode::Em2).unwrap();

    assert_eq!(
        arbiter.unblock(EnergyMode::Em3),
        Err(EnergyFault::Unbalanced(EnergyMode::Em3))
    );
    assert_eq!(arbiter.current_floor(), EnergyMode::Em2);
}

#[test]
fn events_posted_from_another_context_are_seen() {
    let scheduler = EventScheduler::new();
    let tick = EventId::new(2);
    let done = EventId::new(3);

    std::thread::scope(|scope| {
        scope.spawn(|| scheduler.post(tick));
        scope.spawn(|| scheduler.post(done));
    });

    let pending = scheduler.pending();
    assert!(pending.contains(tick));
    assert!(pending.contains(done));

    scheduler.clear(tick);
    assert!(scheduler.pending().contains(done));
    assert!(!scheduler.pending().contains(tick));
}

#[test]
fn pending_event_prevents_sleep() {
    let arbiter = EnergyArbiter::new();
    let scheduler = EventScheduler::new();
    let mut sleep = SleepLog::default();

    // Completion posted between the dispatch pass and the idle call.
    scheduler.post(EventId::new(3));
    assert_eq!(
        arbiter.enter_idle(&mut sleep, || scheduler.pending().is_empty()),
        None
    );
    assert!(sleep.entered.is_empty());

    scheduler.clear(EventId::new(3));
    assert_eq!(
        arbiter.enter_idle(&mut sleep, || scheduler.pending().is_empty()),
        Some(EnergyMode::Em3)
    );
}

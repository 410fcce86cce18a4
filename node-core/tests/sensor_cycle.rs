use heapless::Vec;

use node_core::app::{self, NodeConfig, SensorNode, events, self_test};
use node_core::bus::{BusConfig, BusId, BusManager};
use node_core::energy::{EnergyArbiter, EnergyMode};
use node_core::link::{LinkConfig, LinkTransmitter};
use node_core::scheduler::EventScheduler;
use node_core::sensors::si7021;
use node_core::sim::{
    SensorBus, SimulatedTimer, SimulatedUart, service_buses, service_link,
};

type Node<'a> = SensorNode<
    'a,
    BusManager<'a, SensorBus>,
    LinkTransmitter<'a, SimulatedUart>,
    SimulatedTimer,
>;

const LIGHT_BUS: BusId = BusId::new(0);
const HUMIDITY_BUS: BusId = BusId::new(1);

fn build<'a>(arbiter: &'a EnergyArbiter, scheduler: &'a EventScheduler) -> Node<'a> {
    let mut buses = BusManager::new(arbiter, scheduler, BusConfig::default());
    buses.open(LIGHT_BUS, SensorBus::light()).unwrap();
    buses.open(HUMIDITY_BUS, SensorBus::humidity()).unwrap();
    let link = LinkTransmitter::new(
        SimulatedUart::new(),
        arbiter,
        scheduler,
        LinkConfig::new(events::LINK_TX_DONE),
    );
    SensorNode::new(
        buses,
        link,
        SimulatedTimer::default(),
        scheduler,
        arbiter,
        NodeConfig::default(),
    )
}

/// Services interrupts and dispatches events until nothing moves, returning
/// everything the link transmitted.
fn settle(node: &mut Node<'_>, scheduler: &EventScheduler) -> Vec<u8, 512> {
    let mut output = Vec::new();
    for _ in 0..64 {
        let bus_work = service_buses(node.port_mut()).unwrap();
        let link_work = service_link(node.sink_mut()).unwrap();
        output
            .extend_from_slice(&node.sink_mut().peripheral_mut().take_output())
            .unwrap();
        let handled = node.dispatch().unwrap();
        if bus_work == 0 && link_work == 0 && handled.is_empty() && scheduler.pending().is_empty()
        {
            return output;
        }
    }
    panic!("node never settled");
}

#[test]
fn boot_then_one_sample_cycle() {
    let arbiter = EnergyArbiter::new();
    let scheduler = EventScheduler::new();
    let mut node = build(&arbiter, &scheduler);

    node.open().unwrap();
    let boot = settle(&mut node, &scheduler);
    assert_eq!(boot.as_slice(), app::BOOT_BANNER.as_bytes());
    assert!(node.timer_mut().is_running());
    assert_eq!(
        node.port_mut()
            .peripheral_mut(LIGHT_BUS)
            .and_then(SensorBus::veml6030_mut)
            .map(|model| model.config()),
        Some(0x0000)
    );

    scheduler.post(events::SAMPLE_TICK);
    let sample = settle(&mut node, &scheduler);
    assert_eq!(
        core::str::from_utf8(&sample).unwrap(),
        "humidity = 44.9%\nlight = 299 lux \n\ntemperature = 73.7 F\n"
    );

    let readings = node.readings();
    assert_eq!(readings.samples, 1);
    assert_eq!(readings.lux, Some(299));

    // Only the system floor remains once everything has drained.
    assert_eq!(arbiter.votes(EnergyMode::Em2), 0);
    assert_eq!(arbiter.votes(EnergyMode::Em3), 1);
    assert_eq!(arbiter.current_floor(), EnergyMode::Em3);
}

#[test]
fn sample_cycles_repeat() {
    let arbiter = EnergyArbiter::new();
    let scheduler = EventScheduler::new();
    let mut node = build(&arbiter, &scheduler);
    node.open().unwrap();
    settle(&mut node, &scheduler);

    node.port_mut()
        .peripheral_mut(HUMIDITY_BUS)
        .and_then(SensorBus::si7021_mut)
        .unwrap()
        .humidity_raw = 0x8000;

    for _ in 0..3 {
        scheduler.post(events::SAMPLE_TICK);
        let output = settle(&mut node, &scheduler);
        assert!(core::str::from_utf8(&output).unwrap().starts_with("humidity = 56.5%\n"));
    }
    assert_eq!(node.readings().samples, 3);
}

#[test]
fn self_test_passes_on_simulated_sensor() {
    let arbiter = EnergyArbiter::new();
    let scheduler = EventScheduler::new();
    let mut buses: BusManager<'_, SensorBus> =
        BusManager::new(&arbiter, &scheduler, BusConfig::default());
    buses.open(HUMIDITY_BUS, SensorBus::humidity()).unwrap();

    let report = self_test::run(&mut buses, &scheduler, HUMIDITY_BUS, |buses| {
        service_buses(buses).unwrap();
    })
    .unwrap();

    assert_eq!(report.user_register, si7021::USER_REGISTER_RESET);
    assert_eq!(
        buses
            .peripheral_mut(HUMIDITY_BUS)
            .and_then(SensorBus::si7021_mut)
            .map(|model| model.user_register()),
        Some(si7021::USER_REGISTER_RH8_T12)
    );
    assert_eq!(arbiter.current_floor(), EnergyMode::DEEPEST);
}

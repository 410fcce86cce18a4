//! Target entry point, interrupt handlers and the idle loop.
//!
//! The bus table and the link live in critical-section mutexes so the I2C and
//! USART handlers can advance them while the application thread launches
//! transactions and queues reports through [`SharedBuses`] and
//! [`SharedLink`].

use core::cell::RefCell;

use cortex_m::peripheral::NVIC;
use cortex_m::register::primask;
use cortex_m_rt::{entry, exception};
use critical_section::{self, RawRestoreState};
use defmt::{info, warn};
use defmt_rtt as _;
use embassy_stm32 as hal;
use embassy_stm32::pac;
use embassy_stm32::pac::interrupt;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::Instant;
use node_core::app::{NodeConfig, SensorNode, events};
use node_core::bus::{BusConfig, BusFault, BusId, BusManager, TransactionPort, TransactionRequest};
use node_core::energy::EnergyArbiter;
use node_core::link::{LinkConfig, LinkError, LinkTransmitter, ReportSink};
use node_core::scheduler::EventScheduler;

use crate::hw;
use crate::hw::i2c::I2cController;
use crate::hw::sleep::CortexSleep;
use crate::hw::tick::{SAMPLE_PERIOD_TICKS, SysTickTimer, TickDivider};
use crate::hw::uart::UartTx;
use crate::status;
use crate::telemetry::TelemetryRecorder;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        cortex_m::interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                cortex_m::interrupt::enable();
            }
        }
    }
}

/// Si7021, on I2C1.
const HUMIDITY_BUS: BusId = BusId::new(1);
/// VEML6030, on I2C2.
const LIGHT_BUS: BusId = BusId::new(2);

type Buses = BusManager<'static, I2cController>;
type Link = LinkTransmitter<'static, UartTx>;

static ARBITER: EnergyArbiter = EnergyArbiter::new();
static SCHEDULER: EventScheduler = EventScheduler::new();
static BUSES: Mutex<CriticalSectionRawMutex, RefCell<Option<Buses>>> =
    Mutex::new(RefCell::new(None));
static LINK: Mutex<CriticalSectionRawMutex, RefCell<Option<Link>>> =
    Mutex::new(RefCell::new(None));

/// [`TransactionPort`] over the bus table shared with the I2C handlers.
struct SharedBuses;

impl SharedBuses {
    fn with<R>(bus: BusId, f: impl FnOnce(&mut Buses) -> Result<R, BusFault>) -> Result<R, BusFault> {
        BUSES.lock(|cell| match cell.borrow_mut().as_mut() {
            Some(buses) => f(buses),
            None => Err(BusFault::UnknownBus(bus)),
        })
    }
}

impl TransactionPort for SharedBuses {
    fn launch(&mut self, request: TransactionRequest) -> Result<(), BusFault> {
        Self::with(request.bus, |buses| buses.launch(request))
    }

    fn is_busy(&self, bus: BusId) -> bool {
        BUSES.lock(|cell| cell.borrow().as_ref().is_none_or(|buses| buses.is_busy(bus)))
    }

    fn take_result(&mut self, bus: BusId) -> Result<u16, BusFault> {
        Self::with(bus, |buses| buses.take_result(bus))
    }
}

/// [`ReportSink`] over the link shared with the USART handler. Only
/// [`install_link`] hands these out.
struct SharedLink(());

impl ReportSink for SharedLink {
    fn send(&mut self, text: &str) -> Result<(), LinkError> {
        LINK.lock(|cell| match cell.borrow_mut().as_mut() {
            Some(link) => link.send(text),
            None => defmt::unreachable!(),
        })
    }
}

fn install_buses() {
    let mut buses = BusManager::new(&ARBITER, &SCHEDULER, BusConfig::new());
    check(buses.open(HUMIDITY_BUS, I2cController::new(pac::I2C1)), "humidity bus");
    check(buses.open(LIGHT_BUS, I2cController::new(pac::I2C2)), "light bus");
    BUSES.lock(|cell| *cell.borrow_mut() = Some(buses));
}

fn install_link() -> SharedLink {
    let config = LinkConfig::new(events::LINK_TX_DONE);
    let link = LinkTransmitter::new(UartTx::new(pac::USART1), &ARBITER, &SCHEDULER, config);
    LINK.lock(|cell| *cell.borrow_mut() = Some(link));
    SharedLink(())
}

fn check<T, E: defmt::Format>(result: Result<T, E>, context: &str) -> T {
    match result {
        Ok(value) => value,
        Err(error) => defmt::panic!("{}: {}", context, error),
    }
}

#[cfg(feature = "self-test")]
fn run_self_test() {
    use node_core::app::self_test;

    // Interrupts are live, so the handlers advance the bus while this spins.
    let report = check(
        self_test::run(&mut SharedBuses, &SCHEDULER, HUMIDITY_BUS, |_| {}),
        "self-test",
    );
    info!("self-test passed: {}", report);
}

#[entry]
fn main() -> ! {
    let _peripherals = hal::init(hal::Config::default());
    let Some(core) = cortex_m::Peripherals::take() else {
        defmt::panic!("core peripherals already taken");
    };

    hw::configure_board();
    ARBITER.reset();
    SCHEDULER.reset();
    install_buses();
    let link = install_link();

    // SAFETY: the handlers only touch state installed above.
    unsafe {
        NVIC::unmask(hal::interrupt::I2C1);
        NVIC::unmask(hal::interrupt::I2C2_3);
        NVIC::unmask(hal::interrupt::USART1);
    }

    #[cfg(feature = "self-test")]
    run_self_test();

    let config = NodeConfig {
        humidity_bus: HUMIDITY_BUS,
        light_bus: LIGHT_BUS,
        ..NodeConfig::new()
    };
    let mut node = SensorNode::new(
        SharedBuses,
        link,
        SysTickTimer::new(core.SYST),
        &SCHEDULER,
        &ARBITER,
        config,
    );
    check(node.open(), "node start-up");
    info!("sensor node up, floor {}", ARBITER.current_floor());

    let mut sleeper = CortexSleep::new(core.SCB);
    let mut telemetry = TelemetryRecorder::new();
    loop {
        let handled = check(node.dispatch(), "dispatch");
        if handled.contains(events::SAMPLE_TICK) {
            info!("status: {}", status::snapshot());
        }

        let entered = ARBITER.enter_idle(&mut sleeper, || SCHEDULER.pending().is_empty());
        telemetry.record_cycle(Instant::now(), handled, entered);
    }
}

fn service_bus(bus: BusId, slot: usize) {
    BUSES.lock(|cell| {
        let mut table = cell.borrow_mut();
        let Some(buses) = table.as_mut() else {
            warn!("I2C interrupt before the bus table was installed");
            return;
        };
        while let Some(event) = buses.peripheral_mut(bus).and_then(I2cController::poll) {
            status::record_bus_interrupt(slot);
            check(buses.on_interrupt(bus, event), "bus interrupt");
        }
    });
}

#[interrupt]
fn I2C1() {
    service_bus(HUMIDITY_BUS, 0);
}

#[interrupt]
fn I2C2_3() {
    service_bus(LIGHT_BUS, 1);
}

#[interrupt]
fn USART1() {
    LINK.lock(|cell| {
        let mut slot = cell.borrow_mut();
        let Some(link) = slot.as_mut() else {
            return;
        };
        while let Some(event) = link.peripheral_mut().poll() {
            status::record_link_interrupt();
            check(link.on_interrupt(event), "link interrupt");
        }
    });
}

#[exception]
fn SysTick() {
    static mut DIVIDER: TickDivider = TickDivider::new(SAMPLE_PERIOD_TICKS);

    if DIVIDER.tick() {
        status::record_sample_tick();
        SCHEDULER.post(events::SAMPLE_TICK);
    }
}

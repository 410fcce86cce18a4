//! Whole-node wiring for host runs: both sensor buses, the serial link and
//! the sample timer.

use heapless::Vec;

use super::{Si7021Model, SimulatedBus, Veml6030Model};
use crate::app::SampleTimer;
use crate::bus::{BusFault, BusId, BusInterrupt, BusManager, BusPeripheral};
use crate::link::{LinkError, LinkInterrupt, LinkPeripheral, LinkTransmitter};

/// Either of the node's two simulated buses.
pub enum SensorBus {
    Humidity(SimulatedBus<Si7021Model>),
    Light(SimulatedBus<Veml6030Model>),
}

impl SensorBus {
    #[must_use]
    pub const fn humidity() -> Self {
        SensorBus::Humidity(SimulatedBus::new(Si7021Model::new()))
    }

    #[must_use]
    pub const fn light() -> Self {
        SensorBus::Light(SimulatedBus::new(Veml6030Model::new()))
    }

    pub fn next_interrupt(&mut self) -> Option<BusInterrupt> {
        match self {
            SensorBus::Humidity(bus) => bus.next_interrupt(),
            SensorBus::Light(bus) => bus.next_interrupt(),
        }
    }

    pub fn si7021_mut(&mut self) -> Option<&mut Si7021Model> {
        match self {
            SensorBus::Humidity(bus) => Some(bus.device_mut()),
            SensorBus::Light(_) => None,
        }
    }

    pub fn veml6030_mut(&mut self) -> Option<&mut Veml6030Model> {
        match self {
            SensorBus::Light(bus) => Some(bus.device_mut()),
            SensorBus::Humidity(_) => None,
        }
    }

    fn peripheral(&mut self) -> &mut dyn BusPeripheral {
        match self {
            SensorBus::Humidity(bus) => bus,
            SensorBus::Light(bus) => bus,
        }
    }
}

impl BusPeripheral for SensorBus {
    fn start(&mut self) {
        self.peripheral().start();
    }

    fn transmit(&mut self, byte: u8) {
        self.peripheral().transmit(byte);
    }

    fn ack(&mut self) {
        self.peripheral().ack();
    }

    fn nack(&mut self) {
        self.peripheral().nack();
    }

    fn stop(&mut self) {
        self.peripheral().stop();
    }

    fn received(&mut self) -> u8 {
        self.peripheral().received()
    }

    fn reset_bus(&mut self) {
        self.peripheral().reset_bus();
    }
}

/// Delivers every interrupt the simulated buses have raised. Returns how many
/// were handled.
///
/// # Errors
///
/// The first fault reported by the manager.
pub fn service_buses<const N: usize>(
    manager: &mut BusManager<'_, SensorBus, N>,
) -> Result<u32, BusFault> {
    let buses: Vec<BusId, N> = manager.buses().collect();
    let mut handled = 0;
    loop {
        let mut progressed = false;
        for &bus in &buses {
            let interrupt = manager
                .peripheral_mut(bus)
                .and_then(SensorBus::next_interrupt);
            if let Some(interrupt) = interrupt {
                manager.on_interrupt(bus, interrupt)?;
                handled += 1;
                progressed = true;
            }
        }
        if !progressed {
            return Ok(handled);
        }
    }
}

/// UART that captures transmitted bytes.
#[derive(Default)]
pub struct SimulatedUart {
    output: Vec<u8, 512>,
    tx_ready: bool,
    tx_complete: bool,
}

impl SimulatedUart {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            output: Vec::new(),
            tx_ready: false,
            tx_complete: false,
        }
    }

    /// Interrupt the UART would raise next, given what is enabled.
    pub fn next_interrupt(&self) -> Option<LinkInterrupt> {
        if self.tx_ready {
            Some(LinkInterrupt::TxReady)
        } else if self.tx_complete {
            Some(LinkInterrupt::TxComplete)
        } else {
            None
        }
    }

    /// Bytes sent since the last call.
    pub fn take_output(&mut self) -> Vec<u8, 512> {
        core::mem::take(&mut self.output)
    }
}

impl LinkPeripheral for SimulatedUart {
    fn write(&mut self, byte: u8) {
        // Host captures are drained after every service pass.
        let _ = self.output.push(byte);
    }

    fn set_tx_ready_interrupt(&mut self, enabled: bool) {
        self.tx_ready = enabled;
    }

    fn set_tx_complete_interrupt(&mut self, enabled: bool) {
        self.tx_complete = enabled;
    }
}

/// Drives the link until no interrupt is enabled.
///
/// # Errors
///
/// The first link fault.
pub fn service_link(link: &mut LinkTransmitter<'_, SimulatedUart>) -> Result<u32, LinkError> {
    let mut handled = 0;
    while let Some(interrupt) = link.peripheral_mut().next_interrupt() {
        link.on_interrupt(interrupt)?;
        handled += 1;
    }
    Ok(handled)
}

/// Sample timer that only records whether it was started; ticks are posted
/// by the harness.
#[derive(Debug, Default)]
pub struct SimulatedTimer {
    running: bool,
}

impl SimulatedTimer {
    pub const fn is_running(&self) -> bool {
        self.running
    }
}

impl SampleTimer for SimulatedTimer {
    fn start(&mut self) {
        self.running = true;
    }
}

//! Sensor-node application policy: what each event does.
//!
//! [`SensorNode::dispatch`] runs on the application thread between sleeps. It
//! snapshots the scheduler, then handles every pending event in ascending bit
//! order, clearing each bit before its handler runs so a re-post from an
//! interrupt during the handler is kept for the next pass.

use core::fmt::{self, Write as _};

use heapless::String;

use crate::bus::{BusFault, BusId, TransactionPort};
use crate::energy::{EnergyArbiter, EnergyFault, EnergyMode};
use crate::link::{LinkError, MAX_FRAME_LEN, ReportSink};
use crate::scheduler::{EventId, EventScheduler, EventSet};
use crate::sensors::{si7021, veml6030};


/// Event identifiers used by the node.
pub mod events {
    use crate::scheduler::EventId;

    /// Periodic sample timer expired.
    pub const SAMPLE_TICK: EventId = EventId::new(2);
    /// Humidity measurement read from the Si7021.
    pub const HUMIDITY_READY: EventId = EventId::new(3);
    /// Posted once by [`SensorNode::open`](super::SensorNode::open).
    pub const BOOT: EventId = EventId::new(4);
    /// A report frame finished transmitting.
    pub const LINK_TX_DONE: EventId = EventId::new(5);
    /// Ambient light read from the VEML6030.
    pub const LIGHT_READY: EventId = EventId::new(7);
    /// Temperature read back from the Si7021.
    pub const TEMPERATURE_READY: EventId = EventId::new(8);
    /// Light sensor configuration written.
    pub const LIGHT_CONFIGURED: EventId = EventId::new(9);
    /// Completion of each bring-up self-test transaction.
    pub const SELF_TEST_STEP: EventId = EventId::new(10);
}

pub const BOOT_BANNER: &str = "\nHello World\n";

/// Periodic source of [`events::SAMPLE_TICK`].
pub trait SampleTimer {
    /// Starts posting sample ticks.
    fn start(&mut self);
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeConfig {
    /// Bus carrying the Si7021.
    pub humidity_bus: BusId,
    /// Bus carrying the VEML6030.
    pub light_bus: BusId,
    /// Mode held blocked for the whole uptime so the sample timer keeps
    /// running. `None` lets the node sleep as deep as the other votes allow.
    pub system_floor: Option<EnergyMode>,
}

impl NodeConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            humidity_bus: BusId::new(1),
            light_bus: BusId::new(0),
            system_floor: Some(EnergyMode::Em3),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NodeError {
    Bus(BusFault),
    Link(LinkError),
    Energy(EnergyFault),
    /// A bit with no handler was pending.
    UnknownEvent(EventId),
    /// A formatted report did not fit in one link frame.
    ReportOverflow,
}

impl From<BusFault> for NodeError {
    fn from(value: BusFault) -> Self {
        NodeError::Bus(value)
    }
}

impl From<LinkError> for NodeError {
    fn from(value: LinkError) -> Self {
        NodeError::Link(value)
    }
}

impl From<EnergyFault> for NodeError {
    fn from(value: EnergyFault) -> Self {
        NodeError::Energy(value)
    }
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::Bus(fault) => fault.fmt(f),
            NodeError::Link(error) => error.fmt(f),
            NodeError::Energy(fault) => fault.fmt(f),
            NodeError::UnknownEvent(event) => write!(f, "no handler for {event}"),
            NodeError::ReportOverflow => f.write_str("report exceeds one link frame"),
        }
    }
}

/// Most recent converted measurements.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Readings {
    pub humidity: Option<f32>,
    pub temperature_f: Option<f32>,
    pub lux: Option<u32>,
    /// Completed sample cycles.
    pub samples: u32,
}

/// The node's event handlers, bound to its bus, report link and timer.
pub struct SensorNode<'a, T, R, S> {
    port: T,
    sink: R,
    timer: S,
    scheduler: &'a EventScheduler,
    arbiter: &'a EnergyArbiter,
    config: NodeConfig,
    readings: Readings,
}

impl<'a, T, R, S> SensorNode<'a, T, R, S>
where
    T: TransactionPort,
    R: ReportSink,
    S: SampleTimer,
{
    pub fn new(
        port: T,
        sink: R,
        timer: S,
        scheduler: &'a EventScheduler,
        arbiter: &'a EnergyArbiter,
        config: NodeConfig,
    ) -> Self {
        Self {
            port,
            sink,
            timer,
            scheduler,
            arbiter,
            config,
            readings: Readings::default(),
        }
    }

    /// Takes the system floor vote, starts configuring the light sensor and
    /// posts [`events::BOOT`].
    ///
    /// # Errors
    ///
    /// Any fault from the vote or the configuration launch.
    pub fn open(&mut self) -> Result<(), NodeError> {
        if let Some(floor) = self.config.system_floor {
            self.arbiter.block(floor)?;
        }
        self.port.launch(veml6030::configure(
            self.config.light_bus,
            veml6030::DEFAULT_ALS_CONFIG,
            events::LIGHT_CONFIGURED,
        ))?;
        self.scheduler.post(events::BOOT);
        Ok(())
    }

    /// Handles every event pending at the time of the call and returns them.
    ///
    /// # Errors
    ///
    /// The first handler failure; events after it stay pending.
    pub fn dispatch(&mut self) -> Result<EventSet, NodeError> {
        let pending = self.scheduler.pending();
        for event in pending {
            self.scheduler.clear(event);
            self.handle(event)?;
        }
        Ok(pending)
    }

    pub const fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub const fn readings(&self) -> &Readings {
        &self.readings
    }

    pub fn port(&self) -> &T {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut T {
        &mut self.port
    }

    pub fn sink_mut(&mut self) -> &mut R {
        &mut self.sink
    }

    pub fn timer_mut(&mut self) -> &mut S {
        &mut self.timer
    }

    fn handle(&mut self, event: EventId) -> Result<(), NodeError> {
        match event {
            events::BOOT => {
                self.sink.send(BOOT_BANNER)?;
                self.timer.start();
            }
            events::SAMPLE_TICK => {
                self.port
                    .launch(si7021::measure_humidity(self.config.humidity_bus, events::HUMIDITY_READY))?;
                self.port
                    .launch(veml6030::read_light(self.config.light_bus, events::LIGHT_READY))?;
            }
            events::HUMIDITY_READY => {
                let raw = self.port.take_result(self.config.humidity_bus)?;
                let humidity = si7021::relative_humidity(raw);
                self.readings.humidity = Some(humidity);
                self.report(format_args!("humidity = {humidity:.1}%\n"))?;
                self.port.launch(si7021::temperature_from_humidity(
                    self.config.humidity_bus,
                    events::TEMPERATURE_READY,
                ))?;
            }
            events::TEMPERATURE_READY => {
                let raw = self.port.take_result(self.config.humidity_bus)?;
                let temperature = si7021::fahrenheit(raw);
                self.readings.temperature_f = Some(temperature);
                self.readings.samples = self.readings.samples.wrapping_add(1);
                self.report(format_args!("temperature = {temperature:.1} F\n"))?;
            }
            events::LIGHT_READY => {
                let raw = self.port.take_result(self.config.light_bus)?;
                let lux = veml6030::whole_lux(raw);
                self.readings.lux = Some(lux);
                self.report(format_args!("light = {lux} lux \n\n"))?;
            }
            events::LINK_TX_DONE | events::LIGHT_CONFIGURED => {}
            unknown => return Err(NodeError::UnknownEvent(unknown)),
        }
        Ok(())
    }

    fn report(&mut self, args: fmt::Arguments<'_>) -> Result<(), NodeError> {
        let mut line: String<MAX_FRAME_LEN> = String::new();
        line.write_fmt(args).map_err(|_| NodeError::ReportOverflow)?;
        self.sink.send(&line)?;
        Ok(())
    }
}

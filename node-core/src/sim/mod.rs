//! Host-side bus simulation.
//!
//! [`SimulatedBus`] stands in for a bus controller with one slave attached. It
//! answers every [`BusPeripheral`] command the way the hardware would, by
//! queueing the interrupt that would follow it. The owner pops those with
//! [`SimulatedBus::next_interrupt`] and feeds them to
//! [`BusManager::on_interrupt`](crate::bus::BusManager::on_interrupt).

use heapless::Deque;

use crate::bus::{BusInterrupt, BusPeripheral, Direction, SlaveAddress};

mod devices;
mod node;

pub use devices::{Si7021Model, Veml6030Model};
pub use node::{SensorBus, SimulatedTimer, SimulatedUart, service_buses, service_link};

/// Behaviour of the slave on a simulated bus.
pub trait SlaveDevice {
    fn address(&self) -> SlaveAddress;

    /// A write-addressed transfer has started.
    fn begin_write(&mut self) {}

    /// Byte written by the controller after the write-address byte.
    fn write(&mut self, byte: u8);

    /// Asked on every read-address byte; `false` answers with a NACK.
    fn ready_for_read(&mut self) -> bool {
        true
    }

    /// Next byte of a read.
    fn read(&mut self) -> u8;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Wire {
    Idle,
    /// START sent; the next byte is an address.
    Addressing,
    Writing,
    Reading,
}

/// Simulated controller plus one slave.
pub struct SimulatedBus<D> {
    device: D,
    wire: Wire,
    pending: Deque<BusInterrupt, 8>,
    rx: u8,
    resets: u32,
    stops: u32,
}

impl<D> SimulatedBus<D>
where
    D: SlaveDevice,
{
    pub const fn new(device: D) -> Self {
        Self {
            device,
            wire: Wire::Idle,
            pending: Deque::new(),
            rx: 0,
            resets: 0,
            stops: 0,
        }
    }

    /// Oldest interrupt the hardware would have raised.
    pub fn next_interrupt(&mut self) -> Option<BusInterrupt> {
        self.pending.pop_front()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Bus-reset sequences run so far.
    pub fn resets(&self) -> u32 {
        self.resets
    }

    /// STOP conditions issued so far, one per finished transaction.
    pub fn stops(&self) -> u32 {
        self.stops
    }

    fn raise(&mut self, interrupt: BusInterrupt) {
        // Real hardware holds at most two events; overflow means the owner
        // stopped draining, and the dropped event surfaces as a stall.
        let _ = self.pending.push_back(interrupt);
    }

    fn load_rx(&mut self) {
        self.rx = self.device.read();
        self.raise(BusInterrupt::DataReceived);
    }
}

impl<D> BusPeripheral for SimulatedBus<D>
where
    D: SlaveDevice,
{
    fn start(&mut self) {
        self.wire = Wire::Addressing;
    }

    fn transmit(&mut self, byte: u8) {
        match self.wire {
            Wire::Addressing => {
                let write_byte = self.device.address().address_byte(Direction::Write);
                let read_byte = self.device.address().address_byte(Direction::Read);
                if byte == write_byte {
                    self.device.begin_write();
                    self.wire = Wire::Writing;
                    self.raise(BusInterrupt::Ack);
                } else if byte == read_byte && self.device.ready_for_read() {
                    self.wire = Wire::Reading;
                    self.raise(BusInterrupt::Ack);
                    self.load_rx();
                } else {
                    self.raise(BusInterrupt::Nack);
                }
            }
            Wire::Writing => {
                self.device.write(byte);
                self.raise(BusInterrupt::Ack);
            }
            Wire::Idle | Wire::Reading => self.raise(BusInterrupt::Nack),
        }
    }

    fn ack(&mut self) {
        if self.wire == Wire::Reading {
            self.load_rx();
        }
    }

    fn nack(&mut self) {}

    fn stop(&mut self) {
        self.wire = Wire::Idle;
        self.stops += 1;
        self.raise(BusInterrupt::StopCompleted);
    }

    fn received(&mut self) -> u8 {
        self.rx
    }

    fn reset_bus(&mut self) {
        self.wire = Wire::Idle;
        self.pending.clear();
        self.resets += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo {
        last: u8,
    }

    impl SlaveDevice for Echo {
        fn address(&self) -> SlaveAddress {
            SlaveAddress::new(0x22).unwrap()
        }

        fn write(&mut self, byte: u8) {
            self.last = byte;
        }

        fn read(&mut self) -> u8 {
            self.last
        }
    }

    #[test]
    fn foreign_address_is_not_acknowledged() {
        let mut bus = SimulatedBus::new(Echo { last: 0 });
        bus.start();
        bus.transmit(0x80);

        assert_eq!(bus.next_interrupt(), Some(BusInterrupt::Nack));
        assert_eq!(bus.next_interrupt(), None);
    }

    #[test]
    fn read_address_delivers_first_byte() {
        let mut bus = SimulatedBus::new(Echo { last: 0 });
        bus.start();
        bus.transmit(0x44);
        bus.transmit(0x5A);
        bus.start();
        bus.transmit(0x45);

        assert_eq!(bus.next_interrupt(), Some(BusInterrupt::Ack));
        assert_eq!(bus.next_interrupt(), Some(BusInterrupt::Ack));
        assert_eq!(bus.next_interrupt(), Some(BusInterrupt::Ack));
        assert_eq!(bus.next_interrupt(), Some(BusInterrupt::DataReceived));
        assert_eq!(bus.received(), 0x5A);
    }

    #[test]
    fn reset_clears_pending_events() {
        let mut bus = SimulatedBus::new(Echo { last: 0 });
        bus.start();
        bus.transmit(0x44);
        bus.reset_bus();

        assert!(!bus.has_pending());
        assert_eq!(bus.resets(), 1);
    }
}

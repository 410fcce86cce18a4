//! Interrupt-driven two-wire bus transactions.
//!
//! One [`TransactionDescriptor`] exists per physical bus. The application
//! thread launches a transaction through [`BusManager::launch`]; from then on
//! the bus interrupt handler feeds each hardware event into
//! [`BusManager::on_interrupt`], which advances the descriptor one protocol
//! phase at a time and issues the next bus command through the
//! [`BusPeripheral`] seam. When the STOP condition completes the sleep vote is
//! released and the transaction's completion event is posted.
//!
//! Register reads use the combined "write register, repeated START, read"
//! form so that no other controller can slip in between the two halves.

use core::fmt;

use crate::energy::EnergyFault;
use crate::scheduler::EventId;

mod machine;
mod manager;
mod spin;

pub use machine::{ProtocolPhase, TransactionDescriptor};
pub use manager::{BusConfig, BusManager, DEFAULT_BUS_SLEEP_BLOCK, TransactionPort};
pub use spin::{SpinTimeout, spin_until_idle};

/// Identity of one physical bus.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusId(u8);

impl BusId {
    /// Creates a bus identity from its hardware instance number.
    #[must_use]
    pub const fn new(instance: u8) -> Self {
        Self(instance)
    }

    /// Hardware instance number.
    #[must_use]
    pub const fn instance(self) -> u8 {
        self.0
    }
}

impl fmt::Display for BusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "i2c{}", self.0)
    }
}

/// Overall direction of a transaction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    /// R/W bit appended to the 7-bit address on the wire.
    #[must_use]
    pub const fn address_bit(self) -> u8 {
        match self {
            Direction::Read => 1,
            Direction::Write => 0,
        }
    }
}

/// 7-bit slave address.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlaveAddress(u8);

/// Address does not fit in seven bits.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AddressError(pub u8);

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slave address {:#04x} exceeds 7 bits", self.0)
    }
}

impl SlaveAddress {
    /// Validates a 7-bit address.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError`] when `address` is above `0x7F`.
    pub const fn new(address: u8) -> Result<Self, AddressError> {
        if address > 0x7F {
            Err(AddressError(address))
        } else {
            Ok(Self(address))
        }
    }

    /// Raw 7-bit value.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Address byte as transmitted after a START condition.
    #[must_use]
    pub const fn address_byte(self, direction: Direction) -> u8 {
        (self.0 << 1) | direction.address_bit()
    }
}

/// Number of data bytes moved by one transaction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ByteCount {
    One,
    Two,
}

impl ByteCount {
    /// Count as an integer.
    #[must_use]
    pub const fn get(self) -> u8 {
        match self {
            ByteCount::One => 1,
            ByteCount::Two => 2,
        }
    }
}

/// Order in which the two bytes of a 16-bit value cross the wire.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WordOrder {
    /// Most-significant byte first.
    #[default]
    MsbFirst,
    /// Least-significant byte first (SMBus word registers).
    LsbFirst,
}

/// Low-level bus event raised by the controller hardware.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusInterrupt {
    /// The last byte sent was acknowledged.
    Ack,
    /// The last byte sent was not acknowledged.
    Nack,
    /// A byte is waiting in the receive register.
    DataReceived,
    /// The STOP condition has been sent.
    StopCompleted,
}

impl fmt::Display for BusInterrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BusInterrupt::Ack => "ack",
            BusInterrupt::Nack => "nack",
            BusInterrupt::DataReceived => "rx-data",
            BusInterrupt::StopCompleted => "stop",
        })
    }
}

/// Command interface to one bus controller.
///
/// Every method is a single register write on real hardware; none of them
/// block.
pub trait BusPeripheral {
    /// Issues a START (or repeated START) condition.
    fn start(&mut self);

    /// Loads `byte` into the transmit register.
    fn transmit(&mut self, byte: u8);

    /// Acknowledges the byte just received, requesting another.
    fn ack(&mut self);

    /// Declines the byte just received, ending the read.
    fn nack(&mut self);

    /// Issues a STOP condition.
    fn stop(&mut self);

    /// Returns the byte held in the receive register.
    fn received(&mut self) -> u8;

    /// Frees a bus left wedged by an interrupted transfer. Called once when
    /// the bus is opened.
    fn reset_bus(&mut self) {}
}

/// Everything needed to start one transaction.
///
/// `data` is the caller's buffer: the value to send for writes. It is moved
/// into the bus descriptor and handed back by
/// [`BusManager::take_result`] once the transaction has completed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransactionRequest {
    pub bus: BusId,
    pub address: SlaveAddress,
    pub register: u8,
    pub direction: Direction,
    pub byte_count: ByteCount,
    pub data: u16,
    pub completion: EventId,
    pub word_order: WordOrder,
}

impl TransactionRequest {
    /// Builds a register read.
    #[must_use]
    pub const fn read(
        bus: BusId,
        address: SlaveAddress,
        register: u8,
        byte_count: ByteCount,
        completion: EventId,
    ) -> Self {
        Self {
            bus,
            address,
            register,
            direction: Direction::Read,
            byte_count,
            data: 0,
            completion,
            word_order: WordOrder::MsbFirst,
        }
    }

    /// Builds a register write of `data`.
    #[must_use]
    pub const fn write(
        bus: BusId,
        address: SlaveAddress,
        register: u8,
        byte_count: ByteCount,
        data: u16,
        completion: EventId,
    ) -> Self {
        Self {
            bus,
            address,
            register,
            direction: Direction::Write,
            byte_count,
            data,
            completion,
            word_order: WordOrder::MsbFirst,
        }
    }

    /// Overrides the byte order of two-byte transfers.
    #[must_use]
    pub const fn with_word_order(mut self, word_order: WordOrder) -> Self {
        self.word_order = word_order;
        self
    }
}

/// Interrupt delivered in a phase that does not accept it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProtocolViolation {
    pub bus: BusId,
    pub phase: ProtocolPhase,
    pub interrupt: BusInterrupt,
}

impl fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: unexpected {} in phase {:?}",
            self.bus, self.interrupt, self.phase
        )
    }
}

/// Unrecoverable bus-layer failure.
///
/// Every variant is a wiring or programming defect; callers on target abort.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusFault {
    /// The bus was never opened.
    UnknownBus(BusId),
    /// The bus was opened twice.
    AlreadyOpen(BusId),
    /// The bus table has no free slot.
    TableFull(BusId),
    /// A transaction is already in flight on the bus.
    Busy(BusId),
    /// The result was requested before the transaction completed.
    InFlight(BusId),
    /// Interrupt out of sequence.
    Protocol(ProtocolViolation),
    /// Sleep vote bookkeeping failed.
    Energy(EnergyFault),
}

impl From<ProtocolViolation> for BusFault {
    fn from(value: ProtocolViolation) -> Self {
        BusFault::Protocol(value)
    }
}

impl From<EnergyFault> for BusFault {
    fn from(value: EnergyFault) -> Self {
        BusFault::Energy(value)
    }
}

impl fmt::Display for BusFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusFault::UnknownBus(bus) => write!(f, "{bus} is not open"),
            BusFault::AlreadyOpen(bus) => write!(f, "{bus} opened twice"),
            BusFault::TableFull(bus) => write!(f, "no bus slot left for {bus}"),
            BusFault::Busy(bus) => write!(f, "{bus} already has a transaction in flight"),
            BusFault::InFlight(bus) => write!(f, "{bus} result read before completion"),
            BusFault::Protocol(violation) => violation.fmt(f),
            BusFault::Energy(fault) => fault.fmt(f),
        }
    }
}

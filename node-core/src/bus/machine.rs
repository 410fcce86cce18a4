//! Per-bus transaction descriptor and its phase transition function.

use super::{
    BusId, BusInterrupt, BusPeripheral, ByteCount, Direction, ProtocolViolation, SlaveAddress,
    TransactionRequest, WordOrder,
};
use crate::scheduler::EventId;

/// Step of an in-flight transaction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolPhase {
    /// START and write-address byte sent, waiting for the address ACK.
    Start,
    /// Register byte (and, for writes, data bytes) being sent.
    SelectRegister(Direction),
    /// Repeated START with the read-address byte sent, waiting for its ACK.
    AwaitReadRestart,
    /// Data phase: last write byte in flight, or read bytes arriving.
    Transfer,
    /// STOP issued, waiting for it to complete.
    Stop,
}

/// Result of feeding one interrupt to a descriptor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(super) enum Advance {
    /// More interrupts are expected.
    Continue,
    /// STOP completed; the descriptor is idle again.
    Completed(Option<EventId>),
}

/// State of the one transaction a bus can carry.
///
/// Written by [`BusManager::launch`](super::BusManager::launch) and afterwards
/// only by the bus interrupt path until the transaction completes.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransactionDescriptor {
    bus: BusId,
    address: SlaveAddress,
    register: u8,
    direction: Direction,
    byte_count: ByteCount,
    transferred: u8,
    buffer: u16,
    completion: Option<EventId>,
    word_order: WordOrder,
    phase: ProtocolPhase,
    busy: bool,
}

impl TransactionDescriptor {
    /// Descriptor for a bus with nothing in flight.
    #[must_use]
    pub const fn idle(bus: BusId) -> Self {
        Self {
            bus,
            address: SlaveAddress(0),
            register: 0,
            direction: Direction::Write,
            byte_count: ByteCount::One,
            transferred: 0,
            buffer: 0,
            completion: None,
            word_order: WordOrder::MsbFirst,
            phase: ProtocolPhase::Start,
            busy: false,
        }
    }

    pub const fn bus(&self) -> BusId {
        self.bus
    }

    pub const fn address(&self) -> SlaveAddress {
        self.address
    }

    pub const fn register(&self) -> u8 {
        self.register
    }

    pub const fn direction(&self) -> Direction {
        self.direction
    }

    pub const fn byte_count(&self) -> ByteCount {
        self.byte_count
    }

    /// Data bytes moved so far.
    pub const fn transferred(&self) -> u8 {
        self.transferred
    }

    /// Current contents of the transaction buffer.
    pub const fn buffer(&self) -> u16 {
        self.buffer
    }

    pub const fn completion(&self) -> Option<EventId> {
        self.completion
    }

    pub const fn word_order(&self) -> WordOrder {
        self.word_order
    }

    pub const fn phase(&self) -> ProtocolPhase {
        self.phase
    }

    /// `true` from launch until the STOP condition completes.
    pub const fn is_busy(&self) -> bool {
        self.busy
    }

    pub(super) fn take_buffer(&mut self) -> u16 {
        core::mem::take(&mut self.buffer)
    }

    /// Loads `request` and sends START plus the write-address byte.
    ///
    /// The register select is always a write, even for reads.
    pub(super) fn begin<B>(&mut self, request: &TransactionRequest, peripheral: &mut B)
    where
        B: BusPeripheral + ?Sized,
    {
        self.address = request.address;
        self.register = request.register;
        self.direction = request.direction;
        self.byte_count = request.byte_count;
        self.transferred = 0;
        self.buffer = match request.direction {
            Direction::Read => 0,
            Direction::Write => request.data,
        };
        self.completion = Some(request.completion);
        self.word_order = request.word_order;
        self.phase = ProtocolPhase::Start;
        self.busy = true;

        peripheral.start();
        peripheral.transmit(self.address.address_byte(Direction::Write));
    }

    /// Applies one hardware interrupt.
    pub(super) fn advance<B>(
        &mut self,
        interrupt: BusInterrupt,
        peripheral: &mut B,
    ) -> Result<Advance, ProtocolViolation>
    where
        B: BusPeripheral + ?Sized,
    {
        if !self.busy {
            return Err(self.violation(interrupt));
        }

        match interrupt {
            BusInterrupt::Ack => self.on_ack(peripheral),
            BusInterrupt::Nack => self.on_nack(peripheral),
            BusInterrupt::DataReceived => self.on_data_received(peripheral),
            BusInterrupt::StopCompleted => self.on_stop_completed(),
        }
    }

    fn on_ack<B>(&mut self, peripheral: &mut B) -> Result<Advance, ProtocolViolation>
    where
        B: BusPeripheral + ?Sized,
    {
        match self.phase {
            ProtocolPhase::Start => {
                peripheral.transmit(self.register);
                self.phase = ProtocolPhase::SelectRegister(self.direction);
            }
            ProtocolPhase::SelectRegister(Direction::Read) => {
                peripheral.start();
                peripheral.transmit(self.address.address_byte(Direction::Read));
                self.phase = ProtocolPhase::AwaitReadRestart;
            }
            ProtocolPhase::SelectRegister(Direction::Write) => {
                let [first, second] = self.outgoing_bytes();
                match (self.byte_count, self.transferred) {
                    (ByteCount::One, _) => {
                        peripheral.transmit(self.buffer.to_le_bytes()[0]);
                        self.transferred = 1;
                        self.phase = ProtocolPhase::Transfer;
                    }
                    (ByteCount::Two, 0) => {
                        peripheral.transmit(first);
                        self.transferred = 1;
                    }
                    (ByteCount::Two, _) => {
                        peripheral.transmit(second);
                        self.transferred = 2;
                        self.phase = ProtocolPhase::Transfer;
                    }
                }
            }
            ProtocolPhase::AwaitReadRestart => {
                self.phase = ProtocolPhase::Transfer;
            }
            ProtocolPhase::Transfer => match self.direction {
                Direction::Write => {
                    peripheral.stop();
                    self.phase = ProtocolPhase::Stop;
                }
                // Reads finish through the data-received path.
                Direction::Read => return Err(self.violation(BusInterrupt::Ack)),
            },
            ProtocolPhase::Stop => return Err(self.violation(BusInterrupt::Ack)),
        }
        Ok(Advance::Continue)
    }

    fn on_nack<B>(&mut self, peripheral: &mut B) -> Result<Advance, ProtocolViolation>
    where
        B: BusPeripheral + ?Sized,
    {
        match self.phase {
            // Slave not ready to be addressed again yet; resend verbatim.
            ProtocolPhase::AwaitReadRestart => {
                peripheral.start();
                peripheral.transmit(self.address.address_byte(Direction::Read));
                Ok(Advance::Continue)
            }
            ProtocolPhase::Start
            | ProtocolPhase::SelectRegister(_)
            | ProtocolPhase::Transfer
            | ProtocolPhase::Stop => Err(self.violation(BusInterrupt::Nack)),
        }
    }

    fn on_data_received<B>(&mut self, peripheral: &mut B) -> Result<Advance, ProtocolViolation>
    where
        B: BusPeripheral + ?Sized,
    {
        match (self.phase, self.direction) {
            (ProtocolPhase::Transfer, Direction::Read) => {
                let byte = peripheral.received();
                let index = self.transferred;
                self.transferred += 1;
                self.buffer |= u16::from(byte) << self.read_shift(index);

                if self.transferred < self.byte_count.get() {
                    peripheral.ack();
                } else {
                    peripheral.nack();
                    peripheral.stop();
                    self.phase = ProtocolPhase::Stop;
                }
                Ok(Advance::Continue)
            }
            (ProtocolPhase::Transfer, Direction::Write)
            | (
                ProtocolPhase::Start
                | ProtocolPhase::SelectRegister(_)
                | ProtocolPhase::AwaitReadRestart
                | ProtocolPhase::Stop,
                _,
            ) => Err(self.violation(BusInterrupt::DataReceived)),
        }
    }

    fn on_stop_completed(&mut self) -> Result<Advance, ProtocolViolation> {
        match self.phase {
            ProtocolPhase::Stop => {
                self.phase = ProtocolPhase::Start;
                self.busy = false;
                Ok(Advance::Completed(self.completion))
            }
            ProtocolPhase::Start
            | ProtocolPhase::SelectRegister(_)
            | ProtocolPhase::AwaitReadRestart
            | ProtocolPhase::Transfer => Err(self.violation(BusInterrupt::StopCompleted)),
        }
    }

    /// Two-byte write in wire order. One-byte writes send the low byte and
    /// ignore the word order.
    fn outgoing_bytes(&self) -> [u8; 2] {
        let [high, low] = self.buffer.to_be_bytes();
        match self.word_order {
            WordOrder::MsbFirst => [high, low],
            WordOrder::LsbFirst => [low, high],
        }
    }

    /// Bit position for the `index`-th received byte.
    fn read_shift(&self, index: u8) -> u8 {
        let last = self.byte_count.get() - 1;
        match self.word_order {
            WordOrder::MsbFirst => 8 * (last - index),
            WordOrder::LsbFirst => 8 * index,
        }
    }

    fn violation(&self, interrupt: BusInterrupt) -> ProtocolViolation {
        ProtocolViolation {
            bus: self.bus,
            phase: self.phase,
            interrupt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapless::Vec;

    const BUS: BusId = BusId::new(1);
    const DONE: EventId = EventId::new(3);

    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    enum Command {
        Start,
        Transmit(u8),
        Ack,
        Nack,
        Stop,
    }

    #[derive(Default)]
    struct RecordingBus {
        commands: Vec<Command, 16>,
        rx: u8,
    }

    impl BusPeripheral for RecordingBus {
        fn start(&mut self) {
            self.commands.push(Command::Start).unwrap();
        }

        fn transmit(&mut self, byte: u8) {
            self.commands.push(Command::Transmit(byte)).unwrap();
        }

        fn ack(&mut self) {
            self.commands.push(Command::Ack).unwrap();
        }

        fn nack(&mut self) {
            self.commands.push(Command::Nack).unwrap();
        }

        fn stop(&mut self) {
            self.commands.push(Command::Stop).unwrap();
        }

        fn received(&mut self) -> u8 {
            self.rx
        }
    }

    fn address() -> SlaveAddress {
        SlaveAddress::new(0x40).unwrap()
    }

    fn launched(request: &TransactionRequest) -> (TransactionDescriptor, RecordingBus) {
        let mut descriptor = TransactionDescriptor::idle(BUS);
        let mut bus = RecordingBus::default();
        descriptor.begin(request, &mut bus);
        (descriptor, bus)
    }

    fn feed(
        descriptor: &mut TransactionDescriptor,
        bus: &mut RecordingBus,
        interrupt: BusInterrupt,
    ) -> Advance {
        descriptor.advance(interrupt, bus).expect("valid interrupt")
    }

    #[test]
    fn begin_addresses_slave_for_write() {
        let request = TransactionRequest::read(BUS, address(), 0xE7, ByteCount::One, DONE);
        let (descriptor, bus) = launched(&request);

        assert!(descriptor.is_busy());
        assert_eq!(descriptor.phase(), ProtocolPhase::Start);
        assert_eq!(bus.commands.as_slice(), &[Command::Start, Command::Transmit(0x80)]);
    }

    #[test]
    fn two_byte_read_assembles_big_endian() {
        let request = TransactionRequest::read(BUS, address(), 0xF5, ByteCount::Two, DONE);
        let (mut descriptor, mut bus) = launched(&request);

        feed(&mut descriptor, &mut bus, BusInterrupt::Ack);
        assert_eq!(descriptor.phase(), ProtocolPhase::SelectRegister(Direction::Read));
        feed(&mut descriptor, &mut bus, BusInterrupt::Ack);
        assert_eq!(descriptor.phase(), ProtocolPhase::AwaitReadRestart);
        feed(&mut descriptor, &mut bus, BusInterrupt::Ack);
        assert_eq!(descriptor.phase(), ProtocolPhase::Transfer);

        bus.rx = 0x68;
        feed(&mut descriptor, &mut bus, BusInterrupt::DataReceived);
        assert_eq!(descriptor.phase(), ProtocolPhase::Transfer);
        bus.rx = 0x3A;
        feed(&mut descriptor, &mut bus, BusInterrupt::DataReceived);
        assert_eq!(descriptor.phase(), ProtocolPhase::Stop);

        let advance = feed(&mut descriptor, &mut bus, BusInterrupt::StopCompleted);
        assert_eq!(advance, Advance::Completed(Some(DONE)));
        assert_eq!(descriptor.buffer(), 0x683A);
        assert!(!descriptor.is_busy());
        assert_eq!(descriptor.phase(), ProtocolPhase::Start);

        assert_eq!(
            bus.commands.as_slice(),
            &[
                Command::Start,
                Command::Transmit(0x80),
                Command::Transmit(0xF5),
                Command::Start,
                Command::Transmit(0x81),
                Command::Ack,
                Command::Nack,
                Command::Stop,
            ]
        );
    }

    #[test]
    fn two_byte_read_lsb_first_assembles_little_endian() {
        let request = TransactionRequest::read(BUS, address(), 0x04, ByteCount::Two, DONE)
            .with_word_order(WordOrder::LsbFirst);
        let (mut descriptor, mut bus) = launched(&request);

        for _ in 0..3 {
            feed(&mut descriptor, &mut bus, BusInterrupt::Ack);
        }
        bus.rx = 0x34;
        feed(&mut descriptor, &mut bus, BusInterrupt::DataReceived);
        bus.rx = 0x12;
        feed(&mut descriptor, &mut bus, BusInterrupt::DataReceived);

        assert_eq!(descriptor.buffer(), 0x1234);
    }

    #[test]
    fn one_byte_read_leaves_high_byte_clear() {
        let request = TransactionRequest::read(BUS, address(), 0xE7, ByteCount::One, DONE);
        let (mut descriptor, mut bus) = launched(&request);

        for _ in 0..3 {
            feed(&mut descriptor, &mut bus, BusInterrupt::Ack);
        }
        bus.rx = 0x3A;
        feed(&mut descriptor, &mut bus, BusInterrupt::DataReceived);

        assert_eq!(descriptor.phase(), ProtocolPhase::Stop);
        assert_eq!(descriptor.buffer(), 0x003A);
        assert_eq!(bus.commands.last(), Some(&Command::Stop));
        assert!(!bus.commands.contains(&Command::Ack));
    }

    #[test]
    fn write_data_bytes_follow_byte_count_and_word_order() {
        let cases = [
            (ByteCount::One, WordOrder::MsbFirst, 0x0001, &[0x01][..]),
            (ByteCount::One, WordOrder::LsbFirst, 0x0001, &[0x01][..]),
            (ByteCount::Two, WordOrder::MsbFirst, 0x1234, &[0x12, 0x34][..]),
            (ByteCount::Two, WordOrder::LsbFirst, 0x1234, &[0x34, 0x12][..]),
        ];

        for (byte_count, word_order, data, expected) in cases {
            let request = TransactionRequest::write(BUS, address(), 0xE6, byte_count, data, DONE)
                .with_word_order(word_order);
            let (mut descriptor, mut bus) = launched(&request);
            for _ in 0..=expected.len() {
                feed(&mut descriptor, &mut bus, BusInterrupt::Ack);
            }
            assert_eq!(descriptor.phase(), ProtocolPhase::Transfer);

            let mut wire: Vec<u8, 4> = Vec::new();
            for command in &bus.commands {
                if let Command::Transmit(byte) = command {
                    wire.push(*byte).unwrap();
                }
            }
            let mut want: Vec<u8, 4> = Vec::new();
            want.extend_from_slice(&[0x80, 0xE6]).unwrap();
            want.extend_from_slice(expected).unwrap();
            assert_eq!(wire, want, "{byte_count:?} {word_order:?}");
        }
    }

    #[test]
    fn restart_nack_resends_read_address() {
        let request = TransactionRequest::read(BUS, address(), 0xF5, ByteCount::Two, DONE);
        let (mut descriptor, mut bus) = launched(&request);

        feed(&mut descriptor, &mut bus, BusInterrupt::Ack);
        feed(&mut descriptor, &mut bus, BusInterrupt::Ack);
        bus.commands.clear();

        feed(&mut descriptor, &mut bus, BusInterrupt::Nack);
        feed(&mut descriptor, &mut bus, BusInterrupt::Nack);

        assert_eq!(descriptor.phase(), ProtocolPhase::AwaitReadRestart);
        assert_eq!(
            bus.commands.as_slice(),
            &[
                Command::Start,
                Command::Transmit(0x81),
                Command::Start,
                Command::Transmit(0x81),
            ]
        );
    }

    #[test]
    fn one_byte_write_sends_low_byte() {
        let request =
            TransactionRequest::write(BUS, address(), 0xE6, ByteCount::One, 0x0001, DONE);
        let (mut descriptor, mut bus) = launched(&request);

        feed(&mut descriptor, &mut bus, BusInterrupt::Ack);
        assert_eq!(descriptor.phase(), ProtocolPhase::SelectRegister(Direction::Write));
        feed(&mut descriptor, &mut bus, BusInterrupt::Ack);
        assert_eq!(descriptor.phase(), ProtocolPhase::Transfer);
        feed(&mut descriptor, &mut bus, BusInterrupt::Ack);
        assert_eq!(descriptor.phase(), ProtocolPhase::Stop);

        assert_eq!(
            bus.commands.as_slice(),
            &[
                Command::Start,
                Command::Transmit(0x80),
                Command::Transmit(0xE6),
                Command::Transmit(0x01),
                Command::Stop,
            ]
        );
        assert_eq!(descriptor.buffer(), 0x0001);
    }

    #[test]
    fn two_byte_write_uses_two_select_steps() {
        let request =
            TransactionRequest::write(BUS, address(), 0x00, ByteCount::Two, 0xBEEF, DONE);
        let (mut descriptor, mut bus) = launched(&request);

        feed(&mut descriptor, &mut bus, BusInterrupt::Ack);
        feed(&mut descriptor, &mut bus, BusInterrupt::Ack);
        assert_eq!(descriptor.phase(), ProtocolPhase::SelectRegister(Direction::Write));
        assert_eq!(descriptor.transferred(), 1);
        feed(&mut descriptor, &mut bus, BusInterrupt::Ack);
        assert_eq!(descriptor.phase(), ProtocolPhase::Transfer);
        assert_eq!(descriptor.transferred(), 2);

        assert_eq!(
            &bus.commands[2..],
            &[Command::Transmit(0x00), Command::Transmit(0xBE), Command::Transmit(0xEF)]
        );
    }

    #[test]
    fn two_byte_write_lsb_first_sends_low_byte_first() {
        let request =
            TransactionRequest::write(BUS, address(), 0x00, ByteCount::Two, 0xBEEF, DONE)
                .with_word_order(WordOrder::LsbFirst);
        let (mut descriptor, mut bus) = launched(&request);

        for _ in 0..3 {
            feed(&mut descriptor, &mut bus, BusInterrupt::Ack);
        }

        assert_eq!(&bus.commands[3..], &[Command::Transmit(0xEF), Command::Transmit(0xBE)]);
    }

    #[test]
    fn interrupts_outside_the_table_are_violations() {
        const INTERRUPTS: [BusInterrupt; 4] = [
            BusInterrupt::Ack,
            BusInterrupt::Nack,
            BusInterrupt::DataReceived,
            BusInterrupt::StopCompleted,
        ];

        for direction in [Direction::Read, Direction::Write] {
            let mut phases: Vec<ProtocolPhase, 5> = Vec::new();
            phases.push(ProtocolPhase::Start).unwrap();
            phases.push(ProtocolPhase::SelectRegister(direction)).unwrap();
            if direction == Direction::Read {
                phases.push(ProtocolPhase::AwaitReadRestart).unwrap();
            }
            phases.push(ProtocolPhase::Transfer).unwrap();
            phases.push(ProtocolPhase::Stop).unwrap();

            for &phase in &phases {
                for interrupt in INTERRUPTS {
                    let expected_valid = match interrupt {
                        BusInterrupt::Ack => match phase {
                            ProtocolPhase::Transfer => direction == Direction::Write,
                            ProtocolPhase::Stop => false,
                            _ => true,
                        },
                        BusInterrupt::Nack => phase == ProtocolPhase::AwaitReadRestart,
                        BusInterrupt::DataReceived => {
                            phase == ProtocolPhase::Transfer && direction == Direction::Read
                        }
                        BusInterrupt::StopCompleted => phase == ProtocolPhase::Stop,
                    };

                    let request = match direction {
                        Direction::Read => {
                            TransactionRequest::read(BUS, address(), 0x01, ByteCount::Two, DONE)
                        }
                        Direction::Write => TransactionRequest::write(
                            BUS,
                            address(),
                            0x01,
                            ByteCount::Two,
                            0,
                            DONE,
                        ),
                    };
                    let (mut descriptor, mut bus) = launched(&request);
                    descriptor.phase = phase;

                    let result = descriptor.advance(interrupt, &mut bus);
                    if expected_valid {
                        assert!(result.is_ok(), "{phase:?} should accept {interrupt:?}");
                    } else {
                        assert_eq!(
                            result,
                            Err(ProtocolViolation {
                                bus: BUS,
                                phase,
                                interrupt,
                            }),
                            "{phase:?} must reject {interrupt:?}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn idle_descriptor_rejects_every_interrupt() {
        let mut descriptor = TransactionDescriptor::idle(BUS);
        let mut bus = RecordingBus::default();

        assert!(descriptor.advance(BusInterrupt::Ack, &mut bus).is_err());
        assert!(bus.commands.is_empty());
    }
}

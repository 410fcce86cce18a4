//! Interrupt-driven transmitter for the wireless serial link.
//!
//! A frame is handed over with [`LinkTransmitter::send`]; the UART interrupt
//! handler then feeds every `TxReady`/`TxComplete` event into
//! [`LinkTransmitter::on_interrupt`]. Deep sleep is blocked while a frame is
//! on the wire, because the UART stops clocking below that level. Frames
//! submitted while another one is in flight wait in a short backlog.

use core::fmt;

use heapless::{Deque, Vec};

use crate::energy::{EnergyArbiter, EnergyFault, EnergyMode};
use crate::scheduler::{EventId, EventScheduler};

/// Longest frame the transmitter accepts, in bytes.
pub const MAX_FRAME_LEN: usize = 80;

/// Frames that may wait behind the one being transmitted.
pub const LINK_BACKLOG: usize = 4;

/// Mode blocked while a frame is being transmitted.
pub const DEFAULT_LINK_SLEEP_BLOCK: EnergyMode = EnergyMode::Em3;

type Frame = Vec<u8, MAX_FRAME_LEN>;

/// Interrupt-level control of the UART transmitter.
pub trait LinkPeripheral {
    /// Loads one byte into the transmit register.
    fn write(&mut self, byte: u8);

    /// Enables or disables the "transmit buffer empty" interrupt.
    fn set_tx_ready_interrupt(&mut self, enabled: bool);

    /// Enables or disables the "transmission complete" interrupt.
    fn set_tx_complete_interrupt(&mut self, enabled: bool);
}

/// Hardware events that drive the transmitter.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkInterrupt {
    /// The transmit buffer can take another byte.
    TxReady,
    /// The shift register has emptied after the last byte.
    TxComplete,
}

/// Step of the frame currently on the wire.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkPhase {
    Idle,
    /// Frame loaded, waiting for the first `TxReady`.
    Armed,
    Transmitting,
    /// Every byte written, waiting for `TxComplete`.
    Draining,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkConfig {
    pub sleep_block: EnergyMode,
    /// Event posted after each frame has fully left the UART.
    pub completion: EventId,
}

impl LinkConfig {
    #[must_use]
    pub const fn new(completion: EventId) -> Self {
        Self {
            sleep_block: DEFAULT_LINK_SLEEP_BLOCK,
            completion,
        }
    }

    #[must_use]
    pub const fn with_sleep_block(mut self, mode: EnergyMode) -> Self {
        self.sleep_block = mode;
        self
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    /// Interrupt delivered in a phase that does not expect it.
    Protocol {
        phase: LinkPhase,
        interrupt: LinkInterrupt,
    },
    EmptyFrame,
    /// Frame longer than [`MAX_FRAME_LEN`].
    FrameTooLong(usize),
    BacklogFull,
    Energy(EnergyFault),
}

impl From<EnergyFault> for LinkError {
    fn from(value: EnergyFault) -> Self {
        LinkError::Energy(value)
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::Protocol { phase, interrupt } => {
                write!(f, "link: unexpected {interrupt:?} while {phase:?}")
            }
            LinkError::EmptyFrame => f.write_str("link: empty frame"),
            LinkError::FrameTooLong(len) => {
                write!(f, "link: {len}-byte frame exceeds {MAX_FRAME_LEN} bytes")
            }
            LinkError::BacklogFull => f.write_str("link: backlog full"),
            LinkError::Energy(fault) => fault.fmt(f),
        }
    }
}

/// Destination for the node's text reports.
pub trait ReportSink {
    /// Queues `text` for transmission.
    ///
    /// # Errors
    ///
    /// [`LinkError`] when the frame cannot be accepted.
    fn send(&mut self, text: &str) -> Result<(), LinkError>;
}

/// Frame transmitter for one UART.
pub struct LinkTransmitter<'a, P> {
    peripheral: P,
    arbiter: &'a EnergyArbiter,
    scheduler: &'a EventScheduler,
    config: LinkConfig,
    phase: LinkPhase,
    frame: Frame,
    sent: usize,
    backlog: Deque<Frame, LINK_BACKLOG>,
}

impl<'a, P> LinkTransmitter<'a, P>
where
    P: LinkPeripheral,
{
    pub const fn new(
        peripheral: P,
        arbiter: &'a EnergyArbiter,
        scheduler: &'a EventScheduler,
        config: LinkConfig,
    ) -> Self {
        Self {
            peripheral,
            arbiter,
            scheduler,
            config,
            phase: LinkPhase::Idle,
            frame: Vec::new(),
            sent: 0,
            backlog: Deque::new(),
        }
    }

    pub const fn phase(&self) -> LinkPhase {
        self.phase
    }

    pub const fn is_busy(&self) -> bool {
        !matches!(self.phase, LinkPhase::Idle)
    }

    /// Frames waiting behind the current one.
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn peripheral_mut(&mut self) -> &mut P {
        &mut self.peripheral
    }

    /// Starts transmitting `text`, or queues it behind the frame in flight.
    ///
    /// # Errors
    ///
    /// [`LinkError::EmptyFrame`], [`LinkError::FrameTooLong`],
    /// [`LinkError::BacklogFull`], or an energy fault from the sleep vote.
    pub fn send(&mut self, text: &str) -> Result<(), LinkError> {
        let bytes = text.as_bytes();
        if bytes.is_empty() {
            return Err(LinkError::EmptyFrame);
        }
        let frame = Frame::from_slice(bytes).map_err(|_| LinkError::FrameTooLong(bytes.len()))?;

        if self.is_busy() {
            return self
                .backlog
                .push_back(frame)
                .map_err(|_| LinkError::BacklogFull);
        }
        self.begin(frame)
    }

    /// Advances the transmitter by one hardware event.
    ///
    /// # Errors
    ///
    /// [`LinkError::Protocol`] for an event the current phase does not
    /// accept, or an energy fault when releasing or retaking the vote.
    pub fn on_interrupt(&mut self, interrupt: LinkInterrupt) -> Result<(), LinkError> {
        match (self.phase, interrupt) {
            (LinkPhase::Armed | LinkPhase::Transmitting, LinkInterrupt::TxReady) => {
                if let Some(&byte) = self.frame.get(self.sent) {
                    self.peripheral.write(byte);
                    self.sent += 1;
                }
                if self.sent == self.frame.len() {
                    self.peripheral.set_tx_ready_interrupt(false);
                    self.peripheral.set_tx_complete_interrupt(true);
                    self.phase = LinkPhase::Draining;
                } else {
                    self.phase = LinkPhase::Transmitting;
                }
                Ok(())
            }
            (LinkPhase::Draining, LinkInterrupt::TxComplete) => {
                self.peripheral.set_tx_complete_interrupt(false);
                self.arbiter.unblock(self.config.sleep_block)?;
                self.scheduler.post(self.config.completion);
                self.phase = LinkPhase::Idle;

                match self.backlog.pop_front() {
                    Some(next) => self.begin(next),
                    None => Ok(()),
                }
            }
            (LinkPhase::Idle, _)
            | (LinkPhase::Armed | LinkPhase::Transmitting, LinkInterrupt::TxComplete)
            | (LinkPhase::Draining, LinkInterrupt::TxReady) => Err(LinkError::Protocol {
                phase: self.phase,
                interrupt,
            }),
        }
    }

    fn begin(&mut self, frame: Frame) -> Result<(), LinkError> {
        self.arbiter.block(self.config.sleep_block)?;
        self.frame = frame;
        self.sent = 0;
        self.phase = LinkPhase::Armed;
        self.peripheral.set_tx_ready_interrupt(true);
        Ok(())
    }
}

impl<P> ReportSink for LinkTransmitter<'_, P>
where
    P: LinkPeripheral,
{
    fn send(&mut self, text: &str) -> Result<(), LinkError> {
        LinkTransmitter::send(self, text)
    }
}

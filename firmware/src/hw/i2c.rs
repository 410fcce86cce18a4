//! I2C v2 controller stepped one byte at a time.
//!
//! The peripheral normally runs a whole transfer on its own. Reload mode with
//! `NBYTES = 1` makes it pause after every byte, so the transaction machine in
//! `node-core` sees the same ACK, data and STOP events a byte-level
//! controller would raise.

use node_core::bus::{BusInterrupt, Direction};

/// ISR bits the driver reacts to.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct IsrFlags {
    pub txis: bool,
    pub rxne: bool,
    pub tcr: bool,
    pub nackf: bool,
    pub stopf: bool,
}

/// Position of the controller within the current transfer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WireState {
    Idle,
    /// START queued with the given address direction.
    Addressing(Direction),
    Writing,
    Reading,
}

/// Maps a flag snapshot to the next event for the transaction machine and
/// the state that follows it.
///
/// A read-address ACK has no flag of its own. The first RXNE after START
/// stands in for it and is left set, so the handler fires again for the data
/// byte itself.
#[must_use]
pub fn classify(flags: IsrFlags, state: WireState) -> Option<(BusInterrupt, WireState)> {
    if flags.stopf {
        return Some((BusInterrupt::StopCompleted, WireState::Idle));
    }
    if flags.nackf {
        return Some((BusInterrupt::Nack, state));
    }
    match state {
        WireState::Addressing(Direction::Write) if flags.txis => {
            Some((BusInterrupt::Ack, WireState::Writing))
        }
        WireState::Addressing(Direction::Read) if flags.rxne => {
            Some((BusInterrupt::Ack, WireState::Reading))
        }
        WireState::Writing if flags.tcr => Some((BusInterrupt::Ack, WireState::Writing)),
        WireState::Reading if flags.rxne => Some((BusInterrupt::DataReceived, WireState::Reading)),
        _ => None,
    }
}

/// Direction encoded in an address byte's R/W bit.
#[must_use]
pub const fn address_direction(address_byte: u8) -> Direction {
    if address_byte & 1 == Direction::Read.address_bit() {
        Direction::Read
    } else {
        Direction::Write
    }
}

#[cfg(target_os = "none")]
pub use self::controller::I2cController;

#[cfg(target_os = "none")]
mod controller {
    use embassy_stm32::pac::i2c::regs::Timingr;
    use embassy_stm32::pac::i2c::{I2c, vals};
    use node_core::bus::{BusInterrupt, BusPeripheral, Direction};

    use super::{IsrFlags, WireState, address_direction, classify};

    /// 100 kHz standard mode from the 16 MHz kernel clock.
    const TIMING_100KHZ: u32 = 0x0030_3D5B;

    pub struct I2cController {
        regs: I2c,
        state: WireState,
        start_pending: bool,
    }

    impl I2cController {
        /// Takes over `regs`. Clocks and pins must already be configured.
        #[must_use]
        pub fn new(regs: I2c) -> Self {
            regs.cr1().modify(|w| w.set_pe(false));
            regs.timingr().write_value(Timingr(TIMING_100KHZ));
            regs.cr1().modify(|w| {
                w.set_nackie(true);
                w.set_stopie(true);
                w.set_rxie(true);
                w.set_pe(true);
            });
            Self {
                regs,
                state: WireState::Idle,
                start_pending: false,
            }
        }

        /// Next event for the transaction machine, or `None` once the
        /// peripheral has nothing left to report.
        pub fn poll(&mut self) -> Option<BusInterrupt> {
            let isr = self.regs.isr().read();
            let flags = IsrFlags {
                txis: isr.txis(),
                rxne: isr.rxne(),
                tcr: isr.tcr(),
                nackf: isr.nackf(),
                stopf: isr.stopf(),
            };
            let (interrupt, next) = classify(flags, self.state)?;
            match interrupt {
                // A NACKed address may be followed by an automatic STOP; the
                // machine restarts immediately, so both are consumed here.
                BusInterrupt::Nack => self.regs.icr().write(|w| {
                    w.set_nackcf(true);
                    w.set_stopcf(true);
                }),
                BusInterrupt::StopCompleted => self.regs.icr().write(|w| w.set_stopcf(true)),
                BusInterrupt::Ack | BusInterrupt::DataReceived => {}
            }
            if self.state != next && next == WireState::Writing {
                self.regs.cr1().modify(|w| {
                    w.set_txie(false);
                    w.set_tcie(true);
                });
            }
            self.state = next;
            Some(interrupt)
        }

        fn reload_one(&self) {
            self.regs.cr2().modify(|w| {
                w.set_nbytes(1);
                w.set_reload(true);
            });
        }
    }

    impl BusPeripheral for I2cController {
        fn start(&mut self) {
            self.start_pending = true;
        }

        fn transmit(&mut self, byte: u8) {
            if !self.start_pending {
                if self.regs.isr().read().tcr() {
                    self.reload_one();
                }
                self.regs.txdr().write(|w| w.set_txdata(byte));
                return;
            }

            self.start_pending = false;
            let direction = address_direction(byte);
            self.state = WireState::Addressing(direction);
            self.regs.cr1().modify(|w| {
                w.set_tcie(false);
                w.set_txie(direction == Direction::Write);
            });
            self.regs.cr2().modify(|w| {
                w.set_sadd(u16::from(byte & 0xFE));
                w.set_dir(match direction {
                    Direction::Read => vals::Dir::READ,
                    Direction::Write => vals::Dir::WRITE,
                });
                w.set_nbytes(1);
                w.set_reload(true);
                w.set_autoend(false);
                w.set_start(true);
            });
        }

        fn ack(&mut self) {
            self.reload_one();
        }

        fn nack(&mut self) {
            // Last byte: leaving reload lets the hardware NACK it.
            self.regs.cr2().modify(|w| w.set_reload(false));
        }

        fn stop(&mut self) {
            self.regs.cr1().modify(|w| {
                w.set_txie(false);
                w.set_tcie(false);
            });
            self.regs.cr2().modify(|w| {
                w.set_reload(false);
                w.set_stop(true);
            });
        }

        fn received(&mut self) -> u8 {
            self.regs.rxdr().read().rxdata()
        }

        fn reset_bus(&mut self) {
            // Clearing PE resets the state machine and releases both lines.
            self.regs.cr1().modify(|w| w.set_pe(false));
            while self.regs.cr1().read().pe() {}
            self.regs.cr1().modify(|w| w.set_pe(true));
            self.state = WireState::Idle;
            self.start_pending = false;
        }
    }
}

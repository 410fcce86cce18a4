//! USART1 transmitter behind the report link.

use node_core::link::LinkInterrupt;

use super::KERNEL_CLOCK_HZ;

pub const BAUD_RATE: u32 = 9_600;

/// BRR value for 16x oversampling, rounded to nearest.
#[must_use]
pub const fn brr_for(kernel_hz: u32, baud: u32) -> u32 {
    (kernel_hz + baud / 2) / baud
}

/// Transmit-side status bits.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TxFlags {
    /// Data register can take another byte.
    pub txe: bool,
    /// Shift register drained.
    pub tc: bool,
}

/// Picks the event to hand to the link, considering only sources whose
/// interrupt is enabled.
#[must_use]
pub const fn classify(
    flags: TxFlags,
    tx_ready_enabled: bool,
    tx_complete_enabled: bool,
) -> Option<LinkInterrupt> {
    if tx_ready_enabled && flags.txe {
        Some(LinkInterrupt::TxReady)
    } else if tx_complete_enabled && flags.tc {
        Some(LinkInterrupt::TxComplete)
    } else {
        None
    }
}

/// BRR for [`BAUD_RATE`] on the board's kernel clock.
pub const BRR: u32 = brr_for(KERNEL_CLOCK_HZ, BAUD_RATE);

#[cfg(target_os = "none")]
pub use self::usart::UartTx;

#[cfg(target_os = "none")]
mod usart {
    use embassy_stm32::pac::usart::Usart;
    use embassy_stm32::pac::usart::regs::Brr;
    use node_core::link::{LinkInterrupt, LinkPeripheral};

    use super::{BRR, TxFlags, classify};

    pub struct UartTx {
        regs: Usart,
        tx_ready: bool,
        tx_complete: bool,
    }

    impl UartTx {
        /// Takes over `regs` as a transmit-only port. Clocks and the TX pin
        /// must already be configured.
        #[must_use]
        pub fn new(regs: Usart) -> Self {
            regs.cr1().modify(|w| w.set_ue(false));
            regs.brr().write_value(Brr(BRR));
            regs.cr1().modify(|w| {
                w.set_te(true);
                w.set_ue(true);
            });
            Self {
                regs,
                tx_ready: false,
                tx_complete: false,
            }
        }

        /// Next event for the link, or `None` when no enabled source is set.
        pub fn poll(&mut self) -> Option<LinkInterrupt> {
            let isr = self.regs.isr().read();
            classify(
                TxFlags {
                    txe: isr.txe(),
                    tc: isr.tc(),
                },
                self.tx_ready,
                self.tx_complete,
            )
        }
    }

    impl LinkPeripheral for UartTx {
        fn write(&mut self, byte: u8) {
            self.regs.tdr().write(|w| w.set_dr(u16::from(byte)));
        }

        fn set_tx_ready_interrupt(&mut self, enabled: bool) {
            self.tx_ready = enabled;
            self.regs.cr1().modify(|w| w.set_txeie(enabled));
        }

        fn set_tx_complete_interrupt(&mut self, enabled: bool) {
            // The TDR write for the final byte already cleared TC.
            self.tx_complete = enabled;
            self.regs.cr1().modify(|w| w.set_tcie(enabled));
        }
    }
}

//! Peripheral adapters for the STM32G0 board.
//!
//! Register access only exists on target. The flag decoding each adapter
//! relies on is plain code so the host test run covers it.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

pub mod i2c;
pub mod sleep;
pub mod tick;
pub mod uart;

/// Kernel clock for I2C, USART and SysTick after `embassy_stm32::init` with
/// the default configuration (HSI16, no PLL).
pub const KERNEL_CLOCK_HZ: u32 = 16_000_000;

#[cfg(target_os = "none")]
pub use self::board::configure_board;

#[cfg(target_os = "none")]
mod board {
    use embassy_stm32::pac;
    use embassy_stm32::pac::gpio::Gpio;
    use embassy_stm32::pac::gpio::vals::{Moder, Ot};

    /// I2C1 SCL/SDA on PB8/PB9, I2C2 SCL/SDA on PB10/PB11.
    const I2C_PINS: [usize; 4] = [8, 9, 10, 11];
    const I2C_AF: u8 = 6;
    /// USART1 TX on PA9.
    const UART_TX_PIN: usize = 9;
    const UART_AF: u8 = 1;

    /// Enables the clocks and pin muxing for both sensor buses and the
    /// report link.
    pub fn configure_board() {
        pac::RCC.gpioenr().modify(|w| {
            w.set_gpioaen(true);
            w.set_gpioben(true);
        });
        pac::RCC.apbenr1().modify(|w| {
            w.set_i2c1en(true);
            w.set_i2c2en(true);
        });
        pac::RCC.apbenr2().modify(|w| w.set_usart1en(true));

        for pin in I2C_PINS {
            alternate(pac::GPIOB, pin, I2C_AF, Ot::OPENDRAIN);
        }
        alternate(pac::GPIOA, UART_TX_PIN, UART_AF, Ot::PUSHPULL);
    }

    fn alternate(port: Gpio, pin: usize, af: u8, output: Ot) {
        port.otyper().modify(|w| w.set_ot(pin, output));
        port.afr(pin / 8).modify(|w| w.set_afr(pin % 8, af));
        port.moder().modify(|w| w.set_moder(pin, Moder::ALTERNATE));
    }
}

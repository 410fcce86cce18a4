//! Idle entry for the Cortex-M0+ core.

use node_core::energy::EnergyMode;

/// What the core does for a given idle target.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SleepDepth {
    Run,
    /// `WFI` with SLEEPDEEP clear. Every clock, SysTick included, keeps
    /// running.
    Sleep,
    /// Stop 1. HSI16 halts along with SysTick and the I2C/USART kernel
    /// clocks; only EXTI sources wake the core.
    Stop,
}

/// Maps an idle target chosen by the energy arbiter onto this part.
///
/// EM1 and EM2 both need the high-frequency clock tree on an STM32G0, so
/// they share plain sleep.
#[must_use]
pub const fn depth_for(mode: EnergyMode) -> SleepDepth {
    match mode {
        EnergyMode::Em0 => SleepDepth::Run,
        EnergyMode::Em1 | EnergyMode::Em2 => SleepDepth::Sleep,
        EnergyMode::Em3 | EnergyMode::Em4 => SleepDepth::Stop,
    }
}

#[cfg(target_os = "none")]
pub use self::cortex::CortexSleep;

#[cfg(target_os = "none")]
mod cortex {
    use cortex_m::peripheral::SCB;
    use critical_section::CriticalSection;
    use embassy_stm32::pac;
    use embassy_stm32::pac::pwr::vals::Lpms;
    use node_core::energy::{EnergyMode, SleepControl};

    use super::{SleepDepth, depth_for};

    /// PWR_CR1.LPMS encoding for Stop 1.
    const LPMS_STOP1: u8 = 0b001;

    pub struct CortexSleep {
        scb: SCB,
    }

    impl CortexSleep {
        #[must_use]
        pub const fn new(scb: SCB) -> Self {
            Self { scb }
        }
    }

    impl SleepControl for CortexSleep {
        fn enter(&mut self, _cs: CriticalSection<'_>, mode: EnergyMode) {
            match depth_for(mode) {
                SleepDepth::Run => return,
                SleepDepth::Sleep => self.scb.clear_sleepdeep(),
                SleepDepth::Stop => {
                    pac::PWR
                        .cr1()
                        .modify(|w| w.set_lpms(Lpms::from_bits(LPMS_STOP1)));
                    self.scb.set_sleepdeep();
                }
            }
            // PRIMASK is set: a pending interrupt still ends WFI, and its
            // handler runs once the critical section is released.
            cortex_m::asm::dsb();
            cortex_m::asm::wfi();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_targets_map_onto_sleep_and_stop() {
        let depths: Vec<SleepDepth> = EnergyMode::ALL.iter().map(|&mode| depth_for(mode)).collect();
        assert_eq!(
            depths,
            [
                SleepDepth::Run,
                SleepDepth::Sleep,
                SleepDepth::Sleep,
                SleepDepth::Stop,
                SleepDepth::Stop,
            ]
        );
    }

    #[test]
    fn bus_and_link_floors_never_stop_the_clock_tree() {
        // Bus transfers block EM2 and the link blocks EM3.
        for floor in [EnergyMode::Em2, EnergyMode::Em3] {
            let target = floor.idle_target().unwrap();
            assert_eq!(depth_for(target), SleepDepth::Sleep);
        }
    }
}

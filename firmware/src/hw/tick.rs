//! SysTick sample clock.
//!
//! SysTick interrupts every 100 ms and a divider turns every eighteenth tick
//! into a sample event, giving the 1.8 s sample period. SysTick halts in
//! Stop mode, which is why the node keeps a system-wide EM3 block.

use super::KERNEL_CLOCK_HZ;

/// SysTick interrupts per second.
pub const TICK_HZ: u32 = 10;

/// Reload value for one [`TICK_HZ`] period on the core clock.
pub const TICK_RELOAD: u32 = KERNEL_CLOCK_HZ / TICK_HZ - 1;

/// Ticks between sample events.
pub const SAMPLE_PERIOD_TICKS: u8 = 18;

/// Counts ticks down to one event per period.
#[derive(Debug)]
pub struct TickDivider {
    period: u8,
    count: u8,
}

impl TickDivider {
    #[must_use]
    pub const fn new(period: u8) -> Self {
        Self { period, count: 0 }
    }

    /// Records one tick. Returns `true` on every `period`th call.
    pub fn tick(&mut self) -> bool {
        self.count += 1;
        if self.count >= self.period {
            self.count = 0;
            true
        } else {
            false
        }
    }
}

#[cfg(target_os = "none")]
pub use self::systick::SysTickTimer;

#[cfg(target_os = "none")]
mod systick {
    use cortex_m::peripheral::SYST;
    use cortex_m::peripheral::syst::SystClkSource;
    use node_core::app::SampleTimer;

    use super::TICK_RELOAD;

    pub struct SysTickTimer {
        syst: SYST,
    }

    impl SysTickTimer {
        #[must_use]
        pub const fn new(syst: SYST) -> Self {
            Self { syst }
        }
    }

    impl SampleTimer for SysTickTimer {
        fn start(&mut self) {
            self.syst.set_clock_source(SystClkSource::Core);
            self.syst.set_reload(TICK_RELOAD);
            self.syst.clear_current();
            self.syst.enable_interrupt();
            self.syst.enable_counter();
        }
    }
}

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Interrupt counters shared between handlers and the idle loop.
//!
//! Handlers only bump atomics here so the idle loop can log activity without
//! taking the bus or link locks.

use portable_atomic::{AtomicU32, Ordering};

/// Number of I2C controllers on the board.
pub const BUS_COUNT: usize = 2;

static BUS_INTERRUPTS: [AtomicU32; BUS_COUNT] = [AtomicU32::new(0), AtomicU32::new(0)];
static LINK_INTERRUPTS: AtomicU32 = AtomicU32::new(0);
static SAMPLE_TICKS: AtomicU32 = AtomicU32::new(0);

/// Counts one serviced interrupt on controller `slot`. Out-of-range slots are
/// ignored.
pub fn record_bus_interrupt(slot: usize) {
    if let Some(counter) = BUS_INTERRUPTS.get(slot) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn record_link_interrupt() {
    LINK_INTERRUPTS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_sample_tick() {
    SAMPLE_TICKS.fetch_add(1, Ordering::Relaxed);
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub struct StatusSnapshot {
    pub bus_interrupts: [u32; BUS_COUNT],
    pub link_interrupts: u32,
    pub sample_ticks: u32,
}

/// Reads every counter. Values may be mutually inconsistent by the events
/// that land during the read.
pub fn snapshot() -> StatusSnapshot {
    StatusSnapshot {
        bus_interrupts: [
            BUS_INTERRUPTS[0].load(Ordering::Relaxed),
            BUS_INTERRUPTS[1].load(Ordering::Relaxed),
        ],
        link_interrupts: LINK_INTERRUPTS.load(Ordering::Relaxed),
        sample_ticks: SAMPLE_TICKS.load(Ordering::Relaxed),
    }
}

//! VEML6030 ambient light sensor.
//!
//! Registers are 16-bit and travel least-significant byte first.

use super::fixed_address;
use crate::bus::{BusId, ByteCount, SlaveAddress, TransactionRequest, WordOrder};
use crate::scheduler::EventId;

pub const ADDRESS: SlaveAddress = fixed_address(0x48);

pub const REG_ALS_CONFIG: u8 = 0x00;
pub const REG_ALS_OUTPUT: u8 = 0x04;

/// Gain x1, 100 ms integration, interrupts off, powered on.
pub const DEFAULT_ALS_CONFIG: u16 = 0x0000;

/// Resolution at gain x1 and 100 ms integration.
pub const LUX_PER_COUNT: f32 = 0.0576;

#[must_use]
pub const fn configure(bus: BusId, config: u16, completion: EventId) -> TransactionRequest {
    TransactionRequest::write(bus, ADDRESS, REG_ALS_CONFIG, ByteCount::Two, config, completion)
        .with_word_order(WordOrder::LsbFirst)
}

#[must_use]
pub const fn read_light(bus: BusId, completion: EventId) -> TransactionRequest {
    TransactionRequest::read(bus, ADDRESS, REG_ALS_OUTPUT, ByteCount::Two, completion)
        .with_word_order(WordOrder::LsbFirst)
}

#[must_use]
pub fn lux(raw: u16) -> f32 {
    f32::from(raw) * LUX_PER_COUNT
}

/// Whole lux, truncated toward zero as reported over the link.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn whole_lux(raw: u16) -> u32 {
    lux(raw) as u32
}

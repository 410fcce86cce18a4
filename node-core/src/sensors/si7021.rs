//! Si7021 relative humidity and temperature sensor.

use super::fixed_address;
use crate::bus::{BusId, ByteCount, SlaveAddress, TransactionRequest};
use crate::scheduler::EventId;

pub const ADDRESS: SlaveAddress = fixed_address(0x40);

pub const CMD_MEASURE_HUMIDITY_NO_HOLD: u8 = 0xF5;
pub const CMD_MEASURE_TEMPERATURE_NO_HOLD: u8 = 0xF3;
/// Temperature captured during the previous humidity measurement; no new
/// conversion is started.
pub const CMD_TEMPERATURE_FROM_HUMIDITY: u8 = 0xE0;
pub const CMD_READ_USER_REGISTER: u8 = 0xE7;
pub const CMD_WRITE_USER_REGISTER: u8 = 0xE6;

/// User register 1 after power-on reset.
pub const USER_REGISTER_RESET: u8 = 0x3A;
/// RES1:RES0 = 01, 8-bit humidity and 12-bit temperature.
pub const RESOLUTION_RH8_T12: u8 = 0x01;
/// User register 1 once [`RESOLUTION_RH8_T12`] has been applied to the reset
/// value.
pub const USER_REGISTER_RH8_T12: u8 = 0x3B;

/// Resolution bits inside user register 1.
pub const RESOLUTION_MASK: u8 = 0x81;

#[must_use]
pub const fn measure_humidity(bus: BusId, completion: EventId) -> TransactionRequest {
    TransactionRequest::read(bus, ADDRESS, CMD_MEASURE_HUMIDITY_NO_HOLD, ByteCount::Two, completion)
}

#[must_use]
pub const fn measure_temperature(bus: BusId, completion: EventId) -> TransactionRequest {
    TransactionRequest::read(
        bus,
        ADDRESS,
        CMD_MEASURE_TEMPERATURE_NO_HOLD,
        ByteCount::Two,
        completion,
    )
}

#[must_use]
pub const fn temperature_from_humidity(bus: BusId, completion: EventId) -> TransactionRequest {
    TransactionRequest::read(
        bus,
        ADDRESS,
        CMD_TEMPERATURE_FROM_HUMIDITY,
        ByteCount::Two,
        completion,
    )
}

#[must_use]
pub const fn read_user_register(bus: BusId, completion: EventId) -> TransactionRequest {
    TransactionRequest::read(bus, ADDRESS, CMD_READ_USER_REGISTER, ByteCount::One, completion)
}

#[must_use]
pub fn write_user_register(bus: BusId, value: u8, completion: EventId) -> TransactionRequest {
    TransactionRequest::write(
        bus,
        ADDRESS,
        CMD_WRITE_USER_REGISTER,
        ByteCount::One,
        u16::from(value),
        completion,
    )
}

/// Relative humidity in percent. Not clamped; slightly negative or
/// above-100 values are possible at the extremes.
#[must_use]
pub fn relative_humidity(raw: u16) -> f32 {
    125.0 * f32::from(raw) / 65536.0 - 6.0
}

/// Temperature in degrees Celsius.
#[must_use]
pub fn celsius(raw: u16) -> f32 {
    175.72 * f32::from(raw) / 65536.0 - 46.85
}

#[must_use]
pub fn fahrenheit(raw: u16) -> f32 {
    celsius_to_fahrenheit(celsius(raw))
}

#[must_use]
pub fn celsius_to_fahrenheit(celsius: f32) -> f32 {
    celsius * 1.8 + 32.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Direction;

    fn close(actual: f32, expected: f32) -> bool {
        let delta = actual - expected;
        delta < 0.01 && delta > -0.01
    }

    #[test]
    fn humidity_conversion_matches_datasheet_points() {
        assert!(close(relative_humidity(0), -6.0));
        assert!(close(relative_humidity(0x683A), 44.89));
    }

    #[test]
    fn temperature_conversion_reaches_fahrenheit() {
        assert!(close(celsius(0x6600), 23.16));
        assert!(close(fahrenheit(0x6600), 73.69));
        assert!(close(celsius_to_fahrenheit(100.0), 212.0));
    }

    #[test]
    fn resolution_write_lands_on_expected_register_value() {
        assert_eq!(
            (USER_REGISTER_RESET & !RESOLUTION_MASK) | RESOLUTION_RH8_T12,
            USER_REGISTER_RH8_T12
        );
    }

    #[test]
    fn request_builders_target_the_sensor() {
        let bus = BusId::new(1);
        let done = EventId::new(3);

        let humidity = measure_humidity(bus, done);
        assert_eq!(humidity.address, ADDRESS);
        assert_eq!(humidity.register, 0xF5);
        assert_eq!(humidity.byte_count, ByteCount::Two);
        assert_eq!(humidity.direction, Direction::Read);

        let write = write_user_register(bus, RESOLUTION_RH8_T12, done);
        assert_eq!(write.direction, Direction::Write);
        assert_eq!(write.data, 0x0001);
        assert_eq!(write.byte_count, ByteCount::One);
    }
}

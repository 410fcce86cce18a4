//! Register maps, request builders and unit conversions for the two sensors
//! on the node.
//!
//! Nothing here touches hardware: builders return a
//! [`TransactionRequest`](crate::bus::TransactionRequest) for the caller to
//! launch, and conversions operate on the raw word handed back by
//! [`take_result`](crate::bus::TransactionPort::take_result).

pub mod si7021;
pub mod veml6030;

use crate::bus::SlaveAddress;

/// Compile-time slave address; an out-of-range value fails the build.
pub(crate) const fn fixed_address(address: u8) -> SlaveAddress {
    match SlaveAddress::new(address) {
        Ok(address) => address,
        Err(_) => panic!("sensor address exceeds 7 bits"),
    }
}

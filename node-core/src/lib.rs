#![no_std]

// Shared logic for the sensor node firmware.
//
// This crate stays portable across MCU firmware and host tooling by avoiding the
// Rust standard library and reaching hardware only through the traits exposed by
// `bus`, `link`, and `energy`.

pub mod app;
pub mod bus;
pub mod energy;
pub mod link;
pub mod scheduler;
pub mod sensors;

#[cfg(feature = "sim")]
pub mod sim;

//! RP2040 implementations of the Palimpsest HAL traits
//!
//! - [`flash::XipFlash`] - the onboard QSPI flash through the XIP window,
//!   with blocking program/erase (implements `palimpsest_hal::FlashMedium`)
//! - [`gate::CoreGate`] - dual-core flash-safe lockout over the SIO FIFO
//!   (implements `palimpsest_hal::FlashGate`)
//! - [`watchdog::HardwareWatchdog`] - the RP2040 watchdog peripheral
//!   (implements `palimpsest_hal::Watchdog`)

#![no_std]

pub mod flash;
pub mod gate;
pub mod watchdog;

// Re-export the shared traits for convenience
pub use palimpsest_hal::{FlashGate as FlashGateTrait, FlashMedium as FlashMediumTrait};

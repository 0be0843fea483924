//! Palimpsest Hardware Abstraction Layer
//!
//! This crate defines the collaborator traits the storage engine is built
//! against, so the engine itself stays board-agnostic and host-testable:
//!
//! - [`flash::FlashMedium`] - memory-mapped NOR flash with program/erase
//! - [`gate::FlashGate`] - flash-safe exclusive execution (dual-core lockout)
//! - [`watchdog::Watchdog`] - watchdog deadline extension for long scans
//!
//! Chip-specific implementations live in sibling crates
//! (`palimpsest-hal-rp2040`); no-op implementations for host tests and
//! single-core bring-up are provided here.

#![no_std]
#![deny(unsafe_code)]

pub mod flash;
pub mod gate;
pub mod watchdog;

// Re-export key traits at crate root for convenience
pub use flash::{FlashError, FlashMedium};
pub use gate::{FlashGate, GateError};
pub use watchdog::Watchdog;

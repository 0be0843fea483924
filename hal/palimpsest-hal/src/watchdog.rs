//! Watchdog deadline extension
//!
//! Long storage operations (directory validation, CRC over large payloads,
//! garbage collection) legitimately stall the main loop. They extend the
//! shared watchdog deadline proportionally to the data volume processed
//! instead of disabling it.

/// Watchdog feed interface consumed by the storage engine
pub trait Watchdog {
    /// Push the reset deadline at least `ms` milliseconds out.
    fn extend(&mut self, ms: u32);

    /// Feed the watchdog without changing the configured deadline.
    fn keep_alive(&mut self);
}

/// Watchdog for host tests: no hardware to feed.
#[derive(Debug, Default)]
pub struct NullWatchdog;

impl Watchdog for NullWatchdog {
    fn extend(&mut self, _ms: u32) {}

    fn keep_alive(&mut self) {}
}

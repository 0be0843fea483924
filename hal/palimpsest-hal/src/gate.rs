//! Flash-safe exclusive execution
//!
//! On parts that execute code from the same flash the engine mutates (XIP),
//! a program or erase while any core fetches from flash is a fault. The gate
//! scopes that danger window: while a [`FlashGate::lock`] guard is alive, no
//! other execution unit may touch flash, and the guard's `Drop` releases the
//! lockout on every exit path.

/// Errors acquiring the flash-safe guard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GateError {
    /// The other execution unit did not park within the timeout
    Timeout,
}

/// Scoped exclusive access for flash mutation
pub trait FlashGate {
    /// Guard type; releasing it (drop) ends the exclusion window.
    type Guard<'a>
    where
        Self: 'a;

    /// Block until all other execution units are parked flash-safe, or fail
    /// after `timeout_ms`.
    fn lock(&mut self, timeout_ms: u32) -> Result<Self::Guard<'_>, GateError>;
}

/// Gate for single-core targets and host tests: nothing to park.
#[derive(Debug, Default)]
pub struct NullGate;

impl FlashGate for NullGate {
    type Guard<'a>
        = ()
    where
        Self: 'a;

    fn lock(&mut self, _timeout_ms: u32) -> Result<(), GateError> {
        Ok(())
    }
}

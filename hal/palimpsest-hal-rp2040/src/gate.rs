//! Dual-core flash-safe lockout
//!
//! A flash program or erase stalls the XIP bus, and an instruction fetch or
//! data read from flash on *either* core during the operation is a fault.
//! Core 0 runs the storage engine; for the danger window core 1 must sit in
//! a RAM-resident spin loop and core 0's own interrupt handlers (which
//! execute from flash) must be masked.
//!
//! The guard acquires both on `lock` and releases both on drop, so every
//! exit path restores normal execution.

use cortex_m::register::primask;
use embassy_rp::multicore;

use palimpsest_hal::gate::{FlashGate, GateError};

/// Flash-safe gate for the dual-core RP2040
///
/// `pause_core1` is a no-op while core 1 has not been launched, so the gate
/// is safe to use from early boot onward.
#[derive(Debug, Default)]
pub struct CoreGate {
    _private: (),
}

impl CoreGate {
    pub const fn new() -> Self {
        Self { _private: () }
    }
}

/// Held for the duration of one program/erase operation
pub struct ParkGuard {
    reenable_irq: bool,
}

impl Drop for ParkGuard {
    fn drop(&mut self) {
        multicore::resume_core1();
        if self.reenable_irq {
            // Only re-enable what lock() disabled
            unsafe { cortex_m::interrupt::enable() };
        }
    }
}

impl FlashGate for CoreGate {
    type Guard<'a>
        = ParkGuard
    where
        Self: 'a;

    fn lock(&mut self, _timeout_ms: u32) -> Result<ParkGuard, GateError> {
        let reenable_irq = primask::read().is_active();
        cortex_m::interrupt::disable();
        // Blocks until core 1 acknowledges from its RAM spin loop; bounded
        // by core 1's interrupt latency rather than the caller's timeout
        multicore::pause_core1();
        Ok(ParkGuard { reenable_irq })
    }
}

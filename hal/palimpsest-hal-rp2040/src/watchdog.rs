//! RP2040 hardware watchdog wrapper
//!
//! The peripheral reloads its countdown on every feed. Extending past the
//! configured period re-arms the counter with the longer value for the one
//! slow operation; the next `keep_alive` re-arms at the base period again.

use embassy_rp::watchdog::Watchdog as RpWatchdog;
use embassy_time::Duration;

use palimpsest_hal::watchdog::Watchdog;

/// Hardware watchdog with deadline extension
pub struct HardwareWatchdog {
    inner: RpWatchdog,
    base_period_ms: u32,
}

impl HardwareWatchdog {
    /// Wrap an already-started watchdog; `base_period_ms` is its configured
    /// feed period
    pub fn new(inner: RpWatchdog, base_period_ms: u32) -> Self {
        Self {
            inner,
            base_period_ms,
        }
    }
}

impl Watchdog for HardwareWatchdog {
    fn extend(&mut self, ms: u32) {
        if ms > self.base_period_ms {
            self.inner.start(Duration::from_millis(ms as u64));
        } else {
            self.inner.feed();
        }
    }

    fn keep_alive(&mut self) {
        // Re-arms at the base period, undoing any prior extension
        self.inner.start(Duration::from_millis(self.base_period_ms as u64));
    }
}

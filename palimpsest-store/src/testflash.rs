//! In-memory NOR flash double for host tests
//!
//! Enforces the physics the engine depends on: programming ANDs bits (a
//! 1 -> 0 device cannot set bits back), erase works on whole sectors, and
//! every erase is recorded so tests can assert what was *not* erased.

use palimpsest_hal::flash::{FlashError, FlashMedium, SECTOR_SIZE};
use palimpsest_hal::gate::NullGate;
use palimpsest_hal::watchdog::NullWatchdog;

use crate::store::Store;

pub(crate) const TEST_CAPACITY: usize = 256 * 1024;
pub(crate) const TEST_DIR_BYTES: u32 = 4096;

pub(crate) struct RamFlash {
    /// Raw cells; tests poke this directly to simulate corruption
    pub mem: Vec<u8>,
    /// Every erase as `(offset, len)`, in order
    pub erases: Vec<(u32, u32)>,
    /// Fail the Nth mutating operation from now (0 = next), then recover
    pub fail_after: Option<u32>,
}

impl RamFlash {
    /// Factory-fresh part: everything erased
    pub fn new(capacity: usize) -> Self {
        Self {
            mem: vec![0xFF; capacity],
            erases: Vec::new(),
            fail_after: None,
        }
    }

    /// A part holding stale garbage, as after reuse or partial programming
    pub fn new_dirty(capacity: usize) -> Self {
        let mut flash = Self::new(capacity);
        for (i, byte) in flash.mem.iter_mut().enumerate() {
            *byte = (i as u8).wrapping_mul(31) ^ 0x5A;
        }
        flash
    }

    fn take_failure(&mut self) -> bool {
        match self.fail_after.as_mut() {
            Some(0) => {
                self.fail_after = None;
                true
            }
            Some(n) => {
                *n -= 1;
                false
            }
            None => false,
        }
    }
}

impl FlashMedium for RamFlash {
    fn mapped(&self) -> &[u8] {
        &self.mem
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError> {
        let start = offset as usize;
        if start + data.len() > self.mem.len() {
            return Err(FlashError::OutOfBounds);
        }
        if self.take_failure() {
            return Err(FlashError::Timeout);
        }
        for (cell, &byte) in self.mem[start..start + data.len()].iter_mut().zip(data) {
            *cell &= byte; // NOR programming can only clear bits
        }
        Ok(())
    }

    fn erase(&mut self, offset: u32, len: u32) -> Result<(), FlashError> {
        if offset as usize % SECTOR_SIZE != 0 || len as usize % SECTOR_SIZE != 0 || len == 0 {
            return Err(FlashError::Unaligned);
        }
        let start = offset as usize;
        if start + len as usize > self.mem.len() {
            return Err(FlashError::OutOfBounds);
        }
        if self.take_failure() {
            return Err(FlashError::Timeout);
        }
        self.mem[start..start + len as usize].fill(0xFF);
        self.erases.push((offset, len));
        Ok(())
    }
}

pub(crate) type TestStore = Store<RamFlash, NullGate, NullWatchdog>;

/// Fresh formatted store over factory-fresh flash
pub(crate) fn formatted_store() -> TestStore {
    let mut store = Store::new(
        RamFlash::new(TEST_CAPACITY),
        NullGate,
        NullWatchdog,
        0,
    );
    store.format(TEST_DIR_BYTES).unwrap();
    store
}

/// Rebuild a store over flash carried across a simulated power cycle
pub(crate) fn remounted(flash: RamFlash) -> TestStore {
    let mut store = Store::new(flash, NullGate, NullWatchdog, 0);
    store.mount(TEST_DIR_BYTES).unwrap();
    store
}

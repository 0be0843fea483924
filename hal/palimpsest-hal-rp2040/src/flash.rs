//! Onboard QSPI flash through the XIP window
//!
//! Reads are plain memory accesses into the XIP mapping; program and erase
//! go through the embassy-rp blocking flash driver (ROM routines). Both
//! mutations require the other core to be parked flash-safe first - the
//! engine holds a [`crate::gate::CoreGate`] guard around every call, per
//! the `FlashMedium` contract.

use embassy_rp::flash::{Blocking, Flash, ERASE_SIZE};
use embassy_rp::peripherals::FLASH;
use embassy_rp::Peri;

use palimpsest_hal::flash::{FlashError, FlashMedium, SECTOR_SIZE};

/// Total flash fitted on the board (W25Q16, 2 MiB)
pub const FLASH_SIZE: usize = 2 * 1024 * 1024;

/// Base address of the XIP flash mapping
pub const XIP_BASE: usize = 0x1000_0000;

// The engine's sector geometry must match the part's erase unit
const _: () = assert!(SECTOR_SIZE == ERASE_SIZE);

/// RP2040 flash medium
pub struct XipFlash<'d> {
    flash: Flash<'d, FLASH, Blocking, FLASH_SIZE>,
}

impl<'d> XipFlash<'d> {
    pub fn new(flash: Peri<'d, FLASH>) -> Self {
        Self {
            flash: Flash::new_blocking(flash),
        }
    }
}

impl FlashMedium for XipFlash<'_> {
    fn mapped(&self) -> &[u8] {
        // The XIP window aliases the whole part; plain reads need no
        // transaction
        unsafe { core::slice::from_raw_parts(XIP_BASE as *const u8, FLASH_SIZE) }
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError> {
        if offset as usize + data.len() > FLASH_SIZE {
            return Err(FlashError::OutOfBounds);
        }
        self.flash
            .blocking_write(offset, data)
            .map_err(|_| FlashError::Io)
    }

    fn erase(&mut self, offset: u32, len: u32) -> Result<(), FlashError> {
        if offset as usize % SECTOR_SIZE != 0 || len as usize % SECTOR_SIZE != 0 {
            return Err(FlashError::Unaligned);
        }
        if offset as usize + len as usize > FLASH_SIZE {
            return Err(FlashError::OutOfBounds);
        }
        self.flash
            .blocking_erase(offset, offset + len)
            .map_err(|_| FlashError::Io)
    }
}

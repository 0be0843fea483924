//! Storage engine error taxonomy

use palimpsest_hal::{FlashError, GateError};

/// Errors surfaced by the storage engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    /// Engine is not mounted
    NotMounted,
    /// No such file, or the file was logically deleted
    NotFound,
    /// Directory entry resolves to a stream that does not fit its allocation
    BadDirEntry,
    /// Stream payload CRC mismatch
    BadChecksum,
    /// Write-handle pool exhausted
    NoHandle,
    /// Handle is stale: never opened, already closed, or abandoned on error
    BadHandle,
    /// No contiguous free space for the requested allocation, or a write
    /// ran past the end of its open allocation
    NoSpace,
    /// No free directory slot, even after a rebuild
    DirectoryFull,
    /// Filename is empty, too long, reserved, or contains NUL bytes
    InvalidName,
    /// Flash program/erase failure
    Flash(FlashError),
    /// Could not acquire flash-safe execution
    Gate(GateError),
}

impl From<FlashError> for StoreError {
    fn from(e: FlashError) -> Self {
        StoreError::Flash(e)
    }
}

impl From<GateError> for StoreError {
    fn from(e: GateError) -> Self {
        StoreError::Gate(e)
    }
}

//! RAM-staged file assembly
//!
//! Callers that build a file's bytes incrementally (a configuration
//! collected over several steps, a calibration result) stage them here and
//! commit once. The flash-resident file only ever changes atomically at
//! [`StagedFile::commit`], which also hands the engine the full size up
//! front so the write can qualify for append mode.

use palimpsest_hal::flash::FlashMedium;
use palimpsest_hal::gate::FlashGate;
use palimpsest_hal::watchdog::Watchdog;

use crate::error::StoreError;
use crate::store::Store;

/// RAM staging page size
pub const STAGE_PAGE_SIZE: usize = 256;

const ZERO_PAGE: [u8; STAGE_PAGE_SIZE] = [0; STAGE_PAGE_SIZE];

/// An in-memory paged buffer with lazily allocated pages
///
/// Unwritten regions read back as zero. `PAGES` bounds the staged size at
/// `PAGES * STAGE_PAGE_SIZE` bytes.
#[derive(Debug)]
pub struct StagedFile<const PAGES: usize> {
    pages: [Option<[u8; STAGE_PAGE_SIZE]>; PAGES],
    size: u32,
}

impl<const PAGES: usize> Default for StagedFile<PAGES> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const PAGES: usize> StagedFile<PAGES> {
    /// Empty staged file; no pages allocated yet
    pub const fn new() -> Self {
        Self {
            pages: [None; PAGES],
            size: 0,
        }
    }

    /// Maximum stageable size in bytes
    pub const fn capacity() -> usize {
        PAGES * STAGE_PAGE_SIZE
    }

    /// Current staged size: one past the highest offset written
    pub fn len(&self) -> u32 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Drop all staged content
    pub fn clear(&mut self) {
        self.pages = [None; PAGES];
        self.size = 0;
    }

    /// Write `data` at a byte offset, growing the staged size as needed
    pub fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), StoreError> {
        let end = offset as usize + data.len();
        if end > Self::capacity() {
            return Err(StoreError::NoSpace);
        }
        let mut pos = offset as usize;
        let mut copied = 0;
        while copied < data.len() {
            let in_page = pos % STAGE_PAGE_SIZE;
            let n = (STAGE_PAGE_SIZE - in_page).min(data.len() - copied);
            let page = self.pages[pos / STAGE_PAGE_SIZE].get_or_insert(ZERO_PAGE);
            page[in_page..in_page + n].copy_from_slice(&data[copied..copied + n]);
            pos += n;
            copied += n;
        }
        self.size = self.size.max(end as u32);
        Ok(())
    }

    /// Read from a byte offset; returns the bytes copied, clamped to the
    /// staged size
    pub fn read(&self, offset: u32, out: &mut [u8]) -> usize {
        if offset >= self.size {
            return 0;
        }
        let n = out.len().min((self.size - offset) as usize);
        let mut copied = 0;
        while copied < n {
            let pos = offset as usize + copied;
            let in_page = pos % STAGE_PAGE_SIZE;
            let chunk = (STAGE_PAGE_SIZE - in_page).min(n - copied);
            match &self.pages[pos / STAGE_PAGE_SIZE] {
                Some(page) => {
                    out[copied..copied + chunk].copy_from_slice(&page[in_page..in_page + chunk])
                }
                None => out[copied..copied + chunk].fill(0),
            }
            copied += chunk;
        }
        n
    }

    /// Stream the staged bytes into the store as one atomic file update
    ///
    /// Opens with the full known size so an existing allocation with enough
    /// trailing space is appended to rather than erased.
    pub fn commit<F, G, W>(
        &self,
        store: &mut Store<F, G, W>,
        name: &str,
        max_size: u32,
    ) -> Result<(), StoreError>
    where
        F: FlashMedium,
        G: FlashGate,
        W: Watchdog,
    {
        let handle = store.open_write(name, self.size, max_size)?;
        let mut remaining = self.size as usize;
        let mut index = 0;
        while remaining > 0 {
            let n = remaining.min(STAGE_PAGE_SIZE);
            let chunk = match &self.pages[index] {
                Some(page) => &page[..n],
                None => &ZERO_PAGE[..n],
            };
            store.write(&handle, chunk)?;
            remaining -= n;
            index += 1;
        }
        store.close_write(handle)
    }
}

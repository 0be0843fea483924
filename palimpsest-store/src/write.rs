//! Write path: open, append-in-place, buffered write, close with header patch
//!
//! A write session buffers one flash page and flushes as it fills, erasing
//! each sector lazily on first entry. The session starts by reserving an
//! erased placeholder header; `close_write` patches the real size and CRC
//! into those bytes last, after the payload is fully on the medium. Until
//! that patch lands, a scan still resolves the previous version, which is
//! the engine's whole atomicity story.

use palimpsest_hal::flash::{FlashError, FlashMedium, PAGE_SIZE};
use palimpsest_hal::gate::FlashGate;
use palimpsest_hal::watchdog::Watchdog;

use crate::error::StoreError;
use crate::layout::{
    align4, crc32, encode_name, record_is_blank, DirectoryEntry, FileHeader, HEADER_SIZE,
    MARKER_NAME, NAME_LEN,
};
use crate::store::{
    flash_erase, flash_program, round_up_sector, sector_of, Store, PAGE, SECTOR,
};

/// An open write session
///
/// Returned by [`Store::open_write`] and consumed by
/// [`Store::close_write`]. A handle whose session was abandoned on a write
/// error is stale; further use reports [`StoreError::BadHandle`].
#[derive(Debug)]
pub struct WriteHandle {
    index: u8,
}

/// Per-handle session state: one page of pending output plus the
/// bookkeeping for the close-time header patch
#[derive(Debug, Clone)]
pub(crate) struct WriteState {
    /// Start of the open allocation; identifies the entry to the rebuild
    pub alloc_start: u32,
    /// End of the open allocation (exclusive)
    pub alloc_end: u32,
    /// Where the placeholder header sits; patched at close
    pub header_offset: u32,
    /// Flash offset the page buffer will flush to (page-aligned)
    pub flush_at: u32,
    /// First offset whose sector must still be erased before programming
    pub erase_from: u32,
    pub buf: [u8; PAGE_SIZE],
    pub buf_len: usize,
}

impl<F, G, W> Store<F, G, W>
where
    F: FlashMedium,
    G: FlashGate,
    W: Watchdog,
{
    /// Open a file for writing
    ///
    /// `max_size` (rounded up to whole sectors) is the allocation to
    /// find or create; an existing entry with a smaller allocation is
    /// superseded in place and re-created at the new size. `cur_size` is the
    /// caller's known size of the version about to be written: when it fits
    /// the space remaining after the current stream, the session appends
    /// instead of erasing and rewriting the allocation.
    pub fn open_write(
        &mut self,
        name: &str,
        cur_size: u32,
        max_size: u32,
    ) -> Result<WriteHandle, StoreError> {
        self.ensure_mounted()?;
        if name == MARKER_NAME {
            return Err(StoreError::InvalidName);
        }
        let name_buf = encode_name(name)?;
        let wanted = round_up_sector(max_size.max(1));

        let slot = self.free_handle_slot().ok_or_else(|| {
            warn!("open '{=str}': write-handle pool exhausted", name);
            StoreError::NoHandle
        })?;

        let existing = self.lookup(&name_buf);
        let entry = match existing {
            Some((_, entry)) if entry.max_size >= wanted => entry,
            Some((index, _)) => {
                // Allocation too small for the new size: supersede the
                // entry in place, then allocate fresh
                self.replace_entry(index)?;
                self.create_entry(&name_buf, wanted)?
            }
            None => self.create_entry(&name_buf, wanted)?,
        };
        let kept = matches!(existing, Some((_, e)) if e.max_size >= wanted);

        let alloc_end = entry.flash_offset + entry.max_size;
        let mut start = entry.flash_offset;
        let mut append = false;
        if kept {
            if let Ok(stream) = self.resolve_stream(&entry) {
                let next = align4(stream.end());
                let free = alloc_end.saturating_sub(next);
                if cur_size.saturating_add(HEADER_SIZE as u32) <= free {
                    start = next;
                    append = true;
                }
            }
        }

        if append && !self.tail_erased(start) {
            // A dirty tail where the next block should go is evidence of a
            // prior interrupted append. Best-effort: preserve the sector's
            // untouched prefix through a copy-erase-restore, else degrade
            // to a rewrite from the start of the allocation.
            if let Err(e) = self.recover_append_sector(start) {
                warn!(
                    "open '{=str}': append recovery failed, rewriting from start",
                    name
                );
                let _ = e;
                append = false;
                start = entry.flash_offset;
            }
        }

        let mut state = if append {
            let page_start = start & !(PAGE - 1);
            let keep = (start - page_start) as usize;
            let mut buf = [0xFF; PAGE_SIZE];
            buf[..keep]
                .copy_from_slice(&self.flash.mapped()[page_start as usize..start as usize]);
            WriteState {
                alloc_start: entry.flash_offset,
                alloc_end,
                header_offset: start,
                flush_at: page_start,
                // The sector holding `start` is verified erased past the
                // write position; erasure starts at the next boundary
                erase_from: (start & !(SECTOR - 1)) + SECTOR,
                buf,
                buf_len: keep,
            }
        } else {
            WriteState {
                alloc_start: entry.flash_offset,
                alloc_end,
                header_offset: start,
                flush_at: start,
                erase_from: start,
                buf: [0xFF; PAGE_SIZE],
                buf_len: 0,
            }
        };

        // Placeholder header: stays all-ones until close patches it, which
        // is what lets the patch clear bits in place without an erase
        self.push_raw(&mut state, &[0xFF; HEADER_SIZE])?;

        let mode = if append { "append" } else { "rewrite" };
        debug!("open '{=str}': {=str} at {=u32:#x}", name, mode, start);
        self.handles[slot] = Some(state);
        Ok(WriteHandle { index: slot as u8 })
    }

    /// Buffer payload bytes, flushing whole pages as they fill
    ///
    /// A flash failure abandons the session: the handle becomes stale and
    /// the file keeps its previous version.
    pub fn write(&mut self, handle: &WriteHandle, data: &[u8]) -> Result<(), StoreError> {
        self.ensure_mounted()?;
        let index = handle.index as usize;
        let mut state = self
            .handles
            .get_mut(index)
            .and_then(Option::take)
            .ok_or(StoreError::BadHandle)?;

        let position = state.flush_at + state.buf_len as u32;
        if data.len() as u32 > state.alloc_end.saturating_sub(position) {
            warn!("write overruns allocation, handle abandoned");
            return Err(StoreError::NoSpace);
        }
        match self.push_raw(&mut state, data) {
            Ok(()) => {
                self.handles[index] = Some(state);
                Ok(())
            }
            Err(e) => {
                warn!("write failed, handle abandoned");
                Err(e)
            }
        }
    }

    /// Commit the session: flush the tail, checksum the payload, and patch
    /// the header in place
    pub fn close_write(&mut self, handle: WriteHandle) -> Result<(), StoreError> {
        self.ensure_mounted()?;
        let index = handle.index as usize;
        let mut state = self
            .handles
            .get_mut(index)
            .and_then(Option::take)
            .ok_or(StoreError::BadHandle)?;
        match self.close_inner(&mut state) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("close failed, new version not committed");
                Err(e)
            }
        }
    }

    fn close_inner(&mut self, state: &mut WriteState) -> Result<(), StoreError> {
        let end = state.flush_at + state.buf_len as u32;
        let size = end - state.header_offset - HEADER_SIZE as u32;

        // Tail flush: the unused page remainder is already 0xFF in the
        // buffer, so it stays programmable for a later append
        if state.buf_len > 0 {
            self.flush_page(state)?;
        }

        // When the stream runs against a sector boundary, the next header
        // position lands in a sector this session never cleaned. Erase it
        // so a future scan sees an erased terminator.
        let next_header = align4(end);
        if next_header % SECTOR == 0 && next_header < state.alloc_end {
            flash_erase(
                &mut self.flash,
                &mut self.gate,
                &mut self.watchdog,
                next_header,
                SECTOR,
            )?;
        }

        // Checksum what actually reached the medium
        self.watchdog.extend(5 + size / 1024);
        let payload_start = (state.header_offset + HEADER_SIZE as u32) as usize;
        let crc = crc32(&self.flash.mapped()[payload_start..payload_start + size as usize]);

        // Header patch, the commit point: rewrite only the page(s) holding
        // the header, substituting the real size and CRC for the erased
        // placeholder. Every other byte rewrites its current value.
        let header = FileHeader { size, crc }.encode();
        let first_page = state.header_offset & !(PAGE - 1);
        let last_page = (state.header_offset + HEADER_SIZE as u32 - 1) & !(PAGE - 1);
        let mut page = first_page;
        while page <= last_page {
            let mut patch = [0u8; PAGE_SIZE];
            patch.copy_from_slice(&self.flash.mapped()[page as usize..(page + PAGE) as usize]);
            for (k, &byte) in header.iter().enumerate() {
                let off = state.header_offset + k as u32;
                if off >= page && off < page + PAGE {
                    patch[(off - page) as usize] = byte;
                }
            }
            flash_program(&mut self.flash, &mut self.gate, page, &patch)?;
            page += PAGE;
        }

        debug!(
            "committed {} bytes at {=u32:#x}, crc {=u32:#x}",
            size, state.header_offset, crc
        );
        Ok(())
    }

    fn flush_page(&mut self, state: &mut WriteState) -> Result<(), StoreError> {
        let target = state.flush_at;
        if target % SECTOR == 0 && target >= state.erase_from {
            flash_erase(
                &mut self.flash,
                &mut self.gate,
                &mut self.watchdog,
                target,
                SECTOR,
            )?;
        }
        flash_program(&mut self.flash, &mut self.gate, target, &state.buf)?;
        state.flush_at = target + PAGE;
        state.buf = [0xFF; PAGE_SIZE];
        state.buf_len = 0;
        Ok(())
    }

    fn push_raw(&mut self, state: &mut WriteState, mut data: &[u8]) -> Result<(), StoreError> {
        while !data.is_empty() {
            let room = PAGE_SIZE - state.buf_len;
            let n = room.min(data.len());
            state.buf[state.buf_len..state.buf_len + n].copy_from_slice(&data[..n]);
            state.buf_len += n;
            data = &data[n..];
            if state.buf_len == PAGE_SIZE {
                self.flush_page(state)?;
            }
        }
        Ok(())
    }

    fn free_handle_slot(&self) -> Option<usize> {
        self.handles.iter().position(Option::is_none)
    }

    /// Mark a directory slot replaced by zeroing its filename in place
    ///
    /// A pure 1->0 write; the now-stale entry CRC is exactly what flags the
    /// slot as replaced to the next integrity scan.
    fn replace_entry(&mut self, index: usize) -> Result<(), StoreError> {
        let offset = self.entry_offset(index) + 4;
        flash_program(&mut self.flash, &mut self.gate, offset, &[0u8; NAME_LEN])?;
        debug!("replaced directory slot {}", index);
        Ok(())
    }

    /// Create a directory entry in the first free slot, allocating content
    /// sectors for it
    fn create_entry(
        &mut self,
        name: &[u8; NAME_LEN],
        max_size: u32,
    ) -> Result<DirectoryEntry, StoreError> {
        let mut slot = self.free_dir_slot();
        if slot.is_none() && self.rebuild_directory()? {
            // Only worth a second scan if the rebuild freed something
            slot = self.free_dir_slot();
        }
        let Some(slot) = slot else {
            warn!("central directory full");
            return Err(StoreError::DirectoryFull);
        };

        let flash_offset = self.allocate_run(max_size)?;
        let entry = DirectoryEntry::new(slot as u32, *name, max_size, flash_offset);
        let entry_off = self.entry_offset(slot);
        flash_program(&mut self.flash, &mut self.gate, entry_off, &entry.encode())?;

        self.bitmap
            .mark_used(sector_of(flash_offset), (max_size / SECTOR) as usize);
        self.low_water = self.low_water.min(flash_offset);
        Ok(entry)
    }

    /// First directory slot that is blank tail or a reclaimed entry
    fn free_dir_slot(&self) -> Option<usize> {
        for index in 0..self.entry_capacity() {
            let rec = self.record(index);
            if record_is_blank(&rec) || DirectoryEntry::decode(&rec).is_free() {
                return Some(index);
            }
        }
        None
    }

    /// Pick a contiguous free sector run for a new allocation
    ///
    /// Prefers a reclaimed hole between the low-water mark and the
    /// directory; otherwise extends the content area downward, failing only
    /// against the program image.
    fn allocate_run(&mut self, max_size: u32) -> Result<u32, StoreError> {
        let count = (max_size / SECTOR) as usize;
        let from = sector_of(self.low_water);
        let to = sector_of(self.dir_offset);
        if let Some(first) = self.bitmap.find_free_run(from, to, count) {
            return Ok(first as u32 * SECTOR);
        }

        let Some(offset) = self.low_water.checked_sub(max_size) else {
            return Err(StoreError::NoSpace);
        };
        if offset < self.reserved_base {
            warn!("allocating {} bytes would collide with the program image", max_size);
            return Err(StoreError::NoSpace);
        }
        Ok(offset)
    }

    /// Whether the sector segment from `from` to its sector boundary is
    /// fully erased
    fn tail_erased(&self, from: u32) -> bool {
        let sector_end = (from & !(SECTOR - 1)) + SECTOR;
        self.flash.mapped()[from as usize..sector_end as usize]
            .iter()
            .all(|&b| b == 0xFF)
    }

    /// Copy-erase-restore the untouched prefix of a dirty append sector
    fn recover_append_sector(&mut self, pos: u32) -> Result<(), StoreError> {
        let sector_start = pos & !(SECTOR - 1);
        let keep = (pos - sector_start) as usize;
        warn!(
            "dirty sector {=u32:#x} after interrupted append, preserving {} bytes",
            sector_start, keep
        );
        self.scratch[..keep]
            .copy_from_slice(&self.flash.mapped()[sector_start as usize..pos as usize]);
        flash_erase(
            &mut self.flash,
            &mut self.gate,
            &mut self.watchdog,
            sector_start,
            SECTOR,
        )?;
        if keep > 0 {
            flash_program(&mut self.flash, &mut self.gate, sector_start, &self.scratch[..keep])?;
        }
        if !self.tail_erased(pos) {
            return Err(StoreError::Flash(FlashError::Io));
        }
        Ok(())
    }
}

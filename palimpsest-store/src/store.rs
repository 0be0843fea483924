//! Storage engine core
//!
//! Owns the flash medium and the collaborator handles, the mount state
//! (directory geometry, sector bitmap, low-water mark), and the write-handle
//! pool. This module implements mount/format with the integrity scan, the
//! read path, and removal; the write path lives in [`crate::write`] and
//! directory reclamation in [`crate::gc`].

use palimpsest_hal::flash::{FlashMedium, PAGE_SIZE, SECTOR_SIZE};
use palimpsest_hal::gate::FlashGate;
use palimpsest_hal::watchdog::Watchdog;

use crate::bitmap::{SectorBitmap, MAX_SECTORS};
use crate::error::StoreError;
use crate::layout::{
    align4, crc32, encode_name, marker_name, record_is_blank, DirectoryEntry, FileHeader,
    ENTRY_SIZE, HEADER_SIZE, MARKER_NAME, NAME_LEN,
};
use crate::write::WriteState;

/// Concurrent in-flight write sessions
pub const MAX_WRITE_HANDLES: usize = 4;

pub(crate) const SECTOR: u32 = SECTOR_SIZE as u32;
pub(crate) const PAGE: u32 = PAGE_SIZE as u32;

/// How long to wait for the other core to park before failing an operation
pub(crate) const GATE_TIMEOUT_MS: u32 = 100;

/// Watchdog budget per erased sector (datasheet worst case with margin)
const ERASE_MS_PER_SECTOR: u32 = 60;

/// A successfully resolved read: payload mapped straight out of flash
#[derive(Debug)]
pub struct ReadFile<'a> {
    /// Current version's payload bytes
    pub data: &'a [u8],
    /// CRC-32 of the payload, verified against the stored header
    pub crc: u32,
}

impl ReadFile<'_> {
    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// The flash storage engine
///
/// Generic over the flash medium, the flash-safe execution gate, and the
/// watchdog so the same engine runs against the RP2040 XIP flash and a RAM
/// double in host tests. All entry points are synchronous; callers serialize
/// access per filename (§ handle pool aside, there is no internal locking).
pub struct Store<F, G, W> {
    pub(crate) flash: F,
    pub(crate) gate: G,
    pub(crate) watchdog: W,
    /// Lowest offset file allocations may occupy (top of the program image)
    pub(crate) reserved_base: u32,
    pub(crate) mounted: bool,
    pub(crate) dir_offset: u32,
    pub(crate) dir_size: u32,
    /// Lowest allocated content offset seen; new space extends downward
    pub(crate) low_water: u32,
    pub(crate) bitmap: SectorBitmap,
    pub(crate) handles: [Option<WriteState>; MAX_WRITE_HANDLES],
    /// Sector-sized scratch shared by the directory rebuild and the
    /// append-recovery path
    pub(crate) scratch: [u8; SECTOR_SIZE],
}

/// What the mount-time integrity scan derives from a valid directory
struct ScanState {
    bitmap: SectorBitmap,
    low_water: u32,
}

/// Why the integrity scan rejected the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanFault {
    /// Entry 0 does not carry the `"/"` format marker
    NoMarker,
    /// Stored sequence number does not match the scan position
    Sequence,
    /// Entry CRC does not match its contents
    Crc,
    /// Entry claims an unaligned or out-of-range allocation
    Bounds,
}

impl ScanFault {
    fn describe(self) -> &'static str {
        match self {
            ScanFault::NoMarker => "no format marker",
            ScanFault::Sequence => "sequence mismatch",
            ScanFault::Crc => "entry crc mismatch",
            ScanFault::Bounds => "entry out of bounds",
        }
    }
}

/// Location of a file's current content block
#[derive(Debug, Clone, Copy)]
pub(crate) struct Stream {
    /// Absolute offset of the block header
    pub header: u32,
    /// Payload length
    pub size: u32,
}

impl Stream {
    pub fn payload(&self) -> u32 {
        self.header + HEADER_SIZE as u32
    }

    pub fn end(&self) -> u32 {
        self.payload() + self.size
    }
}

/// Why a content stream did not resolve to a current version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamIssue {
    /// First block erased: entry exists but the file was deleted
    Deleted,
    /// First block claims more bytes than the allocation holds
    BadEntry,
}

impl<F, G, W> Store<F, G, W>
where
    F: FlashMedium,
    G: FlashGate,
    W: Watchdog,
{
    /// Create an unmounted engine
    ///
    /// `reserved_base` is the lowest flash offset the content area may
    /// reach; everything below it belongs to the program image.
    pub fn new(flash: F, gate: G, watchdog: W, reserved_base: u32) -> Self {
        Self {
            flash,
            gate,
            watchdog,
            reserved_base,
            mounted: false,
            dir_offset: 0,
            dir_size: 0,
            low_water: 0,
            bitmap: SectorBitmap::new(),
            handles: [const { None }; MAX_WRITE_HANDLES],
            scratch: [0xFF; SECTOR_SIZE],
        }
    }

    /// Consume the engine and return the collaborators
    pub fn into_parts(self) -> (F, G, W) {
        (self.flash, self.gate, self.watchdog)
    }

    /// Access the watchdog collaborator, e.g. for the firmware's idle feed
    pub fn watchdog_mut(&mut self) -> &mut W {
        &mut self.watchdog
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Mount the store, validating the central directory
    ///
    /// `dir_bytes` is rounded up to a whole sector multiple; the directory
    /// occupies that much space at the top of the flash range. Any
    /// integrity-scan failure reformats the directory in place: there is no
    /// redundant copy to repair from, so a partial fix cannot be proven safe.
    pub fn mount(&mut self, dir_bytes: u32) -> Result<(), StoreError> {
        let capacity = self.capacity();
        if (capacity / SECTOR) as usize > MAX_SECTORS {
            error!("flash capacity exceeds bitmap limit");
            return Err(StoreError::NoSpace);
        }
        let dir_size = round_up_sector(dir_bytes.max(1));
        if dir_size > capacity.saturating_sub(self.reserved_base) {
            return Err(StoreError::NoSpace);
        }
        let dir_offset = capacity - dir_size;

        self.mounted = false;
        self.drop_handles();
        self.watchdog.extend(10 + dir_size / 1024);

        match self.scan_directory(dir_offset, dir_size) {
            Ok(scan) => {
                self.dir_offset = dir_offset;
                self.dir_size = dir_size;
                self.bitmap = scan.bitmap;
                self.low_water = scan.low_water;
                self.mounted = true;
                debug!("mounted, low-water {=u32:#x}", self.low_water);
                Ok(())
            }
            Err(fault) => {
                info!("directory invalid ({=str}), reformatting", fault.describe());
                self.format_at(dir_offset, dir_size)
            }
        }
    }

    /// Erase the directory range and write a fresh format marker
    pub fn format(&mut self, dir_bytes: u32) -> Result<(), StoreError> {
        let capacity = self.capacity();
        if (capacity / SECTOR) as usize > MAX_SECTORS {
            error!("flash capacity exceeds bitmap limit");
            return Err(StoreError::NoSpace);
        }
        let dir_size = round_up_sector(dir_bytes.max(1));
        if dir_size > capacity.saturating_sub(self.reserved_base) {
            return Err(StoreError::NoSpace);
        }
        self.format_at(capacity - dir_size, dir_size)
    }

    /// Whether a directory entry with this exact name exists
    ///
    /// True for the `"/"` marker after a format; the marker is not openable
    /// as user data.
    pub fn file_exists(&self, name: &str) -> bool {
        if !self.mounted {
            return false;
        }
        match encode_name(name) {
            Ok(buf) => self.lookup(&buf).is_some(),
            Err(_) => false,
        }
    }

    /// Resolve a file's current version and verify its payload checksum
    ///
    /// Only `Ok` guarantees the returned slice is trustworthy. Corruption
    /// is surfaced without mutating storage; the caller decides whether to
    /// fall back to defaults.
    pub fn open_read(&mut self, name: &str) -> Result<ReadFile<'_>, StoreError> {
        self.ensure_mounted()?;
        if name == MARKER_NAME {
            return Err(StoreError::NotFound);
        }
        let name_buf = encode_name(name)?;
        let (_, entry) = self.lookup(&name_buf).ok_or(StoreError::NotFound)?;
        let stream = self.resolve_stream(&entry).map_err(|issue| match issue {
            StreamIssue::Deleted => StoreError::NotFound,
            StreamIssue::BadEntry => StoreError::BadDirEntry,
        })?;

        self.watchdog.extend(5 + stream.size / 1024);
        let expected = self.read_header(stream.header).crc;
        let data = &self.flash.mapped()[stream.payload() as usize..stream.end() as usize];
        let crc = crc32(data);
        if crc != expected {
            warn!("read '{=str}': payload crc mismatch", name);
            return Err(StoreError::BadChecksum);
        }
        Ok(ReadFile { data, crc })
    }

    /// Logically delete a file
    ///
    /// Erases the first sector of the allocation so the stream's first
    /// header reads as the erased sentinel. The directory entry and its
    /// sector claim persist until the next directory rebuild. `silent`
    /// suppresses the not-found warning.
    pub fn remove(&mut self, name: &str, silent: bool) -> Result<(), StoreError> {
        self.ensure_mounted()?;
        if name == MARKER_NAME {
            return Err(StoreError::NotFound);
        }
        let name_buf = encode_name(name)?;
        let Some((_, entry)) = self.lookup(&name_buf) else {
            if !silent {
                warn!("remove: no such file '{=str}'", name);
            }
            return Err(StoreError::NotFound);
        };
        if self.read_header(entry.flash_offset).is_erased() {
            debug!("remove: '{=str}' already deleted", name);
            return Ok(());
        }
        flash_erase(
            &mut self.flash,
            &mut self.gate,
            &mut self.watchdog,
            entry.flash_offset,
            SECTOR,
        )?;
        info!("removed '{=str}'", name);
        Ok(())
    }

    // ---- internals shared with the write path and the rebuild ----

    pub(crate) fn ensure_mounted(&self) -> Result<(), StoreError> {
        if self.mounted {
            Ok(())
        } else {
            Err(StoreError::NotMounted)
        }
    }

    pub(crate) fn capacity(&self) -> u32 {
        self.flash.mapped().len() as u32
    }

    pub(crate) fn entry_capacity(&self) -> usize {
        self.dir_size as usize / ENTRY_SIZE
    }

    pub(crate) fn drop_handles(&mut self) {
        self.handles = [const { None }; MAX_WRITE_HANDLES];
    }

    /// Copy one raw directory record out of the mapped view
    fn record_at(&self, dir_offset: u32, index: usize) -> [u8; ENTRY_SIZE] {
        let off = dir_offset as usize + index * ENTRY_SIZE;
        let mut rec = [0u8; ENTRY_SIZE];
        rec.copy_from_slice(&self.flash.mapped()[off..off + ENTRY_SIZE]);
        rec
    }

    pub(crate) fn record(&self, index: usize) -> [u8; ENTRY_SIZE] {
        self.record_at(self.dir_offset, index)
    }

    pub(crate) fn entry_offset(&self, index: usize) -> u32 {
        self.dir_offset + (index * ENTRY_SIZE) as u32
    }

    pub(crate) fn read_header(&self, offset: u32) -> FileHeader {
        let off = offset as usize;
        let mut buf = [0u8; HEADER_SIZE];
        buf.copy_from_slice(&self.flash.mapped()[off..off + HEADER_SIZE]);
        FileHeader::decode(&buf)
    }

    /// Find a directory entry by exact (zero-padded) filename
    pub(crate) fn lookup(&self, name: &[u8; NAME_LEN]) -> Option<(usize, DirectoryEntry)> {
        for index in 0..self.entry_capacity() {
            let rec = self.record(index);
            if record_is_blank(&rec) {
                return None; // unused tail, nothing beyond
            }
            let entry = DirectoryEntry::decode(&rec);
            if entry.filename == *name {
                return Some((index, entry));
            }
        }
        None
    }

    /// Walk a file's content blocks and locate the current version
    ///
    /// The current version is the last block whose header is committed and
    /// whose payload fits the allocation; the walk stops at the first
    /// erased or out-of-bounds header.
    pub(crate) fn resolve_stream(&self, entry: &DirectoryEntry) -> Result<Stream, StreamIssue> {
        let alloc_end = entry.flash_offset + entry.max_size;
        let mut offset = entry.flash_offset;
        let mut current: Option<Stream> = None;
        while offset + HEADER_SIZE as u32 <= alloc_end {
            let header = self.read_header(offset);
            if header.is_erased() {
                break;
            }
            match (offset + HEADER_SIZE as u32).checked_add(header.size) {
                Some(end) if end <= alloc_end => {
                    current = Some(Stream {
                        header: offset,
                        size: header.size,
                    });
                    offset = align4(end);
                }
                _ => {
                    if current.is_none() {
                        return Err(StreamIssue::BadEntry);
                    }
                    break;
                }
            }
        }
        current.ok_or(StreamIssue::Deleted)
    }

    /// Validate the directory and derive the allocation state
    fn scan_directory(&self, dir_offset: u32, dir_size: u32) -> Result<ScanState, ScanFault> {
        let capacity = self.capacity();
        let entries = dir_size as usize / ENTRY_SIZE;
        let mut bitmap = SectorBitmap::new();
        let mut low_water = dir_offset;

        let first = DirectoryEntry::decode(&self.record_at(dir_offset, 0));
        if !first.is_marker() {
            return Err(ScanFault::NoMarker);
        }

        for index in 0..entries {
            let rec = self.record_at(dir_offset, index);
            if record_is_blank(&rec) {
                break; // unused tail of the directory
            }
            let entry = DirectoryEntry::decode(&rec);
            if entry.sequence != index as u32 {
                return Err(ScanFault::Sequence);
            }
            if entry.is_free() {
                continue; // reclaimed slot, only the sequence remains
            }
            // Replaced entries intentionally skip CRC revalidation: zeroing
            // the filename in place invalidates the stored CRC.
            if !entry.is_replaced() && !entry.crc_valid() {
                return Err(ScanFault::Crc);
            }
            if entry.max_size == 0
                || entry.max_size % SECTOR != 0
                || entry.flash_offset % SECTOR != 0
                || entry
                    .flash_offset
                    .checked_add(entry.max_size)
                    .map_or(true, |end| end > capacity)
            {
                return Err(ScanFault::Bounds);
            }
            bitmap.mark_used(
                sector_of(entry.flash_offset),
                (entry.max_size / SECTOR) as usize,
            );
            low_water = low_water.min(entry.flash_offset);
        }
        Ok(ScanState { bitmap, low_water })
    }

    /// Erase the directory range and initialize it with the format marker
    ///
    /// The marker entry claims the directory's own sectors, so the bitmap
    /// accumulation needs no special case for them.
    fn format_at(&mut self, dir_offset: u32, dir_size: u32) -> Result<(), StoreError> {
        flash_erase(
            &mut self.flash,
            &mut self.gate,
            &mut self.watchdog,
            dir_offset,
            dir_size,
        )?;
        let marker = DirectoryEntry::new(0, marker_name(), dir_size, dir_offset);
        flash_program(&mut self.flash, &mut self.gate, dir_offset, &marker.encode())?;

        self.dir_offset = dir_offset;
        self.dir_size = dir_size;
        self.bitmap.clear_all();
        self.bitmap
            .mark_used(sector_of(dir_offset), (dir_size / SECTOR) as usize);
        self.low_water = dir_offset;
        self.drop_handles();
        self.mounted = true;
        info!(
            "formatted: {} directory entries, content top {=u32:#x}",
            dir_size as usize / ENTRY_SIZE,
            dir_offset
        );
        Ok(())
    }
}

pub(crate) fn sector_of(offset: u32) -> usize {
    (offset / SECTOR) as usize
}

pub(crate) fn round_up_sector(bytes: u32) -> u32 {
    (bytes + SECTOR - 1) & !(SECTOR - 1)
}

/// Program bytes under the flash-safe gate
pub(crate) fn flash_program<F: FlashMedium, G: FlashGate>(
    flash: &mut F,
    gate: &mut G,
    offset: u32,
    data: &[u8],
) -> Result<(), StoreError> {
    let guard = gate.lock(GATE_TIMEOUT_MS).map_err(|e| {
        error!("gate timeout before program at {=u32:#x}", offset);
        StoreError::Gate(e)
    })?;
    let result = flash.write(offset, data);
    drop(guard);
    result.map_err(|e| {
        error!("program failed at {=u32:#x}, {} bytes", offset, data.len());
        StoreError::Flash(e)
    })
}

/// Erase a sector-aligned range under the flash-safe gate
pub(crate) fn flash_erase<F: FlashMedium, G: FlashGate, W: Watchdog>(
    flash: &mut F,
    gate: &mut G,
    watchdog: &mut W,
    offset: u32,
    len: u32,
) -> Result<(), StoreError> {
    watchdog.extend(ERASE_MS_PER_SECTOR * (len / SECTOR).max(1));
    let guard = gate.lock(GATE_TIMEOUT_MS).map_err(|e| {
        error!("gate timeout before erase at {=u32:#x}", offset);
        StoreError::Gate(e)
    })?;
    let result = flash.erase(offset, len);
    drop(guard);
    result.map_err(|e| {
        error!("erase failed at {=u32:#x}, {} bytes", offset, len);
        StoreError::Flash(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ERASED_SIZE;
    use crate::testflash::{
        formatted_store, remounted, RamFlash, TestStore, TEST_CAPACITY, TEST_DIR_BYTES,
    };
    use palimpsest_hal::gate::NullGate;
    use palimpsest_hal::watchdog::NullWatchdog;

    fn write_file(store: &mut TestStore, name: &str, data: &[u8], max_size: u32) {
        let handle = store.open_write(name, data.len() as u32, max_size).unwrap();
        store.write(&handle, data).unwrap();
        store.close_write(handle).unwrap();
    }

    /// Every live record's sequence number must equal its scan position
    fn assert_sequences_positional(store: &TestStore) {
        for index in 0..store.entry_capacity() {
            let rec = store.record(index);
            if record_is_blank(&rec) {
                break;
            }
            assert_eq!(DirectoryEntry::decode(&rec).sequence, index as u32);
        }
    }

    #[test]
    fn test_unmounted_store_rejects_everything() {
        let mut store = TestStore::new(RamFlash::new(TEST_CAPACITY), NullGate, NullWatchdog, 0);
        assert!(!store.file_exists("cfg"));
        assert_eq!(store.open_read("cfg").unwrap_err(), StoreError::NotMounted);
        assert_eq!(
            store.open_write("cfg", 0, 4096).unwrap_err(),
            StoreError::NotMounted
        );
        assert_eq!(store.remove("cfg", true).unwrap_err(), StoreError::NotMounted);
    }

    #[test]
    fn test_format_writes_only_the_marker() {
        let mut store = formatted_store();
        assert!(store.is_mounted());
        assert!(store.file_exists(MARKER_NAME));
        assert!(!store.file_exists("anything"));
        // Marker is not openable as user data
        assert_eq!(store.open_read("/").unwrap_err(), StoreError::NotFound);
        assert!(store.status().files.is_empty());
    }

    #[test]
    fn test_mount_reformats_factory_fresh_flash() {
        let mut store = TestStore::new(RamFlash::new(TEST_CAPACITY), NullGate, NullWatchdog, 0);
        store.mount(TEST_DIR_BYTES).unwrap();
        assert!(store.is_mounted());
        assert!(store.file_exists(MARKER_NAME));
    }

    #[test]
    fn test_mount_reformats_garbage_flash() {
        let mut store =
            TestStore::new(RamFlash::new_dirty(TEST_CAPACITY), NullGate, NullWatchdog, 0);
        store.mount(TEST_DIR_BYTES).unwrap();
        assert!(store.is_mounted());
        assert!(store.status().files.is_empty());
    }

    #[test]
    fn test_concrete_scenario_cfg_roundtrip() {
        // Format(4096); OpenWrite("cfg", 0, 4096); 100 bytes of 0x42
        let mut store = formatted_store();
        write_file(&mut store, "cfg", &[0x42; 100], 4096);

        let file = store.open_read("cfg").unwrap();
        assert_eq!(file.len(), 100);
        assert!(file.data.iter().all(|&b| b == 0x42));
        assert_eq!(file.crc, crc32(&[0x42; 100]));
    }

    #[test]
    fn test_empty_file_roundtrip() {
        let mut store = formatted_store();
        let handle = store.open_write("empty", 0, 4096).unwrap();
        store.close_write(handle).unwrap();

        let file = store.open_read("empty").unwrap();
        assert_eq!(file.len(), 0);
        assert_eq!(file.crc, crc32(&[]));
    }

    #[test]
    fn test_survives_power_cycle() {
        let mut store = formatted_store();
        write_file(&mut store, "cal", b"calibration-data", 4096);

        let (flash, _, _) = store.into_parts();
        let mut store = remounted(flash);
        assert_eq!(store.open_read("cal").unwrap().data, b"calibration-data");
    }

    #[test]
    fn test_idempotent_remount() {
        let mut store = formatted_store();
        write_file(&mut store, "one", &[1; 500], 4096);
        write_file(&mut store, "two", &[2; 5000], 8192);

        let bitmap = store.bitmap.clone();
        let low_water = store.low_water;
        store.mount(TEST_DIR_BYTES).unwrap();
        assert_eq!(store.bitmap, bitmap);
        assert_eq!(store.low_water, low_water);
    }

    #[test]
    fn test_entry_crc_corruption_reformats() {
        let mut store = formatted_store();
        write_file(&mut store, "cfg", &[0x42; 100], 4096);
        let entry_off = store.entry_offset(1) as usize;

        let (mut flash, _, _) = store.into_parts();
        flash.mem[entry_off + 20] ^= 0x01; // flip a max_size bit
        let mut store = remounted(flash);

        // No partial repair: the whole directory was reformatted
        assert!(store.is_mounted());
        assert!(!store.file_exists("cfg"));
        assert!(store.file_exists(MARKER_NAME));
    }

    #[test]
    fn test_sequence_corruption_reformats() {
        let mut store = formatted_store();
        write_file(&mut store, "cfg", &[0x42; 100], 4096);
        let entry_off = store.entry_offset(1) as usize;

        let (mut flash, _, _) = store.into_parts();
        flash.mem[entry_off] = 9; // sequence 1 -> 9
        let mut store = remounted(flash);
        assert!(!store.file_exists("cfg"));
    }

    #[test]
    fn test_payload_corruption_reports_bad_checksum() {
        let mut store = formatted_store();
        write_file(&mut store, "cfg", &[0x42; 100], 4096);
        let payload_off = {
            let (_, entry) = store.lookup(&encode_name("cfg").unwrap()).unwrap();
            entry.flash_offset as usize + HEADER_SIZE
        };

        let (mut flash, _, _) = store.into_parts();
        flash.mem[payload_off + 50] &= !0x02; // a dropped bit, as flash fails
        let mut store = remounted(flash);
        assert_eq!(store.open_read("cfg").unwrap_err(), StoreError::BadChecksum);
        // Surfacing corruption must not mutate storage
        assert_eq!(store.open_read("cfg").unwrap_err(), StoreError::BadChecksum);
    }

    #[test]
    fn test_oversized_stream_reports_bad_dir_entry() {
        let mut store = formatted_store();
        write_file(&mut store, "cfg", &[0x42; 100], 4096);
        let header_off = {
            let (_, entry) = store.lookup(&encode_name("cfg").unwrap()).unwrap();
            entry.flash_offset as usize
        };

        let (mut flash, _, _) = store.into_parts();
        // First header claims far more than the allocation holds
        flash.mem[header_off..header_off + 4].copy_from_slice(&0x00FF_FFFFu32.to_le_bytes());
        let mut store = remounted(flash);
        assert_eq!(store.open_read("cfg").unwrap_err(), StoreError::BadDirEntry);
    }

    #[test]
    fn test_remove_semantics() {
        let mut store = formatted_store();
        write_file(&mut store, "cfg", &[0x42; 100], 4096);

        store.remove("cfg", false).unwrap();
        // Entry persists until reclamation; the stream is gone
        assert!(store.file_exists("cfg"));
        assert_eq!(store.open_read("cfg").unwrap_err(), StoreError::NotFound);
        // Removing again is a no-op
        store.remove("cfg", false).unwrap();

        assert_eq!(store.remove("ghost", true).unwrap_err(), StoreError::NotFound);
        assert_eq!(store.remove("/", true).unwrap_err(), StoreError::NotFound);
    }

    #[test]
    fn test_removed_state_survives_remount() {
        let mut store = formatted_store();
        write_file(&mut store, "cfg", &[0x42; 100], 4096);
        store.remove("cfg", false).unwrap();

        let (flash, _, _) = store.into_parts();
        let mut store = remounted(flash);
        assert!(store.file_exists("cfg"));
        assert_eq!(store.open_read("cfg").unwrap_err(), StoreError::NotFound);
    }

    #[test]
    fn test_deleted_entry_can_be_rewritten_in_place() {
        let mut store = formatted_store();
        write_file(&mut store, "cfg", &[0x42; 100], 4096);
        store.remove("cfg", false).unwrap();

        write_file(&mut store, "cfg", b"reborn", 4096);
        assert_eq!(store.open_read("cfg").unwrap().data, b"reborn");
        assert_sequences_positional(&store);
    }

    #[test]
    fn test_invalid_names_rejected() {
        let mut store = formatted_store();
        assert_eq!(store.open_read("").unwrap_err(), StoreError::InvalidName);
        assert_eq!(
            store.open_write("way-too-long-a-filename", 0, 4096).unwrap_err(),
            StoreError::InvalidName
        );
        assert_eq!(
            store.open_write("/", 0, 4096).unwrap_err(),
            StoreError::InvalidName
        );
    }

    #[test]
    fn test_allocation_collides_with_program_image() {
        // Reserve the bottom half of flash for the program
        let mut store = TestStore::new(
            RamFlash::new(TEST_CAPACITY),
            NullGate,
            NullWatchdog,
            TEST_CAPACITY as u32 / 2,
        );
        store.format(TEST_DIR_BYTES).unwrap();

        // More than the content area above the program image can hold
        let too_big = TEST_CAPACITY as u32 / 2;
        assert_eq!(
            store.open_write("huge", 0, too_big).unwrap_err(),
            StoreError::NoSpace
        );
        // A modest file still fits
        write_file(&mut store, "small", &[5; 64], 4096);
        assert_eq!(store.open_read("small").unwrap().len(), 64);
    }

    #[test]
    fn test_erased_sentinel_constant() {
        // The sentinel must read back from never-programmed flash
        let flash = RamFlash::new(TEST_CAPACITY);
        let store = TestStore::new(flash, NullGate, NullWatchdog, 0);
        assert_eq!(store.read_header(0).size, ERASED_SIZE);
    }
}

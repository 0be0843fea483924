//! Diagnostic status surface
//!
//! A point-in-time summary for external tooling: console commands and the
//! remote status query are thin wrappers over this.

use heapless::{String, Vec};

use palimpsest_hal::flash::FlashMedium;
use palimpsest_hal::gate::FlashGate;
use palimpsest_hal::watchdog::Watchdog;

use crate::layout::{crc32, record_is_blank, DirectoryEntry, NAME_LEN};
use crate::store::{sector_of, Store, StreamIssue, SECTOR};

/// Listing capacity of one status snapshot
pub const MAX_STATUS_FILES: usize = 32;

/// Validity of one directory entry's content stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FileState {
    /// Current version resolves and its checksum matches
    Ok,
    /// Entry exists but the stream's first header is erased
    Deleted,
    /// Slot superseded in place, waiting for reclamation
    Replaced,
    /// Stream does not fit the allocation
    BadEntry,
    /// Current version's payload fails its checksum
    BadChecksum,
}

/// One file in the status listing
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub name: String<NAME_LEN>,
    /// Current version's payload size (0 unless `state` is `Ok` or
    /// `BadChecksum`)
    pub size: u32,
    /// Allocation size in bytes
    pub max_size: u32,
    pub state: FileState,
}

/// Point-in-time engine summary
#[derive(Debug, Clone, Default)]
pub struct StoreStatus {
    pub mounted: bool,
    /// Bytes of content area claimed by directory entries
    pub bytes_allocated: u32,
    /// Free content bytes above the reserved program image
    pub bytes_free: u32,
    pub files: Vec<FileInfo, MAX_STATUS_FILES>,
}

impl<F, G, W> Store<F, G, W>
where
    F: FlashMedium,
    G: FlashGate,
    W: Watchdog,
{
    /// Summarize the mounted state and every directory entry
    ///
    /// Checksums each resolvable file, so the cost is proportional to the
    /// stored data volume.
    pub fn status(&mut self) -> StoreStatus {
        let mut status = StoreStatus {
            mounted: self.mounted,
            ..Default::default()
        };
        if !self.mounted {
            return status;
        }

        let content_base = sector_of(self.reserved_base + SECTOR - 1);
        status.bytes_free =
            self.bitmap.count_free(content_base, sector_of(self.dir_offset)) as u32 * SECTOR;

        // Entry 0 is the format marker, not a file
        for index in 1..self.entry_capacity() {
            let rec = self.record(index);
            if record_is_blank(&rec) {
                break;
            }
            let entry = DirectoryEntry::decode(&rec);
            if entry.is_free() {
                continue;
            }
            status.bytes_allocated += entry.max_size;

            let (state, size) = if entry.is_replaced() {
                (FileState::Replaced, 0)
            } else {
                match self.resolve_stream(&entry) {
                    Err(StreamIssue::Deleted) => (FileState::Deleted, 0),
                    Err(StreamIssue::BadEntry) => (FileState::BadEntry, 0),
                    Ok(stream) => {
                        self.watchdog.extend(2 + stream.size / 1024);
                        let expected = self.read_header(stream.header).crc;
                        let payload = &self.flash.mapped()
                            [stream.payload() as usize..stream.end() as usize];
                        if crc32(payload) == expected {
                            (FileState::Ok, stream.size)
                        } else {
                            (FileState::BadChecksum, stream.size)
                        }
                    }
                }
            };

            let info = FileInfo {
                name: name_string(&entry.filename),
                size,
                max_size: entry.max_size,
                state,
            };
            if status.files.push(info).is_err() {
                break;
            }
        }
        status
    }
}

/// Render a stored filename; non-printable bytes become `?`
fn name_string(bytes: &[u8; NAME_LEN]) -> String<NAME_LEN> {
    let mut name = String::new();
    for &b in bytes.iter().take_while(|&&b| b != 0) {
        let c = if (0x20..0x7F).contains(&b) { b as char } else { '?' };
        let _ = name.push(c);
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::encode_name;
    use crate::testflash::{formatted_store, remounted, TestStore};

    fn write_file(store: &mut TestStore, name: &str, data: &[u8], max_size: u32) {
        let handle = store.open_write(name, data.len() as u32, max_size).unwrap();
        store.write(&handle, data).unwrap();
        store.close_write(handle).unwrap();
    }

    #[test]
    fn test_unmounted_status() {
        let status = StoreStatus::default();
        assert!(!status.mounted);

        let mut store = formatted_store();
        let (flash, gate, watchdog) = store.into_parts();
        let mut store = TestStore::new(flash, gate, watchdog, 0);
        assert!(!store.status().mounted);
    }

    #[test]
    fn test_listing_states() {
        let mut store = formatted_store();
        write_file(&mut store, "ok", &[1; 100], 4096);
        write_file(&mut store, "gone", &[2; 100], 4096);
        store.remove("gone", false).unwrap();
        write_file(&mut store, "bad", &[3; 100], 4096);
        let bad_payload = {
            let (_, entry) = store.lookup(&encode_name("bad").unwrap()).unwrap();
            entry.flash_offset as usize + 8
        };

        let (mut flash, _, _) = store.into_parts();
        flash.mem[bad_payload] &= !0x01;
        let mut store = remounted(flash);

        let status = store.status();
        assert!(status.mounted);
        let state_of = |name: &str| {
            status
                .files
                .iter()
                .find(|f| f.name.as_str() == name)
                .map(|f| (f.state, f.size))
                .unwrap()
        };
        assert_eq!(state_of("ok"), (FileState::Ok, 100));
        assert_eq!(state_of("gone"), (FileState::Deleted, 0));
        assert_eq!(state_of("bad"), (FileState::BadChecksum, 100));
    }

    #[test]
    fn test_space_accounting() {
        let mut store = formatted_store();
        let before = store.status();
        write_file(&mut store, "a", &[1; 100], 4096);
        write_file(&mut store, "b", &[2; 5000], 8192);
        let after = store.status();

        assert_eq!(after.bytes_allocated, 4096 + 8192);
        assert_eq!(before.bytes_free - after.bytes_free, 4096 + 8192);
    }
}

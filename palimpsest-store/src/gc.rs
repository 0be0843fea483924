//! Central directory rebuild (garbage collection)
//!
//! Directory slots whose files were deleted or superseded keep holding a
//! slot and their sector claims until this pass reclaims them. It runs
//! lazily, only when a write-mode lookup finds no free slot.

use palimpsest_hal::flash::{FlashMedium, SECTOR_SIZE};
use palimpsest_hal::gate::FlashGate;
use palimpsest_hal::watchdog::Watchdog;

use crate::error::StoreError;
use crate::layout::{record_is_blank, DirectoryEntry, ENTRY_SIZE};
use crate::store::{flash_erase, flash_program, sector_of, Store, SECTOR};

impl<F, G, W> Store<F, G, W>
where
    F: FlashMedium,
    G: FlashGate,
    W: Watchdog,
{
    /// Reclaim replaced and deleted directory slots
    ///
    /// Each directory sector is staged in RAM, dead entries have their
    /// backing sectors freed in the bitmap and every field but the
    /// positional sequence number cleared to the erased state, and the
    /// sector is erased and rewritten. Returns whether anything changed, so
    /// the caller knows if a second slot-lookup pass is worth it.
    pub(crate) fn rebuild_directory(&mut self) -> Result<bool, StoreError> {
        info!("rebuilding central directory");
        let mut reclaimed: u32 = 0;
        let mut changed_any = false;
        let sectors = (self.dir_size / SECTOR) as usize;

        for s in 0..sectors {
            let sector_offset = self.dir_offset + s as u32 * SECTOR;
            self.scratch
                .copy_from_slice(&self.flash.mapped()[sector_offset as usize..][..SECTOR_SIZE]);

            let mut sector_changed = false;
            for slot in 0..SECTOR_SIZE / ENTRY_SIZE {
                let rec_off = slot * ENTRY_SIZE;
                let mut rec = [0u8; ENTRY_SIZE];
                rec.copy_from_slice(&self.scratch[rec_off..rec_off + ENTRY_SIZE]);
                if record_is_blank(&rec) {
                    continue;
                }
                let entry = DirectoryEntry::decode(&rec);
                if entry.is_free() {
                    continue;
                }
                // An in-flight rewrite reads as deleted until its header
                // patch lands; its allocation must not be reclaimed
                let busy = self
                    .handles
                    .iter()
                    .flatten()
                    .any(|h| h.alloc_start == entry.flash_offset);
                if busy {
                    continue;
                }
                // Dead: superseded in place, or stream deleted (first
                // header erased). The marker entry resolves a zero-length
                // stream over the directory itself and never matches.
                let dead =
                    entry.is_replaced() || self.read_header(entry.flash_offset).is_erased();
                if !dead {
                    continue;
                }
                self.bitmap.mark_free(
                    sector_of(entry.flash_offset),
                    (entry.max_size / SECTOR) as usize,
                );
                self.scratch[rec_off + 4..rec_off + ENTRY_SIZE].fill(0xFF);
                sector_changed = true;
                reclaimed += 1;
            }

            if sector_changed {
                flash_erase(
                    &mut self.flash,
                    &mut self.gate,
                    &mut self.watchdog,
                    sector_offset,
                    SECTOR,
                )?;
                flash_program(&mut self.flash, &mut self.gate, sector_offset, &self.scratch)?;
                changed_any = true;
            }
            self.watchdog.keep_alive();
        }

        if changed_any {
            info!("directory rebuild reclaimed {} slots", reclaimed);
        } else {
            debug!("directory rebuild found nothing to reclaim");
        }
        Ok(changed_any)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::layout::encode_name;
    use crate::testflash::{formatted_store, remounted, TestStore};

    fn write_file(store: &mut TestStore, name: &str, data: &[u8], max_size: u32) {
        let handle = store.open_write(name, data.len() as u32, max_size).unwrap();
        store.write(&handle, data).unwrap();
        store.close_write(handle).unwrap();
    }

    fn slot_of(store: &TestStore, name: &str) -> usize {
        store.lookup(&encode_name(name).unwrap()).unwrap().0
    }

    #[test]
    fn test_rebuild_reclaims_deleted_slots() {
        let mut store = formatted_store();
        write_file(&mut store, "a", &[1; 100], 4096);
        write_file(&mut store, "b", &[2; 100], 4096);
        let a_slot = slot_of(&store, "a");
        store.remove("a", false).unwrap();

        assert!(store.rebuild_directory().unwrap());
        assert!(!store.file_exists("a"));
        assert!(store.file_exists("b"));

        // The freed slot keeps only its positional sequence number
        let rec = store.record(a_slot);
        let entry = DirectoryEntry::decode(&rec);
        assert_eq!(entry.sequence, a_slot as u32);
        assert!(entry.is_free());

        // A second rebuild has nothing left to do
        assert!(!store.rebuild_directory().unwrap());
    }

    #[test]
    fn test_rebuild_reclaims_replaced_slots() {
        let mut store = formatted_store();
        write_file(&mut store, "cfg", &[1; 100], 4096);
        // Growing the allocation supersedes the old slot in place
        write_file(&mut store, "cfg", &[2; 5000], 8192);

        assert!(store.rebuild_directory().unwrap());
        let status = store.status();
        assert!(status
            .files
            .iter()
            .all(|f| f.state != crate::status::FileState::Replaced));
        assert_eq!(store.open_read("cfg").unwrap().data, &[2; 5000]);
    }

    #[test]
    fn test_reclaimed_slot_and_sectors_are_reused() {
        let mut store = formatted_store();
        write_file(&mut store, "a", &[1; 100], 4096);
        write_file(&mut store, "b", &[2; 100], 4096);
        let a_slot = slot_of(&store, "a");
        let (a_alloc, _) = {
            let (_, e) = store.lookup(&encode_name("a").unwrap()).unwrap();
            (e.flash_offset, e.max_size)
        };

        store.remove("a", false).unwrap();
        assert!(store.rebuild_directory().unwrap());

        // The next create takes the freed slot and the freed hole instead
        // of extending the low-water mark
        let low_water = store.low_water;
        write_file(&mut store, "c", &[3; 100], 4096);
        assert_eq!(slot_of(&store, "c"), a_slot);
        let (_, c_entry) = store.lookup(&encode_name("c").unwrap()).unwrap();
        assert_eq!(c_entry.flash_offset, a_alloc);
        assert_eq!(store.low_water, low_water);
        assert_eq!(store.open_read("c").unwrap().data, &[3; 100]);
    }

    #[test]
    fn test_rebuild_survives_remount() {
        let mut store = formatted_store();
        write_file(&mut store, "a", &[1; 100], 4096);
        write_file(&mut store, "b", &[2; 100], 4096);
        store.remove("a", false).unwrap();
        store.rebuild_directory().unwrap();

        let bitmap = store.bitmap.clone();
        let (flash, _, _) = store.into_parts();
        let mut store = remounted(flash);
        assert_eq!(store.bitmap, bitmap);
        assert!(!store.file_exists("a"));
        assert_eq!(store.open_read("b").unwrap().data, &[2; 100]);
        assert_eq!(store.open_read("a").unwrap_err(), StoreError::NotFound);
    }

    #[test]
    fn test_rebuild_skips_in_flight_rewrite() {
        let mut store = formatted_store();
        write_file(&mut store, "a", &[1; 100], 4096);

        // A fresh rewrite erases the first sector up front, so until the
        // header patch the entry reads as deleted; the rebuild must leave
        // it alone
        let handle = store.open_write("a", 4000, 4096).unwrap();
        store.write(&handle, &[2; 4000]).unwrap();
        assert!(!store.rebuild_directory().unwrap());

        store.close_write(handle).unwrap();
        assert_eq!(store.open_read("a").unwrap().data, &[2u8; 4000][..]);
    }

    #[test]
    fn test_marker_survives_rebuild() {
        let mut store = formatted_store();
        write_file(&mut store, "a", &[1; 100], 4096);
        store.remove("a", false).unwrap();
        store.rebuild_directory().unwrap();
        assert!(store.file_exists("/"));
    }
}

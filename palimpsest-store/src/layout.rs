//! On-media layout
//!
//! Fixed, versionless little-endian layout for the two persistent record
//! types. Reserved space is zero-filled on write so future fields read back
//! as zero; unwritten flash reads back as `0xFF`, which both record types
//! treat as the erased state.
//!
//! `DirectoryEntry` (32 bytes, array element of the central directory):
//!
//! ```text
//! offset  size  field
//!      0     4  sequence      (positional, equals the slot index)
//!      4    16  filename      (zero-padded; all-0xFF free, all-zero replaced)
//!     20     4  max_size      (allocation size, whole sectors)
//!     24     4  flash_offset  (absolute byte offset of the allocation)
//!     28     4  crc           (CRC-32 over the 28 bytes above)
//! ```
//!
//! `FileHeader` (8 bytes, prepended to every content block):
//!
//! ```text
//!      0     4  size          (payload length; 0xFFFF_FFFF = erased)
//!      4     4  crc           (CRC-32 over the payload only)
//! ```

use crc::{Crc, CRC_32_ISO_HDLC};

use crate::error::StoreError;

/// Size of a serialized directory entry
pub const ENTRY_SIZE: usize = 32;

/// Fixed filename field width
pub const NAME_LEN: usize = 16;

/// Size of a serialized content-block header
pub const HEADER_SIZE: usize = 8;

/// `size` sentinel of a header that was never patched (still erased)
pub const ERASED_SIZE: u32 = 0xFFFF_FFFF;

/// Reserved filename of directory entry 0, the format marker
pub const MARKER_NAME: &str = "/";

/// CRC-32 used for directory entries and payloads
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Checksum a byte slice
pub fn crc32(bytes: &[u8]) -> u32 {
    CRC32.checksum(bytes)
}

/// Round `x` up to the next multiple of 4 (content-block alignment)
pub fn align4(x: u32) -> u32 {
    (x + 3) & !3
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// One record of the central directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DirectoryEntry {
    /// Positional sequence number; must equal the slot index
    pub sequence: u32,
    /// Zero-padded filename
    pub filename: [u8; NAME_LEN],
    /// Allocation size in bytes, a whole multiple of the sector size
    pub max_size: u32,
    /// Absolute byte offset of the allocation within the medium
    pub flash_offset: u32,
    /// CRC-32 over the serialized fields above
    pub crc: u32,
}

impl DirectoryEntry {
    /// Build an entry with its CRC computed
    pub fn new(sequence: u32, filename: [u8; NAME_LEN], max_size: u32, flash_offset: u32) -> Self {
        let mut entry = Self {
            sequence,
            filename,
            max_size,
            flash_offset,
            crc: 0,
        };
        let encoded = entry.encode();
        entry.crc = crc32(&encoded[..ENTRY_SIZE - 4]);
        entry
    }

    /// Serialize to the on-media layout
    pub fn encode(&self) -> [u8; ENTRY_SIZE] {
        let mut buf = [0u8; ENTRY_SIZE];
        buf[0..4].copy_from_slice(&self.sequence.to_le_bytes());
        buf[4..20].copy_from_slice(&self.filename);
        buf[20..24].copy_from_slice(&self.max_size.to_le_bytes());
        buf[24..28].copy_from_slice(&self.flash_offset.to_le_bytes());
        buf[28..32].copy_from_slice(&self.crc.to_le_bytes());
        buf
    }

    /// Deserialize from the on-media layout
    ///
    /// No validation; callers check [`crc_valid`](Self::crc_valid) and
    /// bounds where it matters.
    pub fn decode(bytes: &[u8; ENTRY_SIZE]) -> Self {
        let mut filename = [0u8; NAME_LEN];
        filename.copy_from_slice(&bytes[4..20]);
        Self {
            sequence: read_u32(bytes, 0),
            filename,
            max_size: read_u32(bytes, 20),
            flash_offset: read_u32(bytes, 24),
            crc: read_u32(bytes, 28),
        }
    }

    /// Check the stored CRC against the serialized fields
    pub fn crc_valid(&self) -> bool {
        let encoded = self.encode();
        crc32(&encoded[..ENTRY_SIZE - 4]) == self.crc
    }

    /// Free slot: filename bytes never programmed (all `0xFF`)
    pub fn is_free(&self) -> bool {
        self.filename.iter().all(|&b| b == 0xFF)
    }

    /// Replaced in place: filename zeroed, superseded by a newer entry
    pub fn is_replaced(&self) -> bool {
        self.filename.iter().all(|&b| b == 0x00)
    }

    /// Format marker (entry 0 of a valid directory)
    pub fn is_marker(&self) -> bool {
        self.filename == marker_name()
    }
}

/// Check whether a raw record is fully erased (unused directory tail)
pub fn record_is_blank(bytes: &[u8; ENTRY_SIZE]) -> bool {
    bytes.iter().all(|&b| b == 0xFF)
}

/// Encode a filename into the fixed-width zero-padded field
///
/// Rejects empty names, names longer than [`NAME_LEN`] bytes, and names
/// containing NUL (a NUL-led name would collide with the replaced-slot
/// pattern).
pub fn encode_name(name: &str) -> Result<[u8; NAME_LEN], StoreError> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > NAME_LEN || bytes.contains(&0) {
        return Err(StoreError::InvalidName);
    }
    let mut buf = [0u8; NAME_LEN];
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(buf)
}

/// The encoded form of the format marker name
pub fn marker_name() -> [u8; NAME_LEN] {
    let mut buf = [0u8; NAME_LEN];
    buf[0] = b'/';
    buf
}

/// Header prepended to each content block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FileHeader {
    /// Payload length in bytes
    pub size: u32,
    /// CRC-32 of the payload
    pub crc: u32,
}

impl FileHeader {
    /// Serialize to the on-media layout
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.size.to_le_bytes());
        buf[4..8].copy_from_slice(&self.crc.to_le_bytes());
        buf
    }

    /// Deserialize from the on-media layout
    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Self {
        Self {
            size: read_u32(bytes, 0),
            crc: read_u32(bytes, 4),
        }
    }

    /// Erased header: block never committed, or unused allocation tail
    pub fn is_erased(&self) -> bool {
        self.size == ERASED_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_entry_roundtrip() {
        let entry = DirectoryEntry::new(3, encode_name("config").unwrap(), 8192, 0x1F_C000);
        let decoded = DirectoryEntry::decode(&entry.encode());
        assert_eq!(decoded, entry);
        assert!(decoded.crc_valid());
    }

    #[test]
    fn test_entry_crc_detects_corruption() {
        let entry = DirectoryEntry::new(0, encode_name("cal").unwrap(), 4096, 0x10_0000);
        let mut bytes = entry.encode();
        bytes[21] ^= 0x01; // flip a bit in max_size
        assert!(!DirectoryEntry::decode(&bytes).crc_valid());
    }

    #[test]
    fn test_entry_states() {
        let free = DirectoryEntry::decode(&[0xFF; ENTRY_SIZE]);
        assert!(free.is_free());
        assert!(!free.is_replaced());

        let mut replaced_bytes = DirectoryEntry::new(1, encode_name("x").unwrap(), 4096, 0).encode();
        replaced_bytes[4..20].fill(0);
        let replaced = DirectoryEntry::decode(&replaced_bytes);
        assert!(replaced.is_replaced());
        assert!(!replaced.is_free());

        let marker = DirectoryEntry::new(0, marker_name(), 4096, 0);
        assert!(marker.is_marker());
    }

    #[test]
    fn test_blank_record() {
        assert!(record_is_blank(&[0xFF; ENTRY_SIZE]));
        let mut rec = [0xFF; ENTRY_SIZE];
        rec[0] = 0;
        assert!(!record_is_blank(&rec));
    }

    #[test]
    fn test_encode_name_limits() {
        assert!(encode_name("").is_err());
        assert!(encode_name("a-name-that-is-too-long").is_err());
        assert!(encode_name("bad\0name").is_err());
        assert_eq!(encode_name("sixteen-bytes-xy").unwrap()[15], b'y');
    }

    #[test]
    fn test_header_erased_sentinel() {
        let erased = FileHeader::decode(&[0xFF; HEADER_SIZE]);
        assert!(erased.is_erased());

        let committed = FileHeader { size: 100, crc: 0xDEAD_BEEF };
        assert!(!committed.is_erased());
        assert_eq!(FileHeader::decode(&committed.encode()), committed);
    }

    #[test]
    fn test_align4() {
        assert_eq!(align4(0), 0);
        assert_eq!(align4(1), 4);
        assert_eq!(align4(4), 4);
        assert_eq!(align4(4095), 4096);
    }

    proptest! {
        #[test]
        fn prop_entry_codec_roundtrip(seq in any::<u32>(), name in "[a-z]{1,16}",
                                      max in any::<u32>(), off in any::<u32>()) {
            let entry = DirectoryEntry::new(seq, encode_name(&name).unwrap(), max, off);
            let decoded = DirectoryEntry::decode(&entry.encode());
            prop_assert_eq!(decoded, entry);
            prop_assert!(decoded.crc_valid());
        }
    }
}

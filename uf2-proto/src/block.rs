//! UF2 flashing block decoding.
//!
//! A flashing block is one 512-byte mass-storage write. Only the fields
//! needed to reassemble an image for a small serial target are decoded:
//!
//! ```text
//! offset  size  field
//!      0     8  magic ("UF2\n" + 0x9E5D5157 little-endian)
//!      8     4  flags (bit 0: not main flash, do not flash)
//!     12     2  target address (low half of the 32-bit field)
//!     16     4  payload size
//!     20     4  block index
//!     24     4  total block count
//!     32   476  payload
//! ```
//!
//! Bytes `0..16` form the [`BlockHeader`], bytes `16..32` the
//! [`BlockMetadata`]. The two halves are decoded separately because the
//! transport may deliver them in different chunks.

/// Size of a flashing block (one mass-storage logical block).
pub const BLOCK_SIZE: usize = 512;

/// Magic signature at the start of every flashing block.
pub const MAGIC: [u8; 8] = *b"UF2\nWQ]\x9E";

/// Flag bit: block is not meant for main flash and must not be programmed.
pub const FLAG_NOT_MAIN_FLASH: u32 = 0x0000_0001;

/// Byte range of the header fields.
pub const HEADER_LEN: usize = 16;

/// Offset of the metadata fields.
pub const METADATA_OFFSET: usize = 16;

/// Length of the metadata fields.
pub const METADATA_LEN: usize = 16;

/// Offset of the payload area.
pub const PAYLOAD_OFFSET: usize = 32;

/// Maximum payload bytes a block can carry (area between metadata and end magic).
pub const MAX_PAYLOAD: usize = 476;

const FLAGS_OFFSET: usize = 8;
const ADDRESS_OFFSET: usize = 12;
const PAYLOAD_SIZE_OFFSET: usize = 0;
const BLOCK_INDEX_OFFSET: usize = 4;
const BLOCK_COUNT_OFFSET: usize = 8;

/// Error type for block decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BlockError {
    /// Input slice is shorter than the field group being decoded.
    Truncated,
}

/// First 16 bytes of a flashing block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BlockHeader {
    /// Whether the magic signature matched.
    pub magic_ok: bool,
    /// Raw flags word.
    pub flags: u32,
    /// Target byte address (16-bit).
    pub address: u16,
}

impl BlockHeader {
    /// Decode the header from the first bytes of a block.
    pub fn decode(bytes: &[u8]) -> Result<Self, BlockError> {
        if bytes.len() < HEADER_LEN {
            return Err(BlockError::Truncated);
        }

        Ok(Self {
            magic_ok: bytes[..MAGIC.len()] == MAGIC,
            flags: read_u32(bytes, FLAGS_OFFSET),
            address: u16::from_le_bytes([bytes[ADDRESS_OFFSET], bytes[ADDRESS_OFFSET + 1]]),
        })
    }

    /// Whether the skip flag is set.
    #[inline]
    #[must_use]
    pub fn skip(&self) -> bool {
        self.flags & FLAG_NOT_MAIN_FLASH != 0
    }

    /// A block is actionable only if the magic matched and the skip flag is clear.
    #[inline]
    #[must_use]
    pub fn is_actionable(&self) -> bool {
        self.magic_ok && !self.skip()
    }

    /// Target address in 16-bit word units, as the serial bootloader expects.
    #[inline]
    #[must_use]
    pub fn word_address(&self) -> u16 {
        self.address >> 1
    }
}

/// Bytes 16..32 of a flashing block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BlockMetadata {
    /// Declared payload size in bytes.
    pub payload_size: u32,
    /// Index of this block within the transfer.
    pub block_index: u32,
    /// Declared total number of blocks in the transfer.
    pub block_count: u32,
}

impl BlockMetadata {
    /// Decode metadata from a slice that starts at block offset 16.
    pub fn decode(bytes: &[u8]) -> Result<Self, BlockError> {
        if bytes.len() < METADATA_LEN {
            return Err(BlockError::Truncated);
        }

        Ok(Self {
            payload_size: read_u32(bytes, PAYLOAD_SIZE_OFFSET),
            block_index: read_u32(bytes, BLOCK_INDEX_OFFSET),
            block_count: read_u32(bytes, BLOCK_COUNT_OFFSET),
        })
    }

    /// Number of whole target pages covered by the declared payload.
    ///
    /// The payload is clamped to the block's data area first.
    #[inline]
    #[must_use]
    pub fn page_count(&self, page_shift: u32) -> u32 {
        let size = self.payload_size.min(MAX_PAYLOAD as u32);
        size >> page_shift
    }
}

#[inline]
fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(flags: u32, address: u32) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[..8].copy_from_slice(&MAGIC);
        buf[8..12].copy_from_slice(&flags.to_le_bytes());
        buf[12..16].copy_from_slice(&address.to_le_bytes());
        buf
    }

    #[test]
    fn test_magic_matches_uf2_words() {
        assert_eq!(&MAGIC[..4], &0x0A32_4655u32.to_le_bytes());
        assert_eq!(&MAGIC[4..], &0x9E5D_5157u32.to_le_bytes());
    }

    #[test]
    fn test_decode_header() {
        let header = BlockHeader::decode(&header_bytes(0, 0x0100)).unwrap();
        assert!(header.magic_ok);
        assert!(!header.skip());
        assert!(header.is_actionable());
        assert_eq!(header.address, 0x0100);
        assert_eq!(header.word_address(), 0x0080);
    }

    #[test]
    fn test_decode_header_bad_magic() {
        let mut bytes = header_bytes(0, 0);
        bytes[3] = b'X';
        let header = BlockHeader::decode(&bytes).unwrap();
        assert!(!header.magic_ok);
        assert!(!header.is_actionable());
    }

    #[test]
    fn test_decode_header_skip_flag() {
        let header = BlockHeader::decode(&header_bytes(FLAG_NOT_MAIN_FLASH, 0)).unwrap();
        assert!(header.skip());
        assert!(!header.is_actionable());

        // Family-id flag alone must not mark the block inert
        let header = BlockHeader::decode(&header_bytes(0x2000, 0)).unwrap();
        assert!(header.is_actionable());
    }

    #[test]
    fn test_address_uses_low_half_only() {
        let header = BlockHeader::decode(&header_bytes(0, 0x0001_7F00)).unwrap();
        assert_eq!(header.address, 0x7F00);
    }

    #[test]
    fn test_decode_truncated() {
        assert_eq!(BlockHeader::decode(&[0u8; 15]), Err(BlockError::Truncated));
        assert_eq!(BlockMetadata::decode(&[0u8; 8]), Err(BlockError::Truncated));
    }

    #[test]
    fn test_decode_metadata() {
        let mut bytes = [0u8; METADATA_LEN];
        bytes[0..4].copy_from_slice(&256u32.to_le_bytes());
        bytes[4..8].copy_from_slice(&7u32.to_le_bytes());
        bytes[8..12].copy_from_slice(&42u32.to_le_bytes());

        let meta = BlockMetadata::decode(&bytes).unwrap();
        assert_eq!(meta.payload_size, 256);
        assert_eq!(meta.block_index, 7);
        assert_eq!(meta.block_count, 42);
        assert_eq!(meta.page_count(7), 2);
    }

    #[test]
    fn test_page_count_clamps_to_data_area() {
        let meta = BlockMetadata {
            payload_size: 0xFFFF_FFFF,
            block_index: 0,
            block_count: 1,
        };
        // 476 bytes hold three whole 128-byte pages
        assert_eq!(meta.page_count(7), 3);
    }
}

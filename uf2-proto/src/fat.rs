//! FAT16 on-disk structure encoding.
//!
//! Only what a read-only, single-cluster-per-file volume needs: the boot
//! sector and 32-byte directory entries. Layout decisions (where the FATs
//! and the root directory live) belong to the caller.

/// Sector size. Also the cluster size, one sector per cluster.
pub const SECTOR_SIZE: usize = 512;

/// Size of one directory entry.
pub const DIR_ENTRY_SIZE: usize = 32;

/// Length of an 8.3 name without the dot.
pub const NAME_LEN: usize = 11;

/// Media descriptor for fixed disks.
pub const MEDIA_DESCRIPTOR: u8 = 0xF8;

/// Number of FAT copies.
pub const FAT_COPIES: u8 = 2;

/// Volume serial number.
pub const VOLUME_SERIAL: u32 = 0x0042_0042;

/// Directory attribute: archive + volume label.
pub const ATTR_VOLUME_LABEL: u8 = 0x28;

/// Signature at the end of the boot sector.
pub const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];

/// First bytes of FAT sector 0: entry 0 (media marker) and entry 1 (end of chain).
pub const FAT_HEADER: [u8; 4] = [0xF0, 0xFF, 0xFF, 0xFF];

/// End-of-chain marker for a one-cluster file.
pub const FAT_END_OF_CHAIN: [u8; 2] = [0xFF, 0xFF];

const JUMP_INSTRUCTION: [u8; 3] = [0xEB, 0x3C, 0x90];
const OEM_NAME: &[u8; 8] = b"UF2 UF2 ";
const FILESYSTEM_ID: &[u8; 8] = b"FAT16   ";
const EXTENDED_BOOT_SIGNATURE: u8 = 0x29;

/// Boot sector parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootSector<'a> {
    /// Reserved sectors before the first FAT.
    pub reserved_sectors: u16,
    /// Root directory entry count.
    pub root_entries: u16,
    /// Total sector count (16-bit field).
    pub total_sectors: u16,
    /// Sectors per FAT copy.
    pub sectors_per_fat: u16,
    /// Volume label, space padded to 11 bytes.
    pub volume_label: &'a str,
}

impl BootSector<'_> {
    /// Encode into a full sector, including zero fill and the 0x55AA signature.
    pub fn encode(&self, sector: &mut [u8; SECTOR_SIZE]) {
        sector.fill(0);

        sector[0..3].copy_from_slice(&JUMP_INSTRUCTION);
        sector[3..11].copy_from_slice(OEM_NAME);
        sector[11..13].copy_from_slice(&(SECTOR_SIZE as u16).to_le_bytes());
        sector[13] = 1; // sectors per cluster
        sector[14..16].copy_from_slice(&self.reserved_sectors.to_le_bytes());
        sector[16] = FAT_COPIES;
        sector[17..19].copy_from_slice(&self.root_entries.to_le_bytes());
        sector[19..21].copy_from_slice(&self.total_sectors.to_le_bytes());
        sector[21] = MEDIA_DESCRIPTOR;
        sector[22..24].copy_from_slice(&self.sectors_per_fat.to_le_bytes());
        sector[24..26].copy_from_slice(&1u16.to_le_bytes()); // sectors per track
        sector[26..28].copy_from_slice(&1u16.to_le_bytes()); // heads
        // hidden sectors, 32-bit total sectors, drive number: zero
        sector[38] = EXTENDED_BOOT_SIGNATURE;
        sector[39..43].copy_from_slice(&VOLUME_SERIAL.to_le_bytes());
        sector[43..54].copy_from_slice(&padded_name(self.volume_label.as_bytes()));
        sector[54..62].copy_from_slice(FILESYSTEM_ID);

        sector[SECTOR_SIZE - 2..].copy_from_slice(&BOOT_SIGNATURE);
    }
}

/// A 32-byte directory entry. Timestamps are left at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry<'a> {
    /// Name in 8.3 form without the dot; padded with spaces if short.
    pub name: &'a [u8],
    /// Attribute byte.
    pub attrs: u8,
    /// First cluster of the file data.
    pub start_cluster: u16,
    /// File size in bytes.
    pub size: u32,
}

impl DirEntry<'_> {
    /// Encode into a 32-byte slot.
    pub fn encode(&self, out: &mut [u8; DIR_ENTRY_SIZE]) {
        out.fill(0);
        out[0..NAME_LEN].copy_from_slice(&padded_name(self.name));
        out[11] = self.attrs;
        out[26..28].copy_from_slice(&self.start_cluster.to_le_bytes());
        out[28..32].copy_from_slice(&self.size.to_le_bytes());
    }
}

/// Copy a name into an 11-byte field, truncating or padding with spaces.
///
/// A NUL byte ends the name early.
#[must_use]
pub fn padded_name(src: &[u8]) -> [u8; NAME_LEN] {
    let mut name = [b' '; NAME_LEN];
    for (dst, &b) in name.iter_mut().zip(src.iter().take_while(|&&b| b != 0)) {
        *dst = b;
    }
    name
}

//! Read-only virtual FAT16 disk.
//!
//! Nothing is stored. Every sector is computed from [`BridgeConfig`] when
//! the host reads it:
//!
//! ```text
//! block 0                      boot sector
//! 1 .. 1+spf                   FAT copy 0
//! 1+spf .. 1+2*spf             FAT copy 1
//! 1+2*spf .. +4                root directory (64 entries)
//! clusters                     INFO_UF2.TXT, INDEX.HTM, then zeros
//! ```
//!
//! Host writes are not stored; the programming bridge looks at them
//! instead.

use crate::config::BridgeConfig;
use core::fmt::{self, Write};
use uf2_proto::fat::{
    padded_name, ATTR_VOLUME_LABEL, FAT_END_OF_CHAIN, FAT_HEADER, NAME_LEN,
};
use uf2_proto::{BootSector, DirEntry, DIR_ENTRY_SIZE, SECTOR_SIZE};

/// Sectors before the first FAT.
pub const RESERVED_SECTORS: u32 = 1;

/// Sectors holding the root directory.
pub const ROOT_DIR_SECTORS: u32 = 4;

/// Root directory capacity in entries.
pub const ROOT_DIR_ENTRIES: u16 = (ROOT_DIR_SECTORS as usize * SECTOR_SIZE / DIR_ENTRY_SIZE) as u16;

/// First data cluster number in FAT.
const FIRST_CLUSTER: u16 = 2;

/// A generated file on the virtual disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VirtualFile {
    /// `INFO_UF2.TXT`: bootloader version, model and board id.
    Info,
    /// `INDEX.HTM`: redirect to the board's web page.
    Index,
}

impl VirtualFile {
    /// Files in directory (and cluster) order.
    pub const ALL: [VirtualFile; 2] = [VirtualFile::Info, VirtualFile::Index];

    /// Number of files on the disk.
    pub const COUNT: usize = Self::ALL.len();

    /// 8.3 directory name without the dot.
    #[must_use]
    pub const fn name(self) -> &'static [u8; NAME_LEN] {
        match self {
            VirtualFile::Info => b"INFO_UF2TXT",
            VirtualFile::Index => b"INDEX   HTM",
        }
    }

    /// Write the file content.
    pub fn render<W: Write>(self, config: &BridgeConfig, out: &mut W) -> fmt::Result {
        match self {
            VirtualFile::Info => write!(
                out,
                "UF2 Bootloader {}\r\nModel: {}\r\nBoard-ID: {}\r\n",
                config.uf2_version, config.product_name, config.board_id
            ),
            VirtualFile::Index => write!(
                out,
                "<!doctype html>\n<html><body><script>\nlocation.replace(\"{}\");\n</script></body></html>\n",
                config.index_url
            ),
        }
    }

    /// Exact content length in bytes.
    #[must_use]
    pub fn len(self, config: &BridgeConfig) -> usize {
        let mut counter = Counter(0);
        // Counter never fails
        let _ = self.render(config, &mut counter);
        counter.0
    }

    /// First cluster of the file.
    #[must_use]
    pub const fn cluster(self) -> u16 {
        FIRST_CLUSTER + self as u16
    }
}

struct Counter(usize);

impl Write for Counter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0 += s.len();
        Ok(())
    }
}

/// Writes into a sector, failing once it is full.
struct SectorWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl Write for SectorWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        let end = self.pos + bytes.len();
        if end > self.buf.len() {
            return Err(fmt::Error);
        }
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }
}

/// Which region of the disk a block falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region {
    Boot,
    /// Sector index within one FAT copy.
    Fat(u32),
    /// Sector index within the root directory.
    RootDir(u32),
    /// Data cluster index, counting from the first file.
    Data(u32),
}

/// The virtual disk. Cheap to copy; all state is in the config.
#[derive(Debug, Clone, Copy)]
pub struct VirtualFilesystem {
    config: BridgeConfig,
    sectors_per_fat: u32,
}

impl VirtualFilesystem {
    #[must_use]
    pub const fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            sectors_per_fat: config.sectors_per_fat(),
        }
    }

    /// Logical block count reported to the host.
    #[inline]
    #[must_use]
    pub const fn block_count(&self) -> u32 {
        self.config.disk_blocks
    }

    #[inline]
    #[must_use]
    pub const fn start_fat0(&self) -> u32 {
        RESERVED_SECTORS
    }

    #[inline]
    #[must_use]
    pub const fn start_fat1(&self) -> u32 {
        self.start_fat0() + self.sectors_per_fat
    }

    #[inline]
    #[must_use]
    pub const fn start_root_dir(&self) -> u32 {
        self.start_fat1() + self.sectors_per_fat
    }

    /// First block of the data region (cluster 2).
    #[inline]
    #[must_use]
    pub const fn start_clusters(&self) -> u32 {
        self.start_root_dir() + ROOT_DIR_SECTORS
    }

    fn region(&self, lba: u32) -> Region {
        if lba < self.start_fat0() {
            Region::Boot
        } else if lba < self.start_root_dir() {
            Region::Fat((lba - self.start_fat0()) % self.sectors_per_fat)
        } else if lba < self.start_clusters() {
            Region::RootDir(lba - self.start_root_dir())
        } else {
            Region::Data(lba - self.start_clusters())
        }
    }

    /// Fill `block` with the content of logical block `lba`.
    pub fn read_block(&self, lba: u32, block: &mut [u8; SECTOR_SIZE]) {
        block.fill(0);

        match self.region(lba) {
            Region::Boot => self.boot_sector(block),
            Region::Fat(sector) => {
                if sector == 0 {
                    self.fat_head(block);
                }
            }
            Region::RootDir(sector) => {
                if sector == 0 {
                    self.root_dir_head(block);
                }
            }
            Region::Data(index) => {
                if let Some(&file) = VirtualFile::ALL.get(index as usize) {
                    let mut out = SectorWriter { buf: block, pos: 0 };
                    // Content that does not fit is cut off; validate() rejects such configs
                    let _ = file.render(&self.config, &mut out);
                }
            }
        }
    }

    /// Host writes leave the disk unchanged.
    pub fn write_block(&self, lba: u32, _block: &[u8]) {
        trace!("ignoring write to block {=u32}", lba);
    }

    fn boot_sector(&self, block: &mut [u8; SECTOR_SIZE]) {
        BootSector {
            reserved_sectors: RESERVED_SECTORS as u16,
            root_entries: ROOT_DIR_ENTRIES,
            total_sectors: (self.config.disk_blocks - 2) as u16,
            sectors_per_fat: self.sectors_per_fat as u16,
            volume_label: self.config.volume_label,
        }
        .encode(block);
    }

    fn fat_head(&self, block: &mut [u8; SECTOR_SIZE]) {
        block[..FAT_HEADER.len()].copy_from_slice(&FAT_HEADER);
        for i in 0..VirtualFile::COUNT {
            let at = FAT_HEADER.len() + i * FAT_END_OF_CHAIN.len();
            block[at..at + FAT_END_OF_CHAIN.len()].copy_from_slice(&FAT_END_OF_CHAIN);
        }
    }

    fn root_dir_head(&self, block: &mut [u8; SECTOR_SIZE]) {
        let mut slots = block.chunks_exact_mut(DIR_ENTRY_SIZE);

        if let Some(slot) = slots.next() {
            let mut entry = [0u8; DIR_ENTRY_SIZE];
            DirEntry {
                name: &padded_name(self.config.volume_label.as_bytes()),
                attrs: ATTR_VOLUME_LABEL,
                start_cluster: 0,
                size: 0,
            }
            .encode(&mut entry);
            slot.copy_from_slice(&entry);
        }

        for (file, slot) in VirtualFile::ALL.iter().zip(slots) {
            let mut entry = [0u8; DIR_ENTRY_SIZE];
            DirEntry {
                name: file.name(),
                attrs: 0,
                start_cluster: file.cluster(),
                size: file.len(&self.config) as u32,
            }
            .encode(&mut entry);
            slot.copy_from_slice(&entry);
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::config::DEFAULT_CONFIG;
    use std::string::String;

    fn read(fs: &VirtualFilesystem, lba: u32) -> [u8; SECTOR_SIZE] {
        let mut block = [0xEEu8; SECTOR_SIZE];
        fs.read_block(lba, &mut block);
        block
    }

    fn rendered(file: VirtualFile) -> String {
        let mut s = String::new();
        file.render(&DEFAULT_CONFIG, &mut s).unwrap();
        s
    }

    #[test]
    fn test_layout_for_default_config() {
        let fs = VirtualFilesystem::new(DEFAULT_CONFIG);
        assert_eq!(fs.start_fat0(), 1);
        assert_eq!(fs.start_fat1(), 33);
        assert_eq!(fs.start_root_dir(), 65);
        assert_eq!(fs.start_clusters(), 69);
        assert_eq!(fs.block_count(), 8000);
    }

    #[test]
    fn test_boot_sector_signature_for_any_size() {
        for disk_blocks in [100, 8000, 65_000] {
            let fs = VirtualFilesystem::new(BridgeConfig {
                disk_blocks,
                ..DEFAULT_CONFIG
            });
            let block = read(&fs, 0);
            assert_eq!(&block[510..], &[0x55, 0xAA]);
            assert_eq!(u16::from_le_bytes([block[11], block[12]]), 512);
            assert_eq!(
                u16::from_le_bytes([block[19], block[20]]) as u32,
                disk_blocks - 2
            );
        }
    }

    #[test]
    fn test_both_fats_identical() {
        let fs = VirtualFilesystem::new(DEFAULT_CONFIG);
        let fat0 = read(&fs, fs.start_fat0());
        let fat1 = read(&fs, fs.start_fat1());
        assert_eq!(fat0, fat1);
        assert_eq!(&fat0[..8], &[0xF0, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(fat0[8..].iter().all(|&b| b == 0));

        assert!(read(&fs, fs.start_fat0() + 1).iter().all(|&b| b == 0));
        assert!(read(&fs, fs.start_root_dir() - 1).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_root_directory_entries() {
        let fs = VirtualFilesystem::new(DEFAULT_CONFIG);
        let dir = read(&fs, fs.start_root_dir());

        let used = dir
            .chunks_exact(DIR_ENTRY_SIZE)
            .filter(|e| e[0] != 0)
            .count();
        assert_eq!(used, VirtualFile::COUNT + 1);

        assert_eq!(&dir[0..11], b"UNO BOOT   ");
        assert_eq!(dir[11], 0x28);

        for (i, file) in VirtualFile::ALL.iter().enumerate() {
            let entry = &dir[(i + 1) * DIR_ENTRY_SIZE..(i + 2) * DIR_ENTRY_SIZE];
            assert_eq!(&entry[0..11], file.name());
            assert_eq!(u16::from_le_bytes([entry[26], entry[27]]), 2 + i as u16);
            let size = u32::from_le_bytes([entry[28], entry[29], entry[30], entry[31]]);
            assert_eq!(size as usize, rendered(*file).len());
        }

        for sector in 1..ROOT_DIR_SECTORS {
            assert!(read(&fs, fs.start_root_dir() + sector)
                .iter()
                .all(|&b| b == 0));
        }
    }

    #[test]
    fn test_file_contents() {
        let fs = VirtualFilesystem::new(DEFAULT_CONFIG);
        let info = rendered(VirtualFile::Info);
        assert_eq!(
            info,
            "UF2 Bootloader v0.0.0\r\nModel: Arduino Uno\r\nBoard-ID: ATmega328p-Uno-r3\r\n"
        );

        let block = read(&fs, fs.start_clusters());
        assert_eq!(&block[..info.len()], info.as_bytes());
        assert!(block[info.len()..].iter().all(|&b| b == 0));

        let index = rendered(VirtualFile::Index);
        assert!(index.contains("location.replace(\"https://pxt.io\");"));
        let block = read(&fs, fs.start_clusters() + 1);
        assert_eq!(&block[..index.len()], index.as_bytes());
    }

    #[test]
    fn test_blocks_past_files_are_zero() {
        let fs = VirtualFilesystem::new(DEFAULT_CONFIG);
        for lba in [fs.start_clusters() + 2, 4000, fs.block_count() - 1, u32::MAX] {
            assert!(read(&fs, lba).iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn test_reads_are_pure() {
        let fs = VirtualFilesystem::new(DEFAULT_CONFIG);
        fs.write_block(fs.start_clusters(), &[0xFF; SECTOR_SIZE]);
        for lba in 0..fs.start_clusters() + 3 {
            assert_eq!(read(&fs, lba), read(&fs, lba));
        }
        assert_eq!(read(&fs, fs.start_clusters())[0], b'U');
    }
}

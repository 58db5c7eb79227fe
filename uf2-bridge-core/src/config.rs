//! Bridge configuration.
//!
//! Every layout and timing constant lives in one [`BridgeConfig`], checked
//! once at startup with [`BridgeConfig::validate`].

use crate::fs::{VirtualFile, ROOT_DIR_SECTORS, RESERVED_SECTORS};
use uf2_proto::{fat, BLOCK_SIZE, MAX_PAYLOAD, METADATA_OFFSET, PAYLOAD_OFFSET};

/// Fewest data clusters a volume needs to be read as FAT16.
pub const MIN_FAT16_CLUSTERS: u32 = 4085;

/// Configuration for an ATmega328P (Arduino Uno) target behind an Optiboot bootloader.
pub const DEFAULT_CONFIG: BridgeConfig = BridgeConfig {
    page_size: 128,
    flash_size: 32 * 1024,
    chunk_size: 64,
    disk_blocks: 8000,
    volume_label: "UNO BOOT",
    uf2_version: "v0.0.0",
    product_name: "Arduino Uno",
    board_id: "ATmega328p-Uno-r3",
    index_url: "https://pxt.io",
    reset_hold_ms: 10,
    bootloader_start_ms: 600,
    handshake_timeout_ms: 500,
    ack_poll_us: 100,
};

/// Layout, identity and timing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Target flash page size in bytes. Power of two.
    pub page_size: u16,
    /// Target flash size in bytes.
    pub flash_size: u32,
    /// Transport packet size the mass-storage driver delivers blocks in.
    pub chunk_size: usize,
    /// Number of logical blocks the virtual disk reports.
    pub disk_blocks: u32,
    /// FAT volume label (at most 11 bytes).
    pub volume_label: &'static str,
    /// Bootloader version shown in INFO_UF2.TXT.
    pub uf2_version: &'static str,
    /// Product name shown in INFO_UF2.TXT.
    pub product_name: &'static str,
    /// Board identifier shown in INFO_UF2.TXT.
    pub board_id: &'static str,
    /// Redirect target of INDEX.HTM.
    pub index_url: &'static str,
    /// How long the target reset line is held low.
    pub reset_hold_ms: u32,
    /// Time the target bootloader needs after reset before it listens.
    pub bootloader_start_ms: u32,
    /// Upper bound on one handshake.
    pub handshake_timeout_ms: u32,
    /// Acknowledgment polling interval while waiting on a handshake.
    pub ack_poll_us: u32,
}

/// Error type for configuration validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Page size is not a power of two or exceeds a block's payload area.
    PageSize,
    /// Flash size is zero or not a whole number of pages.
    FlashSize,
    /// Chunk size is not a power of two in `16..=512`.
    ChunkSize,
    /// Volume label longer than 11 bytes.
    VolumeLabel,
    /// Disk too small to hold FAT16's minimum cluster count, or too large for its 16-bit sector count.
    DiskSize,
    /// A generated file does not fit in one cluster.
    FileTooLarge,
    /// A zero timeout or poll interval.
    Timing,
}

impl BridgeConfig {
    /// log2 of the page size.
    #[inline]
    #[must_use]
    pub const fn page_shift(&self) -> u32 {
        self.page_size.trailing_zeros()
    }

    /// Number of flash pages on the target.
    #[inline]
    #[must_use]
    pub const fn flash_pages(&self) -> u32 {
        self.flash_size / self.page_size as u32
    }

    /// Sectors occupied by one FAT copy (two bytes per addressable block).
    #[inline]
    #[must_use]
    pub const fn sectors_per_fat(&self) -> u32 {
        (self.disk_blocks as u64 * 2).div_ceil(fat::SECTOR_SIZE as u64) as u32
    }

    /// First sector of the data region.
    #[inline]
    #[must_use]
    pub const fn data_start(&self) -> u32 {
        RESERVED_SECTORS + 2 * self.sectors_per_fat() + ROOT_DIR_SECTORS
    }

    /// Check every invariant the bridge and filesystem rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.page_size.is_power_of_two() || self.page_size as usize > MAX_PAYLOAD {
            return Err(ConfigError::PageSize);
        }

        if self.flash_size == 0 || self.flash_size % self.page_size as u32 != 0 {
            return Err(ConfigError::FlashSize);
        }

        // Header and metadata must never straddle a chunk boundary
        if !self.chunk_size.is_power_of_two()
            || self.chunk_size < PAYLOAD_OFFSET - METADATA_OFFSET
            || self.chunk_size > BLOCK_SIZE
        {
            return Err(ConfigError::ChunkSize);
        }

        if self.volume_label.len() > fat::NAME_LEN {
            return Err(ConfigError::VolumeLabel);
        }

        // Range first, so the FAT geometry below cannot overflow
        if self.disk_blocks < 2 || self.disk_blocks - 2 > u16::MAX as u32 {
            return Err(ConfigError::DiskSize);
        }

        // Hosts pick FAT12 below this many clusters
        if self.disk_blocks.saturating_sub(self.data_start()) < MIN_FAT16_CLUSTERS {
            return Err(ConfigError::DiskSize);
        }

        if VirtualFile::ALL
            .iter()
            .any(|file| file.len(self) > fat::SECTOR_SIZE)
        {
            return Err(ConfigError::FileTooLarge);
        }

        if self.handshake_timeout_ms == 0 || self.ack_poll_us == 0 {
            return Err(ConfigError::Timing);
        }

        Ok(())
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        DEFAULT_CONFIG
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(DEFAULT_CONFIG.validate(), Ok(()));
        assert_eq!(DEFAULT_CONFIG.page_shift(), 7);
        assert_eq!(DEFAULT_CONFIG.flash_pages(), 256);
        assert_eq!(DEFAULT_CONFIG.sectors_per_fat(), 32);
        assert_eq!(DEFAULT_CONFIG.data_start(), 69);
    }

    #[test]
    fn test_page_size_must_be_power_of_two() {
        let config = BridgeConfig {
            page_size: 96,
            ..DEFAULT_CONFIG
        };
        assert_eq!(config.validate(), Err(ConfigError::PageSize));

        let config = BridgeConfig {
            page_size: 512,
            flash_size: 64 * 1024,
            ..DEFAULT_CONFIG
        };
        assert_eq!(config.validate(), Err(ConfigError::PageSize));
    }

    #[test]
    fn test_flash_size_whole_pages() {
        let config = BridgeConfig {
            flash_size: 1000,
            ..DEFAULT_CONFIG
        };
        assert_eq!(config.validate(), Err(ConfigError::FlashSize));
    }

    #[test]
    fn test_chunk_size_bounds() {
        for chunk_size in [8, 48, 1024] {
            let config = BridgeConfig {
                chunk_size,
                ..DEFAULT_CONFIG
            };
            assert_eq!(config.validate(), Err(ConfigError::ChunkSize));
        }

        for chunk_size in [16, 32, 512] {
            let config = BridgeConfig {
                chunk_size,
                ..DEFAULT_CONFIG
            };
            assert_eq!(config.validate(), Ok(()));
        }
    }

    #[test]
    fn test_volume_label_length() {
        let config = BridgeConfig {
            volume_label: "TOO LONG LABEL",
            ..DEFAULT_CONFIG
        };
        assert_eq!(config.validate(), Err(ConfigError::VolumeLabel));
    }

    #[test]
    fn test_disk_size_bounds() {
        let config = BridgeConfig {
            disk_blocks: 10,
            ..DEFAULT_CONFIG
        };
        assert_eq!(config.validate(), Err(ConfigError::DiskSize));

        let config = BridgeConfig {
            disk_blocks: 70_000,
            ..DEFAULT_CONFIG
        };
        assert_eq!(config.validate(), Err(ConfigError::DiskSize));

        for disk_blocks in [0, 1, u32::MAX] {
            let config = BridgeConfig {
                disk_blocks,
                ..DEFAULT_CONFIG
            };
            assert_eq!(config.validate(), Err(ConfigError::DiskSize));
        }
    }

    #[test]
    fn test_disk_needs_fat16_cluster_count() {
        // 4122 blocks: 17 sectors per FAT, data from sector 39, 4083 clusters
        let config = BridgeConfig {
            disk_blocks: 4122,
            ..DEFAULT_CONFIG
        };
        assert_eq!(config.data_start(), 39);
        assert_eq!(config.validate(), Err(ConfigError::DiskSize));

        let config = BridgeConfig {
            disk_blocks: 4124,
            ..DEFAULT_CONFIG
        };
        assert_eq!(config.validate(), Ok(()));

        let config = BridgeConfig {
            disk_blocks: u16::MAX as u32 + 2,
            ..DEFAULT_CONFIG
        };
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_oversized_file_rejected() {
        const LONG_URL: &str = concat!(
            "https://example.com/",
            "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
            "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
            "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
            "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
            "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
        );
        let config = BridgeConfig {
            index_url: LONG_URL,
            ..DEFAULT_CONFIG
        };
        assert_eq!(config.validate(), Err(ConfigError::FileTooLarge));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = BridgeConfig {
            handshake_timeout_ms: 0,
            ..DEFAULT_CONFIG
        };
        assert_eq!(config.validate(), Err(ConfigError::Timing));
    }
}

//! Wire formats for the UF2 serial bridge.
//!
//! This crate holds every byte-level format the bridge speaks, with no
//! knowledge of USB, UARTs or timing:
//!
//! - [`block`]: UF2 flashing block header and metadata decoding
//!   ([`BlockHeader`], [`BlockMetadata`])
//! - [`stk500`]: STK500v1 page-programming commands ([`Command`])
//! - [`hf2`]: HF2 HID packet framing, command headers and reply messages
//!   ([`decode_packet`], [`MessageWriter`])
//! - [`fat`]: FAT16 boot sector and directory entry encoding
//!   ([`BootSector`], [`DirEntry`])
//!
//! # Example
//!
//! ```
//! use uf2_proto::{BlockHeader, Command, MAGIC};
//!
//! let mut block = [0u8; 512];
//! block[..8].copy_from_slice(&MAGIC);
//! block[12..14].copy_from_slice(&0x0100u16.to_le_bytes());
//!
//! let header = BlockHeader::decode(&block).unwrap();
//! assert!(header.is_actionable());
//!
//! let mut buf = [0u8; 4];
//! let len = Command::LoadAddress(header.word_address()).encode(&mut buf).unwrap();
//! assert_eq!(&buf[..len], &[0x55, 0x80, 0x00]);
//! ```
//!
//! # Features
//!
//! - **`std`**: Enable standard library support (for host testing)
//! - **`defmt`**: Enable defmt formatting (for embedded logging)
//!
//! # No-std Support
//!
//! This crate is `#![no_std]` by default and uses no heap allocations.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
extern crate std;

pub mod block;
pub mod fat;
pub mod hf2;
pub mod stk500;

// Re-export the commonly used items at crate root
pub use block::{
    BlockError, BlockHeader, BlockMetadata, BLOCK_SIZE, HEADER_LEN, MAGIC, MAX_PAYLOAD,
    METADATA_LEN, METADATA_OFFSET, PAYLOAD_OFFSET,
};
pub use fat::{BootSector, DirEntry, DIR_ENTRY_SIZE, SECTOR_SIZE};
pub use hf2::{decode_packet, serial_packet, CommandHeader, Inbound, MessageWriter, Packet};
pub use stk500::{Command, EncodeError, CRC_EOP, STK_OK};

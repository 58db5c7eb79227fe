//! Platform-agnostic core of the UF2 serial bridge.
//!
//! The bridge presents a USB mass-storage disk to the host and forwards
//! UF2 firmware images written to it into an STK500v1 bootloader on a
//! separate target MCU. A second channel (HF2 over HID) answers identity
//! queries and tunnels raw serial traffic to and from the target.
//!
//! Nothing here touches USB or UART registers; the firmware crate provides
//! those through `embedded-hal`, `embedded-io-async` and the
//! [`PacketSource`]/[`PacketSink`] traits.
//!
//! # Overview
//!
//! - [`config`]: Validated layout and timing constants ([`BridgeConfig`])
//! - [`fs`]: Computed read-only FAT16 disk ([`VirtualFilesystem`])
//! - [`transfer`]: Block-index bitmap and completion ([`TransferState`])
//! - [`program`]: UF2 block decoder and page programmer ([`ProgrammingBridge`])
//! - [`serial`]: Byte queues between UART and tasks ([`SerialBridge`])
//! - [`hf2`]: HF2 command dispatch and relay ([`Hf2Channel`])
//! - [`line`]: Virtual serial control lines ([`LineControl`])
//! - [`input`] / [`output`]: HID packet transport traits
//!
//! # Example
//!
//! ```rust
//! use uf2_bridge_core::{VirtualFilesystem, DEFAULT_CONFIG};
//!
//! DEFAULT_CONFIG.validate().unwrap();
//! let fs = VirtualFilesystem::new(DEFAULT_CONFIG);
//!
//! let mut block = [0u8; 512];
//! fs.read_block(0, &mut block);
//! assert_eq!(&block[510..], &[0x55, 0xAA]);
//! ```
//!
//! # Features
//!
//! - **`std`**: Enable standard library support (for host testing)
//! - **`defmt`**: Enable defmt formatting and log output (for embedded logging)
//!
//! # No-std Support
//!
//! This crate is `#![no_std]` by default and uses no heap allocations.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
extern crate std;

#[macro_use]
mod fmt;

pub mod config;
pub mod fs;
pub mod hf2;
pub mod input;
pub mod line;
pub mod output;
pub mod program;
pub mod serial;
pub mod transfer;

#[cfg(test)]
mod test_util;

// Re-export main types at crate root
pub use config::{BridgeConfig, ConfigError, DEFAULT_CONFIG};
pub use fs::{VirtualFile, VirtualFilesystem};
pub use hf2::{ChannelError, Hf2Channel, Hf2Processor};
pub use input::{InputError, PacketSource};
pub use line::{LineControl, LineError};
pub use output::{OutputError, PacketSink};
pub use program::{BlockOutcome, ProgramError, ProgrammingBridge};
pub use serial::{
    AckCounter, HostRelay, SerialBridge, SerialEndpoints, SerialRx, TunnelDrain, TunnelIn,
    RING_CAPACITY,
};
pub use transfer::{ExpectedBlocks, TransferState, MAX_TRACKED_BLOCKS};

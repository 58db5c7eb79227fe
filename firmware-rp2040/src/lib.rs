//! UF2 drag-and-drop programmer for RP2040.
//!
//! This crate is the embedded half of the UF2 bridge: it turns a Raspberry
//! Pi Pico into a USB drive that flashes an STK500v1 target (an Arduino Uno
//! running Optiboot, for instance) whenever a `.uf2` file is copied onto it.
//!
//! # Overview
//!
//! The firmware enumerates as a composite USB device with three functions:
//! 1. A mass-storage drive backed by a synthetic FAT16 volume. Reads are
//!    generated on the fly; writes are scanned for UF2 blocks, which are
//!    forwarded to the target page by page.
//! 2. A CDC ACM virtual serial port. DTR drives the target reset line and
//!    the line coding sets the target baud rate.
//! 3. A vendor HID interface speaking HF2. It answers `BININFO` and `INFO`
//!    and tunnels raw serial bytes in both directions.
//!
//! # Hardware Configuration
//!
//! | Function     | GPIO | Description |
//! |--------------|------|-------------|
//! | UART1 TX     | 8    | To target RX |
//! | UART1 RX     | 9    | From target TX |
//! | Target RESET | 10   | Active low, idles high |
//!
//! # Architecture
//!
//! The firmware uses the Embassy async runtime with six concurrent tasks:
//!
//! - **USB Task**: Runs the USB device stack
//! - **MSC Task**: Serves SCSI commands and drives the programmer
//! - **CDC Task**: Mirrors the virtual serial control lines onto the target
//! - **HID Task**: Handles HF2 packets and relays target output to the host
//! - **UART RX Task**: Feeds target bytes into the relay queue and ack counter
//! - **Tunnel Task**: Drains host tunnel bytes into the UART
//!
//! The tasks share a [`SerialBridge`]: two lock-free queues plus atomic
//! flags, so none of them block on each other.
//!
//! When a transfer completes the watchdog is armed and the whole device
//! reboots, which releases the target's reset line and re-enumerates the
//! drive with a fresh state.
//!
//! # Modules
//!
//! - [`uart`]: UART link to the target ([`TargetTx`])
//! - [`reset`]: Target reset line shared by MSC and CDC ([`ResetLine`])
//! - [`usb_msc`]: Bulk-only mass storage ([`MassStorage`])
//! - [`usb_cdc`]: Virtual serial port ([`VirtualSerial`])
//! - [`usb_hid`]: HF2 transport ([`UsbHidInput`], [`UsbHidOutput`])
//!
//! # Features
//!
//! - **`dev-panic`** (default): Use `panic-probe` for development (prints panic info via RTT)
//! - **`prod-panic`**: Use `panic-reset` for production (silent reset)
//!
//! # Re-exports
//!
//! This crate re-exports the public items of [`uf2_bridge_core`] that the
//! binary needs, so consumers only need to depend on this crate.

#![no_std]

pub use uf2_bridge_core::{
    BlockOutcome, BridgeConfig, ChannelError, ConfigError, Hf2Channel, Hf2Processor, InputError,
    LineControl, LineError, OutputError, PacketSink, PacketSource, ProgramError, ProgrammingBridge,
    SerialBridge, VirtualFilesystem, DEFAULT_CONFIG,
};

pub mod reset;
pub mod uart;
pub mod usb_cdc;
pub mod usb_hid;
pub mod usb_msc;

pub use reset::{ResetLine, SharedReset};

pub use uart::{receive_loop, tunnel_loop, SharedTx, TargetTx, TARGET_BAUD};
pub use usb_cdc::{configure_usb_cdc, VirtualSerial};
pub use usb_hid::{configure_usb_hid, UsbHidInput, UsbHidOutput};
pub use usb_msc::{configure_usb_msc, MassStorage, MscControl, MscEvent, Programmer};

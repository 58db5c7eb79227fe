//! Packet source trait and error types.

use core::future::Future;
use uf2_proto::Packet;

/// Error type for input operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InputError {
    /// USB/communication I/O error.
    Io,
    /// Report shorter than a full packet.
    Truncated,
    /// Host went away (USB reset or unplug).
    Disconnected,
}

/// Async trait for the inbound side of the HF2 channel.
///
/// Implemented by the HID report reader on hardware and by a queue of
/// canned packets in tests.
///
/// # `no_std` Compatibility
///
/// All implementations must be `#![no_std]` compatible with no heap allocation.
pub trait PacketSource {
    /// Wait for and receive the next 64-byte packet from the host.
    fn receive(&mut self) -> impl Future<Output = Result<Packet, InputError>>;

    /// Check if the host side is connected.
    fn is_connected(&self) -> bool;
}

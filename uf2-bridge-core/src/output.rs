//! Packet sink trait and error types.

use core::future::Future;
use uf2_proto::Packet;

/// Error type for output operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OutputError {
    /// USB/communication I/O error.
    Io,
    /// Device not ready (e.g., USB not enumerated).
    NotReady,
    /// Endpoint busy.
    Busy,
}

/// Async trait for the outbound side of the HF2 channel.
///
/// # `no_std` Compatibility
///
/// All implementations must be `#![no_std]` compatible with no heap allocation.
pub trait PacketSink {
    /// Send one packet to the host.
    ///
    /// May block until the previous packet has been sent.
    fn send(&mut self, packet: &Packet) -> impl Future<Output = Result<(), OutputError>>;

    /// Check if the sink can take a packet now.
    fn is_ready(&self) -> bool;
}

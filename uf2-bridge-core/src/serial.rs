//! Byte queues between the target UART and the rest of the bridge.
//!
//! [`SerialBridge`] owns two single-producer/single-consumer queues and the
//! two flags the UART receiver shares with the main loop. Splitting it hands
//! each side exactly one endpoint:
//!
//! ```text
//! UART rx ──► SerialRx ──► to_host ──► HostRelay ──► HF2 serial packets
//! HF2 tunnel ──► TunnelIn ──► to_target ──► TunnelDrain ──► UART tx
//! ```
//!
//! The receive side also counts `STK_OK` bytes in an [`AckCounter`], which
//! is how the programmer learns that a handshake completed.

use heapless::spsc::{Consumer, Producer, Queue};
use portable_atomic::{AtomicBool, AtomicU8, Ordering};
use uf2_proto::STK_OK;

/// Queue size in bytes. One slot is kept free, so 127 bytes fit.
pub const RING_CAPACITY: usize = 128;

/// Fixed-capacity byte queue.
pub type RingBuffer = Queue<u8, RING_CAPACITY>;

/// Handshake acknowledgment counter.
///
/// Incremented by the UART receiver, cleared and read by the programmer.
pub struct AckCounter(AtomicU8);

impl AckCounter {
    /// Create a cleared counter.
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    /// Reset to zero before a handshake.
    #[inline]
    pub fn clear(&self) {
        self.0.store(0, Ordering::Release);
    }

    /// Record one acknowledgment byte.
    #[inline]
    pub fn signal(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    /// Acknowledgments seen since the last clear.
    #[inline]
    #[must_use]
    pub fn count(&self) -> u8 {
        self.0.load(Ordering::Acquire)
    }

    /// Whether at least one acknowledgment arrived.
    #[inline]
    #[must_use]
    pub fn is_acked(&self) -> bool {
        self.count() != 0
    }
}

impl Default for AckCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// "Relay data waiting" flag raised by the receiver and consumed by the
/// HID relay, so target output goes out in batches.
pub struct FlushFlag(AtomicBool);

impl FlushFlag {
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    #[inline]
    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Clear the flag, returning whether it was set.
    #[inline]
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

impl Default for FlushFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Owner of both queues and the shared flags.
pub struct SerialBridge {
    to_target: RingBuffer,
    to_host: RingBuffer,
    ack: AckCounter,
    flush: FlushFlag,
}

impl SerialBridge {
    /// Create an empty bridge. Usable in a `static`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            to_target: Queue::new(),
            to_host: Queue::new(),
            ack: AckCounter::new(),
            flush: FlushFlag::new(),
        }
    }

    /// Split into single-owner endpoints.
    pub fn split(&mut self) -> SerialEndpoints<'_> {
        let (host_tx, host_rx) = self.to_host.split();
        let (target_tx, target_rx) = self.to_target.split();

        SerialEndpoints {
            rx: SerialRx {
                to_host: host_tx,
                ack: &self.ack,
                flush: &self.flush,
            },
            relay: HostRelay {
                to_host: host_rx,
                flush: &self.flush,
            },
            tunnel_in: TunnelIn { to_target: target_tx },
            tunnel_drain: TunnelDrain { to_target: target_rx },
            ack: &self.ack,
        }
    }
}

impl Default for SerialBridge {
    fn default() -> Self {
        Self::new()
    }
}

/// The endpoints of a split [`SerialBridge`].
pub struct SerialEndpoints<'a> {
    /// UART receive side.
    pub rx: SerialRx<'a>,
    /// Target-to-host relay consumer.
    pub relay: HostRelay<'a>,
    /// Host-to-target tunnel producer.
    pub tunnel_in: TunnelIn<'a>,
    /// Host-to-target tunnel consumer, drained into the UART.
    pub tunnel_drain: TunnelDrain<'a>,
    /// Handshake acknowledgments, read by the programmer.
    pub ack: &'a AckCounter,
}

/// Producer side for bytes arriving from the target.
pub struct SerialRx<'a> {
    to_host: Producer<'a, u8, RING_CAPACITY>,
    ack: &'a AckCounter,
    flush: &'a FlushFlag,
}

impl SerialRx<'_> {
    /// Handle one received byte.
    ///
    /// Bytes that do not fit are dropped. The acknowledgment is counted
    /// either way.
    pub fn on_byte(&mut self, byte: u8) {
        if byte == STK_OK {
            self.ack.signal();
        }
        if self.to_host.enqueue(byte).is_err() {
            trace!("relay queue full, dropped {=u8:#x}", byte);
        }
        self.flush.request();
    }
}

/// Consumer side for bytes headed to the host.
pub struct HostRelay<'a> {
    to_host: Consumer<'a, u8, RING_CAPACITY>,
    flush: &'a FlushFlag,
}

impl HostRelay<'_> {
    /// Consume a pending flush request.
    #[inline]
    pub fn take_flush(&self) -> bool {
        self.flush.take()
    }

    /// Re-arm the flush request for the next opportunity.
    #[inline]
    pub fn request_flush(&self) {
        self.flush.request();
    }

    /// Bytes waiting to be relayed.
    #[inline]
    #[must_use]
    pub fn pending(&self) -> usize {
        self.to_host.len()
    }

    /// Move up to `out.len()` queued bytes into `out`.
    pub fn fill(&mut self, out: &mut [u8]) -> usize {
        let mut n = 0;
        while n < out.len() {
            match self.to_host.dequeue() {
                Some(byte) => {
                    out[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }
}

/// Producer side for tunnel bytes from the host.
pub struct TunnelIn<'a> {
    to_target: Producer<'a, u8, RING_CAPACITY>,
}

impl TunnelIn<'_> {
    /// Queue as many bytes as fit, returning how many were accepted.
    pub fn push_slice(&mut self, bytes: &[u8]) -> usize {
        let mut accepted = 0;
        for &byte in bytes {
            if self.to_target.enqueue(byte).is_err() {
                break;
            }
            accepted += 1;
        }
        accepted
    }
}

/// Consumer side feeding the UART transmitter.
pub struct TunnelDrain<'a> {
    to_target: Consumer<'a, u8, RING_CAPACITY>,
}

impl TunnelDrain<'_> {
    #[inline]
    pub fn pop(&mut self) -> Option<u8> {
        self.to_target.dequeue()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.to_target.ready()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uf2_proto::stk500::STK_INSYNC;

    #[test]
    fn test_only_stk_ok_counts_as_ack() {
        let mut bridge = SerialBridge::new();
        let mut ends = bridge.split();

        ends.rx.on_byte(STK_INSYNC);
        assert!(!ends.ack.is_acked());

        ends.rx.on_byte(STK_OK);
        assert_eq!(ends.ack.count(), 1);

        ends.ack.clear();
        assert!(!ends.ack.is_acked());
    }

    #[test]
    fn test_received_bytes_are_relayed_in_order() {
        let mut bridge = SerialBridge::new();
        let mut ends = bridge.split();

        for byte in [STK_INSYNC, STK_OK, b'x'] {
            ends.rx.on_byte(byte);
        }

        assert!(ends.relay.take_flush());
        assert!(!ends.relay.take_flush());
        assert_eq!(ends.relay.pending(), 3);

        let mut out = [0u8; 8];
        assert_eq!(ends.relay.fill(&mut out), 3);
        assert_eq!(&out[..3], &[STK_INSYNC, STK_OK, b'x']);
        assert_eq!(ends.relay.pending(), 0);
    }

    #[test]
    fn test_relay_overflow_drops_but_still_acks() {
        let mut bridge = SerialBridge::new();
        let mut ends = bridge.split();

        for _ in 0..RING_CAPACITY - 1 {
            ends.rx.on_byte(b'.');
        }
        ends.rx.on_byte(STK_OK);

        assert!(ends.ack.is_acked());
        assert_eq!(ends.relay.pending(), RING_CAPACITY - 1);
    }

    #[test]
    fn test_fill_respects_output_length() {
        let mut bridge = SerialBridge::new();
        let mut ends = bridge.split();

        for byte in 0..10u8 {
            ends.rx.on_byte(byte);
        }

        let mut out = [0u8; 4];
        assert_eq!(ends.relay.fill(&mut out), 4);
        assert_eq!(out, [0, 1, 2, 3]);
        assert_eq!(ends.relay.pending(), 6);
    }

    #[test]
    fn test_tunnel_accepts_until_full() {
        let mut bridge = SerialBridge::new();
        let mut ends = bridge.split();

        let bytes = [0xAAu8; RING_CAPACITY + 10];
        assert_eq!(ends.tunnel_in.push_slice(&bytes), RING_CAPACITY - 1);

        let mut drained = 0;
        while ends.tunnel_drain.pop().is_some() {
            drained += 1;
        }
        assert_eq!(drained, RING_CAPACITY - 1);
        assert!(ends.tunnel_drain.is_empty());
    }
}

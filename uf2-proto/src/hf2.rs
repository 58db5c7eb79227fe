//! HF2 (HID Flashing Format) packet framing.
//!
//! Every HID report is 64 bytes. The first byte is a header:
//!
//! ```text
//! bit 7..6  packet type
//!           0b00 inner command packet (more follow)
//!           0b01 final command packet
//!           0b10 serial stdout
//!           0b11 serial stderr
//! bit 5..0  payload length (0..=63)
//! ```
//!
//! A command message starts with a u32 command id, a u16 tag and two
//! reserved bytes. A reply message starts with the echoed tag, a status
//! byte and a status-info byte.

use core::fmt;

/// Size of one HID report.
pub const PACKET_SIZE: usize = 64;

/// Payload bytes available after the header byte.
pub const MAX_PACKET_PAYLOAD: usize = PACKET_SIZE - 1;

/// Header bits selecting the packet type.
pub const TYPE_MASK: u8 = 0xC0;

/// Header bits holding the payload length.
pub const LEN_MASK: u8 = 0x3F;

/// Inner command packet, more of the message follows.
pub const PACKET_INNER: u8 = 0x00;

/// Last packet of a command or reply message.
pub const PACKET_FINAL: u8 = 0x40;

/// Serial data, standard output.
pub const PACKET_SERIAL_OUT: u8 = 0x80;

/// Serial data, standard error.
pub const PACKET_SERIAL_ERR: u8 = 0xC0;

/// Report bootloader mode, page size and flash geometry.
pub const CMD_BININFO: u32 = 0x0001;

/// Report the INFO_UF2.TXT identity string.
pub const CMD_INFO: u32 = 0x0002;

/// BININFO mode value: running the bootloader.
pub const MODE_BOOTLOADER: u32 = 0x01;

/// Reply status: success.
pub const STATUS_OK: u8 = 0x00;

/// Reply status: command not understood.
pub const STATUS_INVALID_CMD: u8 = 0x01;

/// Size of the command header (id, tag, reserved).
pub const COMMAND_HEADER_LEN: usize = 8;

/// Largest reply message the device assembles.
pub const MAX_MESSAGE_SIZE: usize = 256;

/// One HID report.
pub type Packet = [u8; PACKET_SIZE];

/// Structured command header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CommandHeader {
    /// Command identifier.
    pub command_id: u32,
    /// Tag echoed back in the reply.
    pub tag: u16,
}

impl CommandHeader {
    /// Decode from the bytes following the packet header.
    #[must_use]
    pub fn decode(bytes: &[u8; COMMAND_HEADER_LEN]) -> Self {
        Self {
            command_id: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            tag: u16::from_le_bytes([bytes[4], bytes[5]]),
        }
    }
}

/// Decoded inbound packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound<'a> {
    /// Raw bytes for the target (tunnel).
    Serial(&'a [u8]),
    /// Structured command with its data bytes.
    Command(CommandHeader, &'a [u8]),
}

/// Classify an inbound packet by its header byte.
///
/// Both serial types are tunnel data. Inner and final packets are read as
/// a single-packet command regardless of the length bits.
#[must_use]
pub fn decode_packet(packet: &Packet) -> Inbound<'_> {
    let header = packet[0];

    if let PACKET_SERIAL_OUT | PACKET_SERIAL_ERR = header & TYPE_MASK {
        let len = (header & LEN_MASK) as usize;
        return Inbound::Serial(&packet[1..1 + len]);
    }

    let mut raw = [0u8; COMMAND_HEADER_LEN];
    raw.copy_from_slice(&packet[1..1 + COMMAND_HEADER_LEN]);
    Inbound::Command(
        CommandHeader::decode(&raw),
        &packet[1 + COMMAND_HEADER_LEN..],
    )
}

/// Build a serial-out packet from up to 63 bytes of `data`.
///
/// Returns the packet and the number of bytes consumed.
#[must_use]
pub fn serial_packet(data: &[u8]) -> (Packet, usize) {
    let len = data.len().min(MAX_PACKET_PAYLOAD);
    let mut packet = [0u8; PACKET_SIZE];
    packet[0] = PACKET_SERIAL_OUT | len as u8;
    packet[1..1 + len].copy_from_slice(&data[..len]);
    (packet, len)
}

/// Fixed-capacity reply message builder.
///
/// Implements [`fmt::Write`] so text replies can be rendered in place.
pub struct MessageWriter {
    buf: [u8; MAX_MESSAGE_SIZE],
    len: usize,
}

impl MessageWriter {
    /// Start a reply for `tag` with the given status.
    #[must_use]
    pub fn reply(tag: u16, status: u8) -> Self {
        let mut writer = Self {
            buf: [0u8; MAX_MESSAGE_SIZE],
            len: 0,
        };
        let [lo, hi] = tag.to_le_bytes();
        // Header always fits in an empty buffer
        let _ = writer.extend(&[lo, hi, status, 0]);
        writer
    }

    /// Append raw bytes.
    pub fn extend(&mut self, bytes: &[u8]) -> Result<(), fmt::Error> {
        let end = self.len + bytes.len();
        if end > MAX_MESSAGE_SIZE {
            return Err(fmt::Error);
        }
        self.buf[self.len..end].copy_from_slice(bytes);
        self.len = end;
        Ok(())
    }

    /// Append a little-endian u32.
    pub fn push_u32(&mut self, value: u32) -> Result<(), fmt::Error> {
        self.extend(&value.to_le_bytes())
    }

    /// Message bytes written so far.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Split the message into HID packets.
    #[must_use]
    pub fn packets(&self) -> MessagePackets<'_> {
        MessagePackets {
            data: self.as_bytes(),
            done: false,
        }
    }
}

impl fmt::Write for MessageWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.extend(s.as_bytes())
    }
}

/// Iterator over the packets of one message.
///
/// Full 63-byte packets are emitted as [`PACKET_INNER`]; the remainder
/// (possibly empty) goes out as [`PACKET_FINAL`].
pub struct MessagePackets<'a> {
    data: &'a [u8],
    done: bool,
}

impl Iterator for MessagePackets<'_> {
    type Item = Packet;

    fn next(&mut self) -> Option<Packet> {
        if self.done {
            return None;
        }

        let mut packet = [0u8; PACKET_SIZE];
        if self.data.len() > MAX_PACKET_PAYLOAD {
            packet[0] = PACKET_INNER | MAX_PACKET_PAYLOAD as u8;
            packet[1..].copy_from_slice(&self.data[..MAX_PACKET_PAYLOAD]);
            self.data = &self.data[MAX_PACKET_PAYLOAD..];
        } else {
            let len = self.data.len();
            packet[0] = PACKET_FINAL | len as u8;
            packet[1..1 + len].copy_from_slice(self.data);
            self.data = &[];
            self.done = true;
        }
        Some(packet)
    }
}

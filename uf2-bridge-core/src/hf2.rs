//! HF2 command processing and serial relay over HID.
//!
//! [`Hf2Processor`] turns one inbound packet into either tunnel bytes for
//! the target or a reply message. [`Hf2Channel`] wires it to a
//! [`PacketSource`]/[`PacketSink`] pair and also relays bytes the target
//! sent back to the host.

use crate::config::BridgeConfig;
use crate::fs::VirtualFile;
use crate::input::{InputError, PacketSource};
use crate::output::{OutputError, PacketSink};
use crate::serial::{HostRelay, TunnelIn};
use core::fmt;
use uf2_proto::hf2::{
    CMD_BININFO, CMD_INFO, MAX_PACKET_PAYLOAD, MODE_BOOTLOADER, STATUS_INVALID_CMD, STATUS_OK,
};
use uf2_proto::{decode_packet, serial_packet, CommandHeader, Inbound, MessageWriter, Packet};

/// Handles inbound HF2 packets.
pub struct Hf2Processor<'a> {
    tunnel: TunnelIn<'a>,
    config: BridgeConfig,
}

impl<'a> Hf2Processor<'a> {
    pub fn new(tunnel: TunnelIn<'a>, config: BridgeConfig) -> Self {
        Self { tunnel, config }
    }

    /// Process one packet.
    ///
    /// Tunnel packets are queued for the target and produce no reply.
    /// Every command produces exactly one reply message.
    pub fn handle(&mut self, packet: &Packet) -> Option<MessageWriter> {
        match decode_packet(packet) {
            Inbound::Serial(bytes) => {
                let accepted = self.tunnel.push_slice(bytes);
                if accepted < bytes.len() {
                    warn!("tunnel full, dropped {=usize} bytes", bytes.len() - accepted);
                }
                None
            }
            Inbound::Command(header, _data) => Some(self.command(header)),
        }
    }

    fn command(&self, header: CommandHeader) -> MessageWriter {
        let tag = header.tag;
        let reply = match header.command_id {
            CMD_BININFO => self.bin_info(tag),
            CMD_INFO => self.info(tag),
            other => {
                debug!("unknown command {=u32:#x}", other);
                Ok(MessageWriter::reply(tag, STATUS_INVALID_CMD))
            }
        };

        reply.unwrap_or_else(|_| {
            warn!("reply to {=u32:#x} overflowed", header.command_id);
            MessageWriter::reply(tag, STATUS_INVALID_CMD)
        })
    }

    fn bin_info(&self, tag: u16) -> Result<MessageWriter, fmt::Error> {
        let mut reply = MessageWriter::reply(tag, STATUS_OK);
        reply.push_u32(MODE_BOOTLOADER)?;
        reply.push_u32(u32::from(self.config.page_size))?;
        reply.push_u32(self.config.flash_pages())?;
        reply.push_u32(MAX_PACKET_PAYLOAD as u32)?;
        Ok(reply)
    }

    fn info(&self, tag: u16) -> Result<MessageWriter, fmt::Error> {
        let mut reply = MessageWriter::reply(tag, STATUS_OK);
        VirtualFile::Info.render(&self.config, &mut reply)?;
        Ok(reply)
    }
}

/// Error type for channel operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelError {
    /// Error from the packet source.
    Input(InputError),
    /// Error from the packet sink.
    Output(OutputError),
}

/// Full HF2 channel: command dispatch plus target-to-host relay.
pub struct Hf2Channel<'a, I, O> {
    input: I,
    output: O,
    processor: Hf2Processor<'a>,
    relay: HostRelay<'a>,
}

impl<'a, I: PacketSource, O: PacketSink> Hf2Channel<'a, I, O> {
    pub fn new(input: I, output: O, processor: Hf2Processor<'a>, relay: HostRelay<'a>) -> Self {
        Self {
            input,
            output,
            processor,
            relay,
        }
    }

    /// Receive one packet and handle it.
    pub async fn process_one(&mut self) -> Result<(), ChannelError> {
        let packet = self.input.receive().await.map_err(ChannelError::Input)?;
        self.dispatch(&packet).await
    }

    /// Handle an already received packet, sending any reply.
    pub async fn dispatch(&mut self, packet: &Packet) -> Result<(), ChannelError> {
        if let Some(reply) = self.processor.handle(packet) {
            for out in reply.packets() {
                self.output.send(&out).await.map_err(ChannelError::Output)?;
            }
        }
        Ok(())
    }

    /// Relay up to one packet of target output if a flush is pending.
    ///
    /// Leftover bytes re-arm the flush for the next call instead of
    /// blocking here. Returns whether a packet was sent.
    pub async fn poll_relay(&mut self) -> Result<bool, ChannelError> {
        if !self.output.is_ready() || !self.relay.take_flush() {
            return Ok(false);
        }

        let mut buf = [0u8; MAX_PACKET_PAYLOAD];
        let n = self.relay.fill(&mut buf);
        if n == 0 {
            return Ok(false);
        }

        if self.relay.pending() > 0 {
            self.relay.request_flush();
        }

        let (packet, _) = serial_packet(&buf[..n]);
        self.output
            .send(&packet)
            .await
            .map_err(ChannelError::Output)?;
        Ok(true)
    }

    /// Get a reference to the packet source.
    pub fn input(&self) -> &I {
        &self.input
    }

    /// Get a mutable reference to the packet source.
    pub fn input_mut(&mut self) -> &mut I {
        &mut self.input
    }

    /// Get a reference to the packet sink.
    pub fn output(&self) -> &O {
        &self.output
    }

    /// Get a mutable reference to the packet sink.
    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }

    /// Decompose the channel into its source and sink.
    pub fn into_parts(self) -> (I, O) {
        (self.input, self.output)
    }
}

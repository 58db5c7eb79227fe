//! USB mass storage (Bulk-Only Transport, SCSI transparent command set).
//!
//! Only the commands hosts issue against a small removable disk are
//! implemented. Reads are served from the [`VirtualFilesystem`]; every
//! written block is also handed to the [`ProgrammingBridge`], which decides
//! whether it is part of a firmware image.
//!
//! ```text
//! host ──CBW──► ep_out
//!      ◄─data── ep_in   (READ, INQUIRY, ...)
//!      ──data─► ep_out  (WRITE)
//!      ◄─CSW─── ep_in
//! ```

use defmt::{debug, info, warn};
use embassy_rp::peripherals::USB;
use embassy_rp::usb::Driver;
use embassy_time::Delay;
use embassy_usb::control::{InResponse, OutResponse, Recipient, Request, RequestType};
use embassy_usb::driver::{Endpoint as _, EndpointError, EndpointIn as _, EndpointOut as _};
use embassy_usb::types::InterfaceNumber;
use embassy_usb::{Builder, Handler};
use uf2_bridge_core::{BlockOutcome, ProgramError, ProgrammingBridge, VirtualFilesystem};
use uf2_proto::BLOCK_SIZE;

use crate::reset::ResetLine;
use crate::uart::TargetTx;

type UsbDriver = Driver<'static, USB>;
type EpIn = <UsbDriver as embassy_usb::driver::Driver<'static>>::EndpointIn;
type EpOut = <UsbDriver as embassy_usb::driver::Driver<'static>>::EndpointOut;

/// The programmer as wired on this board.
pub type Programmer = ProgrammingBridge<'static, TargetTx, ResetLine, Delay>;

/// Bulk endpoint packet size (full speed).
pub const MAX_PACKET_SIZE: u16 = 64;

const CLASS_MASS_STORAGE: u8 = 0x08;
const SUBCLASS_SCSI: u8 = 0x06;
const PROTOCOL_BULK_ONLY: u8 = 0x50;

const REQ_GET_MAX_LUN: u8 = 0xFE;
const REQ_BULK_ONLY_RESET: u8 = 0xFF;

const CBW_SIGNATURE: u32 = 0x4342_5355;
const CSW_SIGNATURE: u32 = 0x5342_5355;
const CBW_LEN: usize = 31;
const CSW_LEN: usize = 13;
const CBW_DIR_IN: u8 = 0x80;

const CSW_PASSED: u8 = 0x00;
const CSW_FAILED: u8 = 0x01;

const SCSI_TEST_UNIT_READY: u8 = 0x00;
const SCSI_REQUEST_SENSE: u8 = 0x03;
const SCSI_INQUIRY: u8 = 0x12;
const SCSI_MODE_SENSE_6: u8 = 0x1A;
const SCSI_START_STOP_UNIT: u8 = 0x1B;
const SCSI_PREVENT_ALLOW_REMOVAL: u8 = 0x1E;
const SCSI_READ_FORMAT_CAPACITIES: u8 = 0x23;
const SCSI_READ_CAPACITY_10: u8 = 0x25;
const SCSI_READ_10: u8 = 0x28;
const SCSI_WRITE_10: u8 = 0x2A;
const SCSI_VERIFY_10: u8 = 0x2F;

const SENSE_ILLEGAL_REQUEST: u8 = 0x05;
const ASC_INVALID_COMMAND: u8 = 0x20;
const ASC_LBA_OUT_OF_RANGE: u8 = 0x21;

const INQUIRY_VENDOR: &[u8; 8] = b"UF2     ";
const INQUIRY_PRODUCT: &[u8; 16] = b"STK500 Bridge   ";
const INQUIRY_REVISION: &[u8; 4] = b"0.1 ";

/// Something the main loop should react to after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum MscEvent {
    /// A WRITE completed a firmware transfer.
    TransferComplete,
    /// Programming failed during a WRITE.
    ProgramFailed(ProgramError),
}

/// Answers the two class-specific control requests of Bulk-Only Transport.
pub struct MscControl {
    interface: InterfaceNumber,
}

impl MscControl {
    fn is_ours(&self, req: &Request) -> bool {
        req.request_type == RequestType::Class
            && req.recipient == Recipient::Interface
            && req.index == u16::from(self.interface.0)
    }
}

impl Handler for MscControl {
    fn control_out(&mut self, req: Request, _data: &[u8]) -> Option<OutResponse> {
        if !self.is_ours(&req) || req.request != REQ_BULK_ONLY_RESET {
            return None;
        }
        debug!("bulk-only reset");
        Some(OutResponse::Accepted)
    }

    fn control_in<'a>(&'a mut self, req: Request, buf: &'a mut [u8]) -> Option<InResponse<'a>> {
        if !self.is_ours(&req) || req.request != REQ_GET_MAX_LUN {
            return None;
        }
        if buf.is_empty() {
            return Some(InResponse::Rejected);
        }
        // Single LUN
        buf[0] = 0;
        Some(InResponse::Accepted(&buf[..1]))
    }
}

/// Decoded Command Block Wrapper.
struct CommandBlock {
    tag: u32,
    data_len: u32,
    dir_in: bool,
    cb: [u8; 16],
}

impl CommandBlock {
    fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != CBW_LEN {
            return None;
        }
        let word = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        if word(0) != CBW_SIGNATURE {
            return None;
        }

        let mut cb = [0u8; 16];
        cb.copy_from_slice(&bytes[15..31]);
        Some(Self {
            tag: word(4),
            data_len: word(8),
            dir_in: bytes[12] & CBW_DIR_IN != 0,
            cb,
        })
    }

    fn opcode(&self) -> u8 {
        self.cb[0]
    }

    /// Logical block address and block count of a READ(10)/WRITE(10).
    fn lba_count(&self) -> (u32, u32) {
        let lba = u32::from_be_bytes([self.cb[2], self.cb[3], self.cb[4], self.cb[5]]);
        let count = u16::from_be_bytes([self.cb[7], self.cb[8]]);
        (lba, u32::from(count))
    }
}

#[derive(Clone, Copy, Default)]
struct Sense {
    key: u8,
    asc: u8,
}

/// The mass-storage function: endpoints plus the disk behind them.
pub struct MassStorage {
    ep_in: EpIn,
    ep_out: EpOut,
    fs: VirtualFilesystem,
    sense: Sense,
}

/// Add the mass-storage interface to the USB builder.
///
/// The returned control handler must be registered with
/// [`Builder::handler`].
pub fn configure_usb_msc(
    builder: &mut Builder<'static, UsbDriver>,
    fs: VirtualFilesystem,
) -> (MassStorage, MscControl) {
    let mut func = builder.function(CLASS_MASS_STORAGE, SUBCLASS_SCSI, PROTOCOL_BULK_ONLY);
    let mut iface = func.interface();
    let interface = iface.interface_number();
    let mut alt = iface.alt_setting(CLASS_MASS_STORAGE, SUBCLASS_SCSI, PROTOCOL_BULK_ONLY, None);

    let ep_out = alt.endpoint_bulk_out(None, MAX_PACKET_SIZE);
    let ep_in = alt.endpoint_bulk_in(None, MAX_PACKET_SIZE);
    drop(func);

    (
        MassStorage {
            ep_in,
            ep_out,
            fs,
            sense: Sense::default(),
        },
        MscControl { interface },
    )
}

impl MassStorage {
    /// Wait until the host has configured the interface.
    pub async fn wait_enabled(&mut self) {
        self.ep_out.wait_enabled().await;
    }

    /// Handle one CBW, its data phase and its CSW.
    pub async fn serve_one(
        &mut self,
        bridge: &mut Programmer,
    ) -> Result<Option<MscEvent>, EndpointError> {
        let mut packet = [0u8; MAX_PACKET_SIZE as usize];
        let n = self.ep_out.read(&mut packet).await?;

        let Some(cbw) = CommandBlock::parse(&packet[..n]) else {
            warn!("invalid CBW ({} bytes)", n);
            return Ok(None);
        };

        let mut event = None;
        let (status, residue) = match cbw.opcode() {
            SCSI_TEST_UNIT_READY
            | SCSI_PREVENT_ALLOW_REMOVAL
            | SCSI_START_STOP_UNIT
            | SCSI_VERIFY_10 => (CSW_PASSED, cbw.data_len),
            SCSI_INQUIRY => self.inquiry(&cbw).await?,
            SCSI_REQUEST_SENSE => self.request_sense(&cbw).await?,
            SCSI_MODE_SENSE_6 => self.data_in(&cbw, &[0x03, 0x00, 0x00, 0x00]).await?,
            SCSI_READ_CAPACITY_10 => self.read_capacity(&cbw).await?,
            SCSI_READ_FORMAT_CAPACITIES => self.read_format_capacities(&cbw).await?,
            SCSI_READ_10 => self.read_10(&cbw).await?,
            SCSI_WRITE_10 => {
                let (status, residue, write_event) = self.write_10(&cbw, bridge).await?;
                event = write_event;
                (status, residue)
            }
            other => {
                debug!("unsupported SCSI opcode {=u8:#x}", other);
                self.fail(SENSE_ILLEGAL_REQUEST, ASC_INVALID_COMMAND);
                self.skip_data(&cbw).await?;
                (CSW_FAILED, cbw.data_len)
            }
        };

        self.send_status(cbw.tag, residue, status).await?;
        Ok(event)
    }

    fn fail(&mut self, key: u8, asc: u8) {
        self.sense = Sense { key, asc };
    }

    /// Send a response, truncated to what the host asked for.
    async fn data_in(
        &mut self,
        cbw: &CommandBlock,
        response: &[u8],
    ) -> Result<(u8, u32), EndpointError> {
        let len = response.len().min(cbw.data_len as usize);
        for chunk in response[..len].chunks(MAX_PACKET_SIZE as usize) {
            self.ep_in.write(chunk).await?;
        }
        Ok((CSW_PASSED, cbw.data_len - len as u32))
    }

    /// Consume an unwanted OUT data phase.
    async fn skip_data(&mut self, cbw: &CommandBlock) -> Result<(), EndpointError> {
        if cbw.dir_in {
            return Ok(());
        }
        let mut remaining = cbw.data_len as usize;
        let mut scratch = [0u8; MAX_PACKET_SIZE as usize];
        while remaining > 0 {
            let n = self.ep_out.read(&mut scratch).await?;
            if n == 0 {
                break;
            }
            remaining = remaining.saturating_sub(n);
        }
        Ok(())
    }

    async fn inquiry(&mut self, cbw: &CommandBlock) -> Result<(u8, u32), EndpointError> {
        let mut response = [0u8; 36];
        response[0] = 0x00; // direct access block device
        response[1] = 0x80; // removable
        response[2] = 0x04; // SPC-2
        response[3] = 0x02; // response data format
        response[4] = (response.len() - 5) as u8;
        response[8..16].copy_from_slice(INQUIRY_VENDOR);
        response[16..32].copy_from_slice(INQUIRY_PRODUCT);
        response[32..36].copy_from_slice(INQUIRY_REVISION);
        self.data_in(cbw, &response).await
    }

    async fn request_sense(&mut self, cbw: &CommandBlock) -> Result<(u8, u32), EndpointError> {
        let mut response = [0u8; 18];
        response[0] = 0x70; // current errors, fixed format
        response[2] = self.sense.key;
        response[7] = (response.len() - 8) as u8;
        response[12] = self.sense.asc;
        self.sense = Sense::default();
        self.data_in(cbw, &response).await
    }

    async fn read_capacity(&mut self, cbw: &CommandBlock) -> Result<(u8, u32), EndpointError> {
        let mut response = [0u8; 8];
        response[..4].copy_from_slice(&(self.fs.block_count() - 1).to_be_bytes());
        response[4..].copy_from_slice(&(BLOCK_SIZE as u32).to_be_bytes());
        self.data_in(cbw, &response).await
    }

    async fn read_format_capacities(
        &mut self,
        cbw: &CommandBlock,
    ) -> Result<(u8, u32), EndpointError> {
        let mut response = [0u8; 12];
        response[3] = 8; // capacity list length
        response[4..8].copy_from_slice(&self.fs.block_count().to_be_bytes());
        response[8] = 0x02; // formatted media
        response[9..12].copy_from_slice(&(BLOCK_SIZE as u32).to_be_bytes()[1..]);
        self.data_in(cbw, &response).await
    }

    async fn read_10(&mut self, cbw: &CommandBlock) -> Result<(u8, u32), EndpointError> {
        let (lba, count) = cbw.lba_count();
        if lba.saturating_add(count) > self.fs.block_count() {
            self.fail(SENSE_ILLEGAL_REQUEST, ASC_LBA_OUT_OF_RANGE);
            return Ok((CSW_FAILED, cbw.data_len));
        }

        let mut block = [0u8; BLOCK_SIZE];
        for i in 0..count {
            self.fs.read_block(lba + i, &mut block);
            for chunk in block.chunks(MAX_PACKET_SIZE as usize) {
                self.ep_in.write(chunk).await?;
            }
        }
        Ok((
            CSW_PASSED,
            cbw.data_len.saturating_sub(count * BLOCK_SIZE as u32),
        ))
    }

    /// Receive written blocks and feed each one to the programmer.
    ///
    /// Programming errors never fail the SCSI command; the host only ever
    /// sees a stalled or completed transfer.
    async fn write_10(
        &mut self,
        cbw: &CommandBlock,
        bridge: &mut Programmer,
    ) -> Result<(u8, u32, Option<MscEvent>), EndpointError> {
        let (lba, count) = cbw.lba_count();
        let mut event = None;
        let mut block = [0u8; BLOCK_SIZE];

        bridge.discard_partial_block();
        for i in 0..count {
            self.read_block(&mut block).await?;
            self.fs.write_block(lba + i, &block);

            // Once the transfer completed or failed only drain the host
            if event.is_some() {
                continue;
            }

            match bridge.write_block(&block).await {
                Ok(BlockOutcome::TransferComplete) => {
                    info!("firmware transfer complete");
                    event = Some(MscEvent::TransferComplete);
                }
                Ok(BlockOutcome::Accepted { index }) => {
                    debug!("block {=u32} written ({=u32} so far)", index, bridge.written_count());
                }
                Ok(BlockOutcome::Ignored) => {}
                Err(e) => {
                    warn!("programming failed at lba {=u32}: {}", lba + i, e);
                    event = Some(MscEvent::ProgramFailed(e));
                }
            }
        }

        Ok((
            CSW_PASSED,
            cbw.data_len.saturating_sub(count * BLOCK_SIZE as u32),
            event,
        ))
    }

    /// Read one 512-byte block from the bulk OUT endpoint.
    async fn read_block(&mut self, buf: &mut [u8; BLOCK_SIZE]) -> Result<(), EndpointError> {
        let mut offset = 0;
        while offset < BLOCK_SIZE {
            let n = self.ep_out.read(&mut buf[offset..]).await?;
            offset += n;
        }
        Ok(())
    }

    async fn send_status(&mut self, tag: u32, residue: u32, status: u8) -> Result<(), EndpointError> {
        let mut csw = [0u8; CSW_LEN];
        csw[0..4].copy_from_slice(&CSW_SIGNATURE.to_le_bytes());
        csw[4..8].copy_from_slice(&tag.to_le_bytes());
        csw[8..12].copy_from_slice(&residue.to_le_bytes());
        csw[12] = status;
        self.ep_in.write(&csw).await
    }
}

//! ProgrammingBridge: turns flashing blocks into STK500v1 page writes.
//!
//! Blocks arrive from the mass-storage driver either whole
//! ([`ProgrammingBridge::write_block`]) or one transport chunk at a time
//! ([`ProgrammingBridge::process_chunk`]). The bridge keeps a byte cursor
//! into the current block, so chunk boundaries never need to line up with
//! the header, metadata or page boundaries.
//!
//! For every page of forwarded payload the target sees:
//!
//! ```text
//! 55 <addr lo> <addr hi> 20        load address, handshake
//! 64 <size hi> <size lo> 46        program page
//! <page bytes> 20                  payload, handshake
//! ```
//!
//! The first page of a session is preceded by a reset pulse on the target
//! so its bootloader is listening.
//!
//! # Error Handling
//!
//! A failed serial write, reset line or handshake makes the rest of the
//! current block inert. The chunk is still consumed in full and the error
//! is returned, leaving the reboot-or-continue policy to the caller.

use crate::config::BridgeConfig;
use crate::serial::AckCounter;
use crate::transfer::{ExpectedBlocks, TransferState};
use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_io_async::Write;
use uf2_proto::stk500::PROG_PAGE_HEADER_LEN;
use uf2_proto::{
    BlockHeader, BlockMetadata, Command, EncodeError, BLOCK_SIZE, CRC_EOP, HEADER_LEN,
    METADATA_OFFSET, PAYLOAD_OFFSET,
};

/// What a completed block did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BlockOutcome {
    /// Not a flashing block, or one marked skip. Nothing was sent.
    Ignored,
    /// Payload forwarded to the target.
    Accepted {
        /// Block index from the metadata.
        index: u32,
    },
    /// This block completed the transfer. The target is held in reset.
    TransferComplete,
}

/// Error type for programming operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProgramError {
    /// Serial transmitter failed.
    Serial,
    /// Reset line could not be driven.
    ResetLine,
    /// Target did not acknowledge within the handshake timeout.
    HandshakeTimeout,
    /// Command did not fit the encode buffer.
    Encode(EncodeError),
}

impl From<EncodeError> for ProgramError {
    fn from(err: EncodeError) -> Self {
        ProgramError::Encode(err)
    }
}

/// The page currently being written on the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PageSession {
    word_address: u16,
    filled: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    /// Header not seen yet.
    Pending,
    /// Actionable header seen, waiting for metadata.
    Header { word_address: u16 },
    /// Forwarding `forward` payload bytes starting at `next_address`.
    Active {
        index: u32,
        forward: usize,
        next_address: u16,
    },
    /// Consume and discard the rest of the block.
    Inert,
}

#[derive(Debug, Clone, Copy)]
struct BlockCursor {
    offset: usize,
    head: [u8; PAYLOAD_OFFSET],
    state: BlockState,
}

impl BlockCursor {
    const fn new() -> Self {
        Self {
            offset: 0,
            head: [0; PAYLOAD_OFFSET],
            state: BlockState::Pending,
        }
    }
}

/// Drives a target bootloader from a stream of flashing blocks.
///
/// `S` is the UART transmitter towards the target, `P` the target reset
/// line (active low) and `D` the delay source for reset timing and
/// handshake polling. Acknowledgments come in through the shared
/// [`AckCounter`] fed by the UART receiver.
pub struct ProgrammingBridge<'a, S, P, D> {
    serial: S,
    reset: P,
    delay: D,
    ack: &'a AckCounter,
    config: BridgeConfig,
    transfer: TransferState,
    cursor: BlockCursor,
    page: Option<PageSession>,
    pages_pending: u32,
    /// Target held in reset after completion; blocks are ignored until released.
    holding: bool,
}

impl<'a, S, P, D> ProgrammingBridge<'a, S, P, D>
where
    S: Write,
    P: OutputPin,
    D: DelayNs,
{
    /// Create a bridge. `config` is expected to have passed
    /// [`BridgeConfig::validate`].
    pub fn new(serial: S, reset: P, delay: D, ack: &'a AckCounter, config: BridgeConfig) -> Self {
        Self {
            serial,
            reset,
            delay,
            ack,
            config,
            transfer: TransferState::new(),
            cursor: BlockCursor::new(),
            page: None,
            pages_pending: 0,
            holding: false,
        }
    }

    /// Feed one 512-byte block, chunked by the configured transport size.
    ///
    /// Every chunk is consumed even after an error; the first error wins.
    pub async fn write_block(
        &mut self,
        block: &[u8; BLOCK_SIZE],
    ) -> Result<BlockOutcome, ProgramError> {
        let mut outcome = BlockOutcome::Ignored;
        let mut first_err = None;

        for chunk in block.chunks(self.config.chunk_size) {
            match self.process_chunk(chunk).await {
                Ok(Some(done)) => outcome = done,
                Ok(None) => {}
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(outcome),
        }
    }

    /// Feed the next bytes of the block stream.
    ///
    /// Returns the outcome of the last block that ended inside `chunk`, or
    /// `None` if the chunk ended mid-block.
    pub async fn process_chunk(
        &mut self,
        chunk: &[u8],
    ) -> Result<Option<BlockOutcome>, ProgramError> {
        let mut rest = chunk;
        let mut outcome = None;
        let mut first_err = None;

        while !rest.is_empty() {
            let take = rest.len().min(BLOCK_SIZE - self.cursor.offset);
            let (segment, tail) = rest.split_at(take);
            rest = tail;

            let end = self.cursor.offset + take;
            if let Err(e) = self.consume(segment).await {
                warn!("block aborted at offset {=usize}: {}", self.cursor.offset, e);
                self.cursor.offset = end;
                self.cursor.state = BlockState::Inert;
                self.page = None;
                first_err.get_or_insert(e);
            }

            if self.cursor.offset == BLOCK_SIZE {
                match self.finish_block() {
                    Ok(done) => outcome = Some(done),
                    Err(e) => {
                        first_err.get_or_insert(e);
                    }
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(outcome),
        }
    }

    async fn consume(&mut self, mut segment: &[u8]) -> Result<(), ProgramError> {
        while !segment.is_empty() {
            let offset = self.cursor.offset;

            if offset < PAYLOAD_OFFSET {
                let n = segment.len().min(PAYLOAD_OFFSET - offset);
                self.cursor.head[offset..offset + n].copy_from_slice(&segment[..n]);
                self.cursor.offset += n;
                segment = &segment[n..];
                self.decode_head();
                continue;
            }

            let n = self.forward_payload(segment).await?;
            segment = &segment[n..];
        }
        Ok(())
    }

    /// Decode header and metadata as soon as their bytes are buffered.
    fn decode_head(&mut self) {
        let offset = self.cursor.offset;

        if self.cursor.state == BlockState::Pending && offset >= HEADER_LEN {
            self.cursor.state = match BlockHeader::decode(&self.cursor.head[..HEADER_LEN]) {
                Ok(header) if header.is_actionable() && !self.holding => BlockState::Header {
                    word_address: header.word_address(),
                },
                _ => BlockState::Inert,
            };
        }

        if let BlockState::Header { word_address } = self.cursor.state {
            if offset < PAYLOAD_OFFSET {
                return;
            }

            let Ok(meta) = BlockMetadata::decode(&self.cursor.head[METADATA_OFFSET..]) else {
                self.cursor.state = BlockState::Inert;
                return;
            };

            let shift = self.config.page_shift();
            self.pages_pending = meta.page_count(shift);
            self.transfer.observe_block_count(meta.block_count);
            if self.transfer.record_block(meta.block_index) {
                debug!(
                    "block {=u32}/{=u32} at {=u16:#x}",
                    meta.block_index,
                    meta.block_count,
                    word_address
                );
            }

            self.cursor.state = BlockState::Active {
                index: meta.block_index,
                forward: (self.pages_pending << shift) as usize,
                next_address: word_address,
            };
        }
    }

    /// Forward payload bytes up to the next page boundary.
    ///
    /// Returns how many bytes of `segment` were consumed.
    async fn forward_payload(&mut self, segment: &[u8]) -> Result<usize, ProgramError> {
        let pos = self.cursor.offset - PAYLOAD_OFFSET;

        let forward = match self.cursor.state {
            BlockState::Active { forward, .. } if pos < forward => forward,
            _ => {
                self.cursor.offset += segment.len();
                return Ok(segment.len());
            }
        };

        let page_size = self.config.page_size as usize;
        let in_page = pos % page_size;
        let n = segment
            .len()
            .min(page_size - in_page)
            .min(forward - pos);

        if in_page == 0 {
            self.open_page().await?;
        }

        self.write(&segment[..n]).await?;
        if let Some(page) = self.page.as_mut() {
            page.filled += n;
        }
        self.cursor.offset += n;

        if in_page + n == page_size {
            self.close_page().await?;
        }

        Ok(n)
    }

    async fn open_page(&mut self) -> Result<(), ProgramError> {
        if !self.transfer.target_started() {
            self.reset_target().await?;
            self.transfer.mark_target_started();
        }

        let BlockState::Active { next_address, .. } = self.cursor.state else {
            return Ok(());
        };

        trace!("page at {=u16:#x}", next_address);
        self.send(Command::LoadAddress(next_address)).await?;
        self.handshake().await?;
        self.send(Command::ProgramPage(self.config.page_size)).await?;

        self.page = Some(PageSession {
            word_address: next_address,
            filled: 0,
        });
        Ok(())
    }

    async fn close_page(&mut self) -> Result<(), ProgramError> {
        let Some(page) = self.page else {
            return Ok(());
        };

        self.handshake().await?;
        trace!(
            "committed {=usize} bytes at {=u16:#x}",
            page.filled,
            page.word_address
        );
        self.page = None;
        self.pages_pending = self.pages_pending.saturating_sub(1);

        if let BlockState::Active { next_address, .. } = &mut self.cursor.state {
            *next_address = page.word_address.wrapping_add(self.config.page_size / 2);
        }
        Ok(())
    }

    fn finish_block(&mut self) -> Result<BlockOutcome, ProgramError> {
        let state = self.cursor.state;
        self.cursor = BlockCursor::new();
        self.page = None;

        let BlockState::Active { index, .. } = state else {
            return Ok(BlockOutcome::Ignored);
        };

        if !self.transfer.is_complete() {
            return Ok(BlockOutcome::Accepted { index });
        }

        info!(
            "transfer complete, {=u32} blocks",
            self.transfer.written_count()
        );
        self.transfer.reset();
        self.pages_pending = 0;
        self.holding = true;
        self.reset.set_low().map_err(|_| ProgramError::ResetLine)?;
        Ok(BlockOutcome::TransferComplete)
    }

    /// Pulse the reset line and wait for the target bootloader.
    async fn reset_target(&mut self) -> Result<(), ProgramError> {
        debug!("resetting target");
        self.reset.set_low().map_err(|_| ProgramError::ResetLine)?;
        self.delay.delay_ms(self.config.reset_hold_ms).await;
        self.reset.set_high().map_err(|_| ProgramError::ResetLine)?;
        self.delay.delay_ms(self.config.bootloader_start_ms).await;
        Ok(())
    }

    /// Send `CRC_EOP` and wait for one `STK_OK`.
    pub async fn handshake(&mut self) -> Result<(), ProgramError> {
        self.ack.clear();
        self.write(&[CRC_EOP]).await?;
        self.serial.flush().await.map_err(|_| ProgramError::Serial)?;

        let limit_us = self.config.handshake_timeout_ms.saturating_mul(1000);
        let mut waited_us = 0u32;
        while !self.ack.is_acked() {
            if waited_us >= limit_us {
                warn!("handshake timed out after {=u32} us", waited_us);
                return Err(ProgramError::HandshakeTimeout);
            }
            self.delay.delay_us(self.config.ack_poll_us).await;
            waited_us = waited_us.saturating_add(self.config.ack_poll_us);
        }
        Ok(())
    }

    async fn send(&mut self, command: Command) -> Result<(), ProgramError> {
        let mut buf = [0u8; PROG_PAGE_HEADER_LEN];
        let len = command.encode(&mut buf)?;
        self.write(&buf[..len]).await
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), ProgramError> {
        self.serial
            .write_all(bytes)
            .await
            .map_err(|_| ProgramError::Serial)
    }

    /// Release the target from reset and accept blocks again.
    ///
    /// Only needed when the caller keeps running after
    /// [`BlockOutcome::TransferComplete`] instead of rebooting. Until then
    /// every block is ignored.
    pub fn release_target(&mut self) -> Result<(), ProgramError> {
        self.holding = false;
        self.reset.set_high().map_err(|_| ProgramError::ResetLine)
    }

    /// Whether a completed transfer is holding the target in reset.
    pub fn is_holding(&self) -> bool {
        self.holding
    }

    /// Drop whatever is left of a block cut short by the transport.
    ///
    /// The next byte fed is treated as the start of a new block.
    pub fn discard_partial_block(&mut self) {
        if self.cursor.offset != 0 {
            debug!("discarding partial block at offset {=usize}", self.cursor.offset);
        }
        self.cursor = BlockCursor::new();
        self.page = None;
    }

    /// Unique blocks recorded in the current session.
    pub fn written_count(&self) -> u32 {
        self.transfer.written_count()
    }

    /// Block total declared by the current session.
    pub fn expected_blocks(&self) -> ExpectedBlocks {
        self.transfer.expected()
    }

    /// Pages of the current block not yet committed.
    pub fn pages_pending(&self) -> u32 {
        self.pages_pending
    }

    /// Get a reference to the serial transmitter.
    pub fn serial(&self) -> &S {
        &self.serial
    }

    /// Get a reference to the reset pin.
    pub fn reset_pin(&self) -> &P {
        &self.reset
    }

    /// Decompose the bridge into its serial, reset and delay components.
    pub fn into_parts(self) -> (S, P, D) {
        (self.serial, self.reset, self.delay)
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::config::DEFAULT_CONFIG;
    use crate::test_util::block_on;
    use core::convert::Infallible;
    use std::vec;
    use std::vec::Vec;
    use uf2_proto::{block::FLAG_NOT_MAIN_FLASH, MAGIC};

    // Records everything written; acknowledges each lone CRC_EOP.
    struct MockSerial<'a> {
        written: Vec<u8>,
        ack: &'a AckCounter,
        responsive: bool,
    }

    impl<'a> MockSerial<'a> {
        fn new(ack: &'a AckCounter) -> Self {
            Self {
                written: Vec::new(),
                ack,
                responsive: true,
            }
        }
    }

    impl embedded_io_async::ErrorType for MockSerial<'_> {
        type Error = Infallible;
    }

    impl Write for MockSerial<'_> {
        async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
            self.written.extend_from_slice(buf);
            if self.responsive && buf == [CRC_EOP] {
                self.ack.signal();
            }
            Ok(buf.len())
        }

        async fn flush(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockPin {
        levels: Vec<bool>,
    }

    impl embedded_hal::digital::ErrorType for MockPin {
        type Error = Infallible;
    }

    impl OutputPin for MockPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.levels.push(false);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.levels.push(true);
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockDelay {
        total_ns: u64,
    }

    impl DelayNs for MockDelay {
        async fn delay_ns(&mut self, ns: u32) {
            self.total_ns += u64::from(ns);
        }
    }

    type TestBridge<'a> = ProgrammingBridge<'a, MockSerial<'a>, MockPin, MockDelay>;

    fn new_bridge(ack: &AckCounter) -> TestBridge<'_> {
        ProgrammingBridge::new(
            MockSerial::new(ack),
            MockPin::default(),
            MockDelay::default(),
            ack,
            DEFAULT_CONFIG,
        )
    }

    fn make_block(address: u16, payload_size: u32, index: u32, count: u32) -> [u8; BLOCK_SIZE] {
        let mut block = [0u8; BLOCK_SIZE];
        block[..8].copy_from_slice(&MAGIC);
        block[12..14].copy_from_slice(&address.to_le_bytes());
        block[16..20].copy_from_slice(&payload_size.to_le_bytes());
        block[20..24].copy_from_slice(&index.to_le_bytes());
        block[24..28].copy_from_slice(&count.to_le_bytes());
        for (i, byte) in block[PAYLOAD_OFFSET..].iter_mut().enumerate() {
            *byte = i as u8;
        }
        block
    }

    fn expected_page(word_address: u16, payload: &[u8]) -> Vec<u8> {
        let [lo, hi] = word_address.to_le_bytes();
        let mut out = vec![0x55, lo, hi, CRC_EOP, 0x64, 0x00, 0x80, b'F'];
        out.extend_from_slice(payload);
        out.push(CRC_EOP);
        out
    }

    #[test]
    fn test_single_page_serial_output() {
        let ack = AckCounter::new();
        let mut bridge = new_bridge(&ack);
        let block = make_block(0x0100, 128, 0, 1);

        let outcome = block_on(bridge.write_block(&block));
        assert_eq!(outcome, Ok(BlockOutcome::TransferComplete));

        let expected = expected_page(0x80, &block[PAYLOAD_OFFSET..PAYLOAD_OFFSET + 128]);
        assert_eq!(bridge.serial().written, expected);

        // Reset pulse before the first page, held low on completion
        assert_eq!(bridge.reset_pin().levels, vec![false, true, false]);
        assert_eq!(bridge.written_count(), 0);

        let (_, _, delay) = bridge.into_parts();
        assert_eq!(delay.total_ns, 610_000_000);
    }

    #[test]
    fn test_bad_magic_sends_nothing() {
        let ack = AckCounter::new();
        let mut bridge = new_bridge(&ack);
        let mut block = make_block(0, 128, 0, 1);
        block[3] = b'X';

        assert_eq!(block_on(bridge.write_block(&block)), Ok(BlockOutcome::Ignored));
        assert!(bridge.serial().written.is_empty());
        assert!(bridge.reset_pin().levels.is_empty());
        assert_eq!(bridge.written_count(), 0);
    }

    #[test]
    fn test_skip_flag_sends_nothing() {
        let ack = AckCounter::new();
        let mut bridge = new_bridge(&ack);
        let mut block = make_block(0, 128, 0, 1);
        block[8..12].copy_from_slice(&FLAG_NOT_MAIN_FLASH.to_le_bytes());

        assert_eq!(block_on(bridge.write_block(&block)), Ok(BlockOutcome::Ignored));
        assert!(bridge.serial().written.is_empty());
        assert_eq!(bridge.written_count(), 0);
        assert_eq!(bridge.expected_blocks(), ExpectedBlocks::Unset);
    }

    #[test]
    fn test_duplicate_index_counted_once() {
        let ack = AckCounter::new();
        let mut bridge = new_bridge(&ack);
        let block = make_block(0, 128, 0, 2);

        assert_eq!(
            block_on(bridge.write_block(&block)),
            Ok(BlockOutcome::Accepted { index: 0 })
        );
        assert_eq!(
            block_on(bridge.write_block(&block)),
            Ok(BlockOutcome::Accepted { index: 0 })
        );
        assert_eq!(bridge.written_count(), 1);
    }

    #[test]
    fn test_completion_in_any_order_fires_once() {
        let ack = AckCounter::new();
        let mut bridge = new_bridge(&ack);
        let order = [2u32, 0, 3, 1];

        let mut outcomes = Vec::new();
        for &index in &order {
            let block = make_block(index as u16 * 0x80, 128, index, 4);
            outcomes.push(block_on(bridge.write_block(&block)));
        }

        assert_eq!(
            outcomes,
            vec![
                Ok(BlockOutcome::Accepted { index: 2 }),
                Ok(BlockOutcome::Accepted { index: 0 }),
                Ok(BlockOutcome::Accepted { index: 3 }),
                Ok(BlockOutcome::TransferComplete),
            ]
        );

        // Only one reset pulse for the whole session
        assert_eq!(bridge.reset_pin().levels, vec![false, true, false]);
    }

    #[test]
    fn test_conflicting_count_disables_completion() {
        let ack = AckCounter::new();
        let mut bridge = new_bridge(&ack);

        let outcomes: Vec<_> = [(0, 2), (1, 3), (2, 3)]
            .iter()
            .map(|&(index, count)| block_on(bridge.write_block(&make_block(0, 128, index, count))))
            .collect();

        assert!(outcomes
            .iter()
            .all(|o| matches!(o, Ok(BlockOutcome::Accepted { .. }))));
        assert_eq!(bridge.expected_blocks(), ExpectedBlocks::Indeterminate);
        assert_eq!(bridge.written_count(), 3);
    }

    #[test]
    fn test_two_pages_advance_word_address() {
        let ack = AckCounter::new();
        let mut bridge = new_bridge(&ack);
        let block = make_block(0x0200, 256, 0, 2);

        assert_eq!(
            block_on(bridge.write_block(&block)),
            Ok(BlockOutcome::Accepted { index: 0 })
        );

        let mut expected = expected_page(0x100, &block[32..160]);
        expected.extend(expected_page(0x140, &block[160..288]));
        assert_eq!(bridge.serial().written, expected);
        assert_eq!(bridge.pages_pending(), 0);
    }

    #[test]
    fn test_payload_size_rounds_down_to_pages() {
        let ack = AckCounter::new();
        let mut bridge = new_bridge(&ack);

        // 200 bytes covers one whole page; 1000 is clamped to the 476-byte area
        block_on(bridge.write_block(&make_block(0, 200, 0, 9))).unwrap();
        assert_eq!(bridge.serial().written.len(), expected_page(0, &[0; 128]).len());

        let ack = AckCounter::new();
        let mut bridge = new_bridge(&ack);
        block_on(bridge.write_block(&make_block(0, 1000, 0, 9))).unwrap();
        assert_eq!(bridge.serial().written.len(), 3 * expected_page(0, &[0; 128]).len());
    }

    #[test]
    fn test_chunking_does_not_change_output() {
        let blocks = [make_block(0, 256, 0, 2), make_block(0x100, 384, 1, 2)];

        let ack_a = AckCounter::new();
        let mut whole = new_bridge(&ack_a);
        let whole_outcomes: Vec<_> = blocks
            .iter()
            .map(|b| block_on(whole.write_block(b)).unwrap())
            .collect();

        let mut stream = Vec::new();
        for b in &blocks {
            stream.extend_from_slice(b);
        }

        // 16-byte chunks split header from metadata; 96 straddles blocks
        for size in [16, 96, 700] {
            let ack_b = AckCounter::new();
            let mut chunked = new_bridge(&ack_b);
            let mut outcomes = Vec::new();
            for chunk in stream.chunks(size) {
                if let Some(o) = block_on(chunked.process_chunk(chunk)).unwrap() {
                    outcomes.push(o);
                }
            }

            assert_eq!(chunked.serial().written, whole.serial().written);
            if size < BLOCK_SIZE {
                assert_eq!(outcomes, whole_outcomes);
            }
        }
    }

    #[test]
    fn test_unresponsive_target_times_out() {
        let ack = AckCounter::new();
        let mut bridge = new_bridge(&ack);
        bridge.serial.responsive = false;

        let result = block_on(bridge.write_block(&make_block(0, 128, 0, 1)));
        assert_eq!(result, Err(ProgramError::HandshakeTimeout));

        // Load address and the first CRC_EOP only; the rest was discarded
        assert_eq!(bridge.serial().written, vec![0x55, 0x00, 0x00, CRC_EOP]);
        assert_eq!(bridge.written_count(), 1);

        let (_, _, delay) = bridge.into_parts();
        assert!(delay.total_ns >= 610_000_000 + 500_000_000);
    }

    #[test]
    fn test_block_after_failure_starts_clean() {
        let ack = AckCounter::new();
        let mut bridge = new_bridge(&ack);
        bridge.serial.responsive = false;
        let _ = block_on(bridge.write_block(&make_block(0, 128, 0, 2)));

        bridge.serial.responsive = true;
        bridge.serial.written.clear();
        assert_eq!(
            block_on(bridge.write_block(&make_block(0x80, 128, 1, 2))),
            Ok(BlockOutcome::TransferComplete)
        );
        assert_eq!(bridge.serial().written.len(), expected_page(0, &[0; 128]).len());
    }

    #[test]
    fn test_discard_partial_block_realigns() {
        let ack = AckCounter::new();
        let mut bridge = new_bridge(&ack);
        let block = make_block(0, 128, 0, 1);

        assert_eq!(block_on(bridge.process_chunk(&[0xAB; 100])), Ok(None));
        bridge.discard_partial_block();

        assert_eq!(
            block_on(bridge.write_block(&block)),
            Ok(BlockOutcome::TransferComplete)
        );
    }

    #[test]
    fn test_release_target_drives_line_high() {
        let ack = AckCounter::new();
        let mut bridge = new_bridge(&ack);
        block_on(bridge.write_block(&make_block(0, 128, 0, 1))).unwrap();

        bridge.release_target().unwrap();
        assert_eq!(bridge.reset_pin().levels.last(), Some(&true));
        assert!(!bridge.is_holding());

        // A fresh session pulses reset again
        assert_eq!(
            block_on(bridge.write_block(&make_block(0, 128, 0, 1))),
            Ok(BlockOutcome::TransferComplete)
        );
        assert_eq!(
            bridge.reset_pin().levels,
            vec![false, true, false, true, false, true, false]
        );
    }

    #[test]
    fn test_blocks_after_completion_leave_target_in_reset() {
        let ack = AckCounter::new();
        let mut bridge = new_bridge(&ack);
        let block = make_block(0, 128, 0, 1);

        assert_eq!(
            block_on(bridge.write_block(&block)),
            Ok(BlockOutcome::TransferComplete)
        );
        assert!(bridge.is_holding());
        let sent = bridge.serial().written.len();

        for _ in 0..2 {
            assert_eq!(block_on(bridge.write_block(&block)), Ok(BlockOutcome::Ignored));
        }
        assert_eq!(bridge.serial().written.len(), sent);
        assert_eq!(bridge.reset_pin().levels, vec![false, true, false]);
        assert_eq!(bridge.written_count(), 0);

        let (_, _, delay) = bridge.into_parts();
        assert_eq!(delay.total_ns, 610_000_000);
    }
}

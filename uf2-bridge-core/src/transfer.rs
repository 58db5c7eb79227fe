//! Transfer completion tracking.
//!
//! A firmware image arrives as flashing blocks in any order, possibly with
//! repeats. [`TransferState`] remembers which block indices were seen and
//! what total the blocks declare, and reports completion once every index
//! has been recorded.

/// Number of block indices the bitmap can hold.
pub const MAX_TRACKED_BLOCKS: usize = 512;

const BITMAP_WORDS: usize = MAX_TRACKED_BLOCKS / 32;

/// What the blocks have said about the transfer length so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ExpectedBlocks {
    /// No block declared a count yet.
    Unset,
    /// Every block so far agreed on this count.
    Known(u32),
    /// Blocks disagreed. Completion is never reported until reset.
    Indeterminate,
}

impl ExpectedBlocks {
    /// Fold one declared count into the current value.
    ///
    /// Zero carries no information and is ignored.
    #[must_use]
    pub fn observe(self, declared: u32) -> Self {
        match self {
            _ if declared == 0 => self,
            Self::Unset => Self::Known(declared),
            Self::Known(n) if n == declared => self,
            Self::Known(_) | Self::Indeterminate => Self::Indeterminate,
        }
    }

    /// The count completion is measured against, if there is one.
    #[inline]
    #[must_use]
    pub fn limit(self) -> Option<u32> {
        match self {
            Self::Known(n) => Some(n),
            Self::Unset | Self::Indeterminate => None,
        }
    }
}

/// Per-session block bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferState {
    expected: ExpectedBlocks,
    bitmap: [u32; BITMAP_WORDS],
    written_count: u32,
    target_started: bool,
}

impl TransferState {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            expected: ExpectedBlocks::Unset,
            bitmap: [0; BITMAP_WORDS],
            written_count: 0,
            target_started: false,
        }
    }

    /// Forget everything, as after completion or a reboot.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Fold in a block's declared total.
    pub fn observe_block_count(&mut self, declared: u32) {
        let next = self.expected.observe(declared);
        if next != self.expected && next == ExpectedBlocks::Indeterminate {
            warn!("conflicting block count {=u32}, completion disabled", declared);
        }
        self.expected = next;
    }

    /// Record a block index.
    ///
    /// Returns `true` only the first time an in-range index is seen.
    pub fn record_block(&mut self, index: u32) -> bool {
        let index = index as usize;
        if index >= MAX_TRACKED_BLOCKS {
            return false;
        }

        let word = &mut self.bitmap[index / 32];
        let mask = 1u32 << (index % 32);
        if *word & mask != 0 {
            return false;
        }

        *word |= mask;
        self.written_count += 1;
        true
    }

    /// Whether the recorded blocks cover the declared total.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.expected
            .limit()
            .is_some_and(|n| self.written_count >= n)
    }

    /// Unique block indices recorded.
    #[inline]
    #[must_use]
    pub fn written_count(&self) -> u32 {
        self.written_count
    }

    #[inline]
    #[must_use]
    pub fn expected(&self) -> ExpectedBlocks {
        self.expected
    }

    /// Whether the target has been reset into its bootloader this session.
    #[inline]
    #[must_use]
    pub fn target_started(&self) -> bool {
        self.target_started
    }

    #[inline]
    pub fn mark_target_started(&mut self) {
        self.target_started = true;
    }
}

impl Default for TransferState {
    fn default() -> Self {
        Self::new()
    }
}

use super::block::{Block, BlockStatus};
use crate::constants::CORRUPT_RESET_DENOMINATOR;

/// A fixed-size, hash-verified unit of the torrent's content.
///
/// Blocks cover the piece's byte range contiguously with no gaps. The piece
/// is done once every block is `Verified`, which only happens after the
/// full byte range hashed to the expected digest.
#[derive(Debug, Clone)]
pub struct Piece {
    index: u32,
    expected_hash: [u8; 20],
    length: u32,
    block_size: u32,
    blocks: Vec<Block>,
    verifying: bool,
    reset_cursor: usize,
}

impl Piece {
    pub(crate) fn new(index: u32, expected_hash: [u8; 20], length: u32, block_size: u32) -> Self {
        let count = length.div_ceil(block_size);
        let blocks = (0..count)
            .map(|i| {
                let offset = i * block_size;
                let len = (length - offset).min(block_size);
                Block::new(i, offset, len)
            })
            .collect();

        Self {
            index,
            expected_hash,
            length,
            block_size,
            blocks,
            verifying: false,
            reset_cursor: 0,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn expected_hash(&self) -> [u8; 20] {
        self.expected_hash
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub(crate) fn block_mut(&mut self, block_index: u32) -> Option<&mut Block> {
        self.blocks.get_mut(block_index as usize)
    }

    /// Maps a byte offset to a block index. Returns `None` unless the offset
    /// falls exactly on a block boundary within the piece.
    pub fn block_at_offset(&self, offset: u32) -> Option<u32> {
        if offset >= self.length || offset % self.block_size != 0 {
            return None;
        }
        Some(offset / self.block_size)
    }

    /// True once every block passed verification.
    pub fn is_done(&self) -> bool {
        self.blocks
            .iter()
            .all(|b| b.status() == BlockStatus::Verified)
    }

    /// True if any block has progressed past `Needed`.
    pub fn is_started(&self) -> bool {
        self.blocks
            .iter()
            .any(|b| b.status() != BlockStatus::Needed)
    }

    /// True once every block's data has arrived (stored or verified).
    pub fn is_fully_stored(&self) -> bool {
        self.blocks.iter().all(|b| {
            matches!(b.status(), BlockStatus::Stored | BlockStatus::Verified)
        })
    }

    /// Lowest-index block still needed, if any.
    pub fn next_needed(&self) -> Option<u32> {
        self.blocks
            .iter()
            .find(|b| b.status() == BlockStatus::Needed)
            .map(|b| b.index())
    }

    pub fn needed_count(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| b.status() == BlockStatus::Needed)
            .count()
    }

    pub(crate) fn is_verifying(&self) -> bool {
        self.verifying
    }

    pub(crate) fn begin_verifying(&mut self) {
        self.verifying = true;
    }

    pub(crate) fn mark_all_verified(&mut self) {
        for block in &mut self.blocks {
            block.set_status(BlockStatus::Verified);
        }
        self.verifying = false;
    }

    /// Partial reset after a failed hash check: returns ceil(blocks/10)
    /// blocks to `Needed`, chosen round-robin from a rotating cursor so
    /// repeated failures eventually cycle through every block. Returns the
    /// number of blocks reset.
    pub(crate) fn reset_for_retry(&mut self) -> usize {
        let total = self.blocks.len();
        if total == 0 {
            self.verifying = false;
            return 0;
        }

        let count = total.div_ceil(CORRUPT_RESET_DENOMINATOR).min(total);
        for i in 0..count {
            let idx = (self.reset_cursor + i) % total;
            self.blocks[idx].set_status(BlockStatus::Needed);
        }
        self.reset_cursor = (self.reset_cursor + count) % total;
        self.verifying = false;
        count
    }
}

use super::model::Piece;
use crate::constants::BLOCK_SIZE;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileSetError {
    #[error("piece length must be non-zero")]
    ZeroPieceLength,

    #[error("piece hash count mismatch: expected {expected}, got {got}")]
    HashCountMismatch { expected: usize, got: usize },
}

/// The active file set: every piece of the torrent's content, built once
/// from metadata and destroyed with the download.
///
/// All pieces share `piece_length` except the final piece, which covers the
/// remainder of `total_length`.
#[derive(Debug)]
pub struct FileSet {
    piece_length: u32,
    total_length: u64,
    pieces: Vec<Piece>,
}

impl FileSet {
    /// Builds the piece array from metadata using the standard 16KB block size.
    pub fn new(
        piece_length: u32,
        total_length: u64,
        hashes: Vec<[u8; 20]>,
    ) -> Result<Self, FileSetError> {
        Self::with_block_size(piece_length, total_length, hashes, BLOCK_SIZE)
    }

    /// Builds the piece array with an explicit block size. Phases that
    /// transfer in other units (e.g. metadata exchange) use this.
    pub fn with_block_size(
        piece_length: u32,
        total_length: u64,
        hashes: Vec<[u8; 20]>,
        block_size: u32,
    ) -> Result<Self, FileSetError> {
        if piece_length == 0 || block_size == 0 {
            return Err(FileSetError::ZeroPieceLength);
        }

        let expected = total_length.div_ceil(piece_length as u64) as usize;
        if hashes.len() != expected {
            return Err(FileSetError::HashCountMismatch {
                expected,
                got: hashes.len(),
            });
        }

        let pieces = hashes
            .into_iter()
            .enumerate()
            .map(|(i, hash)| {
                let offset = i as u64 * piece_length as u64;
                let len = (total_length - offset).min(piece_length as u64) as u32;
                Piece::new(i as u32, hash, len, block_size)
            })
            .collect();

        Ok(Self {
            piece_length,
            total_length,
            pieces,
        })
    }

    pub fn piece_length(&self) -> u32 {
        self.piece_length
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    pub fn piece(&self, index: u32) -> Option<&Piece> {
        self.pieces.get(index as usize)
    }

    pub(crate) fn piece_mut(&mut self, index: u32) -> Option<&mut Piece> {
        self.pieces.get_mut(index as usize)
    }

    pub fn pieces(&self) -> &[Piece] {
        &self.pieces
    }

    /// Byte offset of a piece within the file set.
    pub fn piece_offset(&self, index: u32) -> u64 {
        index as u64 * self.piece_length as u64
    }

    /// Length of a piece in bytes (the final piece may be short).
    pub fn piece_len(&self, index: u32) -> u32 {
        self.pieces.get(index as usize).map_or(0, |p| p.length())
    }

    pub fn verified_count(&self) -> usize {
        self.pieces.iter().filter(|p| p.is_done()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.pieces.iter().all(|p| p.is_done())
    }
}

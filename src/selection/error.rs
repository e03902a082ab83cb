use crate::store::StoreError;
use thiserror::Error;

/// Errors on the inbound block-data path.
///
/// The protocol-violation variants are reasons for the connection layer to
/// close the offending connection; they never affect other peers.
#[derive(Debug, Error)]
pub enum SelectionError {
    /// Block data for a piece index outside the file set.
    #[error("block data for unknown piece {0}")]
    UnknownPiece(u32),

    /// Block offset that matches no block boundary of the piece.
    #[error("block data at piece {piece}, offset {offset} matches no block boundary")]
    UnalignedBlock { piece: u32, offset: u32 },

    /// Block data whose length does not match the block at that offset.
    #[error("block length mismatch at piece {piece}, offset {offset}: expected {expected}, got {got}")]
    LengthMismatch {
        piece: u32,
        offset: u32,
        expected: u32,
        got: usize,
    },

    /// Block data for a block that was never requested.
    #[error("block at piece {piece}, offset {offset} was not requested")]
    UnexpectedBlock { piece: u32, offset: u32 },

    /// The storage backing rejected the write.
    #[error(transparent)]
    Store(#[from] StoreError),
}

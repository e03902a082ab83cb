//! Storage seam between the exchange engine and disk I/O.
//!
//! The engine never touches files; it writes received blocks and reads
//! pieces back for verification through [`PieceStore`]. Real disk layout
//! (file-offset mapping, preallocation, handle caching) lives behind this
//! trait in the host application. [`MemoryStore`] is the transient backing
//! used by tests and by phases with no on-disk representation, such as
//! metadata exchange.

use crate::piece::FileSet;
use bytes::Bytes;
use parking_lot::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid piece index: {0}")]
    InvalidPieceIndex(u32),

    #[error("invalid block offset: piece {piece}, offset {offset}")]
    InvalidBlockOffset { piece: u32, offset: u32 },
}

/// Block-granular write and piece-granular read-back.
///
/// Implementations must be safe to call from blocking worker threads; the
/// verification job reads pieces off the scheduling path.
pub trait PieceStore: Send + Sync {
    fn write_block(&self, piece: u32, offset: u32, data: &[u8]) -> Result<(), StoreError>;

    fn read_piece(&self, piece: u32) -> Result<Bytes, StoreError>;
}

/// In-memory piece storage.
pub struct MemoryStore {
    pieces: RwLock<Vec<Vec<u8>>>,
}

impl MemoryStore {
    pub fn new(piece_lengths: Vec<u32>) -> Self {
        Self {
            pieces: RwLock::new(
                piece_lengths
                    .into_iter()
                    .map(|len| vec![0; len as usize])
                    .collect(),
            ),
        }
    }

    /// Allocates backing for every piece of a file set.
    pub fn for_files(files: &FileSet) -> Self {
        Self::new(files.pieces().iter().map(|p| p.length()).collect())
    }
}

impl PieceStore for MemoryStore {
    fn write_block(&self, piece: u32, offset: u32, data: &[u8]) -> Result<(), StoreError> {
        let mut pieces = self.pieces.write();
        let buf = pieces
            .get_mut(piece as usize)
            .ok_or(StoreError::InvalidPieceIndex(piece))?;

        let start = offset as usize;
        let end = start + data.len();
        if end > buf.len() {
            return Err(StoreError::InvalidBlockOffset { piece, offset });
        }

        buf[start..end].copy_from_slice(data);
        Ok(())
    }

    fn read_piece(&self, piece: u32) -> Result<Bytes, StoreError> {
        let pieces = self.pieces.read();
        let buf = pieces
            .get(piece as usize)
            .ok_or(StoreError::InvalidPieceIndex(piece))?;
        Ok(Bytes::copy_from_slice(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let store = MemoryStore::new(vec![8, 4]);
        store.write_block(0, 0, &[1, 2, 3, 4]).unwrap();
        store.write_block(0, 4, &[5, 6, 7, 8]).unwrap();

        let data = store.read_piece(0).unwrap();
        assert_eq!(&data[..], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn rejects_out_of_range_writes() {
        let store = MemoryStore::new(vec![8]);
        assert!(matches!(
            store.write_block(0, 6, &[0, 0, 0, 0]),
            Err(StoreError::InvalidBlockOffset { piece: 0, offset: 6 })
        ));
        assert!(matches!(
            store.write_block(1, 0, &[0]),
            Err(StoreError::InvalidPieceIndex(1))
        ));
    }
}

use super::*;

fn test_piece(length: u32, block_size: u32) -> Piece {
    Piece::new(0, [0u8; 20], length, block_size)
}

#[test]
fn test_blocks_cover_piece_contiguously() {
    let piece = test_piece(10, 4);
    let blocks = piece.blocks();

    assert_eq!(blocks.len(), 3);
    assert_eq!((blocks[0].offset(), blocks[0].length()), (0, 4));
    assert_eq!((blocks[1].offset(), blocks[1].length()), (4, 4));
    assert_eq!((blocks[2].offset(), blocks[2].length()), (8, 2));

    let covered: u32 = blocks.iter().map(|b| b.length()).sum();
    assert_eq!(covered, 10);
}

#[test]
fn test_status_predicates() {
    let mut piece = test_piece(8, 4);
    assert!(!piece.is_started());
    assert!(!piece.is_done());
    assert!(!piece.is_fully_stored());

    piece.block_mut(0).unwrap().set_status(BlockStatus::Requested);
    assert!(piece.is_started());
    assert!(!piece.is_fully_stored());

    piece.block_mut(0).unwrap().set_status(BlockStatus::Stored);
    piece.block_mut(1).unwrap().set_status(BlockStatus::Stored);
    assert!(piece.is_fully_stored());
    assert!(!piece.is_done());

    piece.mark_all_verified();
    assert!(piece.is_done());
}

#[test]
fn test_next_needed_is_index_ascending() {
    let mut piece = test_piece(12, 4);
    assert_eq!(piece.next_needed(), Some(0));

    piece.block_mut(0).unwrap().set_status(BlockStatus::Requested);
    assert_eq!(piece.next_needed(), Some(1));

    piece.block_mut(1).unwrap().set_status(BlockStatus::Stored);
    piece.block_mut(2).unwrap().set_status(BlockStatus::Verified);
    assert_eq!(piece.next_needed(), None);
}

#[test]
fn test_block_at_offset_requires_alignment() {
    let piece = test_piece(10, 4);
    assert_eq!(piece.block_at_offset(0), Some(0));
    assert_eq!(piece.block_at_offset(4), Some(1));
    assert_eq!(piece.block_at_offset(8), Some(2));
    assert_eq!(piece.block_at_offset(3), None);
    assert_eq!(piece.block_at_offset(12), None);
}

#[test]
fn test_reset_for_retry_resets_a_tenth() {
    let mut piece = test_piece(80, 4);
    assert_eq!(piece.block_count(), 20);
    for i in 0..20 {
        piece.block_mut(i).unwrap().set_status(BlockStatus::Stored);
    }

    let reset = piece.reset_for_retry();
    assert_eq!(reset, 2);

    let needed: Vec<u32> = piece
        .blocks()
        .iter()
        .filter(|b| b.status() == BlockStatus::Needed)
        .map(|b| b.index())
        .collect();
    assert_eq!(needed, vec![0, 1]);
    assert!(piece
        .blocks()
        .iter()
        .skip(2)
        .all(|b| b.status() == BlockStatus::Stored));
}

#[test]
fn test_reset_cursor_rotates_through_all_blocks() {
    let mut piece = test_piece(80, 4);
    let mut seen = std::collections::HashSet::new();

    for _ in 0..10 {
        for i in 0..20 {
            piece.block_mut(i).unwrap().set_status(BlockStatus::Stored);
        }
        let reset = piece.reset_for_retry();
        assert_eq!(reset, 2);
        for block in piece.blocks() {
            if block.status() == BlockStatus::Needed {
                seen.insert(block.index());
            }
        }
    }

    // After ten failures the cursor has walked every block once.
    assert_eq!(seen.len(), 20);
}

#[test]
fn test_single_block_piece_resets_whole_piece() {
    let mut piece = test_piece(1, 1);
    assert_eq!(piece.block_count(), 1);
    piece.block_mut(0).unwrap().set_status(BlockStatus::Stored);

    assert_eq!(piece.reset_for_retry(), 1);
    assert_eq!(piece.blocks()[0].status(), BlockStatus::Needed);
}

#[test]
fn test_fileset_construction() {
    let files = FileSet::new(16384, 40000, vec![[0u8; 20]; 3]).unwrap();
    assert_eq!(files.piece_count(), 3);
    assert_eq!(files.piece_len(0), 16384);
    assert_eq!(files.piece_len(2), 40000 - 2 * 16384);
    assert_eq!(files.piece_offset(1), 16384);
    assert_eq!(files.piece_offset(2), 32768);
    assert!(!files.is_complete());
    assert_eq!(files.verified_count(), 0);
}

#[test]
fn test_fileset_rejects_bad_metadata() {
    assert!(matches!(
        FileSet::new(0, 100, vec![]),
        Err(FileSetError::ZeroPieceLength)
    ));
    assert!(matches!(
        FileSet::new(16384, 40000, vec![[0u8; 20]; 2]),
        Err(FileSetError::HashCountMismatch {
            expected: 3,
            got: 2
        })
    ));
}

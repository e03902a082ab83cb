//! Piece verification.
//!
//! A piece moves through `Collecting -> Verifying -> Verified | Corrupt`.
//! When the last block of a piece is stored, the coordinator dispatches a
//! hash job: the piece's byte range is read back from storage and hashed on
//! a blocking worker, so the scheduling tick never waits on I/O. The
//! outcome re-enters the selection state under the same lock as every other
//! mutation.
//!
//! A hash match verifies every block and broadcasts the piece to all
//! connected peers. A mismatch resets a fraction of the blocks instead of
//! the whole piece, bounding redundant re-transfer while still making
//! progress against a persistently lying peer.

use crate::engine::EngineEvent;
use crate::peer::Outbound;
use crate::selection::SelectionState;
use crate::store::PieceStore;
use parking_lot::Mutex;
use sha1::{Digest, Sha1};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// SHA-1 digest comparison against the metadata hash.
pub fn hash_matches(data: &[u8], expected: &[u8; 20]) -> bool {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().as_slice() == expected.as_slice()
}

/// Applies a successful hash check: every block becomes `Verified`, the
/// tracking entry is dropped, and a have-broadcast goes to all connected
/// peers. Returns false if the piece was already verified (idempotent, no
/// duplicate broadcast).
pub(crate) fn apply_verified(
    state: &mut SelectionState,
    outbound: &Outbound,
    piece_index: u32,
) -> bool {
    let Some(piece) = state.files.piece_mut(piece_index) else {
        return false;
    };
    if piece.is_done() {
        return false;
    }

    piece.mark_all_verified();

    if let Some(entry) = state.requests.remove(&piece_index) {
        // Straggler holders release their pipeline slots.
        for (peer, blocks) in entry.into_holders() {
            if let Some(link) = state.links.get_mut(&peer) {
                for block in blocks {
                    link.release_request(piece_index, block);
                }
            }
        }
    }

    outbound.broadcast_have(piece_index);
    debug!(piece = piece_index, "piece verified");
    true
}

/// Applies a failed hash check: a rotating fraction of the piece's blocks
/// returns to `Needed`. Returns the number of blocks reset.
pub(crate) fn apply_corrupt(state: &mut SelectionState, piece_index: u32) -> usize {
    let Some(piece) = state.files.piece_mut(piece_index) else {
        return 0;
    };
    if piece.is_done() {
        return 0;
    }

    let reset = piece.reset_for_retry();
    warn!(
        piece = piece_index,
        reset, "piece failed hash check, re-downloading part"
    );
    reset
}

/// Fire-and-forget verification job for a fully stored piece.
///
/// Read-back and hashing run on a blocking worker; the outcome is applied
/// under the selection lock and surfaced on the engine's event stream.
pub(crate) fn dispatch(
    state: Arc<Mutex<SelectionState>>,
    outbound: Arc<Outbound>,
    store: Arc<dyn PieceStore>,
    events: mpsc::UnboundedSender<EngineEvent>,
    piece_index: u32,
    expected: [u8; 20],
) {
    tokio::spawn(async move {
        let read_store = store.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            read_store
                .read_piece(piece_index)
                .map(|data| hash_matches(&data, &expected))
        })
        .await;

        let matched = match outcome {
            Ok(Ok(matched)) => matched,
            Ok(Err(e)) => {
                // Unreadable data is re-downloaded the same way corrupt
                // data is.
                warn!(piece = piece_index, error = %e, "piece read-back failed");
                false
            }
            Err(e) => {
                warn!(piece = piece_index, error = %e, "verification task failed");
                return;
            }
        };

        let mut guard = state.lock();
        if matched {
            if apply_verified(&mut guard, &outbound, piece_index) {
                let complete = guard.files.is_complete();
                drop(guard);
                let _ = events.send(EngineEvent::PieceVerified(piece_index));
                if complete {
                    let _ = events.send(EngineEvent::DownloadComplete);
                }
            }
        } else {
            let reset = apply_corrupt(&mut guard, piece_index);
            drop(guard);
            let _ = events.send(EngineEvent::PieceCorrupt {
                piece: piece_index,
                reset,
            });
        }
    });
}

use super::state::SelectionState;
use crate::peer::{ConnectionId, Outbound, OutboundMessage};
use crate::piece::BlockStatus;
use tracing::{debug, trace};

/// Claims needed blocks for relevant peers, walking pieces in priority
/// order.
///
/// A piece is exhausted before the walk moves on: keeping the peers that
/// hold a piece focused on it reduces end-of-download straggler pieces.
/// Within a piece, blocks are claimed index-ascending. A peer whose claim
/// fails on a capacity race keeps its block needed and is skipped for the
/// rest of the tick.
pub(crate) fn request_blocks(
    state: &mut SelectionState,
    relevant: &[ConnectionId],
    order: &[u32],
    outbound: &Outbound,
) {
    let mut assigned = 0usize;

    for &piece_index in order {
        let done = state
            .files
            .piece(piece_index)
            .is_none_or(|piece| piece.is_done());
        if done {
            // Defensive: a completed piece needs no tracking entry.
            state.requests.remove(&piece_index);
            continue;
        }

        for &peer in relevant {
            assigned += assign_piece_to_peer(state, outbound, piece_index, peer);

            let piece_drained = state
                .files
                .piece(piece_index)
                .is_none_or(|piece| piece.next_needed().is_none());
            if piece_drained {
                break;
            }
        }
    }

    if assigned > 0 {
        debug!(assigned, "request step issued block requests");
    }
}

/// Hands as many needed blocks of one piece to one peer as its pipeline
/// allows. Returns the number of blocks assigned.
fn assign_piece_to_peer(
    state: &mut SelectionState,
    outbound: &Outbound,
    piece_index: u32,
    peer: ConnectionId,
) -> usize {
    let mut assigned = 0usize;

    loop {
        let has_capacity = state
            .links
            .get(&peer)
            .is_some_and(|link| {
                link.have().has_piece(piece_index as usize) && link.free_work_time() > 0
            });
        if !has_capacity {
            break;
        }

        let Some(block_index) = state
            .files
            .piece(piece_index)
            .and_then(|piece| piece.next_needed())
        else {
            break;
        };

        let registered = state
            .links
            .get_mut(&peer)
            .is_some_and(|link| link.register_request(piece_index, block_index));
        if !registered {
            // Capacity race: leave the block needed, retry next tick.
            trace!(piece = piece_index, ?peer, "request registration failed, skipping peer");
            break;
        }

        let Some(block) = state
            .files
            .piece_mut(piece_index)
            .and_then(|piece| piece.block_mut(block_index))
        else {
            // Unreachable in practice; undo the claim rather than leak it.
            if let Some(link) = state.links.get_mut(&peer) {
                link.release_request(piece_index, block_index);
            }
            break;
        };

        block.set_status(BlockStatus::Requested);
        let (offset, length) = (block.offset(), block.length());

        state.request_entry(piece_index).record(peer, block_index);
        outbound.push(
            peer,
            OutboundMessage::Request {
                piece: piece_index,
                offset,
                length,
            },
        );
        trace!(piece = piece_index, block = block_index, ?peer, "requested block");
        assigned += 1;
    }

    assigned
}

use super::state::SelectionState;
use crate::peer::{ConnectionId, Outbound, OutboundMessage};
use crate::piece::BlockStatus;
use tracing::{debug, trace};

enum Reclaim {
    Keep,
    Disconnected,
    Irrelevant,
}

/// Returns every block held by a disconnected or no-longer-relevant peer to
/// the needed pool.
///
/// Disconnected holders get no cancel message (the connection is gone);
/// connected-but-ineligible holders get one cancel per reclaimed block on
/// their outbound queue. Afterwards every tracked block belongs to a peer
/// that is both connected and relevant, and empty entries are pruned.
pub(crate) fn cancel_unobtainable(state: &mut SelectionState, outbound: &Outbound) {
    let tracked: Vec<u32> = state.requests.keys().copied().collect();

    for piece_index in tracked {
        let holders = match state.requests.get(&piece_index) {
            Some(entry) => entry.peers(),
            None => continue,
        };

        for peer in holders {
            let reclaim = match state.links.get(&peer) {
                None => Reclaim::Disconnected,
                Some(link) if !(state.relevance)(link) => Reclaim::Irrelevant,
                Some(_) => Reclaim::Keep,
            };
            if matches!(reclaim, Reclaim::Keep) {
                continue;
            }

            let blocks = state
                .requests
                .get_mut(&piece_index)
                .and_then(|entry| entry.take_peer(peer))
                .unwrap_or_default();

            reclaim_blocks(state, outbound, piece_index, peer, &blocks, reclaim);
        }

        if state
            .requests
            .get(&piece_index)
            .is_some_and(|entry| entry.is_empty())
        {
            state.requests.remove(&piece_index);
        }
    }
}

fn reclaim_blocks(
    state: &mut SelectionState,
    outbound: &Outbound,
    piece_index: u32,
    peer: ConnectionId,
    blocks: &std::collections::HashSet<u32>,
    reclaim: Reclaim,
) {
    let Some(piece) = state.files.piece_mut(piece_index) else {
        return;
    };

    let send_cancels = matches!(reclaim, Reclaim::Irrelevant);
    for &block_index in blocks {
        let Some(block) = piece.block_mut(block_index) else {
            continue;
        };
        if block.status() == BlockStatus::Requested {
            block.set_status(BlockStatus::Needed);
        }

        if send_cancels {
            let (offset, length) = (block.offset(), block.length());
            outbound.push(
                peer,
                OutboundMessage::Cancel {
                    piece: piece_index,
                    offset,
                    length,
                },
            );
            trace!(piece = piece_index, block = block_index, ?peer, "cancelled block");
        }
    }

    if send_cancels {
        if let Some(link) = state.links.get_mut(&peer) {
            for &block_index in blocks {
                link.release_request(piece_index, block_index);
            }
        }
    }

    debug!(
        piece = piece_index,
        ?peer,
        reclaimed = blocks.len(),
        disconnected = !send_cancels,
        "reclaimed unobtainable blocks"
    );
}

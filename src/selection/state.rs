use crate::peer::{ConnectionId, PeerLink};
use crate::piece::FileSet;
use std::collections::{HashMap, HashSet};

/// Decides which peers are eligible for block assignment in the current
/// download phase.
pub type RelevancePredicate = Box<dyn Fn(&PeerLink) -> bool + Send + Sync>;

/// Per-piece bookkeeping of which peer currently holds which blocks.
///
/// Invariants: a block appears in at most one peer's set, and every block
/// listed here has status `Requested`. Entries are created lazily on the
/// first request against a piece and pruned when they empty out or the
/// piece verifies.
#[derive(Debug, Default)]
pub struct PieceRequestState {
    holders: HashMap<ConnectionId, HashSet<u32>>,
}

impl PieceRequestState {
    pub fn peers(&self) -> Vec<ConnectionId> {
        self.holders.keys().copied().collect()
    }

    /// The peer a block is currently assigned to, if any.
    pub fn holder_of(&self, block: u32) -> Option<ConnectionId> {
        self.holders
            .iter()
            .find(|(_, blocks)| blocks.contains(&block))
            .map(|(id, _)| *id)
    }

    pub fn blocks_held_by(&self, peer: ConnectionId) -> usize {
        self.holders.get(&peer).map_or(0, |b| b.len())
    }

    pub fn total_blocks(&self) -> usize {
        self.holders.values().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }

    pub(crate) fn record(&mut self, peer: ConnectionId, block: u32) {
        self.holders.entry(peer).or_default().insert(block);
    }

    pub(crate) fn remove_block(&mut self, peer: ConnectionId, block: u32) -> bool {
        let Some(blocks) = self.holders.get_mut(&peer) else {
            return false;
        };
        let removed = blocks.remove(&block);
        if blocks.is_empty() {
            self.holders.remove(&peer);
        }
        removed
    }

    /// Removes a peer's entire entry, returning the blocks it held.
    pub(crate) fn take_peer(&mut self, peer: ConnectionId) -> Option<HashSet<u32>> {
        self.holders.remove(&peer)
    }

    pub(crate) fn into_holders(self) -> HashMap<ConnectionId, HashSet<u32>> {
        self.holders
    }
}

/// The single shared mutable resource of the exchange engine.
///
/// Holds the file set, the live peer links, and the per-piece request
/// bookkeeping. Every mutation happens under one exclusion boundary: the
/// scheduling tick, the network-event entry points, and the verification
/// completion all lock this state before touching it.
pub struct SelectionState {
    pub(crate) files: FileSet,
    pub(crate) links: HashMap<ConnectionId, PeerLink>,
    pub(crate) requests: HashMap<u32, PieceRequestState>,
    pub(crate) relevance: RelevancePredicate,
}

impl SelectionState {
    /// Creates state with the default relevance rule: a peer is eligible
    /// when it is not choking us and we are interested in it.
    pub fn new(files: FileSet) -> Self {
        Self::with_relevance(
            files,
            Box::new(|link| !link.choke().peer_choking && link.choke().am_interested),
        )
    }

    pub fn with_relevance(files: FileSet, relevance: RelevancePredicate) -> Self {
        Self {
            files,
            links: HashMap::new(),
            requests: HashMap::new(),
            relevance,
        }
    }

    pub fn files(&self) -> &FileSet {
        &self.files
    }

    pub fn link(&self, id: ConnectionId) -> Option<&PeerLink> {
        self.links.get(&id)
    }

    pub(crate) fn link_mut(&mut self, id: ConnectionId) -> Option<&mut PeerLink> {
        self.links.get_mut(&id)
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub(crate) fn insert_link(&mut self, link: PeerLink) {
        self.links.insert(link.id(), link);
    }

    pub(crate) fn remove_link(&mut self, id: ConnectionId) -> Option<PeerLink> {
        self.links.remove(&id)
    }

    pub fn is_relevant(&self, link: &PeerLink) -> bool {
        (self.relevance)(link)
    }

    /// Connected peers eligible for assignment, in a deterministic order.
    pub fn relevant_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self
            .links
            .values()
            .filter(|link| (self.relevance)(link))
            .map(|link| link.id())
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn request_state(&self, piece: u32) -> Option<&PieceRequestState> {
        self.requests.get(&piece)
    }

    pub fn tracked_piece_count(&self) -> usize {
        self.requests.len()
    }

    pub(crate) fn request_entry(&mut self, piece: u32) -> &mut PieceRequestState {
        self.requests.entry(piece).or_default()
    }

    /// Releases whichever peer holds a requested block, pruning the piece's
    /// entry when it empties out.
    pub(crate) fn release_holder(&mut self, piece: u32, block: u32) {
        let Some(entry) = self.requests.get_mut(&piece) else {
            return;
        };
        if let Some(holder) = entry.holder_of(block) {
            entry.remove_block(holder, block);
            if let Some(link) = self.links.get_mut(&holder) {
                link.release_request(piece, block);
            }
        }
        if self.requests.get(&piece).is_some_and(|e| e.is_empty()) {
            self.requests.remove(&piece);
        }
    }
}

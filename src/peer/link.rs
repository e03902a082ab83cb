use super::bitfield::Bitfield;
use super::outbound::BlockRequest;
use crate::constants::MAX_REQUESTS_PER_PEER;
use std::collections::{HashSet, VecDeque};

/// Identity of one live connection, assigned by the connection layer.
///
/// All request bookkeeping references peers through this key rather than an
/// owning handle; the connection layer alone governs link lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

/// Choke and interest flags in both directions.
///
/// Written by the message-processing and choking collaborators; the
/// exchange engine only reads them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChokeState {
    pub am_choking: bool,
    pub am_interested: bool,
    pub peer_choking: bool,
    pub peer_interested: bool,
}

impl Default for ChokeState {
    fn default() -> Self {
        Self {
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
        }
    }
}

/// Engine-side view of one connected peer.
pub struct PeerLink {
    id: ConnectionId,
    have: Bitfield,
    choke: ChokeState,
    request_limit: usize,
    requested: HashSet<(u32, u32)>,
    upload_queue: VecDeque<BlockRequest>,
}

impl PeerLink {
    pub fn new(id: ConnectionId, piece_count: usize, request_limit: usize) -> Self {
        Self {
            id,
            have: Bitfield::new(piece_count),
            choke: ChokeState::default(),
            request_limit: request_limit.clamp(1, MAX_REQUESTS_PER_PEER),
            requested: HashSet::new(),
            upload_queue: VecDeque::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn have(&self) -> &Bitfield {
        &self.have
    }

    pub(crate) fn set_have(&mut self, have: Bitfield) {
        self.have = have;
    }

    pub(crate) fn set_have_piece(&mut self, piece: usize) {
        self.have.set_piece(piece);
    }

    pub fn choke(&self) -> ChokeState {
        self.choke
    }

    pub(crate) fn choke_mut(&mut self) -> &mut ChokeState {
        &mut self.choke
    }

    /// Current pipeline limit for requests to this peer.
    pub fn request_limit(&self) -> usize {
        self.request_limit
    }

    /// Adjusts the pipeline limit, clamped to `[1, MAX_REQUESTS_PER_PEER]`.
    pub fn set_request_limit(&mut self, limit: usize) {
        self.request_limit = limit.clamp(1, MAX_REQUESTS_PER_PEER);
    }

    /// Outstanding download requests to this peer.
    pub fn outstanding(&self) -> usize {
        self.requested.len()
    }

    /// Spare request capacity this tick.
    pub fn free_work_time(&self) -> usize {
        self.request_limit.saturating_sub(self.requested.len())
    }

    pub fn holds(&self, piece: u32, block: u32) -> bool {
        self.requested.contains(&(piece, block))
    }

    /// Registers an outstanding request. Fails on a capacity race (the
    /// limit was exhausted between check and claim) or a duplicate claim.
    pub(crate) fn register_request(&mut self, piece: u32, block: u32) -> bool {
        if self.requested.len() >= self.request_limit {
            return false;
        }
        self.requested.insert((piece, block))
    }

    /// Releases an outstanding request; the only removal path.
    pub(crate) fn release_request(&mut self, piece: u32, block: u32) -> bool {
        self.requested.remove(&(piece, block))
    }

    // Upload side: blocks the remote asked us for, drained by the
    // connection's I/O path.

    pub(crate) fn push_upload(&mut self, request: BlockRequest) {
        self.upload_queue.push_back(request);
    }

    pub(crate) fn pop_upload(&mut self) -> Option<BlockRequest> {
        self.upload_queue.pop_front()
    }

    pub fn upload_queue_len(&self) -> usize {
        self.upload_queue.len()
    }
}

//! The selection coordinator.
//!
//! [`Engine`] orchestrates one scheduling tick: reclaim unobtainable
//! blocks, compute the relevant peer set, rank pieces, assign requests.
//! The order is fixed and never parallelized within a tick, so blocks
//! freed by cancellation are reassignable in the same tick.
//!
//! It also carries the collaborator surface: the connection layer registers
//! peers and feeds have/choke updates, the message-processing path delivers
//! block data and remote requests, each connection's writer drains its
//! outbound mailbox, and the phase driver watches the event stream.
//!
//! # Examples
//!
//! ```
//! use bex::{Engine, EngineConfig, ConnectionId, MemoryStore, FileSet};
//! use std::sync::Arc;
//!
//! let files = FileSet::with_block_size(32, 64, vec![[0u8; 20]; 2], 16).unwrap();
//! let store = Arc::new(MemoryStore::for_files(&files));
//! let engine = Engine::new(files, store, EngineConfig::default());
//!
//! let peer = ConnectionId(1);
//! engine.add_peer(peer);
//! engine.peer_has(peer, 0).unwrap();
//! engine.set_peer_choking(peer, false).unwrap();
//! engine.set_am_interested(peer, true).unwrap();
//!
//! engine.update_state();
//! let requests = engine.drain_outbound(peer);
//! assert!(!requests.is_empty());
//! ```

use crate::constants::{DEFAULT_REQUEST_LIMIT, MAX_REQUEST_LENGTH, TICK_INTERVAL};
use crate::peer::{
    Bitfield, BlockRequest, ConnectionId, Outbound, OutboundMessage, PeerError, PeerLink,
};
use crate::piece::{BlockStatus, FileSet};
use crate::selection::{
    cancel_unobtainable, request_blocks, PiecePriority, RelevancePredicate, SelectionError,
    SelectionState,
};
use crate::store::PieceStore;
use crate::verify;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::debug;

/// Notifications for the phase/mode driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// A piece passed its hash check and was broadcast to all peers.
    PieceVerified(u32),
    /// A piece failed its hash check; `reset` blocks returned to the pool.
    PieceCorrupt { piece: u32, reset: usize },
    /// Every piece of the file set is verified.
    DownloadComplete,
}

/// Per-phase engine configuration.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Piece ordering policy for the request step.
    pub priority: PiecePriority,
    /// Initial pipeline depth for new peers.
    pub request_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            priority: PiecePriority::default(),
            request_limit: DEFAULT_REQUEST_LIMIT,
        }
    }
}

/// The piece/block exchange coordinator for one torrent.
pub struct Engine {
    state: Arc<Mutex<SelectionState>>,
    outbound: Arc<Outbound>,
    store: Arc<dyn PieceStore>,
    config: EngineConfig,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<EngineEvent>>>,
}

impl Engine {
    pub fn new(files: FileSet, store: Arc<dyn PieceStore>, config: EngineConfig) -> Self {
        Self::from_state(SelectionState::new(files), store, config)
    }

    /// Creates an engine with a phase-specific relevance rule instead of
    /// the default unchoked-and-interested one.
    pub fn with_relevance(
        files: FileSet,
        store: Arc<dyn PieceStore>,
        config: EngineConfig,
        relevance: RelevancePredicate,
    ) -> Self {
        Self::from_state(SelectionState::with_relevance(files, relevance), store, config)
    }

    fn from_state(state: SelectionState, store: Arc<dyn PieceStore>, config: EngineConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(Mutex::new(state)),
            outbound: Arc::new(Outbound::new()),
            store,
            config,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Takes the event stream. Yields `None` after the first call.
    pub fn events(&self) -> Option<mpsc::UnboundedReceiver<EngineEvent>> {
        self.events_rx.lock().take()
    }

    // ------------------------------------------------------------------
    // Peer lifecycle and flags (written by the connection layer)
    // ------------------------------------------------------------------

    pub fn add_peer(&self, id: ConnectionId) {
        let mut state = self.state.lock();
        let piece_count = state.files().piece_count();
        state.insert_link(PeerLink::new(id, piece_count, self.config.request_limit));
        self.outbound.attach(id);
        debug!(?id, "peer registered");
    }

    /// Unregisters a peer. Blocks it held are reclaimed by the cancel step
    /// of the next tick.
    pub fn remove_peer(&self, id: ConnectionId) {
        self.state.lock().remove_link(id);
        self.outbound.detach(id);
        debug!(?id, "peer removed");
    }

    pub fn set_peer_bitfield(&self, id: ConnectionId, raw: Bytes) -> Result<(), PeerError> {
        let mut state = self.state.lock();
        let piece_count = state.files().piece_count();
        let link = state.link_mut(id).ok_or(PeerError::UnknownPeer(id))?;
        link.set_have(Bitfield::from_bytes(raw, piece_count));
        Ok(())
    }

    /// Records a have message from the peer.
    pub fn peer_has(&self, id: ConnectionId, piece: u32) -> Result<(), PeerError> {
        let mut state = self.state.lock();
        if piece as usize >= state.files().piece_count() {
            return Err(PeerError::InvalidPieceIndex(piece));
        }
        let link = state.link_mut(id).ok_or(PeerError::UnknownPeer(id))?;
        link.set_have_piece(piece as usize);
        Ok(())
    }

    pub fn set_peer_choking(&self, id: ConnectionId, choking: bool) -> Result<(), PeerError> {
        self.with_link(id, |link| link.choke_mut().peer_choking = choking)
    }

    pub fn set_peer_interested(&self, id: ConnectionId, interested: bool) -> Result<(), PeerError> {
        self.with_link(id, |link| link.choke_mut().peer_interested = interested)
    }

    pub fn set_am_choking(&self, id: ConnectionId, choking: bool) -> Result<(), PeerError> {
        self.with_link(id, |link| link.choke_mut().am_choking = choking)
    }

    pub fn set_am_interested(&self, id: ConnectionId, interested: bool) -> Result<(), PeerError> {
        self.with_link(id, |link| link.choke_mut().am_interested = interested)
    }

    /// Adjusts a peer's pipeline limit (clamped to the protocol ceiling).
    pub fn set_request_limit(&self, id: ConnectionId, limit: usize) -> Result<(), PeerError> {
        self.with_link(id, |link| link.set_request_limit(limit))
    }

    fn with_link(
        &self,
        id: ConnectionId,
        f: impl FnOnce(&mut PeerLink),
    ) -> Result<(), PeerError> {
        let mut state = self.state.lock();
        let link = state.link_mut(id).ok_or(PeerError::UnknownPeer(id))?;
        f(link);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Flow-control accessors
    // ------------------------------------------------------------------

    /// Outstanding download requests to a peer, for the choking
    /// collaborator's flow control. Zero for unknown peers.
    pub fn block_queue_len(&self, id: ConnectionId) -> usize {
        self.state.lock().link(id).map_or(0, |link| link.outstanding())
    }

    /// Marks a piece verified without broadcasting, for the startup
    /// hash-check scan of data already on disk. Returns false for unknown
    /// or already-verified pieces.
    pub fn assume_verified(&self, piece: u32) -> bool {
        let mut state = self.state.lock();
        match state.files.piece_mut(piece) {
            Some(piece) if !piece.is_done() => {
                piece.mark_all_verified();
                true
            }
            _ => false,
        }
    }

    pub fn verified_count(&self) -> usize {
        self.state.lock().files().verified_count()
    }

    pub fn is_complete(&self) -> bool {
        self.state.lock().files().is_complete()
    }

    // ------------------------------------------------------------------
    // Wire traffic
    // ------------------------------------------------------------------

    /// Takes everything queued for one peer's writer.
    pub fn drain_outbound(&self, id: ConnectionId) -> Vec<OutboundMessage> {
        self.outbound.drain(id)
    }

    /// Validates and queues a block request from the remote side. A
    /// violation is a reason to close that connection.
    pub fn on_peer_request(&self, id: ConnectionId, request: BlockRequest) -> Result<(), PeerError> {
        if request.length > MAX_REQUEST_LENGTH {
            return Err(PeerError::RequestTooLarge(request.length));
        }

        let mut state = self.state.lock();
        let piece = state
            .files()
            .piece(request.piece)
            .ok_or(PeerError::InvalidPieceIndex(request.piece))?;
        if !piece.is_done() {
            return Err(PeerError::PieceNotAvailable(request.piece));
        }
        if request.offset as u64 + request.length as u64 > piece.length() as u64 {
            return Err(PeerError::RequestOutOfBounds {
                piece: request.piece,
                offset: request.offset,
                length: request.length,
            });
        }

        let link = state.link_mut(id).ok_or(PeerError::UnknownPeer(id))?;
        link.push_upload(request);
        Ok(())
    }

    /// Next block the remote asked us for, consumed by the upload path.
    pub fn next_upload(&self, id: ConnectionId) -> Option<BlockRequest> {
        self.state.lock().link_mut(id)?.pop_upload()
    }

    /// Records received block data: releases the holder, stores the bytes,
    /// and dispatches verification once the piece is fully stored.
    ///
    /// Must be called from within a tokio runtime; verification runs as a
    /// fire-and-forget job.
    pub fn on_received_block(
        &self,
        piece_index: u32,
        offset: u32,
        data: Bytes,
    ) -> Result<(), SelectionError> {
        let mut state = self.state.lock();

        let piece = state
            .files()
            .piece(piece_index)
            .ok_or(SelectionError::UnknownPiece(piece_index))?;
        let block_index = piece
            .block_at_offset(offset)
            .ok_or(SelectionError::UnalignedBlock {
                piece: piece_index,
                offset,
            })?;
        let block = &piece.blocks()[block_index as usize];

        if block.length() as usize != data.len() {
            return Err(SelectionError::LengthMismatch {
                piece: piece_index,
                offset,
                expected: block.length(),
                got: data.len(),
            });
        }
        if block.status() != BlockStatus::Requested {
            return Err(SelectionError::UnexpectedBlock {
                piece: piece_index,
                offset,
            });
        }

        self.store.write_block(piece_index, offset, &data)?;

        state.release_holder(piece_index, block_index);
        let expected = {
            let piece = match state.files.piece_mut(piece_index) {
                Some(piece) => piece,
                None => return Err(SelectionError::UnknownPiece(piece_index)),
            };
            if let Some(block) = piece.block_mut(block_index) {
                block.set_status(BlockStatus::Stored);
            }
            if piece.is_fully_stored() && !piece.is_verifying() {
                piece.begin_verifying();
                Some(piece.expected_hash())
            } else {
                None
            }
        };
        drop(state);

        if let Some(expected) = expected {
            verify::dispatch(
                self.state.clone(),
                self.outbound.clone(),
                self.store.clone(),
                self.events_tx.clone(),
                piece_index,
                expected,
            );
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------

    /// Runs one scheduling tick: cancel step, relevance, priority order,
    /// request step.
    pub fn update_state(&self) {
        let mut state = self.state.lock();

        cancel_unobtainable(&mut state, &self.outbound);

        let relevant = state.relevant_ids();
        let order = {
            let links: Vec<&PeerLink> = relevant
                .iter()
                .filter_map(|id| state.link(*id))
                .collect();
            let pieces: Vec<&crate::piece::Piece> = state
                .files()
                .pieces()
                .iter()
                .filter(|piece| !piece.is_done())
                .collect();
            self.config.priority.order(&links, &pieces)
        };

        request_blocks(&mut state, &relevant, &order, &self.outbound);
    }

    /// Drives ticks on a fixed interval until `shutdown` is notified.
    pub async fn run(&self, shutdown: Arc<Notify>) {
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    debug!("exchange engine shutting down");
                    return;
                }
                _ = tick.tick() => {
                    self.update_state();
                }
            }
        }
    }

    /// Read access to the selection state for inspection.
    pub fn with_state<R>(&self, f: impl FnOnce(&SelectionState) -> R) -> R {
        f(&self.state.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use sha1::{Digest, Sha1};

    const DATA: &[u8; 8] = b"abcdefgh";

    fn engine_with_one_piece(expected: [u8; 20], request_limit: usize) -> Engine {
        let files = FileSet::with_block_size(8, 8, vec![expected], 4).unwrap();
        let store = Arc::new(MemoryStore::for_files(&files));
        Engine::new(
            files,
            store,
            EngineConfig {
                request_limit,
                ..EngineConfig::default()
            },
        )
    }

    fn connect_seed(engine: &Engine, id: u64) -> ConnectionId {
        let peer = ConnectionId(id);
        engine.add_peer(peer);
        engine
            .set_peer_bitfield(peer, Bytes::from_static(&[0xFF]))
            .unwrap();
        engine.set_peer_choking(peer, false).unwrap();
        engine.set_am_interested(peer, true).unwrap();
        peer
    }

    fn sha1_of(data: &[u8]) -> [u8; 20] {
        let mut hasher = Sha1::new();
        hasher.update(data);
        hasher.finalize().into()
    }

    #[tokio::test]
    async fn test_download_to_completion() {
        let engine = engine_with_one_piece(sha1_of(DATA), 16);
        let mut events = engine.events().unwrap();
        let peer = connect_seed(&engine, 1);

        engine.update_state();
        let requests = engine.drain_outbound(peer);
        assert_eq!(requests.len(), 2);
        assert_eq!(engine.block_queue_len(peer), 2);

        engine
            .on_received_block(0, 0, Bytes::from_static(&DATA[..4]))
            .unwrap();
        engine
            .on_received_block(0, 4, Bytes::from_static(&DATA[4..]))
            .unwrap();
        assert_eq!(engine.block_queue_len(peer), 0);

        assert_eq!(events.recv().await, Some(EngineEvent::PieceVerified(0)));
        assert_eq!(events.recv().await, Some(EngineEvent::DownloadComplete));
        assert!(engine.is_complete());
        assert_eq!(engine.verified_count(), 1);

        // Connected peers are told about the new piece.
        assert_eq!(
            engine.drain_outbound(peer),
            vec![OutboundMessage::Have { piece: 0 }]
        );

        // And the piece can now be served.
        let request = BlockRequest {
            piece: 0,
            offset: 0,
            length: 8,
        };
        engine.on_peer_request(peer, request).unwrap();
        assert_eq!(engine.next_upload(peer), Some(request));
        assert_eq!(engine.next_upload(peer), None);
    }

    #[tokio::test]
    async fn test_corrupt_piece_partially_retries() {
        // Hash in the metadata matches nothing we will receive.
        let engine = engine_with_one_piece([0u8; 20], 16);
        let mut events = engine.events().unwrap();
        let peer = connect_seed(&engine, 1);

        engine.update_state();
        engine
            .on_received_block(0, 0, Bytes::from_static(&DATA[..4]))
            .unwrap();
        engine
            .on_received_block(0, 4, Bytes::from_static(&DATA[4..]))
            .unwrap();

        assert_eq!(
            events.recv().await,
            Some(EngineEvent::PieceCorrupt { piece: 0, reset: 1 })
        );
        assert!(!engine.is_complete());

        // The next tick re-requests only the reclaimed block.
        engine.drain_outbound(peer);
        engine.update_state();
        assert_eq!(engine.drain_outbound(peer).len(), 1);
    }

    #[test]
    fn test_remove_peer_reclaims_on_next_tick() {
        let engine = engine_with_one_piece([0u8; 20], 2);
        let peer = connect_seed(&engine, 1);

        engine.update_state();
        assert_eq!(engine.block_queue_len(peer), 2);

        engine.remove_peer(peer);
        engine.update_state();

        engine.with_state(|state| {
            assert_eq!(state.tracked_piece_count(), 0);
            let piece = state.files().piece(0).unwrap();
            assert!(!piece.is_started());
        });
    }

    #[test]
    fn test_received_block_protocol_violations() {
        let engine = engine_with_one_piece([0u8; 20], 16);

        assert!(matches!(
            engine.on_received_block(9, 0, Bytes::from_static(&DATA[..4])),
            Err(SelectionError::UnknownPiece(9))
        ));
        assert!(matches!(
            engine.on_received_block(0, 3, Bytes::from_static(&DATA[..4])),
            Err(SelectionError::UnalignedBlock { piece: 0, offset: 3 })
        ));
        assert!(matches!(
            engine.on_received_block(0, 0, Bytes::from_static(&DATA[..2])),
            Err(SelectionError::LengthMismatch { piece: 0, .. })
        ));
        // Nothing was requested, so data is unexpected.
        assert!(matches!(
            engine.on_received_block(0, 0, Bytes::from_static(&DATA[..4])),
            Err(SelectionError::UnexpectedBlock { piece: 0, offset: 0 })
        ));
    }

    #[test]
    fn test_peer_request_validation() {
        let engine = engine_with_one_piece([0u8; 20], 16);
        let peer = connect_seed(&engine, 1);

        assert!(matches!(
            engine.on_peer_request(
                peer,
                BlockRequest {
                    piece: 0,
                    offset: 0,
                    length: MAX_REQUEST_LENGTH + 1
                }
            ),
            Err(PeerError::RequestTooLarge(_))
        ));
        assert!(matches!(
            engine.on_peer_request(
                peer,
                BlockRequest {
                    piece: 5,
                    offset: 0,
                    length: 4
                }
            ),
            Err(PeerError::InvalidPieceIndex(5))
        ));
        // We have nothing verified yet.
        assert!(matches!(
            engine.on_peer_request(
                peer,
                BlockRequest {
                    piece: 0,
                    offset: 0,
                    length: 4
                }
            ),
            Err(PeerError::PieceNotAvailable(0))
        ));
        assert!(matches!(
            engine.on_peer_request(
                ConnectionId(99),
                BlockRequest {
                    piece: 0,
                    offset: 0,
                    length: 4
                }
            ),
            Err(PeerError::UnknownPeer(_))
        ));
    }

    #[test]
    fn test_custom_relevance_rule() {
        let files = FileSet::with_block_size(8, 8, vec![[0u8; 20]], 4).unwrap();
        let store = Arc::new(MemoryStore::for_files(&files));
        let engine = Engine::with_relevance(
            files,
            store,
            EngineConfig::default(),
            Box::new(|_| true),
        );

        // Under an admit-all rule even a choked peer gets work.
        let peer = ConnectionId(1);
        engine.add_peer(peer);
        engine
            .set_peer_bitfield(peer, Bytes::from_static(&[0x80]))
            .unwrap();
        engine.update_state();
        assert_eq!(engine.block_queue_len(peer), 2);
    }

    #[test]
    fn test_assume_verified_skips_download() {
        let engine = engine_with_one_piece([0u8; 20], 16);
        let peer = connect_seed(&engine, 1);

        assert!(engine.assume_verified(0));
        assert!(!engine.assume_verified(0));
        assert!(engine.is_complete());

        // Nothing left to request, and no have-broadcast for scanned data.
        engine.update_state();
        assert!(engine.drain_outbound(peer).is_empty());
    }

    #[test]
    fn test_unknown_peer_flag_updates_error() {
        let engine = engine_with_one_piece([0u8; 20], 16);
        assert!(matches!(
            engine.set_peer_choking(ConnectionId(1), false),
            Err(PeerError::UnknownPeer(_))
        ));
        assert!(matches!(
            engine.peer_has(ConnectionId(1), 0),
            Err(PeerError::UnknownPeer(_))
        ));
    }
}

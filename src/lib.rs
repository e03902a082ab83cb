//! bex - a BitTorrent piece/block exchange engine
//!
//! This library implements the scheduling core of a BitTorrent client: for
//! every tick it decides which blocks of which pieces are requested from
//! which peers, tracks every outstanding request, reclaims work when peers
//! disconnect or choke, and promotes block-level writes into verified,
//! complete pieces.
//!
//! Wire framing, handshakes, tracker traffic, and real disk layout are the
//! host application's business; the engine consumes them through the
//! [`peer::Outbound`] mailboxes and the [`store::PieceStore`] seam.
//!
//! # Modules
//!
//! - [`piece`] - Block/piece data model and the active file set
//! - [`peer`] - Per-connection views, have-state, outbound mailboxes
//! - [`selection`] - Request bookkeeping, cancel/request steps, priorities
//! - [`verify`] - Piece verification and the partial corrupt-retry
//! - [`store`] - Storage seam between the engine and disk I/O
//! - [`engine`] - The per-torrent coordinator and its tick loop

pub mod constants;
pub mod engine;
pub mod peer;
pub mod piece;
pub mod selection;
pub mod store;
pub mod verify;

pub use engine::{Engine, EngineConfig, EngineEvent};
pub use peer::{
    Bitfield, BlockRequest, ChokeState, ConnectionId, Outbound, OutboundMessage, PeerError,
    PeerLink,
};
pub use piece::{Block, BlockStatus, FileSet, FileSetError, Piece};
pub use selection::{PiecePriority, PieceRequestState, SelectionError, SelectionState};
pub use store::{MemoryStore, PieceStore, StoreError};

use super::link::ConnectionId;
use thiserror::Error;

/// Protocol violations by a peer.
///
/// Each of these is a reason for the connection layer to close that one
/// connection; none of them affects other peers or global state.
#[derive(Debug, Error)]
pub enum PeerError {
    /// The peer is not registered with the engine.
    #[error("unknown peer {0:?}")]
    UnknownPeer(ConnectionId),

    /// Request for a piece index outside the file set.
    #[error("request for invalid piece index {0}")]
    InvalidPieceIndex(u32),

    /// Request for a piece we have not verified and cannot serve.
    #[error("request for piece {0} we do not have")]
    PieceNotAvailable(u32),

    /// Request length above the protocol ceiling.
    #[error("request length {0} exceeds maximum")]
    RequestTooLarge(u32),

    /// Request range extends past the end of the piece.
    #[error("request beyond piece bounds: piece {piece}, offset {offset}, length {length}")]
    RequestOutOfBounds { piece: u32, offset: u32, length: u32 },
}

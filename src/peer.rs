//! Per-connection view of a remote peer.
//!
//! The exchange engine never owns connections. A [`PeerLink`] is the
//! engine-side view of one live connection: which pieces the remote holds,
//! the choke/interest flags in both directions, the request pipeline limit,
//! and the two job queues (blocks we requested from them, blocks they
//! requested from us). Links are created on handshake and destroyed on
//! socket close by the connection layer; all bookkeeping references them by
//! [`ConnectionId`] only.

mod bitfield;
mod error;
mod link;
mod outbound;

pub use bitfield::Bitfield;
pub use error::PeerError;
pub use link::{ChokeState, ConnectionId, PeerLink};
pub use outbound::{BlockRequest, Outbound, OutboundMessage};

use super::link::ConnectionId;
use dashmap::DashMap;
use std::collections::VecDeque;

/// One block request as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRequest {
    pub piece: u32,
    pub offset: u32,
    pub length: u32,
}

/// A wire message the engine wants sent to a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundMessage {
    Request { piece: u32, offset: u32, length: u32 },
    Cancel { piece: u32, offset: u32, length: u32 },
    Have { piece: u32 },
}

/// Per-peer outbound mailboxes.
///
/// The engine enqueues under the selection lock; each connection's I/O path
/// drains its own queue without taking that lock. Enqueue never blocks.
#[derive(Default)]
pub struct Outbound {
    queues: DashMap<ConnectionId, VecDeque<OutboundMessage>>,
}

impl Outbound {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn attach(&self, id: ConnectionId) {
        self.queues.entry(id).or_default();
    }

    pub(crate) fn detach(&self, id: ConnectionId) {
        self.queues.remove(&id);
    }

    pub(crate) fn push(&self, id: ConnectionId, message: OutboundMessage) {
        if let Some(mut queue) = self.queues.get_mut(&id) {
            queue.push_back(message);
        }
    }

    pub(crate) fn broadcast_have(&self, piece: u32) {
        for mut entry in self.queues.iter_mut() {
            entry.value_mut().push_back(OutboundMessage::Have { piece });
        }
    }

    /// Takes everything queued for one peer, in enqueue order.
    pub fn drain(&self, id: ConnectionId) -> Vec<OutboundMessage> {
        match self.queues.get_mut(&id) {
            Some(mut queue) => queue.drain(..).collect(),
            None => Vec::new(),
        }
    }

    pub fn queued(&self, id: ConnectionId) -> usize {
        self.queues.get(&id).map_or(0, |q| q.len())
    }
}

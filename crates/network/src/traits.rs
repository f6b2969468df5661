//! Transport traits consumed by the consensus core.

use dbft_messages::MsgCode;
use dbft_types::NodeId;

/// Descriptor carried by peer liveness events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// Network identity of the peer.
    pub node: NodeId,
}

impl PeerInfo {
    /// Wrap a node identity.
    pub fn new(node: NodeId) -> Self {
        Self { node }
    }
}

/// An inbound consensus message as delivered by the transport.
#[derive(Debug, Clone)]
pub struct InboundMsg {
    /// Sending peer.
    pub from: NodeId,
    /// Wire code.
    pub code: MsgCode,
    /// Encoded message body.
    pub payload: Vec<u8>,
}

/// Fire-and-forget message transport.
///
/// Delivery is best-effort and unordered; the consensus core tolerates
/// loss via round timeouts, so implementations must never block the
/// caller on a slow peer.
pub trait Sender: Send + Sync {
    /// Queue a message to a single peer.
    fn send_async(&self, peer: &NodeId, code: MsgCode, payload: Vec<u8>);

    /// Queue a message to several peers.
    fn multicast(&self, peers: &[NodeId], code: MsgCode, payload: Vec<u8>) {
        for peer in peers {
            self.send_async(peer, code, payload.clone());
        }
    }
}

/// Outbound connection management, used by the mining-preparation task to
/// dial next-epoch candidates ahead of their first round.
pub trait PeerConnector: Send + Sync {
    /// Open (or re-open) a connection to the given node. Idempotent.
    fn add_peer(&self, node: &NodeId);
}

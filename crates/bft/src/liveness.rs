//! Online-peer tracking and per-round participant views.

use dbft_network::PeerInfo;
use dbft_types::{NodeId, Producer, ProducerSet};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Tracks which peers are currently connected.
///
/// Fed by the transport's peer-added/peer-removed event feeds; read under a
/// shared lock by liveness checks and leader selection.
#[derive(Default)]
pub struct LivenessTracker {
    peers: RwLock<HashMap<NodeId, PeerInfo>>,
}

impl LivenessTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a peer as connected.
    pub fn record_peer_online(&self, peer: PeerInfo) {
        debug!(peer = %peer.node, "peer online");
        self.peers.write().insert(peer.node.clone(), peer);
    }

    /// Record a peer as disconnected.
    pub fn record_peer_offline(&self, node: &NodeId) {
        debug!(peer = %node, "peer offline");
        self.peers.write().remove(node);
    }

    /// Whether the given node is currently connected.
    pub fn is_online(&self, node: &NodeId) -> bool {
        self.peers.read().contains_key(node)
    }

    /// Number of connected peers.
    pub fn online_count(&self) -> usize {
        self.peers.read().len()
    }
}

/// Consume the transport's peer event feeds until cancelled.
pub async fn consume_peer_events(
    tracker: Arc<LivenessTracker>,
    mut added: mpsc::UnboundedReceiver<PeerInfo>,
    mut removed: mpsc::UnboundedReceiver<NodeId>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            peer = added.recv() => match peer {
                Some(peer) => tracker.record_peer_online(peer),
                None => break,
            },
            node = removed.recv() => match node {
                Some(node) => tracker.record_peer_offline(&node),
                None => break,
            },
        }
    }
    trace!("peer event consumer stopped");
}

/// One producer's standing in a specific round.
///
/// Built fresh per round from the producer set and the liveness view;
/// never mutated afterwards.
#[derive(Debug, Clone)]
pub struct MemberInfo {
    /// The producer this entry describes.
    pub producer: Producer,
    /// Position in the producer set (bitmap index).
    pub index: usize,
    /// Whether this entry is the local node.
    pub is_self: bool,
    /// Whether this producer holds the leader slot this round.
    pub is_leader: bool,
    /// Whether the producer is connected (self counts as online).
    pub is_online: bool,
}

/// Build the round's participant view and pick the leader.
///
/// The leader slot is `height % live_count`, counted over the online subset
/// in producer-set order, so unavailable producers are skipped without
/// breaking rotation for nodes that share the same liveness view.
pub fn collect_member_status(
    producers: &ProducerSet,
    tracker: &LivenessTracker,
    local: &NodeId,
    height: u64,
) -> Vec<MemberInfo> {
    let mut members: Vec<MemberInfo> = producers
        .iter()
        .enumerate()
        .map(|(index, producer)| {
            let is_self = &producer.node == local;
            MemberInfo {
                producer: producer.clone(),
                index,
                is_self,
                is_leader: false,
                is_online: is_self || tracker.is_online(&producer.node),
            }
        })
        .collect();

    let online: Vec<usize> = members
        .iter()
        .filter(|m| m.is_online)
        .map(|m| m.index)
        .collect();
    if !online.is_empty() {
        let leader = online[(height % online.len() as u64) as usize];
        members[leader].is_leader = true;
    }
    members
}

//! In-memory network backend for tests and simulation.
//!
//! A hub routes messages between registered endpoints over unbounded
//! channels. Endpoints can be taken offline to simulate partitions; sends
//! to offline or unknown peers are silently dropped, matching the
//! best-effort contract of [`Sender`].

use crate::{InboundMsg, PeerConnector, Sender};
use dbft_messages::MsgCode;
use dbft_types::NodeId;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

#[derive(Default)]
struct Hub {
    endpoints: Mutex<HashMap<NodeId, mpsc::UnboundedSender<InboundMsg>>>,
    offline: Mutex<HashSet<NodeId>>,
}

/// Shared in-memory message hub.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    hub: Arc<Hub>,
}

impl MemoryNetwork {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint, returning its sender handle and inbound queue.
    pub fn register(&self, node: NodeId) -> (MemorySender, mpsc::UnboundedReceiver<InboundMsg>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.hub.endpoints.lock().insert(node.clone(), tx);
        (
            MemorySender {
                hub: Arc::clone(&self.hub),
                local: node,
            },
            rx,
        )
    }

    /// Drop all traffic to and from a node until it is brought back.
    pub fn set_offline(&self, node: &NodeId, offline: bool) {
        let mut set = self.hub.offline.lock();
        if offline {
            set.insert(node.clone());
        } else {
            set.remove(node);
        }
    }
}

/// Per-node sender handle into a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemorySender {
    hub: Arc<Hub>,
    local: NodeId,
}

impl MemorySender {
    /// The identity this handle sends as.
    pub fn local(&self) -> &NodeId {
        &self.local
    }
}

impl Sender for MemorySender {
    fn send_async(&self, peer: &NodeId, code: MsgCode, payload: Vec<u8>) {
        {
            let offline = self.hub.offline.lock();
            if offline.contains(peer) || offline.contains(&self.local) {
                trace!(%peer, ?code, "dropping message to offline peer");
                return;
            }
        }
        let endpoints = self.hub.endpoints.lock();
        if let Some(tx) = endpoints.get(peer) {
            let _ = tx.send(InboundMsg {
                from: self.local.clone(),
                code,
                payload,
            });
        } else {
            trace!(%peer, ?code, "dropping message to unknown peer");
        }
    }
}

impl PeerConnector for MemorySender {
    fn add_peer(&self, _node: &NodeId) {
        // Connections are implicit in the in-memory hub.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str) -> NodeId {
        NodeId::new(name)
    }

    #[tokio::test]
    async fn test_point_to_point_delivery() {
        let net = MemoryNetwork::new();
        let (a, _rx_a) = net.register(node("a"));
        let (_b, mut rx_b) = net.register(node("b"));

        a.send_async(&node("b"), MsgCode::Setup, vec![1, 2, 3]);

        let msg = rx_b.recv().await.unwrap();
        assert_eq!(msg.from, node("a"));
        assert_eq!(msg.code, MsgCode::Setup);
        assert_eq!(msg.payload, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_offline_peer_drops_silently() {
        let net = MemoryNetwork::new();
        let (a, _rx_a) = net.register(node("a"));
        let (_b, mut rx_b) = net.register(node("b"));

        net.set_offline(&node("b"), true);
        a.send_async(&node("b"), MsgCode::Fail, vec![]);

        net.set_offline(&node("b"), false);
        a.send_async(&node("b"), MsgCode::Setup, vec![9]);

        // Only the second message arrives.
        let msg = rx_b.recv().await.unwrap();
        assert_eq!(msg.payload, vec![9]);
    }

    #[tokio::test]
    async fn test_multicast_reaches_all_listed_peers() {
        let net = MemoryNetwork::new();
        let (a, _rx_a) = net.register(node("a"));
        let (_b, mut rx_b) = net.register(node("b"));
        let (_c, mut rx_c) = net.register(node("c"));

        a.multicast(&[node("b"), node("c")], MsgCode::Challenge, vec![7]);

        assert_eq!(rx_b.recv().await.unwrap().payload, vec![7]);
        assert_eq!(rx_c.recv().await.unwrap().payload, vec![7]);
    }
}

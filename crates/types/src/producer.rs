//! Block producer identities and the epoch-scoped producer set.

use crate::PublicKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Network identity of a node (enode-style endpoint string).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// Wrap an endpoint string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The endpoint string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An entity eligible to propose and co-sign blocks for the current epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Producer {
    /// Signing key, also the bitmap identity.
    pub pubkey: PublicKey,

    /// Network identity used for liveness tracking and message delivery.
    pub node: NodeId,
}

/// Ordered, epoch-scoped list of eligible producers.
///
/// Order is significant: it fixes both the leader-rotation index and each
/// producer's bitmap position, and is stable for the whole epoch.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProducerSet(Vec<Producer>);

impl ProducerSet {
    /// Wrap an ordered producer list.
    pub fn new(producers: Vec<Producer>) -> Self {
        Self(producers)
    }

    /// Number of producers.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Producer at a given bitmap index.
    pub fn get(&self, index: usize) -> Option<&Producer> {
        self.0.get(index)
    }

    /// Bitmap index of the producer with the given key.
    pub fn index_of(&self, pubkey: &PublicKey) -> Option<usize> {
        self.0.iter().position(|p| &p.pubkey == pubkey)
    }

    /// Whether a key belongs to the set.
    pub fn contains(&self, pubkey: &PublicKey) -> bool {
        self.index_of(pubkey).is_some()
    }

    /// Iterate in bitmap order.
    pub fn iter(&self) -> impl Iterator<Item = &Producer> {
        self.0.iter()
    }

    /// Minimum number of participants required to finalize a
    /// multi-signature: `ceil(2·N/3)` over the full set.
    pub fn quorum(&self) -> usize {
        let n = self.0.len();
        let mut min = n * 2 / 3;
        if n * 2 % 3 != 0 {
            min += 1;
        }
        min
    }
}

impl<'a> IntoIterator for &'a ProducerSet {
    type Item = &'a Producer;
    type IntoIter = std::slice::Iter<'a, Producer>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Keypair;

    fn set_of(n: u8) -> ProducerSet {
        ProducerSet::new(
            (0..n)
                .map(|i| Producer {
                    pubkey: Keypair::from_seed(&[i + 1; 32]).public(),
                    node: NodeId::new(format!("node-{i}")),
                })
                .collect(),
        )
    }

    #[test]
    fn test_index_lookup() {
        let set = set_of(4);
        let key = Keypair::from_seed(&[3; 32]).public();
        assert_eq!(set.index_of(&key), Some(2));
        assert!(set.contains(&key));

        let stranger = Keypair::from_seed(&[99; 32]).public();
        assert_eq!(set.index_of(&stranger), None);
    }

    #[test]
    fn test_quorum_two_thirds_ceiling() {
        assert_eq!(set_of(3).quorum(), 2);
        assert_eq!(set_of(4).quorum(), 3);
        assert_eq!(set_of(6).quorum(), 4);
        assert_eq!(set_of(7).quorum(), 5);
    }
}

//! Aggregated multi-signature and participation bitmap.

use crate::schnorr::SchnorrSignature;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-producer participation flags, indexed by ProducerSet position.
///
/// One byte per producer (`1` = participated). Producer ordering is stable
/// for the whole epoch, so positions agree between leader and members.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerBitmap(Vec<u8>);

impl SignerBitmap {
    /// An empty bitmap for a producer set of the given size.
    pub fn with_len(len: usize) -> Self {
        Self(vec![0u8; len])
    }

    /// Mark the producer at `index` as a participant.
    ///
    /// Out-of-range indices are ignored; the bitmap length is fixed at
    /// construction.
    pub fn set(&mut self, index: usize) {
        if let Some(slot) = self.0.get_mut(index) {
            *slot = 1;
        }
    }

    /// Whether the producer at `index` participated.
    pub fn is_set(&self, index: usize) -> bool {
        self.0.get(index).copied() == Some(1)
    }

    /// Number of producers covered by this bitmap.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the bitmap covers no producers.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of participants.
    pub fn count_set(&self) -> usize {
        self.0.iter().filter(|&&b| b == 1).count()
    }

    /// Indices of all participants, in producer-set order.
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, &b)| b == 1)
            .map(|(i, _)| i)
    }
}

impl fmt::Debug for SignerBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignerBitmap[")?;
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{b}")?;
        }
        write!(f, "]")
    }
}

/// A finalized multi-signature: the aggregated Schnorr signature plus the
/// bitmap recording which producers contributed, embedded into the block's
/// proof field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiSignature {
    /// Which producers contributed, by ProducerSet index.
    pub bitmap: SignerBitmap,

    /// ProducerSet index of the round's leader.
    pub leader_index: u32,

    /// The aggregated signature.
    pub sig: SchnorrSignature,
}

impl MultiSignature {
    /// Assemble a finalized multi-signature.
    pub fn new(sig: SchnorrSignature, leader_index: usize, bitmap: SignerBitmap) -> Self {
        Self {
            bitmap,
            leader_index: leader_index as u32,
            sig,
        }
    }

    /// Number of contributing producers.
    pub fn participant_count(&self) -> usize {
        self.bitmap.count_set()
    }
}

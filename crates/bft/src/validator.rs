//! Finalized-block multi-signature validation.

use crate::ConsensusError;
use dbft_types::{schnorr, Block, Hash, MultiSignature, ProducerSet, PublicKey, PROOF_TYPE_PBFT};
use tracing::debug;

/// Verifies a finalized multi-signature against the producer set that was
/// active when the block was produced.
#[derive(Debug, Clone, Default)]
pub struct BlockMultiSigValidator;

impl BlockMultiSigValidator {
    /// Create the validator.
    pub fn new() -> Self {
        Self
    }

    /// Check a multi-signature over `msg_hash`.
    ///
    /// The bitmap must cover the full producer set, reach quorum, include
    /// the leader, and the aggregate must verify against the sum of the
    /// participants' keys.
    pub fn validate(
        &self,
        producers: &ProducerSet,
        msg_hash: &Hash,
        multi_sig: &MultiSignature,
    ) -> Result<(), ConsensusError> {
        if multi_sig.bitmap.len() != producers.len() {
            debug!(
                bitmap = multi_sig.bitmap.len(),
                producers = producers.len(),
                "bitmap does not cover the producer set"
            );
            return Err(ConsensusError::MultiSig);
        }
        if multi_sig.participant_count() < producers.quorum() {
            debug!(
                participants = multi_sig.participant_count(),
                quorum = producers.quorum(),
                "multi-signature below quorum"
            );
            return Err(ConsensusError::MultiSig);
        }
        if !multi_sig.bitmap.is_set(multi_sig.leader_index as usize) {
            return Err(ConsensusError::MultiSig);
        }

        let pubkeys: Vec<PublicKey> = multi_sig
            .bitmap
            .indices()
            .filter_map(|i| producers.get(i).map(|p| p.pubkey))
            .collect();
        if pubkeys.len() != multi_sig.participant_count() {
            return Err(ConsensusError::MultiSig);
        }

        let sum_pubkey = schnorr::combine_pubkeys(&pubkeys)?;
        if !schnorr::verify(&sum_pubkey, msg_hash, &multi_sig.sig) {
            return Err(ConsensusError::MultiSig);
        }
        Ok(())
    }

    /// Check a finalized block's embedded proof.
    pub fn validate_block(
        &self,
        producers: &ProducerSet,
        block: &Block,
    ) -> Result<(), ConsensusError> {
        if block.proof.proof_type != PROOF_TYPE_PBFT {
            return Err(ConsensusError::MultiSig);
        }
        let multi_sig: MultiSignature = dbft_messages::decode(&block.proof.evidence)?;
        self.validate(producers, &block.sign_hash(), &multi_sig)
    }
}

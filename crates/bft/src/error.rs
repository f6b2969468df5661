//! Consensus error taxonomy.
//!
//! Protocol errors abort the current round only; liveness errors tell the
//! orchestrator to skip producing at this height. None are process-fatal:
//! the caller logs and retries at the next height.

use dbft_chain::ChainError;
use dbft_messages::CodecError;
use dbft_types::CryptoError;

/// Errors surfaced by the consensus core.
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    /// The local key is not in the current producer set, or another
    /// producer holds the leader slot this height.
    #[error("not this node's turn to produce")]
    NotMyTurn,

    /// Too few live producers to reach quorum, or quorum was not reached
    /// before the round timer expired.
    #[error("not enough live producers for consensus")]
    BftNotReady,

    /// A round phase timer expired.
    #[error("consensus round timed out")]
    Timeout,

    /// A proposal arrived from a peer that is not this height's leader.
    #[error("proposal from a peer that is not the expected leader")]
    LeaderMistake,

    /// The challenge hash does not bind the locally committed message.
    #[error("challenge does not match the committed message hash")]
    Challenge,

    /// An inbound proposal failed validation.
    #[error("proposal failed validation: {0}")]
    ValidateMsg(String),

    /// The aggregated multi-signature failed verification.
    #[error("aggregated multi-signature failed verification")]
    MultiSig,

    /// Re-execution consumed different gas than the proposed header claims.
    #[error("executed gas does not match the proposed header")]
    GasUsed,

    /// Re-execution produced a different state root than the leader's.
    #[error("re-executed state root does not match the proposed one")]
    NotMatchedStateRoot,

    /// Deterministic nonce derivation failed for the local secret key.
    #[error("failed to generate a nonce pair for the local key")]
    GenerateNonce,

    /// The leader aborted the round early; carries its stated reason.
    #[error("round aborted by leader: {0}")]
    RoundFailed(String),

    /// Curve arithmetic rejected a key or scalar.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// A chain collaborator failed.
    #[error(transparent)]
    Chain(#[from] ChainError),

    /// An inbound message could not be decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl ConsensusError {
    /// Whether the error only signals "skip this height" rather than a
    /// protocol violation.
    pub fn is_liveness(&self) -> bool {
        matches!(self, Self::NotMyTurn | Self::BftNotReady)
    }
}

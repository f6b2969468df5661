//! Consensus message types and codec.

use dbft_types::{Hash, MultiSignature, PartialSignature, PublicKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Magic tag for `Setup` messages.
pub const SETUP_MAGIC: u32 = 0x0bf7_0001;
/// Magic tag for `Commitment` messages.
pub const COMMITMENT_MAGIC: u32 = 0x0bf7_0002;
/// Magic tag for `Challenge` messages.
pub const CHALLENGE_MAGIC: u32 = 0x0bf7_0003;
/// Magic tag for `Response` messages.
pub const RESPONSE_MAGIC: u32 = 0x0bf7_0004;
/// Magic tag for `Fail` messages.
pub const FAIL_MAGIC: u32 = 0x0bf7_0005;

/// Wire codes for consensus messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MsgCode {
    /// Leader → members: round proposal.
    Setup = 0,
    /// Member → leader: nonce commitment.
    Commitment = 1,
    /// Leader → members: aggregated challenge.
    Challenge = 2,
    /// Member → leader: partial signature.
    Response = 3,
    /// Either side: early round abort.
    Fail = 4,
}

/// Decode failure for an inbound consensus message.
#[derive(Debug, thiserror::Error)]
#[error("malformed consensus message: {0}")]
pub struct CodecError(#[from] bincode::Error);

/// Encode a consensus message for the wire.
pub fn encode<M: Serialize>(msg: &M) -> Vec<u8> {
    // Fixed-layout message structs; serialization cannot fail.
    bincode::serialize(msg).unwrap()
}

/// Decode a consensus message from the wire.
pub fn decode<M: DeserializeOwned>(bytes: &[u8]) -> Result<M, CodecError> {
    Ok(bincode::deserialize(bytes)?)
}

/// Round proposal broadcast by the leader.
///
/// `payload` is the encoded candidate [`dbft_types::Block`] in round 1 and
/// the encoded [`CompletedBlock`] in round 2.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setup {
    /// Protocol round (1 or 2).
    pub round: u32,
    /// [`SETUP_MAGIC`].
    pub magic: u32,
    /// Chain tip height the round is anchored to.
    pub height: u64,
    /// Encoded round payload.
    pub payload: Vec<u8>,
}

/// Member's nonce commitment `Q`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    /// Protocol round (1 or 2).
    pub round: u32,
    /// [`COMMITMENT_MAGIC`].
    pub magic: u32,
    /// Chain tip height the round is anchored to.
    pub height: u64,
    /// The committing producer's public key.
    pub pubkey: PublicKey,
    /// Nonce commitment `Q = k·G`.
    pub q: PublicKey,
}

/// Leader's aggregated challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// Protocol round (1 or 2).
    pub round: u32,
    /// [`CHALLENGE_MAGIC`].
    pub magic: u32,
    /// Chain tip height the round is anchored to.
    pub height: u64,
    /// Aggregated nonce commitment `ΣQ` over the committed set.
    pub sigma_q: PublicKey,
    /// Aggregated public key `ΣP` over the committed set.
    pub sigma_pubkey: PublicKey,
    /// Challenge hash `e = H(ΣQ ‖ ΣP ‖ m)`.
    pub r: Hash,
}

/// Member's partial signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Protocol round (1 or 2).
    pub round: u32,
    /// [`RESPONSE_MAGIC`].
    pub magic: u32,
    /// Chain tip height the round is anchored to.
    pub height: u64,
    /// The responding producer's public key.
    pub pubkey: PublicKey,
    /// Signature share `s = k − e·x`.
    pub s: PartialSignature,
}

/// Early round abort with the failure reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fail {
    /// Protocol round (1 or 2).
    pub round: u32,
    /// [`FAIL_MAGIC`].
    pub magic: u32,
    /// Chain tip height the round is anchored to.
    pub height: u64,
    /// Human-readable abort reason.
    pub reason: String,
}

/// Round-2 payload: the round-1 multi-signature plus the post-execution
/// state root, cross-confirmed by members before the block is finalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedBlock {
    /// Round-1 multi-signature over the raw block.
    pub multi_sig: MultiSignature,
    /// State root after executing the block and distributing rewards.
    pub state_root: Hash,
}

impl CompletedBlock {
    /// Canonical signable bytes.
    pub fn as_sign_message(&self) -> Vec<u8> {
        encode(self)
    }

    /// Keccak-256 of the signable bytes.
    pub fn sign_hash(&self) -> Hash {
        Hash::digest(&self.as_sign_message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbft_types::{schnorr, Keypair, MultiSignature, SchnorrSignature, SignerBitmap};

    #[test]
    fn test_setup_roundtrip() {
        let setup = Setup {
            round: 1,
            magic: SETUP_MAGIC,
            height: 42,
            payload: vec![0xDE, 0xAD],
        };
        let decoded: Setup = decode(&encode(&setup)).unwrap();
        assert_eq!(decoded, setup);
    }

    #[test]
    fn test_commitment_roundtrip_preserves_keys() {
        let kp = Keypair::from_seed(&[1; 32]);
        let (_, q) = schnorr::generate_nonce_pair(&Hash::digest(b"m"), kp.secret()).unwrap();
        let commitment = Commitment {
            round: 1,
            magic: COMMITMENT_MAGIC,
            height: 7,
            pubkey: kp.public(),
            q,
        };
        let decoded: Commitment = decode(&encode(&commitment)).unwrap();
        assert_eq!(decoded, commitment);
    }

    #[test]
    fn test_completed_block_sign_hash_binds_state_root() {
        let multi_sig = MultiSignature::new(
            SchnorrSignature {
                r: [1; 32],
                s: [2; 32],
            },
            0,
            SignerBitmap::with_len(4),
        );
        let a = CompletedBlock {
            multi_sig: multi_sig.clone(),
            state_root: Hash::digest(b"root-a"),
        };
        let b = CompletedBlock {
            multi_sig,
            state_root: Hash::digest(b"root-b"),
        };
        assert_ne!(a.sign_hash(), b.sign_hash());
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode::<Challenge>(&[0xFF; 3]).is_err());
    }
}

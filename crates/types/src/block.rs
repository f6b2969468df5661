//! Block, header and transaction types.

use crate::{Address, Hash};
use serde::{Deserialize, Serialize};

/// Proof type tag for the PBFT-style multi-signature evidence.
pub const PROOF_TYPE_PBFT: u32 = 1;

/// A balance-transfer transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Sender account nonce.
    pub nonce: u64,
    /// Sender address.
    pub from: Address,
    /// Recipient address.
    pub to: Address,
    /// Amount transferred.
    pub amount: u64,
    /// Fee per gas unit.
    pub gas_price: u64,
    /// Gas ceiling for this transaction.
    pub gas_limit: u64,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
}

impl Transaction {
    /// Keccak-256 of the canonical encoding.
    pub fn hash(&self) -> Hash {
        // Fixed-layout struct; serialization cannot fail.
        Hash::digest(&bincode::serialize(self).unwrap())
    }
}

/// Block header.
///
/// `state_root` is attached only after round-1 agreement (post-execution),
/// so it is excluded from the signable projection along with the proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Chain identifier.
    pub chain_id: u64,
    /// Header format version.
    pub version: u32,
    /// Block height.
    pub height: u64,
    /// Hash of the parent block's header.
    pub previous_hash: Hash,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
    /// Gas ceiling for the block.
    pub gas_limit: u64,
    /// Gas consumed by execution.
    pub gas_used: u64,
    /// Post-execution state root (zero until round 2).
    pub state_root: Hash,
    /// Root over the transaction list.
    pub txn_root: Hash,
}

impl BlockHeader {
    /// Keccak-256 of the full header encoding (chain linkage hash).
    pub fn hash(&self) -> Hash {
        Hash::digest(&bincode::serialize(self).unwrap())
    }
}

/// Transaction list carried by a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockData {
    /// Transactions in execution order.
    pub txs: Vec<Transaction>,
}

impl BlockData {
    /// Root over the transaction hashes, in order.
    pub fn compute_root(&self) -> Hash {
        let hashes: Vec<[u8; 32]> = self.txs.iter().map(|tx| tx.hash().to_bytes()).collect();
        let parts: Vec<&[u8]> = hashes.iter().map(|h| h.as_slice()).collect();
        Hash::digest_parts(&parts)
    }
}

/// Consensus evidence attached to a finalized block.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Proof {
    /// Evidence format tag ([`PROOF_TYPE_PBFT`]).
    pub proof_type: u32,
    /// Encoded evidence (the multi-signature).
    pub evidence: Vec<u8>,
}

/// A block: header, transactions and consensus proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Header.
    pub header: BlockHeader,
    /// Body.
    pub data: BlockData,
    /// Multi-signature evidence; empty until finalized.
    pub proof: Proof,
}

impl Block {
    /// Canonical signable bytes: header with `state_root` zeroed plus the
    /// transaction list, excluding the proof.
    ///
    /// Round 1 signs the block before execution; the post-execution state
    /// root is cross-signed separately in round 2, so it must not feed back
    /// into the round-1 signature.
    pub fn as_sign_message(&self) -> Vec<u8> {
        let mut header = self.header.clone();
        header.state_root = Hash::ZERO;
        // Fixed-layout structs; serialization cannot fail.
        bincode::serialize(&(&header, &self.data)).unwrap()
    }

    /// Keccak-256 of the signable bytes.
    pub fn sign_hash(&self) -> Hash {
        Hash::digest(&self.as_sign_message())
    }
}

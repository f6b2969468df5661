//! Round-kind dispatch: how a member decodes and validates each round's
//! proposal.
//!
//! Round 1 carries the raw candidate block; round 2 carries the
//! [`CompletedBlock`] cross-confirmation. Each kind is one implementation
//! of [`RoundProtocol`], constructed fresh per round by the orchestrator.

use crate::{BlockMultiSigValidator, ConsensusError};
use dbft_chain::{
    BlockValidator, ChainBlockValidator, ChainReader, ExecuteContext, MemoryDb, RewardCalculator,
    TrieStore,
};
use dbft_messages::CompletedBlock;
use dbft_types::{Block, Hash, ProducerSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Round number carrying the raw candidate block.
pub const ROUND_RAW_BLOCK: u32 = 1;
/// Round number carrying the finalized multi-signature and state root.
pub const ROUND_FINALIZED: u32 = 2;

/// Transactions are hashed in batches of this size on worker threads while
/// the round clock is running.
const TX_HASH_BATCH: usize = 64;

/// The accepted payload a member hands back to the orchestrator.
#[derive(Debug, Clone)]
pub enum RoundPayload {
    /// Round 1: the validated candidate block.
    RawBlock(Block),
    /// Round 2: the validated finalization message.
    FinalizedBlock(CompletedBlock),
}

impl RoundPayload {
    /// Hash of the payload's canonical signable bytes.
    pub fn sign_hash(&self) -> Hash {
        match self {
            Self::RawBlock(block) => block.sign_hash(),
            Self::FinalizedBlock(completed) => completed.sign_hash(),
        }
    }
}

/// Per-round decode-and-validate behavior, one implementation per round
/// kind.
pub trait RoundProtocol: Send + Sync {
    /// The round number this protocol handles.
    fn round(&self) -> u32;

    /// Decode the setup payload and validate it against local state.
    fn decode_and_validate(&self, payload: &[u8]) -> Result<RoundPayload, ConsensusError>;
}

/// Round 1: decode the candidate block, check header linkage and body
/// integrity against the local chain tip.
pub struct RawBlockRound {
    chain: Arc<dyn ChainReader>,
    validator: ChainBlockValidator,
}

impl RawBlockRound {
    /// Bind round 1 to the local chain view.
    pub fn new(chain: Arc<dyn ChainReader>) -> Self {
        Self {
            chain,
            validator: ChainBlockValidator::new(),
        }
    }
}

impl RoundProtocol for RawBlockRound {
    fn round(&self) -> u32 {
        ROUND_RAW_BLOCK
    }

    fn decode_and_validate(&self, payload: &[u8]) -> Result<RoundPayload, ConsensusError> {
        let block: Block = dbft_messages::decode(payload)?;
        let parent = self.chain.best_header();
        self.validator
            .verify_header(&block.header, &parent)
            .map_err(|err| ConsensusError::ValidateMsg(err.to_string()))?;

        // Hash transactions in parallel batches so the commitment is sent
        // as early as possible; the root check doubles as body validation.
        let txs = &block.data.txs;
        let mut hashes = vec![Hash::ZERO; txs.len()];
        std::thread::scope(|scope| {
            for (batch, out) in txs.chunks(TX_HASH_BATCH).zip(hashes.chunks_mut(TX_HASH_BATCH)) {
                scope.spawn(move || {
                    for (tx, slot) in batch.iter().zip(out.iter_mut()) {
                        *slot = tx.hash();
                    }
                });
            }
        });
        let raw: Vec<[u8; 32]> = hashes.iter().map(|h| h.to_bytes()).collect();
        let parts: Vec<&[u8]> = raw.iter().map(|h| h.as_slice()).collect();
        if Hash::digest_parts(&parts) != block.header.txn_root {
            return Err(ConsensusError::ValidateMsg(
                "transaction root mismatch".into(),
            ));
        }

        debug!(height = block.header.height, txs = txs.len(), "candidate block accepted");
        Ok(RoundPayload::RawBlock(block))
    }
}

/// Round 2: validate the round-1 multi-signature, re-execute the block and
/// compare state roots bit for bit.
pub struct FinalizedBlockRound {
    block: Block,
    producers: ProducerSet,
    db: MemoryDb,
    parent_root: Hash,
}

impl FinalizedBlockRound {
    /// Bind round 2 to the block accepted in round 1.
    pub fn new(block: Block, producers: ProducerSet, db: MemoryDb, parent_root: Hash) -> Self {
        Self {
            block,
            producers,
            db,
            parent_root,
        }
    }
}

impl RoundProtocol for FinalizedBlockRound {
    fn round(&self) -> u32 {
        ROUND_FINALIZED
    }

    fn decode_and_validate(&self, payload: &[u8]) -> Result<RoundPayload, ConsensusError> {
        let completed: CompletedBlock = dbft_messages::decode(payload)?;

        // Re-execute from the parent state and confirm the leader's
        // post-state independently, then check the proof itself.
        let mut trie = TrieStore::at_root(self.db.clone(), &self.parent_root)?;
        let mut ctx = ExecuteContext::new(&mut trie, &self.block);
        let executed = ChainBlockValidator::new().execute_block(&mut ctx);
        let (gas_used, fees) = (ctx.gas_used, ctx.fees);

        let outcome = executed.map_err(ConsensusError::from).and_then(|()| {
            if gas_used != self.block.header.gas_used {
                return Err(ConsensusError::GasUsed);
            }
            RewardCalculator::new(&self.producers, &completed.multi_sig, fees)
                .accumulate_rewards(&mut trie);
            let root = trie.state_root();
            if root != completed.state_root {
                warn!(local = %root, proposed = %completed.state_root, "state root mismatch");
                return Err(ConsensusError::NotMatchedStateRoot);
            }
            BlockMultiSigValidator::new().validate(
                &self.producers,
                &self.block.sign_hash(),
                &completed.multi_sig,
            )?;
            trie.commit();
            Ok(())
        });

        if let Err(err) = outcome {
            // Drop speculative mutations before surfacing the error.
            trie.recover(&self.parent_root);
            return Err(err);
        }
        Ok(RoundPayload::FinalizedBlock(completed))
    }
}

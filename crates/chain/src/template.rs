//! Block-template generation from a pending-transaction pool.

use crate::{BlockValidator, ChainBlockValidator, ChainError, ExecuteContext, TrieStore};
use dbft_types::{Address, Block, BlockData, BlockHeader, Hash, Proof, Transaction};
use parking_lot::Mutex;
use tracing::debug;

/// A minimal transaction-pool-backed template generator.
///
/// Timestamps derive from the parent header and the block interval, so the
/// leader's template and a member's re-execution agree byte for byte.
pub struct SimpleBlockGenerator {
    chain_id: u64,
    gas_limit: u64,
    pending: Mutex<Vec<Transaction>>,
}

impl SimpleBlockGenerator {
    /// Create a generator with an empty pool.
    pub fn new(chain_id: u64, gas_limit: u64) -> Self {
        Self {
            chain_id,
            gas_limit,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Queue a transaction for the next template.
    pub fn push_transaction(&self, tx: Transaction) {
        self.pending.lock().push(tx);
    }
}

impl crate::BlockGenerator for SimpleBlockGenerator {
    fn generate_template(
        &self,
        trie: &mut TrieStore,
        parent: &BlockHeader,
        _coinbase: Address,
        block_interval: u64,
    ) -> Result<(Block, u64), ChainError> {
        let pending: Vec<Transaction> = std::mem::take(&mut *self.pending.lock());

        let mut template = Block {
            header: BlockHeader {
                chain_id: self.chain_id,
                version: parent.version,
                height: parent.height + 1,
                previous_hash: parent.hash(),
                timestamp: parent.timestamp + block_interval,
                gas_limit: self.gas_limit,
                gas_used: 0,
                state_root: Hash::ZERO,
                txn_root: Hash::ZERO,
            },
            data: BlockData { txs: Vec::new() },
            proof: Proof::default(),
        };

        // Admit transactions one at a time; anything the chain rules
        // reject is dropped from the pool rather than failing the round.
        let validator = ChainBlockValidator::new();
        let mut gas_used = 0;
        let mut fees = 0;
        let mut included = Vec::new();
        for tx in pending {
            let candidate = Block {
                data: BlockData {
                    txs: vec![tx.clone()],
                },
                ..template.clone()
            };
            let mut ctx = ExecuteContext::new(trie, &candidate);
            ctx.gas_remaining = self.gas_limit - gas_used;
            match validator.execute_block(&mut ctx) {
                Ok(()) => {
                    gas_used += ctx.gas_used;
                    fees += ctx.fees;
                    included.push(tx);
                }
                Err(err) => {
                    debug!(%err, "dropping transaction from template");
                }
            }
        }

        template.data.txs = included;
        template.header.gas_used = gas_used;
        template.header.txn_root = template.data.compute_root();
        Ok((template, fees))
    }
}

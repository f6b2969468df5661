//! In-memory canonical chain.

use crate::{CandidateStore, ChainError, ChainReader, MemoryDb, TrieStore};
use dbft_types::{Block, BlockData, BlockHeader, Hash, Producer};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::info;

struct ChainInner {
    // Headers indexed by height; genesis occupies slot 0.
    headers: Vec<BlockHeader>,
    by_hash: HashMap<Hash, u64>,
}

/// Header store holding the canonical chain, backed by the shared
/// [`MemoryDb`] for state snapshots.
pub struct SimpleChain {
    db: MemoryDb,
    inner: RwLock<ChainInner>,
}

impl SimpleChain {
    /// Build a chain with a fresh genesis block.
    ///
    /// Initial balances and the registered candidate list are committed
    /// into the genesis state, and the genesis header anchors its root.
    pub fn genesis(
        db: MemoryDb,
        chain_id: u64,
        gas_limit: u64,
        candidates: &[Producer],
        balances: &[(dbft_types::Address, u64)],
    ) -> Self {
        let mut trie = TrieStore::empty(db.clone());
        for (addr, balance) in balances {
            trie.set_balance(addr, *balance);
        }
        trie.set_candidates(candidates);
        let state_root = trie.commit();

        let header = BlockHeader {
            chain_id,
            version: 1,
            height: 0,
            previous_hash: Hash::ZERO,
            timestamp: 0,
            gas_limit,
            gas_used: 0,
            state_root,
            txn_root: BlockData { txs: Vec::new() }.compute_root(),
        };
        info!(%state_root, "chain initialized at genesis");

        let mut by_hash = HashMap::new();
        by_hash.insert(header.hash(), 0);
        Self {
            db,
            inner: RwLock::new(ChainInner {
                headers: vec![header],
                by_hash,
            }),
        }
    }

    /// Handle to the backing store.
    pub fn db(&self) -> MemoryDb {
        self.db.clone()
    }

    /// Append a finalized block to the tip.
    ///
    /// Only linkage is checked here; chain-rule validation happens before
    /// a block reaches this point.
    pub fn insert_block(&self, block: &Block) -> Result<(), ChainError> {
        let mut inner = self.inner.write();
        // Genesis is always present.
        let tip = inner.headers.last().cloned().unwrap();
        if block.header.height != tip.height + 1 {
            return Err(ChainError::InvalidHeader(format!(
                "insert at height {} onto tip {}",
                block.header.height, tip.height
            )));
        }
        if block.header.previous_hash != tip.hash() {
            return Err(ChainError::InvalidHeader("parent hash mismatch".into()));
        }
        let height = block.header.height;
        inner.by_hash.insert(block.header.hash(), height);
        inner.headers.push(block.header.clone());
        info!(height, hash = %block.header.hash(), txs = block.data.txs.len(), "block inserted");
        Ok(())
    }
}

impl ChainReader for SimpleChain {
    fn best_height(&self) -> u64 {
        self.inner.read().headers.len() as u64 - 1
    }

    fn best_header(&self) -> BlockHeader {
        // Genesis is always present.
        self.inner.read().headers.last().unwrap().clone()
    }

    fn header_by_height(&self, height: u64) -> Result<BlockHeader, ChainError> {
        self.inner
            .read()
            .headers
            .get(height as usize)
            .cloned()
            .ok_or(ChainError::UnknownHeight(height))
    }

    fn header_by_hash(&self, hash: &Hash) -> Result<BlockHeader, ChainError> {
        let inner = self.inner.read();
        inner
            .by_hash
            .get(hash)
            .and_then(|&height| inner.headers.get(height as usize).cloned())
            .ok_or(ChainError::UnknownHash(*hash))
    }
}

impl CandidateStore for SimpleChain {
    fn candidates(&self, state_root: &Hash, top_n: usize) -> Result<Vec<Producer>, ChainError> {
        let trie = TrieStore::at_root(self.db.clone(), state_root)?;
        let mut candidates = trie.candidates();
        candidates.truncate(top_n);
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbft_types::{Address, Keypair, NodeId, Proof};

    fn candidates(n: u8) -> Vec<Producer> {
        (0..n)
            .map(|i| Producer {
                pubkey: Keypair::from_seed(&[i + 1; 32]).public(),
                node: NodeId::new(format!("node-{i}")),
            })
            .collect()
    }

    fn chain() -> SimpleChain {
        SimpleChain::genesis(
            MemoryDb::new(),
            1,
            1_000_000,
            &candidates(4),
            &[(Address([1; 20]), 100)],
        )
    }

    #[test]
    fn test_genesis_anchors_state() {
        let chain = chain();
        assert_eq!(chain.best_height(), 0);

        let genesis = chain.best_header();
        let trie = TrieStore::at_root(chain.db(), &genesis.state_root).unwrap();
        assert_eq!(trie.balance(&Address([1; 20])), 100);
        assert_eq!(trie.candidates().len(), 4);
    }

    #[test]
    fn test_insert_checks_linkage() {
        let chain = chain();
        let genesis = chain.best_header();

        let data = BlockData { txs: Vec::new() };
        let mut block = Block {
            header: BlockHeader {
                height: 1,
                previous_hash: genesis.hash(),
                txn_root: data.compute_root(),
                ..genesis.clone()
            },
            data,
            proof: Proof::default(),
        };
        chain.insert_block(&block).unwrap();
        assert_eq!(chain.best_height(), 1);
        assert_eq!(
            chain.header_by_hash(&block.header.hash()).unwrap().height,
            1
        );

        // Skipping a height is rejected.
        block.header.height = 5;
        assert!(chain.insert_block(&block).is_err());
    }

    #[test]
    fn test_candidate_store_truncates_to_top_n() {
        let chain = chain();
        let root = chain.best_header().state_root;
        let top = chain.candidates(&root, 3).unwrap();
        assert_eq!(top.len(), 3);

        let unknown = Hash::digest(b"nope");
        assert!(chain.candidates(&unknown, 3).is_err());
    }
}

//! Collaborator traits consumed by the consensus core.

use crate::{ChainError, TrieStore};
use dbft_types::{Address, Block, BlockHeader, Hash, Producer};

/// Execution context for one block, carrying the speculative trie and gas
/// accounting.
pub struct ExecuteContext<'a> {
    /// Speculative world state.
    pub trie: &'a mut TrieStore,
    /// The block being executed.
    pub block: &'a Block,
    /// Remaining block gas pool.
    pub gas_remaining: u64,
    /// Gas consumed so far.
    pub gas_used: u64,
    /// Fees collected so far (the reward pool's gas component).
    pub fees: u64,
}

impl<'a> ExecuteContext<'a> {
    /// Open a context with the block's full gas pool.
    pub fn new(trie: &'a mut TrieStore, block: &'a Block) -> Self {
        let gas_remaining = block.header.gas_limit;
        Self {
            trie,
            block,
            gas_remaining,
            gas_used: 0,
            fees: 0,
        }
    }
}

/// Read access to the canonical chain.
pub trait ChainReader: Send + Sync {
    /// Height of the best (tip) block.
    fn best_height(&self) -> u64;

    /// Header of the best block.
    fn best_header(&self) -> BlockHeader;

    /// Header at an exact height.
    fn header_by_height(&self, height: u64) -> Result<BlockHeader, ChainError>;

    /// Header with an exact hash.
    fn header_by_hash(&self, hash: &Hash) -> Result<BlockHeader, ChainError>;
}

/// The stake/candidate store queried when the producer set rolls over.
pub trait CandidateStore: Send + Sync {
    /// Top-N registered candidates as of the state the given root anchors.
    fn candidates(&self, state_root: &Hash, top_n: usize) -> Result<Vec<Producer>, ChainError>;
}

/// Chain-rule engine invoked by the member's round-1 validation and the
/// round-2 re-execution.
pub trait BlockValidator: Send + Sync {
    /// Validate a header against its parent.
    fn verify_header(&self, header: &BlockHeader, parent: &BlockHeader) -> Result<(), ChainError>;

    /// Validate a block body against its header.
    fn verify_body(&self, block: &Block) -> Result<(), ChainError>;

    /// Execute the block's transactions against the context's trie.
    fn execute_block(&self, ctx: &mut ExecuteContext<'_>) -> Result<(), ChainError>;
}

/// External transaction-pool and execution engine producing block
/// templates; consensus only consumes the result.
pub trait BlockGenerator: Send + Sync {
    /// Build a candidate block on top of the given speculative state.
    ///
    /// Returns the template (proof empty, `state_root` zero) and the gas
    /// fees it collected, with the state mutations applied to `trie`.
    fn generate_template(
        &self,
        trie: &mut TrieStore,
        parent: &BlockHeader,
        coinbase: Address,
        block_interval: u64,
    ) -> Result<(Block, u64), ChainError>;
}

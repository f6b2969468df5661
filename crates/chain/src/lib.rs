//! Chain collaborators for the consensus core.
//!
//! Everything here sits outside the consensus state machines and is
//! specified only at its interface boundary: the key-value store and trie
//! snapshot with explicit rollback, chain access, block validation and
//! execution, block-template generation, the candidate (stake) store and
//! reward distribution.

mod error;
mod rewards;
mod service;
mod store;
mod template;
mod traits;
mod validator;

pub use error::ChainError;
pub use rewards::{RewardCalculator, BASE_BLOCK_REWARD};
pub use service::SimpleChain;
pub use store::{MemoryDb, TrieStore, KEY_CANDIDATES, KEY_CHANGE_INTERVAL};
pub use template::SimpleBlockGenerator;
pub use traits::{BlockGenerator, BlockValidator, CandidateStore, ChainReader, ExecuteContext};
pub use validator::{ChainBlockValidator, TX_BASE_GAS};

//! Chain collaborator errors.

use dbft_types::Hash;

/// Errors surfaced across the chain collaborator boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    /// No block at the requested height.
    #[error("no block at height {0}")]
    UnknownHeight(u64),

    /// No block with the requested hash.
    #[error("no block with hash {0}")]
    UnknownHash(Hash),

    /// No state snapshot for the requested root.
    #[error("no state snapshot for root {0}")]
    UnknownStateRoot(Hash),

    /// A header failed chain-rule validation.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// A block body failed chain-rule validation.
    #[error("invalid body: {0}")]
    InvalidBody(String),

    /// Block gas pool exhausted during execution.
    #[error("block gas pool exhausted")]
    GasExhausted,

    /// A transaction's gas limit cannot cover its cost.
    #[error("transaction gas limit too low")]
    GasLimitTooLow,

    /// Sender balance cannot cover amount plus fee.
    #[error("insufficient balance for transfer")]
    InsufficientBalance,

    /// Sender nonce does not match account state.
    #[error("bad nonce: expected {expected}, got {got}")]
    BadNonce {
        /// Account nonce in state.
        expected: u64,
        /// Nonce carried by the transaction.
        got: u64,
    },
}

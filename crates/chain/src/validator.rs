//! Chain-rule validation and transaction execution.

use crate::{ChainError, ExecuteContext};
use dbft_types::{Block, BlockHeader, Transaction};

/// Gas charged for a plain transfer before payload costs.
pub const TX_BASE_GAS: u64 = 21_000;

/// Gas charged per payload byte.
const TX_PAYLOAD_GAS: u64 = 16;

fn intrinsic_gas(tx: &Transaction) -> u64 {
    TX_BASE_GAS + tx.payload.len() as u64 * TX_PAYLOAD_GAS
}

/// Standard chain-rule engine: header linkage, body integrity and
/// balance-transfer execution with gas accounting.
#[derive(Debug, Clone, Default)]
pub struct ChainBlockValidator;

impl ChainBlockValidator {
    /// Create the validator.
    pub fn new() -> Self {
        Self
    }

    fn execute_transaction(
        &self,
        ctx: &mut ExecuteContext<'_>,
        tx: &Transaction,
    ) -> Result<(), ChainError> {
        let gas = intrinsic_gas(tx);
        if gas > tx.gas_limit {
            return Err(ChainError::GasLimitTooLow);
        }
        if gas > ctx.gas_remaining {
            return Err(ChainError::GasExhausted);
        }

        let expected = ctx.trie.nonce(&tx.from);
        if tx.nonce != expected {
            return Err(ChainError::BadNonce {
                expected,
                got: tx.nonce,
            });
        }

        let fee = gas * tx.gas_price;
        let debit = tx
            .amount
            .checked_add(fee)
            .ok_or(ChainError::InsufficientBalance)?;
        ctx.trie.sub_balance(&tx.from, debit)?;
        ctx.trie.add_balance(&tx.to, tx.amount);
        ctx.trie.set_nonce(&tx.from, expected + 1);

        ctx.gas_remaining -= gas;
        ctx.gas_used += gas;
        ctx.fees += fee;
        Ok(())
    }
}

impl crate::BlockValidator for ChainBlockValidator {
    fn verify_header(&self, header: &BlockHeader, parent: &BlockHeader) -> Result<(), ChainError> {
        if header.chain_id != parent.chain_id {
            return Err(ChainError::InvalidHeader("chain id mismatch".into()));
        }
        if header.height != parent.height + 1 {
            return Err(ChainError::InvalidHeader(format!(
                "height {} does not extend parent {}",
                header.height, parent.height
            )));
        }
        if header.previous_hash != parent.hash() {
            return Err(ChainError::InvalidHeader("parent hash mismatch".into()));
        }
        if header.timestamp < parent.timestamp {
            return Err(ChainError::InvalidHeader("timestamp before parent".into()));
        }
        if header.gas_used > header.gas_limit {
            return Err(ChainError::InvalidHeader("gas used above limit".into()));
        }
        Ok(())
    }

    fn verify_body(&self, block: &Block) -> Result<(), ChainError> {
        if block.data.compute_root() != block.header.txn_root {
            return Err(ChainError::InvalidBody("transaction root mismatch".into()));
        }
        Ok(())
    }

    fn execute_block(&self, ctx: &mut ExecuteContext<'_>) -> Result<(), ChainError> {
        for tx in &ctx.block.data.txs {
            self.execute_transaction(ctx, tx)?;
        }
        Ok(())
    }
}

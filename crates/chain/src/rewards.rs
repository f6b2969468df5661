//! Block-reward distribution.
//!
//! Rewards are a pure function of the block's multi-signature bitmap, the
//! producer set and the collected gas fees, so every participant that
//! re-executes a finalized block credits exactly the same amounts.

use crate::TrieStore;
use dbft_types::{MultiSignature, ProducerSet};

/// Flat issuance added to the fee pool for every produced block.
pub const BASE_BLOCK_REWARD: u64 = 5_000_000;

/// Splits the reward pool between the round leader and the producers whose
/// partial signatures made it into the aggregate.
pub struct RewardCalculator<'a> {
    producers: &'a ProducerSet,
    multi_sig: &'a MultiSignature,
    gas_fee: u64,
}

impl<'a> RewardCalculator<'a> {
    /// Bind a calculator to one finalized round.
    pub fn new(producers: &'a ProducerSet, multi_sig: &'a MultiSignature, gas_fee: u64) -> Self {
        Self {
            producers,
            multi_sig,
            gas_fee,
        }
    }

    /// Credit the round's rewards into the trie.
    ///
    /// Half the pool is split equally across the signers in the bitmap; the
    /// leader takes the other half plus any division remainder.
    pub fn accumulate_rewards(&self, trie: &mut TrieStore) {
        let total = BASE_BLOCK_REWARD + self.gas_fee;
        let pool = total / 2;
        let signers: Vec<usize> = self.multi_sig.bitmap.indices().collect();

        let share = if signers.is_empty() { 0 } else { pool / signers.len() as u64 };
        let mut leader_reward = total - share * signers.len() as u64;

        for index in signers {
            match self.producers.get(index) {
                Some(producer) if index as u32 != self.multi_sig.leader_index => {
                    trie.add_balance(&producer.pubkey.address(), share);
                }
                // The leader's signer share folds into its leader payout.
                Some(_) => leader_reward += share,
                None => {}
            }
        }

        if let Some(leader) = self.producers.get(self.multi_sig.leader_index as usize) {
            trie.add_balance(&leader.pubkey.address(), leader_reward);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryDb;
    use dbft_types::{Keypair, NodeId, Producer, SchnorrSignature, SignerBitmap};

    fn producer_set(n: u8) -> ProducerSet {
        ProducerSet::new(
            (0..n)
                .map(|i| Producer {
                    pubkey: Keypair::from_seed(&[i + 1; 32]).public(),
                    node: NodeId::new(format!("node-{i}")),
                })
                .collect(),
        )
    }

    #[test]
    fn test_rewards_are_deterministic_and_conserve_total() {
        let producers = producer_set(4);
        let mut bitmap = SignerBitmap::with_len(4);
        bitmap.set(0);
        bitmap.set(1);
        bitmap.set(2);
        let sig = SchnorrSignature { r: [0; 32], s: [0; 32] };
        let multi_sig = MultiSignature::new(sig, 0, bitmap);

        let gas_fee = 1_001;
        let calc = RewardCalculator::new(&producers, &multi_sig, gas_fee);

        let mut trie = TrieStore::empty(MemoryDb::new());
        calc.accumulate_rewards(&mut trie);

        let total = BASE_BLOCK_REWARD + gas_fee;
        let share = (total / 2) / 3;
        let balances: Vec<u64> = producers
            .iter()
            .map(|p| trie.balance(&p.pubkey.address()))
            .collect();

        assert_eq!(balances[1], share);
        assert_eq!(balances[2], share);
        assert_eq!(balances[3], 0);
        assert_eq!(balances[0], total - 2 * share);
        assert_eq!(balances.iter().sum::<u64>(), total);

        // A second node re-running the same round produces identical state.
        let mut other = TrieStore::empty(MemoryDb::new());
        calc.accumulate_rewards(&mut other);
        assert_eq!(other.state_root(), trie.state_root());
    }
}

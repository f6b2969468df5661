//! Consensus engine configuration.

use std::time::Duration;

/// Default per-phase wait before a round is abandoned.
pub const DEFAULT_WAIT_TIME: Duration = Duration::from_secs(15);

/// Static configuration for the consensus engine.
#[derive(Debug, Clone)]
pub struct BftConfig {
    /// Chain identifier stamped into produced headers.
    pub chain_id: u64,

    /// Number of producer slots filled from the candidate store.
    pub producer_num: usize,

    /// Producer set is recomputed every `change_interval` blocks.
    pub change_interval: u64,

    /// Target seconds between blocks; also the template timestamp step and
    /// the mining-preparation tick.
    pub block_interval: u64,

    /// Per-phase round timeout (setup-wait and challenge-wait).
    pub wait_time: Duration,

    /// Gas ceiling for produced blocks.
    pub gas_limit: u64,
}

impl Default for BftConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            producer_num: 21,
            change_interval: 100,
            block_interval: 10,
            wait_time: DEFAULT_WAIT_TIME,
            gas_limit: 10_000_000,
        }
    }
}

impl BftConfig {
    /// Override the producer slot count.
    pub fn with_producer_num(mut self, producer_num: usize) -> Self {
        self.producer_num = producer_num;
        self
    }

    /// Override the producer-set rollover interval.
    pub fn with_change_interval(mut self, change_interval: u64) -> Self {
        self.change_interval = change_interval;
        self
    }

    /// Override the per-phase round timeout.
    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    /// Override the block interval.
    pub fn with_block_interval(mut self, block_interval: u64) -> Self {
        self.block_interval = block_interval;
        self
    }
}

//! Shared cluster fixture: N producer nodes wired over the in-memory
//! network, each with an independent chain grown from an identical genesis.
#![allow(dead_code)]

use dbft_bft::{BftConfig, BftConsensus};
use dbft_chain::{BlockGenerator, MemoryDb, SimpleBlockGenerator, SimpleChain};
use dbft_network::{MemoryNetwork, PeerInfo};
use dbft_types::{Address, Keypair, NodeId, Producer, ProducerSet, Transaction};
use std::sync::Arc;
use std::time::Duration;

pub const CHAIN_ID: u64 = 1;
pub const GAS_LIMIT: u64 = 1_000_000;

/// Pre-funded account used by test transactions.
pub const FUNDED: Address = Address([0xAA; 20]);
pub const FUNDED_BALANCE: u64 = 10_000_000;

pub struct TestNode {
    pub keypair: Keypair,
    pub node: NodeId,
    pub chain: Arc<SimpleChain>,
    pub generator: Arc<SimpleBlockGenerator>,
    pub consensus: Arc<BftConsensus>,
}

pub struct Cluster {
    pub net: MemoryNetwork,
    pub producers: Vec<Producer>,
    /// One entry per online producer index.
    pub nodes: Vec<(usize, TestNode)>,
}

/// Route test logs through the captured test writer; `RUST_LOG` filters.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn keypair(index: usize) -> Keypair {
    Keypair::from_seed(&[index as u8 + 1; 32])
}

pub fn node_id(index: usize) -> NodeId {
    NodeId::new(format!("node-{index}"))
}

pub fn producer_list(n: usize) -> Vec<Producer> {
    (0..n)
        .map(|i| Producer {
            pubkey: keypair(i).public(),
            node: node_id(i),
        })
        .collect()
}

pub fn producer_set(n: usize) -> ProducerSet {
    ProducerSet::new(producer_list(n))
}

pub fn transfer(nonce: u64, to: Address, amount: u64) -> Transaction {
    Transaction {
        nonce,
        from: FUNDED,
        to,
        amount,
        gas_price: 1,
        gas_limit: 30_000,
        payload: vec![],
    }
}

/// Build a cluster of `n` producers with the given subset online.
///
/// Online nodes are registered on the network, see each other as live, and
/// pump inbound traffic into their consensus engine. Offline producers
/// exist only in the shared producer list.
pub fn cluster(n: usize, online: &[usize], wait_time: Duration) -> Cluster {
    init_tracing();
    let net = MemoryNetwork::new();
    let producers = producer_list(n);
    let config = BftConfig::default()
        .with_producer_num(n)
        .with_change_interval(100)
        .with_wait_time(wait_time)
        .with_block_interval(10);

    let mut nodes = Vec::new();
    for &index in online {
        let kp = keypair(index);
        let node = node_id(index);
        let (sender, inbound) = net.register(node.clone());

        let chain = Arc::new(SimpleChain::genesis(
            MemoryDb::new(),
            CHAIN_ID,
            GAS_LIMIT,
            &producers,
            &[(FUNDED, FUNDED_BALANCE)],
        ));
        let generator = Arc::new(SimpleBlockGenerator::new(CHAIN_ID, GAS_LIMIT));
        let consensus = BftConsensus::new(
            config.clone(),
            kp.clone(),
            node.clone(),
            Arc::new(sender.clone()),
            Arc::new(sender),
            Arc::clone(&chain),
            Arc::clone(&generator) as Arc<dyn BlockGenerator>,
        );
        consensus.spawn_inbound(inbound);

        for &other in online {
            if other != index {
                consensus
                    .liveness()
                    .record_peer_online(PeerInfo::new(node_id(other)));
            }
        }

        nodes.push((
            index,
            TestNode {
                keypair: kp,
                node,
                chain,
                generator,
                consensus,
            },
        ));
    }

    Cluster {
        net,
        producers,
        nodes,
    }
}

impl Cluster {
    pub fn node(&self, index: usize) -> &TestNode {
        &self
            .nodes
            .iter()
            .find(|(i, _)| *i == index)
            .expect("node not in cluster")
            .1
    }
}

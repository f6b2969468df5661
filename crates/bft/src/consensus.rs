//! The consensus orchestrator.
//!
//! Per height: refresh the producer set if the epoch rolled over, build the
//! round's participant view from the liveness tracker, pick the leader slot
//! and run the two protocol rounds as leader or member. Round 1 agrees on
//! the raw block; round 2 agrees on the post-execution state root; the
//! aggregated multi-signature becomes the block's proof.

use crate::liveness::{collect_member_status, consume_peer_events, LivenessTracker, MemberInfo};
use crate::protocol::{
    FinalizedBlockRound, RawBlockRound, RoundPayload, RoundProtocol, ROUND_FINALIZED,
    ROUND_RAW_BLOCK,
};
use crate::round::{msg_pool, MsgPool};
use crate::{BftConfig, ConsensusError, Leader, Member};
use dbft_chain::{
    BlockGenerator, CandidateStore, ChainReader, MemoryDb, RewardCalculator, SimpleChain,
    TrieStore, KEY_CHANGE_INTERVAL,
};
use dbft_messages::{CompletedBlock, MsgCode};
use dbft_network::{InboundMsg, PeerConnector, PeerInfo, Sender};
use dbft_types::{
    Block, BlockHeader, Keypair, MultiSignature, NodeId, Producer, ProducerSet, Proof,
    PROOF_TYPE_PBFT,
};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// The block-production consensus engine.
pub struct BftConsensus {
    config: BftConfig,
    wait_time: RwLock<Duration>,
    keypair: Keypair,
    local: NodeId,
    sender: Arc<dyn Sender>,
    connector: Arc<dyn PeerConnector>,
    chain: Arc<SimpleChain>,
    generator: Arc<dyn BlockGenerator>,
    db: MemoryDb,
    liveness: Arc<LivenessTracker>,
    // (epoch index, set) cached between rollovers.
    producer_cache: Mutex<Option<(u64, ProducerSet)>>,
    member_pool_tx: mpsc::Sender<InboundMsg>,
    member_pool: MsgPool,
    leader_pool_tx: mpsc::Sender<InboundMsg>,
    leader_pool: MsgPool,
    cancel: CancellationToken,
}

impl BftConsensus {
    /// Assemble the engine around its collaborators.
    ///
    /// Writes the producer-change interval into the shared store once, so
    /// collaborators observe the same rollover schedule.
    pub fn new(
        config: BftConfig,
        keypair: Keypair,
        local: NodeId,
        sender: Arc<dyn Sender>,
        connector: Arc<dyn PeerConnector>,
        chain: Arc<SimpleChain>,
        generator: Arc<dyn BlockGenerator>,
    ) -> Arc<Self> {
        let db = chain.db();
        db.put(
            KEY_CHANGE_INTERVAL,
            config.change_interval.to_be_bytes().to_vec(),
        );
        let (member_pool_tx, member_pool) = msg_pool();
        let (leader_pool_tx, leader_pool) = msg_pool();
        Arc::new(Self {
            wait_time: RwLock::new(config.wait_time),
            config,
            keypair,
            local,
            sender,
            connector,
            chain,
            generator,
            db,
            liveness: Arc::new(LivenessTracker::new()),
            producer_cache: Mutex::new(None),
            member_pool_tx,
            member_pool,
            leader_pool_tx,
            leader_pool,
            cancel: CancellationToken::new(),
        })
    }

    /// The liveness tracker, for direct event injection in tests.
    pub fn liveness(&self) -> &Arc<LivenessTracker> {
        &self.liveness
    }

    /// Adjust the per-phase round timeout at runtime.
    pub fn change_time(&self, wait_time: Duration) {
        *self.wait_time.write() = wait_time;
    }

    /// Stop all background tasks.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Route an inbound consensus message into the matching round pool.
    ///
    /// Member-bound and leader-bound traffic use separate bounded pools;
    /// messages beyond capacity are dropped, covered by round timeouts.
    pub fn receive_msg(&self, msg: InboundMsg) {
        let code = msg.code;
        let pool = match code {
            MsgCode::Setup | MsgCode::Challenge | MsgCode::Fail => &self.member_pool_tx,
            MsgCode::Commitment | MsgCode::Response => &self.leader_pool_tx,
        };
        if pool.try_send(msg).is_err() {
            warn!(?code, "consensus pool full, dropping message");
        }
    }

    /// Pump a transport receive queue into the round pools until closed.
    pub fn spawn_inbound(self: &Arc<Self>, mut rx: mpsc::UnboundedReceiver<InboundMsg>) {
        let this = Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Some(msg) => this.receive_msg(msg),
                        None => break,
                    },
                }
            }
        });
    }

    /// Consume the transport's peer liveness feeds until closed.
    pub fn spawn_peer_events(
        self: &Arc<Self>,
        added: mpsc::UnboundedReceiver<PeerInfo>,
        removed: mpsc::UnboundedReceiver<NodeId>,
    ) {
        tokio::spawn(consume_peer_events(
            Arc::clone(&self.liveness),
            added,
            removed,
            self.cancel.clone(),
        ));
    }

    /// Periodically dial next-epoch candidates so rotation never stalls on
    /// connection setup.
    pub fn spawn_prepare_for_mining(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let period = Duration::from_secs(this.config.block_interval.max(1));
            let mut tick = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        if let Err(err) = this.dial_candidates() {
                            debug!(%err, "mining preparation skipped");
                        }
                    }
                }
            }
        });
    }

    fn dial_candidates(&self) -> Result<(), ConsensusError> {
        let root = self.chain.best_header().state_root;
        // Expanded window beyond the active slots, so upcoming producers
        // are already connected when the set rolls over.
        let expanded = self.config.producer_num * 3 / 2;
        for candidate in self.chain.candidates(&root, expanded)? {
            if candidate.node == self.local || self.liveness.is_online(&candidate.node) {
                continue;
            }
            trace!(peer = %candidate.node, "dialing producer candidate");
            self.connector.add_peer(&candidate.node);
        }
        Ok(())
    }

    /// Producer set for `height`, recomputed at epoch boundaries and cached
    /// in between.
    pub fn get_producers(&self, height: u64) -> Result<ProducerSet, ConsensusError> {
        let epoch = height / self.config.change_interval;
        let mut cache = self.producer_cache.lock();
        if let Some((cached_epoch, set)) = cache.as_ref() {
            if *cached_epoch == epoch {
                return Ok(set.clone());
            }
        }
        let root = self.chain.best_header().state_root;
        let candidates = self.chain.candidates(&root, self.config.producer_num)?;
        if candidates.len() < 2 {
            return Err(ConsensusError::BftNotReady);
        }
        let set = ProducerSet::new(candidates);
        debug!(epoch, producers = set.len(), "producer set refreshed");
        *cache = Some((epoch, set.clone()));
        Ok(set)
    }

    /// Attempt to produce (or co-sign) the block at the current tip + 1.
    pub async fn run(&self) -> Result<Block, ConsensusError> {
        let parent = self.chain.best_header();
        let height = parent.height + 1;
        let producers = self.get_producers(height)?;
        if !producers.contains(&self.keypair.public()) {
            return Err(ConsensusError::NotMyTurn);
        }

        let members = collect_member_status(&producers, &self.liveness, &self.local, height);
        let online = members.iter().filter(|m| m.is_online).count();
        if online < 2 {
            return Err(ConsensusError::BftNotReady);
        }
        let leader = members
            .iter()
            .find(|m| m.is_leader)
            .cloned()
            .ok_or(ConsensusError::BftNotReady)?;
        info!(
            height,
            online,
            leader = %leader.producer.node,
            is_leader = leader.is_self,
            "starting consensus round"
        );

        if leader.is_self {
            self.run_as_leader(&parent, height, producers, &members).await
        } else {
            self.run_as_member(&parent, height, producers, leader.producer).await
        }
    }

    async fn run_as_leader(
        &self,
        parent: &BlockHeader,
        height: u64,
        producers: ProducerSet,
        members: &[MemberInfo],
    ) -> Result<Block, ConsensusError> {
        let my_index = producers
            .index_of(&self.keypair.public())
            .ok_or(ConsensusError::NotMyTurn)?;
        let live_members: Vec<NodeId> = members
            .iter()
            .filter(|m| m.is_online && !m.is_self)
            .map(|m| m.producer.node.clone())
            .collect();

        let mut trie = TrieStore::at_root(self.db.clone(), &parent.state_root)?;
        let coinbase = self.keypair.public().address();
        let (mut block, gas_fee) = self.generator.generate_template(
            &mut trie,
            parent,
            coinbase,
            self.config.block_interval,
        )?;

        let leader = Leader::new(
            *self.wait_time.read(),
            self.keypair.clone(),
            my_index,
            producers.clone(),
            live_members,
            height,
            Arc::clone(&self.sender),
            Arc::clone(&self.leader_pool),
        );

        // Round 1: agreement on the raw block content.
        let (sig, bitmap) = leader
            .process_consensus(ROUND_RAW_BLOCK, dbft_messages::encode(&block), block.sign_hash())
            .await?;
        let multi_sig = MultiSignature::new(sig, my_index, bitmap);
        leader.reset();

        // Attach rewards, derive the post-execution state root.
        RewardCalculator::new(&producers, &multi_sig, gas_fee).accumulate_rewards(&mut trie);
        let state_root = trie.commit();

        // Round 2: cross-confirmation of the multi-signature + state root.
        let completed = CompletedBlock {
            multi_sig: multi_sig.clone(),
            state_root,
        };
        leader
            .process_consensus(
                ROUND_FINALIZED,
                dbft_messages::encode(&completed),
                completed.sign_hash(),
            )
            .await?;

        block.header.state_root = state_root;
        block.proof = Proof {
            proof_type: PROOF_TYPE_PBFT,
            evidence: dbft_messages::encode(&multi_sig),
        };
        self.chain.insert_block(&block)?;
        info!(height, hash = %block.header.hash(), participants = multi_sig.participant_count(), "block produced");
        Ok(block)
    }

    async fn run_as_member(
        &self,
        parent: &BlockHeader,
        height: u64,
        producers: ProducerSet,
        leader: Producer,
    ) -> Result<Block, ConsensusError> {
        let member = Member::new(
            *self.wait_time.read(),
            self.keypair.clone(),
            height,
            leader,
            Arc::clone(&self.sender),
            Arc::clone(&self.member_pool),
        );

        let round1: Arc<dyn RoundProtocol> = Arc::new(RawBlockRound::new(
            Arc::clone(&self.chain) as Arc<dyn ChainReader>,
        ));
        let RoundPayload::RawBlock(mut block) = member.process_round(round1).await? else {
            return Err(ConsensusError::ValidateMsg("unexpected round-1 payload".into()));
        };

        member.reset();
        let round2: Arc<dyn RoundProtocol> = Arc::new(FinalizedBlockRound::new(
            block.clone(),
            producers,
            self.db.clone(),
            parent.state_root,
        ));
        let RoundPayload::FinalizedBlock(completed) = member.process_round(round2).await? else {
            return Err(ConsensusError::ValidateMsg("unexpected round-2 payload".into()));
        };

        block.header.state_root = completed.state_root;
        block.proof = Proof {
            proof_type: PROOF_TYPE_PBFT,
            evidence: dbft_messages::encode(&completed.multi_sig),
        };
        self.chain.insert_block(&block)?;
        info!(height, hash = %block.header.hash(), "block co-signed");
        Ok(block)
    }
}

//! Leader role: drives one proposal through commitment collection,
//! challenge and response aggregation.
//!
//! Unlike the member, the leader is the round's clock: each collection
//! phase runs against a deadline, and an expired deadline fails the round
//! with a broadcast `Fail` so members abort promptly instead of waiting
//! out their own timers.

use crate::round::{LeaderState, MsgPool};
use crate::ConsensusError;
use dbft_messages::{
    Challenge, Commitment, Fail, MsgCode, Response, Setup, CHALLENGE_MAGIC, COMMITMENT_MAGIC,
    FAIL_MAGIC, RESPONSE_MAGIC, SETUP_MAGIC,
};
use dbft_network::Sender;
use dbft_types::{
    schnorr, Hash, Keypair, NodeId, PartialSignature, ProducerSet, PublicKey, SchnorrSignature,
    SignerBitmap,
};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace, warn};

/// The leader's view of one consensus round.
pub struct Leader {
    wait_time: Duration,
    keypair: Keypair,
    my_index: usize,
    producers: ProducerSet,
    live_members: Vec<NodeId>,
    height: u64,
    sender: Arc<dyn Sender>,
    pool: MsgPool,
    state: RwLock<LeaderState>,
}

impl Leader {
    /// Build a leader for one height.
    ///
    /// `live_members` are the online producers' nodes, excluding self.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        wait_time: Duration,
        keypair: Keypair,
        my_index: usize,
        producers: ProducerSet,
        live_members: Vec<NodeId>,
        height: u64,
        sender: Arc<dyn Sender>,
        pool: MsgPool,
    ) -> Self {
        Self {
            wait_time,
            keypair,
            my_index,
            producers,
            live_members,
            height,
            sender,
            pool,
            state: RwLock::new(LeaderState::Init),
        }
    }

    /// Current round state.
    pub fn state(&self) -> LeaderState {
        *self.state.read()
    }

    /// Return the leader to `Init` for the next round.
    pub fn reset(&self) {
        *self.state.write() = LeaderState::Init;
    }

    /// Run one signing round over `payload`.
    ///
    /// `msg_hash` is the payload's signable hash; the leader contributes
    /// its own nonce and signature share alongside the members'. Returns
    /// the aggregated signature and the participation bitmap.
    pub async fn process_consensus(
        &self,
        round: u32,
        payload: Vec<u8>,
        msg_hash: Hash,
    ) -> Result<(SchnorrSignature, SignerBitmap), ConsensusError> {
        *self.state.write() = LeaderState::WaitCommitment;
        let quorum = self.producers.quorum();

        let setup = Setup {
            round,
            magic: SETUP_MAGIC,
            height: self.height,
            payload,
        };
        self.sender
            .multicast(&self.live_members, MsgCode::Setup, dbft_messages::encode(&setup));
        debug!(round, height = self.height, peers = self.live_members.len(), "setup broadcast");

        let (own_nonce, own_q) = schnorr::generate_nonce_pair(&msg_hash, self.keypair.secret())
            .map_err(|_| self.fail(round, "nonce derivation failed", ConsensusError::GenerateNonce))?;

        // Commitments keyed by producer index; BTreeMap order fixes the
        // aggregation order on every node.
        let mut commitments: BTreeMap<usize, (PublicKey, PublicKey)> = BTreeMap::new();
        commitments.insert(self.my_index, (self.keypair.public(), own_q));

        let mut pool = self.pool.lock().await;
        let deadline = Instant::now() + self.wait_time;
        while commitments.len() < quorum {
            let msg = match timeout_at(deadline, pool.recv()).await {
                Ok(Some(msg)) => msg,
                Ok(None) | Err(_) => break,
            };
            if msg.code != MsgCode::Commitment {
                trace!(code = ?msg.code, "ignoring non-commitment in commit phase");
                continue;
            }
            let commitment: Commitment = match dbft_messages::decode(&msg.payload) {
                Ok(commitment) => commitment,
                Err(err) => {
                    debug!(%err, peer = %msg.from, "dropping malformed commitment");
                    continue;
                }
            };
            if commitment.round != round
                || commitment.magic != COMMITMENT_MAGIC
                || commitment.height != self.height
            {
                trace!(peer = %msg.from, "mismatched commitment dropped");
                continue;
            }
            let Some(index) = self.producers.index_of(&commitment.pubkey) else {
                warn!(peer = %msg.from, "commitment from non-producer");
                continue;
            };
            if commitments.contains_key(&index) {
                trace!(index, "duplicate commitment dropped");
                continue;
            }
            commitments.insert(index, (commitment.pubkey, commitment.q));
            debug!(index, collected = commitments.len(), quorum, "commitment accepted");
        }

        if commitments.len() < quorum {
            return Err(self.fail(round, "commitment quorum not reached", ConsensusError::BftNotReady));
        }

        // The challenge binds the committed set: ΣQ and ΣP sum over exactly
        // these participants, so every one of them must respond.
        let pubkeys: Vec<PublicKey> = commitments.values().map(|(p, _)| *p).collect();
        let qs: Vec<PublicKey> = commitments.values().map(|(_, q)| *q).collect();
        let sum_pubkey = schnorr::combine_pubkeys(&pubkeys)?;
        let sum_nonce = schnorr::combine_commitments(&qs)?;
        let challenge_hash = schnorr::derive_challenge(&sum_nonce, &sum_pubkey, &msg_hash);

        *self.state.write() = LeaderState::WaitResponse;
        let committed_nodes: Vec<NodeId> = commitments
            .keys()
            .filter(|&&index| index != self.my_index)
            .filter_map(|&index| self.producers.get(index).map(|p| p.node.clone()))
            .collect();
        let challenge = Challenge {
            round,
            magic: CHALLENGE_MAGIC,
            height: self.height,
            sigma_q: sum_nonce,
            sigma_pubkey: sum_pubkey,
            r: challenge_hash,
        };
        self.sender.multicast(
            &committed_nodes,
            MsgCode::Challenge,
            dbft_messages::encode(&challenge),
        );

        let own_partial = schnorr::partial_sign(
            &msg_hash,
            self.keypair.secret(),
            &own_nonce,
            &sum_nonce,
            &sum_pubkey,
        )?;
        let mut responses: BTreeMap<usize, PartialSignature> = BTreeMap::new();
        responses.insert(self.my_index, own_partial);

        let deadline = Instant::now() + self.wait_time;
        while responses.len() < commitments.len() {
            let msg = match timeout_at(deadline, pool.recv()).await {
                Ok(Some(msg)) => msg,
                Ok(None) | Err(_) => break,
            };
            if msg.code != MsgCode::Response {
                continue;
            }
            let response: Response = match dbft_messages::decode(&msg.payload) {
                Ok(response) => response,
                Err(err) => {
                    debug!(%err, peer = %msg.from, "dropping malformed response");
                    continue;
                }
            };
            if response.round != round
                || response.magic != RESPONSE_MAGIC
                || response.height != self.height
            {
                continue;
            }
            let Some(index) = self.producers.index_of(&response.pubkey) else {
                continue;
            };
            let Some((pubkey, q)) = commitments.get(&index) else {
                trace!(index, "response from uncommitted producer dropped");
                continue;
            };
            if responses.contains_key(&index) {
                continue;
            }
            if !schnorr::verify_partial(pubkey, q, &challenge_hash, &response.s) {
                warn!(index, "invalid signature share rejected");
                continue;
            }
            responses.insert(index, response.s);
            debug!(index, collected = responses.len(), expected = commitments.len(), "response accepted");
        }
        drop(pool);

        if responses.len() < commitments.len() {
            return Err(self.fail(round, "response quorum not reached", ConsensusError::BftNotReady));
        }

        let parts: Vec<PartialSignature> = responses.values().copied().collect();
        let s = schnorr::combine_signatures(&parts)?;
        let sig = SchnorrSignature {
            r: challenge_hash.to_bytes(),
            s,
        };
        if !schnorr::verify(&sum_pubkey, &msg_hash, &sig) {
            return Err(self.fail(round, "aggregate verification failed", ConsensusError::MultiSig));
        }

        let mut bitmap = SignerBitmap::with_len(self.producers.len());
        for &index in commitments.keys() {
            bitmap.set(index);
        }
        *self.state.write() = LeaderState::Completed;
        debug!(round, height = self.height, participants = bitmap.count_set(), "round aggregated");
        Ok((sig, bitmap))
    }

    /// Abort the round: notify members and record the error state.
    fn fail(&self, round: u32, reason: &str, err: ConsensusError) -> ConsensusError {
        warn!(round, height = self.height, reason, "leader round failed");
        *self.state.write() = LeaderState::Error;
        let fail = Fail {
            round,
            magic: FAIL_MAGIC,
            height: self.height,
            reason: reason.to_string(),
        };
        self.sender
            .multicast(&self.live_members, MsgCode::Fail, dbft_messages::encode(&fail));
        err
    }
}

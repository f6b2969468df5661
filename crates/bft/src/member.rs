//! Member role: per-round state machine for non-leader producers.
//!
//! One `process_round` call runs a single commit/challenge/response cycle:
//! wait for the leader's `Setup`, validate it, commit a nonce, wait for the
//! `Challenge`, verify the binding and answer with a partial signature.
//! Timers and the message-dispatch loop run as separate tasks over the
//! shared state word; the round body blocks on the three-way
//! error/timeout/completed wait and cancels whatever is still running on
//! exit.

use crate::round::{
    fire, signal, MemberState, MsgPool, RoundSignals, SignalRx, SignalTx,
};
use crate::{ConsensusError, RoundPayload, RoundProtocol};
use dbft_messages::{
    Challenge, Commitment, Fail, MsgCode, Response, Setup, CHALLENGE_MAGIC, COMMITMENT_MAGIC,
    FAIL_MAGIC, RESPONSE_MAGIC, SETUP_MAGIC,
};
use dbft_network::{InboundMsg, Sender};
use dbft_types::{schnorr, Hash, Keypair, Producer, SecretNonce};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Per-round signal set shared with the dispatch and timer tasks.
struct MemberSignals {
    round: RoundSignals,
    cancel_setup: SignalTx,
    cancel_challenge: Mutex<Option<SignalTx>>,
}

struct MemberInner {
    wait_time: Duration,
    keypair: Keypair,
    height: u64,
    leader: Producer,
    sender: Arc<dyn Sender>,
    state: RwLock<MemberState>,
    msg_hash: RwLock<Option<Hash>>,
    nonce: Mutex<Option<SecretNonce>>,
    accepted: Mutex<Option<RoundPayload>>,
}

/// A member's view of one consensus round.
pub struct Member {
    inner: Arc<MemberInner>,
    pool: MsgPool,
}

impl Member {
    /// Build a member for one height with its expected leader.
    pub fn new(
        wait_time: Duration,
        keypair: Keypair,
        height: u64,
        leader: Producer,
        sender: Arc<dyn Sender>,
        pool: MsgPool,
    ) -> Self {
        Self {
            inner: Arc::new(MemberInner {
                wait_time,
                keypair,
                height,
                leader,
                sender,
                state: RwLock::new(MemberState::Init),
                msg_hash: RwLock::new(None),
                nonce: Mutex::new(None),
                accepted: Mutex::new(None),
            }),
            pool,
        }
    }

    /// Current round state.
    pub fn state(&self) -> MemberState {
        *self.inner.state.read()
    }

    /// Return the member to `Init` for the next round.
    ///
    /// Signal channels live only for the duration of one `process_round`
    /// call, so no stale signal can leak into the next round.
    pub fn reset(&self) {
        *self.inner.state.write() = MemberState::Init;
        *self.inner.msg_hash.write() = None;
        *self.inner.nonce.lock() = None;
        *self.inner.accepted.lock() = None;
    }

    /// Run one round to completion.
    ///
    /// Resolves with the accepted payload, or with whichever of
    /// {error, timeout} fired first. All helper tasks are cancelled before
    /// returning.
    pub async fn process_round(
        &self,
        protocol: Arc<dyn RoundProtocol>,
    ) -> Result<RoundPayload, ConsensusError> {
        *self.inner.state.write() = MemberState::WaitSetup;

        let (err_tx, mut err_rx) = signal::<ConsensusError>();
        let (timeout_tx, mut timeout_rx) = signal();
        let (done_tx, mut done_rx) = signal();
        let (cancel_setup_tx, cancel_setup_rx) = signal();
        let (cancel_dispatch_tx, cancel_dispatch_rx) = signal();

        let signals = Arc::new(MemberSignals {
            round: RoundSignals {
                err: err_tx,
                timeout: timeout_tx.clone(),
                done: done_tx,
            },
            cancel_setup: cancel_setup_tx,
            cancel_challenge: Mutex::new(None),
        });

        spawn_phase_timer(
            Arc::clone(&self.inner),
            timeout_tx,
            cancel_setup_rx,
            MemberState::WaitSetup,
            MemberState::WaitSetupTimeout,
        );
        self.spawn_dispatch(Arc::clone(&protocol), Arc::clone(&signals), cancel_dispatch_rx);

        let result = tokio::select! {
            Some(err) = err_rx.recv() => Err(err),
            Some(()) = timeout_rx.recv() => Err(ConsensusError::Timeout),
            Some(()) = done_rx.recv() => Ok(()),
        };

        // Stop whatever is still running; a full channel means the target
        // already finished.
        fire(&signals.cancel_setup, ());
        if let Some(cancel) = signals.cancel_challenge.lock().take() {
            fire(&cancel, ());
        }
        fire(&cancel_dispatch_tx, ());

        result?;
        self.inner
            .accepted
            .lock()
            .take()
            .ok_or(ConsensusError::ValidateMsg("round completed without payload".into()))
    }

    fn spawn_dispatch(
        &self,
        protocol: Arc<dyn RoundProtocol>,
        signals: Arc<MemberSignals>,
        mut cancel: SignalRx,
    ) {
        let inner = Arc::clone(&self.inner);
        let pool = Arc::clone(&self.pool);
        tokio::spawn(async move {
            let mut rx = pool.lock().await;
            loop {
                tokio::select! {
                    _ = cancel.recv() => break,
                    msg = rx.recv() => {
                        let Some(msg) = msg else { break };
                        inner.dispatch(msg, &protocol, &signals);
                        // Stop draining once terminal so the next round's
                        // setup stays queued in the pool.
                        if inner.state.read().is_terminal() {
                            break;
                        }
                    }
                }
            }
        });
    }
}

impl MemberInner {
    fn dispatch(
        self: &Arc<Self>,
        msg: InboundMsg,
        protocol: &Arc<dyn RoundProtocol>,
        signals: &Arc<MemberSignals>,
    ) {
        match msg.code {
            MsgCode::Setup => match dbft_messages::decode::<Setup>(&msg.payload) {
                Ok(setup) => self.handle_setup(&msg.from, setup, protocol, signals),
                Err(err) => debug!(%err, peer = %msg.from, "dropping malformed setup"),
            },
            MsgCode::Challenge => match dbft_messages::decode::<Challenge>(&msg.payload) {
                Ok(challenge) => self.handle_challenge(&msg.from, challenge, protocol, signals),
                Err(err) => debug!(%err, peer = %msg.from, "dropping malformed challenge"),
            },
            MsgCode::Fail => match dbft_messages::decode::<Fail>(&msg.payload) {
                Ok(fail) => self.handle_fail(&msg.from, fail, protocol, signals),
                Err(err) => debug!(%err, peer = %msg.from, "dropping malformed fail"),
            },
            other => trace!(?other, peer = %msg.from, "ignoring non-member message"),
        }
    }

    fn handle_setup(
        self: &Arc<Self>,
        from: &dbft_types::NodeId,
        setup: Setup,
        protocol: &Arc<dyn RoundProtocol>,
        signals: &Arc<MemberSignals>,
    ) {
        if *self.state.read() != MemberState::WaitSetup {
            trace!(round = setup.round, "setup outside WaitSetup, dropped");
            return;
        }
        if setup.round != protocol.round() || setup.magic != SETUP_MAGIC {
            trace!(round = setup.round, "stale-round setup dropped");
            return;
        }
        if setup.height != self.height {
            trace!(
                height = setup.height,
                local = self.height,
                "height-mismatched setup ignored"
            );
            return;
        }
        if *from != self.leader.node {
            warn!(peer = %from, leader = %self.leader.node, "setup from unexpected peer");
            self.abort(ConsensusError::LeaderMistake, signals);
            return;
        }

        let payload = match protocol.decode_and_validate(&setup.payload) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(%err, round = setup.round, "proposal rejected");
                self.abort(err, signals);
                return;
            }
        };
        let msg_hash = payload.sign_hash();

        let (nonce, q) = match schnorr::generate_nonce_pair(&msg_hash, self.keypair.secret()) {
            Ok(pair) => pair,
            Err(err) => {
                warn!(%err, "nonce derivation failed");
                self.abort(ConsensusError::GenerateNonce, signals);
                return;
            }
        };
        *self.msg_hash.write() = Some(msg_hash);
        *self.nonce.lock() = Some(nonce);
        *self.accepted.lock() = Some(payload);

        let commitment = Commitment {
            round: setup.round,
            magic: COMMITMENT_MAGIC,
            height: self.height,
            pubkey: self.keypair.public(),
            q,
        };
        self.sender.send_async(
            &self.leader.node,
            MsgCode::Commitment,
            dbft_messages::encode(&commitment),
        );
        debug!(round = setup.round, height = self.height, "commitment sent");

        fire(&signals.cancel_setup, ());
        *self.state.write() = MemberState::WaitChallenge;

        let (cancel_tx, cancel_rx) = signal();
        *signals.cancel_challenge.lock() = Some(cancel_tx);
        spawn_phase_timer(
            Arc::clone(self),
            signals.round.timeout.clone(),
            cancel_rx,
            MemberState::WaitChallenge,
            MemberState::WaitChallengeTimeout,
        );
    }

    fn handle_challenge(
        self: &Arc<Self>,
        from: &dbft_types::NodeId,
        challenge: Challenge,
        protocol: &Arc<dyn RoundProtocol>,
        signals: &Arc<MemberSignals>,
    ) {
        if *self.state.read() != MemberState::WaitChallenge {
            trace!(round = challenge.round, "challenge outside WaitChallenge, dropped");
            return;
        }
        if challenge.round != protocol.round()
            || challenge.magic != CHALLENGE_MAGIC
            || challenge.height != self.height
            || *from != self.leader.node
        {
            trace!(peer = %from, "mismatched challenge dropped");
            return;
        }

        // The challenge must bind the exact message this member committed
        // to; anything else means the payload changed under us.
        let msg_hash = match *self.msg_hash.read() {
            Some(hash) => hash,
            None => return,
        };
        let expected =
            schnorr::derive_challenge(&challenge.sigma_q, &challenge.sigma_pubkey, &msg_hash);
        if expected != challenge.r {
            warn!(height = self.height, "challenge hash mismatch");
            self.abort(ConsensusError::Challenge, signals);
            return;
        }

        let Some(nonce) = self.nonce.lock().take() else {
            return;
        };
        let partial = match schnorr::partial_sign(
            &msg_hash,
            self.keypair.secret(),
            &nonce,
            &challenge.sigma_q,
            &challenge.sigma_pubkey,
        ) {
            Ok(partial) => partial,
            Err(err) => {
                self.abort(ConsensusError::Crypto(err), signals);
                return;
            }
        };

        let response = Response {
            round: challenge.round,
            magic: RESPONSE_MAGIC,
            height: self.height,
            pubkey: self.keypair.public(),
            s: partial,
        };
        self.sender.send_async(
            &self.leader.node,
            MsgCode::Response,
            dbft_messages::encode(&response),
        );
        debug!(round = challenge.round, height = self.height, "response sent");

        if let Some(cancel) = signals.cancel_challenge.lock().take() {
            fire(&cancel, ());
        }
        *self.state.write() = MemberState::Completed;
        fire(&signals.round.done, ());
    }

    fn handle_fail(
        self: &Arc<Self>,
        from: &dbft_types::NodeId,
        fail: Fail,
        protocol: &Arc<dyn RoundProtocol>,
        signals: &Arc<MemberSignals>,
    ) {
        if fail.round != protocol.round()
            || fail.magic != FAIL_MAGIC
            || fail.height != self.height
            || *from != self.leader.node
        {
            return;
        }
        if self.state.read().is_terminal() {
            return;
        }
        warn!(height = self.height, reason = %fail.reason, "leader aborted round");
        self.abort(ConsensusError::RoundFailed(fail.reason), signals);
    }

    fn abort(&self, err: ConsensusError, signals: &MemberSignals) {
        *self.state.write() = MemberState::Error;
        fire(&signals.round.err, err);
    }
}

/// Timer guarding one phase: fires the timeout signal only if the round is
/// still in the guarded state when the wait elapses.
fn spawn_phase_timer(
    inner: Arc<MemberInner>,
    timeout_tx: SignalTx,
    mut cancel: SignalRx,
    guard: MemberState,
    timeout_state: MemberState,
) {
    let wait = inner.wait_time;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                let mut state = inner.state.write();
                if *state == guard {
                    *state = timeout_state;
                    drop(state);
                    fire(&timeout_tx, ());
                }
            }
            _ = cancel.recv() => {}
        }
    });
}

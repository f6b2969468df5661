//! Shared round plumbing: state words, single-shot signals and bounded
//! message pools.
//!
//! The round logic blocks on a three-way wait (error, timeout, completed).
//! All three signals are capacity-1 channels written with `try_send`:
//! whichever fires first wins and later sends become no-ops, so a timer
//! racing a handler can never double-terminate a round. Cancellation uses
//! the same pattern; a full cancel channel just means the target already
//! stopped.

use crate::ConsensusError;
use dbft_network::InboundMsg;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Member round states. Transitions are monotonic within a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberState {
    /// Fresh or reset; not yet running a round.
    Init,
    /// Waiting for the leader's `Setup`.
    WaitSetup,
    /// `Setup` never arrived within the wait time.
    WaitSetupTimeout,
    /// Committed; waiting for the leader's `Challenge`.
    WaitChallenge,
    /// `Challenge` never arrived within the wait time.
    WaitChallengeTimeout,
    /// Response sent; round finished successfully.
    Completed,
    /// Round aborted.
    Error,
}

impl MemberState {
    /// Whether the round can no longer make progress.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::WaitSetupTimeout | Self::WaitChallengeTimeout | Self::Completed | Self::Error
        )
    }
}

/// Leader round states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderState {
    /// Fresh or reset.
    Init,
    /// Proposal broadcast; collecting commitments.
    WaitCommitment,
    /// Challenge broadcast; collecting responses.
    WaitResponse,
    /// Aggregate assembled and verified.
    Completed,
    /// Round aborted.
    Error,
}

/// Single-shot signal sender (capacity-1, lossy).
pub type SignalTx<T = ()> = mpsc::Sender<T>;
/// Single-shot signal receiver.
pub type SignalRx<T = ()> = mpsc::Receiver<T>;

/// Create a single-shot signal pair.
pub fn signal<T>() -> (SignalTx<T>, SignalRx<T>) {
    mpsc::channel(1)
}

/// Fire a single-shot signal; a full channel means it already fired.
pub fn fire<T>(tx: &SignalTx<T>, value: T) {
    let _ = tx.try_send(value);
}

/// Terminal signals a running round waits on.
pub struct RoundSignals {
    /// Round aborted with an error.
    pub err: SignalTx<ConsensusError>,
    /// A phase timer expired.
    pub timeout: SignalTx,
    /// Round finished successfully.
    pub done: SignalTx,
}

/// Bounded inbound message pool shared between the router and one round's
/// dispatch loop. The mutex hands the receiver to exactly one round at a
/// time; messages queued between rounds stay buffered.
pub type MsgPool = Arc<tokio::sync::Mutex<mpsc::Receiver<InboundMsg>>>;

/// Pool depth; inbound messages beyond this are dropped by the router.
pub const POOL_CAPACITY: usize = 1000;

/// Create a bounded message pool.
pub fn msg_pool() -> (mpsc::Sender<InboundMsg>, MsgPool) {
    let (tx, rx) = mpsc::channel(POOL_CAPACITY);
    (tx, Arc::new(tokio::sync::Mutex::new(rx)))
}

//! Two-round threshold-Schnorr block-production consensus.
//!
//! A rotating set of producers takes turns proposing blocks. The leader
//! and the other live producers run a commit/challenge/response protocol
//! twice per height: round 1 jointly signs the raw block, round 2
//! cross-confirms the post-execution state root. The result is a compact
//! aggregated multi-signature plus a participation bitmap embedded as the
//! block's proof.
//!
//! Layering, leaf to root:
//!
//! - round plumbing: state words, single-shot signals, bounded message pools
//! - [`Member`] / [`Leader`]: the per-round role state machines
//! - [`RoundProtocol`]: round-kind dispatch (raw block vs. finalization)
//! - [`BlockMultiSigValidator`]: proof verification for finalized blocks
//! - [`BftConsensus`]: the orchestrator tying producers, liveness and the
//!   two rounds together

mod config;
mod consensus;
mod error;
mod leader;
mod liveness;
mod member;
mod protocol;
mod round;
mod validator;

pub use config::{BftConfig, DEFAULT_WAIT_TIME};
pub use consensus::BftConsensus;
pub use error::ConsensusError;
pub use leader::Leader;
pub use liveness::{collect_member_status, consume_peer_events, LivenessTracker, MemberInfo};
pub use member::Member;
pub use protocol::{
    FinalizedBlockRound, RawBlockRound, RoundPayload, RoundProtocol, ROUND_FINALIZED,
    ROUND_RAW_BLOCK,
};
pub use round::{msg_pool, LeaderState, MemberState, MsgPool};
pub use validator::BlockMultiSigValidator;

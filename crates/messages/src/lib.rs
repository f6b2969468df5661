//! Wire messages for the consensus protocol.
//!
//! The five phases of the two-round threshold-Schnorr protocol, identified
//! on the wire by small integer codes and a per-family magic tag. All
//! payloads use the compact bincode encoding.

mod consensus;

pub use consensus::{
    decode, encode, Challenge, CodecError, Commitment, CompletedBlock, Fail, MsgCode, Response,
    Setup, CHALLENGE_MAGIC, COMMITMENT_MAGIC, FAIL_MAGIC, RESPONSE_MAGIC, SETUP_MAGIC,
};

//! Core types for the dBFT consensus implementation.
//!
//! This crate provides the foundation layer used throughout the node:
//!
//! - **Primitives**: Keccak-256 [`Hash`], secp256k1 keys and addresses
//! - **Multi-signature**: threshold-Schnorr primitives ([`schnorr`]),
//!   participation bitmaps and the aggregated [`MultiSignature`]
//! - **Chain types**: [`Block`], [`BlockHeader`], [`Transaction`]
//! - **Producers**: the epoch-scoped, ordered [`ProducerSet`]
//!
//! It is self-contained and does not depend on any other workspace crate.

mod block;
mod crypto;
mod hash;
mod multisig;
mod producer;
pub mod schnorr;

pub use block::{Block, BlockData, BlockHeader, Proof, Transaction, PROOF_TYPE_PBFT};
pub use crypto::{Address, CryptoError, Keypair, PublicKey, SecretKey};
pub use hash::{Hash, HexError};
pub use multisig::{MultiSignature, SignerBitmap};
pub use producer::{NodeId, Producer, ProducerSet};
pub use schnorr::{PartialSignature, SchnorrSignature, SecretNonce};

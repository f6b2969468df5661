//! Threshold-Schnorr multi-signature primitives over secp256k1.
//!
//! The commit/challenge/response protocol used by block production:
//!
//! 1. each participant derives a deterministic nonce pair `(k, Q = k·G)`
//!    and sends the commitment `Q` to the aggregator;
//! 2. the aggregator sums commitments and public keys into `ΣQ`, `ΣP` and
//!    derives the challenge `e = H(ΣQ ‖ ΣP ‖ m)`;
//! 3. each participant answers with the partial signature `s = k − e·x`;
//! 4. partials sum into `S = Σs`, and `(e, S)` verifies against `ΣP` by
//!    recomputing `ΣQ = S·G + e·ΣP` and checking `H(ΣQ ‖ ΣP ‖ m) == e`.
//!
//! All operations are pure and stateless. Malformed points fail with
//! [`CryptoError::InvalidKey`]; non-canonical scalars with
//! [`CryptoError::InvalidSignature`].

use crate::{CryptoError, Hash, PublicKey, SecretKey};
use k256::elliptic_curve::ops::Reduce;
use k256::elliptic_curve::{Group, PrimeField};
use k256::{FieldBytes, ProjectivePoint, Scalar, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The secret half of a nonce pair. Never leaves the signing process.
#[derive(Clone)]
pub struct SecretNonce([u8; 32]);

impl SecretNonce {
    fn scalar(&self) -> Scalar {
        // Constructed from a reduced digest, always canonical.
        Scalar::from_repr(self.0.into()).unwrap()
    }
}

impl fmt::Debug for SecretNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretNonce(..)")
    }
}

/// One participant's signature share `s = k − e·x (mod n)`.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialSignature(pub [u8; 32]);

impl PartialSignature {
    fn scalar(&self) -> Result<Scalar, CryptoError> {
        Option::<Scalar>::from(Scalar::from_repr(self.0.into()))
            .ok_or(CryptoError::InvalidSignature)
    }
}

impl fmt::Debug for PartialSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PartialSignature({}..)", &hex::encode(self.0)[..16])
    }
}

/// An aggregated Schnorr signature `(r, s)`.
///
/// `r` is the challenge hash binding the aggregated commitment, the
/// aggregated public key and the message; `s` is the scalar sum of the
/// participants' shares.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchnorrSignature {
    /// Challenge hash `e`.
    pub r: [u8; 32],
    /// Aggregated response scalar.
    pub s: [u8; 32],
}

impl fmt::Debug for SchnorrSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SchnorrSignature(r: {}.., s: {}..)",
            &hex::encode(self.r)[..16],
            &hex::encode(self.s)[..16]
        )
    }
}

fn reduce_digest(digest: &Hash) -> Scalar {
    <Scalar as Reduce<U256>>::reduce_bytes(FieldBytes::from_slice(digest.as_bytes()))
}

/// Derive a deterministic nonce pair from the secret key and message hash.
///
/// RFC6979-style: the nonce is a reduced digest of `x ‖ m ‖ counter`, so
/// identical signing operations reuse the same nonce without consuming
/// external randomness, and distinct messages never share one. The counter
/// only bumps on the (negligible) zero-scalar edge case.
pub fn generate_nonce_pair(
    msg_hash: &Hash,
    secret: &SecretKey,
) -> Result<(SecretNonce, PublicKey), CryptoError> {
    let secret_bytes = secret.to_bytes();
    for counter in 0u64..=255 {
        let digest = Hash::digest_parts(&[
            &secret_bytes,
            msg_hash.as_bytes(),
            &counter.to_be_bytes(),
        ]);
        let k = reduce_digest(&digest);
        if bool::from(k.is_zero()) {
            continue;
        }
        let commitment = PublicKey::from_point(&(ProjectivePoint::GENERATOR * k));
        return Ok((SecretNonce(k.to_bytes().into()), commitment));
    }
    Err(CryptoError::InvalidSignature)
}

/// Derive the round challenge `e = H(ΣQ ‖ ΣP ‖ m)`.
pub fn derive_challenge(sum_nonce: &PublicKey, sum_pubkey: &PublicKey, msg_hash: &Hash) -> Hash {
    Hash::digest_parts(&[
        sum_nonce.as_bytes(),
        sum_pubkey.as_bytes(),
        msg_hash.as_bytes(),
    ])
}

/// Compute this participant's share `s = k − e·x (mod n)`.
pub fn partial_sign(
    msg_hash: &Hash,
    secret: &SecretKey,
    nonce: &SecretNonce,
    sum_nonce: &PublicKey,
    sum_pubkey: &PublicKey,
) -> Result<PartialSignature, CryptoError> {
    // Decode first so a malformed aggregate fails before any signing.
    sum_nonce.point()?;
    sum_pubkey.point()?;
    let e = reduce_digest(&derive_challenge(sum_nonce, sum_pubkey, msg_hash));
    let s = nonce.scalar() - e * secret.scalar();
    Ok(PartialSignature(s.to_bytes().into()))
}

fn combine_points(keys: &[PublicKey]) -> Result<PublicKey, CryptoError> {
    if keys.is_empty() {
        return Err(CryptoError::EmptyAggregate);
    }
    let mut sum = ProjectivePoint::IDENTITY;
    for key in keys {
        sum += key.point()?;
    }
    if bool::from(sum.is_identity()) {
        return Err(CryptoError::InvalidKey);
    }
    Ok(PublicKey::from_point(&sum))
}

/// Aggregate participant public keys into `ΣP`.
pub fn combine_pubkeys(keys: &[PublicKey]) -> Result<PublicKey, CryptoError> {
    combine_points(keys)
}

/// Aggregate nonce commitments into `ΣQ`.
pub fn combine_commitments(commitments: &[PublicKey]) -> Result<PublicKey, CryptoError> {
    combine_points(commitments)
}

/// Sum signature shares into the aggregated response scalar.
pub fn combine_signatures(parts: &[PartialSignature]) -> Result<[u8; 32], CryptoError> {
    if parts.is_empty() {
        return Err(CryptoError::EmptyAggregate);
    }
    let mut sum = Scalar::ZERO;
    for part in parts {
        sum += part.scalar()?;
    }
    Ok(sum.to_bytes().into())
}

/// Verify one participant's share against its commitment:
/// `s·G + e·P == Q`.
pub fn verify_partial(
    pubkey: &PublicKey,
    commitment: &PublicKey,
    challenge: &Hash,
    partial: &PartialSignature,
) -> bool {
    let (Ok(p), Ok(q), Ok(s)) = (pubkey.point(), commitment.point(), partial.scalar()) else {
        return false;
    };
    let e = reduce_digest(challenge);
    ProjectivePoint::GENERATOR * s + p * e == q
}

/// Verify an aggregated signature against the aggregated public key.
///
/// Recomputes `ΣQ = S·G + e·ΣP` and checks the challenge binding.
pub fn verify(sum_pubkey: &PublicKey, msg_hash: &Hash, sig: &SchnorrSignature) -> bool {
    let Ok(p) = sum_pubkey.point() else {
        return false;
    };
    let Some(s) = Option::<Scalar>::from(Scalar::from_repr(sig.s.into())) else {
        return false;
    };
    let e = reduce_digest(&Hash::from_raw(sig.r));
    let sum_nonce = ProjectivePoint::GENERATOR * s + p * e;
    if bool::from(sum_nonce.is_identity()) {
        return false;
    }
    let recomputed = derive_challenge(&PublicKey::from_point(&sum_nonce), sum_pubkey, msg_hash);
    recomputed.to_bytes() == sig.r
}

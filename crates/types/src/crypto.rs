//! secp256k1 key pairs and addresses.
//!
//! Keys are carried on the wire as compressed SEC1 bytes and decoded to
//! curve points lazily, so a malformed key surfaces as [`CryptoError`]
//! at the point of use rather than at deserialization time.

use crate::Hash;
use k256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use k256::elliptic_curve::PrimeField;
use k256::{AffinePoint, EncodedPoint, NonZeroScalar, ProjectivePoint, Scalar};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Errors from key handling and curve arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// A public key is not a valid compressed secp256k1 point.
    #[error("invalid secp256k1 public key")]
    InvalidKey,

    /// A scalar is zero or not canonical mod the curve order.
    #[error("invalid secp256k1 signature scalar")]
    InvalidSignature,

    /// An aggregation was attempted over an empty participant list.
    #[error("cannot aggregate an empty participant list")]
    EmptyAggregate,
}

/// A secp256k1 secret key (canonical nonzero scalar).
#[derive(Clone)]
pub struct SecretKey([u8; 32]);

impl SecretKey {
    /// Generate a random secret key.
    pub fn generate<R: rand::RngCore + rand::CryptoRng>(rng: &mut R) -> Self {
        let scalar = NonZeroScalar::random(rng);
        Self(scalar.to_bytes().into())
    }

    /// Build a secret key from raw big-endian bytes.
    ///
    /// Fails with [`CryptoError::InvalidKey`] if the value is zero or not
    /// below the curve order.
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, CryptoError> {
        let scalar = Option::<Scalar>::from(Scalar::from_repr(bytes.into()))
            .ok_or(CryptoError::InvalidKey)?;
        if bool::from(scalar.is_zero()) {
            return Err(CryptoError::InvalidKey);
        }
        Ok(Self(bytes))
    }

    /// Raw big-endian scalar bytes.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    /// The scalar value. Infallible for a validated key.
    pub(crate) fn scalar(&self) -> Scalar {
        // Validated in the constructors.
        Scalar::from_repr(self.0.into()).unwrap()
    }

    /// The corresponding public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_point(&(ProjectivePoint::GENERATOR * self.scalar()))
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey(..)")
    }
}

/// A secp256k1 public key in compressed SEC1 form (33 bytes).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey([u8; 33]);

impl PublicKey {
    /// Compressed encoding length.
    pub const BYTES: usize = 33;

    /// Build from compressed SEC1 bytes without decoding.
    ///
    /// Point validity is checked when the key is used in curve arithmetic.
    pub fn from_bytes(bytes: [u8; 33]) -> Self {
        Self(bytes)
    }

    pub(crate) fn from_point(point: &ProjectivePoint) -> Self {
        let encoded = point.to_affine().to_encoded_point(true);
        let mut bytes = [0u8; 33];
        bytes.copy_from_slice(encoded.as_bytes());
        Self(bytes)
    }

    /// Decode to a curve point.
    pub(crate) fn point(&self) -> Result<ProjectivePoint, CryptoError> {
        let encoded = EncodedPoint::from_bytes(self.0).map_err(|_| CryptoError::InvalidKey)?;
        let affine = Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))
            .ok_or(CryptoError::InvalidKey)?;
        Ok(ProjectivePoint::from(affine))
    }

    /// Compressed SEC1 bytes.
    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.0
    }

    /// Derive the account address: last 20 bytes of Keccak-256 of the
    /// compressed key.
    pub fn address(&self) -> Address {
        let digest = Hash::digest(&self.0);
        let mut addr = [0u8; 20];
        addr.copy_from_slice(&digest.as_bytes()[12..]);
        Address(addr)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = hex::encode(self.0);
        write!(f, "PublicKey({}..{})", &hex[..8], &hex[hex.len() - 8..])
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BytesVisitor;

        impl<'de> Visitor<'de> for BytesVisitor {
            type Value = PublicKey;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "33 compressed SEC1 bytes")
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<PublicKey, E> {
                let bytes: [u8; 33] = v
                    .try_into()
                    .map_err(|_| E::invalid_length(v.len(), &self))?;
                Ok(PublicKey::from_bytes(bytes))
            }

            fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<PublicKey, A::Error> {
                let mut bytes = [0u8; 33];
                for (i, slot) in bytes.iter_mut().enumerate() {
                    *slot = seq
                        .next_element()?
                        .ok_or_else(|| de::Error::invalid_length(i, &self))?;
                }
                Ok(PublicKey::from_bytes(bytes))
            }
        }

        deserializer.deserialize_bytes(BytesVisitor)
    }
}

/// A keypair convenience wrapper.
#[derive(Clone)]
pub struct Keypair {
    secret: SecretKey,
    public: PublicKey,
}

impl Keypair {
    /// Generate a random keypair.
    pub fn generate<R: rand::RngCore + rand::CryptoRng>(rng: &mut R) -> Self {
        let secret = SecretKey::generate(rng);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Deterministic keypair from a seed (tests and simulation).
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        // Hash the seed into scalar range; bump until canonical and nonzero.
        let mut counter = 0u64;
        loop {
            let digest = Hash::digest_parts(&[seed, &counter.to_be_bytes()]);
            if let Ok(secret) = SecretKey::from_bytes(digest.to_bytes()) {
                let public = secret.public_key();
                return Self { secret, public };
            }
            counter += 1;
        }
    }

    /// The secret key.
    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }

    /// The public key.
    pub fn public(&self) -> PublicKey {
        self.public
    }
}

/// A 20-byte account address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// Zero address.
    pub const ZERO: Self = Self([0u8; 20]);

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address(0x{})", hex::encode(self.0))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_from_seed_deterministic() {
        let kp1 = Keypair::from_seed(&[7u8; 32]);
        let kp2 = Keypair::from_seed(&[7u8; 32]);
        assert_eq!(kp1.public(), kp2.public());

        let kp3 = Keypair::from_seed(&[8u8; 32]);
        assert_ne!(kp1.public(), kp3.public());
    }

    #[test]
    fn test_public_key_roundtrip_point() {
        let kp = Keypair::from_seed(&[1u8; 32]);
        let point = kp.public().point().unwrap();
        assert_eq!(PublicKey::from_point(&point), kp.public());
    }

    #[test]
    fn test_invalid_public_key_rejected() {
        let garbage = PublicKey::from_bytes([0xAB; 33]);
        assert_eq!(garbage.point().unwrap_err(), CryptoError::InvalidKey);
    }

    #[test]
    fn test_secret_key_rejects_zero() {
        assert!(SecretKey::from_bytes([0u8; 32]).is_err());
    }

    #[test]
    fn test_public_key_serde_roundtrip() {
        let kp = Keypair::from_seed(&[3u8; 32]);
        let bytes = bincode::serialize(&kp.public()).unwrap();
        let decoded: PublicKey = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, kp.public());
    }

    #[test]
    fn test_address_derivation_stable() {
        let kp = Keypair::from_seed(&[5u8; 32]);
        assert_eq!(kp.public().address(), kp.public().address());
    }
}

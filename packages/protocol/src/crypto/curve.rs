//! X25519 key pairs and Curve25519 signatures.
//!
//! All long-term and ephemeral keys of the protocol live on Curve25519 in
//! Montgomery form. Signatures use the Ed25519 form of the same key material
//! (XEdDSA): signing converts the Montgomery private scalar to an Edwards
//! point and folds the sign bit into the last signature byte, verification
//! lifts the Montgomery public key to Edwards form and checks a standard
//! Ed25519 equation.

use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::montgomery::MontgomeryPoint;
use curve25519_dalek::scalar::{clamp_integer, Scalar};
use ed25519_dalek::{Signature as Ed25519Signature, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand_core::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey as XPublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{ProtocolError, Result};

/// Wire type tag for Curve25519 public keys.
pub const DJB_TYPE: u8 = 0x05;

/// Serialized public key length (type byte + 32 key bytes).
pub const PUBLIC_KEY_LENGTH: usize = 33;

/// Curve25519 signature length.
pub const SIGNATURE_LENGTH: usize = 64;

/// Domain separator for the signature nonce hash (0xFE then 31 × 0xFF).
const SIGNATURE_NONCE_PREFIX: [u8; 32] = [
    0xFE, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0xFF, 0xFF,
];

/// Curve25519 public key (Montgomery form).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PublicKey {
    bytes: [u8; 32],
}

impl PublicKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Raw 32-byte Montgomery u-coordinate.
    pub fn public_key_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Wire form: type byte followed by the key bytes.
    pub fn serialize(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        let mut out = [0u8; PUBLIC_KEY_LENGTH];
        out[0] = DJB_TYPE;
        out[1..].copy_from_slice(&self.bytes);
        out
    }

    /// Parse a wire-form (33-byte, type-tagged) public key.
    pub fn deserialize(value: &[u8]) -> Result<Self> {
        match value.len() {
            PUBLIC_KEY_LENGTH => {
                if value[0] != DJB_TYPE {
                    return Err(ProtocolError::InvalidArgument(format!(
                        "unknown public key type {:#04x}",
                        value[0]
                    )));
                }
                let mut bytes = [0u8; 32];
                bytes.copy_from_slice(&value[1..]);
                Ok(Self { bytes })
            }
            // Some stored forms carry the bare u-coordinate.
            32 => {
                let mut bytes = [0u8; 32];
                bytes.copy_from_slice(value);
                Ok(Self { bytes })
            }
            length => Err(ProtocolError::InvalidKeyLength {
                kind: "Curve25519 public",
                length,
            }),
        }
    }

    /// Verify a Curve25519 signature made by the matching private key.
    ///
    /// Returns `false` for malformed signatures rather than erroring; callers
    /// decide which typed error the failure maps to.
    pub fn verify_signature(&self, message: &[u8], signature: &[u8]) -> bool {
        if signature.len() != SIGNATURE_LENGTH {
            return false;
        }

        let montgomery = MontgomeryPoint(self.bytes);
        let edwards = match montgomery.to_edwards(signature[63] >> 7) {
            Some(point) => point,
            None => return false,
        };
        let verifying_key = match VerifyingKey::from_bytes(edwards.compress().as_bytes()) {
            Ok(key) => key,
            Err(_) => return false,
        };

        let mut signature_bytes = [0u8; SIGNATURE_LENGTH];
        signature_bytes.copy_from_slice(signature);
        signature_bytes[63] &= 0x7F;

        verifying_key
            .verify(message, &Ed25519Signature::from_bytes(&signature_bytes))
            .is_ok()
    }
}

// Identity keys are compared on every inbound message; keep the comparison
// independent of the position of the first differing byte.
impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.bytes.ct_eq(&other.bytes))
    }
}

impl Eq for PublicKey {}

impl TryFrom<&[u8]> for PublicKey {
    type Error = ProtocolError;

    fn try_from(value: &[u8]) -> Result<Self> {
        Self::deserialize(value)
    }
}

/// Curve25519 private key. The scalar bytes are wiped on drop.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey {
    bytes: [u8; 32],
}

impl PrivateKey {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        Self {
            bytes: secret.to_bytes(),
        }
    }

    pub fn from_bytes(value: &[u8]) -> Result<Self> {
        let bytes: [u8; 32] = value
            .try_into()
            .map_err(|_| ProtocolError::InvalidKeyLength {
                kind: "Curve25519 private",
                length: value.len(),
            })?;
        Ok(Self { bytes })
    }

    /// Serialized scalar in a zero-on-drop container.
    pub fn serialize(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.bytes.to_vec())
    }

    pub fn public_key(&self) -> PublicKey {
        let secret = StaticSecret::from(self.bytes);
        PublicKey::from_bytes(*XPublicKey::from(&secret).as_bytes())
    }

    /// X25519 shared secret with the remote public key.
    pub fn diffie_hellman(&self, their_key: &PublicKey) -> Zeroizing<[u8; 32]> {
        let secret = StaticSecret::from(self.bytes);
        let shared = secret.diffie_hellman(&XPublicKey::from(*their_key.public_key_bytes()));
        Zeroizing::new(shared.to_bytes())
    }

    /// Produce a Curve25519 signature over `message`.
    ///
    /// The signature embeds the Edwards sign bit of the public key in the
    /// high bit of its final byte; `PublicKey::verify_signature` consumes it
    /// from there.
    pub fn calculate_signature(&self, message: &[u8]) -> [u8; SIGNATURE_LENGTH] {
        let mut random_bytes = [0u8; 64];
        OsRng.fill_bytes(&mut random_bytes);

        let a = Scalar::from_bytes_mod_order(clamp_integer(self.bytes));
        let ed_public = EdwardsPoint::mul_base(&a).compress();
        let sign_bit = ed_public.as_bytes()[31] & 0x80;

        let mut nonce_hash = Sha512::new();
        nonce_hash.update(SIGNATURE_NONCE_PREFIX);
        nonce_hash.update(self.bytes);
        nonce_hash.update(message);
        nonce_hash.update(random_bytes);
        let r = Scalar::from_hash(nonce_hash);
        let cap_r = EdwardsPoint::mul_base(&r).compress();

        let mut challenge_hash = Sha512::new();
        challenge_hash.update(cap_r.as_bytes());
        challenge_hash.update(ed_public.as_bytes());
        challenge_hash.update(message);
        let h = Scalar::from_hash(challenge_hash);

        let s = (h * a) + r;

        let mut signature = [0u8; SIGNATURE_LENGTH];
        signature[..32].copy_from_slice(cap_r.as_bytes());
        signature[32..].copy_from_slice(s.as_bytes());
        signature[63] &= 0x7F;
        signature[63] |= sign_bit;
        signature
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey").finish_non_exhaustive()
    }
}

/// X25519 key pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPair {
    pub private_key: PrivateKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let private_key = PrivateKey::generate();
        let public_key = private_key.public_key();
        Self {
            private_key,
            public_key,
        }
    }

    pub fn from_private_key(private_key: PrivateKey) -> Self {
        let public_key = private_key.public_key();
        Self {
            private_key,
            public_key,
        }
    }
}

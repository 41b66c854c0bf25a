//! ML-KEM-1024 (Kyber) key encapsulation.
//!
//! Wraps the pqcrypto implementation behind fixed-size, type-tagged
//! serialized forms so the rest of the core never touches the KEM crate
//! directly. Secret keys and shared secrets are wiped on drop.

use pqcrypto_kyber::kyber1024;
use pqcrypto_traits::kem::{Ciphertext, PublicKey as _, SecretKey as _, SharedSecret as _};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{ProtocolError, Result};

/// Wire type tag for ML-KEM-1024 keys and ciphertexts.
pub const KEM_TYPE: u8 = 0x08;

/// Raw ML-KEM-1024 public key length.
pub const KEM_PUBLIC_KEY_LENGTH: usize = 1568;

/// Raw ML-KEM-1024 secret key length.
pub const KEM_SECRET_KEY_LENGTH: usize = 3168;

/// Raw ML-KEM-1024 ciphertext length.
pub const KEM_CIPHERTEXT_LENGTH: usize = 1568;

/// Shared secret length produced by encapsulation.
pub const KEM_SHARED_SECRET_LENGTH: usize = 32;

/// ML-KEM-1024 public key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KemPublicKey {
    bytes: Vec<u8>,
}

impl KemPublicKey {
    /// Wire form: type byte followed by the raw key.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.bytes.len());
        out.push(KEM_TYPE);
        out.extend_from_slice(&self.bytes);
        out
    }

    /// Parse a wire-form (type-tagged) public key.
    pub fn deserialize(value: &[u8]) -> Result<Self> {
        let bytes = strip_kem_prefix(value, KEM_PUBLIC_KEY_LENGTH, "ML-KEM public")?;
        Ok(Self {
            bytes: bytes.to_vec(),
        })
    }

    /// Encapsulate a fresh shared secret against this key.
    ///
    /// Returns the shared secret and the wire-form ciphertext.
    pub fn encapsulate(&self) -> Result<(Zeroizing<[u8; KEM_SHARED_SECRET_LENGTH]>, Vec<u8>)> {
        let public_key = kyber1024::PublicKey::from_bytes(&self.bytes)
            .map_err(|_| ProtocolError::InvalidSerialization("ML-KEM public key"))?;
        let (shared, ciphertext) = kyber1024::encapsulate(&public_key);

        let mut shared_bytes = Zeroizing::new([0u8; KEM_SHARED_SECRET_LENGTH]);
        shared_bytes.copy_from_slice(shared.as_bytes());

        let mut serialized_ciphertext = Vec::with_capacity(1 + KEM_CIPHERTEXT_LENGTH);
        serialized_ciphertext.push(KEM_TYPE);
        serialized_ciphertext.extend_from_slice(ciphertext.as_bytes());

        Ok((shared_bytes, serialized_ciphertext))
    }
}

impl PartialEq for KemPublicKey {
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.bytes.ct_eq(&other.bytes))
    }
}

impl Eq for KemPublicKey {}

impl TryFrom<&[u8]> for KemPublicKey {
    type Error = ProtocolError;

    fn try_from(value: &[u8]) -> Result<Self> {
        Self::deserialize(value)
    }
}

/// ML-KEM-1024 secret key. Wiped on drop.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct KemSecretKey {
    bytes: Vec<u8>,
}

impl KemSecretKey {
    /// Serialized secret in a zero-on-drop container.
    pub fn serialize(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.bytes.clone())
    }

    pub fn deserialize(value: &[u8]) -> Result<Self> {
        if value.len() != KEM_SECRET_KEY_LENGTH {
            return Err(ProtocolError::InvalidKeyLength {
                kind: "ML-KEM secret",
                length: value.len(),
            });
        }
        Ok(Self {
            bytes: value.to_vec(),
        })
    }

    /// Recover the shared secret from a wire-form ciphertext.
    pub fn decapsulate(
        &self,
        serialized_ciphertext: &[u8],
    ) -> Result<Zeroizing<[u8; KEM_SHARED_SECRET_LENGTH]>> {
        let raw = strip_kem_prefix(serialized_ciphertext, KEM_CIPHERTEXT_LENGTH, "ML-KEM ciphertext")?;
        let ciphertext = kyber1024::Ciphertext::from_bytes(raw)
            .map_err(|_| ProtocolError::InvalidSerialization("ML-KEM ciphertext"))?;
        let secret_key = kyber1024::SecretKey::from_bytes(&self.bytes)
            .map_err(|_| ProtocolError::InvalidSerialization("ML-KEM secret key"))?;

        let shared = kyber1024::decapsulate(&ciphertext, &secret_key);
        let mut shared_bytes = Zeroizing::new([0u8; KEM_SHARED_SECRET_LENGTH]);
        shared_bytes.copy_from_slice(shared.as_bytes());
        Ok(shared_bytes)
    }
}

impl std::fmt::Debug for KemSecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KemSecretKey").finish_non_exhaustive()
    }
}

/// ML-KEM-1024 key pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KemKeyPair {
    pub public_key: KemPublicKey,
    pub secret_key: KemSecretKey,
}

impl KemKeyPair {
    pub fn generate() -> Self {
        let (public_key, secret_key) = kyber1024::keypair();
        Self {
            public_key: KemPublicKey {
                bytes: public_key.as_bytes().to_vec(),
            },
            secret_key: KemSecretKey {
                bytes: secret_key.as_bytes().to_vec(),
            },
        }
    }
}

fn strip_kem_prefix<'a>(
    value: &'a [u8],
    expected_len: usize,
    kind: &'static str,
) -> Result<&'a [u8]> {
    match value.split_first() {
        Some((&KEM_TYPE, rest)) if rest.len() == expected_len => Ok(rest),
        Some((&KEM_TYPE, rest)) => Err(ProtocolError::InvalidKeyLength {
            kind,
            length: rest.len(),
        }),
        Some((&other, _)) => Err(ProtocolError::InvalidArgument(format!(
            "unknown KEM type {other:#04x}"
        ))),
        None => Err(ProtocolError::InvalidKeyLength { kind, length: 0 }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encapsulation_roundtrip() {
        let key_pair = KemKeyPair::generate();
        let (shared_at_sender, ciphertext) = key_pair.public_key.encapsulate().unwrap();
        let shared_at_receiver = key_pair.secret_key.decapsulate(&ciphertext).unwrap();
        assert_eq!(*shared_at_sender, *shared_at_receiver);
    }

    #[test]
    fn serialized_forms_carry_the_type_tag() {
        let key_pair = KemKeyPair::generate();

        let serialized = key_pair.public_key.serialize();
        assert_eq!(serialized.len(), 1 + KEM_PUBLIC_KEY_LENGTH);
        assert_eq!(serialized[0], KEM_TYPE);

        let restored = KemPublicKey::deserialize(&serialized).unwrap();
        assert_eq!(restored, key_pair.public_key);

        let (_, ciphertext) = key_pair.public_key.encapsulate().unwrap();
        assert_eq!(ciphertext.len(), 1 + KEM_CIPHERTEXT_LENGTH);
        assert_eq!(ciphertext[0], KEM_TYPE);
    }

    #[test]
    fn truncated_inputs_are_rejected() {
        let key_pair = KemKeyPair::generate();
        let serialized = key_pair.public_key.serialize();

        assert!(KemPublicKey::deserialize(&serialized[..100]).is_err());
        assert!(KemPublicKey::deserialize(&[]).is_err());

        let (_, mut ciphertext) = key_pair.public_key.encapsulate().unwrap();
        ciphertext.truncate(50);
        assert!(key_pair.secret_key.decapsulate(&ciphertext).is_err());
    }

    #[test]
    fn wrong_type_byte_is_rejected() {
        let key_pair = KemKeyPair::generate();
        let mut serialized = key_pair.public_key.serialize();
        serialized[0] = 0x05;
        assert!(KemPublicKey::deserialize(&serialized).is_err());
    }
}

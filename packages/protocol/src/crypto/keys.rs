//! Key objects: long-term identity, one-time pre-keys, signed pre-keys,
//! Kyber pre-keys and the published pre-key bundle.
//!
//! Each record carries its serialization contract; records holding private
//! halves serialize into zero-on-drop containers.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::curve::{KeyPair, PrivateKey, PublicKey, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
use crate::crypto::kem::{KemKeyPair, KemPublicKey};
use crate::error::{ProtocolError, Result};

/// Long-term identity public key of a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityKey {
    public_key: PublicKey,
}

impl IdentityKey {
    pub fn new(public_key: PublicKey) -> Self {
        Self { public_key }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn serialize(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        self.public_key.serialize()
    }

    pub fn deserialize(value: &[u8]) -> Result<Self> {
        Ok(Self {
            public_key: PublicKey::deserialize(value)?,
        })
    }
}

impl From<PublicKey> for IdentityKey {
    fn from(public_key: PublicKey) -> Self {
        Self { public_key }
    }
}

impl TryFrom<&[u8]> for IdentityKey {
    type Error = ProtocolError;

    fn try_from(value: &[u8]) -> Result<Self> {
        Self::deserialize(value)
    }
}

/// Long-term identity key pair. Created once per install; re-keying is a
/// full re-registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityKeyPair {
    identity_key: IdentityKey,
    private_key: PrivateKey,
}

impl IdentityKeyPair {
    pub fn generate() -> Self {
        let key_pair = KeyPair::generate();
        Self {
            identity_key: IdentityKey::new(key_pair.public_key),
            private_key: key_pair.private_key,
        }
    }

    pub fn new(identity_key: IdentityKey, private_key: PrivateKey) -> Self {
        Self {
            identity_key,
            private_key,
        }
    }

    pub fn identity_key(&self) -> &IdentityKey {
        &self.identity_key
    }

    pub fn public_key(&self) -> &PublicKey {
        self.identity_key.public_key()
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    /// Sign with the identity key (pre-key and Kyber pre-key attestations).
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LENGTH] {
        self.private_key.calculate_signature(message)
    }

    /// Serialized pair in a zero-on-drop container.
    pub fn serialize(&self) -> Result<Zeroizing<Vec<u8>>> {
        bincode::serialize(self)
            .map(Zeroizing::new)
            .map_err(|_| ProtocolError::InvalidSerialization("IdentityKeyPair"))
    }

    pub fn deserialize(value: &[u8]) -> Result<Self> {
        bincode::deserialize(value)
            .map_err(|_| ProtocolError::InvalidSerialization("IdentityKeyPair"))
    }
}

/// One-shot pre-key. Removed from the store after the first inbound
/// handshake that consumes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreKeyRecord {
    id: u32,
    key_pair: KeyPair,
}

impl PreKeyRecord {
    pub fn new(id: u32, key_pair: KeyPair) -> Self {
        Self { id, key_pair }
    }

    pub fn generate(id: u32) -> Self {
        Self::new(id, KeyPair::generate())
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.key_pair.public_key
    }

    pub fn serialize(&self) -> Result<Zeroizing<Vec<u8>>> {
        bincode::serialize(self)
            .map(Zeroizing::new)
            .map_err(|_| ProtocolError::InvalidSerialization("PreKeyRecord"))
    }

    pub fn deserialize(value: &[u8]) -> Result<Self> {
        bincode::deserialize(value).map_err(|_| ProtocolError::InvalidSerialization("PreKeyRecord"))
    }
}

/// Medium-term pre-key signed by the identity key. Rotated periodically;
/// old ones are retained until in-flight bundles expire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPreKeyRecord {
    id: u32,
    timestamp_ms: u64,
    key_pair: KeyPair,
    signature: Vec<u8>,
}

impl SignedPreKeyRecord {
    pub fn new(id: u32, timestamp_ms: u64, key_pair: KeyPair, signature: Vec<u8>) -> Self {
        Self {
            id,
            timestamp_ms,
            key_pair,
            signature,
        }
    }

    pub fn generate(id: u32, timestamp_ms: u64, identity: &IdentityKeyPair) -> Self {
        let key_pair = KeyPair::generate();
        let signature = identity.sign(&key_pair.public_key.serialize());
        Self::new(id, timestamp_ms, key_pair, signature.to_vec())
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.key_pair.public_key
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn serialize(&self) -> Result<Zeroizing<Vec<u8>>> {
        bincode::serialize(self)
            .map(Zeroizing::new)
            .map_err(|_| ProtocolError::InvalidSerialization("SignedPreKeyRecord"))
    }

    pub fn deserialize(value: &[u8]) -> Result<Self> {
        bincode::deserialize(value)
            .map_err(|_| ProtocolError::InvalidSerialization("SignedPreKeyRecord"))
    }
}

/// Kyber pre-key signed by the identity key. Marked used (not deleted) on
/// consumption so a replayed bundle can still be answered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KyberPreKeyRecord {
    id: u32,
    timestamp_ms: u64,
    key_pair: KemKeyPair,
    signature: Vec<u8>,
}

impl KyberPreKeyRecord {
    pub fn new(id: u32, timestamp_ms: u64, key_pair: KemKeyPair, signature: Vec<u8>) -> Self {
        Self {
            id,
            timestamp_ms,
            key_pair,
            signature,
        }
    }

    pub fn generate(id: u32, timestamp_ms: u64, identity: &IdentityKeyPair) -> Self {
        let key_pair = KemKeyPair::generate();
        let signature = identity.sign(&key_pair.public_key.serialize());
        Self::new(id, timestamp_ms, key_pair, signature.to_vec())
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn key_pair(&self) -> &KemKeyPair {
        &self.key_pair
    }

    pub fn public_key(&self) -> &KemPublicKey {
        &self.key_pair.public_key
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn serialize(&self) -> Result<Zeroizing<Vec<u8>>> {
        bincode::serialize(self)
            .map(Zeroizing::new)
            .map_err(|_| ProtocolError::InvalidSerialization("KyberPreKeyRecord"))
    }

    pub fn deserialize(value: &[u8]) -> Result<Self> {
        bincode::deserialize(value)
            .map_err(|_| ProtocolError::InvalidSerialization("KyberPreKeyRecord"))
    }
}

/// Kyber part of a published bundle; present for v4, absent for legacy v3,
/// never partial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KyberPreKeyBundlePart {
    pub id: u32,
    pub public_key: KemPublicKey,
    pub signature: Vec<u8>,
}

/// Published capability to start a session with a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreKeyBundle {
    registration_id: u32,
    device_id: u32,
    pre_key: Option<(u32, PublicKey)>,
    signed_pre_key_id: u32,
    signed_pre_key_public: PublicKey,
    signed_pre_key_signature: Vec<u8>,
    identity_key: IdentityKey,
    kyber_pre_key: Option<KyberPreKeyBundlePart>,
}

impl PreKeyBundle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registration_id: u32,
        device_id: u32,
        pre_key: Option<(u32, PublicKey)>,
        signed_pre_key_id: u32,
        signed_pre_key_public: PublicKey,
        signed_pre_key_signature: Vec<u8>,
        identity_key: IdentityKey,
        kyber_pre_key: Option<KyberPreKeyBundlePart>,
    ) -> Self {
        Self {
            registration_id,
            device_id,
            pre_key,
            signed_pre_key_id,
            signed_pre_key_public,
            signed_pre_key_signature,
            identity_key,
            kyber_pre_key,
        }
    }

    pub fn registration_id(&self) -> u32 {
        self.registration_id
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    pub fn pre_key_id(&self) -> Option<u32> {
        self.pre_key.map(|(id, _)| id)
    }

    pub fn pre_key_public(&self) -> Option<&PublicKey> {
        self.pre_key.as_ref().map(|(_, key)| key)
    }

    pub fn signed_pre_key_id(&self) -> u32 {
        self.signed_pre_key_id
    }

    pub fn signed_pre_key_public(&self) -> &PublicKey {
        &self.signed_pre_key_public
    }

    pub fn signed_pre_key_signature(&self) -> &[u8] {
        &self.signed_pre_key_signature
    }

    pub fn identity_key(&self) -> &IdentityKey {
        &self.identity_key
    }

    pub fn kyber_pre_key(&self) -> Option<&KyberPreKeyBundlePart> {
        self.kyber_pre_key.as_ref()
    }

    /// Version of the session this bundle establishes: 4 with a Kyber
    /// pre-key, legacy 3 without one.
    pub fn session_version(&self) -> u8 {
        if self.kyber_pre_key.is_some() {
            4
        } else {
            3
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_key_pair_roundtrip() {
        let pair = IdentityKeyPair::generate();
        let serialized = pair.serialize().unwrap();
        let restored = IdentityKeyPair::deserialize(&serialized).unwrap();

        assert_eq!(restored.identity_key(), pair.identity_key());
        assert_eq!(
            restored.private_key().public_key(),
            pair.private_key().public_key()
        );
    }

    #[test]
    fn signed_pre_key_signature_verifies_under_identity() {
        let identity = IdentityKeyPair::generate();
        let record = SignedPreKeyRecord::generate(1, 1_700_000_000_000, &identity);

        assert!(identity.public_key().verify_signature(
            &record.public_key().serialize(),
            record.signature()
        ));
    }

    #[test]
    fn kyber_pre_key_signature_verifies_under_identity() {
        let identity = IdentityKeyPair::generate();
        let record = KyberPreKeyRecord::generate(200, 1_700_000_000_000, &identity);

        assert!(identity
            .public_key()
            .verify_signature(&record.public_key().serialize(), record.signature()));
    }

    #[test]
    fn record_roundtrips() {
        let identity = IdentityKeyPair::generate();

        let pre_key = PreKeyRecord::generate(100);
        let restored = PreKeyRecord::deserialize(&pre_key.serialize().unwrap()).unwrap();
        assert_eq!(restored.id(), 100);
        assert_eq!(restored.public_key(), pre_key.public_key());

        let signed = SignedPreKeyRecord::generate(1, 42, &identity);
        let restored = SignedPreKeyRecord::deserialize(&signed.serialize().unwrap()).unwrap();
        assert_eq!(restored.id(), 1);
        assert_eq!(restored.timestamp_ms(), 42);
        assert_eq!(restored.signature(), signed.signature());

        let kyber = KyberPreKeyRecord::generate(200, 42, &identity);
        let restored = KyberPreKeyRecord::deserialize(&kyber.serialize().unwrap()).unwrap();
        assert_eq!(restored.id(), 200);
        assert_eq!(restored.public_key(), kyber.public_key());
    }

    #[test]
    fn bundle_version_depends_on_kyber_part() {
        let identity = IdentityKeyPair::generate();
        let signed = SignedPreKeyRecord::generate(1, 0, &identity);
        let kyber = KyberPreKeyRecord::generate(200, 0, &identity);

        let v3 = PreKeyBundle::new(
            1,
            1,
            None,
            signed.id(),
            *signed.public_key(),
            signed.signature().to_vec(),
            *identity.identity_key(),
            None,
        );
        assert_eq!(v3.session_version(), 3);

        let v4 = PreKeyBundle::new(
            1,
            1,
            None,
            signed.id(),
            *signed.public_key(),
            signed.signature().to_vec(),
            *identity.identity_key(),
            Some(KyberPreKeyBundlePart {
                id: kyber.id(),
                public_key: kyber.public_key().clone(),
                signature: kyber.signature().to_vec(),
            }),
        );
        assert_eq!(v4.session_version(), 4);
    }
}

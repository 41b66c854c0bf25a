//! Key derivation for the Double Ratchet.
//!
//! Three layers of secrets, each derived from the one above:
//!
//! ```text
//! PQXDH secrets ──HKDF──► RootKey
//! RootKey + DH  ──HKDF──► RootKey' + ChainKey      (DH ratchet step)
//! ChainKey      ──HMAC──► ChainKey' + seed         (symmetric step)
//! seed          ──HKDF──► MessageKeys (cipher key, MAC key, IV)
//! ```
//!
//! The derivation labels and layouts are fixed by the established wire
//! format and must not change.

use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::cipher::hmac_sha256;
use crate::crypto::curve::{PrivateKey, PublicKey};
use crate::error::{ProtocolError, Result};

const KDF_ROOT_INFO: &[u8] = b"WhisperRatchet";
const KDF_MESSAGE_KEYS_INFO: &[u8] = b"WhisperMessageKeys";
const KDF_SESSION_INFO_V3: &[u8] = b"WhisperText";
const KDF_SESSION_INFO_V4: &[u8] = b"WhisperText_X25519_SHA-256_CRYSTALS-KYBER-1024";

const MESSAGE_KEY_SEED: [u8; 1] = [0x01];
const CHAIN_KEY_SEED: [u8; 1] = [0x02];

/// Domain-separation prefix mixed in front of the handshake secrets.
pub const DISCONTINUITY_BYTES: [u8; 32] = [0xFF; 32];

/// Session-level secret; every DH ratchet turn replaces it.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct RootKey {
    key: [u8; 32],
}

impl RootKey {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    /// One DH ratchet turn: mix a fresh DH output into the root key,
    /// producing the successor root key and a chain key for the new chain.
    pub fn create_chain(
        &self,
        their_ratchet_key: &PublicKey,
        our_ratchet_key: &PrivateKey,
    ) -> Result<(RootKey, ChainKey)> {
        let shared_secret = our_ratchet_key.diffie_hellman(their_ratchet_key);

        let mut derived = [0u8; 64];
        Hkdf::<Sha256>::new(Some(&self.key), &*shared_secret)
            .expand(KDF_ROOT_INFO, &mut derived)
            .map_err(|_| ProtocolError::InvalidArgument("HKDF output length".to_string()))?;

        let mut root_key = [0u8; 32];
        let mut chain_key = [0u8; 32];
        root_key.copy_from_slice(&derived[..32]);
        chain_key.copy_from_slice(&derived[32..]);
        derived.zeroize();

        Ok((RootKey::new(root_key), ChainKey::new(chain_key, 0)))
    }
}

impl std::fmt::Debug for RootKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootKey").finish_non_exhaustive()
    }
}

/// Per-direction chain secret; advances once per message.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct ChainKey {
    key: [u8; 32],
    index: u32,
}

impl ChainKey {
    pub fn new(key: [u8; 32], index: u32) -> Self {
        Self { key, index }
    }

    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn next_chain_key(&self) -> Result<ChainKey> {
        let index = self
            .index
            .checked_add(1)
            .ok_or(ProtocolError::InvalidSessionState("chain counter overflow"))?;
        Ok(ChainKey::new(hmac_sha256(&self.key, &CHAIN_KEY_SEED)?, index))
    }

    /// Derive the message keys for the current index without advancing.
    pub fn message_keys(&self) -> Result<MessageKeys> {
        let seed = hmac_sha256(&self.key, &MESSAGE_KEY_SEED)?;
        MessageKeys::derive(&seed, self.index)
    }
}

impl std::fmt::Debug for ChainKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainKey")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

/// Keys for exactly one message.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct MessageKeys {
    cipher_key: [u8; 32],
    mac_key: [u8; 32],
    iv: [u8; 16],
    counter: u32,
}

impl MessageKeys {
    pub fn derive(seed: &[u8; 32], counter: u32) -> Result<Self> {
        let mut derived = [0u8; 80];
        Hkdf::<Sha256>::new(None, seed)
            .expand(KDF_MESSAGE_KEYS_INFO, &mut derived)
            .map_err(|_| ProtocolError::InvalidArgument("HKDF output length".to_string()))?;

        let mut keys = Self {
            cipher_key: [0u8; 32],
            mac_key: [0u8; 32],
            iv: [0u8; 16],
            counter,
        };
        keys.cipher_key.copy_from_slice(&derived[..32]);
        keys.mac_key.copy_from_slice(&derived[32..64]);
        keys.iv.copy_from_slice(&derived[64..]);
        derived.zeroize();

        Ok(keys)
    }

    pub fn cipher_key(&self) -> &[u8; 32] {
        &self.cipher_key
    }

    pub fn mac_key(&self) -> &[u8; 32] {
        &self.mac_key
    }

    pub fn iv(&self) -> &[u8; 16] {
        &self.iv
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }
}

impl std::fmt::Debug for MessageKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageKeys")
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}

/// Derive the initial root and chain key from the concatenated handshake
/// secrets (discontinuity prefix, the DH outputs and, for v4 sessions, the
/// KEM shared secret).
pub fn derive_initial_session_keys(secrets: &[u8], post_quantum: bool) -> Result<(RootKey, ChainKey)> {
    let info = if post_quantum {
        KDF_SESSION_INFO_V4
    } else {
        KDF_SESSION_INFO_V3
    };

    let mut derived = [0u8; 64];
    Hkdf::<Sha256>::new(None, secrets)
        .expand(info, &mut derived)
        .map_err(|_| ProtocolError::InvalidArgument("HKDF output length".to_string()))?;

    let mut root_key = [0u8; 32];
    let mut chain_key = [0u8; 32];
    root_key.copy_from_slice(&derived[..32]);
    chain_key.copy_from_slice(&derived[32..]);
    derived.zeroize();

    Ok((RootKey::new(root_key), ChainKey::new(chain_key, 0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::curve::KeyPair;

    #[test]
    fn chain_key_advances_deterministically() {
        let chain = ChainKey::new([7u8; 32], 0);

        let next_a = chain.next_chain_key().unwrap();
        let next_b = chain.next_chain_key().unwrap();
        assert_eq!(next_a.key(), next_b.key());
        assert_eq!(next_a.index(), 1);
        assert_ne!(chain.key(), next_a.key());
    }

    #[test]
    fn message_keys_differ_per_index() {
        let chain = ChainKey::new([9u8; 32], 0);
        let keys_0 = chain.message_keys().unwrap();
        let keys_1 = chain.next_chain_key().unwrap().message_keys().unwrap();

        assert_eq!(keys_0.counter(), 0);
        assert_eq!(keys_1.counter(), 1);
        assert_ne!(keys_0.cipher_key(), keys_1.cipher_key());
        assert_ne!(keys_0.mac_key(), keys_1.mac_key());
        assert_ne!(keys_0.iv(), keys_1.iv());
    }

    #[test]
    fn create_chain_agrees_for_both_parties() {
        let root = RootKey::new([3u8; 32]);
        let ours = KeyPair::generate();
        let theirs = KeyPair::generate();

        let (root_a, chain_a) = root.create_chain(&theirs.public_key, &ours.private_key).unwrap();
        let (root_b, chain_b) = root.create_chain(&ours.public_key, &theirs.private_key).unwrap();

        assert_eq!(root_a.key(), root_b.key());
        assert_eq!(chain_a.key(), chain_b.key());
        assert_eq!(chain_a.index(), 0);
    }

    #[test]
    fn initial_session_keys_are_version_separated() {
        let secrets = [0x5Au8; 32 + 32 * 3];
        let (root_v3, _) = derive_initial_session_keys(&secrets, false).unwrap();
        let (root_v4, _) = derive_initial_session_keys(&secrets, true).unwrap();
        assert_ne!(root_v3.key(), root_v4.key());
    }

    #[test]
    fn chain_counter_overflow_is_an_error() {
        let chain = ChainKey::new([1u8; 32], u32::MAX);
        assert!(chain.next_chain_key().is_err());
    }
}

//! Sender-key state for group messaging.
//!
//! Each `(sender, distribution_id)` pair owns a [`SenderKeyRecord`]: the
//! current chain plus a bounded history of previous chains, so late group
//! messages remain decryptable after the sender rolls its key.

use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::Config;
use crate::crypto::cipher::hmac_sha256;
use crate::crypto::curve::{PrivateKey, PublicKey};
use crate::error::{ProtocolError, Result};

const KDF_GROUP_INFO: &[u8] = b"WhisperGroup";
const MESSAGE_KEY_SEED: [u8; 1] = [0x01];
const CHAIN_KEY_SEED: [u8; 1] = [0x02];

/// Symmetric chain of one sender-key chain; advances once per message.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SenderChainKey {
    iteration: u32,
    seed: [u8; 32],
}

impl SenderChainKey {
    pub fn new(iteration: u32, seed: [u8; 32]) -> Self {
        Self { iteration, seed }
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn seed(&self) -> &[u8; 32] {
        &self.seed
    }

    pub fn next(&self) -> Result<SenderChainKey> {
        let iteration = self
            .iteration
            .checked_add(1)
            .ok_or(ProtocolError::InvalidSessionState("sender chain overflow"))?;
        Ok(SenderChainKey::new(
            iteration,
            hmac_sha256(&self.seed, &CHAIN_KEY_SEED)?,
        ))
    }

    /// Derive the message keys for the current iteration without advancing.
    pub fn message_keys(&self) -> Result<SenderMessageKeys> {
        let seed = hmac_sha256(&self.seed, &MESSAGE_KEY_SEED)?;

        let mut derived = [0u8; 48];
        Hkdf::<Sha256>::new(None, &seed)
            .expand(KDF_GROUP_INFO, &mut derived)
            .map_err(|_| ProtocolError::InvalidArgument("HKDF output length".to_string()))?;

        let mut keys = SenderMessageKeys {
            iteration: self.iteration,
            iv: [0u8; 16],
            cipher_key: [0u8; 32],
        };
        keys.iv.copy_from_slice(&derived[..16]);
        keys.cipher_key.copy_from_slice(&derived[16..]);
        derived.zeroize();
        Ok(keys)
    }
}

impl std::fmt::Debug for SenderChainKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SenderChainKey")
            .field("iteration", &self.iteration)
            .finish_non_exhaustive()
    }
}

/// Keys for exactly one group message.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SenderMessageKeys {
    iteration: u32,
    iv: [u8; 16],
    cipher_key: [u8; 32],
}

impl SenderMessageKeys {
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn iv(&self) -> &[u8; 16] {
        &self.iv
    }

    pub fn cipher_key(&self) -> &[u8; 32] {
        &self.cipher_key
    }
}

impl std::fmt::Debug for SenderMessageKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SenderMessageKeys")
            .field("iteration", &self.iteration)
            .finish_non_exhaustive()
    }
}

/// One chain of a sender key: id, symmetric chain, signing key and the
/// cache of skipped message keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderKeyState {
    chain_id: u32,
    chain_key: SenderChainKey,
    signing_key_public: PublicKey,
    signing_key_private: Option<PrivateKey>,
    cached_message_keys: Vec<SenderMessageKeys>,
}

impl SenderKeyState {
    pub fn new(
        chain_id: u32,
        iteration: u32,
        chain_seed: [u8; 32],
        signing_key_public: PublicKey,
        signing_key_private: Option<PrivateKey>,
    ) -> Self {
        Self {
            chain_id,
            chain_key: SenderChainKey::new(iteration, chain_seed),
            signing_key_public,
            signing_key_private,
            cached_message_keys: Vec::new(),
        }
    }

    pub fn chain_id(&self) -> u32 {
        self.chain_id
    }

    pub fn chain_key(&self) -> &SenderChainKey {
        &self.chain_key
    }

    pub fn set_chain_key(&mut self, chain_key: SenderChainKey) {
        self.chain_key = chain_key;
    }

    pub fn signing_key_public(&self) -> &PublicKey {
        &self.signing_key_public
    }

    /// Present only for chains we created ourselves.
    pub fn signing_key_private(&self) -> Option<&PrivateKey> {
        self.signing_key_private.as_ref()
    }

    pub fn cache_message_keys(&mut self, message_keys: SenderMessageKeys) {
        self.cached_message_keys.push(message_keys);
        let max_keys = Config::global().max_message_keys_per_chain;
        if self.cached_message_keys.len() > max_keys {
            self.cached_message_keys.remove(0);
        }
    }

    pub fn take_message_keys(&mut self, iteration: u32) -> Option<SenderMessageKeys> {
        let position = self
            .cached_message_keys
            .iter()
            .position(|keys| keys.iteration() == iteration)?;
        Some(self.cached_message_keys.remove(position))
    }
}

/// All chains known for one `(sender, distribution_id)`, newest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SenderKeyRecord {
    states: Vec<SenderKeyState>,
}

impl SenderKeyRecord {
    pub fn new_empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// The current (most recently added) chain.
    pub fn state(&self) -> Result<&SenderKeyState> {
        self.states
            .first()
            .ok_or(ProtocolError::InvalidSessionState("empty sender key record"))
    }

    pub fn state_mut(&mut self) -> Result<&mut SenderKeyState> {
        self.states
            .first_mut()
            .ok_or(ProtocolError::InvalidSessionState("empty sender key record"))
    }

    pub fn state_for_chain_id(&mut self, chain_id: u32) -> Option<&mut SenderKeyState> {
        self.states
            .iter_mut()
            .find(|state| state.chain_id() == chain_id)
    }

    /// Install a chain as current. An existing chain with the same id and
    /// signing key is replaced; history is trimmed to its bound.
    pub fn add_state(&mut self, state: SenderKeyState) {
        self.states.retain(|existing| {
            existing.chain_id() != state.chain_id()
                || existing.signing_key_public() != state.signing_key_public()
        });
        self.states.insert(0, state);
        self.states.truncate(Config::global().max_sender_key_chains);
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|_| ProtocolError::InvalidSerialization("SenderKeyRecord"))
    }

    pub fn deserialize(value: &[u8]) -> Result<Self> {
        bincode::deserialize(value)
            .map_err(|_| ProtocolError::InvalidSerialization("SenderKeyRecord"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::curve::KeyPair;

    #[test]
    fn chain_advances_and_derives_distinct_keys() {
        let chain = SenderChainKey::new(0, [1u8; 32]);
        let next = chain.next().unwrap();

        assert_eq!(next.iteration(), 1);
        assert_ne!(chain.seed(), next.seed());

        let keys_0 = chain.message_keys().unwrap();
        let keys_1 = next.message_keys().unwrap();
        assert_eq!(keys_0.iteration(), 0);
        assert_eq!(keys_1.iteration(), 1);
        assert_ne!(keys_0.cipher_key(), keys_1.cipher_key());
        assert_ne!(keys_0.iv(), keys_1.iv());
    }

    #[test]
    fn record_keeps_bounded_history_newest_first() {
        let mut record = SenderKeyRecord::new_empty();
        let bound = Config::global().max_sender_key_chains;

        for chain_id in 0..(bound as u32 + 3) {
            let signing = KeyPair::generate();
            record.add_state(SenderKeyState::new(
                chain_id,
                0,
                [chain_id as u8; 32],
                signing.public_key,
                None,
            ));
        }

        assert_eq!(record.state().unwrap().chain_id(), bound as u32 + 2);
        assert!(record.state_for_chain_id(0).is_none());
        assert!(record.state_for_chain_id(3).is_some());
    }

    #[test]
    fn reprocessing_same_chain_does_not_duplicate() {
        let mut record = SenderKeyRecord::new_empty();
        let signing = KeyPair::generate();

        record.add_state(SenderKeyState::new(7, 0, [1u8; 32], signing.public_key, None));
        record.add_state(SenderKeyState::new(7, 0, [1u8; 32], signing.public_key, None));

        assert_eq!(record.states.len(), 1);
    }

    #[test]
    fn message_key_cache_consumes_entries() {
        let signing = KeyPair::generate();
        let mut state = SenderKeyState::new(1, 0, [2u8; 32], signing.public_key, None);

        let keys = state.chain_key().message_keys().unwrap();
        state.cache_message_keys(keys);

        assert!(state.take_message_keys(0).is_some());
        assert!(state.take_message_keys(0).is_none());
    }

    #[test]
    fn record_roundtrip_is_byte_identical() {
        let mut record = SenderKeyRecord::new_empty();
        let signing = KeyPair::generate();
        record.add_state(SenderKeyState::new(
            3,
            5,
            [9u8; 32],
            signing.public_key,
            Some(signing.private_key.clone()),
        ));

        let bytes = record.serialize().unwrap();
        let restored = SenderKeyRecord::deserialize(&bytes).unwrap();
        assert_eq!(restored.serialize().unwrap(), bytes);
        assert_eq!(restored.state().unwrap().chain_id(), 3);
        assert!(restored.state().unwrap().signing_key_private().is_some());
    }
}

//! Pairwise session state.
//!
//! A [`SessionRecord`] owns one current [`SessionState`] plus a bounded list
//! of archived predecessors, so messages in flight across a ratchet install
//! can still decrypt. States are plain data; all ratcheting logic lives in
//! the session cipher.
//!
//! ## State Components
//!
//! ### Root key
//! - Replaced on every DH ratchet step
//! - Source for chain key derivation
//!
//! ### Sender chain
//! - Our current ratchet key pair plus the outbound chain key
//! - Absent until the handshake installs it
//!
//! ### Receiver chains
//! - One per remote ratchet key, bounded, oldest evicted
//! - Each carries a cache of skipped message keys for out-of-order arrivals

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::Config;
use crate::crypto::curve::{KeyPair, PrivateKey, PublicKey};
use crate::crypto::keys::IdentityKey;
use crate::crypto::ratchet::{ChainKey, MessageKeys, RootKey};
use crate::error::{ProtocolError, Result};

/// Our half of the ratchet plus the outbound symmetric chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SenderChain {
    ratchet_key_pair: KeyPair,
    chain_key: ChainKey,
}

/// One inbound chain keyed by the remote ratchet key, with its cache of
/// skipped message keys (oldest first).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReceiverChain {
    sender_ratchet_key: PublicKey,
    chain_key: ChainKey,
    cached_message_keys: Vec<MessageKeys>,
}

/// Pre-key material the initiator keeps repeating until the responder's
/// first reply acknowledges the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingPreKey {
    pub pre_key_id: Option<u32>,
    pub signed_pre_key_id: u32,
    pub kyber_pre_key_id: Option<u32>,
    pub kyber_ciphertext: Option<Vec<u8>>,
    pub base_key: PublicKey,
}

/// Evolving post-quantum secret carried alongside the root key. Opaque to
/// the ratchet; wiped on drop.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct PqRatchetState {
    bytes: Vec<u8>,
}

impl std::fmt::Debug for PqRatchetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PqRatchetState").finish_non_exhaustive()
    }
}

impl PqRatchetState {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// One epoch of a pairwise session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    session_version: u8,
    local_identity: IdentityKey,
    remote_identity: Option<IdentityKey>,
    root_key: RootKey,
    previous_counter: u32,
    sender_chain: Option<SenderChain>,
    receiver_chains: Vec<ReceiverChain>,
    pending_pre_key: Option<PendingPreKey>,
    local_registration_id: u32,
    remote_registration_id: u32,
    alice_base_key: Option<Vec<u8>>,
    pq_ratchet_state: Option<PqRatchetState>,
    created_at_ms: u64,
}

impl SessionState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_version: u8,
        local_identity: IdentityKey,
        remote_identity: IdentityKey,
        root_key: RootKey,
        local_registration_id: u32,
        created_at_ms: u64,
    ) -> Self {
        Self {
            session_version,
            local_identity,
            remote_identity: Some(remote_identity),
            root_key,
            previous_counter: 0,
            sender_chain: None,
            receiver_chains: Vec::new(),
            pending_pre_key: None,
            local_registration_id,
            remote_registration_id: 0,
            alice_base_key: None,
            pq_ratchet_state: None,
            created_at_ms,
        }
    }

    pub fn session_version(&self) -> u8 {
        self.session_version
    }

    pub fn local_identity_key(&self) -> &IdentityKey {
        &self.local_identity
    }

    pub fn remote_identity_key(&self) -> Option<&IdentityKey> {
        self.remote_identity.as_ref()
    }

    pub fn root_key(&self) -> &RootKey {
        &self.root_key
    }

    pub fn set_root_key(&mut self, root_key: RootKey) {
        self.root_key = root_key;
    }

    pub fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    pub fn set_previous_counter(&mut self, counter: u32) {
        self.previous_counter = counter;
    }

    pub fn local_registration_id(&self) -> u32 {
        self.local_registration_id
    }

    pub fn remote_registration_id(&self) -> u32 {
        self.remote_registration_id
    }

    pub fn set_remote_registration_id(&mut self, id: u32) {
        self.remote_registration_id = id;
    }

    /// Serialized base key of the initiator; used to de-duplicate replayed
    /// handshake messages.
    pub fn alice_base_key(&self) -> Option<&[u8]> {
        self.alice_base_key.as_deref()
    }

    pub fn set_alice_base_key(&mut self, base_key: &[u8]) {
        self.alice_base_key = Some(base_key.to_vec());
    }

    pub fn pq_ratchet_state(&self) -> Option<&PqRatchetState> {
        self.pq_ratchet_state.as_ref()
    }

    pub fn set_pq_ratchet_state(&mut self, state: PqRatchetState) {
        self.pq_ratchet_state = Some(state);
    }

    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    // ------------------------------------------------------------------
    // Sender chain
    // ------------------------------------------------------------------

    pub fn has_sender_chain(&self) -> bool {
        self.sender_chain.is_some()
    }

    pub fn set_sender_chain(&mut self, ratchet_key_pair: KeyPair, chain_key: ChainKey) {
        self.sender_chain = Some(SenderChain {
            ratchet_key_pair,
            chain_key,
        });
    }

    pub fn sender_chain_key(&self) -> Result<ChainKey> {
        self.sender_chain
            .as_ref()
            .map(|chain| chain.chain_key.clone())
            .ok_or(ProtocolError::InvalidSessionState("no sender chain"))
    }

    pub fn set_sender_chain_key(&mut self, chain_key: ChainKey) -> Result<()> {
        let chain = self
            .sender_chain
            .as_mut()
            .ok_or(ProtocolError::InvalidSessionState("no sender chain"))?;
        chain.chain_key = chain_key;
        Ok(())
    }

    pub fn sender_ratchet_key(&self) -> Result<PublicKey> {
        self.sender_chain
            .as_ref()
            .map(|chain| chain.ratchet_key_pair.public_key)
            .ok_or(ProtocolError::InvalidSessionState("no sender chain"))
    }

    pub fn sender_ratchet_private_key(&self) -> Result<PrivateKey> {
        self.sender_chain
            .as_ref()
            .map(|chain| chain.ratchet_key_pair.private_key.clone())
            .ok_or(ProtocolError::InvalidSessionState("no sender chain"))
    }

    // ------------------------------------------------------------------
    // Receiver chains
    // ------------------------------------------------------------------

    pub fn receiver_chain_key(&self, sender_ratchet_key: &PublicKey) -> Option<ChainKey> {
        self.receiver_chains
            .iter()
            .find(|chain| &chain.sender_ratchet_key == sender_ratchet_key)
            .map(|chain| chain.chain_key.clone())
    }

    pub fn add_receiver_chain(&mut self, sender_ratchet_key: PublicKey, chain_key: ChainKey) {
        self.receiver_chains.push(ReceiverChain {
            sender_ratchet_key,
            chain_key,
            cached_message_keys: Vec::new(),
        });

        let max_chains = Config::global().max_receiver_chains;
        if self.receiver_chains.len() > max_chains {
            self.receiver_chains.remove(0);
        }
    }

    pub fn set_receiver_chain_key(
        &mut self,
        sender_ratchet_key: &PublicKey,
        chain_key: ChainKey,
    ) -> Result<()> {
        let chain = self
            .receiver_chains
            .iter_mut()
            .find(|chain| &chain.sender_ratchet_key == sender_ratchet_key)
            .ok_or(ProtocolError::InvalidSessionState("no matching receiver chain"))?;
        chain.chain_key = chain_key;
        Ok(())
    }

    /// Cache a skipped message key, evicting the oldest entry beyond the
    /// per-chain bound.
    pub fn cache_message_keys(
        &mut self,
        sender_ratchet_key: &PublicKey,
        message_keys: MessageKeys,
    ) -> Result<()> {
        let max_keys = Config::global().max_message_keys_per_chain;
        let chain = self
            .receiver_chains
            .iter_mut()
            .find(|chain| &chain.sender_ratchet_key == sender_ratchet_key)
            .ok_or(ProtocolError::InvalidSessionState("no matching receiver chain"))?;

        chain.cached_message_keys.push(message_keys);
        if chain.cached_message_keys.len() > max_keys {
            chain.cached_message_keys.remove(0);
        }
        Ok(())
    }

    /// Remove and return the cached message keys for `counter`, if present.
    /// Consuming the entry is what makes replays detectable.
    pub fn take_message_keys(
        &mut self,
        sender_ratchet_key: &PublicKey,
        counter: u32,
    ) -> Option<MessageKeys> {
        let chain = self
            .receiver_chains
            .iter_mut()
            .find(|chain| &chain.sender_ratchet_key == sender_ratchet_key)?;

        let position = chain
            .cached_message_keys
            .iter()
            .position(|keys| keys.counter() == counter)?;
        Some(chain.cached_message_keys.remove(position))
    }

    // ------------------------------------------------------------------
    // Pending pre-key (unacknowledged handshake)
    // ------------------------------------------------------------------

    pub fn pending_pre_key(&self) -> Option<&PendingPreKey> {
        self.pending_pre_key.as_ref()
    }

    pub fn set_pending_pre_key(&mut self, pending: PendingPreKey) {
        self.pending_pre_key = Some(pending);
    }

    pub fn clear_pending_pre_key(&mut self) {
        self.pending_pre_key = None;
    }

    /// Usable for sending: a sender chain exists and the state is younger
    /// than the staleness bound.
    pub fn has_usable_sender_chain(&self, now_ms: u64, max_age_ms: u64) -> bool {
        self.sender_chain.is_some() && now_ms.saturating_sub(self.created_at_ms) < max_age_ms
    }
}

/// A session record: the current state plus bounded archived predecessors.
///
/// Archived states are read-only and consulted only for inbound decryption.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionRecord {
    current_session: Option<SessionState>,
    previous_sessions: Vec<SessionState>,
}

impl SessionRecord {
    pub fn new_fresh() -> Self {
        Self::default()
    }

    pub fn new(state: SessionState) -> Self {
        Self {
            current_session: Some(state),
            previous_sessions: Vec::new(),
        }
    }

    pub fn session_state(&self) -> Option<&SessionState> {
        self.current_session.as_ref()
    }

    pub fn session_state_mut(&mut self) -> Option<&mut SessionState> {
        self.current_session.as_mut()
    }

    pub fn set_session_state(&mut self, state: SessionState) {
        self.current_session = Some(state);
    }

    /// Archived states, newest first.
    pub fn previous_session_states(&self) -> &[SessionState] {
        &self.previous_sessions
    }

    /// Install a new current state, archiving any existing one.
    pub fn promote_state(&mut self, state: SessionState) {
        self.archive_current_state();
        self.current_session = Some(state);
    }

    /// Move the current state (if any) to the front of the archive, trimming
    /// the archive to its bound.
    pub fn archive_current_state(&mut self) {
        if let Some(current) = self.current_session.take() {
            tracing::debug!(target: "state::session", "archiving current session state");
            self.previous_sessions.insert(0, current);
            self.previous_sessions
                .truncate(Config::global().max_archived_session_states);
        }
    }

    /// Promote the archived state at `index` (already updated by a
    /// successful decrypt) back to current.
    pub fn promote_old_session(&mut self, index: usize, updated: SessionState) -> Result<()> {
        if index >= self.previous_sessions.len() {
            return Err(ProtocolError::InvalidSessionState(
                "archived session index out of range",
            ));
        }
        self.previous_sessions.remove(index);
        self.promote_state(updated);
        Ok(())
    }

    /// Does any state (current or archived) descend from this initiator
    /// base key? Used to de-duplicate replayed handshake messages.
    pub fn has_session_state(&self, version: u8, alice_base_key: &[u8]) -> bool {
        let matches = |state: &SessionState| {
            state.session_version() == version && state.alice_base_key() == Some(alice_base_key)
        };
        self.current_session.as_ref().is_some_and(matches)
            || self.previous_sessions.iter().any(matches)
    }

    pub fn has_usable_sender_chain(&self, now_ms: u64) -> bool {
        let max_age_ms = Config::global().session_max_age_ms;
        self.current_session
            .as_ref()
            .is_some_and(|state| state.has_usable_sender_chain(now_ms, max_age_ms))
    }

    pub fn session_version(&self) -> Result<u8> {
        self.current_session
            .as_ref()
            .map(SessionState::session_version)
            .ok_or(ProtocolError::InvalidSessionState("no current session"))
    }

    pub fn remote_registration_id(&self) -> Result<u32> {
        self.current_session
            .as_ref()
            .map(SessionState::remote_registration_id)
            .ok_or(ProtocolError::InvalidSessionState("no current session"))
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|_| ProtocolError::InvalidSerialization("SessionRecord"))
    }

    pub fn deserialize(value: &[u8]) -> Result<Self> {
        bincode::deserialize(value)
            .map_err(|_| ProtocolError::InvalidSerialization("SessionRecord"))
    }
}

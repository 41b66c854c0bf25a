//! In-memory хранилище для тестов и встраивающих приложений без
//! персистентности.
//!
//! Records are held in their serialized form, so every load observes exactly
//! what the last store wrote — the same property a database-backed store
//! provides.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::crypto::keys::{
    IdentityKey, IdentityKeyPair, KyberPreKeyRecord, PreKeyRecord, SignedPreKeyRecord,
};
use crate::error::{ProtocolError, Result};
use crate::protocol::address::ProtocolAddress;
use crate::state::sender_key::SenderKeyRecord;
use crate::state::session::SessionRecord;
use crate::storage::{
    Direction, IdentityKeyStore, KyberPreKeyStore, PreKeyStore, SenderKeyStore, SessionStore,
    SignedPreKeyStore,
};

/// In-memory реализация [`SessionStore`].
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: HashMap<ProtocolAddress, Vec<u8>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw serialized record, for byte-level assertions in tests.
    pub fn session_bytes(&self, address: &ProtocolAddress) -> Option<&[u8]> {
        self.sessions.get(address).map(Vec::as_slice)
    }
}

impl SessionStore for InMemorySessionStore {
    fn load_session(&self, address: &ProtocolAddress) -> Result<Option<SessionRecord>> {
        self.sessions
            .get(address)
            .map(|bytes| SessionRecord::deserialize(bytes))
            .transpose()
    }

    fn store_session(&mut self, address: &ProtocolAddress, record: &SessionRecord) -> Result<()> {
        self.sessions.insert(address.clone(), record.serialize()?);
        Ok(())
    }

    fn contains_session(&self, address: &ProtocolAddress) -> Result<bool> {
        Ok(self.sessions.contains_key(address))
    }

    fn delete_session(&mut self, address: &ProtocolAddress) -> Result<()> {
        self.sessions.remove(address);
        Ok(())
    }

    fn delete_all_sessions(&mut self, name: &str) -> Result<()> {
        self.sessions.retain(|address, _| address.name() != name);
        Ok(())
    }

    fn sub_device_sessions(&self, name: &str) -> Result<Vec<u32>> {
        Ok(self
            .sessions
            .keys()
            .filter(|address| address.name() == name)
            .map(ProtocolAddress::device_id)
            .collect())
    }
}

/// In-memory реализация [`IdentityKeyStore`].
pub struct InMemoryIdentityStore {
    identity_key_pair: IdentityKeyPair,
    registration_id: u32,
    known_identities: HashMap<ProtocolAddress, IdentityKey>,
}

impl InMemoryIdentityStore {
    pub fn new(identity_key_pair: IdentityKeyPair, registration_id: u32) -> Self {
        Self {
            identity_key_pair,
            registration_id,
            known_identities: HashMap::new(),
        }
    }
}

impl IdentityKeyStore for InMemoryIdentityStore {
    fn get_identity_key_pair(&self) -> Result<IdentityKeyPair> {
        Ok(self.identity_key_pair.clone())
    }

    fn get_local_registration_id(&self) -> Result<u32> {
        Ok(self.registration_id)
    }

    fn save_identity(
        &mut self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
    ) -> Result<bool> {
        match self.known_identities.insert(address.clone(), *identity) {
            Some(previous) => Ok(previous != *identity),
            None => Ok(false),
        }
    }

    fn get_identity(&self, address: &ProtocolAddress) -> Result<Option<IdentityKey>> {
        Ok(self.known_identities.get(address).copied())
    }

    fn is_trusted_identity(
        &self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
        _direction: Direction,
    ) -> Result<bool> {
        match self.known_identities.get(address) {
            // Trust on first use.
            None => Ok(true),
            Some(stored) => Ok(stored == identity),
        }
    }
}

/// In-memory реализация [`PreKeyStore`].
#[derive(Default)]
pub struct InMemoryPreKeyStore {
    pre_keys: HashMap<u32, Vec<u8>>,
}

impl InMemoryPreKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreKeyStore for InMemoryPreKeyStore {
    fn get_pre_key(&self, id: u32) -> Result<Option<PreKeyRecord>> {
        self.pre_keys
            .get(&id)
            .map(|bytes| PreKeyRecord::deserialize(bytes))
            .transpose()
    }

    fn save_pre_key(&mut self, id: u32, record: &PreKeyRecord) -> Result<()> {
        self.pre_keys.insert(id, record.serialize()?.to_vec());
        Ok(())
    }

    fn remove_pre_key(&mut self, id: u32) -> Result<()> {
        // Double removal is a no-op.
        self.pre_keys.remove(&id);
        Ok(())
    }

    fn all_pre_key_ids(&self) -> Result<Vec<u32>> {
        Ok(self.pre_keys.keys().copied().collect())
    }
}

/// In-memory реализация [`SignedPreKeyStore`].
#[derive(Default)]
pub struct InMemorySignedPreKeyStore {
    signed_pre_keys: HashMap<u32, Vec<u8>>,
}

impl InMemorySignedPreKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SignedPreKeyStore for InMemorySignedPreKeyStore {
    fn get_signed_pre_key(&self, id: u32) -> Result<Option<SignedPreKeyRecord>> {
        self.signed_pre_keys
            .get(&id)
            .map(|bytes| SignedPreKeyRecord::deserialize(bytes))
            .transpose()
    }

    fn save_signed_pre_key(&mut self, id: u32, record: &SignedPreKeyRecord) -> Result<()> {
        self.signed_pre_keys.insert(id, record.serialize()?.to_vec());
        Ok(())
    }

    fn all_signed_pre_key_ids(&self) -> Result<Vec<u32>> {
        Ok(self.signed_pre_keys.keys().copied().collect())
    }
}

/// In-memory реализация [`KyberPreKeyStore`].
#[derive(Default)]
pub struct InMemoryKyberPreKeyStore {
    kyber_pre_keys: HashMap<u32, Vec<u8>>,
    used_ids: HashSet<u32>,
}

impl InMemoryKyberPreKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Has this pre-key been consumed by an inbound handshake?
    pub fn is_kyber_pre_key_used(&self, id: u32) -> bool {
        self.used_ids.contains(&id)
    }
}

impl KyberPreKeyStore for InMemoryKyberPreKeyStore {
    fn get_kyber_pre_key(&self, id: u32) -> Result<Option<KyberPreKeyRecord>> {
        self.kyber_pre_keys
            .get(&id)
            .map(|bytes| KyberPreKeyRecord::deserialize(bytes))
            .transpose()
    }

    fn save_kyber_pre_key(&mut self, id: u32, record: &KyberPreKeyRecord) -> Result<()> {
        self.kyber_pre_keys.insert(id, record.serialize()?.to_vec());
        Ok(())
    }

    fn mark_kyber_pre_key_used(&mut self, id: u32) -> Result<()> {
        if !self.kyber_pre_keys.contains_key(&id) {
            return Err(ProtocolError::KyberPreKeyNotFound(id));
        }
        self.used_ids.insert(id);
        Ok(())
    }

    fn all_kyber_pre_key_ids(&self) -> Result<Vec<u32>> {
        Ok(self.kyber_pre_keys.keys().copied().collect())
    }
}

/// In-memory реализация [`SenderKeyStore`].
#[derive(Default)]
pub struct InMemorySenderKeyStore {
    sender_keys: HashMap<(ProtocolAddress, Uuid), Vec<u8>>,
}

impl InMemorySenderKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the record for `(sender, distribution_id)`, if any.
    pub fn remove_sender_key(&mut self, sender: &ProtocolAddress, distribution_id: Uuid) {
        self.sender_keys.remove(&(sender.clone(), distribution_id));
    }
}

impl SenderKeyStore for InMemorySenderKeyStore {
    fn load_sender_key(
        &self,
        sender: &ProtocolAddress,
        distribution_id: Uuid,
    ) -> Result<Option<SenderKeyRecord>> {
        self.sender_keys
            .get(&(sender.clone(), distribution_id))
            .map(|bytes| SenderKeyRecord::deserialize(bytes))
            .transpose()
    }

    fn store_sender_key(
        &mut self,
        sender: &ProtocolAddress,
        distribution_id: Uuid,
        record: &SenderKeyRecord,
    ) -> Result<()> {
        self.sender_keys
            .insert((sender.clone(), distribution_id), record.serialize()?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::session::SessionRecord;

    #[test]
    fn session_store_roundtrip_and_cleanup() {
        let mut store = InMemorySessionStore::new();
        let alice_1 = ProtocolAddress::new("alice", 1);
        let alice_2 = ProtocolAddress::new("alice", 2);
        let bob = ProtocolAddress::new("bob", 1);

        assert!(store.load_session(&alice_1).unwrap().is_none());
        assert!(!store.contains_session(&alice_1).unwrap());

        let record = SessionRecord::new_fresh();
        store.store_session(&alice_1, &record).unwrap();
        store.store_session(&alice_2, &record).unwrap();
        store.store_session(&bob, &record).unwrap();

        assert!(store.contains_session(&alice_1).unwrap());
        let mut devices = store.sub_device_sessions("alice").unwrap();
        devices.sort_unstable();
        assert_eq!(devices, vec![1, 2]);

        store.delete_all_sessions("alice").unwrap();
        assert!(!store.contains_session(&alice_1).unwrap());
        assert!(!store.contains_session(&alice_2).unwrap());
        assert!(store.contains_session(&bob).unwrap());

        store.delete_session(&bob).unwrap();
        assert!(!store.contains_session(&bob).unwrap());
    }

    #[test]
    fn identity_store_tofu_and_replacement() {
        let pair = IdentityKeyPair::generate();
        let mut store = InMemoryIdentityStore::new(pair, 42);
        let address = ProtocolAddress::new("carol", 1);

        let first = *IdentityKeyPair::generate().identity_key();
        let second = *IdentityKeyPair::generate().identity_key();

        // Nothing stored: anything is trusted.
        assert!(store
            .is_trusted_identity(&address, &first, Direction::Receiving)
            .unwrap());

        assert!(!store.save_identity(&address, &first).unwrap());
        assert!(store
            .is_trusted_identity(&address, &first, Direction::Sending)
            .unwrap());
        assert!(!store
            .is_trusted_identity(&address, &second, Direction::Sending)
            .unwrap());

        // Re-saving the same identity is not a replacement.
        assert!(!store.save_identity(&address, &first).unwrap());
        // A different identity is.
        assert!(store.save_identity(&address, &second).unwrap());
        assert_eq!(store.get_identity(&address).unwrap(), Some(second));
    }

    #[test]
    fn pre_key_removal_is_one_shot() {
        let mut store = InMemoryPreKeyStore::new();
        let record = PreKeyRecord::generate(100);
        store.save_pre_key(100, &record).unwrap();

        assert!(store.get_pre_key(100).unwrap().is_some());
        store.remove_pre_key(100).unwrap();
        assert!(store.get_pre_key(100).unwrap().is_none());
        // Removing again is a no-op.
        store.remove_pre_key(100).unwrap();
    }

    #[test]
    fn kyber_store_marks_used_without_deleting() {
        let identity = IdentityKeyPair::generate();
        let mut store = InMemoryKyberPreKeyStore::new();
        let record = KyberPreKeyRecord::generate(200, 0, &identity);
        store.save_kyber_pre_key(200, &record).unwrap();

        assert!(!store.is_kyber_pre_key_used(200));
        store.mark_kyber_pre_key_used(200).unwrap();
        assert!(store.is_kyber_pre_key_used(200));
        assert!(store.get_kyber_pre_key(200).unwrap().is_some());

        assert!(matches!(
            store.mark_kyber_pre_key_used(201),
            Err(ProtocolError::KyberPreKeyNotFound(201))
        ));
    }

    #[test]
    fn sender_key_store_is_keyed_by_address_and_distribution() {
        let mut store = InMemorySenderKeyStore::new();
        let alice = ProtocolAddress::new("alice", 1);
        let bob = ProtocolAddress::new("bob", 1);
        let distribution_a = Uuid::new_v4();
        let distribution_b = Uuid::new_v4();

        let record = SenderKeyRecord::new_empty();
        store.store_sender_key(&alice, distribution_a, &record).unwrap();

        assert!(store.load_sender_key(&alice, distribution_a).unwrap().is_some());
        assert!(store.load_sender_key(&alice, distribution_b).unwrap().is_none());
        assert!(store.load_sender_key(&bob, distribution_a).unwrap().is_none());
    }
}

//! Store interfaces consumed by the engines.
//!
//! Six independent capability sets; the engines never assume one object
//! implements more than the capability a parameter asks for. Implementations
//! may be backed by anything that honors the contracts — the in-memory
//! versions in [`memory`] serve tests and embedders without persistence.
//!
//! Engines follow a fixed shape per top-level operation: load everything
//! first, run the cryptographic steps, then write back. A store is never
//! re-entered mid-computation.

pub mod memory;

use uuid::Uuid;

use crate::crypto::keys::{
    IdentityKey, IdentityKeyPair, KyberPreKeyRecord, PreKeyRecord, SignedPreKeyRecord,
};
use crate::error::Result;
use crate::protocol::address::ProtocolAddress;
use crate::state::sender_key::SenderKeyRecord;
use crate::state::session::SessionRecord;

/// Whether an identity is being used to send to or receive from a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sending,
    Receiving,
}

/// Pairwise session records keyed by remote address.
pub trait SessionStore {
    fn load_session(&self, address: &ProtocolAddress) -> Result<Option<SessionRecord>>;
    fn store_session(&mut self, address: &ProtocolAddress, record: &SessionRecord) -> Result<()>;
    fn contains_session(&self, address: &ProtocolAddress) -> Result<bool>;
    fn delete_session(&mut self, address: &ProtocolAddress) -> Result<()>;
    /// Delete every device's session for a principal.
    fn delete_all_sessions(&mut self, name: &str) -> Result<()>;
    /// Device ids (other than the base device) with a session for `name`.
    fn sub_device_sessions(&self, name: &str) -> Result<Vec<u32>>;
}

/// Local identity plus the trust decisions about remote identities.
pub trait IdentityKeyStore {
    fn get_identity_key_pair(&self) -> Result<IdentityKeyPair>;
    fn get_local_registration_id(&self) -> Result<u32>;
    /// Store `identity` for `address`; returns `true` when this replaced a
    /// different stored identity. Idempotent for an unchanged pair.
    fn save_identity(&mut self, address: &ProtocolAddress, identity: &IdentityKey)
        -> Result<bool>;
    fn get_identity(&self, address: &ProtocolAddress) -> Result<Option<IdentityKey>>;
    /// Trust-on-first-use: an unknown address trusts any identity; a known
    /// address trusts only the stored one.
    fn is_trusted_identity(
        &self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
        direction: Direction,
    ) -> Result<bool>;
}

/// One-time pre-keys. Entries are removed after first use; removing a
/// missing id is a no-op.
pub trait PreKeyStore {
    fn get_pre_key(&self, id: u32) -> Result<Option<PreKeyRecord>>;
    fn save_pre_key(&mut self, id: u32, record: &PreKeyRecord) -> Result<()>;
    fn remove_pre_key(&mut self, id: u32) -> Result<()>;
    fn all_pre_key_ids(&self) -> Result<Vec<u32>>;
}

/// Signed pre-keys; several may coexist during rotation.
pub trait SignedPreKeyStore {
    fn get_signed_pre_key(&self, id: u32) -> Result<Option<SignedPreKeyRecord>>;
    fn save_signed_pre_key(&mut self, id: u32, record: &SignedPreKeyRecord) -> Result<()>;
    fn all_signed_pre_key_ids(&self) -> Result<Vec<u32>>;
}

/// Kyber pre-keys; marked used (retained) rather than deleted on
/// consumption so replayed bundles can still be answered.
pub trait KyberPreKeyStore {
    fn get_kyber_pre_key(&self, id: u32) -> Result<Option<KyberPreKeyRecord>>;
    fn save_kyber_pre_key(&mut self, id: u32, record: &KyberPreKeyRecord) -> Result<()>;
    fn mark_kyber_pre_key_used(&mut self, id: u32) -> Result<()>;
    fn all_kyber_pre_key_ids(&self) -> Result<Vec<u32>>;
}

/// Sender-key records keyed by `(sender address, distribution id)`.
pub trait SenderKeyStore {
    fn load_sender_key(
        &self,
        sender: &ProtocolAddress,
        distribution_id: Uuid,
    ) -> Result<Option<SenderKeyRecord>>;
    fn store_sender_key(
        &mut self,
        sender: &ProtocolAddress,
        distribution_id: Uuid,
        record: &SenderKeyRecord,
    ) -> Result<()>;
}

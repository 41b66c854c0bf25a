//! Serializable protocol messages.
//!
//! Every type here owns its exact wire bytes: construction serializes once,
//! parsing keeps the original input, and `serialized()` always returns the
//! byte-identical form (MACs and signatures cover those bytes).

use prost::Message as _;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::crypto::cipher::hmac_sha256;
use crate::crypto::curve::{PrivateKey, PublicKey, SIGNATURE_LENGTH};
use crate::crypto::keys::IdentityKey;
use crate::error::{ProtocolError, Result};
use crate::protocol::validation::{
    check_min_length, check_sender_key_version, check_session_version, distribution_id_from_slice,
    parse_version_byte,
};
use crate::protocol::wire;

/// Current session message version (PQXDH).
pub const CIPHERTEXT_MESSAGE_CURRENT_VERSION: u8 = 4;

/// Last pre-Kyber session message version.
pub const CIPHERTEXT_MESSAGE_PRE_KYBER_VERSION: u8 = 3;

/// Sender-key messages are fixed at version 3.
pub const SENDERKEY_MESSAGE_CURRENT_VERSION: u8 = 3;

fn version_byte(message_version: u8) -> u8 {
    ((message_version & 0xF) << 4) | CIPHERTEXT_MESSAGE_CURRENT_VERSION
}

fn sender_key_version_byte() -> u8 {
    ((SENDERKEY_MESSAGE_CURRENT_VERSION & 0xF) << 4) | SENDERKEY_MESSAGE_CURRENT_VERSION
}

/// Wire discriminant of a ciphertext message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CiphertextMessageType {
    /// Regular Double Ratchet message.
    Whisper = 2,
    /// Handshake message carrying pre-key material.
    PreKey = 3,
    /// Group message under a sender key.
    SenderKey = 7,
    /// Unencrypted payload inside a sealed envelope.
    Plaintext = 8,
}

impl TryFrom<u8> for CiphertextMessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            2 => Ok(Self::Whisper),
            3 => Ok(Self::PreKey),
            7 => Ok(Self::SenderKey),
            8 => Ok(Self::Plaintext),
            _ => Err(ProtocolError::InvalidMessage("unknown ciphertext type")),
        }
    }
}

/// Tagged union over every message the engines can produce or consume.
pub enum CiphertextMessage {
    SignalMessage(SignalMessage),
    PreKeySignalMessage(PreKeySignalMessage),
    SenderKeyMessage(SenderKeyMessage),
    PlaintextContent(PlaintextContent),
}

impl CiphertextMessage {
    pub fn message_type(&self) -> CiphertextMessageType {
        match self {
            CiphertextMessage::SignalMessage(_) => CiphertextMessageType::Whisper,
            CiphertextMessage::PreKeySignalMessage(_) => CiphertextMessageType::PreKey,
            CiphertextMessage::SenderKeyMessage(_) => CiphertextMessageType::SenderKey,
            CiphertextMessage::PlaintextContent(_) => CiphertextMessageType::Plaintext,
        }
    }

    pub fn serialize(&self) -> &[u8] {
        match self {
            CiphertextMessage::SignalMessage(m) => m.serialized(),
            CiphertextMessage::PreKeySignalMessage(m) => m.serialized(),
            CiphertextMessage::SenderKeyMessage(m) => m.serialized(),
            CiphertextMessage::PlaintextContent(m) => m.serialized(),
        }
    }
}

/// One Double Ratchet message.
///
/// Wire form: `version_byte || protobuf || mac[8]` where the MAC binds both
/// identity keys and everything before it.
#[derive(Debug, Clone)]
pub struct SignalMessage {
    message_version: u8,
    sender_ratchet_key: PublicKey,
    counter: u32,
    previous_counter: u32,
    ciphertext: Box<[u8]>,
    pq_ratchet: Option<Vec<u8>>,
    serialized: Box<[u8]>,
}

impl SignalMessage {
    pub const MAC_LENGTH: usize = 8;

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        message_version: u8,
        mac_key: &[u8; 32],
        sender_ratchet_key: PublicKey,
        counter: u32,
        previous_counter: u32,
        ciphertext: &[u8],
        sender_identity_key: &IdentityKey,
        receiver_identity_key: &IdentityKey,
        pq_ratchet: Option<&[u8]>,
    ) -> Result<Self> {
        let proto = wire::SignalMessageProto {
            ratchet_key: Some(sender_ratchet_key.serialize().to_vec()),
            counter: Some(counter),
            previous_counter: Some(previous_counter),
            ciphertext: Some(ciphertext.to_vec()),
            pq_ratchet: pq_ratchet.map(|bytes| bytes.to_vec()),
        };

        let mut serialized = Vec::with_capacity(1 + proto.encoded_len() + Self::MAC_LENGTH);
        serialized.push(version_byte(message_version));
        proto
            .encode(&mut serialized)
            .map_err(|_| ProtocolError::InvalidSerialization("SignalMessage"))?;

        let mac = Self::compute_mac(
            sender_identity_key,
            receiver_identity_key,
            mac_key,
            &serialized,
        )?;
        serialized.extend_from_slice(&mac);

        Ok(Self {
            message_version,
            sender_ratchet_key,
            counter,
            previous_counter,
            ciphertext: ciphertext.into(),
            pq_ratchet: pq_ratchet.map(|bytes| bytes.to_vec()),
            serialized: serialized.into_boxed_slice(),
        })
    }

    pub fn message_version(&self) -> u8 {
        self.message_version
    }

    pub fn sender_ratchet_key(&self) -> &PublicKey {
        &self.sender_ratchet_key
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    pub fn body(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Opaque post-quantum ratchet payload, if the sender attached one.
    pub fn pq_ratchet(&self) -> Option<&[u8]> {
        self.pq_ratchet.as_deref()
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }

    /// Constant-time MAC verification against both identity keys.
    pub fn verify_mac(
        &self,
        sender_identity_key: &IdentityKey,
        receiver_identity_key: &IdentityKey,
        mac_key: &[u8; 32],
    ) -> Result<bool> {
        let body_end = self.serialized.len() - Self::MAC_LENGTH;
        let our_mac = Self::compute_mac(
            sender_identity_key,
            receiver_identity_key,
            mac_key,
            &self.serialized[..body_end],
        )?;
        let their_mac = &self.serialized[body_end..];
        Ok(bool::from(our_mac.ct_eq(their_mac)))
    }

    fn compute_mac(
        sender_identity_key: &IdentityKey,
        receiver_identity_key: &IdentityKey,
        mac_key: &[u8; 32],
        message: &[u8],
    ) -> Result<[u8; Self::MAC_LENGTH]> {
        let mut input =
            Vec::with_capacity(2 * crate::crypto::curve::PUBLIC_KEY_LENGTH + message.len());
        input.extend_from_slice(&sender_identity_key.serialize());
        input.extend_from_slice(&receiver_identity_key.serialize());
        input.extend_from_slice(message);

        let full = hmac_sha256(mac_key, &input)?;
        let mut mac = [0u8; Self::MAC_LENGTH];
        mac.copy_from_slice(&full[..Self::MAC_LENGTH]);
        Ok(mac)
    }
}

impl AsRef<[u8]> for SignalMessage {
    fn as_ref(&self) -> &[u8] {
        &self.serialized
    }
}

impl TryFrom<&[u8]> for SignalMessage {
    type Error = ProtocolError;

    fn try_from(value: &[u8]) -> Result<Self> {
        check_min_length(value, 1 + Self::MAC_LENGTH + 1)?;
        let message_version = parse_version_byte(value)?;
        check_session_version(message_version)?;

        let proto = wire::SignalMessageProto::decode(&value[1..value.len() - Self::MAC_LENGTH])?;

        let sender_ratchet_key = proto
            .ratchet_key
            .ok_or(ProtocolError::InvalidProtobufEncoding)?;
        let sender_ratchet_key = PublicKey::deserialize(&sender_ratchet_key)?;
        let counter = proto.counter.ok_or(ProtocolError::InvalidProtobufEncoding)?;
        let previous_counter = proto.previous_counter.unwrap_or(0);
        let ciphertext = proto
            .ciphertext
            .ok_or(ProtocolError::InvalidProtobufEncoding)?;

        Ok(Self {
            message_version,
            sender_ratchet_key,
            counter,
            previous_counter,
            ciphertext: ciphertext.into_boxed_slice(),
            pq_ratchet: proto.pq_ratchet,
            serialized: value.into(),
        })
    }
}

/// Handshake message: a [`SignalMessage`] plus the pre-key material the
/// responder needs to derive the same session.
#[derive(Debug, Clone)]
pub struct PreKeySignalMessage {
    message_version: u8,
    registration_id: u32,
    pre_key_id: Option<u32>,
    signed_pre_key_id: u32,
    kyber_pre_key_id: Option<u32>,
    kyber_ciphertext: Option<Vec<u8>>,
    base_key: PublicKey,
    identity_key: IdentityKey,
    message: SignalMessage,
    serialized: Box<[u8]>,
}

impl PreKeySignalMessage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        message_version: u8,
        registration_id: u32,
        pre_key_id: Option<u32>,
        signed_pre_key_id: u32,
        kyber: Option<(u32, Vec<u8>)>,
        base_key: PublicKey,
        identity_key: IdentityKey,
        message: SignalMessage,
    ) -> Result<Self> {
        Self::check_kyber_presence(message_version, kyber.is_some())?;
        let (kyber_pre_key_id, kyber_ciphertext) = match kyber {
            Some((id, ciphertext)) => (Some(id), Some(ciphertext)),
            None => (None, None),
        };

        let proto = wire::PreKeySignalMessageProto {
            pre_key_id,
            base_key: Some(base_key.serialize().to_vec()),
            identity_key: Some(identity_key.serialize().to_vec()),
            message: Some(message.serialized().to_vec()),
            registration_id: Some(registration_id),
            signed_pre_key_id: Some(signed_pre_key_id),
            kyber_pre_key_id,
            kyber_ciphertext: kyber_ciphertext.clone(),
        };

        let mut serialized = Vec::with_capacity(1 + proto.encoded_len());
        serialized.push(version_byte(message_version));
        proto
            .encode(&mut serialized)
            .map_err(|_| ProtocolError::InvalidSerialization("PreKeySignalMessage"))?;

        Ok(Self {
            message_version,
            registration_id,
            pre_key_id,
            signed_pre_key_id,
            kyber_pre_key_id,
            kyber_ciphertext,
            base_key,
            identity_key,
            message,
            serialized: serialized.into_boxed_slice(),
        })
    }

    // A v4 message carries both Kyber fields, a v3 message neither. Partial
    // bundles never reach the wire.
    fn check_kyber_presence(message_version: u8, has_kyber: bool) -> Result<()> {
        match (message_version >= CIPHERTEXT_MESSAGE_CURRENT_VERSION, has_kyber) {
            (true, true) | (false, false) => Ok(()),
            (true, false) => Err(ProtocolError::InvalidMessage(
                "v4 handshake message without Kyber pre-key fields",
            )),
            (false, true) => Err(ProtocolError::InvalidMessage(
                "v3 handshake message with Kyber pre-key fields",
            )),
        }
    }

    pub fn message_version(&self) -> u8 {
        self.message_version
    }

    pub fn registration_id(&self) -> u32 {
        self.registration_id
    }

    pub fn pre_key_id(&self) -> Option<u32> {
        self.pre_key_id
    }

    pub fn signed_pre_key_id(&self) -> u32 {
        self.signed_pre_key_id
    }

    pub fn kyber_pre_key_id(&self) -> Option<u32> {
        self.kyber_pre_key_id
    }

    pub fn kyber_ciphertext(&self) -> Option<&[u8]> {
        self.kyber_ciphertext.as_deref()
    }

    pub fn base_key(&self) -> &PublicKey {
        &self.base_key
    }

    pub fn identity_key(&self) -> &IdentityKey {
        &self.identity_key
    }

    pub fn message(&self) -> &SignalMessage {
        &self.message
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

impl AsRef<[u8]> for PreKeySignalMessage {
    fn as_ref(&self) -> &[u8] {
        &self.serialized
    }
}

impl TryFrom<&[u8]> for PreKeySignalMessage {
    type Error = ProtocolError;

    fn try_from(value: &[u8]) -> Result<Self> {
        let message_version = parse_version_byte(value)?;
        check_session_version(message_version)?;

        let proto = wire::PreKeySignalMessageProto::decode(&value[1..])?;

        let base_key = proto
            .base_key
            .ok_or(ProtocolError::InvalidProtobufEncoding)?;
        let identity_key = proto
            .identity_key
            .ok_or(ProtocolError::InvalidProtobufEncoding)?;
        let message = proto.message.ok_or(ProtocolError::InvalidProtobufEncoding)?;
        let signed_pre_key_id = proto
            .signed_pre_key_id
            .ok_or(ProtocolError::InvalidProtobufEncoding)?;

        if proto.kyber_pre_key_id.is_some() != proto.kyber_ciphertext.is_some() {
            return Err(ProtocolError::InvalidMessage(
                "handshake message with partial Kyber pre-key fields",
            ));
        }
        Self::check_kyber_presence(message_version, proto.kyber_pre_key_id.is_some())?;

        Ok(Self {
            message_version,
            registration_id: proto.registration_id.unwrap_or(0),
            pre_key_id: proto.pre_key_id,
            signed_pre_key_id,
            kyber_pre_key_id: proto.kyber_pre_key_id,
            kyber_ciphertext: proto.kyber_ciphertext,
            base_key: PublicKey::deserialize(&base_key)?,
            identity_key: IdentityKey::deserialize(&identity_key)?,
            message: SignalMessage::try_from(message.as_slice())?,
            serialized: value.into(),
        })
    }
}

/// One group message under a sender key.
///
/// Wire form: `version_byte || protobuf || signature[64]` signed by the
/// chain's signing key.
#[derive(Debug, Clone)]
pub struct SenderKeyMessage {
    distribution_id: Uuid,
    chain_id: u32,
    iteration: u32,
    ciphertext: Box<[u8]>,
    serialized: Box<[u8]>,
}

impl SenderKeyMessage {
    pub fn new(
        distribution_id: Uuid,
        chain_id: u32,
        iteration: u32,
        ciphertext: &[u8],
        signature_key: &PrivateKey,
    ) -> Result<Self> {
        let proto = wire::SenderKeyMessageProto {
            distribution_uuid: Some(distribution_id.as_bytes().to_vec()),
            chain_id: Some(chain_id),
            iteration: Some(iteration),
            ciphertext: Some(ciphertext.to_vec()),
        };

        let mut serialized = Vec::with_capacity(1 + proto.encoded_len() + SIGNATURE_LENGTH);
        serialized.push(sender_key_version_byte());
        proto
            .encode(&mut serialized)
            .map_err(|_| ProtocolError::InvalidSerialization("SenderKeyMessage"))?;

        let signature = signature_key.calculate_signature(&serialized);
        serialized.extend_from_slice(&signature);

        Ok(Self {
            distribution_id,
            chain_id,
            iteration,
            ciphertext: ciphertext.into(),
            serialized: serialized.into_boxed_slice(),
        })
    }

    pub fn distribution_id(&self) -> Uuid {
        self.distribution_id
    }

    pub fn chain_id(&self) -> u32 {
        self.chain_id
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }

    pub fn verify_signature(&self, signing_key: &PublicKey) -> bool {
        let body_end = self.serialized.len() - SIGNATURE_LENGTH;
        signing_key.verify_signature(&self.serialized[..body_end], &self.serialized[body_end..])
    }
}

impl AsRef<[u8]> for SenderKeyMessage {
    fn as_ref(&self) -> &[u8] {
        &self.serialized
    }
}

impl TryFrom<&[u8]> for SenderKeyMessage {
    type Error = ProtocolError;

    fn try_from(value: &[u8]) -> Result<Self> {
        check_min_length(value, 1 + SIGNATURE_LENGTH + 1)?;
        let message_version = parse_version_byte(value)?;
        check_sender_key_version(message_version)?;

        let proto =
            wire::SenderKeyMessageProto::decode(&value[1..value.len() - SIGNATURE_LENGTH])?;

        let distribution_uuid = proto
            .distribution_uuid
            .ok_or(ProtocolError::InvalidProtobufEncoding)?;
        let chain_id = proto
            .chain_id
            .ok_or(ProtocolError::InvalidProtobufEncoding)?;
        let iteration = proto
            .iteration
            .ok_or(ProtocolError::InvalidProtobufEncoding)?;
        let ciphertext = proto
            .ciphertext
            .ok_or(ProtocolError::InvalidProtobufEncoding)?;

        Ok(Self {
            distribution_id: distribution_id_from_slice(&distribution_uuid)?,
            chain_id,
            iteration,
            ciphertext: ciphertext.into_boxed_slice(),
            serialized: value.into(),
        })
    }
}

/// Self-contained descriptor of one sender-key chain, delivered to group
/// members over their pairwise sessions. Carries no identity key; the
/// authenticated channel it travels over vouches for the sender.
#[derive(Debug, Clone)]
pub struct SenderKeyDistributionMessage {
    distribution_id: Uuid,
    chain_id: u32,
    iteration: u32,
    chain_key: [u8; 32],
    signing_key: PublicKey,
    serialized: Box<[u8]>,
}

impl SenderKeyDistributionMessage {
    pub fn new(
        distribution_id: Uuid,
        chain_id: u32,
        iteration: u32,
        chain_key: [u8; 32],
        signing_key: PublicKey,
    ) -> Result<Self> {
        let proto = wire::SenderKeyDistributionMessageProto {
            distribution_uuid: Some(distribution_id.as_bytes().to_vec()),
            chain_id: Some(chain_id),
            iteration: Some(iteration),
            chain_key: Some(chain_key.to_vec()),
            signing_key: Some(signing_key.serialize().to_vec()),
        };

        let mut serialized = Vec::with_capacity(1 + proto.encoded_len());
        serialized.push(sender_key_version_byte());
        proto
            .encode(&mut serialized)
            .map_err(|_| ProtocolError::InvalidSerialization("SenderKeyDistributionMessage"))?;

        Ok(Self {
            distribution_id,
            chain_id,
            iteration,
            chain_key,
            signing_key,
            serialized: serialized.into_boxed_slice(),
        })
    }

    pub fn distribution_id(&self) -> Uuid {
        self.distribution_id
    }

    pub fn chain_id(&self) -> u32 {
        self.chain_id
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn chain_key(&self) -> &[u8; 32] {
        &self.chain_key
    }

    pub fn signing_key(&self) -> &PublicKey {
        &self.signing_key
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

impl AsRef<[u8]> for SenderKeyDistributionMessage {
    fn as_ref(&self) -> &[u8] {
        &self.serialized
    }
}

impl TryFrom<&[u8]> for SenderKeyDistributionMessage {
    type Error = ProtocolError;

    fn try_from(value: &[u8]) -> Result<Self> {
        // At least a chain key and a signing key must fit.
        check_min_length(value, 1 + 32 + 32)?;
        let message_version = parse_version_byte(value)?;
        check_sender_key_version(message_version)?;

        let proto = wire::SenderKeyDistributionMessageProto::decode(&value[1..])?;

        let distribution_uuid = proto
            .distribution_uuid
            .ok_or(ProtocolError::InvalidProtobufEncoding)?;
        let chain_id = proto
            .chain_id
            .ok_or(ProtocolError::InvalidProtobufEncoding)?;
        let iteration = proto
            .iteration
            .ok_or(ProtocolError::InvalidProtobufEncoding)?;
        let chain_key = proto
            .chain_key
            .ok_or(ProtocolError::InvalidProtobufEncoding)?;
        let signing_key = proto
            .signing_key
            .ok_or(ProtocolError::InvalidProtobufEncoding)?;

        let chain_key: [u8; 32] = chain_key
            .as_slice()
            .try_into()
            .map_err(|_| ProtocolError::InvalidProtobufEncoding)?;

        Ok(Self {
            distribution_id: distribution_id_from_slice(&distribution_uuid)?,
            chain_id,
            iteration,
            chain_key,
            signing_key: PublicKey::deserialize(&signing_key)?,
            serialized: value.into(),
        })
    }
}

/// Unencrypted payload carried through a sealed envelope.
#[derive(Debug, Clone)]
pub struct PlaintextContent {
    serialized: Box<[u8]>,
}

impl PlaintextContent {
    pub fn new(body: &[u8]) -> Self {
        Self {
            serialized: body.into(),
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.serialized
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

impl From<&DecryptionErrorMessage> for PlaintextContent {
    fn from(message: &DecryptionErrorMessage) -> Self {
        Self::new(message.serialized())
    }
}

/// Re-send request for a message that could not be decrypted.
///
/// Carries the failing message's ratchet key where one is extractable so the
/// original sender can correlate it against an archived session state. No
/// cryptographic binding of its own; the channel carrying it back provides
/// authenticity.
#[derive(Debug, Clone)]
pub struct DecryptionErrorMessage {
    ratchet_key: Option<PublicKey>,
    timestamp_ms: u64,
    device_id: u32,
    serialized: Box<[u8]>,
}

impl DecryptionErrorMessage {
    pub fn for_original(
        original_bytes: &[u8],
        original_type: CiphertextMessageType,
        timestamp_ms: u64,
        original_sender_device_id: u32,
    ) -> Result<Self> {
        let ratchet_key = match original_type {
            CiphertextMessageType::Whisper => {
                Some(*SignalMessage::try_from(original_bytes)?.sender_ratchet_key())
            }
            CiphertextMessageType::PreKey => Some(
                *PreKeySignalMessage::try_from(original_bytes)?
                    .message()
                    .sender_ratchet_key(),
            ),
            CiphertextMessageType::SenderKey | CiphertextMessageType::Plaintext => None,
        };

        let proto = wire::DecryptionErrorMessageProto {
            ratchet_key: ratchet_key.map(|key| key.serialize().to_vec()),
            timestamp: Some(timestamp_ms),
            device_id: Some(original_sender_device_id),
        };

        Ok(Self {
            ratchet_key,
            timestamp_ms,
            device_id: original_sender_device_id,
            serialized: proto.encode_to_vec().into_boxed_slice(),
        })
    }

    pub fn ratchet_key(&self) -> Option<&PublicKey> {
        self.ratchet_key.as_ref()
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

impl TryFrom<&[u8]> for DecryptionErrorMessage {
    type Error = ProtocolError;

    fn try_from(value: &[u8]) -> Result<Self> {
        let proto = wire::DecryptionErrorMessageProto::decode(value)?;

        let timestamp_ms = proto
            .timestamp
            .ok_or(ProtocolError::InvalidProtobufEncoding)?;
        let ratchet_key = proto
            .ratchet_key
            .map(|bytes| PublicKey::deserialize(&bytes))
            .transpose()?;

        Ok(Self {
            ratchet_key,
            timestamp_ms,
            device_id: proto.device_id.unwrap_or(0),
            serialized: value.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::curve::KeyPair;

    fn make_signal_message() -> SignalMessage {
        let mac_key = [0x42u8; 32];
        let ratchet = KeyPair::generate();
        let sender_identity = IdentityKey::new(KeyPair::generate().public_key);
        let receiver_identity = IdentityKey::new(KeyPair::generate().public_key);

        SignalMessage::new(
            CIPHERTEXT_MESSAGE_CURRENT_VERSION,
            &mac_key,
            ratchet.public_key,
            42,
            41,
            b"ciphertext body!",
            &sender_identity,
            &receiver_identity,
            None,
        )
        .unwrap()
    }

    #[test]
    fn signal_message_roundtrip() {
        let message = make_signal_message();
        let parsed = SignalMessage::try_from(message.serialized()).unwrap();

        assert_eq!(parsed.message_version(), message.message_version());
        assert_eq!(parsed.sender_ratchet_key(), message.sender_ratchet_key());
        assert_eq!(parsed.counter(), message.counter());
        assert_eq!(parsed.previous_counter(), message.previous_counter());
        assert_eq!(parsed.body(), message.body());
        assert_eq!(parsed.serialized(), message.serialized());
    }

    #[test]
    fn signal_message_mac_binds_identities() {
        let mac_key = [0x42u8; 32];
        let ratchet = KeyPair::generate();
        let sender_identity = IdentityKey::new(KeyPair::generate().public_key);
        let receiver_identity = IdentityKey::new(KeyPair::generate().public_key);
        let other_identity = IdentityKey::new(KeyPair::generate().public_key);

        let message = SignalMessage::new(
            4,
            &mac_key,
            ratchet.public_key,
            0,
            0,
            b"payload",
            &sender_identity,
            &receiver_identity,
            None,
        )
        .unwrap();

        assert!(message
            .verify_mac(&sender_identity, &receiver_identity, &mac_key)
            .unwrap());
        assert!(!message
            .verify_mac(&other_identity, &receiver_identity, &mac_key)
            .unwrap());
        assert!(!message
            .verify_mac(&sender_identity, &other_identity, &mac_key)
            .unwrap());
        assert!(!message
            .verify_mac(&sender_identity, &receiver_identity, &[0u8; 32])
            .unwrap());
    }

    #[test]
    fn signal_message_preserves_pq_ratchet_bytes() {
        let mac_key = [7u8; 32];
        let ratchet = KeyPair::generate();
        let identity = IdentityKey::new(KeyPair::generate().public_key);
        let pq_payload = vec![0xAA, 0xBB, 0xCC];

        let message = SignalMessage::new(
            4,
            &mac_key,
            ratchet.public_key,
            1,
            0,
            b"body",
            &identity,
            &identity,
            Some(&pq_payload),
        )
        .unwrap();

        let parsed = SignalMessage::try_from(message.serialized()).unwrap();
        assert_eq!(parsed.pq_ratchet(), Some(pq_payload.as_slice()));
        assert_eq!(parsed.serialized(), message.serialized());
    }

    #[test]
    fn signal_message_rejects_bad_versions() {
        let message = make_signal_message();
        let mut bytes = message.serialized().to_vec();

        bytes[0] = (2 << 4) | 2;
        assert!(matches!(
            SignalMessage::try_from(bytes.as_slice()),
            Err(ProtocolError::LegacyMessageVersion(2))
        ));

        bytes[0] = (5 << 4) | 4;
        assert!(matches!(
            SignalMessage::try_from(bytes.as_slice()),
            Err(ProtocolError::UnrecognizedMessageVersion(5))
        ));

        assert!(matches!(
            SignalMessage::try_from(&bytes[..4]),
            Err(ProtocolError::CiphertextTooShort(4))
        ));
    }

    #[test]
    fn pre_key_signal_message_roundtrip_v4() {
        let base = KeyPair::generate();
        let identity = IdentityKey::new(KeyPair::generate().public_key);
        let inner = make_signal_message();

        let message = PreKeySignalMessage::new(
            4,
            12345,
            Some(100),
            1,
            Some((200, vec![0x08; 40])),
            base.public_key,
            identity,
            inner,
        )
        .unwrap();

        let parsed = PreKeySignalMessage::try_from(message.serialized()).unwrap();
        assert_eq!(parsed.message_version(), 4);
        assert_eq!(parsed.registration_id(), 12345);
        assert_eq!(parsed.pre_key_id(), Some(100));
        assert_eq!(parsed.signed_pre_key_id(), 1);
        assert_eq!(parsed.kyber_pre_key_id(), Some(200));
        assert_eq!(parsed.kyber_ciphertext(), Some(&[0x08; 40][..]));
        assert_eq!(parsed.base_key(), message.base_key());
        assert_eq!(parsed.identity_key(), message.identity_key());
        assert_eq!(parsed.serialized(), message.serialized());
    }

    #[test]
    fn pre_key_signal_message_kyber_presence_is_all_or_nothing() {
        let base = KeyPair::generate();
        let identity = IdentityKey::new(KeyPair::generate().public_key);

        // v4 without Kyber fields is rejected at construction.
        assert!(PreKeySignalMessage::new(
            4,
            1,
            None,
            1,
            None,
            base.public_key,
            identity,
            make_signal_message(),
        )
        .is_err());

        // v3 with Kyber fields is rejected at construction.
        assert!(PreKeySignalMessage::new(
            3,
            1,
            None,
            1,
            Some((200, vec![0x08; 4])),
            base.public_key,
            identity,
            make_signal_message(),
        )
        .is_err());
    }

    #[test]
    fn sender_key_message_roundtrip_and_signature() {
        let signing = KeyPair::generate();
        let other = KeyPair::generate();
        let distribution_id = Uuid::new_v4();

        let message = SenderKeyMessage::new(
            distribution_id,
            42,
            7,
            b"group ciphertext",
            &signing.private_key,
        )
        .unwrap();

        let parsed = SenderKeyMessage::try_from(message.serialized()).unwrap();
        assert_eq!(parsed.distribution_id(), distribution_id);
        assert_eq!(parsed.chain_id(), 42);
        assert_eq!(parsed.iteration(), 7);
        assert_eq!(parsed.ciphertext(), message.ciphertext());
        assert_eq!(parsed.serialized(), message.serialized());

        assert!(parsed.verify_signature(&signing.public_key));
        assert!(!parsed.verify_signature(&other.public_key));
    }

    #[test]
    fn distribution_message_roundtrip() {
        let signing = KeyPair::generate();
        let distribution_id = Uuid::new_v4();
        let chain_key = [0x5Au8; 32];

        let message =
            SenderKeyDistributionMessage::new(distribution_id, 9, 0, chain_key, signing.public_key)
                .unwrap();

        let parsed = SenderKeyDistributionMessage::try_from(message.serialized()).unwrap();
        assert_eq!(parsed.distribution_id(), distribution_id);
        assert_eq!(parsed.chain_id(), 9);
        assert_eq!(parsed.iteration(), 0);
        assert_eq!(parsed.chain_key(), &chain_key);
        assert_eq!(parsed.signing_key(), &signing.public_key);
        assert_eq!(parsed.serialized(), message.serialized());
    }

    #[test]
    fn decryption_error_message_extracts_ratchet_key() {
        let inner = make_signal_message();
        let expected_key = *inner.sender_ratchet_key();

        let dem = DecryptionErrorMessage::for_original(
            inner.serialized(),
            CiphertextMessageType::Whisper,
            1_700_000_000_000,
            2,
        )
        .unwrap();
        assert_eq!(dem.ratchet_key(), Some(&expected_key));
        assert_eq!(dem.timestamp_ms(), 1_700_000_000_000);
        assert_eq!(dem.device_id(), 2);

        let parsed = DecryptionErrorMessage::try_from(dem.serialized()).unwrap();
        assert_eq!(parsed.ratchet_key(), Some(&expected_key));
        assert_eq!(parsed.timestamp_ms(), dem.timestamp_ms());
        assert_eq!(parsed.device_id(), dem.device_id());
    }

    #[test]
    fn decryption_error_message_without_key_for_sender_key_originals() {
        let dem = DecryptionErrorMessage::for_original(
            b"opaque sender key bytes",
            CiphertextMessageType::SenderKey,
            5,
            1,
        )
        .unwrap();
        assert!(dem.ratchet_key().is_none());
    }
}

//! Sealed sender: certificates and the anonymous envelope.
//!
//! The transport sees only an ephemeral public key and an AEAD ciphertext;
//! the sender's certificate travels *inside* the envelope and is checked
//! against the recipient's trust root after unwrapping.
//!
//! ## Envelope layout
//!
//! ```text
//! version_byte || ephemeral_pub[33] || AES-256-GCM-SIV(USMC bytes)
//! ```
//!
//! The envelope key derives from DH(ephemeral, recipient identity); the key
//! is single-use, so the AEAD nonce is fixed and the serialized ephemeral
//! key is the associated data.

use hkdf::Hkdf;
use prost::Message as _;
use sha2::Sha256;
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::cipher::{
    aes_256_gcm_siv_decrypt, aes_256_gcm_siv_encrypt, GCM_SIV_NONCE_LENGTH,
};
use crate::crypto::curve::{KeyPair, PrivateKey, PublicKey, PUBLIC_KEY_LENGTH};
use crate::crypto::messaging::{
    group_decrypt, message_decrypt_prekey, message_decrypt_signal, message_encrypt,
};
use crate::error::{ProtocolError, Result};
use crate::protocol::address::ProtocolAddress;
use crate::protocol::messages::{
    CiphertextMessageType, PreKeySignalMessage, SignalMessage,
};
use crate::protocol::validation::{check_min_length, parse_version_byte};
use crate::protocol::wire;
use crate::storage::{
    IdentityKeyStore, KyberPreKeyStore, PreKeyStore, SenderKeyStore, SessionStore,
    SignedPreKeyStore,
};

/// Sealed envelope version.
pub const SEALED_SENDER_VERSION: u8 = 1;

const ENVELOPE_SALT_PREFIX: &[u8] = b"UnidentifiedDelivery";

/// Advisory hint telling a recipient how to react when the inner message
/// fails to decrypt. Carried opaquely; unknown values survive round-trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentHint {
    Default,
    Resendable,
    Implicit,
    Unknown(u32),
}

impl ContentHint {
    pub fn to_u32(self) -> u32 {
        match self {
            ContentHint::Default => 0,
            ContentHint::Resendable => 1,
            ContentHint::Implicit => 2,
            ContentHint::Unknown(value) => value,
        }
    }

    pub fn from_u32(value: u32) -> Self {
        match value {
            0 => ContentHint::Default,
            1 => ContentHint::Resendable,
            2 => ContentHint::Implicit,
            other => ContentHint::Unknown(other),
        }
    }
}

/// Server certificate: `(key_id, server_key)` signed by the trust root.
#[derive(Debug, Clone)]
pub struct ServerCertificate {
    key_id: u32,
    key: PublicKey,
    certificate: Vec<u8>,
    signature: Vec<u8>,
    serialized: Vec<u8>,
}

impl ServerCertificate {
    pub fn new(key_id: u32, key: PublicKey, trust_root: &PrivateKey) -> Result<Self> {
        let certificate = wire::ServerCertificateData {
            id: Some(key_id),
            key: Some(key.serialize().to_vec()),
        }
        .encode_to_vec();
        let signature = trust_root.calculate_signature(&certificate).to_vec();

        let serialized = wire::ServerCertificateProto {
            certificate: Some(certificate.clone()),
            signature: Some(signature.clone()),
        }
        .encode_to_vec();

        Ok(Self {
            key_id,
            key,
            certificate,
            signature,
            serialized,
        })
    }

    fn from_protobuf(proto: wire::ServerCertificateProto) -> Result<Self> {
        let certificate = proto
            .certificate
            .ok_or(ProtocolError::InvalidProtobufEncoding)?;
        let signature = proto
            .signature
            .ok_or(ProtocolError::InvalidProtobufEncoding)?;

        let data = wire::ServerCertificateData::decode(certificate.as_slice())?;
        let key_id = data.id.ok_or(ProtocolError::InvalidProtobufEncoding)?;
        let key =
            PublicKey::deserialize(&data.key.ok_or(ProtocolError::InvalidProtobufEncoding)?)?;

        let serialized = wire::ServerCertificateProto {
            certificate: Some(certificate.clone()),
            signature: Some(signature.clone()),
        }
        .encode_to_vec();

        Ok(Self {
            key_id,
            key,
            certificate,
            signature,
            serialized,
        })
    }

    pub fn deserialize(value: &[u8]) -> Result<Self> {
        Self::from_protobuf(wire::ServerCertificateProto::decode(value)?)
    }

    fn to_protobuf(&self) -> wire::ServerCertificateProto {
        wire::ServerCertificateProto {
            certificate: Some(self.certificate.clone()),
            signature: Some(self.signature.clone()),
        }
    }

    /// Does any of the given trust roots vouch for this certificate?
    pub fn validate(&self, trust_roots: &[PublicKey]) -> bool {
        trust_roots
            .iter()
            .any(|root| root.verify_signature(&self.certificate, &self.signature))
    }

    pub fn key_id(&self) -> u32 {
        self.key_id
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.key
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

/// Sender certificate: the server-signed attestation of
/// `(uuid, e164?, device, sender key, expiration)`.
#[derive(Debug, Clone)]
pub struct SenderCertificate {
    sender_uuid: String,
    sender_e164: Option<String>,
    sender_device_id: u32,
    key: PublicKey,
    expiration_ms: u64,
    signer: ServerCertificate,
    certificate: Vec<u8>,
    signature: Vec<u8>,
    serialized: Vec<u8>,
}

impl SenderCertificate {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sender_uuid: impl Into<String>,
        sender_e164: Option<String>,
        sender_device_id: u32,
        key: PublicKey,
        expiration_ms: u64,
        signer: ServerCertificate,
        server_key: &PrivateKey,
    ) -> Result<Self> {
        let sender_uuid = sender_uuid.into();

        let certificate = wire::SenderCertificateData {
            sender_e164: sender_e164.clone(),
            sender_device: Some(sender_device_id),
            expires: Some(expiration_ms),
            identity_key: Some(key.serialize().to_vec()),
            signer: Some(signer.to_protobuf()),
            sender_uuid: Some(sender_uuid.clone()),
        }
        .encode_to_vec();
        let signature = server_key.calculate_signature(&certificate).to_vec();

        let serialized = wire::SenderCertificateProto {
            certificate: Some(certificate.clone()),
            signature: Some(signature.clone()),
        }
        .encode_to_vec();

        Ok(Self {
            sender_uuid,
            sender_e164,
            sender_device_id,
            key,
            expiration_ms,
            signer,
            certificate,
            signature,
            serialized,
        })
    }

    fn from_protobuf(proto: wire::SenderCertificateProto) -> Result<Self> {
        let certificate = proto
            .certificate
            .ok_or(ProtocolError::InvalidProtobufEncoding)?;
        let signature = proto
            .signature
            .ok_or(ProtocolError::InvalidProtobufEncoding)?;

        let data = wire::SenderCertificateData::decode(certificate.as_slice())?;
        let sender_uuid = data
            .sender_uuid
            .ok_or(ProtocolError::InvalidProtobufEncoding)?;
        let sender_device_id = data
            .sender_device
            .ok_or(ProtocolError::InvalidProtobufEncoding)?;
        let expiration_ms = data.expires.ok_or(ProtocolError::InvalidProtobufEncoding)?;
        let key = PublicKey::deserialize(
            &data
                .identity_key
                .ok_or(ProtocolError::InvalidProtobufEncoding)?,
        )?;
        let signer = ServerCertificate::from_protobuf(
            data.signer.ok_or(ProtocolError::InvalidProtobufEncoding)?,
        )?;

        let serialized = wire::SenderCertificateProto {
            certificate: Some(certificate.clone()),
            signature: Some(signature.clone()),
        }
        .encode_to_vec();

        Ok(Self {
            sender_uuid,
            sender_e164: data.sender_e164,
            sender_device_id,
            key,
            expiration_ms,
            signer,
            certificate,
            signature,
            serialized,
        })
    }

    pub fn deserialize(value: &[u8]) -> Result<Self> {
        Self::from_protobuf(wire::SenderCertificateProto::decode(value)?)
    }

    fn to_protobuf(&self) -> wire::SenderCertificateProto {
        wire::SenderCertificateProto {
            certificate: Some(self.certificate.clone()),
            signature: Some(self.signature.clone()),
        }
    }

    /// Full chain validation at `now_ms`: expiration (strict less-than),
    /// server certificate against the trust roots, then the sender
    /// signature under the server key. No partial signals, no caching.
    pub fn validate(&self, trust_roots: &[PublicKey], now_ms: u64) -> bool {
        if now_ms >= self.expiration_ms {
            debug!(target: "sealed_sender", expiration_ms = self.expiration_ms, "certificate expired");
            return false;
        }
        if !self.signer.validate(trust_roots) {
            debug!(target: "sealed_sender", "server certificate rejected by trust roots");
            return false;
        }
        self.signer
            .public_key()
            .verify_signature(&self.certificate, &self.signature)
    }

    pub fn sender_uuid(&self) -> &str {
        &self.sender_uuid
    }

    pub fn sender_e164(&self) -> Option<&str> {
        self.sender_e164.as_deref()
    }

    pub fn sender_device_id(&self) -> u32 {
        self.sender_device_id
    }

    pub fn key(&self) -> &PublicKey {
        &self.key
    }

    pub fn expiration_ms(&self) -> u64 {
        self.expiration_ms
    }

    pub fn signer(&self) -> &ServerCertificate {
        &self.signer
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

fn message_type_to_wire(message_type: CiphertextMessageType) -> u32 {
    match message_type {
        CiphertextMessageType::PreKey => 1,
        CiphertextMessageType::Whisper => 2,
        CiphertextMessageType::SenderKey => 7,
        CiphertextMessageType::Plaintext => 8,
    }
}

fn message_type_from_wire(value: u32) -> Result<CiphertextMessageType> {
    match value {
        1 => Ok(CiphertextMessageType::PreKey),
        2 => Ok(CiphertextMessageType::Whisper),
        7 => Ok(CiphertextMessageType::SenderKey),
        8 => Ok(CiphertextMessageType::Plaintext),
        _ => Err(ProtocolError::InvalidMessage("unknown sealed message type")),
    }
}

/// The sender-identity-bearing payload of a sealed envelope.
#[derive(Debug, Clone)]
pub struct UnidentifiedSenderMessageContent {
    msg_type: CiphertextMessageType,
    sender_certificate: SenderCertificate,
    contents: Vec<u8>,
    content_hint: ContentHint,
    group_id: Option<Vec<u8>>,
    serialized: Vec<u8>,
}

impl UnidentifiedSenderMessageContent {
    pub fn new(
        msg_type: CiphertextMessageType,
        sender_certificate: SenderCertificate,
        contents: Vec<u8>,
        content_hint: ContentHint,
        group_id: Option<Vec<u8>>,
    ) -> Result<Self> {
        let serialized = wire::UnidentifiedSenderMessageContentProto {
            r#type: Some(message_type_to_wire(msg_type)),
            sender_certificate: Some(sender_certificate.to_protobuf()),
            content: Some(contents.clone()),
            content_hint: Some(content_hint.to_u32()),
            group_id: group_id.clone(),
        }
        .encode_to_vec();

        Ok(Self {
            msg_type,
            sender_certificate,
            contents,
            content_hint,
            group_id,
            serialized,
        })
    }

    pub fn deserialize(value: &[u8]) -> Result<Self> {
        let proto = wire::UnidentifiedSenderMessageContentProto::decode(value)?;

        let msg_type =
            message_type_from_wire(proto.r#type.ok_or(ProtocolError::InvalidProtobufEncoding)?)?;
        let sender_certificate = SenderCertificate::from_protobuf(
            proto
                .sender_certificate
                .ok_or(ProtocolError::InvalidProtobufEncoding)?,
        )?;
        let contents = proto
            .content
            .ok_or(ProtocolError::InvalidProtobufEncoding)?;

        Ok(Self {
            msg_type,
            sender_certificate,
            contents,
            content_hint: ContentHint::from_u32(proto.content_hint.unwrap_or(0)),
            group_id: proto.group_id,
            serialized: value.to_vec(),
        })
    }

    pub fn msg_type(&self) -> CiphertextMessageType {
        self.msg_type
    }

    pub fn sender_certificate(&self) -> &SenderCertificate {
        &self.sender_certificate
    }

    pub fn contents(&self) -> &[u8] {
        &self.contents
    }

    pub fn content_hint(&self) -> ContentHint {
        self.content_hint
    }

    pub fn group_id(&self) -> Option<&[u8]> {
        self.group_id.as_deref()
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

// The envelope KDF output layout is (cipher key, MAC key, chain key); the
// single-shot envelope consumes only the cipher key.
#[derive(Zeroize, ZeroizeOnDrop)]
struct EnvelopeKeys {
    cipher_key: [u8; 32],
    #[allow(dead_code)]
    mac_key: [u8; 32],
    #[allow(dead_code)]
    chain_key: [u8; 32],
}

fn derive_envelope_keys(
    shared_secret: &[u8; 32],
    recipient_identity: &PublicKey,
    ephemeral: &PublicKey,
) -> Result<EnvelopeKeys> {
    let mut salt = Vec::with_capacity(ENVELOPE_SALT_PREFIX.len() + 2 * PUBLIC_KEY_LENGTH);
    salt.extend_from_slice(ENVELOPE_SALT_PREFIX);
    salt.extend_from_slice(&recipient_identity.serialize());
    salt.extend_from_slice(&ephemeral.serialize());

    let mut derived = [0u8; 96];
    Hkdf::<Sha256>::new(Some(&salt), shared_secret)
        .expand(&[], &mut derived)
        .map_err(|_| ProtocolError::InvalidArgument("HKDF output length".to_string()))?;

    let mut keys = EnvelopeKeys {
        cipher_key: [0u8; 32],
        mac_key: [0u8; 32],
        chain_key: [0u8; 32],
    };
    keys.cipher_key.copy_from_slice(&derived[..32]);
    keys.mac_key.copy_from_slice(&derived[32..64]);
    keys.chain_key.copy_from_slice(&derived[64..]);
    derived.zeroize();
    Ok(keys)
}

/// Encrypt `plaintext` for `destination` and seal it into an anonymous
/// envelope carrying `sender_certificate`.
#[allow(clippy::too_many_arguments)]
pub fn sealed_sender_encrypt(
    destination: &ProtocolAddress,
    plaintext: &[u8],
    sender_certificate: &SenderCertificate,
    content_hint: ContentHint,
    group_id: Option<Vec<u8>>,
    session_store: &mut dyn SessionStore,
    identity_store: &mut dyn IdentityKeyStore,
    now_ms: u64,
) -> Result<Vec<u8>> {
    let inner = message_encrypt(plaintext, destination, session_store, identity_store, now_ms)?;

    let usmc = UnidentifiedSenderMessageContent::new(
        inner.message_type(),
        sender_certificate.clone(),
        inner.serialize().to_vec(),
        content_hint,
        group_id,
    )?;

    sealed_sender_encrypt_from_usmc(destination, &usmc, identity_store)
}

/// Seal an already-built USMC for `destination`.
pub fn sealed_sender_encrypt_from_usmc(
    destination: &ProtocolAddress,
    usmc: &UnidentifiedSenderMessageContent,
    identity_store: &dyn IdentityKeyStore,
) -> Result<Vec<u8>> {
    let their_identity = identity_store
        .get_identity(destination)?
        .ok_or_else(|| ProtocolError::NoSession(destination.clone()))?;

    let ephemeral = KeyPair::generate();
    let shared_secret = ephemeral
        .private_key
        .diffie_hellman(their_identity.public_key());
    let keys = derive_envelope_keys(
        &shared_secret,
        their_identity.public_key(),
        &ephemeral.public_key,
    )?;

    let nonce = [0u8; GCM_SIV_NONCE_LENGTH];
    let associated_data = ephemeral.public_key.serialize();
    let ciphertext = aes_256_gcm_siv_encrypt(
        &keys.cipher_key,
        &nonce,
        usmc.serialized(),
        &associated_data,
    )?;

    let mut envelope =
        Vec::with_capacity(1 + PUBLIC_KEY_LENGTH + ciphertext.len());
    envelope.push(((SEALED_SENDER_VERSION & 0xF) << 4) | SEALED_SENDER_VERSION);
    envelope.extend_from_slice(&ephemeral.public_key.serialize());
    envelope.extend_from_slice(&ciphertext);

    debug!(target: "sealed_sender", destination = %destination, "sealed envelope built");
    Ok(envelope)
}

/// Unwrap an envelope down to its USMC without validating the embedded
/// certificate — the inspection half of the two-step API.
pub fn sealed_sender_decrypt_to_usmc(
    ciphertext: &[u8],
    identity_store: &dyn IdentityKeyStore,
) -> Result<UnidentifiedSenderMessageContent> {
    // Version byte, ephemeral key, and at least an AEAD tag.
    check_min_length(ciphertext, 1 + PUBLIC_KEY_LENGTH + 16)?;

    let version = parse_version_byte(ciphertext)?;
    if version != SEALED_SENDER_VERSION {
        return Err(ProtocolError::UnrecognizedMessageVersion(version));
    }

    let ephemeral_public = PublicKey::deserialize(&ciphertext[1..1 + PUBLIC_KEY_LENGTH])?;
    let our_identity = identity_store.get_identity_key_pair()?;

    let shared_secret = our_identity
        .private_key()
        .diffie_hellman(&ephemeral_public);
    let keys = derive_envelope_keys(
        &shared_secret,
        our_identity.public_key(),
        &ephemeral_public,
    )?;

    let nonce = [0u8; GCM_SIV_NONCE_LENGTH];
    let associated_data = ephemeral_public.serialize();
    let usmc_bytes = aes_256_gcm_siv_decrypt(
        &keys.cipher_key,
        &nonce,
        &ciphertext[1 + PUBLIC_KEY_LENGTH..],
        &associated_data,
    )?;

    UnidentifiedSenderMessageContent::deserialize(&usmc_bytes)
}

/// Everything a caller learns from a successful sealed-sender decrypt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedSenderDecryptionResult {
    pub message: Vec<u8>,
    pub sender_uuid: String,
    pub sender_e164: Option<String>,
    pub device_id: u32,
}

/// Full sealed-sender decryption: unwrap, validate the certificate, reject
/// self-sends, then dispatch the inner message to the right engine.
#[allow(clippy::too_many_arguments)]
pub fn sealed_sender_decrypt(
    ciphertext: &[u8],
    trust_roots: &[PublicKey],
    now_ms: u64,
    local_uuid: &str,
    local_e164: Option<&str>,
    local_device_id: u32,
    session_store: &mut dyn SessionStore,
    identity_store: &mut dyn IdentityKeyStore,
    pre_key_store: &mut dyn PreKeyStore,
    signed_pre_key_store: &dyn SignedPreKeyStore,
    kyber_pre_key_store: &mut dyn KyberPreKeyStore,
    sender_key_store: &mut dyn SenderKeyStore,
) -> Result<SealedSenderDecryptionResult> {
    let usmc = sealed_sender_decrypt_to_usmc(ciphertext, identity_store)?;

    let certificate = usmc.sender_certificate();
    if !certificate.validate(trust_roots, now_ms) {
        warn!(target: "sealed_sender", "sender certificate failed validation");
        return Err(ProtocolError::CertificateInvalid("untrusted sender"));
    }

    let same_principal = certificate.sender_uuid() == local_uuid
        || (local_e164.is_some() && certificate.sender_e164() == local_e164);
    if same_principal && certificate.sender_device_id() == local_device_id {
        return Err(ProtocolError::SelfSend);
    }

    let remote_address = ProtocolAddress::new(
        certificate.sender_uuid().to_string(),
        certificate.sender_device_id(),
    );

    let message = match usmc.msg_type() {
        CiphertextMessageType::Whisper => {
            let message = SignalMessage::try_from(usmc.contents())?;
            message_decrypt_signal(&message, &remote_address, session_store, identity_store)?
        }
        CiphertextMessageType::PreKey => {
            let message = PreKeySignalMessage::try_from(usmc.contents())?;
            message_decrypt_prekey(
                &message,
                &remote_address,
                session_store,
                identity_store,
                pre_key_store,
                signed_pre_key_store,
                kyber_pre_key_store,
                now_ms,
            )?
        }
        CiphertextMessageType::SenderKey => {
            group_decrypt(usmc.contents(), &remote_address, sender_key_store)?
        }
        CiphertextMessageType::Plaintext => usmc.contents().to_vec(),
    };

    Ok(SealedSenderDecryptionResult {
        message,
        sender_uuid: certificate.sender_uuid().to_string(),
        sender_e164: certificate.sender_e164().map(str::to_string),
        device_id: certificate.sender_device_id(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::IdentityKeyPair;
    use crate::storage::memory::InMemoryIdentityStore;

    const DAY_MS: u64 = 24 * 60 * 60 * 1000;

    fn make_certificates(expiration_ms: u64) -> (KeyPair, SenderCertificate, PublicKey) {
        let trust_root = KeyPair::generate();
        let server_key = KeyPair::generate();
        let sender_key = KeyPair::generate();

        let server_certificate =
            ServerCertificate::new(1, server_key.public_key, &trust_root.private_key).unwrap();
        let sender_certificate = SenderCertificate::new(
            "9d0652a3-dcc3-4d11-975f-74d61598733f",
            Some("+14151111111".to_string()),
            1,
            sender_key.public_key,
            expiration_ms,
            server_certificate,
            &server_key.private_key,
        )
        .unwrap();

        (trust_root, sender_certificate, sender_key.public_key)
    }

    #[test]
    fn server_certificate_roundtrip_and_validation() {
        let trust_root = KeyPair::generate();
        let other_root = KeyPair::generate();
        let server_key = KeyPair::generate();

        let certificate =
            ServerCertificate::new(7, server_key.public_key, &trust_root.private_key).unwrap();

        let restored = ServerCertificate::deserialize(certificate.serialized()).unwrap();
        assert_eq!(restored.key_id(), 7);
        assert_eq!(restored.public_key(), certificate.public_key());
        assert_eq!(restored.serialized(), certificate.serialized());

        assert!(restored.validate(&[trust_root.public_key]));
        assert!(!restored.validate(&[other_root.public_key]));
        // A set containing the right root passes.
        assert!(restored.validate(&[other_root.public_key, trust_root.public_key]));
    }

    #[test]
    fn sender_certificate_roundtrip() {
        let now = 1_700_000_000_000;
        let (_, certificate, sender_key) = make_certificates(now + 30 * DAY_MS);

        let restored = SenderCertificate::deserialize(certificate.serialized()).unwrap();
        assert_eq!(restored.sender_uuid(), certificate.sender_uuid());
        assert_eq!(restored.sender_e164(), certificate.sender_e164());
        assert_eq!(restored.sender_device_id(), 1);
        assert_eq!(restored.key(), &sender_key);
        assert_eq!(restored.expiration_ms(), certificate.expiration_ms());
        assert_eq!(restored.serialized(), certificate.serialized());
    }

    #[test]
    fn sender_certificate_validation_matrix() {
        let now = 1_700_000_000_000;
        let (trust_root, certificate, _) = make_certificates(now + 30 * DAY_MS);
        let unrelated_root = KeyPair::generate();

        assert!(certificate.validate(&[trust_root.public_key], now));
        // Wrong trust root.
        assert!(!certificate.validate(&[unrelated_root.public_key], now));
        // Expiration is strict less-than.
        assert!(!certificate.validate(&[trust_root.public_key], certificate.expiration_ms()));
        assert!(certificate.validate(&[trust_root.public_key], certificate.expiration_ms() - 1));

        // Expired certificate fails even under the right root.
        let (trust_root, expired, _) = make_certificates(now - DAY_MS);
        assert!(!expired.validate(&[trust_root.public_key], now));
    }

    #[test]
    fn tampered_sender_certificate_fails_validation() {
        let now = 1_700_000_000_000;
        let (trust_root, certificate, _) = make_certificates(now + DAY_MS);

        let mut bytes = certificate.serialized().to_vec();
        // Flip a bit inside the signed payload.
        bytes[5] ^= 0x01;
        if let Ok(parsed) = SenderCertificate::deserialize(&bytes) {
            assert!(!parsed.validate(&[trust_root.public_key], now));
        }
    }

    #[test]
    fn usmc_roundtrip() {
        let now = 1_700_000_000_000;
        let (_, certificate, _) = make_certificates(now + DAY_MS);

        let usmc = UnidentifiedSenderMessageContent::new(
            CiphertextMessageType::Whisper,
            certificate,
            vec![1, 2, 3, 4],
            ContentHint::Resendable,
            Some(vec![9; 16]),
        )
        .unwrap();

        let restored = UnidentifiedSenderMessageContent::deserialize(usmc.serialized()).unwrap();
        assert_eq!(restored.msg_type(), CiphertextMessageType::Whisper);
        assert_eq!(restored.contents(), usmc.contents());
        assert_eq!(restored.content_hint(), ContentHint::Resendable);
        assert_eq!(restored.group_id(), Some(&[9u8; 16][..]));
        assert_eq!(
            restored.sender_certificate().serialized(),
            usmc.sender_certificate().serialized()
        );
    }

    #[test]
    fn content_hint_preserves_unknown_values() {
        assert_eq!(ContentHint::from_u32(0), ContentHint::Default);
        assert_eq!(ContentHint::from_u32(1), ContentHint::Resendable);
        assert_eq!(ContentHint::from_u32(2), ContentHint::Implicit);
        assert_eq!(ContentHint::from_u32(77), ContentHint::Unknown(77));
        assert_eq!(ContentHint::Unknown(77).to_u32(), 77);
    }

    #[test]
    fn envelope_roundtrip_to_usmc() {
        let now = 1_700_000_000_000;
        let (_, certificate, _) = make_certificates(now + DAY_MS);

        let recipient_identity = IdentityKeyPair::generate();
        let recipient_store = InMemoryIdentityStore::new(recipient_identity.clone(), 42);

        // The sender knows the recipient's identity from an earlier handshake.
        let sender_identity = IdentityKeyPair::generate();
        let mut sender_store = InMemoryIdentityStore::new(sender_identity, 43);
        let recipient_address = ProtocolAddress::new("recipient", 1);
        use crate::storage::IdentityKeyStore as _;
        sender_store
            .save_identity(&recipient_address, recipient_identity.identity_key())
            .unwrap();

        let usmc = UnidentifiedSenderMessageContent::new(
            CiphertextMessageType::Plaintext,
            certificate,
            b"inner payload".to_vec(),
            ContentHint::Default,
            None,
        )
        .unwrap();

        let envelope =
            sealed_sender_encrypt_from_usmc(&recipient_address, &usmc, &sender_store).unwrap();
        assert_eq!(envelope[0] >> 4, SEALED_SENDER_VERSION);

        let unwrapped = sealed_sender_decrypt_to_usmc(&envelope, &recipient_store).unwrap();
        assert_eq!(unwrapped.contents(), b"inner payload");

        // A tampered envelope fails the AEAD.
        let mut tampered = envelope.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;
        assert!(sealed_sender_decrypt_to_usmc(&tampered, &recipient_store).is_err());

        // The wrong recipient cannot unwrap it.
        let wrong_identity = IdentityKeyPair::generate();
        let wrong_store = InMemoryIdentityStore::new(wrong_identity, 44);
        assert!(sealed_sender_decrypt_to_usmc(&envelope, &wrong_store).is_err());

    }
}

use thiserror::Error;
use uuid::Uuid;

use crate::protocol::address::ProtocolAddress;

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Error taxonomy of the protocol core.
///
/// Every engine operation surfaces one of these to its immediate caller;
/// nothing is retried internally. Variants carry the offending identifier
/// where one exists, never key material or plaintext.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to deserialize {0}")]
    InvalidSerialization(&'static str),

    #[error("invalid protobuf encoding")]
    InvalidProtobufEncoding,

    #[error("ciphertext too short ({0} bytes)")]
    CiphertextTooShort(usize),

    #[error("legacy message version {0} is no longer supported")]
    LegacyMessageVersion(u8),

    #[error("unrecognized message version {0}")]
    UnrecognizedMessageVersion(u8),

    #[error("invalid signature on {0}")]
    InvalidSignature(&'static str),

    #[error("message MAC verification failed")]
    InvalidMac,

    #[error("invalid {kind} key length: {length}")]
    InvalidKeyLength { kind: &'static str, length: usize },

    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),

    #[error("untrusted identity for {0}")]
    UntrustedIdentity(ProtocolAddress),

    #[error("no session with {0}")]
    NoSession(ProtocolAddress),

    #[error("invalid session state: {0}")]
    InvalidSessionState(&'static str),

    #[error("duplicate message: chain index {chain_index}, counter {counter}")]
    DuplicatedMessage { chain_index: u32, counter: u32 },

    #[error("message counter {counter} is {jump} ahead of chain index {chain_index}")]
    MessageTooFarAhead {
        chain_index: u32,
        counter: u32,
        jump: u32,
    },

    #[error("no pre-key with id {0}")]
    PreKeyNotFound(u32),

    #[error("no signed pre-key with id {0}")]
    SignedPreKeyNotFound(u32),

    #[error("no Kyber pre-key with id {0}")]
    KyberPreKeyNotFound(u32),

    #[error("no sender key state for distribution {distribution_id}")]
    SenderKeyNotFound {
        distribution_id: Uuid,
        chain_id: Option<u32>,
    },

    #[error("sender certificate expired at {expiration_ms}")]
    CertificateExpired { expiration_ms: u64 },

    #[error("certificate validation failed: {0}")]
    CertificateInvalid(&'static str),

    #[error("sealed sender message from the local principal")]
    SelfSend,

    #[error("storage operation failed: {0}")]
    StorageError(String),
}

impl From<prost::DecodeError> for ProtocolError {
    fn from(_: prost::DecodeError) -> Self {
        ProtocolError::InvalidProtobufEncoding
    }
}

impl ProtocolError {
    /// Wrap an underlying store failure, preserving its cause as text.
    pub fn storage<E: std::fmt::Display>(cause: E) -> Self {
        ProtocolError::StorageError(cause.to_string())
    }
}

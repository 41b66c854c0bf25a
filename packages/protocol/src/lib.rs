// Meridian Protocol
// Signal Protocol state machines: PQXDH, Double Ratchet, sender keys,
// sealed sender

#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)]

// Модули
pub mod config;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod state;
pub mod storage;
pub mod utils;

// Re-exports для удобства
pub use config::Config;
pub use error::{ProtocolError, Result};

pub use crypto::curve::{KeyPair, PrivateKey, PublicKey};
pub use crypto::handshake::process_pre_key_bundle;
pub use crypto::kem::{KemKeyPair, KemPublicKey, KemSecretKey};
pub use crypto::keys::{
    IdentityKey, IdentityKeyPair, KyberPreKeyBundlePart, KyberPreKeyRecord, PreKeyBundle,
    PreKeyRecord, SignedPreKeyRecord,
};
pub use crypto::messaging::{
    create_sender_key_distribution_message, group_decrypt, group_encrypt, message_decrypt,
    message_decrypt_prekey, message_decrypt_signal, message_encrypt,
    process_sender_key_distribution_message, remote_registration_id, session_version,
};
pub use crypto::sealed_sender::{
    sealed_sender_decrypt, sealed_sender_decrypt_to_usmc, sealed_sender_encrypt,
    sealed_sender_encrypt_from_usmc, ContentHint, SealedSenderDecryptionResult, SenderCertificate,
    ServerCertificate, UnidentifiedSenderMessageContent,
};
pub use protocol::address::ProtocolAddress;
pub use protocol::messages::{
    CiphertextMessage, CiphertextMessageType, DecryptionErrorMessage, PlaintextContent,
    PreKeySignalMessage, SenderKeyDistributionMessage, SenderKeyMessage, SignalMessage,
};
pub use state::sender_key::SenderKeyRecord;
pub use state::session::SessionRecord;
pub use storage::{
    Direction, IdentityKeyStore, KyberPreKeyStore, PreKeyStore, SenderKeyStore, SessionStore,
    SignedPreKeyStore,
};

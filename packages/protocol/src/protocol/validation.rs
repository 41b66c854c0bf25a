//! Pre-parse structural validation of wire inputs.
//!
//! Every check here runs before any protobuf decoding or cryptographic
//! work, turning malformed inputs into typed errors instead of parser
//! surprises deeper in the stack.

use uuid::Uuid;

use crate::error::{ProtocolError, Result};
use crate::protocol::messages::{
    CIPHERTEXT_MESSAGE_CURRENT_VERSION, CIPHERTEXT_MESSAGE_PRE_KYBER_VERSION,
    SENDERKEY_MESSAGE_CURRENT_VERSION,
};

/// Length of a wire-form distribution id.
pub const DISTRIBUTION_ID_LENGTH: usize = 16;

/// Reject inputs shorter than the fixed framing of their message kind.
pub fn check_min_length(value: &[u8], minimum: usize) -> Result<()> {
    if value.len() < minimum {
        return Err(ProtocolError::CiphertextTooShort(value.len()));
    }
    Ok(())
}

/// Extract the message version from the leading version byte.
pub fn parse_version_byte(value: &[u8]) -> Result<u8> {
    match value.first() {
        Some(byte) => Ok(byte >> 4),
        None => Err(ProtocolError::CiphertextTooShort(0)),
    }
}

/// Pairwise session messages: version 3 (classic) or 4 (post-quantum).
pub fn check_session_version(version: u8) -> Result<()> {
    if version < CIPHERTEXT_MESSAGE_PRE_KYBER_VERSION {
        return Err(ProtocolError::LegacyMessageVersion(version));
    }
    if version > CIPHERTEXT_MESSAGE_CURRENT_VERSION {
        return Err(ProtocolError::UnrecognizedMessageVersion(version));
    }
    Ok(())
}

/// Sender-key messages are fixed at version 3.
pub fn check_sender_key_version(version: u8) -> Result<()> {
    if version < SENDERKEY_MESSAGE_CURRENT_VERSION {
        return Err(ProtocolError::LegacyMessageVersion(version));
    }
    if version > SENDERKEY_MESSAGE_CURRENT_VERSION {
        return Err(ProtocolError::UnrecognizedMessageVersion(version));
    }
    Ok(())
}

/// Parse a wire-form distribution id (exactly 16 bytes).
pub fn distribution_id_from_slice(value: &[u8]) -> Result<Uuid> {
    if value.len() != DISTRIBUTION_ID_LENGTH {
        return Err(ProtocolError::InvalidArgument(format!(
            "distribution id must be {DISTRIBUTION_ID_LENGTH} bytes, got {}",
            value.len()
        )));
    }
    Uuid::from_slice(value).map_err(|_| ProtocolError::InvalidSerialization("distribution id"))
}

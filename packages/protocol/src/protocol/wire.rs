//! Protobuf wire structures of the established message format.
//!
//! Field numbers are fixed by the deployed protocol and must never be
//! renumbered. Every field is optional at the encoding layer; presence
//! requirements are enforced by the typed wrappers in
//! [`crate::protocol::messages`].

/// Body of a Double Ratchet message (after the version byte, before the MAC).
#[derive(Clone, PartialEq, prost::Message)]
pub struct SignalMessageProto {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub ratchet_key: Option<Vec<u8>>,
    #[prost(uint32, optional, tag = "2")]
    pub counter: Option<u32>,
    #[prost(uint32, optional, tag = "3")]
    pub previous_counter: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub ciphertext: Option<Vec<u8>>,
    /// Opaque post-quantum ratchet payload; preserved byte-for-byte.
    #[prost(bytes = "vec", optional, tag = "5")]
    pub pq_ratchet: Option<Vec<u8>>,
}

/// Body of a handshake message (after the version byte).
#[derive(Clone, PartialEq, prost::Message)]
pub struct PreKeySignalMessageProto {
    #[prost(uint32, optional, tag = "1")]
    pub pre_key_id: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub base_key: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub identity_key: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub message: Option<Vec<u8>>,
    #[prost(uint32, optional, tag = "5")]
    pub registration_id: Option<u32>,
    #[prost(uint32, optional, tag = "6")]
    pub signed_pre_key_id: Option<u32>,
    #[prost(uint32, optional, tag = "7")]
    pub kyber_pre_key_id: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "8")]
    pub kyber_ciphertext: Option<Vec<u8>>,
}

/// Body of a group message (after the version byte, before the signature).
#[derive(Clone, PartialEq, prost::Message)]
pub struct SenderKeyMessageProto {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub distribution_uuid: Option<Vec<u8>>,
    #[prost(uint32, optional, tag = "2")]
    pub chain_id: Option<u32>,
    #[prost(uint32, optional, tag = "3")]
    pub iteration: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub ciphertext: Option<Vec<u8>>,
}

/// Body of a sender-key chain descriptor (after the version byte).
#[derive(Clone, PartialEq, prost::Message)]
pub struct SenderKeyDistributionMessageProto {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub distribution_uuid: Option<Vec<u8>>,
    #[prost(uint32, optional, tag = "2")]
    pub chain_id: Option<u32>,
    #[prost(uint32, optional, tag = "3")]
    pub iteration: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub chain_key: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "5")]
    pub signing_key: Option<Vec<u8>>,
}

/// Re-send request for a message that failed to decrypt.
#[derive(Clone, PartialEq, prost::Message)]
pub struct DecryptionErrorMessageProto {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub ratchet_key: Option<Vec<u8>>,
    #[prost(uint64, optional, tag = "2")]
    pub timestamp: Option<u64>,
    #[prost(uint32, optional, tag = "3")]
    pub device_id: Option<u32>,
}

/// Signed payload of a server certificate.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ServerCertificateData {
    #[prost(uint32, optional, tag = "1")]
    pub id: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub key: Option<Vec<u8>>,
}

/// Server certificate: canonical signed bytes plus the trust-root signature.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ServerCertificateProto {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub certificate: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub signature: Option<Vec<u8>>,
}

/// Signed payload of a sender certificate.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SenderCertificateData {
    #[prost(string, optional, tag = "1")]
    pub sender_e164: Option<String>,
    #[prost(uint32, optional, tag = "2")]
    pub sender_device: Option<u32>,
    #[prost(fixed64, optional, tag = "3")]
    pub expires: Option<u64>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub identity_key: Option<Vec<u8>>,
    #[prost(message, optional, tag = "5")]
    pub signer: Option<ServerCertificateProto>,
    #[prost(string, optional, tag = "6")]
    pub sender_uuid: Option<String>,
}

/// Sender certificate: canonical signed bytes plus the server-key signature.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SenderCertificateProto {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub certificate: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub signature: Option<Vec<u8>>,
}

/// Inner payload of a sealed-sender envelope (USMC).
#[derive(Clone, PartialEq, prost::Message)]
pub struct UnidentifiedSenderMessageContentProto {
    #[prost(uint32, optional, tag = "1")]
    pub r#type: Option<u32>,
    #[prost(message, optional, tag = "2")]
    pub sender_certificate: Option<SenderCertificateProto>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub content: Option<Vec<u8>>,
    #[prost(uint32, optional, tag = "4")]
    pub content_hint: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "5")]
    pub group_id: Option<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn absent_optional_fields_encode_to_nothing() {
        let message = SignalMessageProto::default();
        assert_eq!(message.encoded_len(), 0);
    }

    #[test]
    fn signal_message_proto_roundtrip() {
        let message = SignalMessageProto {
            ratchet_key: Some(vec![5; 33]),
            counter: Some(7),
            previous_counter: Some(3),
            ciphertext: Some(vec![1, 2, 3]),
            pq_ratchet: None,
        };

        let bytes = message.encode_to_vec();
        let decoded = SignalMessageProto::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        // A future field (tag 99) must not break decoding.
        let mut bytes = SignalMessageProto {
            counter: Some(1),
            ..Default::default()
        }
        .encode_to_vec();
        bytes.extend_from_slice(&[0b1001_1000, 0b0000_0110, 0x01]); // tag 99 varint 1
        assert!(SignalMessageProto::decode(bytes.as_slice()).is_ok());
    }
}

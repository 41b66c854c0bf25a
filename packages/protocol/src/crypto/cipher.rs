//! Symmetric primitives: AES-256-CBC with PKCS#7, HMAC-SHA256 and
//! AES-256-GCM-SIV for sealed envelopes.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes_gcm_siv::aead::{Aead, KeyInit, Payload};
use aes_gcm_siv::{Aes256GcmSiv, Nonce};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{ProtocolError, Result};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// AES block length; CBC ciphertexts are a positive multiple of it.
pub const AES_BLOCK_LENGTH: usize = 16;

/// Nonce length of AES-256-GCM-SIV.
pub const GCM_SIV_NONCE_LENGTH: usize = 12;

pub fn aes_256_cbc_encrypt(plaintext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
    let encryptor =
        Aes256CbcEnc::new_from_slices(key, iv).map_err(|_| ProtocolError::InvalidKeyLength {
            kind: "AES-256-CBC key/IV",
            length: key.len(),
        })?;
    Ok(encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

pub fn aes_256_cbc_decrypt(ciphertext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % AES_BLOCK_LENGTH != 0 {
        return Err(ProtocolError::InvalidMessage(
            "ciphertext is not a whole number of AES blocks",
        ));
    }
    let decryptor =
        Aes256CbcDec::new_from_slices(key, iv).map_err(|_| ProtocolError::InvalidKeyLength {
            kind: "AES-256-CBC key/IV",
            length: key.len(),
        })?;
    decryptor
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| ProtocolError::InvalidMessage("invalid ciphertext padding"))
}

pub fn hmac_sha256(key: &[u8], input: &[u8]) -> Result<[u8; 32]> {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(key).map_err(|_| ProtocolError::InvalidKeyLength {
            kind: "HMAC-SHA256",
            length: key.len(),
        })?;
    mac.update(input);
    Ok(mac.finalize().into_bytes().into())
}

pub fn aes_256_gcm_siv_encrypt(
    key: &[u8; 32],
    nonce: &[u8; GCM_SIV_NONCE_LENGTH],
    plaintext: &[u8],
    associated_data: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256GcmSiv::new(key.into());
    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad: associated_data,
            },
        )
        .map_err(|_| ProtocolError::InvalidArgument("AES-GCM-SIV encryption failed".to_string()))
}

pub fn aes_256_gcm_siv_decrypt(
    key: &[u8; 32],
    nonce: &[u8; GCM_SIV_NONCE_LENGTH],
    ciphertext: &[u8],
    associated_data: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256GcmSiv::new(key.into());
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: associated_data,
            },
        )
        .map_err(|_| ProtocolError::InvalidMac)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cbc_roundtrip_and_padding() {
        let key = [0x11u8; 32];
        let iv = [0x22u8; 16];

        for len in [0usize, 1, 15, 16, 17, 255] {
            let plaintext = vec![0xABu8; len];
            let ciphertext = aes_256_cbc_encrypt(&plaintext, &key, &iv).unwrap();
            assert_eq!(ciphertext.len() % AES_BLOCK_LENGTH, 0);
            assert!(ciphertext.len() > plaintext.len());

            let decrypted = aes_256_cbc_decrypt(&ciphertext, &key, &iv).unwrap();
            assert_eq!(decrypted, plaintext);
        }
    }

    #[test]
    fn cbc_rejects_ragged_ciphertext() {
        let key = [0u8; 32];
        let iv = [0u8; 16];
        assert!(aes_256_cbc_decrypt(&[], &key, &iv).is_err());
        assert!(aes_256_cbc_decrypt(&[0u8; 15], &key, &iv).is_err());
        assert!(aes_256_cbc_decrypt(&[0u8; 17], &key, &iv).is_err());
    }

    #[test]
    fn cbc_wrong_key_fails_or_garbles() {
        let key = [0x01u8; 32];
        let other_key = [0x02u8; 32];
        let iv = [0x03u8; 16];
        let plaintext = b"sixteen byte msg";

        let ciphertext = aes_256_cbc_encrypt(plaintext, &key, &iv).unwrap();
        match aes_256_cbc_decrypt(&ciphertext, &other_key, &iv) {
            Err(_) => {}
            Ok(garbled) => assert_ne!(garbled, plaintext),
        }
    }

    #[test]
    fn hmac_is_deterministic_and_keyed() {
        let a = hmac_sha256(b"key-a", b"input").unwrap();
        let b = hmac_sha256(b"key-a", b"input").unwrap();
        let c = hmac_sha256(b"key-b", b"input").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn gcm_siv_roundtrip_and_aad_binding() {
        let key = [0x42u8; 32];
        let nonce = [0u8; GCM_SIV_NONCE_LENGTH];
        let plaintext = b"sealed payload";

        let ciphertext = aes_256_gcm_siv_encrypt(&key, &nonce, plaintext, b"aad").unwrap();
        let decrypted = aes_256_gcm_siv_decrypt(&key, &nonce, &ciphertext, b"aad").unwrap();
        assert_eq!(decrypted, plaintext);

        assert!(aes_256_gcm_siv_decrypt(&key, &nonce, &ciphertext, b"other").is_err());

        let mut tampered = ciphertext.clone();
        tampered[0] ^= 0x80;
        assert!(aes_256_gcm_siv_decrypt(&key, &nonce, &tampered, b"aad").is_err());
    }
}

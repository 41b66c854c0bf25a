//! Double Ratchet message encryption and decryption.
//!
//! Every operation is load → compute → save against the stores. Decryption
//! works on a clone of the candidate state and commits it only after the MAC
//! verifies, so a failed decrypt leaves the record exactly as loaded.

use tracing::{debug, warn};

use crate::config::Config;
use crate::crypto::cipher::{aes_256_cbc_decrypt, aes_256_cbc_encrypt};
use crate::crypto::curve::{KeyPair, PublicKey};
use crate::crypto::handshake::process_prekey;
use crate::crypto::ratchet::{ChainKey, MessageKeys};
use crate::error::{ProtocolError, Result};
use crate::protocol::address::ProtocolAddress;
use crate::protocol::messages::{
    CiphertextMessage, PreKeySignalMessage, SignalMessage,
};
use crate::state::session::{SessionRecord, SessionState};
use crate::storage::{
    Direction, IdentityKeyStore, KyberPreKeyStore, PreKeyStore, SessionStore, SignedPreKeyStore,
};

/// Encrypt application plaintext for `remote_address`.
///
/// Produces a [`PreKeySignalMessage`] while the session still carries
/// unacknowledged handshake material, a plain [`SignalMessage`] afterwards.
pub fn message_encrypt(
    plaintext: &[u8],
    remote_address: &ProtocolAddress,
    session_store: &mut dyn SessionStore,
    identity_store: &mut dyn IdentityKeyStore,
    now_ms: u64,
) -> Result<CiphertextMessage> {
    let mut record = session_store
        .load_session(remote_address)?
        .ok_or_else(|| ProtocolError::NoSession(remote_address.clone()))?;

    if !record.has_usable_sender_chain(now_ms) {
        debug!(target: "messaging::session", remote = %remote_address, "session unusable for sending");
        return Err(ProtocolError::NoSession(remote_address.clone()));
    }

    let state = record
        .session_state_mut()
        .ok_or_else(|| ProtocolError::NoSession(remote_address.clone()))?;

    let chain_key = state.sender_chain_key()?;
    let message_keys = chain_key.message_keys()?;

    let sender_ratchet_key = state.sender_ratchet_key()?;
    let previous_counter = state.previous_counter();
    let session_version = state.session_version();

    let local_identity = *state.local_identity_key();
    let their_identity = *state
        .remote_identity_key()
        .ok_or(ProtocolError::InvalidSessionState("no remote identity"))?;

    let ciphertext = aes_256_cbc_encrypt(plaintext, message_keys.cipher_key(), message_keys.iv())?;

    let message = match state.pending_pre_key().cloned() {
        Some(pending) => {
            debug!(
                target: "messaging::session",
                remote = %remote_address,
                pre_key_id = ?pending.pre_key_id,
                "building handshake message"
            );

            let inner = SignalMessage::new(
                session_version,
                message_keys.mac_key(),
                sender_ratchet_key,
                chain_key.index(),
                previous_counter,
                &ciphertext,
                &local_identity,
                &their_identity,
                None,
            )?;

            let kyber = pending
                .kyber_pre_key_id
                .zip(pending.kyber_ciphertext.clone());

            CiphertextMessage::PreKeySignalMessage(PreKeySignalMessage::new(
                session_version,
                state.local_registration_id(),
                pending.pre_key_id,
                pending.signed_pre_key_id,
                kyber,
                pending.base_key,
                local_identity,
                inner,
            )?)
        }
        None => CiphertextMessage::SignalMessage(SignalMessage::new(
            session_version,
            message_keys.mac_key(),
            sender_ratchet_key,
            chain_key.index(),
            previous_counter,
            &ciphertext,
            &local_identity,
            &their_identity,
            None,
        )?),
    };

    state.set_sender_chain_key(chain_key.next_chain_key()?)?;

    // Nothing has been persisted yet; an untrusted identity aborts cleanly.
    if !identity_store.is_trusted_identity(remote_address, &their_identity, Direction::Sending)? {
        warn!(target: "messaging::session", remote = %remote_address, "untrusted identity on encrypt");
        return Err(ProtocolError::UntrustedIdentity(remote_address.clone()));
    }

    identity_store.save_identity(remote_address, &their_identity)?;
    session_store.store_session(remote_address, &record)?;
    Ok(message)
}

/// Decrypt any pairwise ciphertext message.
#[allow(clippy::too_many_arguments)]
pub fn message_decrypt(
    ciphertext: &CiphertextMessage,
    remote_address: &ProtocolAddress,
    session_store: &mut dyn SessionStore,
    identity_store: &mut dyn IdentityKeyStore,
    pre_key_store: &mut dyn PreKeyStore,
    signed_pre_key_store: &dyn SignedPreKeyStore,
    kyber_pre_key_store: &mut dyn KyberPreKeyStore,
    now_ms: u64,
) -> Result<Vec<u8>> {
    match ciphertext {
        CiphertextMessage::SignalMessage(message) => {
            message_decrypt_signal(message, remote_address, session_store, identity_store)
        }
        CiphertextMessage::PreKeySignalMessage(message) => message_decrypt_prekey(
            message,
            remote_address,
            session_store,
            identity_store,
            pre_key_store,
            signed_pre_key_store,
            kyber_pre_key_store,
            now_ms,
        ),
        _ => Err(ProtocolError::InvalidArgument(
            "cannot decrypt this message type with a pairwise session".to_string(),
        )),
    }
}

/// Decrypt an inbound handshake message, installing the session if needed.
///
/// Write ordering: session save first, then identity, then the one-time
/// pre-key removal and Kyber pre-key marking become observable.
#[allow(clippy::too_many_arguments)]
pub fn message_decrypt_prekey(
    ciphertext: &PreKeySignalMessage,
    remote_address: &ProtocolAddress,
    session_store: &mut dyn SessionStore,
    identity_store: &mut dyn IdentityKeyStore,
    pre_key_store: &mut dyn PreKeyStore,
    signed_pre_key_store: &dyn SignedPreKeyStore,
    kyber_pre_key_store: &mut dyn KyberPreKeyStore,
    now_ms: u64,
) -> Result<Vec<u8>> {
    let mut record = session_store
        .load_session(remote_address)?
        .unwrap_or_else(SessionRecord::new_fresh);

    let used_pre_keys = process_prekey(
        ciphertext,
        remote_address,
        &mut record,
        identity_store,
        pre_key_store,
        signed_pre_key_store,
        kyber_pre_key_store,
        now_ms,
    )?;

    let plaintext = decrypt_message_with_record(remote_address, &mut record, ciphertext.message())?;

    session_store.store_session(remote_address, &record)?;
    identity_store.save_identity(remote_address, ciphertext.identity_key())?;

    if let Some(used) = used_pre_keys {
        if let Some(pre_key_id) = used.pre_key_id {
            pre_key_store.remove_pre_key(pre_key_id)?;
        }
        if let Some(kyber_pre_key_id) = used.kyber_pre_key_id {
            kyber_pre_key_store.mark_kyber_pre_key_used(kyber_pre_key_id)?;
        }
    }

    Ok(plaintext)
}

/// Decrypt a regular Double Ratchet message.
pub fn message_decrypt_signal(
    ciphertext: &SignalMessage,
    remote_address: &ProtocolAddress,
    session_store: &mut dyn SessionStore,
    identity_store: &mut dyn IdentityKeyStore,
) -> Result<Vec<u8>> {
    let mut record = session_store
        .load_session(remote_address)?
        .ok_or_else(|| ProtocolError::NoSession(remote_address.clone()))?;

    let plaintext = decrypt_message_with_record(remote_address, &mut record, ciphertext)?;

    let their_identity = *record
        .session_state()
        .and_then(SessionState::remote_identity_key)
        .ok_or(ProtocolError::InvalidSessionState("no remote identity"))?;

    if !identity_store.is_trusted_identity(remote_address, &their_identity, Direction::Receiving)? {
        warn!(target: "messaging::session", remote = %remote_address, "untrusted identity on decrypt");
        return Err(ProtocolError::UntrustedIdentity(remote_address.clone()));
    }

    identity_store.save_identity(remote_address, &their_identity)?;
    session_store.store_session(remote_address, &record)?;

    Ok(plaintext)
}

/// Registration id recorded for the remote device during the handshake.
pub fn remote_registration_id(
    remote_address: &ProtocolAddress,
    session_store: &dyn SessionStore,
) -> Result<u32> {
    session_store
        .load_session(remote_address)?
        .ok_or_else(|| ProtocolError::NoSession(remote_address.clone()))?
        .remote_registration_id()
}

/// Protocol version of the current session state.
pub fn session_version(
    remote_address: &ProtocolAddress,
    session_store: &dyn SessionStore,
) -> Result<u32> {
    Ok(session_store
        .load_session(remote_address)?
        .ok_or_else(|| ProtocolError::NoSession(remote_address.clone()))?
        .session_version()? as u32)
}

/// Try the current state, then each archived state; commit whichever clone
/// decrypts, promoting an archived winner back to current.
fn decrypt_message_with_record(
    remote_address: &ProtocolAddress,
    record: &mut SessionRecord,
    ciphertext: &SignalMessage,
) -> Result<Vec<u8>> {
    let mut first_error: Option<ProtocolError> = None;

    if let Some(current) = record.session_state() {
        let mut updated = current.clone();
        match decrypt_message_with_state(&mut updated, ciphertext, remote_address) {
            Ok(plaintext) => {
                record.set_session_state(updated);
                return Ok(plaintext);
            }
            Err(error @ ProtocolError::DuplicatedMessage { .. }) => return Err(error),
            Err(error) => {
                debug!(
                    target: "messaging::session",
                    remote = %remote_address,
                    %error,
                    "current state failed to decrypt, trying archived states"
                );
                first_error = Some(error);
            }
        }
    }

    let mut promoted: Option<(Vec<u8>, usize, SessionState)> = None;
    for (index, previous) in record.previous_session_states().iter().enumerate() {
        let mut updated = previous.clone();
        match decrypt_message_with_state(&mut updated, ciphertext, remote_address) {
            Ok(plaintext) => {
                promoted = Some((plaintext, index, updated));
                break;
            }
            Err(error @ ProtocolError::DuplicatedMessage { .. }) => return Err(error),
            Err(error) => {
                if first_error.is_none() {
                    first_error = Some(error);
                }
            }
        }
    }

    if let Some((plaintext, index, updated)) = promoted {
        debug!(
            target: "messaging::session",
            remote = %remote_address,
            archived_index = index,
            "decrypted with archived session state"
        );
        record.promote_old_session(index, updated)?;
        return Ok(plaintext);
    }

    warn!(target: "messaging::session", remote = %remote_address, "no session state could decrypt");
    Err(first_error.unwrap_or(ProtocolError::InvalidMessage("no session state to decrypt with")))
}

fn decrypt_message_with_state(
    state: &mut SessionState,
    ciphertext: &SignalMessage,
    remote_address: &ProtocolAddress,
) -> Result<Vec<u8>> {
    if !state.has_sender_chain() {
        return Err(ProtocolError::InvalidSessionState(
            "session state without sender chain",
        ));
    }

    if ciphertext.message_version() != state.session_version() {
        return Err(ProtocolError::UnrecognizedMessageVersion(
            ciphertext.message_version(),
        ));
    }

    let their_ephemeral = ciphertext.sender_ratchet_key();
    let counter = ciphertext.counter();

    let chain_key = get_or_create_chain_key(state, their_ephemeral, remote_address)?;
    let message_keys =
        get_or_create_message_keys(state, their_ephemeral, &chain_key, counter, remote_address)?;

    let their_identity = *state
        .remote_identity_key()
        .ok_or(ProtocolError::InvalidSessionState("no remote identity"))?;
    let local_identity = *state.local_identity_key();

    if !ciphertext.verify_mac(&their_identity, &local_identity, message_keys.mac_key())? {
        return Err(ProtocolError::InvalidMac);
    }

    let plaintext =
        aes_256_cbc_decrypt(ciphertext.body(), message_keys.cipher_key(), message_keys.iv())?;

    // First authenticated inbound message acknowledges the handshake.
    state.clear_pending_pre_key();

    Ok(plaintext)
}

fn get_or_create_chain_key(
    state: &mut SessionState,
    their_ephemeral: &PublicKey,
    remote_address: &ProtocolAddress,
) -> Result<ChainKey> {
    if let Some(chain_key) = state.receiver_chain_key(their_ephemeral) {
        return Ok(chain_key);
    }

    debug!(target: "messaging::session", remote = %remote_address, "performing DH ratchet step");

    let root_key = state.root_key().clone();
    let our_ephemeral = state.sender_ratchet_private_key()?;

    let (receiver_root, receiver_chain) = root_key.create_chain(their_ephemeral, &our_ephemeral)?;

    let our_new_ephemeral = KeyPair::generate();
    let (sender_root, sender_chain) =
        receiver_root.create_chain(their_ephemeral, &our_new_ephemeral.private_key)?;

    state.set_root_key(sender_root);
    state.add_receiver_chain(*their_ephemeral, receiver_chain.clone());

    let current_index = state.sender_chain_key()?.index();
    state.set_previous_counter(current_index.saturating_sub(1));
    state.set_sender_chain(our_new_ephemeral, sender_chain);

    Ok(receiver_chain)
}

fn get_or_create_message_keys(
    state: &mut SessionState,
    their_ephemeral: &PublicKey,
    chain_key: &ChainKey,
    counter: u32,
    remote_address: &ProtocolAddress,
) -> Result<MessageKeys> {
    let chain_index = chain_key.index();

    if chain_index > counter {
        // Either a late arrival we cached a key for, or a replay.
        return state
            .take_message_keys(their_ephemeral, counter)
            .ok_or_else(|| {
                debug!(
                    target: "messaging::session",
                    remote = %remote_address,
                    counter,
                    chain_index,
                    "duplicate message"
                );
                ProtocolError::DuplicatedMessage {
                    chain_index,
                    counter,
                }
            });
    }

    let jump = counter - chain_index;
    if jump > Config::global().max_forward_jumps {
        warn!(
            target: "messaging::session",
            remote = %remote_address,
            counter,
            chain_index,
            "message beyond the look-ahead window"
        );
        return Err(ProtocolError::MessageTooFarAhead {
            chain_index,
            counter,
            jump,
        });
    }

    let mut chain_key = chain_key.clone();
    while chain_key.index() < counter {
        state.cache_message_keys(their_ephemeral, chain_key.message_keys()?)?;
        chain_key = chain_key.next_chain_key()?;
    }

    state.set_receiver_chain_key(their_ephemeral, chain_key.next_chain_key()?)?;
    chain_key.message_keys()
}

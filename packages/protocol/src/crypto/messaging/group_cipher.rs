//! Sender-key group messaging.
//!
//! One symmetric chain per `(sender, distribution_id)`; a single ciphertext
//! addresses every group member. Authenticity of a distribution message
//! comes from the pairwise channel that carried it, never from this engine.

use rand::rngs::OsRng;
use rand_core::RngCore;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::crypto::cipher::{aes_256_cbc_decrypt, aes_256_cbc_encrypt};
use crate::crypto::curve::KeyPair;
use crate::error::{ProtocolError, Result};
use crate::protocol::address::ProtocolAddress;
use crate::protocol::messages::{SenderKeyDistributionMessage, SenderKeyMessage};
use crate::state::sender_key::{SenderKeyRecord, SenderKeyState, SenderMessageKeys};
use crate::storage::SenderKeyStore;

/// Describe our current chain for `(sender, distribution_id)`, creating the
/// chain first if this is a fresh state.
///
/// The result must be delivered to group members over their authenticated
/// pairwise sessions before [`group_encrypt`] output can reach them.
pub fn create_sender_key_distribution_message(
    sender: &ProtocolAddress,
    distribution_id: Uuid,
    store: &mut dyn SenderKeyStore,
) -> Result<SenderKeyDistributionMessage> {
    let mut record = store
        .load_sender_key(sender, distribution_id)?
        .unwrap_or_else(SenderKeyRecord::new_empty);

    if record.is_empty() {
        // 31-bit chain ids stay portable across peer implementations.
        let chain_id = OsRng.next_u32() >> 1;
        let mut chain_seed = [0u8; 32];
        OsRng.fill_bytes(&mut chain_seed);
        let signing_key = KeyPair::generate();

        debug!(
            target: "messaging::group",
            %distribution_id,
            chain_id,
            "creating sender key chain"
        );

        record.add_state(SenderKeyState::new(
            chain_id,
            0,
            chain_seed,
            signing_key.public_key,
            Some(signing_key.private_key),
        ));
        store.store_sender_key(sender, distribution_id, &record)?;
    }

    let state = record.state()?;
    let chain_key = state.chain_key();

    SenderKeyDistributionMessage::new(
        distribution_id,
        state.chain_id(),
        chain_key.iteration(),
        *chain_key.seed(),
        *state.signing_key_public(),
    )
}

/// Ingest a distribution message received from `sender` over an
/// authenticated pairwise channel.
pub fn process_sender_key_distribution_message(
    sender: &ProtocolAddress,
    message: &SenderKeyDistributionMessage,
    store: &mut dyn SenderKeyStore,
) -> Result<()> {
    let distribution_id = message.distribution_id();

    debug!(
        target: "messaging::group",
        %sender,
        %distribution_id,
        chain_id = message.chain_id(),
        "processing sender key distribution"
    );

    let mut record = store
        .load_sender_key(sender, distribution_id)?
        .unwrap_or_else(SenderKeyRecord::new_empty);

    record.add_state(SenderKeyState::new(
        message.chain_id(),
        message.iteration(),
        *message.chain_key(),
        *message.signing_key(),
        None,
    ));

    store.store_sender_key(sender, distribution_id, &record)
}

/// Encrypt one group message under our current chain for `distribution_id`.
pub fn group_encrypt(
    sender: &ProtocolAddress,
    distribution_id: Uuid,
    plaintext: &[u8],
    store: &mut dyn SenderKeyStore,
) -> Result<SenderKeyMessage> {
    let mut record = store
        .load_sender_key(sender, distribution_id)?
        .ok_or(ProtocolError::SenderKeyNotFound {
            distribution_id,
            chain_id: None,
        })?;

    let message = {
        let state = record.state_mut()?;
        let message_keys = state.chain_key().message_keys()?;

        let ciphertext =
            aes_256_cbc_encrypt(plaintext, message_keys.cipher_key(), message_keys.iv())?;

        let signing_key = state
            .signing_key_private()
            .ok_or(ProtocolError::InvalidSessionState(
                "sender key state without signing private key",
            ))?
            .clone();

        let message = SenderKeyMessage::new(
            distribution_id,
            state.chain_id(),
            message_keys.iteration(),
            &ciphertext,
            &signing_key,
        )?;

        let next_chain = state.chain_key().next()?;
        state.set_chain_key(next_chain);
        message
    };

    store.store_sender_key(sender, distribution_id, &record)?;
    Ok(message)
}

/// Decrypt a group message from `sender`.
///
/// The record is persisted only after the whole operation succeeds; a failed
/// decrypt does not advance the chain.
pub fn group_decrypt(
    message_bytes: &[u8],
    sender: &ProtocolAddress,
    store: &mut dyn SenderKeyStore,
) -> Result<Vec<u8>> {
    let message = SenderKeyMessage::try_from(message_bytes)?;
    let distribution_id = message.distribution_id();

    let mut record = store
        .load_sender_key(sender, distribution_id)?
        .ok_or(ProtocolError::SenderKeyNotFound {
            distribution_id,
            chain_id: None,
        })?;

    let plaintext = {
        let state = record.state_for_chain_id(message.chain_id()).ok_or(
            ProtocolError::SenderKeyNotFound {
                distribution_id,
                chain_id: Some(message.chain_id()),
            },
        )?;

        if !message.verify_signature(state.signing_key_public()) {
            warn!(
                target: "messaging::group",
                %sender,
                %distribution_id,
                chain_id = message.chain_id(),
                "sender key message signature rejected"
            );
            return Err(ProtocolError::InvalidSignature("sender key message"));
        }

        let message_keys = get_sender_message_keys(state, message.iteration())?;
        aes_256_cbc_decrypt(
            message.ciphertext(),
            message_keys.cipher_key(),
            message_keys.iv(),
        )?
    };

    store.store_sender_key(sender, distribution_id, &record)?;
    Ok(plaintext)
}

/// Advance the chain (caching skipped keys, bounded) or consume a cached key.
fn get_sender_message_keys(
    state: &mut SenderKeyState,
    iteration: u32,
) -> Result<SenderMessageKeys> {
    let chain_key = state.chain_key().clone();
    let chain_iteration = chain_key.iteration();

    if chain_iteration > iteration {
        return state
            .take_message_keys(iteration)
            .ok_or(ProtocolError::DuplicatedMessage {
                chain_index: chain_iteration,
                counter: iteration,
            });
    }

    let jump = iteration - chain_iteration;
    if jump > Config::global().max_forward_jumps {
        return Err(ProtocolError::MessageTooFarAhead {
            chain_index: chain_iteration,
            counter: iteration,
            jump,
        });
    }

    let mut chain_key = chain_key;
    while chain_key.iteration() < iteration {
        state.cache_message_keys(chain_key.message_keys()?);
        chain_key = chain_key.next()?;
    }

    state.set_chain_key(chain_key.next()?);
    chain_key.message_keys()
}

//! PQXDH (Post-Quantum Extended Triple Diffie-Hellman)
//!
//! Установка ключей сессии из опубликованного pre-key bundle.
//!
//! ## Протокол
//!
//! ```text
//! Alice (инициатор)                                    Bob (получатель)
//! =====                                                ===
//!
//! 1. Получает bundle (IK_B, SPK_B + Sig, OTP_B?, KPK_B + Sig)
//! 2. Проверяет обе подписи под IK_B
//! 3. Генерирует base key BK_A, вычисляет:
//!    DH1 = DH(IK_A, SPK_B)
//!    DH2 = DH(BK_A, IK_B)
//!    DH3 = DH(BK_A, SPK_B)
//!    DH4 = DH(BK_A, OTP_B)        (если OTP есть в bundle)
//!    (CT, SS) = KEM-Encaps(KPK_B)
//!    SK = KDF(F || DH1 || DH2 || DH3 [|| DH4] || SS)
//!
//! 4. Первое сообщение несёт (BK_A_pub, IK_A_pub, id-шники, CT) →
//!
//!                                  1. Загружает SPK/OTP/KPK по id
//!                                  2. Зеркальные DH + KEM-Decaps(CT)
//!                                  3. Тот же SK
//! ```
//!
//! Diffie-Hellman коммутативен, поэтому обе стороны получают одинаковый
//! корневой ключ; KEM-компонента добавляет пост-квантовую защиту.

use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::crypto::curve::KeyPair;
use crate::crypto::keys::PreKeyBundle;
use crate::crypto::ratchet::{derive_initial_session_keys, DISCONTINUITY_BYTES};
use crate::error::{ProtocolError, Result};
use crate::protocol::address::ProtocolAddress;
use crate::protocol::messages::PreKeySignalMessage;
use crate::state::session::{PendingPreKey, PqRatchetState, SessionRecord, SessionState};
use crate::storage::{
    Direction, IdentityKeyStore, KyberPreKeyStore, PreKeyStore, SessionStore, SignedPreKeyStore,
};

/// Store entries consumed by an inbound handshake; the caller removes the
/// one-time pre-key and marks the Kyber pre-key used *after* the session is
/// saved.
#[derive(Debug, Clone, Copy)]
pub struct UsedPreKeys {
    pub pre_key_id: Option<u32>,
    pub kyber_pre_key_id: Option<u32>,
}

/// Initiator side: process a published bundle and install a fresh session.
///
/// Nothing is written before the bundle signatures and the trust decision
/// pass; an untrusted identity leaves session and identity stores unchanged.
pub fn process_pre_key_bundle(
    remote_address: &ProtocolAddress,
    bundle: &PreKeyBundle,
    now_ms: u64,
    session_store: &mut dyn SessionStore,
    identity_store: &mut dyn IdentityKeyStore,
) -> Result<()> {
    let their_identity = bundle.identity_key();

    debug!(
        target: "handshake::pqxdh",
        remote = %remote_address,
        session_version = bundle.session_version(),
        "processing pre-key bundle"
    );

    if !their_identity.public_key().verify_signature(
        &bundle.signed_pre_key_public().serialize(),
        bundle.signed_pre_key_signature(),
    ) {
        return Err(ProtocolError::InvalidSignature("signed pre-key"));
    }

    if let Some(kyber) = bundle.kyber_pre_key() {
        if !their_identity
            .public_key()
            .verify_signature(&kyber.public_key.serialize(), &kyber.signature)
        {
            return Err(ProtocolError::InvalidSignature("Kyber pre-key"));
        }
    }

    if !identity_store.is_trusted_identity(remote_address, their_identity, Direction::Sending)? {
        warn!(target: "handshake::pqxdh", remote = %remote_address, "untrusted identity in bundle");
        return Err(ProtocolError::UntrustedIdentity(remote_address.clone()));
    }

    let our_identity = identity_store.get_identity_key_pair()?;
    let base_key = KeyPair::generate();

    let mut secrets = Zeroizing::new(Vec::with_capacity(32 * 5 + 32));
    secrets.extend_from_slice(&DISCONTINUITY_BYTES);
    secrets.extend_from_slice(
        &*our_identity
            .private_key()
            .diffie_hellman(bundle.signed_pre_key_public()),
    );
    secrets.extend_from_slice(
        &*base_key
            .private_key
            .diffie_hellman(their_identity.public_key()),
    );
    secrets.extend_from_slice(
        &*base_key
            .private_key
            .diffie_hellman(bundle.signed_pre_key_public()),
    );
    if let Some(one_time_pre_key) = bundle.pre_key_public() {
        secrets.extend_from_slice(&*base_key.private_key.diffie_hellman(one_time_pre_key));
    }

    let mut kyber_shared = None;
    let mut pending_kyber = None;
    if let Some(kyber) = bundle.kyber_pre_key() {
        let (shared, kyber_ciphertext) = kyber.public_key.encapsulate()?;
        secrets.extend_from_slice(&*shared);
        pending_kyber = Some((kyber.id, kyber_ciphertext));
        kyber_shared = Some(shared);
    }

    let session_version = bundle.session_version();
    let (root_key, chain_key) = derive_initial_session_keys(&secrets, kyber_shared.is_some())?;

    // Our first ratchet key; the bundle's signed pre-key is the remote half.
    let sending_ratchet = KeyPair::generate();
    let (sending_root, sending_chain) =
        root_key.create_chain(bundle.signed_pre_key_public(), &sending_ratchet.private_key)?;

    let mut state = SessionState::new(
        session_version,
        *our_identity.identity_key(),
        *their_identity,
        sending_root,
        identity_store.get_local_registration_id()?,
        now_ms,
    );
    state.add_receiver_chain(*bundle.signed_pre_key_public(), chain_key);
    state.set_sender_chain(sending_ratchet, sending_chain);
    state.set_remote_registration_id(bundle.registration_id());
    state.set_alice_base_key(&base_key.public_key.serialize());
    if let Some(shared) = kyber_shared {
        state.set_pq_ratchet_state(PqRatchetState::new(shared.to_vec()));
    }
    state.set_pending_pre_key(PendingPreKey {
        pre_key_id: bundle.pre_key_id(),
        signed_pre_key_id: bundle.signed_pre_key_id(),
        kyber_pre_key_id: pending_kyber.as_ref().map(|(id, _)| *id),
        kyber_ciphertext: pending_kyber.map(|(_, ciphertext)| ciphertext),
        base_key: base_key.public_key,
    });

    let mut record = session_store
        .load_session(remote_address)?
        .unwrap_or_else(SessionRecord::new_fresh);
    record.promote_state(state);

    session_store.store_session(remote_address, &record)?;
    identity_store.save_identity(remote_address, their_identity)?;

    debug!(target: "handshake::pqxdh", remote = %remote_address, "session installed");
    Ok(())
}

/// Responder side: derive the mirrored session from an inbound
/// [`PreKeySignalMessage`] and install it into `record`.
///
/// Returns the consumed store entries, or `None` when the message replays a
/// base key this record already has a state for. The caller persists the
/// record and only then touches the pre-key stores.
pub fn process_prekey(
    message: &PreKeySignalMessage,
    remote_address: &ProtocolAddress,
    record: &mut SessionRecord,
    identity_store: &mut dyn IdentityKeyStore,
    pre_key_store: &mut dyn PreKeyStore,
    signed_pre_key_store: &dyn SignedPreKeyStore,
    kyber_pre_key_store: &mut dyn KyberPreKeyStore,
    now_ms: u64,
) -> Result<Option<UsedPreKeys>> {
    let their_identity = message.identity_key();

    if !identity_store.is_trusted_identity(remote_address, their_identity, Direction::Receiving)? {
        warn!(target: "handshake::pqxdh", remote = %remote_address, "untrusted identity in handshake message");
        return Err(ProtocolError::UntrustedIdentity(remote_address.clone()));
    }

    let base_key_bytes = message.base_key().serialize();
    if record.has_session_state(message.message_version(), &base_key_bytes) {
        debug!(
            target: "handshake::pqxdh",
            remote = %remote_address,
            "handshake message for an already-built session"
        );
        return Ok(None);
    }

    let our_identity = identity_store.get_identity_key_pair()?;

    let signed_pre_key = signed_pre_key_store
        .get_signed_pre_key(message.signed_pre_key_id())?
        .ok_or(ProtocolError::SignedPreKeyNotFound(
            message.signed_pre_key_id(),
        ))?;

    let one_time_pre_key = match message.pre_key_id() {
        Some(id) => Some(
            pre_key_store
                .get_pre_key(id)?
                .ok_or(ProtocolError::PreKeyNotFound(id))?,
        ),
        None => None,
    };

    // Strict pairing of the Kyber fields is already enforced at parse time.
    let kyber_pre_key = match message.kyber_pre_key_id() {
        Some(id) => Some(
            kyber_pre_key_store
                .get_kyber_pre_key(id)?
                .ok_or(ProtocolError::KyberPreKeyNotFound(id))?,
        ),
        None => None,
    };

    let mut secrets = Zeroizing::new(Vec::with_capacity(32 * 5 + 32));
    secrets.extend_from_slice(&DISCONTINUITY_BYTES);
    secrets.extend_from_slice(
        &*signed_pre_key
            .key_pair()
            .private_key
            .diffie_hellman(their_identity.public_key()),
    );
    secrets.extend_from_slice(
        &*our_identity
            .private_key()
            .diffie_hellman(message.base_key()),
    );
    secrets.extend_from_slice(
        &*signed_pre_key
            .key_pair()
            .private_key
            .diffie_hellman(message.base_key()),
    );
    if let Some(one_time) = &one_time_pre_key {
        secrets.extend_from_slice(
            &*one_time
                .key_pair()
                .private_key
                .diffie_hellman(message.base_key()),
        );
    }

    let mut kyber_shared = None;
    if let Some(kyber_record) = &kyber_pre_key {
        let ciphertext = message
            .kyber_ciphertext()
            .ok_or(ProtocolError::InvalidMessage("missing Kyber ciphertext"))?;
        let shared = kyber_record.key_pair().secret_key.decapsulate(ciphertext)?;
        secrets.extend_from_slice(&*shared);
        kyber_shared = Some(shared);
    }

    let (root_key, chain_key) = derive_initial_session_keys(&secrets, kyber_shared.is_some())?;

    let mut state = SessionState::new(
        message.message_version(),
        *our_identity.identity_key(),
        *their_identity,
        root_key,
        identity_store.get_local_registration_id()?,
        now_ms,
    );
    // Our signed pre-key doubles as the first ratchet key; the initiator's
    // first message triggers the DH ratchet step against it.
    state.set_sender_chain(signed_pre_key.key_pair().clone(), chain_key);
    state.set_remote_registration_id(message.registration_id());
    state.set_alice_base_key(&base_key_bytes);
    if let Some(shared) = kyber_shared {
        state.set_pq_ratchet_state(PqRatchetState::new(shared.to_vec()));
    }

    record.promote_state(state);

    debug!(target: "handshake::pqxdh", remote = %remote_address, "responder session installed");
    Ok(Some(UsedPreKeys {
        pre_key_id: message.pre_key_id(),
        kyber_pre_key_id: message.kyber_pre_key_id(),
    }))
}

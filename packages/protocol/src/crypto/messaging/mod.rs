//! Message encryption engines: pairwise Double Ratchet and sender-key groups.

pub mod group_cipher;
pub mod session_cipher;

pub use group_cipher::{
    create_sender_key_distribution_message, group_decrypt, group_encrypt,
    process_sender_key_distribution_message,
};
pub use session_cipher::{
    message_decrypt, message_decrypt_prekey, message_decrypt_signal, message_encrypt,
    remote_registration_id, session_version,
};

//! Session establishment.

pub mod pqxdh;

pub use pqxdh::{process_pre_key_bundle, process_prekey, UsedPreKeys};

//! Durable protocol state: pairwise session records and sender-key records.

pub mod sender_key;
pub mod session;

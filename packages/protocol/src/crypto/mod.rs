//! Cryptographic layers, leaves first: primitives, key objects, then the
//! three engines (pairwise sessions, sender-key groups, sealed sender).
//!
//! Primitive initialization is purely data-driven; there is no process-wide
//! setup to perform and all entry points are safe to call repeatedly.

pub mod cipher;
pub mod curve;
pub mod handshake;
pub mod kem;
pub mod keys;
pub mod messaging;
pub mod ratchet;
pub mod sealed_sender;

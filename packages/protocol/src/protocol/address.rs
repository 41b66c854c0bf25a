//! Protocol addresses: a specific device of a principal.

use serde::{Deserialize, Serialize};

/// `(name, device_id)` pair identifying one device. Equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProtocolAddress {
    name: String,
    device_id: u32,
}

impl ProtocolAddress {
    pub fn new(name: impl Into<String>, device_id: u32) -> Self {
        Self {
            name: name.into(),
            device_id,
        }
    }

    /// Principal identifier, typically a UUID string.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }
}

impl std::fmt::Display for ProtocolAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.name, self.device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_structural() {
        let a = ProtocolAddress::new("alice", 1);
        let b = ProtocolAddress::new("alice", 1);
        let c = ProtocolAddress::new("alice", 2);
        let d = ProtocolAddress::new("bob", 1);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn display_includes_device() {
        let addr = ProtocolAddress::new("alice", 3);
        assert_eq!(addr.to_string(), "alice.3");
    }
}

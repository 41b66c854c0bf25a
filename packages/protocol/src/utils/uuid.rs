// UUID утилиты для distribution id

use uuid::Uuid;

use crate::error::{ProtocolError, Result};

/// Parse a canonical 8-4-4-4-12 string into a distribution id.
pub fn distribution_id_from_str(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|_| {
        ProtocolError::InvalidArgument(format!("not a canonical UUID string: {value}"))
    })
}

/// Canonical 8-4-4-4-12 form of a distribution id.
pub fn distribution_id_to_string(distribution_id: Uuid) -> String {
    distribution_id.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_string_roundtrip() {
        let text = "550e8400-e29b-41d4-a716-446655440000";
        let id = distribution_id_from_str(text).unwrap();
        assert_eq!(id.as_bytes().len(), 16);
        assert_eq!(distribution_id_to_string(id), text);
    }

    #[test]
    fn malformed_strings_are_rejected() {
        assert!(distribution_id_from_str("").is_err());
        assert!(distribution_id_from_str("not-a-uuid").is_err());
        assert!(distribution_id_from_str("550e8400e29b41d4a716446655440000ff").is_err());
    }
}

//! Shared helper functions for PostgreSQL row conversion.

use harbor_core::error::{StorageError, StorageResult};

/// Convert a `Vec<u8>` to a fixed-size 32-byte array.
///
/// Returns an error if the length doesn't match.
pub fn bytes_to_hash32(bytes: Vec<u8>, field_name: &str) -> StorageResult<[u8; 32]> {
    let len = bytes.len();
    bytes.try_into().map_err(|_| {
        StorageError::SerializationError(format!(
            "{} has invalid length: expected 32, got {}",
            field_name, len
        ))
    })
}

/// Convert a `Vec<u8>` to a fixed-size 20-byte address.
pub fn bytes_to_addr20(bytes: Vec<u8>, field_name: &str) -> StorageResult<[u8; 20]> {
    let len = bytes.len();
    bytes.try_into().map_err(|_| {
        StorageError::SerializationError(format!(
            "{} has invalid length: expected 20, got {}",
            field_name, len
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test critique: erreurs incluent le nom du champ pour debug
    #[test]
    fn test_error_includes_field_name() {
        let bad_bytes = vec![1u8; 16];
        let err = bytes_to_hash32(bad_bytes, "block.hash").unwrap_err().to_string();
        assert!(err.contains("block.hash"));
        assert!(err.contains("expected 32"));

        let bad_addr = vec![1u8; 32];
        let err = bytes_to_addr20(bad_addr, "account.address").unwrap_err().to_string();
        assert!(err.contains("account.address"));
        assert!(err.contains("expected 20"));
    }
}

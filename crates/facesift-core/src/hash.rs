//! Content hashing for the two dedup keys.

use sha2::{Digest, Sha256};

/// Hex SHA-256 digest of a byte payload.
///
/// Identity key for ingested images (raw file bytes). Deterministic and
/// side-effect free; an empty payload is a caller bug, not a runtime
/// condition.
pub fn hash_bytes(data: &[u8]) -> String {
    debug_assert!(!data.is_empty(), "hashing an empty payload");
    hex::encode(Sha256::digest(data))
}

/// Digest of an embedding's little-endian byte representation.
///
/// Dedup key for faces: two bit-identical vectors hash identically no
/// matter which image they came from.
pub fn hash_vector(vector: &[f32]) -> String {
    debug_assert!(!vector.is_empty(), "hashing an empty vector");
    let mut hasher = Sha256::new();
    for value in vector {
        hasher.update(value.to_le_bytes());
    }
    hex::encode(hasher.finalize())
}

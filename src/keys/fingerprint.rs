use sha2::{Digest, Sha256};

use super::PublicKey;

/// Lowercase hex SHA-256 of the raw public key bytes.
pub fn fingerprint(public_key: &PublicKey) -> String {
    Sha256::digest(public_key.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// First 8 hex characters of the fingerprint, for display.
pub fn short_fingerprint(public_key: &PublicKey) -> String {
    fingerprint(public_key)[..8].to_string()
}

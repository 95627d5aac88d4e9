//! Network-identity hashing
//!
//! The core never stores raw addresses. Hosts hash the voter's network
//! address with a per-installation salt and hand the digest to `mark_seen`;
//! the same-network policy rule only ever compares digests.

use sha2::{Digest, Sha256};

/// Salted SHA-256 of a network address, hex encoded.
pub fn network_identity_hash(address: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(address.as_bytes());
    hasher.update(b"|");
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

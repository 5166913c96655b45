pub mod builtin;

use sha2::{Digest, Sha256};

/// Display-safe identifier for key material: first 12 hex chars of its SHA-256.
pub fn fingerprint(key_material: &str) -> String {
    let digest = Sha256::digest(key_material.as_bytes());
    hex::encode(digest)[..12].to_string()
}

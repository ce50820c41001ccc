/*!
# cred-common

Shared error taxonomy, canonical JSON, PII-safe logging, and config types used
by every crate in the credential platform.

## Architectural Tenets
- Stable string reason codes (§7 of the spec this crate implements), never
  free-form error text, cross a component boundary.
- Dependency failures are distinguishable from validation failures.
- Nothing here ever touches a raw claims body or session payload.
*/

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Kind, PlatformError, ReasonCode, Result};

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Serializes a value to canonical JSON: UTF-8, no insignificant whitespace,
/// stable key order as produced by `serde_json`'s default map (the caller is
/// responsible for using `BTreeMap`/sorted fields where order must be exact).
pub fn canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| PlatformError::system(format!("canonical_json: {e}")))
}

/// SHA-256 of arbitrary bytes, returned as lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// SHA-256 of arbitrary bytes, returned raw.
pub fn sha256_bytes(bytes: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_is_stable_and_well_formed() {
        let h1 = sha256_hex(b"abc");
        let h2 = sha256_hex(b"abc");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(h1, sha256_hex(b"abd"));
    }

    #[test]
    fn canonical_json_roundtrips() {
        let v = serde_json::json!({"a": 1, "b": "two"});
        let bytes = canonical_json(&v).unwrap();
        let back: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, v);
    }
}

//! Run fingerprinting: deterministic identification of a run configuration.
//!
//! The fingerprint is BLAKE3 over the canonical JSON of the [`Config`].
//! Struct fields serialise in declaration order and custom settings live in
//! a `BTreeMap`, so the same config always hashes to the same value. The
//! fingerprint seeds the per-run slippage RNG.

use crate::config::Config;
use crate::domain::ConfigFingerprint;

impl Config {
    /// Canonical JSON encoding used for hashing.
    pub fn canonical_json(&self) -> Vec<u8> {
        // Config holds only string-keyed maps, so serialisation cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn fingerprint(&self) -> ConfigFingerprint {
        ConfigFingerprint::from_bytes(&self.canonical_json())
    }
}

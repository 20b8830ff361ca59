//! Content-addressed cache key derivation
//!
//! Maps an arbitrary logical cache key (usually the path being cached) to a
//! fixed-width, filesystem-safe subdirectory of the cache root. Same key =
//! same subdirectory.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Hex-encoded SHA256 digest of a cache key
///
/// Hashes the raw UTF-8 bytes of the key. No path normalization is applied,
/// so `a/b` and `a\b` are distinct keys on every platform.
pub fn cache_key_digest(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Resolve the store subdirectory for a cache key
///
/// Pure function of `key`; the returned directory may not exist yet.
pub fn derive_cache_path(cache_root: &Path, key: &str) -> PathBuf {
    cache_root.join(cache_key_digest(key))
}

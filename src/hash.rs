// src/hash.rs
//! Content hash identifier.
//!
//! Grounded on the teacher's `filesystem/cas.rs` hash-to-path convention,
//! generalized to an opaque key type rather than a fixed SHA-256 computation:
//! this cache takes the hash as given (Non-goal: no content verification).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// An opaque, case-insensitive content hash, normalized to upper-case hex.
#[derive(Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Hash(String);

impl Hash {
    /// Normalizes `raw` to upper-case and validates it is non-empty hex.
    pub fn new(raw: impl AsRef<str>) -> Result<Self> {
        let raw = raw.as_ref();
        if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidHash(raw.to_string()));
        }
        Ok(Self(raw.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The leading shard prefix used by [`crate::path_mapper::PathMapper`].
    pub fn shard(&self) -> &str {
        let end = self.0.len().min(2);
        &self.0[..end]
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_to_uppercase() {
        let a = Hash::new("aabb").unwrap();
        let b = Hash::new("AABB").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "AABB");
    }

    #[test]
    fn rejects_empty_and_non_hex() {
        assert!(Hash::new("").is_err());
        assert!(Hash::new("zzzz").is_err());
        assert!(Hash::new("not-hex!").is_err());
    }

    #[test]
    fn shard_is_leading_two_chars() {
        let h = Hash::new("abcdef").unwrap();
        assert_eq!(h.shard(), "AB");
    }

    #[test]
    fn shard_handles_short_hash() {
        let h = Hash::new("a").unwrap();
        assert_eq!(h.shard(), "A");
    }
}

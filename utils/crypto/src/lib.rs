//! Content-hashing helpers for Concord's vault and listing dedup paths.
//!
//! Kept deliberately small: the engine only ever needs a stable, hex-encoded
//! SHA-256 digest of uploaded bytes, both to address vault entries and to
//! enforce the `(content_hash, status = Active)` uniqueness invariant on
//! listings.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 digest of `data`.
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex_encode(&hasher.finalize())
}

/// Splits a hex content hash into the two-level shard prefix used for the
/// vault's on-disk layout: `<vault>/aa/bb/<hash>`.
pub fn shard_prefix(hash: &str) -> Option<(&str, &str)> {
    if hash.len() < 4 {
        return None;
    }
    Some((&hash[0..2], &hash[2..4]))
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable() {
        let a = content_hash(b"hello world");
        let b = content_hash(b"hello world");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn hash_distinguishes_content() {
        assert_ne!(content_hash(b"a"), content_hash(b"b"));
    }

    #[test]
    fn shard_prefix_splits_first_four_chars() {
        let hash = content_hash(b"shard me");
        let (a, b) = shard_prefix(&hash).unwrap();
        assert_eq!(format!("{}{}", a, b), &hash[0..4]);
    }

    #[test]
    fn shard_prefix_rejects_short_input() {
        assert!(shard_prefix("ab").is_none());
    }
}

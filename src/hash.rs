//! Cryptographic primitives shared by the transactional log, the appendable
//! hash tree, and the index: a single SHA-256 hash function `H`, the
//! per-entry hash `H(key ‖ H(value))`, and the Merkle root over a tx's
//! entries (`eH`, §3).

use sha2::{Digest, Sha256};

pub const DIGEST_LEN: usize = 32;
pub type Digest32 = [u8; DIGEST_LEN];

pub const ZERO_DIGEST: Digest32 = [0u8; DIGEST_LEN];

/// `H(data)`.
pub fn sum(data: &[u8]) -> Digest32 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let out = hasher.finalize();
    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&out);
    digest
}

/// `H(a ‖ b)`.
pub fn sum2(a: &[u8], b: &[u8]) -> Digest32 {
    let mut hasher = Sha256::new();
    hasher.update(a);
    hasher.update(b);
    let out = hasher.finalize();
    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&out);
    digest
}

/// `H(key ‖ H(value))`, the per-entry hash used to build `eH`.
pub fn entry_digest(key: &[u8], value: &[u8]) -> Digest32 {
    let vh = sum(value);
    sum2(key, &vh)
}

/// Merkle root over per-entry digests, built bottom-up by pairwise hashing,
/// duplicating the last node on odd levels. A single entry's digest is its
/// own root; an empty entry list roots to the all-zero digest (never
/// observed in practice since a tx always has `n >= 1` entries).
pub fn merkle_root(mut level: Vec<Digest32>) -> Digest32 {
    if level.is_empty() {
        return ZERO_DIGEST;
    }
    while level.len() > 1 {
        let mut next = Vec::with_capacity((level.len() + 1) / 2);
        let mut it = level.chunks(2);
        while let Some(pair) = it.next() {
            let h = match pair {
                [a, b] => sum2(a, b),
                [a] => sum2(a, a),
                _ => unreachable!(),
            };
            next.push(h);
        }
        level = next;
    }
    level[0]
}

#[cfg(test)]
mod hash_test {
    use super::*;

    #[test]
    fn test_sum_deterministic() {
        assert_eq!(sum(b"hello"), sum(b"hello"));
        assert_ne!(sum(b"hello"), sum(b"world"));
    }

    #[test]
    fn test_merkle_root_single() {
        let d = sum(b"only");
        assert_eq!(merkle_root(vec![d]), d);
    }

    #[test]
    fn test_merkle_root_order_matters() {
        let a = sum(b"a");
        let b = sum(b"b");
        assert_ne!(merkle_root(vec![a, b]), merkle_root(vec![b, a]));
    }
}

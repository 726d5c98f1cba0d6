//! Hashing utilities for block production
//!
//! Hashes are stored as the raw bytes produced by SHA-256d. When a hash is
//! compared against a target it is read as a little-endian 256-bit integer,
//! the convention used by bitcoin-derived chains.

use primitive_types::{H256, U256};
use sha2::{Digest, Sha256};

/// Compute SHA-256 hash of data
#[inline]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Compute double SHA-256 hash
#[inline]
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    let first_hash = sha256(data);
    sha256(&first_hash)
}

/// Double SHA-256 as an `H256`
#[inline]
pub fn hash256(data: &[u8]) -> H256 {
    H256::from(sha256d(data))
}

/// Read a hash as a little-endian integer for target comparison
#[inline]
pub fn hash_to_u256(hash: &H256) -> U256 {
    U256::from_little_endian(hash.as_bytes())
}

/// Check if hash meets the target (hash <= target)
#[inline]
pub fn meets_target(hash: &H256, target: &U256) -> bool {
    hash_to_u256(hash) <= *target
}

/// Bitcoin-style merkle root: pairs are concatenated and hashed with
/// SHA-256d, an odd last element is paired with itself.
pub fn merkle_root(leaves: &[H256]) -> H256 {
    if leaves.is_empty() {
        return H256::zero();
    }

    let mut level: Vec<H256> = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);
            let mut buf = [0u8; 64];
            buf[..32].copy_from_slice(left.as_bytes());
            buf[32..].copy_from_slice(right.as_bytes());
            next.push(hash256(&buf));
        }
        level = next;
    }
    level[0]
}

/// Reverse-byte hex, the way block and transaction ids are usually displayed
pub fn display_hash(hash: &H256) -> String {
    let mut bytes = hash.to_fixed_bytes();
    bytes.reverse();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256d_double_hash() {
        let data = b"test";
        let hash1 = sha256(data);
        let hash2 = sha256(&hash1);
        assert_eq!(hash2, sha256d(data));
    }

    #[test]
    fn test_meets_target() {
        let zero = H256::zero();
        assert!(meets_target(&zero, &U256::zero()));

        let max = H256::repeat_byte(0xff);
        assert!(meets_target(&max, &U256::MAX));
        assert!(!meets_target(&max, &U256::from(1)));
    }

    #[test]
    fn test_hash_is_little_endian_integer() {
        let mut bytes = [0u8; 32];
        bytes[0] = 1;
        assert_eq!(hash_to_u256(&H256::from(bytes)), U256::from(1));
    }

    #[test]
    fn test_merkle_root_single_leaf_is_leaf() {
        let leaf = hash256(b"coinbase");
        assert_eq!(merkle_root(&[leaf]), leaf);
    }

    #[test]
    fn test_merkle_root_odd_count_duplicates_last() {
        let a = hash256(b"a");
        let b = hash256(b"b");
        let c = hash256(b"c");
        assert_eq!(merkle_root(&[a, b, c]), merkle_root(&[a, b, c, c]));
        assert_ne!(merkle_root(&[a, b]), merkle_root(&[b, a]));
    }

    #[test]
    fn test_display_hash_reverses_bytes() {
        let mut bytes = [0u8; 32];
        bytes[31] = 0xab;
        assert!(display_hash(&H256::from(bytes)).starts_with("ab"));
    }
}

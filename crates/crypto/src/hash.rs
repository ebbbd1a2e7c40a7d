//! Keccak256 digest helpers.

use sha3::{Digest, Keccak256};

/// Computes the Keccak256 digest of `data`.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Computes the Keccak256 digest of the concatenation of `parts`.
///
/// More efficient than concatenating the slices first.
pub fn keccak256_concat(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        // Keccak256("") = c5d2...a470
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_concat_matches_single() {
        assert_eq!(
            keccak256_concat(&[b"ab", b"cd"]),
            keccak256(b"abcd")
        );
    }
}

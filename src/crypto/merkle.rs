//! Merkle root computation over transaction hashes.

use crate::crypto::hash::double_sha256;
use crate::util::UInt256;

/// Computes the merkle root of the given leaf hashes.
///
/// Pairs are combined with double SHA-256; an odd node at any level is
/// paired with itself. Returns `None` for an empty leaf set.
pub fn merkle_root(leaves: &[UInt256]) -> Option<UInt256> {
    if leaves.is_empty() {
        return None;
    }
    let mut level: Vec<UInt256> = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = pair[0];
            let right = if pair.len() == 2 { pair[1] } else { pair[0] };
            let mut buf = [0u8; 64];
            buf[..32].copy_from_slice(&left.0);
            buf[32..].copy_from_slice(&right.0);
            next.push(double_sha256(&buf));
        }
        level = next;
    }
    Some(level[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::sha256;

    #[test]
    fn single_leaf_is_its_own_root() {
        let leaf = sha256(b"only");
        assert_eq!(merkle_root(&[leaf]), Some(leaf));
    }

    #[test]
    fn empty_has_no_root() {
        assert_eq!(merkle_root(&[]), None);
    }

    #[test]
    fn odd_leaf_pairs_with_itself() {
        let a = sha256(b"a");
        let b = sha256(b"b");
        let c = sha256(b"c");

        let combine = |l: &UInt256, r: &UInt256| {
            let mut buf = [0u8; 64];
            buf[..32].copy_from_slice(&l.0);
            buf[32..].copy_from_slice(&r.0);
            double_sha256(&buf)
        };
        let ab = combine(&a, &b);
        let cc = combine(&c, &c);
        assert_eq!(merkle_root(&[a, b, c]), Some(combine(&ab, &cc)));
    }

    #[test]
    fn order_matters() {
        let a = sha256(b"a");
        let b = sha256(b"b");
        assert_ne!(merkle_root(&[a, b]), merkle_root(&[b, a]));
    }
}

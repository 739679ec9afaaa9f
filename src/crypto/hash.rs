//! Hash functions used across the wire format, the ledger and the VM.

use ripemd::Ripemd160;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::util::{UInt160, UInt256};

/// Single SHA-256.
pub fn sha256(data: &[u8]) -> UInt256 {
    let digest = Sha256::digest(data);
    UInt256::from_slice(&digest).expect("sha256 digest is 32 bytes")
}

/// SHA-256 applied twice; the content hash for blocks and transactions.
pub fn double_sha256(data: &[u8]) -> UInt256 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    UInt256::from_slice(&second).expect("sha256 digest is 32 bytes")
}

/// RIPEMD-160 over SHA-256; the script-hash function.
pub fn hash160(data: &[u8]) -> UInt160 {
    let sha = Sha256::digest(data);
    let digest = Ripemd160::digest(sha);
    UInt160::from_slice(&digest).expect("ripemd160 digest is 20 bytes")
}

/// SHA-1, kept only for the VM opcode of the same name.
pub fn sha1(data: &[u8]) -> [u8; 20] {
    let digest = Sha1::digest(data);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    out
}

/// First four bytes of the double SHA-256, used as the frame checksum.
pub fn checksum(data: &[u8]) -> u32 {
    let digest = double_sha256(data);
    u32::from_le_bytes([digest.0[0], digest.0[1], digest.0[2], digest.0[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digests_match_primitives() {
        let single = Sha256::digest(b"hello");
        assert_eq!(sha256(b"hello").0, single.as_slice());
        assert_eq!(double_sha256(b"hello").0, Sha256::digest(single).as_slice());

        let ripemd = Ripemd160::digest(Sha256::digest(b"hello"));
        assert_eq!(hash160(b"hello").0, ripemd.as_slice());
    }

    #[test]
    fn display_reverses_digest_bytes() {
        // sha256("hello") starts with 0x2c; the presentation form ends with it.
        let h = sha256(b"hello");
        assert_eq!(h.0[0], 0x2c);
        assert!(h.to_string().ends_with("2c"));
    }

    #[test]
    fn checksum_is_double_sha_prefix() {
        let digest = double_sha256(b"payload");
        let expected = u32::from_le_bytes([digest.0[0], digest.0[1], digest.0[2], digest.0[3]]);
        assert_eq!(checksum(b"payload"), expected);
    }
}

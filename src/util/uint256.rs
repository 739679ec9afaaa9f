//! 32-byte content hash used for blocks, transactions and assets.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::io::{BinReader, BinWriter, Decodable, Encodable, IoResult};

/// Size of a [`UInt256`] in bytes.
pub const UINT256_SIZE: usize = 32;

/// A 256-bit identifier stored in little-endian byte order.
///
/// The user-visible hex form (JSON, logs) is byte-reversed, which is what
/// [`fmt::Display`] and [`FromStr`] operate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct UInt256(pub [u8; UINT256_SIZE]);

impl UInt256 {
    /// The all-zero hash.
    pub fn zero() -> Self {
        UInt256::default()
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Creates a hash from a slice; fails on any other length.
    pub fn from_slice(data: &[u8]) -> Option<Self> {
        if data.len() != UINT256_SIZE {
            return None;
        }
        let mut buf = [0u8; UINT256_SIZE];
        buf.copy_from_slice(data);
        Some(UInt256(buf))
    }

    /// Canonical little-endian bytes.
    pub fn bytes(&self) -> [u8; UINT256_SIZE] {
        self.0
    }

    /// Bytes in the reversed, user-visible order.
    pub fn bytes_reversed(&self) -> [u8; UINT256_SIZE] {
        let mut buf = self.0;
        buf.reverse();
        buf
    }
}

impl fmt::Display for UInt256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.bytes_reversed()))
    }
}

impl FromStr for UInt256 {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let mut buf = [0u8; UINT256_SIZE];
        hex::decode_to_slice(s, &mut buf)?;
        buf.reverse();
        Ok(UInt256(buf))
    }
}

impl Encodable for UInt256 {
    fn encode_binary(&self, w: &mut BinWriter) -> IoResult<()> {
        w.write_bytes(&self.0)
    }
}

impl Decodable for UInt256 {
    fn decode_binary(r: &mut BinReader<'_>) -> IoResult<Self> {
        let mut buf = [0u8; UINT256_SIZE];
        r.read_into(&mut buf)?;
        Ok(UInt256(buf))
    }
}

impl Serialize for UInt256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for UInt256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip_is_reversed() {
        let h: UInt256 = "f037308fa0ab18155bccfc08485468c112409ea5064595699e98c545f245f32d"
            .parse()
            .unwrap();
        assert_eq!(h.0[0], 0x2d);
        assert_eq!(
            h.to_string(),
            "f037308fa0ab18155bccfc08485468c112409ea5064595699e98c545f245f32d"
        );
    }

    #[test]
    fn from_slice_rejects_bad_length() {
        assert!(UInt256::from_slice(&[0u8; 31]).is_none());
        assert!(UInt256::from_slice(&[0u8; 32]).is_some());
    }
}

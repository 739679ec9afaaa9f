//! 20-byte script hash used for accounts, contracts and witnesses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::io::{BinReader, BinWriter, Decodable, Encodable, IoResult};

/// Size of a [`UInt160`] in bytes.
pub const UINT160_SIZE: usize = 20;

/// A 160-bit identifier stored in little-endian byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct UInt160(pub [u8; UINT160_SIZE]);

impl UInt160 {
    pub fn zero() -> Self {
        UInt160::default()
    }

    /// Creates a script hash from a slice; fails on any other length.
    pub fn from_slice(data: &[u8]) -> Option<Self> {
        if data.len() != UINT160_SIZE {
            return None;
        }
        let mut buf = [0u8; UINT160_SIZE];
        buf.copy_from_slice(data);
        Some(UInt160(buf))
    }

    pub fn bytes(&self) -> [u8; UINT160_SIZE] {
        self.0
    }

    pub fn bytes_reversed(&self) -> [u8; UINT160_SIZE] {
        let mut buf = self.0;
        buf.reverse();
        buf
    }
}

impl fmt::Display for UInt160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.bytes_reversed()))
    }
}

impl FromStr for UInt160 {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let mut buf = [0u8; UINT160_SIZE];
        hex::decode_to_slice(s, &mut buf)?;
        buf.reverse();
        Ok(UInt160(buf))
    }
}

impl Encodable for UInt160 {
    fn encode_binary(&self, w: &mut BinWriter) -> IoResult<()> {
        w.write_bytes(&self.0)
    }
}

impl Decodable for UInt160 {
    fn decode_binary(r: &mut BinReader<'_>) -> IoResult<Self> {
        let mut buf = [0u8; UINT160_SIZE];
        r.read_into(&mut buf)?;
        Ok(UInt160(buf))
    }
}

impl Serialize for UInt160 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for UInt160 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let h: UInt160 = "2d3b96ae1bcc5a585e075e3b81920210dec16302".parse().unwrap();
        assert_eq!(h.to_string(), "2d3b96ae1bcc5a585e075e3b81920210dec16302");
        assert_eq!(h.0[19], 0x2d);
    }
}

//! The `inv`/`getdata` payload.

use crate::io::{BinReader, BinWriter, Decodable, Encodable, IoError, IoResult};
use crate::util::UInt256;

/// What kind of object an inventory announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InvType {
    Tx = 0x01,
    Block = 0x02,
    Consensus = 0xe0,
}

impl InvType {
    pub fn from_byte(b: u8) -> Option<InvType> {
        Some(match b {
            0x01 => InvType::Tx,
            0x02 => InvType::Block,
            0xe0 => InvType::Consensus,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inventory {
    pub inv_type: InvType,
    pub hashes: Vec<UInt256>,
}

impl Inventory {
    pub fn new(inv_type: InvType, hashes: Vec<UInt256>) -> Self {
        Inventory { inv_type, hashes }
    }
}

impl Encodable for Inventory {
    fn encode_binary(&self, w: &mut BinWriter) -> IoResult<()> {
        w.write_u8(self.inv_type as u8)?;
        w.write_array(&self.hashes)
    }
}

impl Decodable for Inventory {
    fn decode_binary(r: &mut BinReader<'_>) -> IoResult<Self> {
        let b = r.read_u8()?;
        let inv_type = InvType::from_byte(b)
            .ok_or_else(|| IoError::InvalidFormat(format!("invalid inventory type {b:#04x}")))?;
        Ok(Inventory {
            inv_type,
            hashes: r.read_array()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::sha256;
    use crate::io::{from_bytes, to_bytes};

    #[test]
    fn round_trip() {
        let inv = Inventory::new(InvType::Tx, vec![sha256(b"t1"), sha256(b"t2")]);
        let back: Inventory = from_bytes(&to_bytes(&inv).unwrap()).unwrap();
        assert_eq!(back, inv);
    }

    #[test]
    fn unknown_type_rejected() {
        let mut bytes = to_bytes(&Inventory::new(InvType::Block, vec![])).unwrap();
        bytes[0] = 0x7f;
        assert!(from_bytes::<Inventory>(&bytes).is_err());
    }
}

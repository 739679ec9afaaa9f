//! The `getblocks`/`getheaders` locator payload.

use crate::io::{BinReader, BinWriter, Decodable, Encodable, IoResult};
use crate::util::UInt256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetBlocksPayload {
    /// Locator hashes, most recent first.
    pub hash_start: Vec<UInt256>,
    /// Zero means "as many as you will give me".
    pub hash_stop: UInt256,
}

impl GetBlocksPayload {
    pub fn new(start: Vec<UInt256>, stop: UInt256) -> Self {
        GetBlocksPayload {
            hash_start: start,
            hash_stop: stop,
        }
    }
}

impl Encodable for GetBlocksPayload {
    fn encode_binary(&self, w: &mut BinWriter) -> IoResult<()> {
        w.write_array(&self.hash_start)?;
        self.hash_stop.encode_binary(w)
    }
}

impl Decodable for GetBlocksPayload {
    fn decode_binary(r: &mut BinReader<'_>) -> IoResult<Self> {
        Ok(GetBlocksPayload {
            hash_start: r.read_array()?,
            hash_stop: UInt256::decode_binary(r)?,
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
        let payload = GetBlocksPayload::new(vec![sha256(b"a"), sha256(b"b")], UInt256::zero());
        let back: GetBlocksPayload = from_bytes(&to_bytes(&payload).unwrap()).unwrap();
        assert_eq!(back, payload);
    }
}

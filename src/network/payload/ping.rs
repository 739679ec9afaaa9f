//! The `ping`/`pong` payload.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::io::{BinReader, BinWriter, Decodable, Encodable, IoResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingPayload {
    /// The sender's block height.
    pub last_block_index: u32,
    pub timestamp: u32,
    pub nonce: u32,
}

impl PingPayload {
    pub fn new(last_block_index: u32, nonce: u32) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or_default();
        PingPayload {
            last_block_index,
            timestamp,
            nonce,
        }
    }
}

impl Encodable for PingPayload {
    fn encode_binary(&self, w: &mut BinWriter) -> IoResult<()> {
        w.write_u32_le(self.last_block_index)?;
        w.write_u32_le(self.timestamp)?;
        w.write_u32_le(self.nonce)
    }
}

impl Decodable for PingPayload {
    fn decode_binary(r: &mut BinReader<'_>) -> IoResult<Self> {
        Ok(PingPayload {
            last_block_index: r.read_u32_le()?,
            timestamp: r.read_u32_le()?,
            nonce: r.read_u32_le()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{from_bytes, to_bytes};

    #[test]
    fn round_trip() {
        let ping = PingPayload::new(77, 4);
        let back: PingPayload = from_bytes(&to_bytes(&ping).unwrap()).unwrap();
        assert_eq!(back, ping);
    }
}

//! The `version` handshake payload.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::io::{BinReader, BinWriter, Decodable, Encodable, IoResult};

/// Service bit advertising a full peer.
pub const NODE_PEER_SERVICE: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionPayload {
    /// Protocol version, currently 0.
    pub version: u32,
    pub services: u64,
    pub timestamp: u32,
    /// Port this node listens on.
    pub port: u16,
    /// Random id distinguishing nodes behind one address.
    pub nonce: u32,
    pub user_agent: Vec<u8>,
    /// The sender's block height.
    pub start_height: u32,
    /// Whether the sender wants inventory forwarded to it.
    pub relay: bool,
}

impl VersionPayload {
    pub fn new(nonce: u32, port: u16, user_agent: &str, start_height: u32, relay: bool) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or_default();
        VersionPayload {
            version: 0,
            services: NODE_PEER_SERVICE,
            timestamp,
            port,
            nonce,
            user_agent: user_agent.as_bytes().to_vec(),
            start_height,
            relay,
        }
    }
}

impl Encodable for VersionPayload {
    fn encode_binary(&self, w: &mut BinWriter) -> IoResult<()> {
        w.write_u32_le(self.version)?;
        w.write_u64_le(self.services)?;
        w.write_u32_le(self.timestamp)?;
        w.write_u16_le(self.port)?;
        w.write_u32_le(self.nonce)?;
        w.write_var_bytes(&self.user_agent)?;
        w.write_u32_le(self.start_height)?;
        w.write_bool(self.relay)
    }
}

impl Decodable for VersionPayload {
    fn decode_binary(r: &mut BinReader<'_>) -> IoResult<Self> {
        Ok(VersionPayload {
            version: r.read_u32_le()?,
            services: r.read_u64_le()?,
            timestamp: r.read_u32_le()?,
            port: r.read_u16_le()?,
            nonce: r.read_u32_le()?,
            user_agent: r.read_var_bytes()?,
            start_height: r.read_u32_le()?,
            relay: r.read_bool()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{from_bytes, to_bytes};

    #[test]
    fn round_trip() {
        let payload = VersionPayload::new(42, 21333, "/cobalt:0.1.0/", 100, false);
        let back: VersionPayload = from_bytes(&to_bytes(&payload).unwrap()).unwrap();
        assert_eq!(payload, back);
    }

    #[test]
    fn minimum_wire_size() {
        // Fixed fields plus one length byte for the empty user agent.
        let payload = VersionPayload::new(0, 0, "", 0, false);
        assert_eq!(to_bytes(&payload).unwrap().len(), 28);
    }
}

//! The `headers` payload.

use crate::core::block::Header;
use crate::io::{BinReader, BinWriter, Decodable, Encodable, IoError, IoResult};

/// A peer never sends more headers than this in one message.
pub const MAX_HEADERS_ALLOWED: usize = 2000;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct HeadersPayload {
    pub headers: Vec<Header>,
}

impl Encodable for HeadersPayload {
    fn encode_binary(&self, w: &mut BinWriter) -> IoResult<()> {
        w.write_array(&self.headers)
    }
}

impl Decodable for HeadersPayload {
    fn decode_binary(r: &mut BinReader<'_>) -> IoResult<Self> {
        let headers: Vec<Header> = r.read_array()?;
        if headers.len() > MAX_HEADERS_ALLOWED {
            return Err(IoError::TooLarge {
                got: headers.len() as u64,
                limit: MAX_HEADERS_ALLOWED as u64,
                context: "headers payload",
            });
        }
        Ok(HeadersPayload { headers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::block::BlockBase;
    use crate::core::transaction::Witness;
    use crate::io::{from_bytes, to_bytes};

    #[test]
    fn round_trip() {
        let header = Header {
            base: BlockBase {
                index: 5,
                script: Witness {
                    invocation_script: vec![0x01],
                    verification_script: vec![0x51],
                },
                ..Default::default()
            },
        };
        let payload = HeadersPayload {
            headers: vec![header],
        };
        let back: HeadersPayload = from_bytes(&to_bytes(&payload).unwrap()).unwrap();
        assert_eq!(back, payload);
    }
}

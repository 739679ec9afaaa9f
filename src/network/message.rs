//! The wire frame and the command-tagged payload union.

use crate::core::block::Block;
use crate::core::transaction::Transaction;
use crate::crypto::hash;
use crate::io::{self, BinReader, BinWriter, Decodable, Encodable};

use super::payload::{
    AddressList, GetBlocksPayload, HeadersPayload, Inventory, PingPayload, VersionPayload,
};
use super::{NetworkError, NetworkResult};

/// Frame header: magic ‖ command ‖ length ‖ checksum.
pub const FRAME_HEADER_SIZE: usize = 24;

/// Upper bound on a single payload.
pub const MAX_PAYLOAD_SIZE: usize = 0x0200_0000;

/// The protocol commands. Unknown command strings are ignored rather
/// than being an error, so growing the protocol stays compatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Version,
    Verack,
    GetAddr,
    Addr,
    GetHeaders,
    Headers,
    GetBlocks,
    Inv,
    GetData,
    Block,
    Tx,
    Consensus,
    Ping,
    Pong,
    Mempool,
}

impl Command {
    pub fn name(self) -> &'static str {
        match self {
            Command::Version => "version",
            Command::Verack => "verack",
            Command::GetAddr => "getaddr",
            Command::Addr => "addr",
            Command::GetHeaders => "getheaders",
            Command::Headers => "headers",
            Command::GetBlocks => "getblocks",
            Command::Inv => "inv",
            Command::GetData => "getdata",
            Command::Block => "block",
            Command::Tx => "tx",
            Command::Consensus => "consensus",
            Command::Ping => "ping",
            Command::Pong => "pong",
            Command::Mempool => "mempool",
        }
    }

    /// The NUL-padded 12-byte form used on the wire.
    pub fn wire_bytes(self) -> [u8; 12] {
        let mut buf = [0u8; 12];
        let name = self.name().as_bytes();
        buf[..name.len()].copy_from_slice(name);
        buf
    }

    pub fn from_wire(raw: &[u8; 12]) -> Option<Command> {
        let end = raw.iter().position(|b| *b == 0).unwrap_or(12);
        let name = std::str::from_utf8(&raw[..end]).ok()?;
        Some(match name {
            "version" => Command::Version,
            "verack" => Command::Verack,
            "getaddr" => Command::GetAddr,
            "addr" => Command::Addr,
            "getheaders" => Command::GetHeaders,
            "headers" => Command::Headers,
            "getblocks" => Command::GetBlocks,
            "inv" => Command::Inv,
            "getdata" => Command::GetData,
            "block" => Command::Block,
            "tx" => Command::Tx,
            "consensus" => Command::Consensus,
            "ping" => Command::Ping,
            "pong" => Command::Pong,
            "mempool" => Command::Mempool,
            _ => return None,
        })
    }
}

/// Decoded payload of a message.
#[derive(Debug, Clone)]
pub enum Payload {
    Null,
    Version(VersionPayload),
    Addr(AddressList),
    GetBlocks(GetBlocksPayload),
    Headers(HeadersPayload),
    Inv(Inventory),
    Block(Box<Block>),
    Tx(Box<Transaction>),
    Ping(PingPayload),
    /// Consensus payloads are carried but not interpreted.
    Raw(Vec<u8>),
}

impl Payload {
    fn to_bytes(&self) -> io::IoResult<Vec<u8>> {
        let mut w = BinWriter::new();
        match self {
            Payload::Null => {}
            Payload::Version(p) => p.encode_binary(&mut w)?,
            Payload::Addr(p) => p.encode_binary(&mut w)?,
            Payload::GetBlocks(p) => p.encode_binary(&mut w)?,
            Payload::Headers(p) => p.encode_binary(&mut w)?,
            Payload::Inv(p) => p.encode_binary(&mut w)?,
            Payload::Block(p) => p.encode_binary(&mut w)?,
            Payload::Tx(p) => p.encode_binary(&mut w)?,
            Payload::Ping(p) => p.encode_binary(&mut w)?,
            Payload::Raw(data) => w.write_bytes(data)?,
        }
        Ok(w.into_bytes())
    }
}

/// The fixed-size frame prefix.
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub magic: u32,
    pub command_raw: [u8; 12],
    pub length: u32,
    pub checksum: u32,
}

impl FrameHeader {
    pub fn decode(buf: &[u8; FRAME_HEADER_SIZE]) -> FrameHeader {
        let mut command_raw = [0u8; 12];
        command_raw.copy_from_slice(&buf[4..16]);
        FrameHeader {
            magic: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            command_raw,
            length: u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]),
            checksum: u32::from_le_bytes([buf[20], buf[21], buf[22], buf[23]]),
        }
    }
}

/// A complete protocol message.
#[derive(Debug, Clone)]
pub struct Message {
    pub magic: u32,
    pub command: Command,
    pub payload: Payload,
}

impl Message {
    pub fn new(magic: u32, command: Command, payload: Payload) -> Self {
        Message {
            magic,
            command,
            payload,
        }
    }

    /// Serializes the full frame: header plus payload.
    pub fn encode(&self) -> NetworkResult<Vec<u8>> {
        let payload = self.payload.to_bytes()?;
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(NetworkError::PayloadTooLarge(payload.len()));
        }
        let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        buf.extend_from_slice(&self.magic.to_le_bytes());
        buf.extend_from_slice(&self.command.wire_bytes());
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&hash::checksum(&payload).to_le_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Reassembles a message from a decoded header and its payload
    /// bytes. Returns `Ok(None)` for commands this node does not know.
    pub fn from_frame(
        header: &FrameHeader,
        payload: &[u8],
        expected_magic: u32,
    ) -> NetworkResult<Option<Message>> {
        if header.magic != expected_magic {
            return Err(NetworkError::InvalidNetwork(header.magic));
        }
        if hash::checksum(payload) != header.checksum {
            return Err(NetworkError::InvalidChecksum);
        }
        let Some(command) = Command::from_wire(&header.command_raw) else {
            return Ok(None);
        };
        let payload = Self::decode_payload(command, payload)?;
        Ok(Some(Message {
            magic: header.magic,
            command,
            payload,
        }))
    }

    fn decode_payload(command: Command, data: &[u8]) -> NetworkResult<Payload> {
        let mut r = BinReader::new(data);
        let payload = match command {
            Command::Verack | Command::GetAddr | Command::Mempool => Payload::Null,
            Command::Version => Payload::Version(VersionPayload::decode_binary(&mut r)?),
            Command::Addr => Payload::Addr(AddressList::decode_binary(&mut r)?),
            Command::GetHeaders | Command::GetBlocks => {
                Payload::GetBlocks(GetBlocksPayload::decode_binary(&mut r)?)
            }
            Command::Headers => Payload::Headers(HeadersPayload::decode_binary(&mut r)?),
            Command::Inv | Command::GetData => Payload::Inv(Inventory::decode_binary(&mut r)?),
            Command::Block => Payload::Block(Box::new(Block::decode_binary(&mut r)?)),
            Command::Tx => Payload::Tx(Box::new(Transaction::decode_binary(&mut r)?)),
            Command::Ping | Command::Pong => Payload::Ping(PingPayload::decode_binary(&mut r)?),
            Command::Consensus => return Ok(Payload::Raw(data.to_vec())),
        };
        if r.remaining() != 0 {
            return Err(NetworkError::Codec(io::IoError::InvalidFormat(format!(
                "{} trailing payload bytes",
                r.remaining()
            ))));
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::UInt256;

    const MAGIC: u32 = 0xdeadbeef;

    fn round_trip(msg: Message) -> Message {
        let bytes = msg.encode().unwrap();
        let mut header = [0u8; FRAME_HEADER_SIZE];
        header.copy_from_slice(&bytes[..FRAME_HEADER_SIZE]);
        let header = FrameHeader::decode(&header);
        assert_eq!(header.length as usize, bytes.len() - FRAME_HEADER_SIZE);
        Message::from_frame(&header, &bytes[FRAME_HEADER_SIZE..], MAGIC)
            .unwrap()
            .expect("known command")
    }

    #[test]
    fn verack_frame_round_trip() {
        let msg = round_trip(Message::new(MAGIC, Command::Verack, Payload::Null));
        assert_eq!(msg.command, Command::Verack);
        assert!(matches!(msg.payload, Payload::Null));
    }

    #[test]
    fn version_frame_round_trip() {
        let version = VersionPayload::new(12345, 21333, "/cobalt:0.1.0/", 7, true);
        let msg = round_trip(Message::new(
            MAGIC,
            Command::Version,
            Payload::Version(version.clone()),
        ));
        let Payload::Version(back) = msg.payload else { panic!() };
        assert_eq!(back.nonce, version.nonce);
        assert_eq!(back.user_agent, version.user_agent);
        assert_eq!(back.start_height, 7);
        assert!(back.relay);
    }

    #[test]
    fn inv_frame_round_trip() {
        let inv = Inventory {
            inv_type: super::super::payload::InvType::Block,
            hashes: vec![crate::crypto::hash::sha256(b"h")],
        };
        let msg = round_trip(Message::new(MAGIC, Command::Inv, Payload::Inv(inv)));
        let Payload::Inv(back) = msg.payload else { panic!() };
        assert_eq!(back.hashes.len(), 1);
    }

    #[test]
    fn bad_checksum_is_rejected() {
        let msg = Message::new(MAGIC, Command::Verack, Payload::Null);
        let mut bytes = msg.encode().unwrap();
        bytes[20] ^= 0xff;
        let mut header = [0u8; FRAME_HEADER_SIZE];
        header.copy_from_slice(&bytes[..FRAME_HEADER_SIZE]);
        let header = FrameHeader::decode(&header);
        assert!(matches!(
            Message::from_frame(&header, &bytes[FRAME_HEADER_SIZE..], MAGIC),
            Err(NetworkError::InvalidChecksum)
        ));
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let msg = Message::new(MAGIC + 1, Command::Verack, Payload::Null);
        let bytes = msg.encode().unwrap();
        let mut header = [0u8; FRAME_HEADER_SIZE];
        header.copy_from_slice(&bytes[..FRAME_HEADER_SIZE]);
        let header = FrameHeader::decode(&header);
        assert!(matches!(
            Message::from_frame(&header, &bytes[FRAME_HEADER_SIZE..], MAGIC),
            Err(NetworkError::InvalidNetwork(_))
        ));
    }

    #[test]
    fn unknown_command_is_ignored() {
        let msg = Message::new(MAGIC, Command::Verack, Payload::Null);
        let mut bytes = msg.encode().unwrap();
        bytes[4..16].copy_from_slice(b"filterload\0\0");
        let mut header = [0u8; FRAME_HEADER_SIZE];
        header.copy_from_slice(&bytes[..FRAME_HEADER_SIZE]);
        let header = FrameHeader::decode(&header);
        let decoded =
            Message::from_frame(&header, &bytes[FRAME_HEADER_SIZE..], MAGIC).unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn getblocks_payload_shape() {
        let payload = GetBlocksPayload {
            hash_start: vec![UInt256([1; 32]), UInt256([2; 32])],
            hash_stop: UInt256::zero(),
        };
        let msg = round_trip(Message::new(
            MAGIC,
            Command::GetHeaders,
            Payload::GetBlocks(payload),
        ));
        let Payload::GetBlocks(back) = msg.payload else { panic!() };
        assert_eq!(back.hash_start.len(), 2);
        assert!(back.hash_stop.is_zero());
    }
}

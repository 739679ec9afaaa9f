//! Blocks and block headers.

use crate::crypto::hash;
use crate::crypto::merkle::merkle_root;
use crate::io::{BinReader, BinWriter, Decodable, Encodable, IoError, IoResult};
use crate::util::{UInt160, UInt256};

use super::transaction::{Transaction, Witness};

/// Header fields shared by [`Header`] and [`Block`].
///
/// The block hash covers everything up to and including `next_consensus`;
/// the witness authenticates that hash against the previous block's
/// consensus commitment.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BlockBase {
    pub version: u32,
    pub prev_hash: UInt256,
    pub merkle_root: UInt256,
    /// Seconds since the Unix epoch.
    pub timestamp: u32,
    /// Height of this block in the chain.
    pub index: u32,
    pub consensus_data: u64,
    /// Script hash the next block's witness must satisfy.
    pub next_consensus: UInt160,
    pub script: Witness,
}

impl BlockBase {
    fn encode_hashable(&self, w: &mut BinWriter) -> IoResult<()> {
        w.write_u32_le(self.version)?;
        self.prev_hash.encode_binary(w)?;
        self.merkle_root.encode_binary(w)?;
        w.write_u32_le(self.timestamp)?;
        w.write_u32_le(self.index)?;
        w.write_u64_le(self.consensus_data)?;
        self.next_consensus.encode_binary(w)
    }

    fn decode_hashable(r: &mut BinReader<'_>) -> IoResult<Self> {
        Ok(BlockBase {
            version: r.read_u32_le()?,
            prev_hash: UInt256::decode_binary(r)?,
            merkle_root: UInt256::decode_binary(r)?,
            timestamp: r.read_u32_le()?,
            index: r.read_u32_le()?,
            consensus_data: r.read_u64_le()?,
            next_consensus: UInt160::decode_binary(r)?,
            script: Witness::default(),
        })
    }

    /// The block's content hash.
    pub fn hash(&self) -> UInt256 {
        let mut w = BinWriter::new();
        self.encode_hashable(&mut w)
            .expect("in-memory header encoding cannot fail");
        hash::double_sha256(&w.into_bytes())
    }
}

impl Encodable for BlockBase {
    fn encode_binary(&self, w: &mut BinWriter) -> IoResult<()> {
        self.encode_hashable(w)?;
        // Fixed witness count of one.
        w.write_u8(1)?;
        self.script.encode_binary(w)
    }
}

impl Decodable for BlockBase {
    fn decode_binary(r: &mut BinReader<'_>) -> IoResult<Self> {
        let mut base = BlockBase::decode_hashable(r)?;
        let count = r.read_u8()?;
        if count != 1 {
            return Err(IoError::InvalidFormat(format!(
                "wrong header witness count {count}"
            )));
        }
        base.script = Witness::decode_binary(r)?;
        Ok(base)
    }
}

/// A header on the wire: the base fields with an empty transaction list
/// marker in place of the transactions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Header {
    pub base: BlockBase,
}

impl Header {
    pub fn hash(&self) -> UInt256 {
        self.base.hash()
    }
}

impl Encodable for Header {
    fn encode_binary(&self, w: &mut BinWriter) -> IoResult<()> {
        self.base.encode_binary(w)?;
        w.write_u8(0)
    }
}

impl Decodable for Header {
    fn decode_binary(r: &mut BinReader<'_>) -> IoResult<Self> {
        let base = BlockBase::decode_binary(r)?;
        let padding = r.read_u8()?;
        if padding != 0 {
            return Err(IoError::InvalidFormat(format!(
                "wrong header padding byte {padding:#04x}"
            )));
        }
        Ok(Header { base })
    }
}

/// A full block: header fields plus the ordered transaction list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub base: BlockBase,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> UInt256 {
        self.base.hash()
    }

    pub fn index(&self) -> u32 {
        self.base.index
    }

    pub fn header(&self) -> Header {
        Header {
            base: self.base.clone(),
        }
    }

    /// Recomputes `merkle_root` from the transaction hashes.
    pub fn rebuild_merkle_root(&mut self) -> IoResult<()> {
        let hashes: Vec<UInt256> = self.transactions.iter().map(|tx| tx.hash()).collect();
        self.base.merkle_root = merkle_root(&hashes).ok_or_else(|| {
            IoError::InvalidFormat("block without transactions has no merkle root".into())
        })?;
        Ok(())
    }

    /// Checks that `merkle_root` matches the transactions.
    pub fn verify_merkle_root(&self) -> bool {
        let hashes: Vec<UInt256> = self.transactions.iter().map(|tx| tx.hash()).collect();
        merkle_root(&hashes) == Some(self.base.merkle_root)
    }
}

impl Encodable for Block {
    fn encode_binary(&self, w: &mut BinWriter) -> IoResult<()> {
        self.base.encode_binary(w)?;
        w.write_array(&self.transactions)
    }
}

impl Decodable for Block {
    fn decode_binary(r: &mut BinReader<'_>) -> IoResult<Self> {
        Ok(Block {
            base: BlockBase::decode_binary(r)?,
            transactions: r.read_array()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::{TxData, Witness};
    use crate::io::{from_bytes, to_bytes};

    fn sample_base() -> BlockBase {
        BlockBase {
            version: 0,
            prev_hash: hash::sha256(b"prevhash"),
            merkle_root: hash::sha256(b"merkleroot"),
            timestamp: 1_626_361_701,
            index: 3445,
            consensus_data: 394_949,
            next_consensus: UInt160::zero(),
            script: Witness {
                invocation_script: vec![0x10],
                verification_script: vec![0x51],
            },
        }
    }

    #[test]
    fn header_round_trip() {
        let header = Header { base: sample_base() };
        let bytes = to_bytes(&header).unwrap();
        let back: Header = from_bytes(&bytes).unwrap();
        assert_eq!(header, back);
        assert_eq!(header.hash(), back.hash());
    }

    #[test]
    fn header_rejects_bad_padding() {
        let header = Header { base: sample_base() };
        let mut bytes = to_bytes(&header).unwrap();
        *bytes.last_mut().unwrap() = 1;
        assert!(from_bytes::<Header>(&bytes).is_err());
    }

    #[test]
    fn block_round_trip_and_merkle() {
        let mut block = Block {
            base: sample_base(),
            transactions: vec![
                Transaction::new(TxData::Miner { nonce: 1 }),
                Transaction::new(TxData::Contract),
            ],
        };
        block.rebuild_merkle_root().unwrap();
        assert!(block.verify_merkle_root());

        let bytes = to_bytes(&block).unwrap();
        let back: Block = from_bytes(&bytes).unwrap();
        assert_eq!(block, back);
        assert!(back.verify_merkle_root());
    }

    #[test]
    fn hash_ignores_witness() {
        let mut base = sample_base();
        let before = base.hash();
        base.script.invocation_script = vec![0xff; 8];
        assert_eq!(base.hash(), before);
    }

    #[test]
    fn merkle_mismatch_detected() {
        let mut block = Block {
            base: sample_base(),
            transactions: vec![Transaction::new(TxData::Miner { nonce: 1 })],
        };
        block.rebuild_merkle_root().unwrap();
        block.transactions.push(Transaction::new(TxData::Contract));
        assert!(!block.verify_merkle_root());
    }
}

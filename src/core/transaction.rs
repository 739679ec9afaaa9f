//! Transactions: the tagged union of chain operations.

use crate::crypto::hash;
use crate::crypto::keys::PublicKey;
use crate::io::{self, BinReader, BinWriter, Decodable, Encodable, IoError, IoResult};
use crate::smartcontract::{ParamType, PropertyState};
use crate::util::{Fixed8, UInt160, UInt256};

/// Transaction discriminator byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TxType {
    Miner = 0x00,
    Issue = 0x01,
    Claim = 0x02,
    Enrollment = 0x20,
    Register = 0x40,
    Contract = 0x80,
    Vote = 0x90,
    Publish = 0xd0,
    Invocation = 0xd1,
}

impl TxType {
    pub fn from_byte(b: u8) -> Option<TxType> {
        use TxType::*;
        Some(match b {
            0x00 => Miner,
            0x01 => Issue,
            0x02 => Claim,
            0x20 => Enrollment,
            0x40 => Register,
            0x80 => Contract,
            0x90 => Vote,
            0xd0 => Publish,
            0xd1 => Invocation,
            _ => return None,
        })
    }
}

/// A reference to an unspent output of a previous transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Input {
    pub prev_hash: UInt256,
    pub prev_index: u16,
}

impl Encodable for Input {
    fn encode_binary(&self, w: &mut BinWriter) -> IoResult<()> {
        self.prev_hash.encode_binary(w)?;
        w.write_u16_le(self.prev_index)
    }
}

impl Decodable for Input {
    fn decode_binary(r: &mut BinReader<'_>) -> IoResult<Self> {
        Ok(Input {
            prev_hash: UInt256::decode_binary(r)?,
            prev_index: r.read_u16_le()?,
        })
    }
}

/// An (asset, amount, recipient) tuple created by a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Output {
    pub asset_id: UInt256,
    pub amount: Fixed8,
    pub script_hash: UInt160,
}

impl Encodable for Output {
    fn encode_binary(&self, w: &mut BinWriter) -> IoResult<()> {
        self.asset_id.encode_binary(w)?;
        self.amount.encode_binary(w)?;
        self.script_hash.encode_binary(w)
    }
}

impl Decodable for Output {
    fn decode_binary(r: &mut BinReader<'_>) -> IoResult<Self> {
        Ok(Output {
            asset_id: UInt256::decode_binary(r)?,
            amount: Fixed8::decode_binary(r)?,
            script_hash: UInt160::decode_binary(r)?,
        })
    }
}

/// An invocation/verification script pair authorizing a transaction on
/// behalf of the hash of its verification script.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Witness {
    pub invocation_script: Vec<u8>,
    pub verification_script: Vec<u8>,
}

impl Witness {
    /// The script hash this witness answers for.
    pub fn script_hash(&self) -> UInt160 {
        hash::hash160(&self.verification_script)
    }
}

impl Encodable for Witness {
    fn encode_binary(&self, w: &mut BinWriter) -> IoResult<()> {
        w.write_var_bytes(&self.invocation_script)?;
        w.write_var_bytes(&self.verification_script)
    }
}

impl Decodable for Witness {
    fn decode_binary(r: &mut BinReader<'_>) -> IoResult<Self> {
        Ok(Witness {
            invocation_script: r.read_var_bytes()?,
            verification_script: r.read_var_bytes()?,
        })
    }
}

/// Attribute usage tags. The usage dictates how the payload is framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrUsage {
    ContractHash,
    Ecdh02,
    Ecdh03,
    Script,
    Vote,
    DescriptionUrl,
    Description,
    Remark(u8),
}

impl AttrUsage {
    pub fn byte(self) -> u8 {
        match self {
            AttrUsage::ContractHash => 0x00,
            AttrUsage::Ecdh02 => 0x02,
            AttrUsage::Ecdh03 => 0x03,
            AttrUsage::Script => 0x20,
            AttrUsage::Vote => 0x30,
            AttrUsage::DescriptionUrl => 0x81,
            AttrUsage::Description => 0x90,
            AttrUsage::Remark(b) => b,
        }
    }

    pub fn from_byte(b: u8) -> Option<AttrUsage> {
        Some(match b {
            0x00 => AttrUsage::ContractHash,
            0x02 => AttrUsage::Ecdh02,
            0x03 => AttrUsage::Ecdh03,
            0x20 => AttrUsage::Script,
            0x30 => AttrUsage::Vote,
            0x81 => AttrUsage::DescriptionUrl,
            0x90 => AttrUsage::Description,
            0xf0..=0xff => AttrUsage::Remark(b),
            _ => return None,
        })
    }
}

/// A typed annotation attached to a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub usage: AttrUsage,
    pub data: Vec<u8>,
}

impl Encodable for Attribute {
    fn encode_binary(&self, w: &mut BinWriter) -> IoResult<()> {
        w.write_u8(self.usage.byte())?;
        match self.usage {
            // Fixed 32-byte payloads.
            AttrUsage::ContractHash | AttrUsage::Vote | AttrUsage::Ecdh02 | AttrUsage::Ecdh03 => {
                w.write_bytes(&self.data)
            }
            // Fixed 20-byte payload.
            AttrUsage::Script => w.write_bytes(&self.data),
            AttrUsage::DescriptionUrl => {
                w.write_u8(self.data.len() as u8)?;
                w.write_bytes(&self.data)
            }
            AttrUsage::Description | AttrUsage::Remark(_) => w.write_var_bytes(&self.data),
        }
    }
}

impl Decodable for Attribute {
    fn decode_binary(r: &mut BinReader<'_>) -> IoResult<Self> {
        let b = r.read_u8()?;
        let usage = AttrUsage::from_byte(b)
            .ok_or_else(|| IoError::InvalidFormat(format!("invalid attribute usage {b:#04x}")))?;
        let data = match usage {
            AttrUsage::ContractHash | AttrUsage::Vote | AttrUsage::Ecdh02 | AttrUsage::Ecdh03 => {
                r.read_bytes(32)?
            }
            AttrUsage::Script => r.read_bytes(20)?,
            AttrUsage::DescriptionUrl => {
                let len = r.read_u8()? as usize;
                r.read_bytes(len)?
            }
            AttrUsage::Description | AttrUsage::Remark(_) => r.read_var_bytes()?,
        };
        Ok(Attribute { usage, data })
    }
}

/// Classification byte of a registered asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AssetType {
    GoverningToken = 0x00,
    UtilityToken = 0x01,
    Currency = 0x08,
    Share = 0x90,
    Invoice = 0x98,
    Token = 0x60,
}

impl AssetType {
    pub fn from_byte(b: u8) -> Option<AssetType> {
        use AssetType::*;
        Some(match b {
            0x00 => GoverningToken,
            0x01 => UtilityToken,
            0x08 => Currency,
            0x90 => Share,
            0x98 => Invoice,
            0x60 => Token,
            _ => return None,
        })
    }
}

/// Payload of a Register transaction: a new asset definition.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterData {
    pub asset_type: AssetType,
    /// Localized name list as a JSON string.
    pub name: String,
    pub amount: Fixed8,
    pub precision: u8,
    pub owner: PublicKey,
    pub admin: UInt160,
}

/// Payload of a Publish transaction: a new contract.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishData {
    pub script: Vec<u8>,
    pub param_list: Vec<ParamType>,
    pub return_type: ParamType,
    pub needs_storage: bool,
    pub name: String,
    pub code_version: String,
    pub author: String,
    pub email: String,
    pub description: String,
}

impl PublishData {
    pub fn properties(&self) -> PropertyState {
        if self.needs_storage {
            PropertyState::HAS_STORAGE
        } else {
            PropertyState::NONE
        }
    }
}

/// Type-specific payload of a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum TxData {
    Miner { nonce: u32 },
    Issue,
    Claim { claims: Vec<Input> },
    Enrollment { public_key: PublicKey },
    Register(RegisterData),
    Contract,
    Vote { account: UInt160, votes: Vec<PublicKey> },
    Publish(PublishData),
    Invocation { script: Vec<u8>, gas: Fixed8 },
}

impl TxData {
    pub fn tx_type(&self) -> TxType {
        match self {
            TxData::Miner { .. } => TxType::Miner,
            TxData::Issue => TxType::Issue,
            TxData::Claim { .. } => TxType::Claim,
            TxData::Enrollment { .. } => TxType::Enrollment,
            TxData::Register(_) => TxType::Register,
            TxData::Contract => TxType::Contract,
            TxData::Vote { .. } => TxType::Vote,
            TxData::Publish(_) => TxType::Publish,
            TxData::Invocation { .. } => TxType::Invocation,
        }
    }
}

/// A transaction: typed payload, attributes, UTXO inputs/outputs and the
/// witnesses authorizing it.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub version: u8,
    pub data: TxData,
    pub attributes: Vec<Attribute>,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    pub scripts: Vec<Witness>,
}

impl Transaction {
    pub fn new(data: TxData) -> Self {
        Transaction {
            version: 0,
            data,
            attributes: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            scripts: Vec::new(),
        }
    }

    pub fn tx_type(&self) -> TxType {
        self.data.tx_type()
    }

    /// Serialization without witnesses; the part every witness signs.
    pub fn signed_part(&self) -> IoResult<Vec<u8>> {
        let mut w = BinWriter::new();
        self.encode_unsigned(&mut w)?;
        Ok(w.into_bytes())
    }

    /// The content hash: double SHA-256 of the witness-free serialization.
    pub fn hash(&self) -> UInt256 {
        let data = self
            .signed_part()
            .expect("in-memory transaction encoding cannot fail");
        hash::double_sha256(&data)
    }

    /// The digest witnesses sign; identical to [`Self::hash`].
    pub fn sighash(&self) -> UInt256 {
        self.hash()
    }

    /// Total serialized size in bytes.
    pub fn size(&self) -> usize {
        io::to_bytes(self).map(|b| b.len()).unwrap_or_default()
    }

    /// Sum of outputs per asset for the given asset id.
    pub fn output_amount(&self, asset_id: &UInt256) -> Fixed8 {
        self.outputs
            .iter()
            .filter(|o| o.asset_id == *asset_id)
            .map(|o| o.amount)
            .sum()
    }

    fn encode_unsigned(&self, w: &mut BinWriter) -> IoResult<()> {
        w.write_u8(self.tx_type() as u8)?;
        w.write_u8(self.version)?;
        match &self.data {
            TxData::Miner { nonce } => w.write_u32_le(*nonce)?,
            TxData::Issue | TxData::Contract => {}
            TxData::Claim { claims } => w.write_array(claims)?,
            TxData::Enrollment { public_key } => public_key.encode_binary(w)?,
            TxData::Register(data) => {
                w.write_u8(data.asset_type as u8)?;
                w.write_string(&data.name)?;
                data.amount.encode_binary(w)?;
                w.write_u8(data.precision)?;
                data.owner.encode_binary(w)?;
                data.admin.encode_binary(w)?;
            }
            TxData::Vote { account, votes } => {
                account.encode_binary(w)?;
                w.write_array(votes)?;
            }
            TxData::Publish(data) => {
                w.write_var_bytes(&data.script)?;
                w.write_var_uint(data.param_list.len() as u64)?;
                for param in &data.param_list {
                    param.encode_binary(w)?;
                }
                data.return_type.encode_binary(w)?;
                if self.version >= 1 {
                    w.write_bool(data.needs_storage)?;
                }
                w.write_string(&data.name)?;
                w.write_string(&data.code_version)?;
                w.write_string(&data.author)?;
                w.write_string(&data.email)?;
                w.write_string(&data.description)?;
            }
            TxData::Invocation { script, gas } => {
                w.write_var_bytes(script)?;
                if self.version >= 1 {
                    gas.encode_binary(w)?;
                }
            }
        }
        w.write_array(&self.attributes)?;
        w.write_array(&self.inputs)?;
        w.write_array(&self.outputs)
    }
}

impl Encodable for Transaction {
    fn encode_binary(&self, w: &mut BinWriter) -> IoResult<()> {
        self.encode_unsigned(w)?;
        w.write_array(&self.scripts)
    }
}

impl Decodable for Transaction {
    fn decode_binary(r: &mut BinReader<'_>) -> IoResult<Self> {
        let type_byte = r.read_u8()?;
        let tx_type = TxType::from_byte(type_byte).ok_or_else(|| {
            IoError::InvalidFormat(format!("invalid transaction type {type_byte:#04x}"))
        })?;
        let version = r.read_u8()?;
        let data = match tx_type {
            TxType::Miner => TxData::Miner {
                nonce: r.read_u32_le()?,
            },
            TxType::Issue => TxData::Issue,
            TxType::Contract => TxData::Contract,
            TxType::Claim => TxData::Claim {
                claims: r.read_array()?,
            },
            TxType::Enrollment => TxData::Enrollment {
                public_key: PublicKey::decode_binary(r)?,
            },
            TxType::Register => {
                let type_byte = r.read_u8()?;
                let asset_type = AssetType::from_byte(type_byte).ok_or_else(|| {
                    IoError::InvalidFormat(format!("invalid asset type {type_byte:#04x}"))
                })?;
                TxData::Register(RegisterData {
                    asset_type,
                    name: r.read_string()?,
                    amount: Fixed8::decode_binary(r)?,
                    precision: r.read_u8()?,
                    owner: PublicKey::decode_binary(r)?,
                    admin: UInt160::decode_binary(r)?,
                })
            }
            TxType::Vote => TxData::Vote {
                account: UInt160::decode_binary(r)?,
                votes: r.read_array()?,
            },
            TxType::Publish => {
                let script = r.read_var_bytes()?;
                let param_list = {
                    let len = r.read_var_uint()? as usize;
                    let mut list = Vec::with_capacity(len.min(64));
                    for _ in 0..len {
                        list.push(ParamType::decode_binary(r)?);
                    }
                    list
                };
                let return_type = ParamType::decode_binary(r)?;
                let needs_storage = if version >= 1 { r.read_bool()? } else { false };
                TxData::Publish(PublishData {
                    script,
                    param_list,
                    return_type,
                    needs_storage,
                    name: r.read_string()?,
                    code_version: r.read_string()?,
                    author: r.read_string()?,
                    email: r.read_string()?,
                    description: r.read_string()?,
                })
            }
            TxType::Invocation => {
                let script = r.read_var_bytes()?;
                let gas = if version >= 1 {
                    Fixed8::decode_binary(r)?
                } else {
                    Fixed8::ZERO
                };
                TxData::Invocation { script, gas }
            }
        };
        Ok(Transaction {
            version,
            data,
            attributes: r.read_array()?,
            inputs: r.read_array()?,
            outputs: r.read_array()?,
            scripts: r.read_array()?,
        })
    }
}

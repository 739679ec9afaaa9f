//! Ledger state records persisted per block.

use std::collections::HashMap;

use crate::crypto::hash;
use crate::crypto::keys::PublicKey;
use crate::io::{BinReader, BinWriter, Decodable, Encodable, IoError, IoResult};
use crate::smartcontract::{ParamType, PropertyState};
use crate::util::{Fixed8, UInt160, UInt256};

use super::transaction::AssetType;

/// Per-account state: frozen flag, votes and asset balances.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AccountState {
    pub version: u8,
    pub script_hash: UInt160,
    pub is_frozen: bool,
    pub votes: Vec<PublicKey>,
    pub balances: HashMap<UInt256, Fixed8>,
}

impl AccountState {
    pub fn new(script_hash: UInt160) -> Self {
        AccountState {
            script_hash,
            ..AccountState::default()
        }
    }

    pub fn balance(&self, asset_id: &UInt256) -> Fixed8 {
        self.balances.get(asset_id).copied().unwrap_or(Fixed8::ZERO)
    }
}

impl Encodable for AccountState {
    fn encode_binary(&self, w: &mut BinWriter) -> IoResult<()> {
        w.write_u8(self.version)?;
        self.script_hash.encode_binary(w)?;
        w.write_bool(self.is_frozen)?;
        w.write_array(&self.votes)?;
        // Deterministic order for a reproducible encoding.
        let mut balances: Vec<(&UInt256, &Fixed8)> = self.balances.iter().collect();
        balances.sort_by_key(|(asset, _)| **asset);
        w.write_var_uint(balances.len() as u64)?;
        for (asset, amount) in balances {
            asset.encode_binary(w)?;
            amount.encode_binary(w)?;
        }
        Ok(())
    }
}

impl Decodable for AccountState {
    fn decode_binary(r: &mut BinReader<'_>) -> IoResult<Self> {
        let version = r.read_u8()?;
        let script_hash = UInt160::decode_binary(r)?;
        let is_frozen = r.read_bool()?;
        let votes = r.read_array()?;
        let count = r.read_var_uint()? as usize;
        let mut balances = HashMap::with_capacity(count.min(64));
        for _ in 0..count {
            let asset = UInt256::decode_binary(r)?;
            let amount = Fixed8::decode_binary(r)?;
            balances.insert(asset, amount);
        }
        Ok(AccountState {
            version,
            script_hash,
            is_frozen,
            votes,
            balances,
        })
    }
}

/// A registered asset.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetState {
    pub id: UInt256,
    pub asset_type: AssetType,
    /// Localized name list as a JSON string.
    pub name: String,
    pub amount: Fixed8,
    pub available: Fixed8,
    pub precision: u8,
    pub fee_mode: u8,
    pub owner: PublicKey,
    pub admin: UInt160,
    pub issuer: UInt160,
    /// Block index at which the registration lapses.
    pub expiration: u32,
    pub is_frozen: bool,
}

impl Encodable for AssetState {
    fn encode_binary(&self, w: &mut BinWriter) -> IoResult<()> {
        self.id.encode_binary(w)?;
        w.write_u8(self.asset_type as u8)?;
        w.write_string(&self.name)?;
        self.amount.encode_binary(w)?;
        self.available.encode_binary(w)?;
        w.write_u8(self.precision)?;
        w.write_u8(self.fee_mode)?;
        self.owner.encode_binary(w)?;
        self.admin.encode_binary(w)?;
        self.issuer.encode_binary(w)?;
        w.write_u32_le(self.expiration)?;
        w.write_bool(self.is_frozen)
    }
}

impl Decodable for AssetState {
    fn decode_binary(r: &mut BinReader<'_>) -> IoResult<Self> {
        let id = UInt256::decode_binary(r)?;
        let type_byte = r.read_u8()?;
        let asset_type = AssetType::from_byte(type_byte)
            .ok_or_else(|| IoError::InvalidFormat(format!("invalid asset type {type_byte:#04x}")))?;
        Ok(AssetState {
            id,
            asset_type,
            name: r.read_string()?,
            amount: Fixed8::decode_binary(r)?,
            available: Fixed8::decode_binary(r)?,
            precision: r.read_u8()?,
            fee_mode: r.read_u8()?,
            owner: PublicKey::decode_binary(r)?,
            admin: UInt160::decode_binary(r)?,
            issuer: UInt160::decode_binary(r)?,
            expiration: r.read_u32_le()?,
            is_frozen: r.read_bool()?,
        })
    }
}

/// A deployed contract.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractState {
    pub script: Vec<u8>,
    pub param_list: Vec<ParamType>,
    pub return_type: ParamType,
    pub properties: PropertyState,
    pub name: String,
    pub code_version: String,
    pub author: String,
    pub email: String,
    pub description: String,
}

impl ContractState {
    pub fn script_hash(&self) -> UInt160 {
        hash::hash160(&self.script)
    }

    pub fn has_storage(&self) -> bool {
        self.properties.contains(PropertyState::HAS_STORAGE)
    }

    pub fn has_dynamic_invoke(&self) -> bool {
        self.properties.contains(PropertyState::HAS_DYNAMIC_INVOKE)
    }

    pub fn is_payable(&self) -> bool {
        self.properties.contains(PropertyState::IS_PAYABLE)
    }
}

impl Encodable for ContractState {
    fn encode_binary(&self, w: &mut BinWriter) -> IoResult<()> {
        w.write_var_bytes(&self.script)?;
        w.write_var_uint(self.param_list.len() as u64)?;
        for param in &self.param_list {
            param.encode_binary(w)?;
        }
        self.return_type.encode_binary(w)?;
        w.write_u8(self.properties.0)?;
        w.write_string(&self.name)?;
        w.write_string(&self.code_version)?;
        w.write_string(&self.author)?;
        w.write_string(&self.email)?;
        w.write_string(&self.description)
    }
}

impl Decodable for ContractState {
    fn decode_binary(r: &mut BinReader<'_>) -> IoResult<Self> {
        let script = r.read_var_bytes()?;
        let len = r.read_var_uint()? as usize;
        let mut param_list = Vec::with_capacity(len.min(64));
        for _ in 0..len {
            param_list.push(ParamType::decode_binary(r)?);
        }
        Ok(ContractState {
            script,
            param_list,
            return_type: ParamType::decode_binary(r)?,
            properties: PropertyState(r.read_u8()?),
            name: r.read_string()?,
            code_version: r.read_string()?,
            author: r.read_string()?,
            email: r.read_string()?,
            description: r.read_string()?,
        })
    }
}

/// A contract's stored value under one key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StorageItem {
    pub value: Vec<u8>,
}

impl Encodable for StorageItem {
    fn encode_binary(&self, w: &mut BinWriter) -> IoResult<()> {
        w.write_var_bytes(&self.value)
    }
}

impl Decodable for StorageItem {
    fn decode_binary(r: &mut BinReader<'_>) -> IoResult<Self> {
        Ok(StorageItem {
            value: r.read_var_bytes()?,
        })
    }
}

/// An enrolled consensus candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatorState {
    pub public_key: PublicKey,
    pub registered: bool,
    pub votes: Fixed8,
}

impl Encodable for ValidatorState {
    fn encode_binary(&self, w: &mut BinWriter) -> IoResult<()> {
        self.public_key.encode_binary(w)?;
        w.write_bool(self.registered)?;
        self.votes.encode_binary(w)
    }
}

impl Decodable for ValidatorState {
    fn decode_binary(r: &mut BinReader<'_>) -> IoResult<Self> {
        Ok(ValidatorState {
            public_key: PublicKey::decode_binary(r)?,
            registered: r.read_bool()?,
            votes: Fixed8::decode_binary(r)?,
        })
    }
}

/// Spent/claimed flags of one transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoinState(pub u8);

impl CoinState {
    pub const CONFIRMED: CoinState = CoinState(0);
    pub const SPENT: CoinState = CoinState(1 << 1);
    pub const CLAIMED: CoinState = CoinState(1 << 2);
    pub const FROZEN: CoinState = CoinState(1 << 5);

    pub fn is_spent(self) -> bool {
        self.0 & CoinState::SPENT.0 != 0
    }

    pub fn spend(&mut self) {
        self.0 |= CoinState::SPENT.0;
    }

    pub fn claim(&mut self) {
        self.0 |= CoinState::CLAIMED.0;
    }
}

/// Per-transaction bitmap of output states. Outputs are spent by flipping
/// bits here, never by deleting the record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnspentCoinState {
    pub states: Vec<CoinState>,
}

impl UnspentCoinState {
    pub fn new(outputs: usize) -> Self {
        UnspentCoinState {
            states: vec![CoinState::CONFIRMED; outputs],
        }
    }
}

impl Encodable for UnspentCoinState {
    fn encode_binary(&self, w: &mut BinWriter) -> IoResult<()> {
        w.write_var_uint(self.states.len() as u64)?;
        for state in &self.states {
            w.write_u8(state.0)?;
        }
        Ok(())
    }
}

impl Decodable for UnspentCoinState {
    fn decode_binary(r: &mut BinReader<'_>) -> IoResult<Self> {
        let len = r.read_var_uint()? as usize;
        let mut states = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            states.push(CoinState(r.read_u8()?));
        }
        Ok(UnspentCoinState { states })
    }
}

/// Claim bookkeeping: at which height each output of a transaction was
/// spent, kept until the owner claims the accrued utility tokens.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpentCoinState {
    pub tx_height: u32,
    /// Output index to spend height.
    pub items: HashMap<u16, u32>,
}

impl Encodable for SpentCoinState {
    fn encode_binary(&self, w: &mut BinWriter) -> IoResult<()> {
        w.write_u32_le(self.tx_height)?;
        let mut items: Vec<(&u16, &u32)> = self.items.iter().collect();
        items.sort();
        w.write_var_uint(items.len() as u64)?;
        for (index, height) in items {
            w.write_u16_le(*index)?;
            w.write_u32_le(*height)?;
        }
        Ok(())
    }
}

impl Decodable for SpentCoinState {
    fn decode_binary(r: &mut BinReader<'_>) -> IoResult<Self> {
        let tx_height = r.read_u32_le()?;
        let count = r.read_var_uint()? as usize;
        let mut items = HashMap::with_capacity(count.min(64));
        for _ in 0..count {
            let index = r.read_u16_le()?;
            let height = r.read_u32_le()?;
            items.insert(index, height);
        }
        Ok(SpentCoinState { tx_height, items })
    }
}

/// Items a script emitted through the notification hook, stored per
/// transaction in the VM wire form.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NotificationState {
    pub events: Vec<Vec<u8>>,
}

impl Encodable for NotificationState {
    fn encode_binary(&self, w: &mut BinWriter) -> IoResult<()> {
        w.write_var_uint(self.events.len() as u64)?;
        for event in &self.events {
            w.write_var_bytes(event)?;
        }
        Ok(())
    }
}

impl Decodable for NotificationState {
    fn decode_binary(r: &mut BinReader<'_>) -> IoResult<Self> {
        let count = r.read_var_uint()? as usize;
        let mut events = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            events.push(r.read_var_bytes()?);
        }
        Ok(NotificationState { events })
    }
}

/// A chunk of the header hash index, persisted every 2000 headers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeaderHashList {
    pub hashes: Vec<UInt256>,
}

impl Encodable for HeaderHashList {
    fn encode_binary(&self, w: &mut BinWriter) -> IoResult<()> {
        w.write_array(&self.hashes)
    }
}

impl Decodable for HeaderHashList {
    fn decode_binary(r: &mut BinReader<'_>) -> IoResult<Self> {
        Ok(HeaderHashList {
            hashes: r.read_array()?,
        })
    }
}

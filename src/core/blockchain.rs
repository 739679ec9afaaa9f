//! The append-only ledger: block persistence, state transitions and
//! transaction verification.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ProtocolConfig;
use crate::crypto::keys::{KeyError, PublicKey};
use crate::io::{self, BinReader, BinWriter, Decodable, Encodable, IoError};
use crate::util::{Fixed8, UInt160, UInt256};
use crate::vm::Vm;

use super::block::{Block, Header};
use super::genesis::{self, GenesisError};
use super::interop::{register_ledger_interops, InteropContext};
use super::mempool::{Feer, Mempool};
use super::state::{
    AccountState, AssetState, ContractState, NotificationState, SpentCoinState, StorageItem,
    UnspentCoinState, ValidatorState,
};
use super::storage::{CachedStore, KeyPrefix, StorageError, Store};
use super::transaction::{Input, Output, Transaction, TxData, TxType, Witness};

/// Stored under `SYSVersion`; mismatching databases are refused.
const DB_VERSION: &[u8] = b"cobalt-0.1";

/// Headers are flushed to `IXHeaderHashList` in chunks of this many.
const HEADER_BATCH_SIZE: usize = 2000;

/// Terminal failures of ledger operations.
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Codec(#[from] IoError),
    #[error(transparent)]
    Genesis(#[from] GenesisError),
    #[error("invalid standby validator key: {0}")]
    InvalidValidator(#[from] KeyError),
    #[error("database version mismatch (stored {stored:?})")]
    VersionMismatch { stored: String },
    #[error("block {0} already exists")]
    BlockAlreadyExists(UInt256),
    #[error("block index {got}, expected {want}")]
    InvalidBlockIndex { got: u32, want: u32 },
    #[error("block previous hash does not match the current tip")]
    InvalidPrevHash,
    #[error("block merkle root does not match its transactions")]
    InvalidMerkleRoot,
    #[error("invalid block witness: {0}")]
    InvalidWitness(String),
    #[error("header {index} does not link to the current header chain")]
    HeaderNotLinked { index: u32 },
    #[error("transaction {hash} failed verification: {reason}")]
    TxVerification { hash: UInt256, reason: VerifyError },
    #[error("not found")]
    NotFound,
}

/// Policy outcomes of transaction verification, surfaced to relayers.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("transaction is already on the chain")]
    AlreadyInChain,
    #[error("an input is used twice")]
    DuplicateInputs,
    #[error("input {0:?} references a missing output")]
    MissingReference(Input),
    #[error("input is already spent")]
    DoubleSpend,
    #[error("account {0} is frozen")]
    FrozenAccount(UInt160),
    #[error("outputs of asset {0} exceed inputs")]
    InsufficientFunds(UInt256),
    #[error("network fee below the configured minimum")]
    InsufficientNetworkFee,
    #[error("asset {0} is not registered")]
    UnknownAsset(UInt256),
    #[error("issue exceeds the available supply of {0}")]
    IssueOverflow(UInt256),
    #[error("no witness for script hash {0}")]
    MissingWitness(UInt160),
    #[error("witness for {0} did not verify")]
    WitnessFailed(UInt160),
    #[error("internal failure during verification: {0}")]
    Internal(String),
}

impl From<StorageError> for VerifyError {
    fn from(e: StorageError) -> Self {
        VerifyError::Internal(e.to_string())
    }
}

impl From<IoError> for VerifyError {
    fn from(e: IoError) -> Self {
        VerifyError::Internal(e.to_string())
    }
}

impl From<BlockchainError> for VerifyError {
    fn from(e: BlockchainError) -> Self {
        VerifyError::Internal(e.to_string())
    }
}

#[derive(Default)]
struct ChainState {
    /// Hash of every known header, indexed by height.
    header_hashes: Vec<UInt256>,
    /// How many of those have been flushed as chunks.
    stored_header_count: usize,
    block_height: u32,
}

impl ChainState {
    fn header_height(&self) -> u32 {
        self.header_hashes.len().saturating_sub(1) as u32
    }
}

/// The chain: a cached store over the backing database, the in-memory
/// header index and the mempool. One writer (the block queue) mutates it;
/// readers are concurrent.
pub struct Blockchain {
    protocol: ProtocolConfig,
    store: Arc<CachedStore>,
    inner: RwLock<ChainState>,
    mempool: Mempool,
    validators: Vec<PublicKey>,
    genesis: Block,
}

impl Blockchain {
    /// Opens the chain over `base`, creating and persisting the genesis
    /// block on first use.
    pub fn new(
        base: Arc<dyn Store>,
        protocol: ProtocolConfig,
        mempool_capacity: usize,
    ) -> Result<Self, BlockchainError> {
        let validators = protocol
            .standby_validators
            .iter()
            .map(|s| PublicKey::from_hex(s))
            .collect::<Result<Vec<_>, _>>()?;
        let genesis = genesis::create_genesis_block(&validators)?;
        let chain = Blockchain {
            protocol,
            store: Arc::new(CachedStore::new(base)),
            inner: RwLock::new(ChainState::default()),
            mempool: Mempool::new(mempool_capacity),
            validators,
            genesis,
        };

        match chain.store.get(&KeyPrefix::SYSVersion.bytes())? {
            None => {
                chain
                    .store
                    .put(&KeyPrefix::SYSVersion.bytes(), DB_VERSION)?;
                chain.bootstrap_genesis()?;
            }
            Some(v) if v == DB_VERSION => chain.load_state()?,
            Some(v) => {
                return Err(BlockchainError::VersionMismatch {
                    stored: String::from_utf8_lossy(&v).into_owned(),
                })
            }
        }
        info!(
            height = chain.block_height(),
            header_height = chain.header_height(),
            "blockchain initialized"
        );
        Ok(chain)
    }

    pub fn genesis_block(&self) -> &Block {
        &self.genesis
    }

    pub fn standby_validators(&self) -> &[PublicKey] {
        &self.validators
    }

    pub fn protocol(&self) -> &ProtocolConfig {
        &self.protocol
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    pub fn block_height(&self) -> u32 {
        self.inner.read().block_height
    }

    pub fn header_height(&self) -> u32 {
        self.inner.read().header_height()
    }

    pub fn current_block_hash(&self) -> UInt256 {
        let inner = self.inner.read();
        inner.header_hashes[inner.block_height as usize]
    }

    pub fn current_header_hash(&self) -> UInt256 {
        let inner = self.inner.read();
        *inner.header_hashes.last().expect("genesis is always present")
    }

    /// Hash of the header at the given height, if known.
    pub fn get_header_hash(&self, index: u32) -> Option<UInt256> {
        self.inner.read().header_hashes.get(index as usize).copied()
    }

    fn bootstrap_genesis(&self) -> Result<(), BlockchainError> {
        let genesis = self.genesis.clone();
        {
            let mut inner = self.inner.write();
            inner.header_hashes.push(genesis.hash());
            inner.block_height = 0;
        }
        self.store_block(&genesis)?;
        self.write_header_pointer(&genesis.hash(), 0)?;
        Ok(())
    }

    fn load_state(&self) -> Result<(), BlockchainError> {
        let mut inner = self.inner.write();

        // Header hashes come back from the persisted chunks first.
        let mut hashes: Vec<UInt256> = Vec::new();
        for (_key, value) in self.store.seek(&KeyPrefix::IXHeaderHashList.bytes())? {
            let chunk: super::state::HeaderHashList = io::from_bytes(&value)?;
            hashes.extend(chunk.hashes);
        }
        inner.stored_header_count = hashes.len();

        // The unchunked tail is recovered by walking back from the
        // current header pointer.
        let (header_hash, header_index) = self
            .read_pointer(KeyPrefix::SYSCurrentHeader)?
            .ok_or(BlockchainError::NotFound)?;
        if (header_index as usize) >= hashes.len() {
            let mut tail = Vec::new();
            let mut cursor = header_hash;
            for _ in hashes.len()..=header_index as usize {
                let header = self
                    .get_header(&cursor)?
                    .ok_or(BlockchainError::NotFound)?;
                tail.push(header.hash());
                cursor = header.base.prev_hash;
            }
            tail.reverse();
            hashes.extend(tail);
        }

        let (_, block_index) = self
            .read_pointer(KeyPrefix::SYSCurrentBlock)?
            .ok_or(BlockchainError::NotFound)?;
        inner.block_height = block_index;
        inner.header_hashes = hashes;
        Ok(())
    }

    fn read_pointer(
        &self,
        prefix: KeyPrefix,
    ) -> Result<Option<(UInt256, u32)>, BlockchainError> {
        let Some(value) = self.store.get(&prefix.bytes())? else {
            return Ok(None);
        };
        let mut r = BinReader::new(&value);
        let mut hash_bytes = [0u8; 32];
        r.read_into(&mut hash_bytes)?;
        hash_bytes.reverse();
        let index = r.read_u32_le()?;
        Ok(Some((UInt256(hash_bytes), index)))
    }

    fn write_pointer(
        &self,
        store: &dyn Store,
        prefix: KeyPrefix,
        hash: &UInt256,
        index: u32,
    ) -> Result<(), BlockchainError> {
        let mut w = BinWriter::new();
        w.write_bytes(&hash.bytes_reversed())?;
        w.write_u32_le(index)?;
        store.put(&prefix.bytes(), &w.into_bytes())?;
        Ok(())
    }

    fn write_header_pointer(&self, hash: &UInt256, index: u32) -> Result<(), BlockchainError> {
        self.write_pointer(self.store.as_ref(), KeyPrefix::SYSCurrentHeader, hash, index)
    }

    /// Appends headers in order. A header below the current height is
    /// ignored; one that does not extend the chain is an error.
    pub fn add_headers(&self, headers: &[Header]) -> Result<(), BlockchainError> {
        for header in headers {
            let mut inner = self.inner.write();
            let header_height = inner.header_height();
            if header.base.index <= header_height {
                continue;
            }
            if header.base.index != header_height + 1
                || header.base.prev_hash != *inner.header_hashes.last().unwrap()
            {
                return Err(BlockchainError::HeaderNotLinked {
                    index: header.base.index,
                });
            }
            let hash = header.hash();
            self.store.put(
                &KeyPrefix::DataBlock.key(&hash.bytes_reversed()),
                &io::to_bytes(header)?,
            )?;
            inner.header_hashes.push(hash);
            self.write_header_pointer(&hash, header.base.index)?;
            self.flush_header_chunks(&mut inner)?;
        }
        debug!(header_height = self.header_height(), "headers appended");
        Ok(())
    }

    fn flush_header_chunks(&self, inner: &mut ChainState) -> Result<(), BlockchainError> {
        while inner.header_hashes.len() - inner.stored_header_count >= HEADER_BATCH_SIZE {
            let start = inner.stored_header_count;
            let chunk = super::state::HeaderHashList {
                hashes: inner.header_hashes[start..start + HEADER_BATCH_SIZE].to_vec(),
            };
            let key = KeyPrefix::IXHeaderHashList.key(&(start as u32).to_be_bytes());
            self.store.put(&key, &io::to_bytes(&chunk)?)?;
            inner.stored_header_count += HEADER_BATCH_SIZE;
        }
        Ok(())
    }

    /// Validates and persists the next block. The caller (the block
    /// queue) is responsible for index ordering; anything that is not
    /// exactly the next block is refused.
    pub fn add_block(&self, block: &Block) -> Result<(), BlockchainError> {
        let height = self.block_height();
        if block.index() <= height {
            return Err(BlockchainError::BlockAlreadyExists(block.hash()));
        }
        if block.index() != height + 1 {
            return Err(BlockchainError::InvalidBlockIndex {
                got: block.index(),
                want: height + 1,
            });
        }
        if block.base.prev_hash != self.current_block_hash() {
            return Err(BlockchainError::InvalidPrevHash);
        }
        if !block.verify_merkle_root() {
            return Err(BlockchainError::InvalidMerkleRoot);
        }
        if self.protocol.verify_blocks {
            self.verify_block_witness(block)?;
        }
        if self.protocol.verify_transactions {
            for tx in &block.transactions {
                if !matches!(tx.data, TxData::Miner { .. }) {
                    self.verify_tx(tx).map_err(|reason| {
                        BlockchainError::TxVerification {
                            hash: tx.hash(),
                            reason,
                        }
                    })?;
                }
            }
        }

        self.store_block(block)?;

        let hash = block.hash();
        {
            let mut inner = self.inner.write();
            inner.block_height = block.index();
            if block.index() as usize == inner.header_hashes.len() {
                inner.header_hashes.push(hash);
                self.write_header_pointer(&hash, block.index())?;
                self.flush_header_chunks(&mut inner)?;
            }
        }
        self.mempool.remove_persisted(&block.transactions);
        info!(index = block.index(), %hash, txs = block.transactions.len(), "block persisted");
        Ok(())
    }

    /// The witness of a block must answer for the previous block's
    /// next-consensus commitment and leave true on the stack.
    fn verify_block_witness(&self, block: &Block) -> Result<(), BlockchainError> {
        let prev = self
            .get_header(&block.base.prev_hash)?
            .ok_or(BlockchainError::InvalidPrevHash)?;
        let expected = prev.base.next_consensus;
        if block.base.script.script_hash() != expected {
            return Err(BlockchainError::InvalidWitness(format!(
                "witness hash does not match next consensus {expected}"
            )));
        }
        let mut vm = Vm::new();
        vm.set_checked_hash(block.hash());
        vm.load_script(block.base.script.verification_script.clone());
        vm.load_script(block.base.script.invocation_script.clone());
        if vm.run().is_err() || !vm.has_halted() {
            return Err(BlockchainError::InvalidWitness("script faulted".into()));
        }
        match vm.pop_result().map(|item| item.to_bool()) {
            Some(Ok(true)) => Ok(()),
            _ => Err(BlockchainError::InvalidWitness(
                "script did not return true".into(),
            )),
        }
    }

    /// Applies the whole block to the ledger inside one overlay; either
    /// every effect persists or none does.
    fn store_block(&self, block: &Block) -> Result<(), BlockchainError> {
        let base: Arc<dyn Store> = self.store.clone();
        let overlay = Arc::new(CachedStore::new(base));
        let governing_id = genesis::governing_token_tx().hash();

        overlay.put(
            &KeyPrefix::DataBlock.key(&block.hash().bytes_reversed()),
            &io::to_bytes(block)?,
        )?;

        for tx in &block.transactions {
            let tx_hash = tx.hash();
            let mut record = BinWriter::new();
            record.write_u32_le(block.index())?;
            tx.encode_binary(&mut record)?;
            overlay.put(
                &KeyPrefix::DataTransaction.key(&tx_hash.bytes_reversed()),
                &record.into_bytes(),
            )?;
            put_unspent_coins(
                overlay.as_ref(),
                &tx_hash,
                &UnspentCoinState::new(tx.outputs.len()),
            )?;

            for output in &tx.outputs {
                let mut account = get_account(overlay.as_ref(), &output.script_hash)?
                    .unwrap_or_else(|| AccountState::new(output.script_hash));
                let balance = account.balance(&output.asset_id);
                account.balances.insert(output.asset_id, balance + output.amount);
                put_account(overlay.as_ref(), &account)?;
            }

            for input in &tx.inputs {
                let (prev_tx, prev_height) = get_transaction(overlay.as_ref(), &input.prev_hash)?
                    .ok_or_else(|| BlockchainError::TxVerification {
                        hash: tx_hash,
                        reason: VerifyError::MissingReference(*input),
                    })?;
                let mut unspent = get_unspent_coins(overlay.as_ref(), &input.prev_hash)?
                    .ok_or_else(|| BlockchainError::TxVerification {
                        hash: tx_hash,
                        reason: VerifyError::MissingReference(*input),
                    })?;
                let index = input.prev_index as usize;
                if index >= unspent.states.len() || unspent.states[index].is_spent() {
                    return Err(BlockchainError::TxVerification {
                        hash: tx_hash,
                        reason: VerifyError::DoubleSpend,
                    });
                }
                unspent.states[index].spend();
                put_unspent_coins(overlay.as_ref(), &input.prev_hash, &unspent)?;

                let prev_out = &prev_tx.outputs[index];
                if prev_out.asset_id == governing_id {
                    let mut spent = get_spent_coins(overlay.as_ref(), &input.prev_hash)?
                        .unwrap_or(SpentCoinState {
                            tx_height: prev_height,
                            items: HashMap::new(),
                        });
                    spent.items.insert(input.prev_index, block.index());
                    put_spent_coins(overlay.as_ref(), &input.prev_hash, &spent)?;
                }

                let mut account = get_account(overlay.as_ref(), &prev_out.script_hash)?
                    .unwrap_or_else(|| AccountState::new(prev_out.script_hash));
                let balance = account.balance(&prev_out.asset_id) - prev_out.amount;
                if balance == Fixed8::ZERO {
                    account.balances.remove(&prev_out.asset_id);
                } else {
                    account.balances.insert(prev_out.asset_id, balance);
                }
                put_account(overlay.as_ref(), &account)?;
            }

            self.apply_tx_data(overlay.clone(), block, tx)?;
        }

        self.write_pointer(
            overlay.as_ref(),
            KeyPrefix::SYSCurrentBlock,
            &block.hash(),
            block.index(),
        )?;
        overlay.persist()?;
        Ok(())
    }

    fn apply_tx_data(
        &self,
        overlay: Arc<CachedStore>,
        block: &Block,
        tx: &Transaction,
    ) -> Result<(), BlockchainError> {
        match &tx.data {
            TxData::Miner { .. } | TxData::Contract => {}
            TxData::Register(data) => {
                let asset = AssetState {
                    id: tx.hash(),
                    asset_type: data.asset_type,
                    name: data.name.clone(),
                    amount: data.amount,
                    available: Fixed8::ZERO,
                    precision: data.precision,
                    fee_mode: 0,
                    owner: data.owner.clone(),
                    admin: data.admin,
                    issuer: data.admin,
                    expiration: block.index() + 4_000_000,
                    is_frozen: false,
                };
                put_asset(overlay.as_ref(), &asset)?;
            }
            TxData::Issue => {
                for output in &tx.outputs {
                    if let Some(mut asset) = get_asset(overlay.as_ref(), &output.asset_id)? {
                        asset.available += output.amount;
                        put_asset(overlay.as_ref(), &asset)?;
                    }
                }
            }
            TxData::Claim { claims } => {
                for claim in claims {
                    if let Some(mut spent) = get_spent_coins(overlay.as_ref(), &claim.prev_hash)? {
                        spent.items.remove(&claim.prev_index);
                        if spent.items.is_empty() {
                            delete_spent_coins(overlay.as_ref(), &claim.prev_hash)?;
                        } else {
                            put_spent_coins(overlay.as_ref(), &claim.prev_hash, &spent)?;
                        }
                    }
                }
            }
            TxData::Enrollment { public_key } => {
                put_validator(
                    overlay.as_ref(),
                    &ValidatorState {
                        public_key: public_key.clone(),
                        registered: true,
                        votes: Fixed8::ZERO,
                    },
                )?;
            }
            TxData::Vote { account, votes } => {
                let mut state = get_account(overlay.as_ref(), account)?
                    .unwrap_or_else(|| AccountState::new(*account));
                state.votes = votes.clone();
                put_account(overlay.as_ref(), &state)?;
            }
            TxData::Publish(data) => {
                let contract = ContractState {
                    script: data.script.clone(),
                    param_list: data.param_list.clone(),
                    return_type: data.return_type,
                    properties: data.properties(),
                    name: data.name.clone(),
                    code_version: data.code_version.clone(),
                    author: data.author.clone(),
                    email: data.email.clone(),
                    description: data.description.clone(),
                };
                let key = KeyPrefix::STContract.key(&contract.script_hash().bytes());
                overlay.put(&key, &io::to_bytes(&contract)?)?;
            }
            TxData::Invocation { script, .. } => {
                self.run_invocation(overlay, block, tx, script)?;
            }
        }
        Ok(())
    }

    /// Runs an invocation script against a script-level overlay; state
    /// changes and notifications persist only on a clean halt. A fault
    /// rejects the script, not the block.
    fn run_invocation(
        &self,
        overlay: Arc<CachedStore>,
        block: &Block,
        tx: &Transaction,
        script: &[u8],
    ) -> Result<(), BlockchainError> {
        let script_store: Arc<dyn Store> = overlay.clone();
        let script_overlay = Arc::new(CachedStore::new(script_store));
        let witnesses: Vec<UInt160> = tx.scripts.iter().map(|w| w.script_hash()).collect();

        let mut vm = Vm::new();
        register_ledger_interops(
            &mut vm,
            InteropContext {
                store: script_overlay.clone(),
                height: block.index(),
                timestamp: block.base.timestamp,
                witnesses,
            },
        );
        vm.set_checked_hash(tx.sighash());
        vm.load(script.to_vec());
        match vm.run() {
            Ok(()) if vm.has_halted() => {
                let events: Vec<Vec<u8>> = vm
                    .take_notifications()
                    .iter()
                    .filter_map(|item| crate::vm::serialization::serialize_item(item).ok())
                    .collect();
                if !events.is_empty() {
                    let state = NotificationState { events };
                    script_overlay.put(
                        &KeyPrefix::STNotification.key(&tx.hash().bytes_reversed()),
                        &io::to_bytes(&state)?,
                    )?;
                }
                script_overlay.persist()?;
            }
            result => {
                script_overlay.discard();
                warn!(tx = %tx.hash(), ?result, "invocation script faulted");
            }
        }
        Ok(())
    }

    // -- queries ----------------------------------------------------------

    pub fn get_block(&self, hash: &UInt256) -> Result<Option<Block>, BlockchainError> {
        let key = KeyPrefix::DataBlock.key(&hash.bytes_reversed());
        let Some(record) = self.store.get(&key)? else {
            return Ok(None);
        };
        let block: Block = io::from_bytes(&record)?;
        // A header-only record decodes as a block without transactions.
        if block.transactions.is_empty() {
            return Ok(None);
        }
        Ok(Some(block))
    }

    pub fn get_header(&self, hash: &UInt256) -> Result<Option<Header>, BlockchainError> {
        let key = KeyPrefix::DataBlock.key(&hash.bytes_reversed());
        let Some(record) = self.store.get(&key)? else {
            return Ok(None);
        };
        let block: Block = io::from_bytes(&record)?;
        Ok(Some(block.header()))
    }

    pub fn get_transaction(
        &self,
        hash: &UInt256,
    ) -> Result<Option<(Transaction, u32)>, BlockchainError> {
        Ok(get_transaction(self.store.as_ref(), hash)?)
    }

    pub fn has_transaction(&self, hash: &UInt256) -> bool {
        let key = KeyPrefix::DataTransaction.key(&hash.bytes_reversed());
        matches!(self.store.get(&key), Ok(Some(_)))
    }

    pub fn get_account_state(
        &self,
        script_hash: &UInt160,
    ) -> Result<Option<AccountState>, BlockchainError> {
        Ok(get_account(self.store.as_ref(), script_hash)?)
    }

    pub fn get_asset_state(&self, id: &UInt256) -> Result<Option<AssetState>, BlockchainError> {
        Ok(get_asset(self.store.as_ref(), id)?)
    }

    pub fn get_contract_state(
        &self,
        script_hash: &UInt160,
    ) -> Result<Option<ContractState>, BlockchainError> {
        let key = KeyPrefix::STContract.key(&script_hash.bytes());
        match self.store.get(&key)? {
            Some(data) => Ok(Some(io::from_bytes(&data)?)),
            None => Ok(None),
        }
    }

    pub fn get_storage_item(
        &self,
        script_hash: &UInt160,
        key: &[u8],
    ) -> Result<Option<StorageItem>, BlockchainError> {
        let mut suffix = script_hash.bytes().to_vec();
        suffix.extend_from_slice(key);
        match self.store.get(&KeyPrefix::STStorage.key(&suffix))? {
            Some(data) => Ok(Some(io::from_bytes(&data)?)),
            None => Ok(None),
        }
    }

    pub fn get_unspent_coin_state(
        &self,
        tx_hash: &UInt256,
    ) -> Result<Option<UnspentCoinState>, BlockchainError> {
        Ok(get_unspent_coins(self.store.as_ref(), tx_hash)?)
    }

    /// Flushes the chain cache to the backing store.
    pub fn persist(&self) -> Result<usize, BlockchainError> {
        let flushed = self.store.persist()?;
        if flushed > 0 {
            debug!(entries = flushed, "persisted chain state");
        }
        Ok(flushed)
    }

    // -- verification ------------------------------------------------------

    /// Resolves every input of a transaction to the output it spends.
    pub fn references(
        &self,
        tx: &Transaction,
    ) -> Result<HashMap<Input, Output>, VerifyError> {
        let mut refs = HashMap::new();
        for input in &tx.inputs {
            let (prev_tx, _) = get_transaction(self.store.as_ref(), &input.prev_hash)?
                .ok_or(VerifyError::MissingReference(*input))?;
            let output = prev_tx
                .outputs
                .get(input.prev_index as usize)
                .copied()
                .ok_or(VerifyError::MissingReference(*input))?;
            refs.insert(*input, output);
        }
        Ok(refs)
    }

    /// Full policy verification of a standalone transaction against the
    /// current chain state.
    pub fn verify_tx(&self, tx: &Transaction) -> Result<(), VerifyError> {
        if self.has_transaction(&tx.hash()) {
            return Err(VerifyError::AlreadyInChain);
        }
        let mut seen = HashSet::new();
        for input in &tx.inputs {
            if !seen.insert(*input) {
                return Err(VerifyError::DuplicateInputs);
            }
        }

        let refs = self.references(tx)?;
        for input in &tx.inputs {
            let unspent = get_unspent_coins(self.store.as_ref(), &input.prev_hash)?
                .ok_or(VerifyError::MissingReference(*input))?;
            match unspent.states.get(input.prev_index as usize) {
                None => return Err(VerifyError::MissingReference(*input)),
                Some(state) if state.is_spent() => return Err(VerifyError::DoubleSpend),
                Some(_) => {}
            }
        }
        for output in refs.values() {
            if let Some(account) = get_account(self.store.as_ref(), &output.script_hash)? {
                if account.is_frozen {
                    return Err(VerifyError::FrozenAccount(output.script_hash));
                }
            }
        }

        self.check_results(tx, &refs)?;

        if self.is_low_priority(tx)
            && self.network_fee(tx) < self.protocol.minimum_network_fee
        {
            return Err(VerifyError::InsufficientNetworkFee);
        }

        self.verify_witnesses(tx, &refs)
    }

    /// Per-asset input/output balance rules.
    fn check_results(
        &self,
        tx: &Transaction,
        refs: &HashMap<Input, Output>,
    ) -> Result<(), VerifyError> {
        let mut results: HashMap<UInt256, Fixed8> = HashMap::new();
        for output in refs.values() {
            *results.entry(output.asset_id).or_default() += output.amount;
        }
        for output in &tx.outputs {
            *results.entry(output.asset_id).or_default() -= output.amount;
        }

        let utility_id = genesis::utility_token_tx().hash();
        for (asset_id, result) in results {
            if !result.is_negative() {
                continue;
            }
            // Creating value is reserved for issuance and claims.
            match tx.tx_type() {
                TxType::Issue => {
                    let asset = get_asset(self.store.as_ref(), &asset_id)?
                        .ok_or(VerifyError::UnknownAsset(asset_id))?;
                    let issued = asset.available.checked_sub(result).ok_or(
                        VerifyError::IssueOverflow(asset_id),
                    )?;
                    if issued > asset.amount {
                        return Err(VerifyError::IssueOverflow(asset_id));
                    }
                }
                TxType::Claim if asset_id == utility_id => {}
                TxType::Miner if asset_id == utility_id => {}
                _ => return Err(VerifyError::InsufficientFunds(asset_id)),
            }
        }
        Ok(())
    }

    /// The script hashes a transaction must provide witnesses for.
    fn script_hashes_for_verifying(
        &self,
        tx: &Transaction,
        refs: &HashMap<Input, Output>,
    ) -> Result<Vec<UInt160>, VerifyError> {
        let mut hashes: HashSet<UInt160> =
            refs.values().map(|output| output.script_hash).collect();
        for attr in &tx.attributes {
            if attr.usage == super::transaction::AttrUsage::Script {
                if let Some(hash) = UInt160::from_slice(&attr.data) {
                    hashes.insert(hash);
                }
            }
        }
        match &tx.data {
            TxData::Enrollment { public_key } => {
                hashes.insert(public_key.script_hash());
            }
            TxData::Vote { account, .. } => {
                hashes.insert(*account);
            }
            TxData::Issue => {
                for output in &tx.outputs {
                    let asset = get_asset(self.store.as_ref(), &output.asset_id)?
                        .ok_or(VerifyError::UnknownAsset(output.asset_id))?;
                    hashes.insert(asset.issuer);
                }
            }
            _ => {}
        }
        let mut sorted: Vec<UInt160> = hashes.into_iter().collect();
        sorted.sort();
        Ok(sorted)
    }

    /// Executes `invocation ‖ verification` for every required hash with
    /// the transaction's sighash as the checked digest.
    fn verify_witnesses(
        &self,
        tx: &Transaction,
        refs: &HashMap<Input, Output>,
    ) -> Result<(), VerifyError> {
        let hashes = self.script_hashes_for_verifying(tx, refs)?;
        for hash in hashes {
            let witness = tx
                .scripts
                .iter()
                .find(|w| {
                    if w.verification_script.is_empty() {
                        false
                    } else {
                        w.script_hash() == hash
                    }
                })
                .cloned()
                .or_else(|| self.contract_witness(tx, &hash));
            let Some(witness) = witness else {
                return Err(VerifyError::MissingWitness(hash));
            };
            if !self.execute_witness(&witness, &tx.sighash()) {
                return Err(VerifyError::WitnessFailed(hash));
            }
        }
        Ok(())
    }

    /// A witness with an empty verification script defers to the deployed
    /// contract with the expected hash.
    fn contract_witness(&self, tx: &Transaction, hash: &UInt160) -> Option<Witness> {
        let contract = self.get_contract_state(hash).ok().flatten()?;
        let invocation = tx
            .scripts
            .iter()
            .find(|w| w.verification_script.is_empty())?
            .invocation_script
            .clone();
        Some(Witness {
            invocation_script: invocation,
            verification_script: contract.script,
        })
    }

    fn execute_witness(&self, witness: &Witness, sighash: &UInt256) -> bool {
        let mut vm = Vm::new();
        vm.set_checked_hash(*sighash);
        let store = self.store.clone();
        vm.set_script_getter(Box::new(move |script_hash| {
            let key = KeyPrefix::STContract.key(&script_hash.bytes());
            store
                .get(&key)
                .ok()
                .flatten()
                .and_then(|data| io::from_bytes::<ContractState>(&data).ok())
                .map(|contract| contract.script)
        }));
        vm.load_script(witness.verification_script.clone());
        vm.load_script(witness.invocation_script.clone());
        if vm.run().is_err() || !vm.has_halted() || vm.estack_len() != 1 {
            return false;
        }
        matches!(vm.pop_result().map(|item| item.to_bool()), Some(Ok(true)))
    }
}

impl Feer for Blockchain {
    fn network_fee(&self, tx: &Transaction) -> Fixed8 {
        match tx.tx_type() {
            TxType::Miner | TxType::Claim => return Fixed8::ZERO,
            _ => {}
        }
        let Ok(refs) = self.references(tx) else {
            return Fixed8::ZERO;
        };
        let utility_id = genesis::utility_token_tx().hash();
        let input: Fixed8 = refs
            .values()
            .filter(|o| o.asset_id == utility_id)
            .map(|o| o.amount)
            .sum();
        let output = tx.output_amount(&utility_id);
        input
            .checked_sub(output)
            .filter(|fee| !fee.is_negative())
            .unwrap_or(Fixed8::ZERO)
    }

    fn fee_per_byte(&self, tx: &Transaction) -> Fixed8 {
        let size = tx.size().max(1) as i64;
        Fixed8::from_raw(self.network_fee(tx).raw() / size)
    }

    fn is_low_priority(&self, tx: &Transaction) -> bool {
        // Claims pay no fee but are never deprioritized.
        if tx.tx_type() == TxType::Claim {
            return false;
        }
        self.network_fee(tx) < self.protocol.low_priority_threshold
    }

    fn system_fee(&self, tx: &Transaction) -> Fixed8 {
        // Per-type deployment fees are a policy concern the core chain
        // does not charge.
        let _ = tx;
        Fixed8::ZERO
    }
}

// -- typed store accessors -----------------------------------------------

fn get_account(
    store: &dyn Store,
    script_hash: &UInt160,
) -> Result<Option<AccountState>, BlockchainError> {
    let key = KeyPrefix::STAccount.key(&script_hash.bytes());
    match store.get(&key)? {
        Some(data) => Ok(Some(io::from_bytes(&data)?)),
        None => Ok(None),
    }
}

fn put_account(store: &dyn Store, account: &AccountState) -> Result<(), BlockchainError> {
    let key = KeyPrefix::STAccount.key(&account.script_hash.bytes());
    store.put(&key, &io::to_bytes(account)?)?;
    Ok(())
}

fn get_asset(store: &dyn Store, id: &UInt256) -> Result<Option<AssetState>, BlockchainError> {
    let key = KeyPrefix::STAsset.key(&id.bytes_reversed());
    match store.get(&key)? {
        Some(data) => Ok(Some(io::from_bytes(&data)?)),
        None => Ok(None),
    }
}

fn put_asset(store: &dyn Store, asset: &AssetState) -> Result<(), BlockchainError> {
    let key = KeyPrefix::STAsset.key(&asset.id.bytes_reversed());
    store.put(&key, &io::to_bytes(asset)?)?;
    Ok(())
}

fn get_transaction(
    store: &dyn Store,
    hash: &UInt256,
) -> Result<Option<(Transaction, u32)>, BlockchainError> {
    let key = KeyPrefix::DataTransaction.key(&hash.bytes_reversed());
    let Some(record) = store.get(&key)? else {
        return Ok(None);
    };
    let mut r = BinReader::new(&record);
    let height = r.read_u32_le()?;
    let tx = Transaction::decode_binary(&mut r)?;
    Ok(Some((tx, height)))
}

fn get_unspent_coins(
    store: &dyn Store,
    tx_hash: &UInt256,
) -> Result<Option<UnspentCoinState>, BlockchainError> {
    let key = KeyPrefix::STCoin.key(&tx_hash.bytes_reversed());
    match store.get(&key)? {
        Some(data) => Ok(Some(io::from_bytes(&data)?)),
        None => Ok(None),
    }
}

fn put_unspent_coins(
    store: &dyn Store,
    tx_hash: &UInt256,
    coins: &UnspentCoinState,
) -> Result<(), BlockchainError> {
    let key = KeyPrefix::STCoin.key(&tx_hash.bytes_reversed());
    store.put(&key, &io::to_bytes(coins)?)?;
    Ok(())
}

fn get_spent_coins(
    store: &dyn Store,
    tx_hash: &UInt256,
) -> Result<Option<SpentCoinState>, BlockchainError> {
    let key = KeyPrefix::STSpentCoin.key(&tx_hash.bytes_reversed());
    match store.get(&key)? {
        Some(data) => Ok(Some(io::from_bytes(&data)?)),
        None => Ok(None),
    }
}

fn put_spent_coins(
    store: &dyn Store,
    tx_hash: &UInt256,
    spent: &SpentCoinState,
) -> Result<(), BlockchainError> {
    let key = KeyPrefix::STSpentCoin.key(&tx_hash.bytes_reversed());
    store.put(&key, &io::to_bytes(spent)?)?;
    Ok(())
}

fn delete_spent_coins(store: &dyn Store, tx_hash: &UInt256) -> Result<(), BlockchainError> {
    store.delete(&KeyPrefix::STSpentCoin.key(&tx_hash.bytes_reversed()))?;
    Ok(())
}

fn put_validator(store: &dyn Store, validator: &ValidatorState) -> Result<(), BlockchainError> {
    let key = KeyPrefix::STValidator.key(&validator.public_key.to_bytes());
    store.put(&key, &io::to_bytes(validator)?)?;
    Ok(())
}


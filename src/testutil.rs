//! Shared fixtures for integration tests and benchmarks: a private chain
//! with in-memory storage and helpers to forge validly signed blocks.

use std::sync::Arc;

use crate::config::ProtocolConfig;
use crate::core::block::{Block, BlockBase};
use crate::core::storage::MemoryStore;
use crate::core::transaction::{Transaction, TxData, Witness};
use crate::core::Blockchain;
use crate::crypto::keys::{KeyPair, PublicKey};
use crate::smartcontract;

/// A chain over an in-memory store together with the validator keys able
/// to sign its blocks.
pub struct TestChain {
    pub chain: Arc<Blockchain>,
    pub validators: Vec<KeyPair>,
}

/// Spins up a private chain with `n` fresh standby validators.
pub fn new_test_chain(n: usize) -> TestChain {
    let validators: Vec<KeyPair> = (0..n).map(|_| KeyPair::random()).collect();
    let mut protocol = ProtocolConfig::default();
    protocol.standby_validators = validators
        .iter()
        .map(|pair| pair.public_key().to_string())
        .collect();
    let chain = Blockchain::new(Arc::new(MemoryStore::new()), protocol, 1000)
        .expect("test chain construction");
    TestChain {
        chain: Arc::new(chain),
        validators,
    }
}

impl TestChain {
    fn consensus_threshold(&self) -> usize {
        let n = self.validators.len();
        n - (n - 1) / 3
    }

    fn sorted_signers(&self) -> Vec<&KeyPair> {
        let mut keys: Vec<PublicKey> = self
            .validators
            .iter()
            .map(|pair| pair.public_key().clone())
            .collect();
        keys.sort();
        keys.iter()
            .map(|key| {
                self.validators
                    .iter()
                    .find(|pair| pair.public_key() == key)
                    .expect("signer for sorted key")
            })
            .collect()
    }

    /// Builds the next block on the current tip, carrying the given
    /// transactions after the customary miner seed, signed by enough
    /// validators to satisfy the consensus witness.
    pub fn next_block(&self, txs: Vec<Transaction>) -> Block {
        let index = self.chain.block_height() + 1;
        let prev_hash = self.chain.current_block_hash();
        let prev = self
            .chain
            .get_header(&prev_hash)
            .expect("tip header readable")
            .expect("tip header present");

        let mut transactions = vec![Transaction::new(TxData::Miner { nonce: index })];
        transactions.extend(txs);

        let keys: Vec<PublicKey> = self
            .validators
            .iter()
            .map(|pair| pair.public_key().clone())
            .collect();
        let m = self.consensus_threshold();
        let verification = smartcontract::create_multisig_redeem_script(m, &keys)
            .expect("consensus redeem script");

        let mut block = Block {
            base: BlockBase {
                version: 0,
                prev_hash,
                merkle_root: Default::default(),
                timestamp: prev.base.timestamp + 15,
                index,
                consensus_data: index as u64,
                next_consensus: prev.base.next_consensus,
                script: Witness::default(),
            },
            transactions,
        };
        block.rebuild_merkle_root().expect("merkle root");

        let sighash = block.hash();
        let mut invocation = crate::vm::ScriptBuilder::new();
        for signer in self.sorted_signers().into_iter().take(m) {
            invocation
                .emit_push_bytes(&signer.sign(&sighash))
                .expect("signature push");
        }
        block.base.script = Witness {
            invocation_script: invocation.into_script(),
            verification_script: verification,
        };
        block
    }

    /// Builds and immediately ingests `count` empty blocks.
    pub fn grow(&self, count: u32) {
        for _ in 0..count {
            let block = self.next_block(Vec::new());
            self.chain.add_block(&block).expect("test block accepted");
        }
    }
}

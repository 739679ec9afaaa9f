//! Deterministic genesis block construction.

use once_cell::sync::Lazy;
use thiserror::Error;

use crate::crypto::hash;
use crate::crypto::keys::PublicKey;
use crate::smartcontract::{self, RedeemScriptError};
use crate::util::Fixed8;
use crate::vm::{PUSHF, PUSHT};

use super::block::{Block, BlockBase};
use super::transaction::{
    AssetType, Output, RegisterData, Transaction, TxData, Witness,
};

/// 2021-07-15 15:08:21 UTC, the network launch instant.
const GENESIS_TIMESTAMP: u32 = 1_626_361_701;
const GENESIS_NONCE: u64 = 1_122_334_455;

const GOVERNING_SUPPLY: i64 = 100_000_000;
const UTILITY_SUPPLY: i64 = 100_000_000;

#[derive(Debug, Error)]
pub enum GenesisError {
    #[error("no standby validators configured")]
    NoValidators,
    #[error(transparent)]
    RedeemScript(#[from] RedeemScriptError),
    #[error(transparent)]
    Codec(#[from] crate::io::IoError),
}

/// The registration of the governing (share) token. Its hash is the
/// governing asset id on every network.
pub fn governing_token_tx() -> &'static Transaction {
    static TX: Lazy<Transaction> = Lazy::new(|| {
        let admin = hash::hash160(&[PUSHT]);
        Transaction::new(TxData::Register(RegisterData {
            asset_type: AssetType::GoverningToken,
            name: r#"[{"lang":"en","name":"CobaltShare"}]"#.into(),
            amount: Fixed8::from_int(GOVERNING_SUPPLY).expect("supply fits"),
            precision: 0,
            owner: PublicKey::infinity(),
            admin,
        }))
    });
    &TX
}

/// The registration of the utility (fee) token.
pub fn utility_token_tx() -> &'static Transaction {
    static TX: Lazy<Transaction> = Lazy::new(|| {
        let admin = hash::hash160(&[PUSHF]);
        Transaction::new(TxData::Register(RegisterData {
            asset_type: AssetType::UtilityToken,
            name: r#"[{"lang":"en","name":"CobaltCoin"}]"#.into(),
            amount: Fixed8::from_int(UTILITY_SUPPLY).expect("supply fits"),
            precision: 8,
            owner: PublicKey::infinity(),
            admin,
        }))
    });
    &TX
}

/// The script hash the first block's witness must satisfy, derived from
/// the standby validator set.
pub fn next_consensus_address(
    validators: &[PublicKey],
) -> Result<crate::util::UInt160, GenesisError> {
    if validators.is_empty() {
        return Err(GenesisError::NoValidators);
    }
    let n = validators.len();
    let m = n - (n - 1) / 3;
    let script = smartcontract::create_multisig_redeem_script(m, validators)?;
    Ok(hash::hash160(&script))
}

/// Builds the genesis block for the given standby validators: the miner
/// seed, both token registrations and the issue of the full governing
/// supply to the validators' multi-sig address.
pub fn create_genesis_block(validators: &[PublicKey]) -> Result<Block, GenesisError> {
    if validators.is_empty() {
        return Err(GenesisError::NoValidators);
    }
    let next_consensus = next_consensus_address(validators)?;

    let governing = governing_token_tx().clone();
    let utility = utility_token_tx().clone();

    let owners_script = smartcontract::create_multisig_redeem_script(
        validators.len() / 2 + 1,
        validators,
    )?;
    let owners_hash = hash::hash160(&owners_script);

    let miner = Transaction::new(TxData::Miner {
        nonce: GENESIS_NONCE as u32,
    });

    let mut issue = Transaction::new(TxData::Issue);
    issue.outputs.push(Output {
        asset_id: governing.hash(),
        amount: Fixed8::from_int(GOVERNING_SUPPLY).expect("supply fits"),
        script_hash: owners_hash,
    });
    issue.scripts.push(Witness {
        invocation_script: Vec::new(),
        verification_script: vec![PUSHT],
    });

    let mut block = Block {
        base: BlockBase {
            version: 0,
            prev_hash: Default::default(),
            merkle_root: Default::default(),
            timestamp: GENESIS_TIMESTAMP,
            index: 0,
            consensus_data: GENESIS_NONCE,
            next_consensus,
            script: Witness {
                invocation_script: Vec::new(),
                verification_script: vec![PUSHT],
            },
        },
        transactions: vec![miner, governing, utility, issue],
    };
    block.rebuild_merkle_root()?;
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::KeyPair;

    fn validators(n: usize) -> Vec<PublicKey> {
        (0..n).map(|_| KeyPair::random().public_key().clone()).collect()
    }

    #[test]
    fn genesis_is_deterministic_per_validator_set() {
        let keys = validators(4);
        let a = create_genesis_block(&keys).unwrap();
        let b = create_genesis_block(&keys).unwrap();
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.index(), 0);
        assert!(a.base.prev_hash.is_zero());
        assert!(a.verify_merkle_root());
    }

    #[test]
    fn genesis_differs_between_validator_sets() {
        let a = create_genesis_block(&validators(4)).unwrap();
        let b = create_genesis_block(&validators(4)).unwrap();
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn issue_spends_governing_supply() {
        let block = create_genesis_block(&validators(1)).unwrap();
        let issue = &block.transactions[3];
        assert_eq!(issue.outputs.len(), 1);
        assert_eq!(issue.outputs[0].asset_id, governing_token_tx().hash());
        assert_eq!(
            issue.outputs[0].amount,
            Fixed8::from_int(100_000_000).unwrap()
        );
    }

    #[test]
    fn no_validators_is_an_error() {
        assert!(matches!(
            create_genesis_block(&[]),
            Err(GenesisError::NoValidators)
        ));
    }

    #[test]
    fn token_hashes_are_stable() {
        assert_eq!(governing_token_tx().hash(), governing_token_tx().hash());
        assert_ne!(governing_token_tx().hash(), utility_token_tx().hash());
    }
}

//! The blockchain ledger: blocks, transactions, state and storage.

pub mod block;
pub mod blockchain;
pub mod genesis;
pub mod interop;
pub mod mempool;
pub mod state;
pub mod storage;
pub mod transaction;

pub use block::{Block, BlockBase, Header};
pub use blockchain::{Blockchain, BlockchainError, VerifyError};
pub use mempool::{Feer, Mempool, PoolItem};
pub use transaction::{Transaction, TxData, TxType};

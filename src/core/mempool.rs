//! Pool of verified but not yet persisted transactions.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::util::{Fixed8, UInt160, UInt256};

use super::transaction::Transaction;

/// Fee questions the pool asks about a transaction. Implemented by the
/// blockchain, separated out so the pool stays testable on its own.
pub trait Feer {
    /// The utility-asset surplus of inputs over outputs.
    fn network_fee(&self, tx: &Transaction) -> Fixed8;
    fn fee_per_byte(&self, tx: &Transaction) -> Fixed8;
    fn is_low_priority(&self, tx: &Transaction) -> bool;
    fn system_fee(&self, tx: &Transaction) -> Fixed8;
}

/// A pending transaction with the metadata eviction ordering needs.
#[derive(Debug, Clone)]
pub struct PoolItem {
    pub tx: Transaction,
    /// Arrival sequence number; lower arrived earlier.
    seq: u64,
    fee_per_byte: Fixed8,
    is_low_priority: bool,
}

impl PoolItem {
    pub fn new(tx: Transaction, feer: &dyn Feer) -> Self {
        PoolItem {
            fee_per_byte: feer.fee_per_byte(&tx),
            is_low_priority: feer.is_low_priority(&tx),
            tx,
            seq: 0,
        }
    }

    /// Ordering key, higher keeps its place longer: high priority first,
    /// then fee density, then earlier arrival.
    fn priority(&self) -> (bool, Fixed8, std::cmp::Reverse<u64>) {
        (!self.is_low_priority, self.fee_per_byte, std::cmp::Reverse(self.seq))
    }
}

#[derive(Default)]
struct PoolInner {
    verified: HashMap<UInt256, PoolItem>,
    /// Witness script hash to the transactions it authorized.
    by_sender: HashMap<UInt160, HashSet<UInt256>>,
    next_seq: u64,
}

/// Capacity-bounded mempool indexed by hash and by sender.
pub struct Mempool {
    inner: RwLock<PoolInner>,
    capacity: usize,
}

impl Mempool {
    pub fn new(capacity: usize) -> Self {
        Mempool {
            inner: RwLock::new(PoolInner::default()),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().verified.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, hash: &UInt256) -> bool {
        self.inner.read().verified.contains_key(hash)
    }

    pub fn get(&self, hash: &UInt256) -> Option<Transaction> {
        self.inner.read().verified.get(hash).map(|item| item.tx.clone())
    }

    /// Hashes of every pooled transaction.
    pub fn hashes(&self) -> Vec<UInt256> {
        self.inner.read().verified.keys().copied().collect()
    }

    /// Pending transactions authorized by the given script hash.
    pub fn by_sender(&self, sender: &UInt160) -> Vec<Transaction> {
        let inner = self.inner.read();
        inner
            .by_sender
            .get(sender)
            .into_iter()
            .flatten()
            .filter_map(|hash| inner.verified.get(hash))
            .map(|item| item.tx.clone())
            .collect()
    }

    /// Whether any pooled transaction already spends the given input.
    pub fn spends(&self, input: &super::transaction::Input) -> bool {
        let inner = self.inner.read();
        inner
            .verified
            .values()
            .any(|item| item.tx.inputs.contains(input))
    }

    /// Adds a verified transaction. Fails on duplicates; when the pool is
    /// full, the lowest-priority item is evicted, which may be the
    /// incoming transaction itself.
    pub fn try_add(&self, mut item: PoolItem) -> bool {
        let hash = item.tx.hash();
        let mut inner = self.inner.write();
        if inner.verified.contains_key(&hash) {
            return false;
        }
        item.seq = inner.next_seq;
        inner.next_seq += 1;

        if inner.verified.len() >= self.capacity {
            let lowest = inner
                .verified
                .values()
                .min_by_key(|candidate| candidate.priority())
                .map(|candidate| (candidate.tx.hash(), candidate.priority()));
            match lowest {
                Some((_, lowest_priority)) if item.priority() <= lowest_priority => {
                    return false;
                }
                Some((lowest_hash, _)) => {
                    Self::remove_locked(&mut inner, &lowest_hash);
                }
                None => return false,
            }
        }

        for witness in &item.tx.scripts {
            let sender = witness.script_hash();
            inner.by_sender.entry(sender).or_default().insert(hash);
        }
        inner.verified.insert(hash, item);
        true
    }

    pub fn remove(&self, hash: &UInt256) {
        let mut inner = self.inner.write();
        Self::remove_locked(&mut inner, hash);
    }

    /// Drops every transaction included in a persisted block.
    pub fn remove_persisted(&self, txs: &[Transaction]) {
        let mut inner = self.inner.write();
        for tx in txs {
            Self::remove_locked(&mut inner, &tx.hash());
        }
    }

    fn remove_locked(inner: &mut PoolInner, hash: &UInt256) {
        if let Some(item) = inner.verified.remove(hash) {
            for witness in &item.tx.scripts {
                let sender = witness.script_hash();
                if let Some(set) = inner.by_sender.get_mut(&sender) {
                    set.remove(hash);
                    if set.is_empty() {
                        inner.by_sender.remove(&sender);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::{TxData, Witness};

    struct FixedFeer {
        fee: Fixed8,
        low: bool,
    }

    impl Feer for FixedFeer {
        fn network_fee(&self, _tx: &Transaction) -> Fixed8 {
            self.fee
        }
        fn fee_per_byte(&self, _tx: &Transaction) -> Fixed8 {
            self.fee
        }
        fn is_low_priority(&self, _tx: &Transaction) -> bool {
            self.low
        }
        fn system_fee(&self, _tx: &Transaction) -> Fixed8 {
            Fixed8::ZERO
        }
    }

    fn tx_with_nonce(nonce: u32) -> Transaction {
        Transaction::new(TxData::Miner { nonce })
    }

    #[test]
    fn duplicate_hash_rejected() {
        let pool = Mempool::new(10);
        let feer = FixedFeer { fee: Fixed8::ZERO, low: true };
        assert!(pool.try_add(PoolItem::new(tx_with_nonce(1), &feer)));
        assert!(!pool.try_add(PoolItem::new(tx_with_nonce(1), &feer)));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn capacity_evicts_lowest_priority() {
        let pool = Mempool::new(3);
        let cheap = FixedFeer { fee: Fixed8::from_raw(1), low: true };
        let rich = FixedFeer { fee: Fixed8::from_raw(100), low: false };

        for nonce in 0..3 {
            assert!(pool.try_add(PoolItem::new(tx_with_nonce(nonce), &cheap)));
        }
        let cheap_first = tx_with_nonce(0).hash();

        // A high-priority arrival evicts one of the cheap ones.
        let vip = tx_with_nonce(100);
        assert!(pool.try_add(PoolItem::new(vip.clone(), &rich)));
        assert_eq!(pool.len(), 3);
        assert!(pool.contains(&vip.hash()));
        // The newest cheap transaction went, not the oldest.
        assert!(pool.contains(&cheap_first));
    }

    #[test]
    fn incoming_lowest_priority_is_rejected_when_full() {
        let pool = Mempool::new(2);
        let rich = FixedFeer { fee: Fixed8::from_raw(100), low: false };
        let cheap = FixedFeer { fee: Fixed8::from_raw(1), low: true };

        assert!(pool.try_add(PoolItem::new(tx_with_nonce(0), &rich)));
        assert!(pool.try_add(PoolItem::new(tx_with_nonce(1), &rich)));
        assert!(!pool.try_add(PoolItem::new(tx_with_nonce(2), &cheap)));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn size_never_exceeds_capacity() {
        let pool = Mempool::new(5);
        for nonce in 0..50 {
            let feer = FixedFeer {
                fee: Fixed8::from_raw(nonce as i64),
                low: false,
            };
            pool.try_add(PoolItem::new(tx_with_nonce(nonce), &feer));
            assert!(pool.len() <= 5);
        }
    }

    #[test]
    fn sender_index_tracks_witnesses() {
        let pool = Mempool::new(10);
        let feer = FixedFeer { fee: Fixed8::ZERO, low: true };
        let mut tx = tx_with_nonce(1);
        tx.scripts.push(Witness {
            invocation_script: vec![],
            verification_script: vec![0x51],
        });
        let sender = tx.scripts[0].script_hash();
        pool.try_add(PoolItem::new(tx.clone(), &feer));
        assert_eq!(pool.by_sender(&sender).len(), 1);

        pool.remove(&tx.hash());
        assert!(pool.by_sender(&sender).is_empty());
    }

    #[test]
    fn remove_persisted_clears_block_txs() {
        let pool = Mempool::new(10);
        let feer = FixedFeer { fee: Fixed8::ZERO, low: true };
        let txs: Vec<Transaction> = (0..4).map(tx_with_nonce).collect();
        for tx in &txs {
            pool.try_add(PoolItem::new(tx.clone(), &feer));
        }
        pool.remove_persisted(&txs[..2]);
        assert_eq!(pool.len(), 2);
        assert!(!pool.contains(&txs[0].hash()));
        assert!(pool.contains(&txs[3].hash()));
    }
}

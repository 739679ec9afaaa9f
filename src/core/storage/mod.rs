//! Sorted key-value store abstraction and the ledger key namespace.

mod cached;
mod disk;
mod memory;

pub use cached::CachedStore;
pub use disk::RocksDbStore;
pub use memory::MemoryStore;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("key not found")]
    NotFound,
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error(transparent)]
    Codec(#[from] crate::io::IoError),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// One-byte namespace prefix of every ledger key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyPrefix {
    DataBlock = 0x01,
    DataTransaction = 0x02,
    STAccount = 0x40,
    STCoin = 0x44,
    STSpentCoin = 0x45,
    STValidator = 0x48,
    STAsset = 0x4c,
    STNotification = 0x4d,
    STContract = 0x50,
    STStorage = 0x70,
    IXHeaderHashList = 0x80,
    IXCurrentBlock = 0x81,
    IXCurrentHeader = 0x82,
    SYSCurrentBlock = 0xc0,
    SYSCurrentHeader = 0xc1,
    SYSVersion = 0xf0,
}

impl KeyPrefix {
    pub fn bytes(self) -> Vec<u8> {
        vec![self as u8]
    }

    /// Prefix followed by an arbitrary suffix, the usual key shape.
    pub fn key(self, suffix: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + suffix.len());
        key.push(self as u8);
        key.extend_from_slice(suffix);
        key
    }
}

/// A batched group of writes committed atomically.
#[derive(Debug, Default)]
pub struct Batch {
    pub(crate) ops: Vec<BatchOp>,
}

#[derive(Debug)]
pub(crate) enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

impl Batch {
    pub fn new() -> Self {
        Batch::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put(key, value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete(key));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// A sorted key-value store. Readers may run concurrently with one
/// writer; batch commits are atomic.
pub trait Store: Send + Sync {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<()>;

    fn delete(&self, key: &[u8]) -> StorageResult<()>;

    /// All entries whose key starts with `prefix`, in key order. The
    /// result is a snapshot copy, not a live cursor.
    fn seek(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>>;

    fn write_batch(&self, batch: Batch) -> StorageResult<()>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Behavior every store implementation must share.
    pub fn exercise_store(store: &dyn Store) {
        assert_eq!(store.get(b"missing").unwrap(), None);

        store.put(b"b1", b"one").unwrap();
        store.put(b"b2", b"two").unwrap();
        store.put(b"a0", b"zero").unwrap();
        assert_eq!(store.get(b"b1").unwrap(), Some(b"one".to_vec()));

        let found = store.seek(b"b").unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.windows(2).all(|w| w[0].0 < w[1].0));

        store.delete(b"b1").unwrap();
        assert_eq!(store.get(b"b1").unwrap(), None);

        let mut batch = Batch::new();
        batch.put(b"c1".to_vec(), b"x".to_vec());
        batch.put(b"c2".to_vec(), b"y".to_vec());
        batch.delete(b"b2".to_vec());
        store.write_batch(batch).unwrap();
        assert_eq!(store.get(b"c1").unwrap(), Some(b"x".to_vec()));
        assert_eq!(store.get(b"b2").unwrap(), None);
    }
}

//! Key-value storage behind the chain and the utxo index.
//!
//! Both live in one store, separated by key prefix, so a block and the index
//! delta it causes can be written in a single atomic batch.

use crate::error::Result;
use log::debug;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Insert { key: Vec<u8>, value: Vec<u8> },
    Remove { key: Vec<u8> },
}

/// Ordered set of writes applied atomically by [`KvStore::apply`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Insert { key, value });
    }

    pub fn remove(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Remove { key });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

pub trait KvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// All pairs whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// At most `limit` keys starting with `prefix`, values are not read.
    fn scan_prefix_keys(&self, prefix: &[u8], limit: usize) -> Result<Vec<Vec<u8>>>;

    /// Applies every op of `batch` or none of them.
    fn apply(&self, batch: WriteBatch) -> Result<()>;

    fn flush(&self) -> Result<()>;

    fn insert(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        let mut batch = WriteBatch::default();
        batch.insert(key, value);
        self.apply(batch)
    }
}

/// Production store on top of a sled database.
#[derive(Debug, Clone)]
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(SledStore { db })
    }

    pub fn from_db(db: sled::Db) -> Self {
        SledStore { db }
    }
}

impl KvStore for SledStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut pairs = Vec::new();
        for kv in self.db.scan_prefix(prefix) {
            let (key, value) = kv?;
            pairs.push((key.to_vec(), value.to_vec()));
        }
        Ok(pairs)
    }

    fn scan_prefix_keys(&self, prefix: &[u8], limit: usize) -> Result<Vec<Vec<u8>>> {
        let mut keys = Vec::new();
        for key in self.db.scan_prefix(prefix).keys().take(limit) {
            keys.push(key?.to_vec());
        }
        Ok(keys)
    }

    fn apply(&self, batch: WriteBatch) -> Result<()> {
        debug!("Applying batch of {} ops", batch.len());
        let mut sled_batch = sled::Batch::default();
        for op in batch.ops {
            match op {
                BatchOp::Insert { key, value } => sled_batch.insert(key, value),
                BatchOp::Remove { key } => sled_batch.remove(key),
            }
        }
        self.db.apply_batch(sled_batch)?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
pub use memory::MemoryStore;

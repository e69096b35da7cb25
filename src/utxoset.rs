//! Index of unspent transaction outputs.
//!
//! One entry per transaction that still has unspent outputs, stored under
//! `utxo-<txid>` in the chain's store. The index is derived state: `reindex`
//! rebuilds it from the chain at any time.

use crate::block::Block;
use crate::blockchain::Blockchain;
use crate::error::{LedgerError, Result};
use crate::store::{KvStore, WriteBatch};
use crate::transaction::Transaction;
use crate::tx::{TXOutput, TXOutputs};
use log::{debug, info};
use std::collections::HashMap;

const UTXO_PREFIX: &[u8] = b"utxo-";
const DELETE_BATCH_SIZE: usize = 100_000;

pub struct UTXOSet<S: KvStore> {
    pub blockchain: Blockchain<S>,
}

fn utxo_key(txid: &str) -> Vec<u8> {
    let mut key = UTXO_PREFIX.to_vec();
    key.extend_from_slice(txid.as_bytes());
    key
}

impl<S: KvStore> UTXOSet<S> {
    /// Rebuilds the index from the chain, discarding whatever it held.
    pub fn reindex(&self) -> Result<()> {
        info!("Reindexing UTXO set");
        self.delete_by_prefix(UTXO_PREFIX, DELETE_BATCH_SIZE)?;

        let utxos = self.blockchain.find_utxo()?;
        let mut batch = WriteBatch::default();
        for (txid, outs) in &utxos {
            batch.insert(utxo_key(txid), bincode::serialize(outs)?);
        }
        let store = self.blockchain.store();
        store.apply(batch)?;
        store.flush()?;
        info!("Indexed {} transactions", utxos.len());
        Ok(())
    }

    /// Applies the effect of a committed block: drops every output its
    /// inputs spend, then adds every transaction's own outputs.
    pub fn update(&self, block: &Block) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.stage_update(block, &mut batch)?;
        let store = self.blockchain.store();
        store.apply(batch)?;
        store.flush()?;
        Ok(())
    }

    /// Mines `transactions` and commits the block together with its index
    /// update as one atomic write.
    pub fn commit_block(&mut self, transactions: Vec<Transaction>) -> Result<Block> {
        let block = self.blockchain.mine_block(transactions)?;
        let mut batch = WriteBatch::default();
        self.stage_update(&block, &mut batch)?;
        self.blockchain.commit(&block, batch)?;
        info!("Committed block {}", block.get_hash());
        Ok(block)
    }

    fn stage_update(&self, block: &Block, batch: &mut WriteBatch) -> Result<()> {
        let mut pending: HashMap<String, TXOutputs> = HashMap::new();

        for tx in block.get_transactions() {
            if tx.is_coinbase() {
                continue;
            }
            for vin in &tx.vin {
                if !pending.contains_key(&vin.txid) {
                    let outs = self.get_entry(&vin.txid)?.ok_or_else(|| {
                        LedgerError::MissingUtxoEntry(vin.txid.clone())
                    })?;
                    pending.insert(vin.txid.clone(), outs);
                }
                let outs = pending
                    .get_mut(&vin.txid)
                    .ok_or_else(|| LedgerError::MissingUtxoEntry(vin.txid.clone()))?;
                if outs.outputs.remove(&vin.vout).is_none() {
                    return Err(LedgerError::MissingOutput {
                        txid: vin.txid.clone(),
                        vout: vin.vout,
                    }
                    .into());
                }
            }
        }

        for tx in block.get_transactions() {
            pending.insert(tx.id.clone(), TXOutputs::from_outputs(&tx.vout));
        }

        for (txid, outs) in &pending {
            if outs.is_empty() {
                debug!("utxo entry {} fully spent", txid);
                batch.remove(utxo_key(txid));
            } else {
                batch.insert(utxo_key(txid), bincode::serialize(outs)?);
            }
        }
        Ok(())
    }

    fn get_entry(&self, txid: &str) -> Result<Option<TXOutputs>> {
        match self.blockchain.store().get(&utxo_key(txid))? {
            Some(data) => Ok(Some(bincode::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    fn entries(&self) -> Result<Vec<(String, TXOutputs)>> {
        let mut entries = Vec::new();
        for (key, value) in self.blockchain.store().scan_prefix(UTXO_PREFIX)? {
            let txid = String::from_utf8(key[UTXO_PREFIX.len()..].to_vec())?;
            let outs: TXOutputs = bincode::deserialize(&value)?;
            entries.push((txid, outs));
        }
        Ok(entries)
    }

    /// Number of transactions with at least one unspent output.
    pub fn count_transactions(&self) -> Result<usize> {
        let keys = self
            .blockchain
            .store()
            .scan_prefix_keys(UTXO_PREFIX, usize::MAX)?;
        Ok(keys.len())
    }

    /// Picks outputs locked to `pub_key_hash` until `amount` is covered.
    /// Returns the accumulated value and, per txid, the output indices picked.
    /// An accumulated value below `amount` means insufficient funds.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: i32,
    ) -> Result<(i64, HashMap<String, Vec<i32>>)> {
        let mut unspent_outputs: HashMap<String, Vec<i32>> = HashMap::new();
        let mut accumulated: i64 = 0;

        for (txid, outs) in self.entries()? {
            for (out_idx, out) in &outs.outputs {
                if accumulated >= i64::from(amount) {
                    break;
                }
                if out.is_locked_with_key(pub_key_hash) {
                    accumulated += i64::from(out.value);
                    unspent_outputs.entry(txid.clone()).or_default().push(*out_idx);
                }
            }
        }
        Ok((accumulated, unspent_outputs))
    }

    /// Every unspent output locked to `pub_key_hash`.
    pub fn find_utxo(&self, pub_key_hash: &[u8]) -> Result<Vec<TXOutput>> {
        let mut utxos = Vec::new();
        for (_, outs) in self.entries()? {
            for out in outs.outputs.into_values() {
                if out.is_locked_with_key(pub_key_hash) {
                    utxos.push(out);
                }
            }
        }
        Ok(utxos)
    }

    pub fn get_balance(&self, pub_key_hash: &[u8]) -> Result<i64> {
        Ok(self
            .find_utxo(pub_key_hash)?
            .iter()
            .map(|out| i64::from(out.value))
            .sum())
    }

    /// Deletes every key under `prefix`, at most `batch_size` keys per write.
    fn delete_by_prefix(&self, prefix: &[u8], batch_size: usize) -> Result<()> {
        let store = self.blockchain.store();
        let mut deleted = 0;
        loop {
            let keys = store.scan_prefix_keys(prefix, batch_size)?;
            if keys.is_empty() {
                break;
            }
            let mut batch = WriteBatch::default();
            for key in keys {
                batch.remove(key);
            }
            deleted += batch.len();
            store.apply(batch)?;
        }
        debug!("deleted {} keys", deleted);
        Ok(())
    }
}

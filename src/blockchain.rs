use crate::block::Block;
use crate::error::{LedgerError, Result};
use crate::store::{KvStore, WriteBatch};
use crate::transaction::Transaction;
use crate::tx::TXOutputs;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};

const BLOCK_PREFIX: &[u8] = b"block-";
const LAST_KEY: &[u8] = b"LAST";

#[derive(Debug, Clone)]
pub struct Blockchain<S: KvStore> {
    tip: String,
    store: S,
    difficulty: usize,
}

pub struct BlockchainIterator<'a, S: KvStore> {
    current_hash: String,
    bc: &'a Blockchain<S>,
}

fn block_key(hash: &str) -> Vec<u8> {
    let mut key = BLOCK_PREFIX.to_vec();
    key.extend_from_slice(hash.as_bytes());
    key
}

impl<S: KvStore> Blockchain<S> {
    pub fn open(store: S, difficulty: usize) -> Result<Self> {
        info!("Opening blockchain");
        let tip = store.get(LAST_KEY)?.ok_or(LedgerError::ChainNotFound)?;
        info!("Found block database");
        Ok(Blockchain {
            tip: String::from_utf8(tip)?,
            store,
            difficulty,
        })
    }

    pub fn create_blockchain(store: S, address: &str, difficulty: usize) -> Result<Self> {
        info!("Creating new blockchain");
        if store.get(LAST_KEY)?.is_some() {
            return Err(LedgerError::ChainExists.into());
        }
        let cbtx = Transaction::new_coinbase(address, "GENESIS_COINBASE")?;
        let genesis = Block::new_genesis_block(cbtx, difficulty)?;
        let mut bc = Blockchain {
            tip: String::new(),
            store,
            difficulty,
        };
        bc.add_block(&genesis)?;
        Ok(bc)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn tip(&self) -> &str {
        &self.tip
    }

    pub fn iter(&self) -> BlockchainIterator<'_, S> {
        BlockchainIterator {
            current_hash: self.tip.clone(),
            bc: self,
        }
    }

    pub fn get_block(&self, hash: &str) -> Result<Option<Block>> {
        match self.store.get(&block_key(hash))? {
            Some(data) => Ok(Some(bincode::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    pub fn get_best_height(&self) -> Result<usize> {
        let block = self
            .get_block(&self.tip)?
            .ok_or(LedgerError::ChainNotFound)?;
        Ok(block.get_height())
    }

    /// Mines `transactions` on top of the tip without persisting the block.
    /// Every transaction must verify against the committed chain and spend
    /// only outputs that no committed or earlier transaction of the block spent.
    pub fn mine_block(&self, transactions: Vec<Transaction>) -> Result<Block> {
        info!("mine a new block");
        let mut spent = self.spent_outpoints()?;
        for tx in &transactions {
            if !self.verify_transacton(tx)? {
                warn!("rejecting invalid transaction {}", tx.id);
                return Err(LedgerError::InvalidTransaction(tx.id.clone()).into());
            }
            if tx.is_coinbase() {
                continue;
            }
            for vin in &tx.vin {
                if !spent.insert((vin.txid.clone(), vin.vout)) {
                    warn!("{} spends {}:{} which is already spent", tx.id, vin.txid, vin.vout);
                    return Err(LedgerError::InvalidTransaction(tx.id.clone()).into());
                }
            }
        }
        let height = self.get_best_height()? + 1;
        Block::new_block(transactions, self.tip.clone(), height, self.difficulty)
    }

    /// Writes `block` and moves the tip to it in the same atomic batch as
    /// whatever `batch` already holds.
    pub fn commit(&mut self, block: &Block, mut batch: WriteBatch) -> Result<()> {
        batch.insert(block_key(&block.get_hash()), bincode::serialize(block)?);
        batch.insert(LAST_KEY.to_vec(), block.get_hash().into_bytes());
        self.store.apply(batch)?;
        self.store.flush()?;
        self.tip = block.get_hash();
        debug!("tip moved to {}", self.tip);
        Ok(())
    }

    pub fn add_block(&mut self, block: &Block) -> Result<()> {
        self.commit(block, WriteBatch::default())
    }

    /// Every `(txid, vout)` consumed by a committed transaction.
    fn spent_outpoints(&self) -> Result<HashSet<(String, i32)>> {
        let mut spent = HashSet::new();
        for block in self.iter() {
            for tx in block?.get_transactions() {
                if tx.is_coinbase() {
                    continue;
                }
                for vin in &tx.vin {
                    spent.insert((vin.txid.clone(), vin.vout));
                }
            }
        }
        Ok(spent)
    }

    /// Unspent outputs of the whole chain, computed by walking every block.
    pub fn find_utxo(&self) -> Result<HashMap<String, TXOutputs>> {
        let mut utxos: HashMap<String, TXOutputs> = HashMap::new();
        let mut spent_txos: HashMap<String, Vec<i32>> = HashMap::new();

        for block in self.iter() {
            let block = block?;
            for tx in block.get_transactions() {
                for (index, out) in tx.vout.iter().enumerate() {
                    let index = index as i32;
                    if let Some(ids) = spent_txos.get(&tx.id) {
                        if ids.contains(&index) {
                            continue;
                        }
                    }
                    utxos
                        .entry(tx.id.clone())
                        .or_default()
                        .outputs
                        .insert(index, out.clone());
                }

                if !tx.is_coinbase() {
                    for vin in &tx.vin {
                        spent_txos
                            .entry(vin.txid.clone())
                            .or_default()
                            .push(vin.vout);
                    }
                }
            }
        }
        Ok(utxos)
    }

    pub fn find_transaction(&self, id: &str) -> Result<Transaction> {
        for block in self.iter() {
            for tx in block?.get_transactions() {
                if tx.id == id {
                    return Ok(tx.clone());
                }
            }
        }
        Err(LedgerError::MissingTransaction(id.to_string()).into())
    }

    fn get_prev_txs(&self, tx: &Transaction) -> Result<HashMap<String, Transaction>> {
        let mut prev_txs = HashMap::new();
        for vin in &tx.vin {
            if !prev_txs.contains_key(&vin.txid) {
                let prev_tx = self.find_transaction(&vin.txid)?;
                prev_txs.insert(prev_tx.id.clone(), prev_tx);
            }
        }
        Ok(prev_txs)
    }

    pub fn sign_transacton(&self, tx: &mut Transaction, private_key: &[u8]) -> Result<()> {
        let prev_txs = self.get_prev_txs(tx)?;
        tx.sign(private_key, &prev_txs)
    }

    pub fn verify_transacton(&self, tx: &Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        let prev_txs = self.get_prev_txs(tx)?;
        tx.verify(&prev_txs)
    }
}

impl<S: KvStore> Iterator for BlockchainIterator<'_, S> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_hash.is_empty() {
            return None;
        }
        match self.bc.get_block(&self.current_hash) {
            Ok(Some(block)) => {
                self.current_hash = block.get_prev_hash();
                Some(Ok(block))
            }
            Ok(None) => {
                let hash = std::mem::take(&mut self.current_hash);
                Some(Err(failure::format_err!("block {} missing from store", hash)))
            }
            Err(e) => {
                self.current_hash.clear();
                Some(Err(e))
            }
        }
    }
}

use crate::error::Result;
use crate::transaction::Transaction;
use log::info;
use merkle_cbt::merkle_tree::{CBMT, Merge};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::SystemTime;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Block {
    timestamp: u128,
    transactions: Vec<Transaction>,
    prev_block_hash: String,
    hash: String,
    height: usize,
    difficulty: usize,
    nonce: i32,
}

impl Block {
    pub fn new_block(
        transactions: Vec<Transaction>,
        prev_block_hash: String,
        height: usize,
        difficulty: usize,
    ) -> Result<Self> {
        let timestamp = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)?
            .as_millis();
        let mut block = Block {
            timestamp,
            transactions,
            prev_block_hash,
            hash: String::new(),
            height,
            difficulty,
            nonce: 0,
        };
        block.run_proof_of_work()?;
        Ok(block)
    }

    pub fn new_genesis_block(coinbase: Transaction, difficulty: usize) -> Result<Self> {
        Block::new_block(vec![coinbase], String::new(), 0, difficulty)
    }

    pub fn get_hash(&self) -> String {
        self.hash.clone()
    }

    pub fn get_prev_hash(&self) -> String {
        self.prev_block_hash.clone()
    }

    pub fn get_transactions(&self) -> &Vec<Transaction> {
        &self.transactions
    }

    pub fn get_height(&self) -> usize {
        self.height
    }

    fn run_proof_of_work(&mut self) -> Result<()> {
        info!("Mining the block at height {}", self.height);
        while !self.validate()? {
            self.nonce += 1;
        }
        self.hash = self.compute_hash()?;
        Ok(())
    }

    fn hash_transactions(&self) -> Result<Vec<u8>> {
        let mut leaves = Vec::new();
        for tx in &self.transactions {
            leaves.push(tx.hash()?.into_bytes());
        }
        let tree = CBMT::<Vec<u8>, MergeTx>::build_merkle_tree(&leaves);
        Ok(tree.root())
    }

    fn prepare_hash_data(&self) -> Result<Vec<u8>> {
        let content = (
            self.prev_block_hash.clone(),
            self.hash_transactions()?,
            self.timestamp,
            self.difficulty,
            self.nonce,
        );
        Ok(bincode::serialize(&content)?)
    }

    fn compute_hash(&self) -> Result<String> {
        let data = self.prepare_hash_data()?;
        Ok(hex::encode(Sha256::digest(&data)))
    }

    /// Whether the block hash carries `difficulty` leading zeros.
    pub fn validate(&self) -> Result<bool> {
        let hash = self.compute_hash()?;
        Ok(hash.bytes().take(self.difficulty).all(|b| b == b'0'))
    }
}

struct MergeTx {}

impl Merge for MergeTx {
    type Item = Vec<u8>;
    fn merge(left: &Self::Item, right: &Self::Item) -> Self::Item {
        let mut hasher = Sha256::new();
        hasher.update(left);
        hasher.update(right);
        hasher.finalize().to_vec()
    }
}

//! Transactions, their content-derived ids and per-input signatures.

use crate::error::{LedgerError, Result};
use crate::store::KvStore;
use crate::tx::{TXInput, TXOutput};
use crate::utxoset::UTXOSet;
use crate::wallets::{Wallet, hash_pub_key, sign_digest, verify_digest};
use log::{debug, error, info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Reward paid by a coinbase transaction.
pub const SUBSIDY: i32 = 20;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub id: String,
    pub vin: Vec<TXInput>,
    pub vout: Vec<TXOutput>,
}

impl Transaction {
    /// Builds a signed transaction paying `amount` from `wallet` to `to`,
    /// returning any surplus to the wallet as change.
    pub fn new_utxo<S: KvStore>(
        wallet: &Wallet,
        to: &str,
        amount: i32,
        utxo: &UTXOSet<S>,
    ) -> Result<Transaction> {
        info!("new UTXO Transaction of {} to {}", amount, to);
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount).into());
        }
        let payment = TXOutput::new(amount, to)?;

        let pub_key_hash = hash_pub_key(&wallet.public_key);
        let (acc, valid_outputs) = utxo.find_spendable_outputs(&pub_key_hash, amount)?;
        if acc < i64::from(amount) {
            error!("Not Enough balance: have {}, need {}", acc, amount);
            return Err(LedgerError::InsufficientFunds {
                requested: amount,
                available: acc,
            }
            .into());
        }

        let mut vin = Vec::new();
        for (txid, outs) in valid_outputs {
            for out in outs {
                vin.push(TXInput {
                    txid: txid.clone(),
                    vout: out,
                    signature: Vec::new(),
                    pub_key: wallet.public_key.clone(),
                });
            }
        }

        let mut vout = vec![payment];
        if acc > i64::from(amount) {
            let change = i32::try_from(acc - i64::from(amount))?;
            vout.push(TXOutput::locked_to(change, &pub_key_hash));
        }

        let mut tx = Transaction {
            id: String::new(),
            vin,
            vout,
        };
        tx.id = tx.hash()?;
        utxo.blockchain.sign_transacton(&mut tx, &wallet.secret_key)?;
        Ok(tx)
    }

    /// Coinbase paying [`SUBSIDY`] to `to`. Empty `data` is replaced by 20
    /// random bytes, hex encoded.
    pub fn new_coinbase(to: &str, data: &str) -> Result<Transaction> {
        info!("new coinbase Transaction to: {}", to);
        let data = if data.is_empty() {
            let mut rand_data = [0u8; 20];
            rand::thread_rng().fill_bytes(&mut rand_data);
            hex::encode(rand_data)
        } else {
            data.to_string()
        };

        let mut tx = Transaction {
            id: String::new(),
            vin: vec![TXInput {
                txid: String::new(),
                vout: -1,
                signature: Vec::new(),
                pub_key: data.into_bytes(),
            }],
            vout: vec![TXOutput::new(SUBSIDY, to)?],
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].txid.is_empty() && self.vin[0].vout == -1
    }

    /// SHA-256 over the bincode encoding with `id` cleared, hex encoded.
    pub fn hash(&self) -> Result<String> {
        let mut copy = self.clone();
        copy.id = String::new();
        let data = bincode::serialize(&copy)?;
        Ok(hex::encode(Sha256::digest(&data)))
    }

    /// Copy keeping only the outpoints of inputs and the outputs.
    pub fn trimmed_copy(&self) -> Transaction {
        let vin = self
            .vin
            .iter()
            .map(|v| TXInput {
                txid: v.txid.clone(),
                vout: v.vout,
                signature: Vec::new(),
                pub_key: Vec::new(),
            })
            .collect();

        Transaction {
            id: self.id.clone(),
            vin,
            vout: self.vout.clone(),
        }
    }

    /// Signs every input against the output it spends.
    pub fn sign(
        &mut self,
        private_key: &[u8],
        prev_txs: &HashMap<String, Transaction>,
    ) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }
        if self.vin.iter().any(|vin| !vin.signature.is_empty()) {
            return Err(LedgerError::AlreadySigned(self.id.clone()).into());
        }
        check_prev_txs(&self.vin, prev_txs)?;

        let mut tx_copy = self.trimmed_copy();
        for in_id in 0..self.vin.len() {
            let digest = tx_copy.input_digest(in_id, prev_txs)?;
            self.vin[in_id].signature = sign_digest(private_key, digest.as_bytes())?;
        }
        debug!("signed {} inputs of {}", self.vin.len(), self.id);
        Ok(())
    }

    /// `Ok(false)` when any input's signature or key does not match what it
    /// spends, or the outputs are worth more than the inputs.
    pub fn verify(&self, prev_txs: &HashMap<String, Transaction>) -> Result<bool> {
        if self.is_coinbase() {
            return Ok(true);
        }
        check_prev_txs(&self.vin, prev_txs)?;
        if let Some(out) = self.vout.iter().find(|out| out.value < 0) {
            return Err(LedgerError::InvalidAmount(out.value).into());
        }

        let mut tx_copy = self.trimmed_copy();
        let mut input_total: i64 = 0;
        let mut seen = HashSet::new();
        for (in_id, vin) in self.vin.iter().enumerate() {
            if !seen.insert((vin.txid.as_str(), vin.vout)) {
                warn!("{} spends {}:{} more than once", self.id, vin.txid, vin.vout);
                return Ok(false);
            }
            let prev_out = referenced_output(vin, prev_txs)?;
            let digest = tx_copy.input_digest(in_id, prev_txs)?;
            if !verify_digest(&vin.pub_key, digest.as_bytes(), &vin.signature)? {
                warn!("bad signature on input {} of {}", in_id, self.id);
                return Ok(false);
            }
            if !vin.uses_key(&prev_out.pub_key_hash) {
                warn!("input {} of {} does not own its output", in_id, self.id);
                return Ok(false);
            }
            input_total += i64::from(prev_out.value);
        }

        let output_total: i64 = self.vout.iter().map(|out| i64::from(out.value)).sum();
        if input_total < output_total {
            warn!(
                "{} spends {} but only has {}",
                self.id, output_total, input_total
            );
            return Ok(false);
        }
        Ok(true)
    }

    /// Recomputes the id of this (trimmed) copy with input `in_id` temporarily
    /// holding the locking hash of the output it spends.
    fn input_digest(
        &mut self,
        in_id: usize,
        prev_txs: &HashMap<String, Transaction>,
    ) -> Result<String> {
        let pub_key_hash = referenced_output(&self.vin[in_id], prev_txs)?
            .pub_key_hash
            .clone();
        self.vin[in_id].signature.clear();
        self.vin[in_id].pub_key = pub_key_hash;
        self.id = self.hash()?;
        self.vin[in_id].pub_key.clear();
        Ok(self.id.clone())
    }
}

fn check_prev_txs(vin: &[TXInput], prev_txs: &HashMap<String, Transaction>) -> Result<()> {
    for input in vin {
        if !prev_txs.contains_key(&input.txid) {
            error!("ERROR: Previous transaction {} is not correct", input.txid);
            return Err(LedgerError::MissingTransaction(input.txid.clone()).into());
        }
    }
    Ok(())
}

fn referenced_output<'a>(
    vin: &TXInput,
    prev_txs: &'a HashMap<String, Transaction>,
) -> Result<&'a TXOutput> {
    let prev_tx = prev_txs
        .get(&vin.txid)
        .ok_or_else(|| LedgerError::MissingTransaction(vin.txid.clone()))?;
    usize::try_from(vin.vout)
        .ok()
        .and_then(|idx| prev_tx.vout.get(idx))
        .ok_or_else(|| {
            LedgerError::MissingOutput {
                txid: vin.txid.clone(),
                vout: vin.vout,
            }
            .into()
        })
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Transaction {}:", self.id)?;
        for (i, input) in self.vin.iter().enumerate() {
            writeln!(f, "     Input {}:", i)?;
            writeln!(f, "       TXID:      {}", input.txid)?;
            writeln!(f, "       Out:       {}", input.vout)?;
            writeln!(f, "       Signature: {}", hex::encode(&input.signature))?;
            writeln!(f, "       PubKey:    {}", hex::encode(&input.pub_key))?;
        }
        for (i, output) in self.vout.iter().enumerate() {
            writeln!(f, "     Output {}:", i)?;
            writeln!(f, "       Value:  {}", output.value)?;
            writeln!(f, "       Script: {}", hex::encode(&output.pub_key_hash))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn funded(wallet: &Wallet) -> Transaction {
        Transaction::new_coinbase(&wallet.get_address().unwrap(), "reward").unwrap()
    }

    fn spend(prev: &Transaction, from: &Wallet, to: &Wallet, amount: i32) -> Transaction {
        let mut tx = Transaction {
            id: String::new(),
            vin: vec![TXInput {
                txid: prev.id.clone(),
                vout: 0,
                signature: Vec::new(),
                pub_key: from.public_key.clone(),
            }],
            vout: vec![
                TXOutput::locked_to(amount, &hash_pub_key(&to.public_key)),
                TXOutput::locked_to(SUBSIDY - amount, &hash_pub_key(&from.public_key)),
            ],
        };
        tx.id = tx.hash().unwrap();
        tx
    }

    fn prev_map(txs: &[&Transaction]) -> HashMap<String, Transaction> {
        txs.iter().map(|tx| (tx.id.clone(), (*tx).clone())).collect()
    }

    #[test]
    fn test_hash_ignores_id() {
        let wallet = Wallet::new().unwrap();
        let mut tx = funded(&wallet);
        let original = tx.hash().unwrap();
        assert_eq!(tx.id, original);
        tx.id = "anything at all".to_string();
        assert_eq!(tx.hash().unwrap(), original);
        assert_eq!(tx.hash().unwrap(), tx.hash().unwrap());
    }

    #[test]
    fn test_is_coinbase() {
        let wallet = Wallet::new().unwrap();
        let coinbase = funded(&wallet);
        assert!(coinbase.is_coinbase());

        let mut with_txid = coinbase.clone();
        with_txid.vin[0].txid = "ab".to_string();
        assert!(!with_txid.is_coinbase());

        let mut with_index = coinbase.clone();
        with_index.vin[0].vout = 0;
        assert!(!with_index.is_coinbase());

        let mut two_inputs = coinbase.clone();
        two_inputs.vin.push(coinbase.vin[0].clone());
        assert!(!two_inputs.is_coinbase());
    }

    #[test]
    fn test_coinbase_random_data() {
        let wallet = Wallet::new().unwrap();
        let address = wallet.get_address().unwrap();
        let a = Transaction::new_coinbase(&address, "").unwrap();
        let b = Transaction::new_coinbase(&address, "").unwrap();
        assert_eq!(a.vin[0].pub_key.len(), 40);
        assert_ne!(a.id, b.id);
        assert_eq!(a.vout, vec![TXOutput::locked_to(SUBSIDY, &hash_pub_key(&wallet.public_key))]);
        assert!(a.vin[0].signature.is_empty());
    }

    #[test]
    fn test_trimmed_copy() {
        let from = Wallet::new().unwrap();
        let to = Wallet::new().unwrap();
        let prev = funded(&from);
        let mut tx = spend(&prev, &from, &to, 5);
        tx.sign(&from.secret_key, &prev_map(&[&prev])).unwrap();

        let copy = tx.trimmed_copy();
        assert_eq!(copy.id, tx.id);
        assert_eq!(copy.vout, tx.vout);
        assert_eq!(copy.vin[0].txid, prev.id);
        assert!(copy.vin[0].signature.is_empty());
        assert!(copy.vin[0].pub_key.is_empty());
        assert!(!tx.vin[0].signature.is_empty());
    }

    #[test]
    fn test_sign_then_verify() {
        let from = Wallet::new().unwrap();
        let to = Wallet::new().unwrap();
        let prev = funded(&from);
        let prev_txs = prev_map(&[&prev]);
        let mut tx = spend(&prev, &from, &to, 5);
        let id = tx.id.clone();

        tx.sign(&from.secret_key, &prev_txs).unwrap();
        assert_eq!(tx.id, id);
        assert_eq!(tx.vin[0].pub_key, from.public_key);
        assert!(tx.verify(&prev_txs).unwrap());
    }

    #[test]
    fn test_each_input_signed_independently() {
        let from = Wallet::new().unwrap();
        let to = Wallet::new().unwrap();
        let a = funded(&from);
        let b = funded(&from);
        let prev_txs = prev_map(&[&a, &b]);
        let mut tx = spend(&a, &from, &to, 5);
        tx.vin.push(TXInput {
            txid: b.id.clone(),
            vout: 0,
            signature: Vec::new(),
            pub_key: from.public_key.clone(),
        });
        tx.id = tx.hash().unwrap();

        tx.sign(&from.secret_key, &prev_txs).unwrap();
        assert_ne!(tx.vin[0].signature, tx.vin[1].signature);
        assert!(tx.verify(&prev_txs).unwrap());

        let mut swapped = tx.clone();
        swapped.vin[0].signature = tx.vin[1].signature.clone();
        assert!(!swapped.verify(&prev_txs).unwrap());
    }

    #[test]
    fn test_tampered_value_fails_verification() {
        let from = Wallet::new().unwrap();
        let to = Wallet::new().unwrap();
        let prev = funded(&from);
        let prev_txs = prev_map(&[&prev]);
        let mut tx = spend(&prev, &from, &to, 5);
        tx.sign(&from.secret_key, &prev_txs).unwrap();

        tx.vout[0].value = 6;
        assert!(!tx.verify(&prev_txs).unwrap());
    }

    #[test]
    fn test_foreign_key_fails_verification() {
        let owner = Wallet::new().unwrap();
        let thief = Wallet::new().unwrap();
        let prev = funded(&owner);
        let prev_txs = prev_map(&[&prev]);
        let mut tx = spend(&prev, &thief, &thief, 5);
        tx.sign(&thief.secret_key, &prev_txs).unwrap();

        assert!(!tx.verify(&prev_txs).unwrap());
    }

    #[test]
    fn test_overspend_fails_verification() {
        let from = Wallet::new().unwrap();
        let to = Wallet::new().unwrap();
        let prev = funded(&from);
        let prev_txs = prev_map(&[&prev]);
        let mut tx = spend(&prev, &from, &to, 5);
        tx.vout[1].value = SUBSIDY;
        tx.id = tx.hash().unwrap();
        tx.sign(&from.secret_key, &prev_txs).unwrap();

        assert!(!tx.verify(&prev_txs).unwrap());
    }

    #[test]
    fn test_duplicate_input_fails_verification() {
        let from = Wallet::new().unwrap();
        let to = Wallet::new().unwrap();
        let prev = funded(&from);
        let prev_txs = prev_map(&[&prev]);
        let mut tx = spend(&prev, &from, &to, 5);
        tx.vin.push(tx.vin[0].clone());
        tx.vout = vec![TXOutput::locked_to(2 * SUBSIDY, &hash_pub_key(&to.public_key))];
        tx.id = tx.hash().unwrap();
        tx.sign(&from.secret_key, &prev_txs).unwrap();

        assert!(tx.vin.iter().all(|vin| !vin.signature.is_empty()));
        assert!(!tx.verify(&prev_txs).unwrap());
    }

    #[test]
    fn test_missing_prev_tx_is_an_error() {
        let from = Wallet::new().unwrap();
        let to = Wallet::new().unwrap();
        let prev = funded(&from);
        let mut tx = spend(&prev, &from, &to, 5);

        let err = tx.sign(&from.secret_key, &HashMap::new()).unwrap_err();
        assert_eq!(
            err.downcast_ref::<LedgerError>(),
            Some(&LedgerError::MissingTransaction(prev.id.clone()))
        );
        assert!(tx.vin[0].signature.is_empty());
        assert!(tx.verify(&HashMap::new()).is_err());
    }

    #[test]
    fn test_out_of_range_output_is_an_error() {
        let from = Wallet::new().unwrap();
        let to = Wallet::new().unwrap();
        let prev = funded(&from);
        let mut tx = spend(&prev, &from, &to, 5);
        tx.vin[0].vout = 3;

        let err = tx.sign(&from.secret_key, &prev_map(&[&prev])).unwrap_err();
        assert_eq!(
            err.downcast_ref::<LedgerError>(),
            Some(&LedgerError::MissingOutput {
                txid: prev.id.clone(),
                vout: 3
            })
        );
    }

    #[test]
    fn test_sign_twice_is_an_error() {
        let from = Wallet::new().unwrap();
        let to = Wallet::new().unwrap();
        let prev = funded(&from);
        let prev_txs = prev_map(&[&prev]);
        let mut tx = spend(&prev, &from, &to, 5);
        tx.sign(&from.secret_key, &prev_txs).unwrap();

        let err = tx.sign(&from.secret_key, &prev_txs).unwrap_err();
        assert_eq!(
            err.downcast_ref::<LedgerError>(),
            Some(&LedgerError::AlreadySigned(tx.id.clone()))
        );
    }

    #[test]
    fn test_truncated_signature_is_an_error() {
        let from = Wallet::new().unwrap();
        let to = Wallet::new().unwrap();
        let prev = funded(&from);
        let prev_txs = prev_map(&[&prev]);
        let mut tx = spend(&prev, &from, &to, 5);
        tx.sign(&from.secret_key, &prev_txs).unwrap();

        tx.vin[0].signature.truncate(40);
        assert!(tx.verify(&prev_txs).is_err());
    }

    #[test]
    fn test_coinbase_always_verifies() {
        let wallet = Wallet::new().unwrap();
        let mut coinbase = funded(&wallet);
        assert!(coinbase.verify(&HashMap::new()).unwrap());
        coinbase.sign(&wallet.secret_key, &HashMap::new()).unwrap();
        assert!(coinbase.vin[0].signature.is_empty());
    }
}

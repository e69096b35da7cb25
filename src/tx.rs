use crate::error::Result;
use crate::wallets::{address_to_pub_key_hash, hash_pub_key};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// TXInput spends one output of an earlier transaction.
///
/// For a coinbase input `txid` is empty, `vout` is `-1`, `signature` is empty and
/// `pub_key` holds free-form reward data instead of a key.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TXInput {
    pub txid: String,
    pub vout: i32,
    pub signature: Vec<u8>,
    pub pub_key: Vec<u8>,
}

/// TXOutput locks `value` to a public key hash. It is spent whole or not at all.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TXOutput {
    pub value: i32,
    pub pub_key_hash: Vec<u8>,
}

/// Outputs of one transaction that are still unspent, keyed by their index in
/// that transaction.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct TXOutputs {
    pub outputs: BTreeMap<i32, TXOutput>,
}

impl TXInput {
    /// Whether this input's key hashes to `pub_key_hash`.
    pub fn uses_key(&self, pub_key_hash: &[u8]) -> bool {
        hash_pub_key(&self.pub_key) == pub_key_hash
    }
}

impl TXOutput {
    pub fn new(value: i32, address: &str) -> Result<Self> {
        let mut txo = TXOutput {
            value,
            pub_key_hash: Vec::new(),
        };
        txo.lock(address)?;
        Ok(txo)
    }

    pub fn locked_to(value: i32, pub_key_hash: &[u8]) -> Self {
        TXOutput {
            value,
            pub_key_hash: pub_key_hash.to_vec(),
        }
    }

    fn lock(&mut self, address: &str) -> Result<()> {
        self.pub_key_hash = address_to_pub_key_hash(address)?;
        Ok(())
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash == pub_key_hash
    }
}

impl TXOutputs {
    /// All outputs of a transaction, none spent yet.
    pub fn from_outputs(outputs: &[TXOutput]) -> Self {
        TXOutputs {
            outputs: outputs
                .iter()
                .cloned()
                .enumerate()
                .map(|(idx, out)| (idx as i32, out))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallets::Wallet;

    #[test]
    fn test_output_locking() {
        let wallet = Wallet::new().unwrap();
        let hash = hash_pub_key(&wallet.public_key);
        let out = TXOutput::new(7, &wallet.get_address().unwrap()).unwrap();
        assert!(out.is_locked_with_key(&hash));
        assert!(!out.is_locked_with_key(b"someone else"));
        assert_eq!(out, TXOutput::locked_to(7, &hash));
    }

    #[test]
    fn test_output_to_bad_address() {
        assert!(TXOutput::new(7, "bogus").is_err());
    }

    #[test]
    fn test_input_uses_key() {
        let wallet = Wallet::new().unwrap();
        let input = TXInput {
            txid: "ab".to_string(),
            vout: 0,
            signature: Vec::new(),
            pub_key: wallet.public_key.clone(),
        };
        assert!(input.uses_key(&hash_pub_key(&wallet.public_key)));
        assert!(!input.uses_key(&[0u8; 20]));
    }

    #[test]
    fn test_outputs_keep_original_indices() {
        let outs = vec![TXOutput::locked_to(1, b"a"), TXOutput::locked_to(2, b"b")];
        let mut indexed = TXOutputs::from_outputs(&outs);
        indexed.outputs.remove(&0);
        assert_eq!(indexed.outputs.get(&1), Some(&outs[1]));
        assert!(!indexed.is_empty());
    }
}

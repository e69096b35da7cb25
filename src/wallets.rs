//! Keys, addresses and the locking/unlocking primitive.
//!
//! Keys are Ed25519. Encoded sizes are fixed by the curve, so a signature is
//! always `R || S` with 32 bytes each and anything else is rejected outright.

use crate::error::{LedgerError, Result};
use crate::store::KvStore;
use bitcoincash_addr::{Address, HashType, Scheme};
use crypto::digest::Digest as _;
use crypto::ed25519;
use crypto::ripemd160::Ripemd160;
use failure::format_err;
use log::{debug, info};
use rand::{OsRng, Rng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

pub const PUBLIC_KEY_LEN: usize = 32;
pub const SECRET_KEY_LEN: usize = 64;
pub const SIGNATURE_COMPONENT_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 2 * SIGNATURE_COMPONENT_LEN;

const WALLET_PREFIX: &[u8] = b"wallet-";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Wallet {
    pub secret_key: Vec<u8>,
    pub public_key: Vec<u8>,
}

impl Wallet {
    pub fn new() -> Result<Self> {
        let mut seed = [0u8; 32];
        OsRng::new()?.fill_bytes(&mut seed);
        let (secret_key, public_key) = ed25519::keypair(&seed);
        Ok(Wallet {
            secret_key: secret_key.to_vec(),
            public_key: public_key.to_vec(),
        })
    }

    pub fn get_address(&self) -> Result<String> {
        address_from_pub_key_hash(&hash_pub_key(&self.public_key))
    }
}

/// RIPEMD160(SHA256(public key)), the locking hash outputs are locked to.
pub fn hash_pub_key(pub_key: &[u8]) -> Vec<u8> {
    let sha = Sha256::digest(pub_key);
    let mut hasher = Ripemd160::new();
    hasher.input(sha.as_slice());
    let mut out = vec![0u8; 20];
    hasher.result(&mut out);
    out
}

pub fn address_from_pub_key_hash(pub_key_hash: &[u8]) -> Result<String> {
    let address = Address {
        body: pub_key_hash.to_vec(),
        scheme: Scheme::Base58,
        hash_type: HashType::Script,
        ..Default::default()
    };
    address
        .encode()
        .map_err(|e| format_err!("cannot encode address: {:?}", e))
}

/// Decodes an address and strips its version byte and checksum.
pub fn address_to_pub_key_hash(address: &str) -> Result<Vec<u8>> {
    match Address::decode(address) {
        Ok(addr) => Ok(addr.body),
        Err(e) => {
            debug!("address {} rejected: {:?}", address, e);
            Err(LedgerError::InvalidAddress(address.to_string()).into())
        }
    }
}

pub fn validate_address(address: &str) -> bool {
    address_to_pub_key_hash(address).is_ok()
}

fn check_len(actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(LedgerError::MalformedKey { expected, actual }.into());
    }
    Ok(())
}

/// Splits a signature into its two fixed-width components.
pub fn signature_components(signature: &[u8]) -> Result<(&[u8], &[u8])> {
    if signature.len() != SIGNATURE_LEN {
        return Err(LedgerError::MalformedSignature {
            expected: SIGNATURE_LEN,
            actual: signature.len(),
        }
        .into());
    }
    Ok(signature.split_at(SIGNATURE_COMPONENT_LEN))
}

pub fn sign_digest(secret_key: &[u8], digest: &[u8]) -> Result<Vec<u8>> {
    check_len(secret_key.len(), SECRET_KEY_LEN)?;
    Ok(ed25519::signature(digest, secret_key).to_vec())
}

/// Checks `signature` over `digest`. Lengths are validated first; a well-formed
/// signature that does not match is `Ok(false)`.
pub fn verify_digest(public_key: &[u8], digest: &[u8], signature: &[u8]) -> Result<bool> {
    check_len(public_key.len(), PUBLIC_KEY_LEN)?;
    signature_components(signature)?;
    Ok(ed25519::verify(digest, public_key, signature))
}

pub struct Wallets<S: KvStore> {
    wallets: HashMap<String, Wallet>,
    store: S,
}

impl<S: KvStore> Wallets<S> {
    pub fn open(store: S) -> Result<Self> {
        let mut wallets = HashMap::new();
        for (key, value) in store.scan_prefix(WALLET_PREFIX)? {
            let address = String::from_utf8(key[WALLET_PREFIX.len()..].to_vec())?;
            let wallet: Wallet = bincode::deserialize(&value)?;
            wallets.insert(address, wallet);
        }
        debug!("Loaded {} wallets", wallets.len());
        Ok(Wallets { wallets, store })
    }

    pub fn create_wallet(&mut self) -> Result<String> {
        let wallet = Wallet::new()?;
        let address = wallet.get_address()?;
        self.wallets.insert(address.clone(), wallet);
        info!("Created wallet {}", address);
        Ok(address)
    }

    pub fn get_all_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.wallets.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn get_wallet(&self, address: &str) -> Option<&Wallet> {
        self.wallets.get(address)
    }

    pub fn save_all(&self) -> Result<()> {
        for (address, wallet) in &self.wallets {
            let mut key = WALLET_PREFIX.to_vec();
            key.extend_from_slice(address.as_bytes());
            self.store.insert(key, bincode::serialize(wallet)?)?;
        }
        self.store.flush()?;
        info!("Saved {} wallets", self.wallets.len());
        Ok(())
    }
}

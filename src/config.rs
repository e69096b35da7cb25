use crate::error::Result;
use log::info;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::File;
use std::path::PathBuf;

/// Environment variable naming a JSON config file.
pub const CONFIG_ENV: &str = "LEDGER_CONFIG";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Chain and utxo index store.
    pub data_dir: PathBuf,
    pub wallet_dir: PathBuf,
    /// Number of leading hex zeros a block hash needs.
    pub difficulty: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from("data/blocks"),
            wallet_dir: PathBuf::from("data/wallets"),
            difficulty: 4,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        match env::var(CONFIG_ENV) {
            Ok(path) => {
                info!("Loading config from {}", path);
                Config::from_file(&path)
            }
            Err(_) => Ok(Config::default()),
        }
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: Config = serde_json::from_str(r#"{ "difficulty": 2 }"#).unwrap();
        assert_eq!(config.difficulty, 2);
        assert_eq!(config.data_dir, PathBuf::from("data/blocks"));
        assert_eq!(config.wallet_dir, PathBuf::from("data/wallets"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(Config::from_file("does/not/exist.json").is_err());
    }
}

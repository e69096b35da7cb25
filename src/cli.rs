use crate::{
    blockchain::Blockchain,
    config::Config,
    error::{LedgerError, Result},
    store::SledStore,
    transaction::Transaction,
    utxoset::UTXOSet,
    wallets::{Wallets, address_to_pub_key_hash, validate_address},
};
use clap::{Command, arg};
use log::info;

pub struct Cli {
    config: Config,
}

impl Cli {
    pub fn new() -> Result<Self> {
        Ok(Cli {
            config: Config::load()?,
        })
    }

    pub fn run(&mut self) -> Result<()> {
        info!("run app");
        let matches = Command::new("utxo-ledger")
            .version("0.1")
            .about("A minimal UTXO ledger")
            .subcommand(Command::new("print").about("Print the blockchain"))
            .subcommand(Command::new("create_wallet").about("Create a new wallet"))
            .subcommand(Command::new("list_addresses").about("List all addresses"))
            .subcommand(Command::new("reindex").about("Rebuild the UTXO set"))
            .subcommand(
                Command::new("getbalance")
                    .about("Get the balance of an address")
                    .arg(arg!(<ADDRESS> "'The address to get the balance of'")),
            )
            .subcommand(
                Command::new("create")
                    .about("Create a new blockchain")
                    .arg(arg!(<ADDRESS> "'The address to send genesis block reward to'")),
            )
            .subcommand(
                Command::new("send")
                    .about("Send coins and mine the block, rewarding the sender")
                    .arg(arg!(<FROM> "'Source wallet address'"))
                    .arg(arg!(<TO> "'Destination wallet address'"))
                    .arg(arg!(<AMOUNT> "'Amount to send'")),
            )
            .get_matches();

        match matches.subcommand() {
            Some(("create_wallet", _)) => {
                println!("address: {}", self.cmd_create_wallet()?);
            }
            Some(("list_addresses", _)) => {
                self.cmd_list_addresses()?;
            }
            Some(("reindex", _)) => {
                let count = self.cmd_reindex()?;
                println!("Done! There are {} transactions in the UTXO set.", count);
            }
            Some(("create", sub)) => {
                if let Some(address) = sub.get_one::<String>("ADDRESS") {
                    self.cmd_create_blockchain(address)?;
                    println!("Finished!");
                }
            }
            Some(("getbalance", sub)) => {
                if let Some(address) = sub.get_one::<String>("ADDRESS") {
                    let balance = self.cmd_get_balance(address)?;
                    println!("Balance of {}: {}", address, balance);
                }
            }
            Some(("send", sub)) => {
                let from = required(sub, "FROM")?;
                let to = required(sub, "TO")?;
                let amount: i32 = required(sub, "AMOUNT")?.parse()?;
                self.cmd_send(from, to, amount)?;
                println!("Success!");
            }
            Some(("print", _)) => {
                self.cmd_print_chain()?;
            }
            _ => {}
        }

        Ok(())
    }

    fn open_utxo_set(&self) -> Result<UTXOSet<SledStore>> {
        let store = SledStore::open(&self.config.data_dir)?;
        let blockchain = Blockchain::open(store, self.config.difficulty)?;
        Ok(UTXOSet { blockchain })
    }

    fn open_wallets(&self) -> Result<Wallets<SledStore>> {
        Wallets::open(SledStore::open(&self.config.wallet_dir)?)
    }

    fn cmd_send(&self, from: &str, to: &str, amount: i32) -> Result<()> {
        for address in [from, to] {
            if !validate_address(address) {
                return Err(LedgerError::InvalidAddress(address.to_string()).into());
            }
        }

        let mut utxo_set = self.open_utxo_set()?;
        let wallets = self.open_wallets()?;
        let wallet = wallets
            .get_wallet(from)
            .ok_or_else(|| LedgerError::WalletNotFound(from.to_string()))?;
        let tx = Transaction::new_utxo(wallet, to, amount, &utxo_set)?;
        let cbtx = Transaction::new_coinbase(from, "")?;
        utxo_set.commit_block(vec![cbtx, tx])?;
        Ok(())
    }

    fn cmd_create_wallet(&self) -> Result<String> {
        let mut wallets = self.open_wallets()?;
        let address = wallets.create_wallet()?;
        wallets.save_all()?;
        Ok(address)
    }

    fn cmd_reindex(&self) -> Result<usize> {
        let utxo_set = self.open_utxo_set()?;
        utxo_set.reindex()?;
        utxo_set.count_transactions()
    }

    fn cmd_list_addresses(&self) -> Result<()> {
        let wallets = self.open_wallets()?;
        println!("addresses: ");
        for address in wallets.get_all_addresses() {
            println!("{}", address);
        }
        Ok(())
    }

    fn cmd_create_blockchain(&self, address: &str) -> Result<()> {
        address_to_pub_key_hash(address)?;
        let store = SledStore::open(&self.config.data_dir)?;
        let blockchain = Blockchain::create_blockchain(store, address, self.config.difficulty)?;
        let utxo_set = UTXOSet { blockchain };
        utxo_set.reindex()?;
        Ok(())
    }

    fn cmd_get_balance(&self, address: &str) -> Result<i64> {
        let pub_key_hash = address_to_pub_key_hash(address)?;
        let utxo_set = self.open_utxo_set()?;
        utxo_set.get_balance(&pub_key_hash)
    }

    fn cmd_print_chain(&self) -> Result<()> {
        let utxo_set = self.open_utxo_set()?;
        for block in utxo_set.blockchain.iter() {
            let block = block?;
            println!("Hash: {}", block.get_hash());
            println!("Prev. hash: {}", block.get_prev_hash());
            println!("Height: {}", block.get_height());
            println!("PoW: {}", block.validate()?);
            for tx in block.get_transactions() {
                println!("{}", tx);
            }
            println!();
        }
        Ok(())
    }
}

fn required<'a>(matches: &'a clap::ArgMatches, name: &str) -> Result<&'a str> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .ok_or_else(|| failure::format_err!("{} not supplied", name))
}

use cli::Cli;
use error::{LedgerError, Result};
use std::process::exit;

mod block;
mod blockchain;
mod cli;
mod config;
mod error;
mod store;
mod transaction;
mod tx;
mod utxoset;
mod wallets;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let mut cli = Cli::new()?;
    if let Err(e) = cli.run() {
        match e.downcast_ref::<LedgerError>() {
            Some(err) if err.is_recoverable() => {
                eprintln!("Error: {}", err);
                exit(1)
            }
            _ => return Err(e),
        }
    }

    Ok(())
}

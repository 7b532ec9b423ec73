use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use std::path::PathBuf;

use utxo_ledger::blockchain::{Address, Ledger, Wallets};
use utxo_ledger::config::Settings;

/// Command line interface for the ledger
#[derive(Debug, Parser)]
#[clap(name = "utxo-ledger", version, about = "A local proof-of-work UTXO ledger")]
pub struct Cli {
    /// Configuration file (defaults to ./ledger.toml when present)
    #[clap(short, long, value_parser)]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Creates a blockchain and sends the genesis reward to ADDRESS
    Create {
        #[clap(long, value_parser)]
        address: String,
    },

    /// Gets the balance for an address
    #[clap(name = "getbal")]
    GetBalance {
        #[clap(long, value_parser)]
        address: String,
    },

    /// Prints the blocks in the chain, newest first
    Print,

    /// Sends AMOUNT coins from one address to another
    Send {
        #[clap(long, value_parser)]
        from: String,

        #[clap(long, value_parser)]
        to: String,

        #[clap(long, value_parser)]
        amount: u64,
    },

    /// Creates a new wallet
    #[clap(name = "createwallet")]
    CreateWallet,

    /// Lists the addresses in the wallets file
    #[clap(name = "listaddresses")]
    ListAddresses,

    /// Checks proof of work and hash links of every block
    Validate,
}

/// Runs one command against the configured ledger
pub fn run(command: Command, settings: &Settings) -> Result<()> {
    match command {
        Command::Create { address } => {
            let ledger = Ledger::open_or_create(&settings.db_path, &Address(address), settings.chain_config())
                .context("Failed to create blockchain")?;
            ledger.close()?;
            println!("Finished!");
            Ok(())
        }
        Command::GetBalance { address } => with_ledger(settings, |ledger| {
            let balance = ledger.get_balance(&Address(address.clone()))?;
            println!("Balance of {}: {}", address, balance);
            Ok(())
        }),
        Command::Print => with_ledger(settings, print_blocks),
        Command::Send { from, to, amount } => {
            let wallets = Wallets::load(&settings.wallets_file).context("Failed to load wallets")?;
            with_ledger(settings, |ledger| {
                let tx = ledger.transfer(&wallets, &Address(from.clone()), &Address(to.clone()), amount)?;
                info!("Transaction {} confirmed", hex::encode(&tx.id));
                println!("Success!");
                Ok(())
            })
        }
        Command::CreateWallet => {
            let mut wallets = Wallets::load(&settings.wallets_file).context("Failed to load wallets")?;
            let address = wallets.create_wallet();
            wallets.save().context("Failed to save wallets")?;
            println!("New address is: {}", address);
            Ok(())
        }
        Command::ListAddresses => {
            let wallets = Wallets::load(&settings.wallets_file).context("Failed to load wallets")?;
            for address in wallets.addresses() {
                println!("{}", address);
            }
            Ok(())
        }
        Command::Validate => with_ledger(settings, |ledger| {
            let valid = ledger.validate_chain()?;
            println!("Chain valid: {}", valid);
            Ok(())
        }),
    }
}

/// Opens the existing ledger, runs `f`, and closes the ledger on every path
fn with_ledger<F>(settings: &Settings, f: F) -> Result<()>
where
    F: FnOnce(&Ledger) -> Result<()>,
{
    let ledger = Ledger::open(&settings.db_path, settings.chain_config()).context("Failed to open blockchain")?;
    let result = f(&ledger);
    ledger.close()?;
    result
}

fn print_blocks(ledger: &Ledger) -> Result<()> {
    for block in ledger.list_blocks()? {
        let block = block?;

        println!();
        println!("Previous Hash: {}", hex::encode(&block.prev_hash));
        println!("Hash: {}", hex::encode(&block.hash));
        println!("PoW: {}", block.validate());
        for tx in &block.transactions {
            println!("{}", tx);
        }
    }
    Ok(())
}

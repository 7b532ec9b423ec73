use anyhow::{Context, Result};
use clap::Parser;
use log::debug;

mod cli;

use utxo_ledger::config::Settings;

fn main() -> Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let args = cli::Cli::parse();
    let settings = Settings::load(args.config.as_deref()).context("Failed to load settings")?;
    debug!("Using settings {:?}", settings);

    // Create data directory if it doesn't exist
    std::fs::create_dir_all(&settings.db_path)
        .with_context(|| format!("Failed to create data directory {}", settings.db_path.display()))?;

    cli::run(args.command, &settings)
}

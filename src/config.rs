use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use std::path::{Path, PathBuf};

use crate::blockchain::chain::ChainConfig;
use crate::blockchain::proof::{DEFAULT_DIFFICULTY, MAX_DIFFICULTY};

/// Default configuration file, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "ledger.toml";

/// Prefix for environment overrides, e.g. `LEDGER_DB_PATH`
pub const ENV_PREFIX: &str = "LEDGER";

/// Runtime settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Directory of the chain store
    pub db_path: PathBuf,

    /// Wallet registry file
    pub wallets_file: PathBuf,

    /// Leading zero bits new blocks are mined to
    pub difficulty: u32,

    /// Threads the nonce search is split across
    pub miner_threads: usize,
}

impl Settings {
    /// Loads defaults, then the config file (optional unless named
    /// explicitly), then `LEDGER_*` environment variables
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let file_source = match file {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings: Settings = Config::builder()
            .set_default("db_path", "data/blockchain")?
            .set_default("wallets_file", "data/wallets.dat")?
            .set_default("difficulty", i64::from(DEFAULT_DIFFICULTY))?
            .set_default("miner_threads", 1i64)?
            .add_source(file_source)
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.difficulty >= MAX_DIFFICULTY {
            return Err(ConfigError::Message(format!(
                "difficulty must be below {}, got {}",
                MAX_DIFFICULTY, self.difficulty
            )));
        }
        if self.miner_threads == 0 {
            return Err(ConfigError::Message("miner_threads must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn chain_config(&self) -> ChainConfig {
        ChainConfig {
            difficulty: self.difficulty,
            miner_threads: self.miner_threads,
        }
    }
}

use log::{debug, info};
use thiserror::Error;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::crypto::{Address, CryptoError, Wallet};

/// Errors that can occur while loading or querying wallets
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("Unknown address: {0}")]
    UnknownAddress(String),

    #[error("Wallet file error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),
}

/// Source of key material for addresses the operator controls
pub trait WalletProvider {
    /// Returns the wallet owning `address`
    fn resolve(&self, address: &Address) -> Result<&Wallet, WalletError>;
}

/// File backed registry of wallets keyed by address
///
/// On disk the registry is a bincode map from address to secret key bytes.
#[derive(Debug)]
pub struct Wallets {
    path: PathBuf,
    wallets: BTreeMap<Address, Wallet>,
}

impl Wallets {
    /// Loads the registry at `path`, starting empty if the file does not exist
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, WalletError> {
        let path = path.as_ref().to_path_buf();
        let mut wallets = BTreeMap::new();

        if path.exists() {
            let bytes = fs::read(&path)?;
            let stored: BTreeMap<String, Vec<u8>> = bincode::deserialize(&bytes)
                .map_err(|e| WalletError::SerializationError(e.to_string()))?;

            for secret in stored.values() {
                let wallet = Wallet::from_secret_key(secret)?;
                wallets.insert(wallet.address().clone(), wallet);
            }
            debug!("Loaded {} wallets from {}", wallets.len(), path.display());
        }

        Ok(Wallets { path, wallets })
    }

    /// Generates a new wallet and returns its address
    ///
    /// The registry is not written until [`Wallets::save`] is called.
    pub fn create_wallet(&mut self) -> Address {
        let wallet = Wallet::new();
        let address = wallet.address().clone();
        self.wallets.insert(address.clone(), wallet);

        info!("Created wallet {}", address);
        address
    }

    /// Addresses in the registry
    pub fn addresses(&self) -> Vec<&Address> {
        self.wallets.keys().collect()
    }

    /// Writes the registry back to its file
    pub fn save(&self) -> Result<(), WalletError> {
        let stored: BTreeMap<String, Vec<u8>> = self
            .wallets
            .iter()
            .map(|(address, wallet)| (address.0.clone(), wallet.export_secret_key()))
            .collect();
        let bytes =
            bincode::serialize(&stored).map_err(|e| WalletError::SerializationError(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, bytes)?;
        Ok(())
    }
}

impl WalletProvider for Wallets {
    fn resolve(&self, address: &Address) -> Result<&Wallet, WalletError> {
        self.wallets
            .get(address)
            .ok_or_else(|| WalletError::UnknownAddress(address.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file() -> PathBuf {
        std::env::temp_dir()
            .join(format!("ledger-wallets-{}", uuid::Uuid::new_v4()))
            .join("wallets.dat")
    }

    #[test]
    fn test_missing_file_is_empty() {
        let wallets = Wallets::load(temp_file()).unwrap();
        assert!(wallets.addresses().is_empty());
    }

    #[test]
    fn test_create_save_and_reload() {
        let path = temp_file();
        let mut wallets = Wallets::load(&path).unwrap();
        let first = wallets.create_wallet();
        let second = wallets.create_wallet();
        wallets.save().unwrap();

        let reloaded = Wallets::load(&path).unwrap();
        assert_eq!(reloaded.addresses().len(), 2);

        let wallet = reloaded.resolve(&first).unwrap();
        assert_eq!(wallet.address(), &first);
        assert_eq!(
            wallet.public_key(),
            wallets.resolve(&first).unwrap().public_key()
        );
        assert!(reloaded.resolve(&second).is_ok());
    }

    #[test]
    fn test_unknown_address() {
        let wallets = Wallets::load(temp_file()).unwrap();
        let stranger = Wallet::new();

        assert!(matches!(
            wallets.resolve(stranger.address()),
            Err(WalletError::UnknownAddress(_))
        ));
    }

    #[test]
    fn test_corrupt_file() {
        let path = temp_file();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, [0xff; 3]).unwrap();

        assert!(Wallets::load(&path).is_err());
    }
}

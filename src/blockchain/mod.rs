// Blockchain module
//
// This module contains the core ledger implementation including:
// - Hashing, signing and address primitives
// - Proof of work algorithm
// - Block and transaction structures
// - Chain store and UTXO queries
// - Wallet registry
// - The ledger operations built on top of them

pub mod block;
pub mod chain;
pub mod crypto;
pub mod ledger;
pub mod proof;
pub mod storage;
pub mod transaction;
pub mod wallet;

// Re-export main components for easier access
pub use block::Block;
pub use chain::{Blockchain, ChainConfig};
pub use crypto::{Address, Wallet};
pub use ledger::{Ledger, LedgerError};
pub use proof::ProofOfWork;
pub use transaction::Transaction;
pub use wallet::{WalletProvider, Wallets};

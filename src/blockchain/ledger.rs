use log::{info, warn};
use thiserror::Error;

use std::collections::HashSet;
use std::path::Path;

use super::block::Block;
use super::chain::{Blockchain, BlockchainError, ChainConfig};
use super::crypto::{Address, CryptoError};
use super::storage::BlockIterator;
use super::transaction::{Transaction, TransactionError, TxInput, TxOutput};
use super::wallet::{WalletError, WalletProvider};

/// Errors surfaced by ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Address error: {0}")]
    CryptoError(#[from] CryptoError),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("Invalid amount: {0}")]
    InvalidAmount(u64),

    #[error("Invalid transaction {0}")]
    InvalidTransaction(String),

    #[error("Wallet error: {0}")]
    WalletError(#[from] WalletError),

    #[error("Blockchain error: {0}")]
    BlockchainError(#[from] BlockchainError),
}

impl From<TransactionError> for LedgerError {
    fn from(err: TransactionError) -> Self {
        LedgerError::BlockchainError(BlockchainError::TransactionError(err))
    }
}

/// Operator facing ledger
///
/// Every operation taking an address checks its checksum before any chain
/// I/O. Dropping or closing the ledger releases the store.
#[derive(Debug)]
pub struct Ledger {
    chain: Blockchain,
}

impl Ledger {
    /// Opens the ledger at `path`, creating it with a genesis reward to
    /// `genesis_address` when no chain exists yet
    pub fn open_or_create<P: AsRef<Path>>(
        path: P,
        genesis_address: &Address,
        config: ChainConfig,
    ) -> Result<Self, LedgerError> {
        genesis_address.validate()?;

        let chain = Blockchain::open_or_create(path, genesis_address, config)?;
        Ok(Ledger { chain })
    }

    /// Opens an existing ledger at `path`
    pub fn open<P: AsRef<Path>>(path: P, config: ChainConfig) -> Result<Self, LedgerError> {
        Ok(Ledger {
            chain: Blockchain::open(path, config)?,
        })
    }

    pub fn chain(&self) -> &Blockchain {
        &self.chain
    }

    /// Sum of the unspent outputs locked to `address`
    pub fn get_balance(&self, address: &Address) -> Result<u64, LedgerError> {
        let pub_key_hash = address.pub_key_hash()?;

        let balance = self
            .chain
            .find_utxo(&pub_key_hash)?
            .iter()
            .map(|output| output.value)
            .sum();

        Ok(balance)
    }

    /// Builds and signs a transfer without appending it
    ///
    /// One input per selected output, one output paying `to`, and a change
    /// output back to `from` when the selection overshoots.
    pub fn build_transfer(
        &self,
        wallets: &dyn WalletProvider,
        from: &Address,
        to: &Address,
        amount: u64,
    ) -> Result<Transaction, LedgerError> {
        let from_hash = from.pub_key_hash()?;
        to.validate()?;
        if amount == 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let wallet = wallets.resolve(from)?;
        let (accumulated, selection) = self.chain.find_spendable_outputs(&from_hash, amount)?;
        if accumulated < amount {
            return Err(LedgerError::InsufficientFunds {
                required: amount,
                available: accumulated,
            });
        }

        let mut inputs = Vec::new();
        for (tx_id, indices) in selection {
            for index in indices {
                inputs.push(TxInput {
                    ref_tx_id: tx_id.clone(),
                    ref_output_index: index,
                    signature: Vec::new(),
                    public_key: wallet.public_key(),
                });
            }
        }

        let mut outputs = vec![TxOutput::new(amount, to)?];
        if accumulated > amount {
            outputs.push(TxOutput::new(accumulated - amount, from)?);
        }

        let mut transaction = Transaction::new(inputs, outputs)?;
        self.chain.sign_transaction(&mut transaction, wallet)?;

        Ok(transaction)
    }

    /// Moves `amount` from `from` to `to` in a newly mined block
    pub fn transfer(
        &self,
        wallets: &dyn WalletProvider,
        from: &Address,
        to: &Address,
        amount: u64,
    ) -> Result<Transaction, LedgerError> {
        let transaction = self.build_transfer(wallets, from, to, amount)?;
        self.append_block(vec![transaction.clone()])?;

        info!("Sent {} from {} to {}", amount, from, to);
        Ok(transaction)
    }

    /// Checks signatures and that every spent output is still unspent
    pub fn verify_transaction(&self, transaction: &Transaction) -> Result<bool, LedgerError> {
        if transaction.is_coinbase() {
            return Ok(true);
        }
        if !self.chain.verify_transaction(transaction)? {
            return Ok(false);
        }

        let spent = self.chain.find_spent_outputs()?;
        let mut seen = HashSet::new();
        for input in &transaction.inputs {
            let key = (input.ref_tx_id.clone(), input.ref_output_index);
            if spent.contains(&key) || !seen.insert(key) {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Verifies `transactions` and mines them into a block on the tip
    ///
    /// Nothing is written if any transaction fails verification, reuses an
    /// id already in the chain or the batch, or spends an output another
    /// transaction in the batch spends.
    pub fn append_block(&self, transactions: Vec<Transaction>) -> Result<Block, LedgerError> {
        let mut batch_ids = HashSet::new();
        let mut batch_inputs = HashSet::new();

        for transaction in &transactions {
            if !transaction.has_valid_id()? || !self.verify_transaction(transaction)? {
                warn!("Rejecting transaction {}", hex::encode(&transaction.id));
                return Err(LedgerError::InvalidTransaction(hex::encode(&transaction.id)));
            }
            if !batch_ids.insert(transaction.id.clone()) || self.chain.contains_transaction(&transaction.id)? {
                warn!("Rejecting duplicate transaction {}", hex::encode(&transaction.id));
                return Err(LedgerError::InvalidTransaction(hex::encode(&transaction.id)));
            }
            if transaction.is_coinbase() {
                continue;
            }
            for input in &transaction.inputs {
                if !batch_inputs.insert((input.ref_tx_id.clone(), input.ref_output_index)) {
                    return Err(LedgerError::InvalidTransaction(hex::encode(&transaction.id)));
                }
            }
        }

        Ok(self.chain.append(transactions)?)
    }

    /// Blocks from tip to genesis
    pub fn list_blocks(&self) -> Result<BlockIterator, LedgerError> {
        Ok(self.chain.iter()?)
    }

    /// Checks proof of work and hash links for every stored block
    pub fn validate_chain(&self) -> Result<bool, LedgerError> {
        Ok(self.chain.is_valid()?)
    }

    /// Flushes the store and releases it
    pub fn close(self) -> Result<(), LedgerError> {
        self.chain.flush()?;
        info!("Ledger closed");
        Ok(())
    }
}

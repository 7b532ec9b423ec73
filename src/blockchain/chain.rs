use log::{debug, info};
use thiserror::Error;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use super::block::{Block, BlockError};
use super::crypto::{Address, Wallet};
use super::proof::DEFAULT_DIFFICULTY;
use super::storage::{BlockIterator, BlockchainStorage, StorageError};
use super::transaction::{PriorTransactions, Transaction, TransactionError, TxOutput};

/// Memo carried by the genesis coinbase input
pub const GENESIS_MEMO: &str = "Genesis Block";

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),

    #[error("Block error: {0}")]
    BlockError(#[from] BlockError),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("No existing blockchain found, create one first")]
    NotInitialized,

    #[error("Transaction {0} does not exist")]
    TransactionNotFound(String),
}

/// Mining parameters used when sealing new blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainConfig {
    /// Leading zero bits each new block hash must have
    pub difficulty: u32,

    /// Threads the nonce search is split across
    pub miner_threads: usize,
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig {
            difficulty: DEFAULT_DIFFICULTY,
            miner_threads: 1,
        }
    }
}

/// An unspent output together with its position in the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnspentOutput {
    pub tx_id: Vec<u8>,
    pub index: i64,
    pub output: TxOutput,
}

/// Outputs chosen to fund a transfer, keyed by transaction id
pub type SpendableOutputs = BTreeMap<Vec<u8>, Vec<i64>>;

/// Represents the blockchain
///
/// Owns the block store and its tip pointer. Balances and spendable outputs
/// are never indexed; every query replays the chain from tip to genesis.
#[derive(Debug)]
pub struct Blockchain {
    /// Storage for blockchain data
    storage: BlockchainStorage,

    config: ChainConfig,
}

impl Blockchain {
    /// Opens the chain at `path`, minting a genesis block for `genesis_address`
    /// if the store is empty
    ///
    /// Genesis block and tip pointer are committed together.
    pub fn open_or_create<P: AsRef<Path>>(
        path: P,
        genesis_address: &Address,
        config: ChainConfig,
    ) -> Result<Self, BlockchainError> {
        let storage = BlockchainStorage::open(path)?;

        if storage.tip()?.is_some() {
            info!("Blockchain found in database");
            return Ok(Blockchain { storage, config });
        }

        info!("No existing blockchain found, mining genesis block");
        let coinbase = Transaction::new_coinbase(genesis_address, GENESIS_MEMO)?;
        let genesis = Block::genesis(coinbase, config.difficulty, config.miner_threads)?;

        if storage.initialize(&genesis)? {
            info!("Genesis block created: {}", hex::encode(&genesis.hash));
        } else {
            info!("Another process initialized the chain first, keeping its genesis");
        }

        Ok(Blockchain { storage, config })
    }

    /// Opens an already initialized chain at `path`
    pub fn open<P: AsRef<Path>>(path: P, config: ChainConfig) -> Result<Self, BlockchainError> {
        let storage = BlockchainStorage::open(path)?;

        if storage.tip()?.is_none() {
            return Err(BlockchainError::NotInitialized);
        }

        Ok(Blockchain { storage, config })
    }

    pub fn config(&self) -> ChainConfig {
        self.config
    }

    /// Hash of the most recently appended block
    pub fn tip(&self) -> Result<Vec<u8>, BlockchainError> {
        self.storage.tip()?.ok_or(BlockchainError::NotInitialized)
    }

    /// Mines a block holding `transactions` on top of the current tip
    ///
    /// The block and the new tip are committed in a single store transaction.
    pub fn append(&self, transactions: Vec<Transaction>) -> Result<Block, BlockchainError> {
        let prev_hash = self.tip()?;

        let block = Block::new(
            transactions,
            prev_hash,
            self.config.difficulty,
            self.config.miner_threads,
        )?;
        self.storage.append(&block)?;

        info!(
            "Appended block {} with {} transactions (nonce {})",
            hex::encode(&block.hash),
            block.transactions.len(),
            block.nonce
        );
        Ok(block)
    }

    /// Lazily walks blocks from the live tip back to genesis
    pub fn iter(&self) -> Result<BlockIterator, BlockchainError> {
        Ok(self.storage.iter()?)
    }

    /// Number of blocks from tip to genesis
    pub fn height(&self) -> Result<usize, BlockchainError> {
        let mut count = 0;
        for block in self.iter()? {
            block?;
            count += 1;
        }
        Ok(count)
    }

    /// Finds a confirmed transaction by id with a full chain scan
    pub fn find_transaction(&self, id: &[u8]) -> Result<Transaction, BlockchainError> {
        for block in self.iter()? {
            if let Some(tx) = block?.transactions.into_iter().find(|tx| tx.id == id) {
                return Ok(tx);
            }
        }

        Err(BlockchainError::TransactionNotFound(hex::encode(id)))
    }

    /// Whether any confirmed transaction already carries `id`
    pub fn contains_transaction(&self, id: &[u8]) -> Result<bool, BlockchainError> {
        match self.find_transaction(id) {
            Ok(_) => Ok(true),
            Err(BlockchainError::TransactionNotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Resolves every transaction referenced by `transaction`'s inputs
    fn prior_transactions(&self, transaction: &Transaction) -> Result<PriorTransactions, BlockchainError> {
        let mut prior = PriorTransactions::new();
        if transaction.is_coinbase() {
            return Ok(prior);
        }

        for input in &transaction.inputs {
            if prior.contains_key(&input.ref_tx_id) {
                continue;
            }
            match self.find_transaction(&input.ref_tx_id) {
                Ok(tx) => {
                    prior.insert(tx.id.clone(), tx);
                }
                Err(BlockchainError::TransactionNotFound(id)) => {
                    return Err(TransactionError::DanglingInputReference(id).into());
                }
                Err(err) => return Err(err),
            }
        }

        Ok(prior)
    }

    /// Signs `transaction` against the outputs it spends
    pub fn sign_transaction(&self, transaction: &mut Transaction, wallet: &Wallet) -> Result<(), BlockchainError> {
        let prior = self.prior_transactions(transaction)?;
        transaction.sign(wallet, &prior)?;
        Ok(())
    }

    /// Checks `transaction`'s signatures against the outputs it spends
    pub fn verify_transaction(&self, transaction: &Transaction) -> Result<bool, BlockchainError> {
        let prior = self.prior_transactions(transaction)?;
        Ok(transaction.verify(&prior)?)
    }

    /// Walks the chain once, yielding each block's transactions after the
    /// outputs they spend have been recorded in `spent`
    fn scan<F>(&self, mut visit: F) -> Result<(), BlockchainError>
    where
        F: FnMut(&Transaction, &HashMap<Vec<u8>, Vec<i64>>),
    {
        let mut spent: HashMap<Vec<u8>, Vec<i64>> = HashMap::new();

        for block in self.iter()? {
            let block = block?;

            // Inputs first so outputs spent within the same block are excluded
            for tx in block.transactions.iter().filter(|tx| !tx.is_coinbase()) {
                for input in &tx.inputs {
                    spent
                        .entry(input.ref_tx_id.clone())
                        .or_default()
                        .push(input.ref_output_index);
                }
            }

            for tx in &block.transactions {
                visit(tx, &spent);
            }
        }

        Ok(())
    }

    /// Every unspent output locked to `pub_key_hash`, newest block first
    pub fn find_unspent_outputs(&self, pub_key_hash: &[u8]) -> Result<Vec<UnspentOutput>, BlockchainError> {
        let mut unspent = Vec::new();

        self.scan(|tx, spent| {
            let spent_here = spent.get(&tx.id);
            for (index, output) in tx.outputs.iter().enumerate() {
                let index = index as i64;
                if spent_here.map_or(false, |indices| indices.contains(&index)) {
                    continue;
                }
                if output.is_locked_with_key(pub_key_hash) {
                    unspent.push(UnspentOutput {
                        tx_id: tx.id.clone(),
                        index,
                        output: output.clone(),
                    });
                }
            }
        })?;

        Ok(unspent)
    }

    /// Transactions holding at least one unspent output locked to `pub_key_hash`
    pub fn find_unspent_transactions(&self, pub_key_hash: &[u8]) -> Result<Vec<Transaction>, BlockchainError> {
        let wanted: HashSet<Vec<u8>> = self
            .find_unspent_outputs(pub_key_hash)?
            .into_iter()
            .map(|utxo| utxo.tx_id)
            .collect();

        let mut transactions = Vec::new();
        for block in self.iter()? {
            for tx in block?.transactions {
                if wanted.contains(&tx.id) {
                    transactions.push(tx);
                }
            }
        }

        Ok(transactions)
    }

    /// Unspent output values locked to `pub_key_hash`
    pub fn find_utxo(&self, pub_key_hash: &[u8]) -> Result<Vec<TxOutput>, BlockchainError> {
        Ok(self
            .find_unspent_outputs(pub_key_hash)?
            .into_iter()
            .map(|utxo| utxo.output)
            .collect())
    }

    /// Collects unspent outputs until their total reaches `amount`
    ///
    /// Returns the accumulated total and the selection; a total below
    /// `amount` means the owner cannot fund the transfer.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, SpendableOutputs), BlockchainError> {
        let mut accumulated = 0u64;
        let mut selection = SpendableOutputs::new();

        for utxo in self.find_unspent_outputs(pub_key_hash)? {
            if accumulated >= amount {
                break;
            }
            accumulated = accumulated.saturating_add(utxo.output.value);
            selection.entry(utxo.tx_id).or_default().push(utxo.index);
        }

        debug!("Selected {} towards {} from {} transactions", accumulated, amount, selection.len());
        Ok((accumulated, selection))
    }

    /// Every (transaction id, output index) pair referenced by some input
    pub fn find_spent_outputs(&self) -> Result<HashSet<(Vec<u8>, i64)>, BlockchainError> {
        let mut spent = HashSet::new();

        for block in self.iter()? {
            for tx in block?.transactions.iter().filter(|tx| !tx.is_coinbase()) {
                for input in &tx.inputs {
                    spent.insert((input.ref_tx_id.clone(), input.ref_output_index));
                }
            }
        }

        Ok(spent)
    }

    /// Validates the blockchain
    ///
    /// Checks that every block satisfies its proof of work and links to the
    /// block before it, ending at a genesis block.
    pub fn is_valid(&self) -> Result<bool, BlockchainError> {
        let mut expected = Some(self.tip()?);

        for block in self.iter()? {
            let block = block?;

            if expected.as_deref() != Some(block.hash.as_slice()) || !block.validate() {
                return Ok(false);
            }
            expected = if block.is_genesis() {
                None
            } else {
                Some(block.prev_hash.clone())
            };
        }

        Ok(expected.is_none())
    }

    /// Flushes all pending writes to disk
    pub fn flush(&self) -> Result<(), BlockchainError> {
        Ok(self.storage.flush()?)
    }
}

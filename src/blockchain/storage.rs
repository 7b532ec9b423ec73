use std::path::Path;

use log::debug;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
};
use sled::{Db, Tree};
use thiserror::Error;

use super::block::{Block, BlockError};

/// Reserved key holding the hash of the most recently appended block
pub const TIP_KEY: &[u8] = b"lh";

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Block encoding error: {0}")]
    BlockError(#[from] BlockError),

    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Tip moved during append: expected {expected}, found {found}")]
    TipMoved { expected: String, found: String },
}

/// Hash-indexed block store with a single tip pointer
///
/// Keys are block hashes mapping to bincode encoded blocks, plus the reserved
/// [`TIP_KEY`]. Every write that touches the tip goes through a sled
/// transaction together with the block it points at.
pub struct BlockchainStorage {
    /// The database instance
    db: Db,

    /// Tree holding blocks and the tip pointer
    blocks: Tree,
}

impl std::fmt::Debug for BlockchainStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockchainStorage").finish()
    }
}

impl BlockchainStorage {
    /// Opens or creates the store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        let blocks = db.open_tree("blocks")?;

        Ok(Self { db, blocks })
    }

    /// Reads the current tip hash, `None` for a store with no chain yet
    pub fn tip(&self) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.blocks.get(TIP_KEY)?.map(|value| value.to_vec()))
    }

    /// Gets a block by its hash
    pub fn get_block(&self, hash: &[u8]) -> Result<Block, StorageError> {
        match self.blocks.get(hash)? {
            Some(value) => Ok(Block::deserialize(&value)?),
            None => Err(StorageError::NotFound(format!(
                "Block with hash {} not found",
                hex::encode(hash)
            ))),
        }
    }

    /// Stores `genesis` and points the tip at it, unless a tip already exists
    ///
    /// Returns `false` when another chain was already present, in which case
    /// nothing is written.
    pub fn initialize(&self, genesis: &Block) -> Result<bool, StorageError> {
        let encoded = genesis.serialize()?;

        let created = self
            .blocks
            .transaction(|tx| -> ConflictableTransactionResult<bool, StorageError> {
                if tx.get(TIP_KEY)?.is_some() {
                    return Ok(false);
                }
                tx.insert(genesis.hash.as_slice(), encoded.as_slice())?;
                tx.insert(TIP_KEY, genesis.hash.as_slice())?;
                Ok(true)
            })
            .map_err(map_transaction_error)?;

        debug!("Genesis commit for {}: created={}", hex::encode(&genesis.hash), created);
        Ok(created)
    }

    /// Stores `block` and advances the tip to it in one transaction
    ///
    /// The commit is refused if the tip no longer equals `block.prev_hash`.
    pub fn append(&self, block: &Block) -> Result<(), StorageError> {
        let encoded = block.serialize()?;

        self.blocks
            .transaction(|tx| -> ConflictableTransactionResult<(), StorageError> {
                let current = tx.get(TIP_KEY)?.map(|value| value.to_vec()).unwrap_or_default();
                if current != block.prev_hash {
                    return Err(ConflictableTransactionError::Abort(StorageError::TipMoved {
                        expected: hex::encode(&block.prev_hash),
                        found: hex::encode(&current),
                    }));
                }
                tx.insert(block.hash.as_slice(), encoded.as_slice())?;
                tx.insert(TIP_KEY, block.hash.as_slice())?;
                Ok(())
            })
            .map_err(map_transaction_error)?;

        debug!("Committed block {}", hex::encode(&block.hash));
        Ok(())
    }

    /// Iterates blocks from the current tip back to genesis
    pub fn iter(&self) -> Result<BlockIterator, StorageError> {
        Ok(BlockIterator {
            blocks: self.blocks.clone(),
            current: self.tip()?,
        })
    }

    /// Flushes all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

fn map_transaction_error(err: TransactionError<StorageError>) -> StorageError {
    match err {
        TransactionError::Abort(err) => err,
        TransactionError::Storage(err) => StorageError::DatabaseError(err),
    }
}

/// Lazy tip-to-genesis walk; each step is one point read against the store
pub struct BlockIterator {
    blocks: Tree,
    current: Option<Vec<u8>>,
}

impl BlockIterator {
    fn fetch(&self, hash: &[u8]) -> Result<Block, StorageError> {
        match self.blocks.get(hash)? {
            Some(value) => Ok(Block::deserialize(&value)?),
            None => Err(StorageError::NotFound(format!(
                "Block with hash {} not found",
                hex::encode(hash)
            ))),
        }
    }
}

impl Iterator for BlockIterator {
    type Item = Result<Block, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.current.take()?;

        match self.fetch(&hash) {
            Ok(block) => {
                if !block.is_genesis() {
                    self.current = Some(block.prev_hash.clone());
                }
                Some(Ok(block))
            }
            Err(err) => Some(Err(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::Wallet;
    use crate::blockchain::transaction::Transaction;

    const TEST_DIFFICULTY: u32 = 8;

    fn temp_path() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("ledger-storage-{}", uuid::Uuid::new_v4()))
    }

    fn genesis(wallet: &Wallet) -> Block {
        let coinbase = Transaction::new_coinbase(wallet.address(), "Genesis Block").unwrap();
        Block::genesis(coinbase, TEST_DIFFICULTY, 1).unwrap()
    }

    fn next_block(wallet: &Wallet, prev: &Block, memo: &str) -> Block {
        let coinbase = Transaction::new_coinbase(wallet.address(), memo).unwrap();
        Block::new(vec![coinbase], prev.hash.clone(), TEST_DIFFICULTY, 1).unwrap()
    }

    #[test]
    fn test_empty_store_has_no_tip() {
        let storage = BlockchainStorage::open(temp_path()).unwrap();
        assert!(storage.tip().unwrap().is_none());
        assert_eq!(storage.iter().unwrap().count(), 0);
    }

    #[test]
    fn test_initialize_once() {
        let wallet = Wallet::new();
        let storage = BlockchainStorage::open(temp_path()).unwrap();
        let first = genesis(&wallet);
        let second = genesis(&Wallet::new());

        assert!(storage.initialize(&first).unwrap());
        assert!(!storage.initialize(&second).unwrap());
        assert_eq!(storage.tip().unwrap(), Some(first.hash.clone()));
        assert!(matches!(
            storage.get_block(&second.hash),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_append_and_iterate() {
        let wallet = Wallet::new();
        let storage = BlockchainStorage::open(temp_path()).unwrap();
        let genesis = genesis(&wallet);
        storage.initialize(&genesis).unwrap();

        let second = next_block(&wallet, &genesis, "second");
        storage.append(&second).unwrap();
        let third = next_block(&wallet, &second, "third");
        storage.append(&third).unwrap();

        let hashes: Vec<Vec<u8>> = storage
            .iter()
            .unwrap()
            .map(|block| block.unwrap().hash)
            .collect();
        assert_eq!(hashes, vec![third.hash, second.hash, genesis.hash]);
    }

    #[test]
    fn test_append_rejects_stale_tip() {
        let wallet = Wallet::new();
        let storage = BlockchainStorage::open(temp_path()).unwrap();
        let genesis = genesis(&wallet);
        storage.initialize(&genesis).unwrap();

        let second = next_block(&wallet, &genesis, "second");
        storage.append(&second).unwrap();

        let stale = next_block(&wallet, &genesis, "stale");
        assert!(matches!(
            storage.append(&stale),
            Err(StorageError::TipMoved { .. })
        ));
        assert_eq!(storage.tip().unwrap(), Some(second.hash.clone()));
        assert!(storage.get_block(&stale.hash).is_err());
    }

    #[test]
    fn test_reopen_preserves_chain() {
        let wallet = Wallet::new();
        let path = temp_path();
        let genesis = genesis(&wallet);
        {
            let storage = BlockchainStorage::open(&path).unwrap();
            storage.initialize(&genesis).unwrap();
            storage.flush().unwrap();
        }

        let storage = BlockchainStorage::open(&path).unwrap();
        assert_eq!(storage.tip().unwrap(), Some(genesis.hash.clone()));
        assert_eq!(storage.get_block(&genesis.hash).unwrap(), genesis);
    }
}

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::crypto::sha256;
use super::proof::{ProofError, ProofOfWork};
use super::transaction::Transaction;

/// Errors that can occur while assembling or encoding a block
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("Proof of work error: {0}")]
    ProofError(#[from] ProofError),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Hash of the current block (calculated)
    pub hash: Vec<u8>,

    /// Hash of the previous block, empty for genesis
    pub prev_hash: Vec<u8>,

    /// List of transactions included in this block
    pub transactions: Vec<Transaction>,

    /// Digest over the concatenated transaction ids
    pub transactions_digest: Vec<u8>,

    /// Proof of work (nonce)
    pub nonce: i64,

    /// Difficulty the block was mined at
    pub difficulty: u32,
}

impl Block {
    /// Creates and mines a new block
    ///
    /// # Arguments
    ///
    /// * `transactions` - The list of transactions to include in the block
    /// * `prev_hash` - The hash of the previous block
    /// * `difficulty` - Leading zero bits the block hash must have
    /// * `workers` - Threads to spread the nonce search over
    pub fn new(
        transactions: Vec<Transaction>,
        prev_hash: Vec<u8>,
        difficulty: u32,
        workers: usize,
    ) -> Result<Self, BlockError> {
        let transactions_digest = hash_transactions(&transactions);

        let (nonce, hash) =
            ProofOfWork::new(&prev_hash, &transactions_digest, difficulty)?.run_parallel(workers)?;

        Ok(Block {
            hash,
            prev_hash,
            transactions,
            transactions_digest,
            nonce,
            difficulty,
        })
    }

    /// Creates the genesis block around a single coinbase transaction
    pub fn genesis(coinbase: Transaction, difficulty: u32, workers: usize) -> Result<Self, BlockError> {
        Self::new(vec![coinbase], Vec::new(), difficulty, workers)
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_empty()
    }

    /// Checks the stored nonce and hash against the proof-of-work target
    ///
    /// Recomputes the transactions digest too, so a block whose
    /// transactions were swapped after mining does not validate.
    pub fn validate(&self) -> bool {
        if hash_transactions(&self.transactions) != self.transactions_digest {
            return false;
        }

        match ProofOfWork::new(&self.prev_hash, &self.transactions_digest, self.difficulty) {
            Ok(pow) => pow.hash_for(self.nonce) == self.hash && pow.validate(self.nonce),
            Err(_) => false,
        }
    }

    /// Serializes the block with bincode
    pub fn serialize(&self) -> Result<Vec<u8>, BlockError> {
        bincode::serialize(self).map_err(|e| BlockError::SerializationError(e.to_string()))
    }

    /// Deserializes a block produced by [`Block::serialize`]
    pub fn deserialize(bytes: &[u8]) -> Result<Self, BlockError> {
        bincode::deserialize(bytes).map_err(|e| BlockError::DeserializationError(e.to_string()))
    }
}

/// SHA-256 over the transaction ids concatenated in order
pub fn hash_transactions(transactions: &[Transaction]) -> Vec<u8> {
    let ids: Vec<u8> = transactions
        .iter()
        .flat_map(|tx| tx.id.iter().copied())
        .collect();

    sha256(&ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::Wallet;
    use crate::blockchain::transaction::{PriorTransactions, TxInput, TxOutput};

    const TEST_DIFFICULTY: u32 = 8;

    #[test]
    fn test_new_block() {
        let miner = Wallet::new();
        let coinbase = Transaction::new_coinbase(miner.address(), "").unwrap();

        let block = Block::new(vec![coinbase], b"previous_hash".to_vec(), TEST_DIFFICULTY, 1).unwrap();

        assert_eq!(block.prev_hash, b"previous_hash".to_vec());
        assert_eq!(block.hash.len(), 32);
        assert!(block.validate());
        assert!(!block.is_genesis());
    }

    #[test]
    fn test_transactions_digest() {
        let miner = Wallet::new();
        let first = Transaction::new_coinbase(miner.address(), "one").unwrap();
        let second = Transaction::new_coinbase(miner.address(), "two").unwrap();

        let mut ids = first.id.clone();
        ids.extend_from_slice(&second.id);

        let digest = hash_transactions(&[first.clone(), second.clone()]);
        assert_eq!(digest, sha256(&ids));
        assert_ne!(digest, hash_transactions(&[second, first]));
    }

    #[test]
    fn test_tampered_block_fails_validation() {
        let miner = Wallet::new();
        let coinbase = Transaction::new_coinbase(miner.address(), "").unwrap();
        let block = Block::genesis(coinbase, TEST_DIFFICULTY, 1).unwrap();
        assert!(block.validate());

        let mut tampered = block.clone();
        tampered.prev_hash = vec![1];
        assert!(!tampered.validate());

        let mut tampered = block.clone();
        tampered.nonce += 1;
        assert!(!tampered.validate());

        let mut tampered = block.clone();
        tampered.transactions[0].outputs[0].value = 1_000;
        tampered.transactions[0].id = tampered.transactions[0].hash().unwrap();
        assert!(!tampered.validate());
    }

    #[test]
    fn test_genesis_round_trip() {
        let miner = Wallet::new();
        let coinbase = Transaction::new_coinbase(miner.address(), "Genesis Block").unwrap();
        let block = Block::genesis(coinbase, TEST_DIFFICULTY, 1).unwrap();

        let decoded = Block::deserialize(&block.serialize().unwrap()).unwrap();
        assert_eq!(decoded, block);
        assert!(decoded.is_genesis());
        assert!(decoded.transactions[0].inputs[0].signature.is_empty());
    }

    #[test]
    fn test_signed_block_round_trip() {
        let alice = Wallet::new();
        let bob = Wallet::new();
        let funding = Transaction::new_coinbase(alice.address(), "").unwrap();
        let prior: PriorTransactions = [(funding.id.clone(), funding.clone())].into_iter().collect();

        let input = TxInput {
            ref_tx_id: funding.id.clone(),
            ref_output_index: 0,
            signature: Vec::new(),
            public_key: alice.public_key(),
        };
        let outputs = vec![
            TxOutput::new(30, bob.address()).unwrap(),
            TxOutput::new(70, alice.address()).unwrap(),
        ];
        let mut transfer = Transaction::new(vec![input], outputs).unwrap();
        transfer.sign(&alice, &prior).unwrap();

        let reward = Transaction::new_coinbase(bob.address(), "reward").unwrap();
        let block = Block::new(vec![transfer, reward], vec![7; 32], TEST_DIFFICULTY, 1).unwrap();

        let decoded = Block::deserialize(&block.serialize().unwrap()).unwrap();
        assert_eq!(decoded, block);
        assert!(decoded.transactions[0].verify(&prior).unwrap());
    }

    #[test]
    fn test_deserialize_garbage() {
        assert!(matches!(
            Block::deserialize(&[1, 2, 3]),
            Err(BlockError::DeserializationError(_))
        ));
    }
}

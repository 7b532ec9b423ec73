use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::collections::HashMap;
use std::fmt;

use super::crypto::{public_key_hash, sha256, verify_signature, Address, CryptoError, Wallet};

/// Amount minted by every coinbase transaction
pub const COINBASE_REWARD: u64 = 100;

/// Output index carried by the sentinel coinbase input
pub const COINBASE_OUTPUT_INDEX: i64 = -1;

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Dangling input reference: transaction {0} does not exist")]
    DanglingInputReference(String),

    #[error("Input references output {index} of transaction {tx_id}, which does not exist")]
    InvalidOutputReference { tx_id: String, index: i64 },

    #[error("Key does not own output {index} of transaction {tx_id}")]
    KeyMismatch { tx_id: String, index: i64 },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),
}

/// Previously confirmed transactions keyed by id, used to resolve inputs
pub type PriorTransactions = HashMap<Vec<u8>, Transaction>;

/// A reference to an output being spent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Id of the transaction that holds the spent output (empty for coinbase)
    pub ref_tx_id: Vec<u8>,

    /// Index into that transaction's outputs (-1 for coinbase)
    pub ref_output_index: i64,

    /// Signature over the per-input signing digest
    pub signature: Vec<u8>,

    /// Spender's raw public key; carries the memo bytes for coinbase
    pub public_key: Vec<u8>,
}

/// Value locked to the hash of a recipient's public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: u64,
    pub lock_hash: Vec<u8>,
}

impl TxOutput {
    /// Creates an output locked to the public key hash behind `address`
    pub fn new(value: u64, address: &Address) -> Result<Self, TransactionError> {
        Ok(TxOutput {
            value,
            lock_hash: address.pub_key_hash()?,
        })
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.lock_hash == pub_key_hash
    }
}

/// Represents a transaction in the blockchain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Digest of the transaction with this field and every signature cleared
    pub id: Vec<u8>,

    pub inputs: Vec<TxInput>,

    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Creates an unsigned transaction and assigns its id
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Result<Self, TransactionError> {
        let mut transaction = Transaction {
            id: Vec::new(),
            inputs,
            outputs,
        };
        transaction.id = transaction.unsigned_hash()?;

        Ok(transaction)
    }

    /// Creates a new coinbase transaction paying the fixed reward to `to`
    ///
    /// The memo is stored in the sentinel input's public key field; an empty
    /// memo defaults to "Coins to <address>".
    pub fn new_coinbase(to: &Address, memo: &str) -> Result<Self, TransactionError> {
        let memo = if memo.is_empty() {
            format!("Coins to {}", to)
        } else {
            memo.to_string()
        };

        let input = TxInput {
            ref_tx_id: Vec::new(),
            ref_output_index: COINBASE_OUTPUT_INDEX,
            signature: Vec::new(),
            public_key: memo.into_bytes(),
        };
        let output = TxOutput::new(COINBASE_REWARD, to)?;

        Self::new(vec![input], vec![output])
    }

    /// Checks if the transaction is a coinbase transaction
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1
            && self.inputs[0].ref_tx_id.is_empty()
            && self.inputs[0].ref_output_index == COINBASE_OUTPUT_INDEX
    }

    /// Serializes the transaction with bincode
    pub fn serialize(&self) -> Result<Vec<u8>, TransactionError> {
        bincode::serialize(self).map_err(|e| TransactionError::SerializationError(e.to_string()))
    }

    /// SHA-256 of the serialized transaction, computed with `id` cleared
    pub fn hash(&self) -> Result<Vec<u8>, TransactionError> {
        let copy = Transaction {
            id: Vec::new(),
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
        };

        Ok(sha256(&copy.serialize()?))
    }

    /// Hash the id is derived from: `id` and every signature cleared, public
    /// keys kept, so signing does not change it
    pub fn unsigned_hash(&self) -> Result<Vec<u8>, TransactionError> {
        let inputs = self
            .inputs
            .iter()
            .map(|input| TxInput {
                signature: Vec::new(),
                ..input.clone()
            })
            .collect();
        let copy = Transaction {
            id: Vec::new(),
            inputs,
            outputs: self.outputs.clone(),
        };

        Ok(sha256(&copy.serialize()?))
    }

    /// Whether `id` matches the content it was derived from
    pub fn has_valid_id(&self) -> Result<bool, TransactionError> {
        Ok(self.id == self.unsigned_hash()?)
    }

    /// Copy with every input's signature and public key cleared
    pub fn trimmed_copy(&self) -> Transaction {
        let inputs = self
            .inputs
            .iter()
            .map(|input| TxInput {
                ref_tx_id: input.ref_tx_id.clone(),
                ref_output_index: input.ref_output_index,
                signature: Vec::new(),
                public_key: Vec::new(),
            })
            .collect();

        Transaction {
            id: self.id.clone(),
            inputs,
            outputs: self.outputs.clone(),
        }
    }

    /// Signs every input with the wallet's key
    ///
    /// Each input signs a digest of the trimmed copy in which only that input
    /// carries the lock hash of the output it spends. Fails if any referenced
    /// output is locked to a different key. Coinbase transactions are left
    /// untouched.
    pub fn sign(&mut self, wallet: &Wallet, prior: &PriorTransactions) -> Result<(), TransactionError> {
        if self.is_coinbase() {
            return Ok(());
        }

        let owner_hash = wallet.public_key_hash();
        let trimmed = self.trimmed_copy();
        for index in 0..self.inputs.len() {
            let input = &self.inputs[index];
            let lock_hash = referenced_lock_hash(input, prior)?;
            if lock_hash != owner_hash.as_slice() {
                return Err(TransactionError::KeyMismatch {
                    tx_id: hex::encode(&input.ref_tx_id),
                    index: input.ref_output_index,
                });
            }

            let digest = SigningPayload::new(&trimmed, index, lock_hash).digest()?;
            self.inputs[index].signature = wallet.sign(&digest);
        }

        Ok(())
    }

    /// Digest input `index` is signed over
    pub fn signing_digest(&self, index: usize, prior: &PriorTransactions) -> Result<Vec<u8>, TransactionError> {
        let input = self.inputs.get(index).ok_or_else(|| TransactionError::InvalidOutputReference {
            tx_id: hex::encode(&self.id),
            index: index as i64,
        })?;
        let lock_hash = referenced_lock_hash(input, prior)?;
        SigningPayload::new(&self.trimmed_copy(), index, lock_hash).digest()
    }

    /// Verifies every input against the output it spends
    ///
    /// An input passes when its public key hashes to the output's lock hash
    /// and its signature checks under that key. Returns `Ok(false)` on the
    /// first input that fails; a reference to an unknown transaction is an
    /// error rather than a failed check.
    pub fn verify(&self, prior: &PriorTransactions) -> Result<bool, TransactionError> {
        if self.is_coinbase() {
            return Ok(true);
        }

        let trimmed = self.trimmed_copy();
        for (index, input) in self.inputs.iter().enumerate() {
            let lock_hash = referenced_lock_hash(input, prior)?;
            if public_key_hash(&input.public_key) != lock_hash {
                return Ok(false);
            }

            let digest = SigningPayload::new(&trimmed, index, lock_hash).digest()?;
            if !verify_signature(&digest, &input.signature, &input.public_key) {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

/// Immutable per-input payload over which one input's signature is made
struct SigningPayload<'a> {
    trimmed: &'a Transaction,
    index: usize,
    lock_hash: &'a [u8],
}

impl<'a> SigningPayload<'a> {
    fn new(trimmed: &'a Transaction, index: usize, lock_hash: &'a [u8]) -> Self {
        SigningPayload {
            trimmed,
            index,
            lock_hash,
        }
    }

    fn digest(&self) -> Result<Vec<u8>, TransactionError> {
        let mut copy = self.trimmed.clone();
        copy.inputs[self.index].public_key = self.lock_hash.to_vec();
        copy.hash()
    }
}

/// Finds the lock hash of the output an input spends
fn referenced_lock_hash<'a>(
    input: &TxInput,
    prior: &'a PriorTransactions,
) -> Result<&'a [u8], TransactionError> {
    let previous = prior
        .get(&input.ref_tx_id)
        .filter(|tx| !tx.id.is_empty())
        .ok_or_else(|| TransactionError::DanglingInputReference(hex::encode(&input.ref_tx_id)))?;

    usize::try_from(input.ref_output_index)
        .ok()
        .and_then(|index| previous.outputs.get(index))
        .map(|output| output.lock_hash.as_slice())
        .ok_or_else(|| TransactionError::InvalidOutputReference {
            tx_id: hex::encode(&input.ref_tx_id),
            index: input.ref_output_index,
        })
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Transaction {}:", hex::encode(&self.id))?;
        for (index, input) in self.inputs.iter().enumerate() {
            writeln!(f, "\tInput {}:", index)?;
            writeln!(f, "\t\tTXID:\t\t{}", hex::encode(&input.ref_tx_id))?;
            writeln!(f, "\t\tOut:\t\t{}", input.ref_output_index)?;
            writeln!(f, "\t\tSignature:\t{}", hex::encode(&input.signature))?;
            writeln!(f, "\t\tPubKey:\t\t{}", hex::encode(&input.public_key))?;
        }
        for (index, output) in self.outputs.iter().enumerate() {
            writeln!(f, "\tOutput {}:", index)?;
            writeln!(f, "\t\tValue:\t\t{}", output.value)?;
            write!(f, "\t\tLock:\t\t{}", hex::encode(&output.lock_hash))?;
            if index + 1 < self.outputs.len() {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

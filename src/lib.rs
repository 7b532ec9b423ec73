//! A single-operator UTXO ledger: proof-of-work blocks of signed
//! transactions in an embedded, hash-linked store.

pub mod blockchain;
pub mod config;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use ripemd::Ripemd160;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use std::fmt;
use std::str::FromStr;

/// Version byte prepended to every address payload
pub const ADDRESS_VERSION: u8 = 0x00;

/// Number of trailing checksum bytes in an address
pub const CHECKSUM_LEN: usize = 4;

/// Length of a public key hash (RIPEMD-160 digest)
pub const PUBLIC_KEY_HASH_LEN: usize = 20;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Decoding error: {0}")]
    DecodingError(String),
}

/// Computes the SHA-256 digest of `data`
pub fn sha256(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}

/// Hashes a raw public key into the 20 byte value outputs are locked to
pub fn public_key_hash(public_key: &[u8]) -> Vec<u8> {
    let sha = Sha256::digest(public_key);
    Ripemd160::digest(sha).to_vec()
}

/// Double SHA-256 checksum over a versioned payload
pub fn checksum(payload: &[u8]) -> Vec<u8> {
    let first = Sha256::digest(payload);
    let second = Sha256::digest(first);
    second[..CHECKSUM_LEN].to_vec()
}

/// Represents a wallet address: base58(version || public key hash || checksum)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub String);

impl Address {
    /// Creates a new address from a public key
    pub fn from_public_key(public_key: &VerifyingKey) -> Self {
        Self::from_public_key_hash(&public_key_hash(public_key.as_bytes()))
    }

    /// Encodes an already computed public key hash
    pub fn from_public_key_hash(pub_key_hash: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(1 + pub_key_hash.len() + CHECKSUM_LEN);
        payload.push(ADDRESS_VERSION);
        payload.extend_from_slice(pub_key_hash);
        let check = checksum(&payload);
        payload.extend_from_slice(&check);

        Address(bs58::encode(payload).into_string())
    }

    /// Decodes the address and returns its public key hash
    ///
    /// Fails unless the trailing checksum matches the one recomputed from
    /// the version and hash bytes.
    pub fn pub_key_hash(&self) -> Result<Vec<u8>, CryptoError> {
        let decoded = bs58::decode(&self.0)
            .into_vec()
            .map_err(|e| CryptoError::InvalidAddress(format!("{}: {}", self.0, e)))?;

        if decoded.len() != 1 + PUBLIC_KEY_HASH_LEN + CHECKSUM_LEN {
            return Err(CryptoError::InvalidAddress(format!(
                "{}: unexpected payload length {}",
                self.0,
                decoded.len()
            )));
        }

        let (versioned, actual) = decoded.split_at(decoded.len() - CHECKSUM_LEN);
        if checksum(versioned) != actual {
            return Err(CryptoError::InvalidAddress(format!(
                "{}: checksum mismatch",
                self.0
            )));
        }

        Ok(versioned[1..].to_vec())
    }

    /// Checks the address checksum
    pub fn validate(&self) -> Result<(), CryptoError> {
        self.pub_key_hash().map(|_| ())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Address {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let address = Address(s.to_string());
        address.validate()?;
        Ok(address)
    }
}

/// Represents a wallet with a keypair
#[derive(Debug, Clone)]
pub struct Wallet {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    address: Address,
}

impl Wallet {
    /// Creates a new wallet with a random keypair
    pub fn new() -> Self {
        let mut csprng = OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        Self::from_signing_key(signing_key)
    }

    /// Creates a wallet from an existing secret key
    pub fn from_secret_key(secret_key_bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes_array: [u8; 32] = secret_key_bytes.try_into().map_err(|_| {
            CryptoError::InvalidPrivateKey("Invalid private key length".to_string())
        })?;

        Ok(Self::from_signing_key(SigningKey::from_bytes(&bytes_array)))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = VerifyingKey::from(&signing_key);
        let address = Address::from_public_key(&verifying_key);

        Wallet {
            signing_key,
            verifying_key,
            address,
        }
    }

    /// Gets the wallet's address
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Raw public key bytes, as carried by transaction inputs
    pub fn public_key(&self) -> Vec<u8> {
        self.verifying_key.as_bytes().to_vec()
    }

    /// Hash of the public key, as carried by transaction outputs
    pub fn public_key_hash(&self) -> Vec<u8> {
        public_key_hash(self.verifying_key.as_bytes())
    }

    /// Signs a message with the wallet's private key
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign(message).to_bytes().to_vec()
    }

    /// Exports the wallet's secret key as bytes
    pub fn export_secret_key(&self) -> Vec<u8> {
        self.signing_key.to_bytes().to_vec()
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}

/// Verifies a signature against a message and raw public key bytes
///
/// Malformed keys or signatures verify as `false`.
pub fn verify_signature(message: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
    let key_bytes: [u8; 32] = match public_key.try_into() {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let public_key = match VerifyingKey::from_bytes(&key_bytes) {
        Ok(key) => key,
        Err(_) => return false,
    };
    let signature = match Signature::from_slice(signature) {
        Ok(signature) => signature,
        Err(_) => return false,
    };

    public_key.verify(message, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_creation() {
        let wallet = Wallet::new();
        assert!(!wallet.address().0.is_empty());
        assert!(wallet.address().validate().is_ok());
    }

    #[test]
    fn test_signing_and_verification() {
        let wallet = Wallet::new();
        let message = b"Hello, world!";

        let signature = wallet.sign(message);
        assert!(verify_signature(message, &signature, &wallet.public_key()));

        // Verify with wrong message
        assert!(!verify_signature(b"Wrong message", &signature, &wallet.public_key()));

        // Verify with someone else's key
        let other = Wallet::new();
        assert!(!verify_signature(message, &signature, &other.public_key()));
    }

    #[test]
    fn test_malformed_key_does_not_verify() {
        let wallet = Wallet::new();
        let signature = wallet.sign(b"payload");
        assert!(!verify_signature(b"payload", &signature, b"short"));
        assert!(!verify_signature(b"payload", &signature[..10], &wallet.public_key()));
    }

    #[test]
    fn test_address_round_trip() {
        let wallet = Wallet::new();
        let hash = wallet.address().pub_key_hash().unwrap();

        assert_eq!(hash.len(), PUBLIC_KEY_HASH_LEN);
        assert_eq!(hash, wallet.public_key_hash());
        assert_eq!(&Address::from_public_key_hash(&hash), wallet.address());
    }

    #[test]
    fn test_address_checksum_mismatch() {
        let wallet = Wallet::new();
        let mut decoded = bs58::decode(&wallet.address().0).into_vec().unwrap();
        let last = decoded.len() - 1;
        decoded[last] ^= 0xff;
        let tampered = Address(bs58::encode(decoded).into_string());

        assert!(matches!(
            tampered.validate(),
            Err(CryptoError::InvalidAddress(_))
        ));
        assert!("Alice".parse::<Address>().is_err());
    }

    #[test]
    fn test_wallet_from_secret_key() {
        let wallet = Wallet::new();
        let restored = Wallet::from_secret_key(&wallet.export_secret_key()).unwrap();
        assert_eq!(restored.address(), wallet.address());
        assert!(Wallet::from_secret_key(&[1, 2, 3]).is_err());
    }
}

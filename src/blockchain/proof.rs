use log::debug;
use num_bigint::BigUint;
use thiserror::Error;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Instant;

use super::crypto::sha256;

/// Default number of leading zero bits a block hash must have
pub const DEFAULT_DIFFICULTY: u32 = 18;

/// Difficulties at or above this leave no representable target
pub const MAX_DIFFICULTY: u32 = 256;

/// How many nonces a worker tries between deadline and cancellation checks
const CHECK_INTERVAL: u64 = 4096;

/// Errors that can occur while searching for a proof
#[derive(Debug, Error)]
pub enum ProofError {
    #[error("Invalid difficulty: {0}")]
    InvalidDifficulty(u32),

    #[error("Mining space exhausted without meeting the target")]
    Exhausted,

    #[error("Mining aborted: deadline reached after {attempts} attempts")]
    Aborted { attempts: u64 },
}

/// Result slot shared by parallel workers; a worker that panicked while
/// holding the lock does not hide a nonce another worker stored
fn take_found(found: Mutex<Option<(i64, Vec<u8>)>>) -> Result<(i64, Vec<u8>), ProofError> {
    found
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner)
        .ok_or(ProofError::Exhausted)
}

/// Proof-of-work puzzle over a block's header fields
///
/// A nonce is valid when `sha256(prev_hash || transactions_digest ||
/// be64(nonce) || be64(difficulty))`, read as an unsigned big-endian
/// integer, is strictly below `1 << (256 - difficulty)`.
#[derive(Debug, Clone)]
pub struct ProofOfWork<'a> {
    prev_hash: &'a [u8],
    transactions_digest: &'a [u8],
    difficulty: u32,
    target: BigUint,
}

enum Search {
    Found(i64, Vec<u8>),
    Stopped(u64),
    Exhausted,
}

impl<'a> ProofOfWork<'a> {
    pub fn new(
        prev_hash: &'a [u8],
        transactions_digest: &'a [u8],
        difficulty: u32,
    ) -> Result<Self, ProofError> {
        if difficulty >= MAX_DIFFICULTY {
            return Err(ProofError::InvalidDifficulty(difficulty));
        }

        let target = BigUint::from(1u8) << (MAX_DIFFICULTY - difficulty) as usize;

        Ok(ProofOfWork {
            prev_hash,
            transactions_digest,
            difficulty,
            target,
        })
    }

    /// The target every valid hash must be strictly below
    pub fn target(&self) -> &BigUint {
        &self.target
    }

    /// Bytes hashed for a given nonce
    fn init_data(&self, nonce: i64) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.prev_hash.len() + self.transactions_digest.len() + 16);
        data.extend_from_slice(self.prev_hash);
        data.extend_from_slice(self.transactions_digest);
        data.extend_from_slice(&nonce.to_be_bytes());
        data.extend_from_slice(&i64::from(self.difficulty).to_be_bytes());
        data
    }

    fn meets_target(&self, hash: &[u8]) -> bool {
        BigUint::from_bytes_be(hash) < self.target
    }

    /// Searches nonces from 0 upward and returns the first that meets the target
    pub fn run(&self) -> Result<(i64, Vec<u8>), ProofError> {
        let never = AtomicBool::new(false);
        match self.search(0, 1, &never, None) {
            Search::Found(nonce, hash) => Ok((nonce, hash)),
            Search::Stopped(attempts) => Err(ProofError::Aborted { attempts }),
            Search::Exhausted => Err(ProofError::Exhausted),
        }
    }

    /// Sequential search that gives up once `deadline` passes
    pub fn run_until(&self, deadline: Instant) -> Result<(i64, Vec<u8>), ProofError> {
        let never = AtomicBool::new(false);
        match self.search(0, 1, &never, Some(deadline)) {
            Search::Found(nonce, hash) => Ok((nonce, hash)),
            Search::Stopped(attempts) => Err(ProofError::Aborted { attempts }),
            Search::Exhausted => Err(ProofError::Exhausted),
        }
    }

    /// Splits the nonce space across `workers` threads by stride
    ///
    /// Worker `w` tries `w, w + workers, w + 2 * workers, ...`. The first
    /// worker to find a valid nonce stops the others, so the result is any
    /// valid nonce rather than necessarily the lowest.
    pub fn run_parallel(&self, workers: usize) -> Result<(i64, Vec<u8>), ProofError> {
        if workers <= 1 {
            return self.run();
        }

        let stop = AtomicBool::new(false);
        let found: Mutex<Option<(i64, Vec<u8>)>> = Mutex::new(None);

        thread::scope(|scope| {
            for worker in 0..workers {
                let stop = &stop;
                let found = &found;
                scope.spawn(move || {
                    if let Search::Found(nonce, hash) =
                        self.search(worker as i64, workers as i64, stop, None)
                    {
                        stop.store(true, Ordering::Relaxed);
                        found
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .get_or_insert((nonce, hash));
                    }
                });
            }
        });

        take_found(found)
    }

    fn search(&self, start: i64, step: i64, stop: &AtomicBool, deadline: Option<Instant>) -> Search {
        let mut nonce = start;
        let mut attempts: u64 = 0;

        loop {
            let hash = sha256(&self.init_data(nonce));
            if self.meets_target(&hash) {
                debug!("Found nonce {} after {} attempts: {}", nonce, attempts + 1, hex::encode(&hash));
                return Search::Found(nonce, hash);
            }
            attempts += 1;

            if attempts % CHECK_INTERVAL == 0 {
                if stop.load(Ordering::Relaxed) {
                    return Search::Stopped(attempts);
                }
                if deadline.map_or(false, |deadline| Instant::now() >= deadline) {
                    return Search::Stopped(attempts);
                }
            }

            nonce = match nonce.checked_add(step) {
                Some(next) => next,
                None => return Search::Exhausted,
            };
        }
    }

    /// Recomputes the hash for `nonce` and checks it against the target
    pub fn validate(&self, nonce: i64) -> bool {
        self.meets_target(&sha256(&self.init_data(nonce)))
    }

    /// The hash a given nonce produces
    pub fn hash_for(&self, nonce: i64) -> Vec<u8> {
        sha256(&self.init_data(nonce))
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const TEST_DIFFICULTY: u32 = 8;

    #[test]
    fn test_run_finds_lowest_valid_nonce() {
        let pow = ProofOfWork::new(b"prev", b"digest", TEST_DIFFICULTY).unwrap();
        let (nonce, hash) = pow.run().unwrap();

        assert!(pow.validate(nonce));
        assert_eq!(hash, pow.hash_for(nonce));
        assert_eq!(hash[0], 0);
        assert!((0..nonce).all(|n| !pow.validate(n)));
    }

    #[test]
    fn test_target() {
        let pow = ProofOfWork::new(b"", b"", 18).unwrap();
        assert_eq!(pow.target(), &(BigUint::from(1u8) << 238usize));
        assert_eq!(pow.difficulty(), 18);
    }

    #[test]
    fn test_changed_header_invalidates_nonce() {
        let pow = ProofOfWork::new(b"prev", b"digest", 16).unwrap();
        let (nonce, _) = pow.run().unwrap();

        let tampered = ProofOfWork::new(b"prev", b"digesT", 16).unwrap();
        assert_ne!(tampered.hash_for(nonce), pow.hash_for(nonce));
    }

    #[test]
    fn test_parallel_run_is_valid() {
        let pow = ProofOfWork::new(b"prev", b"digest", 12).unwrap();
        let (nonce, hash) = pow.run_parallel(4).unwrap();

        assert!(pow.validate(nonce));
        assert_eq!(hash, pow.hash_for(nonce));
    }

    #[test]
    fn test_poisoned_slot_keeps_result() {
        let found = Mutex::new(Some((7, vec![0u8; 32])));
        let poisoned = thread::scope(|scope| {
            scope
                .spawn(|| {
                    let _guard = found.lock().unwrap();
                    panic!("worker failed");
                })
                .join()
                .is_err()
        });

        assert!(poisoned);
        assert!(found.is_poisoned());
        assert_eq!(take_found(found).unwrap(), (7, vec![0u8; 32]));
        assert!(matches!(take_found(Mutex::new(None)), Err(ProofError::Exhausted)));
    }

    #[test]
    fn test_deadline_aborts() {
        let pow = ProofOfWork::new(b"prev", b"digest", 200).unwrap();
        let result = pow.run_until(Instant::now() + Duration::from_millis(20));
        assert!(matches!(result, Err(ProofError::Aborted { .. })));
    }

    #[test]
    fn test_invalid_difficulty() {
        assert!(matches!(
            ProofOfWork::new(b"", b"", 256),
            Err(ProofError::InvalidDifficulty(256))
        ));
    }
}

// Proof-of-work sealing
//
// A single worker runs the sequential nonce search of `Block::mine_block`.
// With more workers the nonce space is split by stride and the first worker
// to hit the target claims the win through a shared flag.

use log::{debug, info};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;

use super::block::{digest, meets_difficulty, Block};

/// Seals blocks by searching for a nonce that satisfies the difficulty
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofOfWorkSealer {
    workers: usize,
}

impl Default for ProofOfWorkSealer {
    fn default() -> Self {
        ProofOfWorkSealer { workers: 1 }
    }
}

impl ProofOfWorkSealer {
    /// Creates a sealer that searches with `workers` threads (at least one)
    pub fn new(workers: usize) -> Self {
        ProofOfWorkSealer {
            workers: workers.max(1),
        }
    }

    /// Number of search threads
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Mutates `block` until its hash starts with `difficulty` zeros
    ///
    /// Blocks the calling thread until a nonce is found.
    pub fn seal(&self, block: &mut Block, difficulty: usize) {
        if self.workers <= 1 {
            block.mine_block(difficulty);
            return;
        }

        let (nonce, hash) = self.search_parallel(block, difficulty);
        block.nonce = nonce;
        block.hash = hash;

        info!("Block mined: {}", block.hash);
    }

    fn search_parallel(&self, block: &Block, difficulty: usize) -> (u64, String) {
        let prefix = block.hash_prefix();
        let start = block.nonce;
        let stride = self.workers as u64;
        let found = AtomicBool::new(false);
        let winner: Mutex<Option<(u64, String)>> = Mutex::new(None);

        thread::scope(|scope| {
            for worker in 0..stride {
                let prefix = prefix.as_str();
                let found = &found;
                let winner = &winner;

                scope.spawn(move || {
                    let mut nonce = start.wrapping_add(worker);

                    while !found.load(Ordering::Relaxed) {
                        let hash = digest(prefix, nonce);

                        if meets_difficulty(&hash, difficulty) {
                            if found
                                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                                .is_ok()
                            {
                                debug!("Worker {} found nonce {}", worker, nonce);
                                if let Ok(mut slot) = winner.lock() {
                                    *slot = Some((nonce, hash));
                                }
                            }
                            return;
                        }

                        nonce = nonce.wrapping_add(stride);
                    }
                });
            }
        });

        match winner.into_inner() {
            Ok(Some(result)) => result,
            // Only reachable if the winner slot was poisoned.
            _ => {
                let mut fallback = block.clone();
                fallback.mine_block(difficulty);
                (fallback.nonce, fallback.hash)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Transaction;
    use chrono::Utc;

    fn unsealed_block() -> Block {
        Block::new(
            1,
            Utc::now(),
            vec![Transaction::transfer("alice", "bob", 25.0)],
            "previous_hash".to_string(),
        )
    }

    #[test]
    fn test_sequential_seal() {
        let sealer = ProofOfWorkSealer::default();
        let mut block = unsealed_block();
        sealer.seal(&mut block, 2);

        assert_eq!(sealer.workers(), 1);
        assert!(block.hash.starts_with("00"));
        assert!(block.has_valid_hash());
    }

    #[test]
    fn test_parallel_seal() {
        let sealer = ProofOfWorkSealer::new(4);

        for difficulty in 1..=3 {
            let mut block = unsealed_block();
            sealer.seal(&mut block, difficulty);

            assert!(block.hash.starts_with(&"0".repeat(difficulty)));
            assert_eq!(block.hash, block.calculate_hash());
        }
    }

    #[test]
    fn test_zero_workers_means_one() {
        assert_eq!(ProofOfWorkSealer::new(0).workers(), 1);
    }
}

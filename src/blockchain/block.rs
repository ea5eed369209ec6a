use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

use super::transaction::Transaction;

/// Represents a block in the blockchain
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Height of the block in the chain, not part of the hash
    pub index: u64,

    /// Timestamp when the block was created
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    pub timestamp: DateTime<Utc>,

    /// Hash of the previous block, "0" for the genesis block
    pub previous_hash: String,

    /// List of transactions included in this block
    pub transactions: Vec<Transaction>,

    /// Proof of work counter
    pub nonce: u64,

    /// Hash of the current block
    pub hash: String,
}

impl Block {
    /// Creates a new unsealed block
    ///
    /// The nonce starts at 0 and the hash is computed over that state.
    ///
    /// # Arguments
    ///
    /// * `index` - The height of the block in the chain
    /// * `timestamp` - The creation instant of the block
    /// * `transactions` - The list of transactions to include in the block
    /// * `previous_hash` - The hash of the previous block
    pub fn new(
        index: u64,
        timestamp: DateTime<Utc>,
        transactions: Vec<Transaction>,
        previous_hash: String,
    ) -> Self {
        let block = Block {
            index,
            timestamp,
            previous_hash,
            transactions,
            nonce: 0,
            hash: String::new(),
        };

        let hash = block.calculate_hash();

        Block {
            hash,
            ..block
        }
    }

    /// Calculates the hash of the block from its current contents
    ///
    /// # Returns
    ///
    /// The SHA-256 hash of the block as a lower-case hexadecimal string
    pub fn calculate_hash(&self) -> String {
        self.hash_with_nonce(self.nonce)
    }

    /// Calculates the hash the block would have with `nonce`
    ///
    /// Does not mutate the block.
    pub fn hash_with_nonce(&self, nonce: u64) -> String {
        digest(&self.hash_prefix(), nonce)
    }

    /// The nonce-independent part of the hash input
    ///
    /// Timestamp (milliseconds since the epoch), previous hash and the
    /// compact JSON encoding of the transaction list, concatenated.
    pub(crate) fn hash_prefix(&self) -> String {
        // Transactions only hold strings and floats, which always encode.
        let transactions = serde_json::to_string(&self.transactions)
            .expect("transaction list encodes as JSON");

        format!(
            "{}{}{}",
            self.timestamp.timestamp_millis(),
            self.previous_hash,
            transactions
        )
    }

    /// Mines the block in place
    ///
    /// Increments the nonce until the hash starts with `difficulty` zeros.
    /// There is no upper bound on the search.
    pub fn mine_block(&mut self, difficulty: usize) {
        let prefix = self.hash_prefix();
        self.hash = digest(&prefix, self.nonce);

        while !meets_difficulty(&self.hash, difficulty) {
            self.nonce += 1;
            self.hash = digest(&prefix, self.nonce);
        }

        info!("Block mined: {}", self.hash);
    }

    /// Checks the stored hash against the block contents
    pub fn has_valid_hash(&self) -> bool {
        self.hash == self.calculate_hash()
    }
}

/// Hashes a precomputed prefix together with a nonce
pub(crate) fn digest(prefix: &str, nonce: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(nonce.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Checks whether the first `difficulty` hex characters of `hash` are zeros
pub fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}

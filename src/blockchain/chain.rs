use chrono::{TimeZone, Utc};
use log::{debug, info, warn};
use thiserror::Error;

use super::block::{meets_difficulty, Block};
use super::pow::ProofOfWorkSealer;
use super::transaction::Transaction;
use crate::config::{ConfigError, LedgerConfig};

/// Genesis timestamp, 2017-01-01T00:00:00Z
const GENESIS_TIMESTAMP: i64 = 1_483_228_800;

/// Errors that can occur during ledger operations
#[derive(Debug, Error, PartialEq)]
pub enum LedgerError {
    #[error("Insufficient funds for {address}: required {required}, available {available}")]
    InsufficientFunds {
        address: String,
        required: f64,
        available: f64,
    },

    #[error("Stale block: built on {found}, current tip is {expected}")]
    StaleTip { expected: String, found: String },

    #[error("Invalid seal: {0}")]
    InvalidSeal(String),

    #[error("Block transactions do not match the pending buffer")]
    PendingMismatch,
}

/// Reasons a chain fails validation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainValidationError {
    #[error("Block {index} hash does not match its contents")]
    HashMismatch { index: usize },

    #[error("Block {index} does not link to the previous block")]
    LinkageMismatch { index: usize },
}

/// Represents the ledger: the chain of blocks plus the pending buffer
#[derive(Debug, Clone)]
pub struct Ledger {
    /// The chain of blocks, never empty
    chain: Vec<Block>,

    /// Transactions waiting to be included in the next block
    pending_transactions: Vec<Transaction>,

    /// Mining difficulty (number of leading zeros required in hash)
    difficulty: usize,

    /// Mining reward
    mining_reward: f64,

    /// Whether transfers may exceed the sender's balance
    allow_overdraft: bool,

    /// Nonce search strategy
    sealer: ProofOfWorkSealer,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    /// Creates a new ledger with a genesis block and the default configuration
    pub fn new() -> Self {
        Self::build(&LedgerConfig::default())
    }

    /// Creates a new ledger with a genesis block
    ///
    /// # Arguments
    ///
    /// * `config` - Difficulty, reward and policy settings
    ///
    /// # Returns
    ///
    /// The ledger, or the reason the configuration was rejected
    pub fn with_config(config: &LedgerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: &LedgerConfig) -> Self {
        let ledger = Ledger {
            chain: vec![Self::create_genesis_block()],
            pending_transactions: Vec::new(),
            difficulty: config.difficulty,
            mining_reward: config.mining_reward,
            allow_overdraft: config.allow_overdraft,
            sealer: ProofOfWorkSealer::new(config.mining_workers),
        };

        info!(
            "Created ledger (difficulty {}, reward {}, {} mining workers, genesis {})",
            ledger.difficulty,
            ledger.mining_reward,
            ledger.sealer.workers(),
            ledger.chain[0].hash
        );

        ledger
    }

    /// Creates the genesis block (first block in the chain)
    ///
    /// The genesis block is fixed and is not mined.
    pub fn create_genesis_block() -> Block {
        let timestamp = Utc
            .timestamp_opt(GENESIS_TIMESTAMP, 0)
            .single()
            .unwrap_or_default();

        Block::new(0, timestamp, Vec::new(), "0".to_string())
    }

    /// Gets the last block in the chain
    pub fn latest_block(&self) -> &Block {
        self.chain
            .last()
            .expect("chain always holds the genesis block")
    }

    /// Gets the entire chain
    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    /// Gets the transactions waiting to be mined
    pub fn pending_transactions(&self) -> &[Transaction] {
        &self.pending_transactions
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    pub fn sealer(&self) -> ProofOfWorkSealer {
        self.sealer
    }

    /// Adds a new transaction to the pending transactions
    ///
    /// Transactions are accepted as given. Only when overdrafts are disabled
    /// is a transfer checked against the sender's mined balance less what the
    /// sender already has pending.
    pub fn create_transaction(&mut self, transaction: Transaction) -> Result<(), LedgerError> {
        if !self.allow_overdraft {
            if let Some(sender) = &transaction.from {
                let pending_debits: f64 = self
                    .pending_transactions
                    .iter()
                    .filter(|pending| pending.is_from(&sender.0))
                    .map(|pending| pending.amount)
                    .sum();
                let available = self.get_balance_of_address(&sender.0) - pending_debits;

                if available < transaction.amount {
                    return Err(LedgerError::InsufficientFunds {
                        address: sender.0.clone(),
                        required: transaction.amount,
                        available,
                    });
                }
            }
        }

        debug!(
            "Queued transaction {:?} -> {} ({})",
            transaction.from, transaction.to, transaction.amount
        );
        self.pending_transactions.push(transaction);

        Ok(())
    }

    /// Mines the pending transactions into a new block
    ///
    /// Blocks until the proof of work is found. Afterwards the pending buffer
    /// holds only the reward for `reward_address`, which is paid out by the
    /// next block.
    ///
    /// # Returns
    ///
    /// The newly appended block
    pub fn mine_pending_transactions(&mut self, reward_address: &str) -> &Block {
        let mut block = self.candidate_block();
        self.sealer.seal(&mut block, self.difficulty);
        self.append(block, reward_address)
    }

    /// Builds an unsealed block from the pending transactions on top of the tip
    pub fn candidate_block(&self) -> Block {
        let tip = self.latest_block();

        Block::new(
            tip.index + 1,
            Utc::now(),
            self.pending_transactions.clone(),
            tip.hash.clone(),
        )
    }

    /// Appends a block sealed outside of this ledger
    ///
    /// The block must still extend the current tip and carry a valid seal.
    /// Transactions queued after the candidate was built stay pending, behind
    /// the new reward transaction.
    pub fn commit_sealed_block(
        &mut self,
        block: Block,
        reward_address: &str,
    ) -> Result<&Block, LedgerError> {
        let tip = &self.latest_block().hash;
        if block.previous_hash != *tip {
            warn!("Rejected stale block {} (tip moved to {})", block.hash, tip);
            return Err(LedgerError::StaleTip {
                expected: tip.clone(),
                found: block.previous_hash,
            });
        }

        if !block.has_valid_hash() {
            return Err(LedgerError::InvalidSeal(format!(
                "hash {} does not match block contents",
                block.hash
            )));
        }

        if !meets_difficulty(&block.hash, self.difficulty) {
            return Err(LedgerError::InvalidSeal(format!(
                "hash {} does not meet difficulty {}",
                block.hash, self.difficulty
            )));
        }

        let included = block.transactions.len();
        if self.pending_transactions.len() < included
            || self.pending_transactions[..included] != block.transactions[..]
        {
            return Err(LedgerError::PendingMismatch);
        }

        Ok(self.append(block, reward_address))
    }

    fn append(&mut self, block: Block, reward_address: &str) -> &Block {
        let included = block.transactions.len();
        let late: Vec<Transaction> = self.pending_transactions.drain(..).skip(included).collect();

        self.pending_transactions = Vec::with_capacity(late.len() + 1);
        self.pending_transactions
            .push(Transaction::reward(reward_address, self.mining_reward));
        self.pending_transactions.extend(late);

        info!(
            "Appended block {} at height {} with {} transactions",
            block.hash,
            self.chain.len(),
            included
        );
        self.chain.push(block);

        self.latest_block()
    }

    /// Computes the balance of an address by replaying the whole chain
    ///
    /// Pending transactions are not counted.
    pub fn get_balance_of_address(&self, address: &str) -> f64 {
        let mut balance = 0.0;

        for block in &self.chain {
            for transaction in &block.transactions {
                if transaction.is_from(address) {
                    balance -= transaction.amount;
                }

                if transaction.is_to(address) {
                    balance += transaction.amount;
                }
            }
        }

        balance
    }

    /// Validates the blockchain
    ///
    /// # Returns
    ///
    /// true if the blockchain is valid, false otherwise
    pub fn is_chain_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Validates the blockchain and reports the first broken block
    ///
    /// Every block after genesis must hash to its stored hash and point at
    /// its predecessor. The genesis block itself is not re-hashed.
    pub fn validate(&self) -> Result<(), ChainValidationError> {
        validate_chain(&self.chain)
    }
}

/// Checks hash integrity and linkage of `chain` from index 1 onwards
pub fn validate_chain(chain: &[Block]) -> Result<(), ChainValidationError> {
    for index in 1..chain.len() {
        let current_block = &chain[index];
        let previous_block = &chain[index - 1];

        if current_block.hash != current_block.calculate_hash() {
            return Err(ChainValidationError::HashMismatch { index });
        }

        if current_block.previous_hash != previous_block.hash {
            return Err(ChainValidationError::LinkageMismatch { index });
        }
    }

    Ok(())
}

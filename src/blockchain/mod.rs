// Blockchain module
//
// This module contains the ledger engine:
// - Transaction structure
// - Block structure and hashing
// - Proof of work sealing
// - Ledger (chain, pending transactions, balances, validation)

pub mod block;
pub mod chain;
pub mod pow;
pub mod transaction;

// Re-export main components for easier access
pub use block::Block;
pub use chain::{ChainValidationError, Ledger, LedgerError};
pub use pow::ProofOfWorkSealer;
pub use transaction::{Address, Transaction};

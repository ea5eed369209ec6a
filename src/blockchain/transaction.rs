use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use std::fmt;

/// Identifies a participant in the ledger
///
/// Addresses are opaque strings; the ledger never checks that an address
/// belongs to anyone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct Address(pub String);

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Address(s.to_string())
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Address(s)
    }
}

/// Represents a value transfer recorded in the ledger
///
/// Field order is part of the block hash input: the transaction list is
/// hashed as compact JSON with keys in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    /// Sender's address, `None` for a mining reward
    pub from: Option<Address>,

    /// Recipient's address
    pub to: Address,

    /// Amount being transferred
    pub amount: f64,
}

impl Transaction {
    /// Creates a new transaction
    ///
    /// The values are stored as given. Negative amounts and unknown
    /// addresses are accepted.
    ///
    /// # Arguments
    ///
    /// * `from` - The sender, or `None` for a system-minted reward
    /// * `to` - The recipient
    /// * `amount` - The amount to transfer
    pub fn new(from: Option<Address>, to: Address, amount: f64) -> Self {
        Transaction { from, to, amount }
    }

    /// Creates a transfer between two addresses
    pub fn transfer(from: impl Into<Address>, to: impl Into<Address>, amount: f64) -> Self {
        Transaction::new(Some(from.into()), to.into(), amount)
    }

    /// Creates a mining reward transaction
    ///
    /// # Arguments
    ///
    /// * `recipient` - The address credited with the reward
    /// * `amount` - The reward amount
    pub fn reward(recipient: impl Into<Address>, amount: f64) -> Self {
        Transaction::new(None, recipient.into(), amount)
    }

    /// Checks whether `address` sends this transaction
    pub fn is_from(&self, address: &str) -> bool {
        self.from.as_ref().map_or(false, |from| from.0 == address)
    }

    /// Checks whether `address` receives this transaction
    pub fn is_to(&self, address: &str) -> bool {
        self.to.0 == address
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_transaction() {
        let transaction = Transaction::transfer("alice", "bob", 10.5);

        assert_eq!(transaction.from, Some(Address::from("alice")));
        assert_eq!(transaction.to, Address::from("bob"));
        assert_eq!(transaction.amount, 10.5);
        assert!(transaction.is_from("alice"));
        assert!(transaction.is_to("bob"));
    }

    #[test]
    fn test_reward_transaction() {
        let transaction = Transaction::reward("miner", 100.0);

        assert!(transaction.from.is_none());
        assert_eq!(transaction.to.0, "miner");
        assert_eq!(transaction.amount, 100.0);
        assert!(!transaction.is_from("miner"));
    }

    #[test]
    fn test_negative_amount_is_stored_verbatim() {
        let transaction = Transaction::transfer("alice", "bob", -5.0);
        assert_eq!(transaction.amount, -5.0);
    }

    #[test]
    fn test_canonical_encoding() {
        let transactions = vec![
            Transaction::transfer("A", "B", 100.0),
            Transaction::reward("M", 100.0),
        ];

        let encoded = serde_json::to_string(&transactions).unwrap();
        assert_eq!(
            encoded,
            r#"[{"from":"A","to":"B","amount":100.0},{"from":null,"to":"M","amount":100.0}]"#
        );
    }
}

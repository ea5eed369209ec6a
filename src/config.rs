// Runtime configuration
//
// Defaults match the classic demo ledger (difficulty 2, reward 100).
// Every value can be overridden through `LEDGER_*` environment variables.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::env;

/// Errors that can occur while loading configuration
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Value out of range for {field}: {reason}")]
    OutOfRange { field: String, reason: String },
}

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Ledger configuration
    pub ledger: LedgerConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Number of leading zero hex characters a sealed hash needs
    pub difficulty: usize,

    /// Amount minted to the miner of each block
    pub mining_reward: f64,

    /// Accept transfers that exceed the sender's balance
    pub allow_overdraft: bool,

    /// Number of threads used for the nonce search
    pub mining_workers: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            difficulty: 2,
            mining_reward: 100.0,
            allow_overdraft: true,
            mining_workers: 1,
        }
    }
}

impl Config {
    /// Loads configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup
    ///
    /// Missing keys keep their default value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(host) = lookup("LEDGER_HOST") {
            config.server.host = host;
        }
        if let Some(port) = lookup("LEDGER_PORT") {
            config.server.port = parse("port", &port)?;
        }
        if let Some(difficulty) = lookup("LEDGER_DIFFICULTY") {
            config.ledger.difficulty = parse("difficulty", &difficulty)?;
        }
        if let Some(reward) = lookup("LEDGER_MINING_REWARD") {
            config.ledger.mining_reward = parse("mining_reward", &reward)?;
        }
        if let Some(allow) = lookup("LEDGER_ALLOW_OVERDRAFT") {
            config.ledger.allow_overdraft = parse("allow_overdraft", &allow)?;
        }
        if let Some(workers) = lookup("LEDGER_MINING_WORKERS") {
            config.ledger.mining_workers = parse("mining_workers", &workers)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::OutOfRange {
                field: "port".to_string(),
                reason: "must be non-zero".to_string(),
            });
        }

        self.ledger.validate()
    }
}

impl LedgerConfig {
    /// Validates the ledger configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        // A SHA-256 hex digest has 64 characters.
        if self.difficulty == 0 || self.difficulty > 64 {
            return Err(ConfigError::OutOfRange {
                field: "difficulty".to_string(),
                reason: format!("must be between 1 and 64, got {}", self.difficulty),
            });
        }

        if self.mining_workers == 0 {
            return Err(ConfigError::OutOfRange {
                field: "mining_workers".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        if !self.mining_reward.is_finite() {
            return Err(ConfigError::OutOfRange {
                field: "mining_reward".to_string(),
                reason: "must be a finite number".to_string(),
            });
        }

        Ok(())
    }
}

fn parse<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.ledger.difficulty, 2);
        assert_eq!(config.ledger.mining_reward, 100.0);
        assert!(config.ledger.allow_overdraft);
        assert_eq!(config.ledger.mining_workers, 1);
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("LEDGER_PORT", "9000"),
            ("LEDGER_DIFFICULTY", "3"),
            ("LEDGER_MINING_REWARD", "12.5"),
            ("LEDGER_ALLOW_OVERDRAFT", "false"),
            ("LEDGER_MINING_WORKERS", "4"),
        ]))
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.ledger.difficulty, 3);
        assert_eq!(config.ledger.mining_reward, 12.5);
        assert!(!config.ledger.allow_overdraft);
        assert_eq!(config.ledger.mining_workers, 4);
    }

    #[test]
    fn test_invalid_value() {
        let err = Config::from_lookup(lookup_from(&[("LEDGER_DIFFICULTY", "hard")])).unwrap_err();

        assert_eq!(
            err,
            ConfigError::InvalidValue {
                field: "difficulty".to_string(),
                value: "hard".to_string(),
            }
        );
    }

    #[test]
    fn test_out_of_range() {
        assert!(Config::from_lookup(lookup_from(&[("LEDGER_DIFFICULTY", "0")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("LEDGER_DIFFICULTY", "65")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("LEDGER_MINING_WORKERS", "0")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("LEDGER_PORT", "0")])).is_err());
    }
}

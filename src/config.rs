//! Configuration for the ledger service

use serde::Deserialize;
use thiserror::Error;

use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::blockchain::chain::{AdmissionPolicy, DEFAULT_DIFFICULTY, MINING_REWARD};
use crate::blockchain::Address;

/// Environment variable naming the TOML config file
pub const CONFIG_ENV: &str = "LEDGER_CONFIG";

/// Highest accepted difficulty. Genesis is mined at startup with no timeout,
/// and every extra digit multiplies the expected search by 16.
const MAX_DIFFICULTY: usize = 6;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub wallets: WalletsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_difficulty")]
    pub difficulty: usize,
    #[serde(default = "default_mining_reward")]
    pub mining_reward: f64,
    /// Name of the demo wallet funded by the genesis block
    #[serde(default = "default_genesis_wallet")]
    pub genesis_wallet: Option<String>,
    #[serde(default = "default_genesis_amount")]
    pub genesis_amount: f64,
    #[serde(default)]
    pub admission_policy: AdmissionPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound on a single mining request; unbounded when absent
    #[serde(default)]
    pub mining_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletsConfig {
    /// Demo wallets generated at startup
    #[serde(default = "default_wallet_names")]
    pub names: Vec<String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty: default_difficulty(),
            mining_reward: default_mining_reward(),
            genesis_wallet: default_genesis_wallet(),
            genesis_amount: default_genesis_amount(),
            admission_policy: AdmissionPolicy::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            mining_timeout_ms: None,
        }
    }
}

impl Default for WalletsConfig {
    fn default() -> Self {
        Self {
            names: default_wallet_names(),
        }
    }
}

fn default_difficulty() -> usize {
    DEFAULT_DIFFICULTY
}

fn default_mining_reward() -> f64 {
    MINING_REWARD
}

fn default_genesis_wallet() -> Option<String> {
    Some("alice".to_string())
}

fn default_genesis_amount() -> f64 {
    100.0
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_wallet_names() -> Vec<String> {
    vec!["alice".to_string(), "bob".to_string(), "miner".to_string()]
}

impl Config {
    /// Parses and validates a TOML document
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the file at `path`, or the defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_toml(&fs::read_to_string(path)?),
            None => {
                let config = Config::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ledger = &self.ledger;

        if ledger.difficulty > MAX_DIFFICULTY {
            return Err(ConfigError::Invalid(format!(
                "ledger.difficulty must be at most {}, got {}",
                MAX_DIFFICULTY, ledger.difficulty
            )));
        }

        if !ledger.mining_reward.is_finite() || ledger.mining_reward <= 0.0 {
            return Err(ConfigError::Invalid(
                "ledger.mining_reward must be a positive number".to_string(),
            ));
        }

        if !ledger.genesis_amount.is_finite() || ledger.genesis_amount < 0.0 {
            return Err(ConfigError::Invalid(
                "ledger.genesis_amount must not be negative".to_string(),
            ));
        }

        if let Some(name) = &ledger.genesis_wallet {
            if !self.wallets.names.contains(name) {
                return Err(ConfigError::Invalid(format!(
                    "ledger.genesis_wallet '{}' is not listed in wallets.names",
                    name
                )));
            }
        }

        if self.wallets.names.iter().any(|name| name.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "wallets.names must not contain empty names".to_string(),
            ));
        }

        if let Some(name) = self
            .wallets
            .names
            .iter()
            .find(|name| Address::from_str(name).is_ok())
        {
            return Err(ConfigError::Invalid(format!(
                "wallets.names entry '{}' would shadow an address",
                name
            )));
        }

        Ok(())
    }
}

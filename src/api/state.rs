use parking_lot::{Mutex, MutexGuard};

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use super::error::ApiError;
use crate::blockchain::{Address, Ledger, Wallet};
use crate::config::Config;

/// Shared service state: the ledger and the named demo wallets.
/// Wallet keys live only in memory.
#[derive(Debug)]
pub struct AppState {
    ledger: Mutex<Ledger>,
    wallets: Mutex<BTreeMap<String, Wallet>>,
    mining_timeout: Option<Duration>,
}

impl AppState {
    /// Generates the configured wallets and a ledger whose genesis block funds
    /// the configured genesis wallet
    pub fn from_config(config: &Config) -> Self {
        let wallets: BTreeMap<String, Wallet> = config
            .wallets
            .names
            .iter()
            .map(|name| (name.clone(), Wallet::generate()))
            .collect();

        let beneficiary = config
            .ledger
            .genesis_wallet
            .as_ref()
            .and_then(|name| wallets.get(name))
            .map(|wallet| wallet.address().clone());

        let ledger = Ledger::new(
            config.ledger.difficulty,
            beneficiary,
            Some(config.ledger.genesis_amount),
        )
        .with_mining_reward(config.ledger.mining_reward)
        .with_admission_policy(config.ledger.admission_policy);

        AppState {
            ledger: Mutex::new(ledger),
            wallets: Mutex::new(wallets),
            mining_timeout: config.server.mining_timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock()
    }

    pub fn mining_timeout(&self) -> Option<Duration> {
        self.mining_timeout
    }

    /// Named wallets with their addresses, sorted by name
    pub fn wallet_addresses(&self) -> Vec<(String, Address)> {
        self.wallets
            .lock()
            .iter()
            .map(|(name, wallet)| (name.clone(), wallet.address().clone()))
            .collect()
    }

    pub fn wallet(&self, name: &str) -> Result<Wallet, ApiError> {
        self.wallets
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("Unknown wallet '{}'", name)))
    }

    pub fn create_wallet(&self, name: &str) -> Result<Address, ApiError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiError::BadRequest("Wallet name must not be empty".to_string()));
        }

        if Address::from_str(name).is_ok() {
            return Err(ApiError::BadRequest(format!(
                "Wallet name '{}' would shadow an address",
                name
            )));
        }

        let mut wallets = self.wallets.lock();
        if wallets.contains_key(name) {
            return Err(ApiError::Conflict(format!("Wallet '{}' already exists", name)));
        }

        let wallet = Wallet::generate();
        let address = wallet.address().clone();
        wallets.insert(name.to_string(), wallet);
        Ok(address)
    }

    /// Accepts either a wallet name or a raw address
    pub fn resolve_address(&self, name_or_address: &str) -> Result<Address, ApiError> {
        if let Some(wallet) = self.wallets.lock().get(name_or_address) {
            return Ok(wallet.address().clone());
        }

        Address::from_str(name_or_address).map_err(|err| {
            ApiError::BadRequest(format!(
                "'{}' is neither a wallet name nor a valid address: {}",
                name_or_address, err
            ))
        })
    }
}

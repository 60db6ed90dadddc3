// Ledger engine
//
// This module contains the core ledger implementation including:
// - Keypairs, addresses and signatures
// - Transaction structure and signature checks
// - Block structure and proof of work
// - The ledger: admission, balances, mining and audit
// - Tamper paths and attack drills used for demonstrations

pub mod block;
pub mod chain;
pub mod crypto;
pub mod scenarios;
pub mod tamper;
pub mod transaction;

// Re-export main components for easier access
pub use block::{Block, MiningError};
pub use chain::{AdmissionPolicy, Ledger, LedgerError};
pub use crypto::{Address, Wallet};
pub use transaction::{Transaction, TransactionError};

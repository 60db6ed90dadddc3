use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use super::transaction::Transaction;

/// `previous_hash` of the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Errors that can occur while sealing a block
#[derive(Debug, Error)]
pub enum MiningError {
    #[error("Mining of block {index} cancelled after {attempts} attempts")]
    Cancelled { index: u64, attempts: u64 },

    #[error("Block {index} is stale: the chain tip or the pending pool moved while it was mined")]
    Stale { index: u64 },

    #[error("Block {index} is not sealed for the current difficulty")]
    Unsealed { index: u64 },
}

/// Represents a block in the blockchain
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Index of the block in the chain
    pub(super) index: u64,

    /// Timestamp when the block was created
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    pub(super) timestamp: DateTime<Utc>,

    /// List of transactions included in this block
    pub(super) transactions: Vec<Transaction>,

    /// Hash of the previous block
    pub(super) previous_hash: String,

    /// Proof of work counter
    pub(super) nonce: u64,

    /// Hash of the current block (calculated)
    pub(super) hash: String,
}

/// Hash preimage. Field order is fixed by declaration.
#[derive(Serialize)]
struct HashPreimage<'a> {
    index: u64,
    timestamp: &'a DateTime<Utc>,
    transactions: &'a [Transaction],
    previous_hash: &'a str,
    nonce: u64,
}

impl Block {
    /// Creates a new, unsealed block with nonce 0
    pub fn new(index: u64, transactions: Vec<Transaction>, previous_hash: String) -> Self {
        let mut block = Block {
            index,
            timestamp: Utc::now(),
            transactions,
            previous_hash,
            nonce: 0,
            hash: String::new(),
        };

        block.hash = block.calculate_hash();
        block
    }

    /// Creates the first block of a chain
    pub fn genesis(transactions: Vec<Transaction>) -> Self {
        Block::new(0, transactions, GENESIS_PREVIOUS_HASH.to_string())
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    /// SHA-256 over the JSON encoding of index, timestamp, transactions,
    /// previous hash and nonce, as a lowercase hex string
    pub fn calculate_hash(&self) -> String {
        let preimage = HashPreimage {
            index: self.index,
            timestamp: &self.timestamp,
            transactions: &self.transactions,
            previous_hash: &self.previous_hash,
            nonce: self.nonce,
        };

        // Only derived Serialize impls over strings and numbers are involved.
        let bytes = serde_json::to_vec(&preimage).expect("block preimage is always serializable");

        format!("{:x}", Sha256::digest(&bytes))
    }

    /// Whether the stored hash starts with `difficulty` zero hex digits
    pub fn meets_difficulty(&self, difficulty: usize) -> bool {
        self.hash.len() >= difficulty && self.hash.bytes().take(difficulty).all(|b| b == b'0')
    }

    /// Proof of work: bumps the nonce until the hash meets the difficulty.
    /// Runs to completion.
    pub fn mine(&mut self, difficulty: usize) -> u64 {
        let mut attempts = 0;
        while !self.meets_difficulty(difficulty) {
            self.nonce += 1;
            self.hash = self.calculate_hash();
            attempts += 1;
        }
        attempts
    }

    /// Proof of work that gives up once `token` is cancelled.
    /// On cancellation the block is left partially searched and should be discarded.
    pub fn mine_with_token(
        &mut self,
        difficulty: usize,
        token: &CancellationToken,
    ) -> Result<u64, MiningError> {
        let mut attempts = 0;
        while !self.meets_difficulty(difficulty) {
            if token.is_cancelled() {
                return Err(MiningError::Cancelled {
                    index: self.index,
                    attempts,
                });
            }
            self.nonce += 1;
            self.hash = self.calculate_hash();
            attempts += 1;
        }
        Ok(attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::Address;

    fn sample_block() -> Block {
        let transactions = vec![
            Transaction::new_coinbase(Address("recipient1".to_string()), 10.0),
            Transaction::new_coinbase(Address("recipient2".to_string()), 20.0),
        ];
        Block::new(1, transactions, "previous_hash".to_string())
    }

    #[test]
    fn test_new_block() {
        let block = sample_block();

        assert_eq!(block.index(), 1);
        assert_eq!(block.nonce(), 0);
        assert_eq!(block.previous_hash(), "previous_hash");
        assert_eq!(block.hash().len(), 64);
        assert_eq!(block.hash(), block.calculate_hash());
    }

    #[test]
    fn test_hash_is_deterministic_and_field_sensitive() {
        let block = sample_block();
        assert_eq!(block.calculate_hash(), block.calculate_hash());

        let mut amount = block.clone();
        amount.transactions[1].amount = 21.0;
        assert_ne!(amount.calculate_hash(), block.hash());

        let mut nonce = block.clone();
        nonce.nonce += 1;
        assert_ne!(nonce.calculate_hash(), block.hash());

        let mut link = block.clone();
        link.previous_hash = "other".to_string();
        assert_ne!(link.calculate_hash(), block.hash());

        let mut index = block.clone();
        index.index = 2;
        assert_ne!(index.calculate_hash(), block.hash());
    }

    #[test]
    fn test_genesis_block() {
        let genesis = Block::genesis(Vec::new());
        assert!(genesis.is_genesis());
        assert_eq!(genesis.previous_hash(), GENESIS_PREVIOUS_HASH);
        assert!(genesis.transactions().is_empty());
    }

    #[test]
    fn test_mine_meets_difficulty() {
        let mut block = sample_block();
        block.mine(2);

        assert!(block.hash().starts_with("00"));
        assert_eq!(block.hash(), block.calculate_hash());
    }

    #[test]
    fn test_zero_difficulty_needs_no_work() {
        let mut block = sample_block();
        assert_eq!(block.mine(0), 0);
        assert_eq!(block.nonce(), 0);
    }

    #[test]
    fn test_cancelled_mining() {
        let mut block = sample_block();
        let token = CancellationToken::new();
        token.cancel();

        // 64 zero digits is unreachable, so the token is the only way out
        let result = block.mine_with_token(64, &token);
        assert!(matches!(result, Err(MiningError::Cancelled { index: 1, attempts: 0 })));
    }

    #[test]
    fn test_mine_with_live_token_completes() {
        let mut block = sample_block();
        let token = CancellationToken::new();

        block.mine_with_token(1, &token).unwrap();
        assert!(block.meets_difficulty(1));
    }
}

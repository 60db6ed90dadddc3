use std::time::Instant;

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use super::block::{Block, MiningError};
use super::crypto::Address;
use super::transaction::{Transaction, TransactionError};

/// Default number of leading zero hex digits a block hash needs
pub const DEFAULT_DIFFICULTY: usize = 4;

/// Default amount credited to the miner of each block
pub const MINING_REWARD: f64 = 50.0;

/// Errors that can occur when submitting a transaction
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error("Insufficient funds for {address}: balance {available}, needs {required}")]
    InsufficientFunds {
        address: Address,
        available: f64,
        required: f64,
    },
}

/// Integrity failures reported by [`Ledger::is_chain_valid`]
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Hash of block {index} is invalid: stored {stored}, computed {computed}")]
    HashMismatch {
        index: u64,
        stored: String,
        computed: String,
    },

    #[error("Broken link: previous hash of block {index} does not match the hash of block {}", .index - 1)]
    BrokenLink {
        index: u64,
        expected: String,
        found: String,
    },

    #[error("Invalid transaction {tx_index} in block {index}: {source}")]
    InvalidBlock {
        index: u64,
        tx_index: usize,
        source: TransactionError,
    },
}

/// Which balance a sender is checked against at admission time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionPolicy {
    /// Confirmed chain balance only. Pending spends from the same sender are
    /// not counted, so several pending transfers may overdraw together.
    #[default]
    ConfirmedOnly,

    /// Confirmed chain balance minus the sender's pending spends
    PendingAware,
}

/// The chain plus its pending pool. All mutation goes through `&mut self`.
#[derive(Debug, Clone)]
pub struct Ledger {
    /// The chain of blocks
    pub(super) chain: Vec<Block>,

    /// Pending transactions to be included in the next block
    pending_transactions: Vec<Transaction>,

    /// Mining difficulty (number of leading zeros required in hash)
    difficulty: usize,

    /// Mining reward
    mining_reward: f64,

    admission_policy: AdmissionPolicy,
}

impl Ledger {
    /// Creates a ledger with a sealed genesis block, optionally funding
    /// `genesis_beneficiary` with `genesis_amount`
    pub fn new(
        difficulty: usize,
        genesis_beneficiary: Option<Address>,
        genesis_amount: Option<f64>,
    ) -> Self {
        let mut genesis_transactions = Vec::new();
        if let (Some(beneficiary), Some(amount)) = (genesis_beneficiary, genesis_amount) {
            if amount > 0.0 {
                genesis_transactions.push(Transaction::new_coinbase(beneficiary, amount));
            }
        }

        let mut genesis = Block::genesis(genesis_transactions);
        genesis.mine(difficulty);

        Ledger {
            chain: vec![genesis],
            pending_transactions: Vec::new(),
            difficulty,
            mining_reward: MINING_REWARD,
            admission_policy: AdmissionPolicy::default(),
        }
    }

    pub fn with_mining_reward(mut self, mining_reward: f64) -> Self {
        self.mining_reward = mining_reward;
        self
    }

    pub fn with_admission_policy(mut self, admission_policy: AdmissionPolicy) -> Self {
        self.admission_policy = admission_policy;
        self
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn pending_transactions(&self) -> &[Transaction] {
        &self.pending_transactions
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    pub fn mining_reward(&self) -> f64 {
        self.mining_reward
    }

    pub fn admission_policy(&self) -> AdmissionPolicy {
        self.admission_policy
    }

    #[cfg(test)]
    pub(crate) fn set_difficulty(&mut self, difficulty: usize) {
        self.difficulty = difficulty;
    }

    pub fn latest_block(&self) -> &Block {
        // The genesis block is created in `new` and the chain only grows.
        &self.chain[self.chain.len() - 1]
    }

    fn transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.chain.iter().flat_map(|block| block.transactions.iter())
    }

    /// Replays every confirmed transaction: credits to `address` minus debits from it
    pub fn balance(&self, address: &Address) -> f64 {
        self.transactions().fold(0.0, |balance, tx| {
            let mut balance = balance;
            if &tx.recipient == address {
                balance += tx.amount;
            }
            if &tx.sender == address {
                balance -= tx.amount;
            }
            balance
        })
    }

    /// Total amount ever issued by coinbase transactions in the chain
    pub fn issued_supply(&self) -> f64 {
        self.transactions()
            .filter(|tx| tx.is_coinbase())
            .map(|tx| tx.amount)
            .sum()
    }

    fn pending_spend(&self, address: &Address) -> f64 {
        self.pending_transactions
            .iter()
            .filter(|tx| &tx.sender == address)
            .map(|tx| tx.amount)
            .sum()
    }

    /// Validates a transaction and adds it to the pending pool
    pub fn add_transaction(&mut self, transaction: Transaction) -> Result<(), LedgerError> {
        if transaction.sender.is_empty()
            || transaction.recipient.is_empty()
            || !transaction.amount.is_finite()
            || transaction.amount <= 0.0
        {
            return Err(TransactionError::Malformed(
                "incomplete data or non-positive amount".to_string(),
            )
            .into());
        }

        transaction.is_valid()?;

        if !transaction.is_coinbase() {
            let mut available = self.balance(&transaction.sender);
            if self.admission_policy == AdmissionPolicy::PendingAware {
                available -= self.pending_spend(&transaction.sender);
            }

            if available < transaction.amount {
                return Err(LedgerError::InsufficientFunds {
                    address: transaction.sender.clone(),
                    available,
                    required: transaction.amount,
                });
            }
        }

        self.pending_transactions.push(transaction);
        Ok(())
    }

    /// Builds the next block: reward first, then the pending pool in order
    fn next_block(&self, reward_address: &Address) -> Block {
        let reward = Transaction::new_coinbase(reward_address.clone(), self.mining_reward);

        let mut transactions = Vec::with_capacity(self.pending_transactions.len() + 1);
        transactions.push(reward);
        transactions.extend(self.pending_transactions.iter().cloned());

        Block::new(
            self.chain.len() as u64,
            transactions,
            self.latest_block().hash.clone(),
        )
    }

    /// Appends a sealed block and drops the first `mined` transfers from the pool
    fn append(&mut self, block: Block, mined: usize) -> Block {
        self.chain.push(block.clone());
        self.pending_transactions.drain(..mined);
        block
    }

    /// Mines the pending pool into a new block, crediting `reward_address`.
    /// Returns `None` when there is nothing to mine.
    pub fn mine_pending(&mut self, reward_address: &Address) -> Option<Block> {
        let mut block = self.prepare_block(reward_address)?;
        let started = Instant::now();
        let attempts = block.mine(self.difficulty);
        debug!(
            "Mined block {} with {} transactions in {:?} ({} attempts)",
            block.index,
            block.transactions.len(),
            started.elapsed(),
            attempts
        );

        let mined = self.pending_transactions.len();
        Some(self.append(block, mined))
    }

    /// Like [`Ledger::mine_pending`], but stops when `token` is cancelled.
    /// A cancelled run leaves the chain and the pending pool untouched.
    pub fn mine_pending_with_token(
        &mut self,
        reward_address: &Address,
        token: &CancellationToken,
    ) -> Result<Option<Block>, MiningError> {
        let Some(mut block) = self.prepare_block(reward_address) else {
            return Ok(None);
        };
        let started = Instant::now();
        let attempts = block.mine_with_token(self.difficulty, token)?;
        debug!(
            "Mined block {} with {} transactions in {:?} ({} attempts)",
            block.index,
            block.transactions.len(),
            started.elapsed(),
            attempts
        );

        let mined = self.pending_transactions.len();
        Ok(Some(self.append(block, mined)))
    }

    /// Snapshots the next block (reward plus the whole pending pool) without
    /// sealing it. Returns `None` when there is nothing to mine.
    ///
    /// The block can be sealed away from the ledger with
    /// [`Block::mine_with_token`] and handed back to [`Ledger::commit_block`].
    pub fn prepare_block(&self, reward_address: &Address) -> Option<Block> {
        if self.pending_transactions.is_empty() {
            debug!("No pending transactions to mine");
            return None;
        }

        Some(self.next_block(reward_address))
    }

    /// Appends a block sealed outside the ledger.
    ///
    /// The block must extend the current tip, pay exactly the mining reward
    /// first and carry transfers that still lead the pending pool. Those
    /// transfers leave the pool together with the append; anything admitted
    /// while the block was mined stays pending.
    pub fn commit_block(&mut self, block: Block) -> Result<Block, MiningError> {
        if block.hash != block.calculate_hash() || !block.meets_difficulty(self.difficulty) {
            return Err(MiningError::Unsealed { index: block.index });
        }

        let (reward, transfers) = match block.transactions.split_first() {
            Some(split) => split,
            None => return Err(MiningError::Stale { index: block.index }),
        };

        let extends_tip = block.index == self.chain.len() as u64
            && block.previous_hash == self.latest_block().hash;
        let pays_reward = reward.is_coinbase() && reward.amount == self.mining_reward;

        if !extends_tip
            || !pays_reward
            || transfers.is_empty()
            || !self.pending_transactions.starts_with(transfers)
        {
            return Err(MiningError::Stale { index: block.index });
        }

        let mined = transfers.len();
        debug!("Committing block {} with {} transfers", block.index, mined);
        Ok(self.append(block, mined))
    }

    /// Audits every block after genesis: stored hash, link to the previous
    /// block and every transaction signature. Stops at the first failure.
    pub fn is_chain_valid(&self) -> Result<(), ChainError> {
        for pair in self.chain.windows(2) {
            let (previous, current) = (&pair[0], &pair[1]);

            let computed = current.calculate_hash();
            if current.hash != computed {
                return Err(ChainError::HashMismatch {
                    index: current.index,
                    stored: current.hash.clone(),
                    computed,
                });
            }

            if current.previous_hash != previous.hash {
                return Err(ChainError::BrokenLink {
                    index: current.index,
                    expected: previous.hash.clone(),
                    found: current.previous_hash.clone(),
                });
            }

            for (tx_index, tx) in current.transactions.iter().enumerate() {
                tx.is_valid().map_err(|source| ChainError::InvalidBlock {
                    index: current.index,
                    tx_index,
                    source,
                })?;
            }
        }

        Ok(())
    }
}

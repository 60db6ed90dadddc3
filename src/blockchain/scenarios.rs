// Attack drills. Each one works on a clone of the ledger, so the live chain
// is never touched.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use super::block::MiningError;
use super::chain::{Ledger, LedgerError};
use super::crypto::{Address, Wallet};
use super::tamper::TamperError;
use super::transaction::{Transaction, TransactionError};

/// Share of the spender's confirmed balance used by each double-spend transfer
const DOUBLE_SPEND_SHARE: f64 = 0.75;

/// Outcome of an attack drill
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AttackReport {
    /// Name of the drill
    pub scenario: String,

    /// Whether the ledger caught or refused the attack
    pub defended: bool,

    /// Why the attack was or was not stopped
    pub detail: String,

    /// What happened, in order
    pub steps: Vec<String>,
}

impl AttackReport {
    fn new(scenario: &str) -> Self {
        AttackReport {
            scenario: scenario.to_string(),
            defended: false,
            detail: String::new(),
            steps: Vec::new(),
        }
    }

    fn step(&mut self, step: impl Into<String>) {
        self.steps.push(step.into());
    }

    fn finish(mut self, defended: bool, detail: impl Into<String>) -> Self {
        self.defended = defended;
        self.detail = detail.into();
        self
    }
}

/// Rewrites a mined transaction amount, then audits the chain
pub fn immutability_attack(
    ledger: &Ledger,
    block_index: usize,
    tx_index: usize,
    amount: f64,
    rehash: bool,
) -> Result<AttackReport, TamperError> {
    let mut report = AttackReport::new("immutability");
    let mut copy = ledger.clone();

    let original = copy.force_mutate_amount(block_index, tx_index, amount, rehash)?;
    report.step(format!(
        "Changed transaction {} of block {} from {} to {}",
        tx_index, block_index, original, amount
    ));
    if rehash {
        report.step(format!("Recomputed the stored hash of block {}", block_index));
    }

    report.step("Audited the chain");
    Ok(match copy.is_chain_valid() {
        Ok(()) => report.finish(false, "The audit did not notice the change"),
        Err(err) => report.finish(true, err.to_string()),
    })
}

/// Copies the signature of a legitimate transfer onto a forged one and submits it
pub fn forged_signature_attack(
    ledger: &Ledger,
    victim: &Wallet,
    recipient: &Address,
    thief: &Address,
    amount: f64,
) -> AttackReport {
    let mut report = AttackReport::new("forged-signature");
    let mut copy = ledger.clone();

    let mut legit = Transaction::new(victim.address().clone(), recipient.clone(), 1.0);
    if let Err(err) = legit.sign(victim) {
        return report.finish(false, err.to_string());
    }
    report.step(format!(
        "{} signed a transfer of 1 to {}",
        victim.address().short(),
        recipient.short()
    ));

    let forged =
        Transaction::with_stolen_signature(victim.address().clone(), thief.clone(), amount, &legit);
    report.step(format!(
        "Pasted that signature onto a transfer of {} to {}",
        amount,
        thief.short()
    ));

    report.step("Submitted the forged transfer");
    match copy.add_transaction(forged) {
        Ok(()) => report.finish(false, "The forged transfer was admitted"),
        Err(err @ LedgerError::Transaction(TransactionError::InvalidSignature(_))) => {
            report.finish(true, err.to_string())
        }
        Err(err) => report.finish(false, format!("Rejected for another reason: {}", err)),
    }
}

/// Signs two transfers that each spend most of the spender's confirmed balance
/// and submits both, then mines whatever was admitted. Mining stops with an
/// error when `token` is cancelled.
pub fn double_spend_attack(
    ledger: &Ledger,
    spender: &Wallet,
    first: &Address,
    second: &Address,
    miner: &Address,
    token: &CancellationToken,
) -> Result<AttackReport, MiningError> {
    let mut report = AttackReport::new("double-spend");
    let mut copy = ledger.clone();

    let balance = copy.balance(spender.address());
    if balance <= 0.0 {
        return Ok(report.finish(false, "The spender has no confirmed funds"));
    }

    let amount = balance * DOUBLE_SPEND_SHARE;
    report.step(format!(
        "Spender holds {} and signs two transfers of {}",
        balance, amount
    ));

    for (label, recipient) in [("first", first), ("second", second)] {
        let mut tx = Transaction::new(spender.address().clone(), recipient.clone(), amount);
        if let Err(err) = tx.sign(spender) {
            return Ok(report.finish(false, err.to_string()));
        }

        match copy.add_transaction(tx) {
            Ok(()) => report.step(format!("The {} transfer was admitted", label)),
            Err(err) => {
                report.step(format!("The {} transfer was rejected", label));
                return Ok(report.finish(label == "second", err.to_string()));
            }
        }
    }

    if copy.mine_pending_with_token(miner, token)?.is_some() {
        report.step("Mined both transfers into a block");
    }

    let final_balance = copy.balance(spender.address());
    Ok(report.finish(
        false,
        format!(
            "Admission only checks confirmed balances; the spender ends at {}",
            final_balance
        ),
    ))
}

// Deliberate corruption paths used by the attack scenarios. Nothing here is
// reachable from outside the crate; the normal API never writes to a mined block.

use thiserror::Error;

use super::chain::Ledger;
use super::crypto::Address;
use super::transaction::Transaction;

#[derive(Debug, Error)]
pub enum TamperError {
    #[error("Block {0} cannot be tampered with: it does not exist or is the genesis block")]
    BlockOutOfRange(usize),

    #[error("Block {block} has no transaction {tx}")]
    TransactionOutOfRange { block: usize, tx: usize },
}

impl Ledger {
    /// Overwrites the amount of a mined transaction and returns the old amount.
    ///
    /// With `rehash` the block's stored hash is recomputed as well, hiding the
    /// edit from the hash check so that the link or signature check trips instead.
    pub(crate) fn force_mutate_amount(
        &mut self,
        block_index: usize,
        tx_index: usize,
        amount: f64,
        rehash: bool,
    ) -> Result<f64, TamperError> {
        if block_index == 0 {
            return Err(TamperError::BlockOutOfRange(block_index));
        }

        let block = self
            .chain
            .get_mut(block_index)
            .ok_or(TamperError::BlockOutOfRange(block_index))?;

        let tx = block
            .transactions
            .get_mut(tx_index)
            .ok_or(TamperError::TransactionOutOfRange {
                block: block_index,
                tx: tx_index,
            })?;

        let original = tx.amount;
        tx.amount = amount;

        if rehash {
            block.hash = block.calculate_hash();
        }

        Ok(original)
    }
}

impl Transaction {
    /// A fresh transaction carrying `victim`'s signature
    pub(crate) fn with_stolen_signature(
        sender: Address,
        recipient: Address,
        amount: f64,
        victim: &Transaction,
    ) -> Transaction {
        let mut forged = Transaction::new(sender, recipient, amount);
        forged.signature = victim.signature.clone();
        forged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::chain::ChainError;
    use crate::blockchain::crypto::Wallet;
    use crate::blockchain::transaction::TransactionError;

    fn ledger_with_blocks(blocks: usize) -> (Ledger, Wallet, Wallet) {
        let alice = Wallet::generate();
        let bob = Wallet::generate();
        let mut ledger = Ledger::new(1, Some(alice.address().clone()), Some(100.0));

        for _ in 0..blocks {
            let mut tx = Transaction::new(alice.address().clone(), bob.address().clone(), 5.0);
            tx.sign(&alice).unwrap();
            ledger.add_transaction(tx).unwrap();
            ledger.mine_pending(bob.address()).unwrap();
        }

        (ledger, alice, bob)
    }

    #[test]
    fn test_mutation_is_caught_by_hash_check() {
        let (mut ledger, _, _) = ledger_with_blocks(1);

        let original = ledger.force_mutate_amount(1, 1, 9999.0, false).unwrap();
        assert_eq!(original, 5.0);
        assert_eq!(ledger.chain()[1].transactions()[1].amount(), 9999.0);

        assert!(matches!(
            ledger.is_chain_valid(),
            Err(ChainError::HashMismatch { index: 1, .. })
        ));
    }

    #[test]
    fn test_rehashed_mutation_breaks_next_link() {
        let (mut ledger, _, _) = ledger_with_blocks(2);

        // Reward transactions carry no signature, so only the link can catch this
        ledger.force_mutate_amount(1, 0, 1_000_000.0, true).unwrap();

        assert!(matches!(
            ledger.is_chain_valid(),
            Err(ChainError::BrokenLink { index: 2, .. })
        ));
    }

    #[test]
    fn test_rehashed_mutation_of_tip_breaks_signature() {
        let (mut ledger, _, _) = ledger_with_blocks(1);

        ledger.force_mutate_amount(1, 1, 0.5, true).unwrap();

        assert!(matches!(
            ledger.is_chain_valid(),
            Err(ChainError::InvalidBlock {
                index: 1,
                tx_index: 1,
                source: TransactionError::InvalidSignature(_)
            })
        ));
    }

    #[test]
    fn test_out_of_range_targets() {
        let (mut ledger, _, _) = ledger_with_blocks(1);

        assert!(matches!(
            ledger.force_mutate_amount(0, 0, 1.0, false),
            Err(TamperError::BlockOutOfRange(0))
        ));
        assert!(matches!(
            ledger.force_mutate_amount(5, 0, 1.0, false),
            Err(TamperError::BlockOutOfRange(5))
        ));
        assert!(matches!(
            ledger.force_mutate_amount(1, 7, 1.0, false),
            Err(TamperError::TransactionOutOfRange { block: 1, tx: 7 })
        ));
        assert!(ledger.is_chain_valid().is_ok());
    }

    #[test]
    fn test_stolen_signature_fails_validation() {
        let alice = Wallet::generate();
        let bob = Wallet::generate();
        let eve = Wallet::generate();

        let mut legit = Transaction::new(alice.address().clone(), bob.address().clone(), 1.0);
        legit.sign(&alice).unwrap();
        assert!(legit.is_valid().is_ok());

        let forged = Transaction::with_stolen_signature(
            alice.address().clone(),
            eve.address().clone(),
            1000.0,
            &legit,
        );

        assert_eq!(forged.signature(), legit.signature());
        assert!(matches!(forged.is_valid(), Err(TransactionError::InvalidSignature(_))));
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::crypto::{verify_signature, Address, CryptoError, DigitalSignature, Wallet};

/// Sender address reserved for issuance (mining rewards and genesis funding)
pub const COINBASE: &str = "COINBASE";

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Malformed transaction: {0}")]
    Malformed(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Wallet {signer} cannot sign for sender {sender}")]
    Unauthorized { signer: Address, sender: Address },

    #[error("Unexpected error during validation: {0}")]
    Unexpected(String),
}

/// A value transfer between two addresses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    /// Sender's address
    pub(super) sender: Address,

    /// Recipient's address
    pub(super) recipient: Address,

    /// Amount being transferred
    pub(super) amount: f64,

    /// Creation time, captured once and part of the signed payload
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    pub(super) timestamp: DateTime<Utc>,

    /// Signature over the canonical payload
    pub(super) signature: Option<DigitalSignature>,
}

/// Fields covered by the signature. Declared in lexicographic order so the
/// JSON encoding has sorted keys regardless of serde_json features.
#[derive(Serialize)]
struct SigningPayload<'a> {
    amount: f64,
    recipient: &'a str,
    sender: &'a str,
    timestamp: &'a DateTime<Utc>,
}

impl Transaction {
    /// Creates a new unsigned transaction stamped with the current time
    pub fn new(sender: Address, recipient: Address, amount: f64) -> Self {
        Transaction {
            sender,
            recipient,
            amount,
            timestamp: Utc::now(),
            signature: None,
        }
    }

    /// Creates a new coinbase transaction (mining reward or genesis funding)
    pub fn new_coinbase(recipient: Address, amount: f64) -> Self {
        Transaction::new(Address::coinbase(), recipient, amount)
    }

    pub fn sender(&self) -> &Address {
        &self.sender
    }

    pub fn recipient(&self) -> &Address {
        &self.recipient
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn signature(&self) -> Option<&DigitalSignature> {
        self.signature.as_ref()
    }

    pub fn is_coinbase(&self) -> bool {
        self.sender.is_coinbase()
    }

    /// Deterministic encoding of sender, recipient, amount and timestamp.
    /// This is what gets signed and re-verified; the signature is excluded.
    pub fn canonical_payload(&self) -> Result<String, TransactionError> {
        let payload = SigningPayload {
            amount: self.amount,
            recipient: self.recipient.as_str(),
            sender: self.sender.as_str(),
            timestamp: &self.timestamp,
        };

        serde_json::to_string(&payload).map_err(|e| TransactionError::Unexpected(e.to_string()))
    }

    /// Signs the transaction with the sender's wallet
    pub fn sign(&mut self, wallet: &Wallet) -> Result<(), TransactionError> {
        if wallet.address() != &self.sender {
            return Err(TransactionError::Unauthorized {
                signer: wallet.address().clone(),
                sender: self.sender.clone(),
            });
        }

        let message = self.canonical_payload()?;
        self.signature = Some(wallet.sign(message.as_bytes()));

        Ok(())
    }

    /// Checks the signature against the sender's public key.
    ///
    /// Coinbase transactions are valid unconditionally.
    pub fn is_valid(&self) -> Result<(), TransactionError> {
        if self.is_coinbase() {
            return Ok(());
        }

        let signature = match &self.signature {
            Some(signature) if !self.sender.is_empty() => signature,
            _ => {
                return Err(TransactionError::Malformed(
                    "transaction has no signature or sender".to_string(),
                ))
            }
        };

        let public_key = self.sender.to_public_key().map_err(|err| match err {
            CryptoError::DecodingError(msg) => {
                TransactionError::InvalidSignature(format!("sender is not a valid address: {}", msg))
            }
            other => TransactionError::Unexpected(other.to_string()),
        })?;

        let message = self.canonical_payload()?;

        let verified = verify_signature(message.as_bytes(), signature, &public_key)
            .map_err(|err| TransactionError::InvalidSignature(err.to_string()))?;

        if !verified {
            return Err(TransactionError::InvalidSignature(
                "signature does not match the transaction payload".to_string(),
            ));
        }

        Ok(())
    }
}

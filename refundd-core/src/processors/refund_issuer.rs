//! Refund issuer.
//!
//! Builds and submits the on-chain refund for a verified deposit and
//! records the outcome. Transaction construction and signing live behind
//! the [`RefundSubmitter`] seam; this processor owns the preconditions and
//! the at-most-once guarantee.

use crate::ledger::{Ledger, LedgerError};
use async_trait::async_trait;
use std::collections::HashSet;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Errors from refund submission.
#[derive(Debug, Error)]
pub enum RefundError {
    /// The refund wallet cannot cover the amount plus fees.
    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),

    /// Transaction construction failed.
    #[error("transaction build error: {0}")]
    Build(String),

    /// The built transaction was rejected on submission.
    #[error("submission error: {0}")]
    Submit(String),
}

/// Builds, signs and submits a refund transaction.
///
/// Implementations live outside this crate (the server delegates to a
/// wallet service); tests inject scripted ones.
#[async_trait]
pub trait RefundSubmitter: Send + Sync {
    /// Submit a refund of `amount` lovelace to `to_address`.
    /// Returns the hash of the submitted transaction.
    async fn submit_refund(&self, to_address: &str, amount: u64) -> Result<String, RefundError>;
}

/// Result of a refund attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundOutcome {
    /// A refund transaction was submitted and recorded.
    Refunded { tx_hash: String },
    /// The deposit was already refunded (or another attempt is settling
    /// it right now); a successful no-op, never an error.
    AlreadyRefunded,
    /// Preconditions not met: no record, or not verified yet.
    NotEligible { reason: String },
    /// Submission failed; the record stays unrefunded and is picked up by
    /// a later retry sweep.
    Failed { message: String },
}

/// Issues refunds with at-most-once semantics per depositor.
pub struct RefundIssuer {
    ledger: Ledger,
    submitter: std::sync::Arc<dyn RefundSubmitter>,
    /// Depositor addresses with a refund attempt currently in flight.
    /// Serializes concurrent attempts for the same address so two callers
    /// cannot both reach the submitter.
    in_flight: Mutex<HashSet<String>>,
}

impl RefundIssuer {
    pub fn new(ledger: Ledger, submitter: std::sync::Arc<dyn RefundSubmitter>) -> Self {
        Self {
            ledger,
            submitter,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Attempt a refund for the deposit of `depositor_address`.
    ///
    /// `refund_to` defaults to the recorded sender wallet. Safe to call
    /// twice: the second call observes `refunded` and returns
    /// [`RefundOutcome::AlreadyRefunded`].
    pub async fn process_refund(
        &self,
        depositor_address: &str,
        refund_to: Option<&str>,
    ) -> Result<RefundOutcome, LedgerError> {
        {
            let mut in_flight = self.in_flight.lock().await;
            if !in_flight.insert(depositor_address.to_string()) {
                debug!(address = depositor_address, "refund already in flight");
                return Ok(RefundOutcome::AlreadyRefunded);
            }
        }

        let outcome = self.process_inner(depositor_address, refund_to).await;
        self.in_flight.lock().await.remove(depositor_address);
        outcome
    }

    async fn process_inner(
        &self,
        depositor_address: &str,
        refund_to: Option<&str>,
    ) -> Result<RefundOutcome, LedgerError> {
        // Read the latest persisted state inside the in-flight guard; no
        // decision is made from a stale snapshot.
        let Some(record) = self.ledger.deposit_record(depositor_address).await? else {
            return Ok(RefundOutcome::NotEligible {
                reason: format!("no deposit record for {depositor_address}"),
            });
        };

        if record.refunded {
            debug!(address = depositor_address, "deposit already refunded");
            return Ok(RefundOutcome::AlreadyRefunded);
        }

        if !record.verified {
            return Ok(RefundOutcome::NotEligible {
                reason: format!("deposit for {depositor_address} is not verified"),
            });
        }

        let to_address = refund_to.unwrap_or(&record.sender_wallet_address);
        let amount = record.amount as u64;

        match self.submitter.submit_refund(to_address, amount).await {
            Ok(refund_tx_hash) => {
                if !self
                    .ledger
                    .mark_refunded(depositor_address, &refund_tx_hash)
                    .await?
                {
                    warn!(
                        address = depositor_address,
                        refund_tx_hash = %refund_tx_hash,
                        "refund submitted but record was already marked refunded"
                    );
                    return Ok(RefundOutcome::AlreadyRefunded);
                }

                self.ledger
                    .log_refund(depositor_address, &refund_tx_hash, amount)
                    .await?;

                info!(
                    address = depositor_address,
                    refund_tx_hash = %refund_tx_hash,
                    amount,
                    "refund submitted"
                );
                Ok(RefundOutcome::Refunded {
                    tx_hash: refund_tx_hash,
                })
            }
            Err(e) => {
                warn!(
                    address = depositor_address,
                    error = %e,
                    "refund failed, record left for retry"
                );
                Ok(RefundOutcome::Failed {
                    message: e.to_string(),
                })
            }
        }
    }
}

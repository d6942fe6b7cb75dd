//! Event type definitions.
//!
//! Events are ephemeral facts emitted after a match is confirmed and the
//! transaction is claimed in the ledger; listeners must not be able to
//! affect engine state.

use serde::Serialize;

/// A qualifying deposit was detected and claimed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepositDetected {
    /// The depositor wallet address.
    pub address: String,
    /// Hash of the deposit transaction.
    pub tx_hash: String,
    /// Deposit amount in lovelace.
    pub amount: u64,
    /// Block timestamp of the deposit transaction.
    pub block_timestamp: i64,
}

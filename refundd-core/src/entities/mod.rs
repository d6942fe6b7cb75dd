//! Persistent entities and their queries.

pub mod deposit_record;
pub mod processed_transaction;
pub mod transaction_log;

pub use deposit_record::{DepositRecord, NewDeposit};
pub use processed_transaction::ProcessedTransaction;
pub use transaction_log::{LogStatus, TransactionLogEntry};

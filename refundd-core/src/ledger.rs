//! Idempotency ledger.
//!
//! Durable facade over the deposit records, processed-transaction markers
//! and the transaction log. An in-memory set would not survive a restart
//! of the reconciliation loop, which must never replay a refund, so
//! everything here is backed by SQLite.

use crate::entities::{DepositRecord, NewDeposit, ProcessedTransaction, TransactionLogEntry};
use sqlx::SqlitePool;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info};

/// Errors from ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Durable record of what has been processed and refunded.
#[derive(Clone)]
pub struct Ledger {
    pool: SqlitePool,
}

impl Ledger {
    /// Open the ledger over an existing pool: creates the schema if absent
    /// and rehydrates processed markers from settled refunds.
    pub async fn open(pool: SqlitePool) -> Result<Self, LedgerError> {
        let ledger = Self { pool };
        ledger.migrate().await?;
        let restored = ledger.rehydrate().await?;
        if restored > 0 {
            info!(restored, "rehydrated processed markers from refund records");
        }
        Ok(ledger)
    }

    /// The underlying pool, for callers that need raw queries (tests).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS deposit_records (
                user_address TEXT PRIMARY KEY,
                user_id TEXT,
                phone_hash TEXT,
                tx_hash TEXT NOT NULL,
                amount INTEGER NOT NULL,
                sender_wallet_address TEXT NOT NULL,
                verified INTEGER NOT NULL DEFAULT 0,
                signup_completed INTEGER NOT NULL DEFAULT 0,
                refunded INTEGER NOT NULL DEFAULT 0,
                refund_tx_hash TEXT,
                verification_attempts INTEGER NOT NULL DEFAULT 0,
                block_timestamp INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS processed_transactions (
                tx_hash TEXT PRIMARY KEY,
                processed_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transaction_log (
                id TEXT PRIMARY KEY,
                address TEXT NOT NULL,
                tx_hash TEXT NOT NULL,
                entry_type TEXT NOT NULL,
                amount INTEGER NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Re-derive processed markers from deposits that are already settled.
    ///
    /// The marker store can be partially lost while refund records survive
    /// (or vice versa); re-inserting markers for every refunded deposit
    /// means a cold start cannot replay those refunds even then.
    pub async fn rehydrate(&self) -> Result<usize, LedgerError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO processed_transactions (tx_hash, processed_at)
            SELECT tx_hash, ? FROM deposit_records WHERE refunded = 1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    /// Whether a transaction hash has already been handled.
    pub async fn is_processed(&self, tx_hash: &str) -> Result<bool, LedgerError> {
        Ok(ProcessedTransaction::exists(&self.pool, tx_hash).await?)
    }

    /// Atomically claim a transaction hash for processing.
    ///
    /// Returns true iff this call inserted the marker. The scheduled loop
    /// and the manual-trigger path both go through this claim, so
    /// overlapping cycles cannot double-process a transaction.
    pub async fn mark_processed(&self, tx_hash: &str) -> Result<bool, LedgerError> {
        let claimed = ProcessedTransaction::claim(&self.pool, tx_hash).await?;
        if !claimed {
            debug!(tx_hash, "transaction already marked processed");
        }
        Ok(claimed)
    }

    pub async fn processed_count(&self) -> Result<i64, LedgerError> {
        Ok(ProcessedTransaction::count(&self.pool).await?)
    }

    pub async fn deposit_record(
        &self,
        user_address: &str,
    ) -> Result<Option<DepositRecord>, LedgerError> {
        Ok(DepositRecord::get(&self.pool, user_address).await?)
    }

    /// Create or refresh a deposit record; refund state is never touched.
    pub async fn upsert_deposit(&self, deposit: &NewDeposit) -> Result<(), LedgerError> {
        DepositRecord::upsert(&self.pool, deposit).await?;
        Ok(())
    }

    /// Guarded refunded transition; true iff this call performed it.
    pub async fn mark_refunded(
        &self,
        user_address: &str,
        refund_tx_hash: &str,
    ) -> Result<bool, LedgerError> {
        Ok(DepositRecord::mark_refunded(&self.pool, user_address, refund_tx_hash).await?)
    }

    pub async fn mark_verified(&self, user_address: &str) -> Result<(), LedgerError> {
        DepositRecord::mark_verified(&self.pool, user_address).await?;
        Ok(())
    }

    pub async fn bump_verification_attempts(&self, user_address: &str) -> Result<(), LedgerError> {
        DepositRecord::bump_verification_attempts(&self.pool, user_address).await?;
        Ok(())
    }

    /// Record an out-of-band signup completion against a deposit.
    pub async fn complete_signup(
        &self,
        user_address: &str,
        user_id: &str,
        phone_hash: Option<&str>,
    ) -> Result<bool, LedgerError> {
        Ok(DepositRecord::complete_signup(&self.pool, user_address, user_id, phone_hash).await?)
    }

    /// Verified deposits still awaiting a refund, for the retry sweep.
    pub async fn unrefunded_deposits(&self) -> Result<Vec<DepositRecord>, LedgerError> {
        Ok(DepositRecord::list_unrefunded(&self.pool).await?)
    }

    /// Append a pending refund entry to the transaction log.
    pub async fn log_refund(
        &self,
        address: &str,
        tx_hash: &str,
        amount: u64,
    ) -> Result<(), LedgerError> {
        TransactionLogEntry::insert_refund(&self.pool, address, tx_hash, amount).await?;
        Ok(())
    }
}

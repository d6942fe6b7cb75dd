//! Outbound money-movement log.
//!
//! Every issued refund gets a log entry with status `pending`;
//! confirmation tracking happens outside this engine.

use sqlx::SqlitePool;
use time::OffsetDateTime;
use uuid::Uuid;

/// Delivery status of a logged transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStatus {
    Pending,
    Confirmed,
    Failed,
}

impl LogStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LogStatus::Pending => "pending",
            LogStatus::Confirmed => "confirmed",
            LogStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct TransactionLogEntry {
    pub id: String,
    pub address: String,
    pub tx_hash: String,
    pub entry_type: String,
    pub amount: i64,
    pub status: String,
    pub created_at: i64,
}

impl TransactionLogEntry {
    /// Append a refund entry in `pending` state.
    pub async fn insert_refund(
        pool: &SqlitePool,
        address: &str,
        tx_hash: &str,
        amount: u64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO transaction_log (id, address, tx_hash, entry_type, amount, status, created_at)
            VALUES (?, ?, ?, 'refund', ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(address)
        .bind(tx_hash)
        .bind(amount as i64)
        .bind(LogStatus::Pending.as_str())
        .bind(OffsetDateTime::now_utc().unix_timestamp())
        .execute(pool)
        .await?;
        Ok(())
    }

    /// All log entries for an address, newest first.
    pub async fn list_for_address(
        pool: &SqlitePool,
        address: &str,
    ) -> Result<Vec<TransactionLogEntry>, sqlx::Error> {
        sqlx::query_as::<_, TransactionLogEntry>(
            "SELECT * FROM transaction_log WHERE address = ? ORDER BY created_at DESC",
        )
        .bind(address)
        .fetch_all(pool)
        .await
    }
}

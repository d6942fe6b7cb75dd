//! Processed-transaction markers.
//!
//! Durable fact that a transaction hash has been handled, independent of
//! whether a refund resulted. Once marked, a hash is never reprocessed,
//! across restarts included.

use sqlx::SqlitePool;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ProcessedTransaction {
    pub tx_hash: String,
    pub processed_at: i64,
}

impl ProcessedTransaction {
    /// Atomically claim a transaction hash. Returns true iff this call
    /// inserted the marker (i.e. the caller owns processing of this hash).
    pub async fn claim(pool: &SqlitePool, tx_hash: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO processed_transactions (tx_hash, processed_at) VALUES (?, ?)",
        )
        .bind(tx_hash)
        .bind(OffsetDateTime::now_utc().unix_timestamp())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Whether a hash has already been handled.
    pub async fn exists(pool: &SqlitePool, tx_hash: &str) -> Result<bool, sqlx::Error> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM processed_transactions WHERE tx_hash = ?",
        )
        .bind(tx_hash)
        .fetch_one(pool)
        .await?;
        Ok(count > 0)
    }

    /// Total number of markers.
    pub async fn count(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM processed_transactions")
            .fetch_one(pool)
            .await
    }
}

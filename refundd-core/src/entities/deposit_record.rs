//! Deposit records: one logical row per depositor address.
//!
//! Created on first sighting of a qualifying transaction, mutated in place
//! as verification and refund progress, never deleted by the engine.
//! Invariant: `refunded` implies a non-null `refund_tx_hash`, and the
//! false→true transition happens at most once per record (guarded UPDATE).

use sqlx::SqlitePool;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct DepositRecord {
    pub user_address: String,
    pub user_id: Option<String>,
    pub phone_hash: Option<String>,
    pub tx_hash: String,
    pub amount: i64,
    pub sender_wallet_address: String,
    pub verified: bool,
    pub signup_completed: bool,
    pub refunded: bool,
    pub refund_tx_hash: Option<String>,
    pub verification_attempts: i64,
    pub block_timestamp: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Data for creating or refreshing a deposit record.
#[derive(Debug, Clone)]
pub struct NewDeposit {
    pub user_address: String,
    pub tx_hash: String,
    pub amount: u64,
    pub sender_wallet_address: String,
    pub verified: bool,
    pub block_timestamp: i64,
}

fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

impl DepositRecord {
    /// Fetch the record for a depositor address.
    pub async fn get(
        pool: &SqlitePool,
        user_address: &str,
    ) -> Result<Option<DepositRecord>, sqlx::Error> {
        sqlx::query_as::<_, DepositRecord>(
            "SELECT * FROM deposit_records WHERE user_address = ?",
        )
        .bind(user_address)
        .fetch_optional(pool)
        .await
    }

    /// Create the record on first sighting, or refresh the transaction
    /// fields of an existing one. Refund state is never touched here;
    /// `verified` can only be raised, not lowered.
    pub async fn upsert(pool: &SqlitePool, deposit: &NewDeposit) -> Result<(), sqlx::Error> {
        let now = now_unix();
        sqlx::query(
            r#"
            INSERT INTO deposit_records
                (user_address, tx_hash, amount, sender_wallet_address,
                 verified, block_timestamp, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_address) DO UPDATE SET
                tx_hash = excluded.tx_hash,
                amount = excluded.amount,
                sender_wallet_address = excluded.sender_wallet_address,
                verified = MAX(deposit_records.verified, excluded.verified),
                block_timestamp = excluded.block_timestamp,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&deposit.user_address)
        .bind(&deposit.tx_hash)
        .bind(deposit.amount as i64)
        .bind(&deposit.sender_wallet_address)
        .bind(deposit.verified)
        .bind(deposit.block_timestamp)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Transition a record to refunded. Returns true iff this call made the
    /// transition; a record that is already refunded is left untouched.
    pub async fn mark_refunded(
        pool: &SqlitePool,
        user_address: &str,
        refund_tx_hash: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE deposit_records
            SET refunded = 1, refund_tx_hash = ?, updated_at = ?
            WHERE user_address = ? AND refunded = 0
            "#,
        )
        .bind(refund_tx_hash)
        .bind(now_unix())
        .bind(user_address)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark the deposit as verified.
    pub async fn mark_verified(pool: &SqlitePool, user_address: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE deposit_records SET verified = 1, updated_at = ? WHERE user_address = ?",
        )
        .bind(now_unix())
        .bind(user_address)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Count one verification attempt against the record.
    pub async fn bump_verification_attempts(
        pool: &SqlitePool,
        user_address: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE deposit_records
            SET verification_attempts = verification_attempts + 1, updated_at = ?
            WHERE user_address = ?
            "#,
        )
        .bind(now_unix())
        .bind(user_address)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Record an out-of-band signup completion event against the deposit.
    pub async fn complete_signup(
        pool: &SqlitePool,
        user_address: &str,
        user_id: &str,
        phone_hash: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE deposit_records
            SET signup_completed = 1, user_id = ?, phone_hash = ?, updated_at = ?
            WHERE user_address = ?
            "#,
        )
        .bind(user_id)
        .bind(phone_hash)
        .bind(now_unix())
        .bind(user_address)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Verified deposits that still await a refund, oldest first.
    ///
    /// Input to the retry sweep; deliberately a different path from the
    /// main loop, which only ever sees unprocessed transaction hashes.
    pub async fn list_unrefunded(pool: &SqlitePool) -> Result<Vec<DepositRecord>, sqlx::Error> {
        sqlx::query_as::<_, DepositRecord>(
            r#"
            SELECT * FROM deposit_records
            WHERE verified = 1 AND refunded = 0
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(pool)
        .await
    }
}

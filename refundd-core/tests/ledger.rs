//! Durability and idempotency tests for the ledger.

use refundd_core::entities::NewDeposit;
use refundd_core::ledger::Ledger;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

async fn memory_pool() -> SqlitePool {
    // A single connection so every handle sees the same in-memory database.
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap()
}

async fn open_ledger() -> Ledger {
    Ledger::open(memory_pool().await).await.unwrap()
}

fn deposit(address: &str) -> NewDeposit {
    NewDeposit {
        user_address: address.to_string(),
        tx_hash: format!("tx_{address}"),
        amount: 2_000_000,
        sender_wallet_address: address.to_string(),
        verified: true,
        block_timestamp: 1_700_000_000,
    }
}

#[tokio::test]
async fn mark_processed_claims_exactly_once() {
    let ledger = open_ledger().await;

    assert!(!ledger.is_processed("tx1").await.unwrap());
    assert!(ledger.mark_processed("tx1").await.unwrap());
    assert!(!ledger.mark_processed("tx1").await.unwrap());
    assert!(ledger.is_processed("tx1").await.unwrap());
    assert_eq!(ledger.processed_count().await.unwrap(), 1);
}

#[tokio::test]
async fn markers_survive_reopening() {
    let pool = memory_pool().await;
    let ledger = Ledger::open(pool.clone()).await.unwrap();
    assert!(ledger.mark_processed("tx1").await.unwrap());
    drop(ledger);

    // Same database, fresh handle: simulates a process restart.
    let reopened = Ledger::open(pool).await.unwrap();
    assert!(reopened.is_processed("tx1").await.unwrap());
    assert!(!reopened.mark_processed("tx1").await.unwrap());
}

#[tokio::test]
async fn upsert_creates_then_refreshes_without_touching_refund_state() {
    let ledger = open_ledger().await;
    ledger.upsert_deposit(&deposit("addr1_alice")).await.unwrap();

    let record = ledger.deposit_record("addr1_alice").await.unwrap().unwrap();
    assert_eq!(record.amount, 2_000_000);
    assert!(record.verified);
    assert!(!record.refunded);
    assert_eq!(record.refund_tx_hash, None);

    assert!(ledger.mark_refunded("addr1_alice", "refund_tx_1").await.unwrap());

    // A later sighting refreshes tx fields but must not clear the refund.
    let mut refresh = deposit("addr1_alice");
    refresh.tx_hash = "tx_newer".to_string();
    refresh.verified = false;
    ledger.upsert_deposit(&refresh).await.unwrap();

    let record = ledger.deposit_record("addr1_alice").await.unwrap().unwrap();
    assert_eq!(record.tx_hash, "tx_newer");
    assert!(record.refunded);
    assert_eq!(record.refund_tx_hash.as_deref(), Some("refund_tx_1"));
    // Verified can only be raised, never lowered.
    assert!(record.verified);
}

#[tokio::test]
async fn mark_refunded_transitions_at_most_once() {
    let ledger = open_ledger().await;
    ledger.upsert_deposit(&deposit("addr1_alice")).await.unwrap();

    assert!(ledger.mark_refunded("addr1_alice", "refund_tx_1").await.unwrap());
    assert!(!ledger.mark_refunded("addr1_alice", "refund_tx_2").await.unwrap());

    let record = ledger.deposit_record("addr1_alice").await.unwrap().unwrap();
    assert!(record.refunded);
    // The losing attempt must not overwrite the recorded hash.
    assert_eq!(record.refund_tx_hash.as_deref(), Some("refund_tx_1"));
}

#[tokio::test]
async fn concurrent_mark_refunded_yields_single_winner() {
    let ledger = open_ledger().await;
    ledger.upsert_deposit(&deposit("addr1_alice")).await.unwrap();

    let a = ledger.clone();
    let b = ledger.clone();
    let (first, second) = tokio::join!(
        a.mark_refunded("addr1_alice", "refund_tx_a"),
        b.mark_refunded("addr1_alice", "refund_tx_b"),
    );
    let wins = [first.unwrap(), second.unwrap()];
    assert_eq!(wins.iter().filter(|won| **won).count(), 1);
}

#[tokio::test]
async fn rehydrate_restores_markers_for_refunded_deposits() {
    let pool = memory_pool().await;
    let ledger = Ledger::open(pool.clone()).await.unwrap();

    ledger.upsert_deposit(&deposit("addr1_alice")).await.unwrap();
    ledger.mark_processed("tx_addr1_alice").await.unwrap();
    ledger.mark_refunded("addr1_alice", "refund_tx_1").await.unwrap();

    // Simulate partial loss of the marker store.
    sqlx::query("DELETE FROM processed_transactions")
        .execute(&pool)
        .await
        .unwrap();
    assert!(!ledger.is_processed("tx_addr1_alice").await.unwrap());

    // A cold start re-derives the marker from the settled refund.
    let reopened = Ledger::open(pool).await.unwrap();
    assert!(reopened.is_processed("tx_addr1_alice").await.unwrap());
}

#[tokio::test]
async fn unrefunded_sweep_lists_only_verified_pending_deposits() {
    let ledger = open_ledger().await;

    ledger.upsert_deposit(&deposit("addr1_pending")).await.unwrap();

    let mut unverified = deposit("addr1_unverified");
    unverified.verified = false;
    ledger.upsert_deposit(&unverified).await.unwrap();

    ledger.upsert_deposit(&deposit("addr1_settled")).await.unwrap();
    ledger.mark_refunded("addr1_settled", "refund_tx_1").await.unwrap();

    let pending = ledger.unrefunded_deposits().await.unwrap();
    let addresses: Vec<&str> = pending.iter().map(|r| r.user_address.as_str()).collect();
    assert_eq!(addresses, vec!["addr1_pending"]);
}

#[tokio::test]
async fn verification_attempts_and_signup_completion() {
    let ledger = open_ledger().await;
    ledger.upsert_deposit(&deposit("addr1_alice")).await.unwrap();

    ledger.bump_verification_attempts("addr1_alice").await.unwrap();
    ledger.bump_verification_attempts("addr1_alice").await.unwrap();

    assert!(
        ledger
            .complete_signup("addr1_alice", "user-42", Some("ph_abc"))
            .await
            .unwrap()
    );
    assert!(
        !ledger
            .complete_signup("addr1_nobody", "user-43", None)
            .await
            .unwrap()
    );

    let record = ledger.deposit_record("addr1_alice").await.unwrap().unwrap();
    assert_eq!(record.verification_attempts, 2);
    assert!(record.signup_completed);
    assert_eq!(record.user_id.as_deref(), Some("user-42"));
    assert_eq!(record.phone_hash.as_deref(), Some("ph_abc"));
}

#[tokio::test]
async fn refund_log_entries_are_recorded_as_pending() {
    let ledger = open_ledger().await;
    ledger
        .log_refund("addr1_alice", "refund_tx_1", 2_000_000)
        .await
        .unwrap();

    let entries =
        refundd_core::entities::TransactionLogEntry::list_for_address(ledger.pool(), "addr1_alice")
            .await
            .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].entry_type, "refund");
    assert_eq!(entries[0].status, "pending");
    assert_eq!(entries[0].amount, 2_000_000);
    assert_eq!(entries[0].tx_hash, "refund_tx_1");
}

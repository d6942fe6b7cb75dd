//! Reconciliation loop.
//!
//! A single cooperative timer-driven loop that ties the indexer client,
//! matcher, idempotency ledger, refund issuer and listener registry
//! together. One explicit engine instance owns all of them; there are no
//! module-level singletons.
//!
//! The loop is a state machine: Stopped, Running, and Circuit-Open. A
//! quota signal from the indexer opens the circuit for a cooldown window
//! during which every tick is a no-op; the circuit closes by itself once
//! the window elapses.

use crate::cache::VerificationCache;
use crate::config::EngineConfig;
use crate::events::{DepositDetected, DepositListener, ListenerId, ListenerRegistry};
use crate::indexer::{ChainIndexer, IndexerError, TxOrder};
use crate::ledger::{Ledger, LedgerError};
use crate::matcher;
use crate::processors::refund_issuer::{RefundIssuer, RefundOutcome, RefundSubmitter};
use crate::utils::backoff::retry_transient;
use serde::Serialize;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Indexer(#[from] IndexerError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl EngineError {
    fn is_quota(&self) -> bool {
        matches!(self, EngineError::Indexer(e) if e.is_quota())
    }
}

/// Circuit breaker state as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
}

/// Engine status snapshot for the surrounding API layer.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub is_running: bool,
    pub processed_count: u64,
    pub deposit_address: String,
    pub circuit_state: CircuitState,
}

/// Coarse health verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Healthy,
    Degraded,
    Unhealthy,
}

/// What one reconciliation cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// Tick skipped entirely because the circuit was open.
    pub skipped: bool,
    /// Candidate transactions examined.
    pub examined: usize,
    /// Qualifying transactions claimed and processed.
    pub matched: usize,
}

#[derive(Default)]
struct Stats {
    cycles: AtomicU64,
    processed: AtomicU64,
    refunds_issued: AtomicU64,
    refund_failures: AtomicU64,
}

struct RunHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct Shared {
    config: EngineConfig,
    indexer: Arc<dyn ChainIndexer>,
    ledger: Ledger,
    cache: VerificationCache,
    refunds: RefundIssuer,
    listeners: ListenerRegistry,
    stats: Stats,
    running: AtomicBool,
    /// Deadline until which the circuit stays open, if any.
    circuit_open_until: StdMutex<Option<Instant>>,
    run: Mutex<Option<RunHandle>>,
}

/// The deposit-and-refund reconciliation engine.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct ReconEngine {
    shared: Arc<Shared>,
}

impl ReconEngine {
    /// Build an engine over its collaborators. The ledger must already be
    /// opened (schema created, markers rehydrated).
    pub fn new(
        config: EngineConfig,
        indexer: Arc<dyn ChainIndexer>,
        ledger: Ledger,
        submitter: Arc<dyn RefundSubmitter>,
    ) -> Self {
        let cache = VerificationCache::new(config.positive_cache_ttl, config.negative_cache_ttl);
        let refunds = RefundIssuer::new(ledger.clone(), submitter);
        Self {
            shared: Arc::new(Shared {
                config,
                indexer,
                ledger,
                cache,
                refunds,
                listeners: ListenerRegistry::new(),
                stats: Stats::default(),
                running: AtomicBool::new(false),
                circuit_open_until: StdMutex::new(None),
                run: Mutex::new(None),
            }),
        }
    }

    // -- Lifecycle -----------------------------------------------------

    /// Start the scheduled reconciliation loop. No-op when already running.
    pub async fn start(&self) {
        let mut run = self.shared.run.lock().await;
        if run.is_some() {
            warn!("reconciliation loop already running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let engine = self.clone();
        let task = tokio::spawn(async move {
            engine.run_loop(shutdown_rx).await;
        });
        *run = Some(RunHandle { shutdown_tx, task });
        self.shared.running.store(true, Ordering::Release);
        info!(
            deposit_address = %self.shared.config.deposit_address,
            poll_interval_secs = self.shared.config.poll_interval.as_secs(),
            "reconciliation loop started"
        );
    }

    /// Stop the loop. Cancels the pending timer; an in-flight tick is
    /// allowed to complete so no transaction is left half-processed.
    pub async fn stop(&self) {
        let handle = self.shared.run.lock().await.take();
        let Some(handle) = handle else {
            debug!("stop called but reconciliation loop is not running");
            return;
        };

        let _ = handle.shutdown_tx.send(true);
        if let Err(e) = handle.task.await {
            warn!(error = %e, "reconciliation task did not shut down cleanly");
        }
        self.shared.running.store(false, Ordering::Release);
        info!("reconciliation loop stopped");
    }

    async fn run_loop(&self, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("reconciliation loop received shutdown signal");
                        break;
                    }
                }

                _ = tokio::time::sleep(self.shared.config.poll_interval) => {
                    let summary = self.run_cycle().await;
                    debug!(
                        skipped = summary.skipped,
                        examined = summary.examined,
                        matched = summary.matched,
                        "reconciliation cycle complete"
                    );
                }
            }
        }
    }

    /// Operator-initiated reconciliation outside the fixed schedule.
    ///
    /// Runs the same tick body as the timer. Safe to call concurrently
    /// with the scheduled loop: both paths claim transactions through the
    /// same ledger, so overlapping invocations cannot double-process.
    pub async fn trigger_manual_check(&self) -> CycleSummary {
        info!("manual reconciliation triggered");
        self.run_cycle().await
    }

    // -- Tick body -----------------------------------------------------

    /// Run one reconciliation cycle. Never propagates an error: every
    /// failure is contained so one bad transaction or indexer hiccup
    /// cannot halt subsequent processing.
    pub async fn run_cycle(&self) -> CycleSummary {
        let shared = &self.shared;
        shared.stats.cycles.fetch_add(1, Ordering::Relaxed);

        if self.circuit_is_open() {
            debug!("circuit open, skipping tick");
            return CycleSummary {
                skipped: true,
                ..CycleSummary::default()
            };
        }

        let listing = retry_transient(
            shared.config.max_transient_retries,
            IndexerError::is_transient,
            || {
                shared.indexer.list_transactions(
                    &shared.config.deposit_address,
                    shared.config.fetch_count,
                    TxOrder::Desc,
                )
            },
        )
        .await;

        let transactions = match listing {
            Ok(transactions) => transactions,
            Err(e) if e.is_quota() => {
                self.open_circuit();
                return CycleSummary::default();
            }
            Err(e) => {
                warn!(error = %e, "listing recent transactions failed, skipping tick");
                return CycleSummary::default();
            }
        };

        let mut summary = CycleSummary {
            examined: transactions.len(),
            ..CycleSummary::default()
        };

        for transaction in &transactions {
            match self.process_candidate(&transaction.tx_hash).await {
                Ok(true) => {
                    summary.matched += 1;
                    // Spread out refund submissions within one tick.
                    tokio::time::sleep(shared.config.inter_item_delay).await;
                }
                Ok(false) => {}
                Err(e) if e.is_quota() => {
                    self.open_circuit();
                    break;
                }
                Err(e) => {
                    error!(
                        tx_hash = %transaction.tx_hash,
                        error = %e,
                        "failed to process candidate transaction"
                    );
                }
            }
        }

        summary
    }

    /// Examine one candidate transaction; returns true iff it qualified
    /// and was claimed by this call.
    async fn process_candidate(&self, tx_hash: &str) -> Result<bool, EngineError> {
        let shared = &self.shared;

        if shared.ledger.is_processed(tx_hash).await? {
            return Ok(false);
        }

        let info = retry_transient(
            shared.config.max_transient_retries,
            IndexerError::is_transient,
            || shared.indexer.tx_info(tx_hash),
        )
        .await?;

        let now = OffsetDateTime::now_utc().unix_timestamp();
        if !matcher::within_max_age(info.block_time, now, shared.config.max_tx_age) {
            debug!(tx_hash, block_time = info.block_time, "transaction too old, ignoring");
            return Ok(false);
        }

        let utxos = retry_transient(
            shared.config.max_transient_retries,
            IndexerError::is_transient,
            || shared.indexer.tx_utxos(tx_hash),
        )
        .await?;

        let Some(deposit) = matcher::matches_deposit_to_script(
            &utxos,
            &shared.config.deposit_address,
            shared.config.required_amount,
        ) else {
            return Ok(false);
        };

        // Claim before any money movement: a crash after this point leaves
        // the record to the unrefunded sweep, never back to this loop.
        if !shared.ledger.mark_processed(tx_hash).await? {
            debug!(tx_hash, "lost processing claim to a concurrent cycle");
            return Ok(false);
        }
        shared.stats.processed.fetch_add(1, Ordering::Relaxed);

        shared
            .ledger
            .upsert_deposit(&crate::entities::NewDeposit {
                user_address: deposit.sender.clone(),
                tx_hash: tx_hash.to_string(),
                amount: deposit.amount,
                sender_wallet_address: deposit.sender.clone(),
                verified: true,
                block_timestamp: info.block_time,
            })
            .await?;

        info!(
            tx_hash,
            sender = %deposit.sender,
            amount = deposit.amount,
            "qualifying deposit detected"
        );

        match self.shared.refunds.process_refund(&deposit.sender, None).await? {
            RefundOutcome::Refunded { tx_hash: refund_tx_hash } => {
                shared.stats.refunds_issued.fetch_add(1, Ordering::Relaxed);
                info!(
                    deposit_tx = tx_hash,
                    refund_tx = %refund_tx_hash,
                    "deposit refunded"
                );
            }
            RefundOutcome::AlreadyRefunded => {
                debug!(tx_hash, "deposit already refunded");
            }
            RefundOutcome::NotEligible { reason } => {
                warn!(tx_hash, reason, "refund preconditions not met");
            }
            RefundOutcome::Failed { message } => {
                shared.stats.refund_failures.fetch_add(1, Ordering::Relaxed);
                warn!(tx_hash, message, "refund failed, deposit left for retry sweep");
            }
        }

        shared
            .listeners
            .notify(&DepositDetected {
                address: deposit.sender,
                tx_hash: tx_hash.to_string(),
                amount: deposit.amount,
                block_timestamp: info.block_time,
            })
            .await;

        Ok(true)
    }

    /// Re-attempt refunds for verified deposits that previously failed.
    ///
    /// A deliberately separate path from the tick: it walks deposit
    /// records, never transaction hashes, so it cannot re-observe a
    /// deposit as "new". Returns the number of refunds issued.
    pub async fn retry_unrefunded(&self) -> Result<usize, EngineError> {
        let pending = self.shared.ledger.unrefunded_deposits().await?;
        if pending.is_empty() {
            return Ok(0);
        }
        info!(count = pending.len(), "retrying unrefunded deposits");

        let mut issued = 0usize;
        for record in pending {
            match self
                .shared
                .refunds
                .process_refund(&record.user_address, None)
                .await?
            {
                RefundOutcome::Refunded { tx_hash } => {
                    self.shared
                        .stats
                        .refunds_issued
                        .fetch_add(1, Ordering::Relaxed);
                    info!(
                        address = %record.user_address,
                        refund_tx = %tx_hash,
                        "retry sweep refunded deposit"
                    );
                    issued += 1;
                }
                RefundOutcome::Failed { message } => {
                    warn!(address = %record.user_address, message, "retry sweep refund failed");
                }
                RefundOutcome::AlreadyRefunded | RefundOutcome::NotEligible { .. } => {}
            }
            tokio::time::sleep(self.shared.config.inter_item_delay).await;
        }
        Ok(issued)
    }

    // -- Synchronous verification path ----------------------------------

    /// Has this wallet sent the required deposit to the watched address?
    ///
    /// Read-through against the verification cache; a cached verdict
    /// avoids the indexer round-trip entirely.
    pub async fn verify_deposit_sent(&self, wallet_address: &str) -> Result<bool, EngineError> {
        let key = format!("deposit_{wallet_address}");
        if let Some(cached) = self.shared.cache.get(&key).await {
            debug!(wallet_address, cached, "deposit verification served from cache");
            return Ok(cached);
        }

        let result = self
            .scan_wallet(wallet_address, |utxos| {
                matcher::matches_deposit_to_script(
                    utxos,
                    &self.shared.config.deposit_address,
                    self.shared.config.required_amount,
                )
                .is_some_and(|m| m.sender == wallet_address)
            })
            .await?;

        self.shared.cache.set(key, result).await;
        self.note_verification_attempt(wallet_address, result).await?;
        Ok(result)
    }

    /// Wallet-ownership variant: a round-trip self-payment of the required
    /// amount proves control of the wallet. Used for account linking, not
    /// for refunds.
    pub async fn verify_wallet_ownership(&self, wallet_address: &str) -> Result<bool, EngineError> {
        let key = format!("ownership_{wallet_address}");
        if let Some(cached) = self.shared.cache.get(&key).await {
            debug!(wallet_address, cached, "ownership verification served from cache");
            return Ok(cached);
        }

        let result = self
            .scan_wallet(wallet_address, |utxos| {
                matcher::matches_wallet_ownership(
                    utxos,
                    wallet_address,
                    self.shared.config.required_amount,
                )
            })
            .await?;

        self.shared.cache.set(key, result).await;
        self.note_verification_attempt(wallet_address, result).await?;
        Ok(result)
    }

    /// Scan the recent transactions of a wallet for one satisfying the
    /// given pattern within the recency window.
    async fn scan_wallet<F>(&self, wallet_address: &str, pattern: F) -> Result<bool, EngineError>
    where
        F: Fn(&crate::indexer::TxUtxos) -> bool,
    {
        let shared = &self.shared;
        let result = async {
            let transactions = retry_transient(
                shared.config.max_transient_retries,
                IndexerError::is_transient,
                || {
                    shared.indexer.list_transactions(
                        wallet_address,
                        shared.config.fetch_count,
                        TxOrder::Desc,
                    )
                },
            )
            .await?;

            let now = OffsetDateTime::now_utc().unix_timestamp();
            for transaction in &transactions {
                let info = retry_transient(
                    shared.config.max_transient_retries,
                    IndexerError::is_transient,
                    || shared.indexer.tx_info(&transaction.tx_hash),
                )
                .await?;
                if !matcher::within_max_age(info.block_time, now, shared.config.max_tx_age) {
                    continue;
                }

                let utxos = retry_transient(
                    shared.config.max_transient_retries,
                    IndexerError::is_transient,
                    || shared.indexer.tx_utxos(&transaction.tx_hash),
                )
                .await?;
                if pattern(&utxos) {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        .await;

        match result {
            Err(EngineError::Indexer(ref e)) if e.is_quota() => {
                self.open_circuit();
                result
            }
            other => other,
        }
    }

    async fn note_verification_attempt(
        &self,
        wallet_address: &str,
        verified: bool,
    ) -> Result<(), EngineError> {
        if self.shared.ledger.deposit_record(wallet_address).await?.is_some() {
            self.shared
                .ledger
                .bump_verification_attempts(wallet_address)
                .await?;
            if verified {
                self.shared.ledger.mark_verified(wallet_address).await?;
            }
        }
        Ok(())
    }

    // -- Circuit breaker -------------------------------------------------

    fn open_circuit(&self) {
        let until = Instant::now() + self.shared.config.circuit_cooldown;
        if let Ok(mut guard) = self.shared.circuit_open_until.lock() {
            *guard = Some(until);
        }
        warn!(
            cooldown_secs = self.shared.config.circuit_cooldown.as_secs(),
            "indexer quota exhausted, circuit opened"
        );
    }

    /// Check the circuit, closing it when the cooldown has elapsed.
    fn circuit_is_open(&self) -> bool {
        let Ok(mut guard) = self.shared.circuit_open_until.lock() else {
            return false;
        };
        match *guard {
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                *guard = None;
                info!("circuit cooldown elapsed, resuming indexer polling");
                false
            }
            None => false,
        }
    }

    fn circuit_state(&self) -> CircuitState {
        let open = self
            .shared
            .circuit_open_until
            .lock()
            .ok()
            .and_then(|guard| *guard)
            .is_some_and(|until| Instant::now() < until);
        if open {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    // -- Introspection ----------------------------------------------------

    /// Register a listener invoked on every qualifying deposit.
    pub async fn subscribe(&self, listener: Arc<dyn DepositListener>) -> ListenerId {
        self.shared.listeners.subscribe(listener).await
    }

    /// Remove a previously registered listener.
    pub async fn unsubscribe(&self, id: ListenerId) -> bool {
        self.shared.listeners.unsubscribe(id).await
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            is_running: self.is_running(),
            processed_count: self.shared.stats.processed.load(Ordering::Relaxed),
            deposit_address: self.shared.config.deposit_address.clone(),
            circuit_state: self.circuit_state(),
        }
    }

    pub fn health_check(&self) -> Health {
        if !self.is_running() {
            return Health::Unhealthy;
        }
        match self.circuit_state() {
            CircuitState::Open => Health::Degraded,
            CircuitState::Closed => Health::Healthy,
        }
    }

    /// Zero the per-instance counters. Does not touch the ledger.
    pub fn reset_statistics(&self) {
        self.shared.stats.cycles.store(0, Ordering::Relaxed);
        self.shared.stats.processed.store(0, Ordering::Relaxed);
        self.shared.stats.refunds_issued.store(0, Ordering::Relaxed);
        self.shared.stats.refund_failures.store(0, Ordering::Relaxed);
        info!("engine statistics reset");
    }

    /// Refunds issued by this instance since start or the last reset.
    pub fn refunds_issued(&self) -> u64 {
        self.shared.stats.refunds_issued.load(Ordering::Relaxed)
    }

    /// Verification cache statistics.
    pub fn cache_stats(&self) -> crate::cache::CacheStats {
        self.shared.cache.stats()
    }

    /// Direct access to the ledger, for the surrounding API layer.
    pub fn ledger(&self) -> &Ledger {
        &self.shared.ledger
    }
}

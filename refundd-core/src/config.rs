//! Engine tunables.
//!
//! All durations and amounts the reconciliation engine operates on live
//! here so that the server binary can map its TOML file onto a single
//! struct and tests can shrink the windows.

use std::time::Duration;

/// Configuration for the reconciliation engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// The script address watched for incoming deposits.
    pub deposit_address: String,
    /// Exact deposit amount, in lovelace. Anything else never matches.
    pub required_amount: u64,
    /// Interval between scheduled reconciliation cycles.
    pub poll_interval: Duration,
    /// Transactions older than this are ignored even when they match.
    pub max_tx_age: Duration,
    /// How long the circuit stays open after a quota signal.
    pub circuit_cooldown: Duration,
    /// Retries per indexer call on transient failures.
    pub max_transient_retries: u32,
    /// Pause between processing multiple matches within one cycle.
    pub inter_item_delay: Duration,
    /// How many recent transactions to list per cycle.
    pub fetch_count: u32,
    /// TTL for cached positive verification verdicts.
    pub positive_cache_ttl: Duration,
    /// TTL for cached negative verification verdicts.
    ///
    /// Kept shorter than the positive TTL: a "not found" verdict can flip
    /// as soon as the deposit lands, a "found" verdict is stable.
    pub negative_cache_ttl: Duration,
}

impl EngineConfig {
    /// Create a config for the given watched address with default tunables.
    pub fn new(deposit_address: impl Into<String>) -> Self {
        Self {
            deposit_address: deposit_address.into(),
            required_amount: 2_000_000,
            poll_interval: Duration::from_secs(30),
            max_tx_age: Duration::from_secs(3600),
            circuit_cooldown: Duration::from_secs(300),
            max_transient_retries: 3,
            inter_item_delay: Duration::from_millis(500),
            fetch_count: 20,
            positive_cache_ttl: Duration::from_secs(300),
            negative_cache_ttl: Duration::from_secs(60),
        }
    }
}

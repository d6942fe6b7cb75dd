//! Chain indexer client.
//!
//! Thin adapter over a Blockfrost-style block-explorer API. The engine only
//! needs three reads: the recent transactions of an address, the block info
//! of a transaction, and its inputs/outputs. All three are polled network
//! calls with no availability guarantee, so every error is classified into
//! one of three outcomes: transient (retry with backoff), quota (trip the
//! circuit breaker, do not retry), or a plain API error.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

/// Asset denomination used for all amount arithmetic.
const LOVELACE_UNIT: &str = "lovelace";

/// Errors surfaced by indexer calls.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Network failure, 5xx, or other condition worth retrying.
    #[error("transient indexer error: {0}")]
    Transient(String),

    /// Payment-required / rate-limit signal (HTTP 402 or 429).
    ///
    /// Must trip the circuit breaker instead of being retried.
    #[error("indexer quota exhausted")]
    QuotaExceeded,

    /// Non-retryable API error.
    #[error("indexer returned status {status}: {message}")]
    Api { status: u16, message: String },

    /// Response body did not parse.
    #[error("indexer response parsing error: {0}")]
    Parse(String),
}

impl IndexerError {
    /// Whether the call should be retried with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, IndexerError::Transient(_))
    }

    /// Whether the call should open the circuit breaker.
    pub fn is_quota(&self) -> bool {
        matches!(self, IndexerError::QuotaExceeded)
    }
}

/// Listing order for address transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOrder {
    Asc,
    Desc,
}

impl TxOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            TxOrder::Asc => "asc",
            TxOrder::Desc => "desc",
        }
    }
}

/// One entry from the address transaction listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AddressTransaction {
    pub tx_hash: String,
    #[serde(default)]
    pub block_height: i64,
    #[serde(default)]
    pub block_time: i64,
}

/// Block placement of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TxInfo {
    #[serde(default)]
    pub hash: String,
    pub block_time: i64,
    pub block_height: i64,
}

/// One input or output of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TxIo {
    pub address: String,
    #[serde(default)]
    pub amount: Vec<AssetAmount>,
}

impl TxIo {
    /// Total lovelace carried by this input/output.
    ///
    /// Quantities arrive as decimal strings; non-lovelace assets and
    /// unparseable quantities contribute nothing.
    pub fn lovelace(&self) -> u64 {
        self.amount
            .iter()
            .filter(|a| a.unit == LOVELACE_UNIT)
            .filter_map(|a| a.quantity.parse::<u64>().ok())
            .sum()
    }
}

/// A single asset amount as reported by the indexer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AssetAmount {
    pub unit: String,
    pub quantity: String,
}

/// Inputs and outputs of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TxUtxos {
    #[serde(default)]
    pub hash: String,
    pub inputs: Vec<TxIo>,
    pub outputs: Vec<TxIo>,
}

/// Read access to the chain indexer.
///
/// The engine is written against this trait so reconciliation logic can be
/// exercised with scripted in-process implementations.
#[async_trait]
pub trait ChainIndexer: Send + Sync {
    /// List recent transactions touching `address`.
    async fn list_transactions(
        &self,
        address: &str,
        count: u32,
        order: TxOrder,
    ) -> Result<Vec<AddressTransaction>, IndexerError>;

    /// Fetch block placement for a transaction.
    async fn tx_info(&self, tx_hash: &str) -> Result<TxInfo, IndexerError>;

    /// Fetch inputs and outputs for a transaction.
    async fn tx_utxos(&self, tx_hash: &str) -> Result<TxUtxos, IndexerError>;
}

/// HTTP implementation over a Blockfrost-compatible API.
///
/// Authentication is a static API key sent in the `project_id` header.
pub struct BlockfrostIndexer {
    base_url: Url,
    api_key: String,
    http_client: reqwest::Client,
}

impl BlockfrostIndexer {
    /// Create a client for the given API base URL and key.
    pub fn new(base_url: Url, api_key: impl Into<String>) -> Self {
        Self {
            base_url,
            api_key: api_key.into(),
            http_client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, IndexerError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| IndexerError::Parse(format!("invalid request path: {e}")))?;

        let response = self
            .http_client
            .get(url)
            .header("project_id", &self.api_key)
            .send()
            .await
            .map_err(|e| IndexerError::Transient(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::PAYMENT_REQUIRED || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(IndexerError::QuotaExceeded);
        }
        if status.is_server_error() {
            return Err(IndexerError::Transient(format!("upstream status {status}")));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(IndexerError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| IndexerError::Parse(e.to_string()))
    }
}

#[async_trait]
impl ChainIndexer for BlockfrostIndexer {
    async fn list_transactions(
        &self,
        address: &str,
        count: u32,
        order: TxOrder,
    ) -> Result<Vec<AddressTransaction>, IndexerError> {
        let path = format!(
            "addresses/{address}/transactions?order={}&count={count}",
            order.as_str()
        );
        self.get_json(&path).await
    }

    async fn tx_info(&self, tx_hash: &str) -> Result<TxInfo, IndexerError> {
        self.get_json(&format!("txs/{tx_hash}")).await
    }

    async fn tx_utxos(&self, tx_hash: &str) -> Result<TxUtxos, IndexerError> {
        self.get_json(&format!("txs/{tx_hash}/utxos")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn io(address: &str, amounts: &[(&str, &str)]) -> TxIo {
        TxIo {
            address: address.to_string(),
            amount: amounts
                .iter()
                .map(|(unit, quantity)| AssetAmount {
                    unit: unit.to_string(),
                    quantity: quantity.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn lovelace_sums_only_lovelace_units() {
        let output = io(
            "addr1",
            &[
                ("lovelace", "1500000"),
                ("asset1deadbeef", "3"),
                ("lovelace", "500000"),
            ],
        );
        assert_eq!(output.lovelace(), 2_000_000);
    }

    #[test]
    fn lovelace_ignores_unparseable_quantities() {
        let output = io("addr1", &[("lovelace", "not-a-number")]);
        assert_eq!(output.lovelace(), 0);
    }

    #[test]
    fn error_classification() {
        assert!(IndexerError::Transient("boom".into()).is_transient());
        assert!(!IndexerError::Transient("boom".into()).is_quota());
        assert!(IndexerError::QuotaExceeded.is_quota());
        assert!(!IndexerError::QuotaExceeded.is_transient());
        let api = IndexerError::Api {
            status: 404,
            message: String::new(),
        };
        assert!(!api.is_transient());
        assert!(!api.is_quota());
    }
}

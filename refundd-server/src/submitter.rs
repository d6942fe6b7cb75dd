//! Refund submission via the wallet service.
//!
//! Transaction building and signing are not this daemon's business; it
//! delegates to a wallet service that holds the keys and answers with the
//! hash of the submitted transaction.

use async_trait::async_trait;
use refundd_core::processors::{RefundError, RefundSubmitter};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Serialize)]
struct RefundRequest<'a> {
    to_address: &'a str,
    amount: u64,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    tx_hash: String,
}

/// Submits refunds through an HTTP wallet service.
pub struct WalletServiceSubmitter {
    url: Url,
    http_client: reqwest::Client,
}

impl WalletServiceSubmitter {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            http_client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

#[async_trait]
impl RefundSubmitter for WalletServiceSubmitter {
    async fn submit_refund(&self, to_address: &str, amount: u64) -> Result<String, RefundError> {
        let response = self
            .http_client
            .post(self.url.clone())
            .json(&RefundRequest { to_address, amount })
            .send()
            .await
            .map_err(|e| RefundError::Submit(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::PAYMENT_REQUIRED {
            let body = response.text().await.unwrap_or_default();
            return Err(RefundError::InsufficientBalance(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RefundError::Build(format!("wallet service status {status}: {body}")));
        }

        let parsed: RefundResponse = response
            .json()
            .await
            .map_err(|e| RefundError::Submit(e.to_string()))?;
        Ok(parsed.tx_hash)
    }
}

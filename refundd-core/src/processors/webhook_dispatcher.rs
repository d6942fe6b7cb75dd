//! Webhook dispatcher.
//!
//! A [`DepositListener`] that delivers qualifying-deposit notifications to
//! an external endpoint via HTTP POST. Delivery is fire-and-forget from
//! the engine's point of view: a failed delivery is logged by the
//! registry and never affects engine state.

use crate::events::{DepositDetected, DepositListener};
use async_trait::async_trait;
use kanau::processor::Processor;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use url::Url;

/// Errors that can occur during webhook delivery.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    /// Endpoint answered with a non-success status.
    #[error("webhook delivery failed with status {status}: {body}")]
    DeliveryFailed { status: u16, body: String },
}

#[derive(Debug, Serialize)]
struct DepositWebhookPayload<'a> {
    event_type: &'static str,
    address: &'a str,
    tx_hash: &'a str,
    amount: u64,
    block_timestamp: i64,
    timestamp: i64,
}

/// Delivers deposit notifications to a single endpoint.
pub struct WebhookDispatcher {
    url: Url,
    http_client: reqwest::Client,
}

impl WebhookDispatcher {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            http_client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    async fn deliver(&self, event: &DepositDetected) -> Result<(), WebhookError> {
        let payload = DepositWebhookPayload {
            event_type: "deposit_detected",
            address: &event.address,
            tx_hash: &event.tx_hash,
            amount: event.amount,
            block_timestamp: event.block_timestamp,
            timestamp: OffsetDateTime::now_utc().unix_timestamp(),
        };

        let response = self
            .http_client
            .post(self.url.clone())
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(WebhookError::DeliveryFailed {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl DepositListener for WebhookDispatcher {
    async fn on_deposit(
        &self,
        event: &DepositDetected,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.deliver(event).await?;
        Ok(())
    }
}

impl Processor<DepositDetected> for WebhookDispatcher {
    type Output = ();
    type Error = WebhookError;

    async fn process(&self, event: DepositDetected) -> Result<(), WebhookError> {
        self.deliver(&event).await
    }
}

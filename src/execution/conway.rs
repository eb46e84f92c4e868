//! Conway platform credit API
//!
//! The platform moves credits between accounts on its own ledger. We only
//! need two calls: a transfer and the current balance.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ConwayConfig;
use crate::error::{Error, Result};

/// Platform status meaning the credits already moved
pub const STATUS_COMPLETED: &str = "completed";

/// Result of a platform transfer call
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditTransfer {
    pub status: String,
    #[serde(default, alias = "transfer_id", alias = "id")]
    pub transfer_id: Option<String>,
}

impl CreditTransfer {
    pub fn is_completed(&self) -> bool {
        self.status.eq_ignore_ascii_case(STATUS_COMPLETED)
    }
}

/// Platform credit operations used by the guard
#[async_trait]
pub trait CreditTransferApi: Send + Sync {
    /// Move `amount_cents` of credits to `to_address`
    async fn transfer_credits(
        &self,
        to_address: &str,
        amount_cents: i64,
        reason: Option<&str>,
    ) -> Result<CreditTransfer>;

    /// Current spendable balance
    async fn get_balance_cents(&self) -> Result<i64>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransferRequest<'a> {
    to_address: &'a str,
    amount_cents: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceResponse {
    #[serde(alias = "balance_cents", alias = "credits_cents")]
    balance_cents: i64,
}

/// HTTP client for the Conway credit API
pub struct ConwayClient {
    client: Client,
    api_url: String,
    api_key: String,
}

impl ConwayClient {
    /// Create a new client
    pub fn new(config: &ConwayConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    async fn error_body(response: reqwest::Response) -> String {
        let status = response.status();
        let body: String = response
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(300)
            .collect();
        format!("{}: {}", status, body)
    }
}

#[async_trait]
impl CreditTransferApi for ConwayClient {
    async fn transfer_credits(
        &self,
        to_address: &str,
        amount_cents: i64,
        reason: Option<&str>,
    ) -> Result<CreditTransfer> {
        debug!("Conway transfer: {} cents to {}", amount_cents, to_address);

        let response = self
            .client
            .post(self.endpoint("/v1/credits/transfer"))
            .bearer_auth(&self.api_key)
            .json(&TransferRequest {
                to_address,
                amount_cents,
                note: reason,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::PlatformTransfer(Self::error_body(response).await));
        }

        let transfer: CreditTransfer = response
            .json()
            .await
            .map_err(|e| Error::Deserialization(format!("Conway transfer response: {}", e)))?;

        info!(
            "Conway transfer {} ({})",
            transfer.transfer_id.as_deref().unwrap_or("no id"),
            transfer.status
        );
        Ok(transfer)
    }

    async fn get_balance_cents(&self) -> Result<i64> {
        let response = self
            .client
            .get(self.endpoint("/v1/credits/balance"))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Http(format!(
                "Conway balance lookup failed: {}",
                Self::error_body(response).await
            )));
        }

        let balance: BalanceResponse = response
            .json()
            .await
            .map_err(|e| Error::Deserialization(format!("Conway balance response: {}", e)))?;

        Ok(balance.balance_cents)
    }
}

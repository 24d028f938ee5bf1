//! Payout Executor
//!
//! Sends prize transfers through an external custody service. Transfers are
//! issued one at a time from the custodial payer account so they never race
//! on its nonce. Amounts cross this boundary only as integers in the token's
//! smallest unit.

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::api_error::ApiError;
use crate::models::{PayoutStatus, PoolType};

#[derive(Debug, Error)]
pub enum PayoutError {
    #[error("Custody request failed: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Custody API error: {0}")]
    CustodyError(String),

    #[error("Invalid custody response: {0}")]
    InvalidResponse(String),

    #[error("Insufficient payer balance: need {required}, have {available}")]
    InsufficientBalance { required: u128, available: u128 },

    #[error("Amount out of range: {0}")]
    AmountOutOfRange(String),

    #[error("Retry limit exceeded: {0}")]
    RetryLimitExceeded(String),
}

impl From<PayoutError> for ApiError {
    fn from(err: PayoutError) -> Self {
        ApiError::PayoutError(err.to_string())
    }
}

/// Convert a display-unit amount to the token's smallest unit, truncating
pub fn to_smallest_unit(amount: Decimal, decimals: u32) -> Result<u128, PayoutError> {
    if amount < Decimal::ZERO {
        return Err(PayoutError::AmountOutOfRange(format!("negative amount {}", amount)));
    }
    let factor = 10u64
        .checked_pow(decimals)
        .map(Decimal::from)
        .ok_or_else(|| PayoutError::AmountOutOfRange(format!("{} decimals", decimals)))?;
    amount
        .checked_mul(factor)
        .and_then(|v| v.trunc().to_u128())
        .ok_or_else(|| PayoutError::AmountOutOfRange(amount.to_string()))
}

/// Convert smallest-unit integer back to display units
pub fn from_smallest_unit(units: u128, decimals: u32) -> Result<Decimal, PayoutError> {
    i128::try_from(units)
        .ok()
        .and_then(|u| Decimal::try_from_i128_with_scale(u, decimals).ok())
        .map(|d| d.normalize())
        .ok_or_else(|| PayoutError::AmountOutOfRange(units.to_string()))
}

/// Deterministic key letting the custody service drop a re-sent transfer
pub fn transfer_idempotency_key(
    pool_type: PoolType,
    period_identifier: &str,
    rank: u32,
    wallet_address: &str,
    amount: u128,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(pool_type.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(period_identifier.as_bytes());
    hasher.update(b"|");
    hasher.update(rank.to_be_bytes());
    hasher.update(b"|");
    hasher.update(wallet_address.to_ascii_lowercase().as_bytes());
    hasher.update(b"|");
    hasher.update(amount.to_be_bytes());
    format!("{:x}", hasher.finalize())
}

/// One transfer to perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutInstruction {
    pub wallet_address: String,
    /// Smallest indivisible unit of the payout token
    pub amount: u128,
    pub idempotency_key: String,
}

/// Outcome of one transfer, same order as the input batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutResult {
    pub wallet_address: String,
    pub amount: u128,
    pub status: PayoutStatus,
    pub transaction_reference: Option<String>,
    pub error: Option<String>,
}

impl PayoutResult {
    pub fn failed(instruction: &PayoutInstruction, error: impl Into<String>) -> Self {
        Self {
            wallet_address: instruction.wallet_address.clone(),
            amount: instruction.amount,
            status: PayoutStatus::Failed,
            transaction_reference: None,
            error: Some(error.into()),
        }
    }
}

/// Custody-side state of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    Submitted,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReceipt {
    #[serde(default)]
    pub transaction_hash: Option<String>,
    pub status: TransferState,
    #[serde(default)]
    pub error: Option<String>,
}

/// External custody / transfer provider
#[async_trait]
pub trait TransferClient: Send + Sync {
    /// Payer account balance in the token's smallest unit
    async fn payer_balance(&self) -> Result<u128, PayoutError>;

    async fn transfer(
        &self,
        to: &str,
        amount: u128,
        idempotency_key: &str,
    ) -> Result<TransferReceipt, PayoutError>;
}

/// Retry configuration for idempotent custody reads
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Connection settings for the custody API
#[derive(Debug, Clone)]
pub struct CustodySettings {
    pub api_url: String,
    pub api_key: String,
    pub source_wallet: String,
    pub token_address: String,
    pub chain: String,
}

/// REST client for the custodial wallet service
#[derive(Clone)]
pub struct CustodyClient {
    client: reqwest::Client,
    settings: CustodySettings,
    retry_config: RetryConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransferRequest<'a> {
    from: &'a str,
    to: &'a str,
    token: &'a str,
    chain: &'a str,
    amount: String,
    idempotency_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: String,
}

#[derive(Debug, Deserialize)]
struct CustodyErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl CustodyClient {
    pub fn new(settings: CustodySettings) -> Self {
        Self::with_retry_config(settings, RetryConfig::default())
    }

    pub fn with_retry_config(settings: CustodySettings, retry_config: RetryConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            settings,
            retry_config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.api_url.trim_end_matches('/'), path)
    }

    async fn fetch_balance(&self) -> Result<u128, PayoutError> {
        let response = self
            .client
            .get(self.url(&format!(
                "/v1/wallets/{}/balances/{}",
                self.settings.source_wallet, self.settings.token_address
            )))
            .query(&[("chain", self.settings.chain.as_str())])
            .bearer_auth(&self.settings.api_key)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(PayoutError::CustodyError(format!(
                "HTTP {}: {}",
                status,
                describe_error_body(&text)
            )));
        }

        let body: BalanceResponse = serde_json::from_str(&text)
            .map_err(|e| PayoutError::InvalidResponse(e.to_string()))?;
        body.balance
            .parse::<u128>()
            .map_err(|_| PayoutError::InvalidResponse(format!("balance {}", body.balance)))
    }
}

fn describe_error_body(text: &str) -> String {
    serde_json::from_str::<CustodyErrorBody>(text)
        .ok()
        .and_then(|b| b.message.or(b.error))
        .unwrap_or_else(|| text.chars().take(200).collect())
}

#[async_trait]
impl TransferClient for CustodyClient {
    async fn payer_balance(&self) -> Result<u128, PayoutError> {
        let mut attempt = 0;
        let mut delay = self.retry_config.initial_delay_ms;

        loop {
            match self.fetch_balance().await {
                Ok(balance) => return Ok(balance),
                Err(e) => {
                    warn!(attempt = attempt, error = %e, "Error reading payer balance");
                    if attempt >= self.retry_config.max_retries {
                        return Err(PayoutError::RetryLimitExceeded(e.to_string()));
                    }
                }
            }

            attempt += 1;
            debug!(attempt = attempt, delay_ms = delay, "Waiting before retry");
            tokio::time::sleep(Duration::from_millis(delay)).await;

            // Exponential backoff
            delay = (delay as f64 * self.retry_config.backoff_multiplier) as u64;
            delay = delay.min(self.retry_config.max_delay_ms);
        }
    }

    async fn transfer(
        &self,
        to: &str,
        amount: u128,
        idempotency_key: &str,
    ) -> Result<TransferReceipt, PayoutError> {
        let request = TransferRequest {
            from: &self.settings.source_wallet,
            to,
            token: &self.settings.token_address,
            chain: &self.settings.chain,
            amount: amount.to_string(),
            idempotency_key,
        };

        let response = self
            .client
            .post(self.url("/v1/transfers"))
            .bearer_auth(&self.settings.api_key)
            .header("Idempotency-Key", idempotency_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(PayoutError::CustodyError(format!(
                "HTTP {}: {}",
                status,
                describe_error_body(&text)
            )));
        }

        serde_json::from_str(&text).map_err(|e| PayoutError::InvalidResponse(e.to_string()))
    }
}

/// Executes a batch of prize transfers sequentially
pub struct PayoutExecutor {
    client: Arc<dyn TransferClient>,
}

impl PayoutExecutor {
    pub fn new(client: Arc<dyn TransferClient>) -> Self {
        Self { client }
    }

    /// One result per instruction, in input order.
    ///
    /// Per-transfer failures become FAILED results. An `Err` means the batch
    /// as a whole could not run (payer balance unreadable or too low) and no
    /// transfer was sent.
    pub async fn distribute_payouts(
        &self,
        payouts: &[PayoutInstruction],
    ) -> Result<Vec<PayoutResult>, PayoutError> {
        if payouts.is_empty() {
            return Ok(vec![]);
        }

        let required = payouts
            .iter()
            .try_fold(0u128, |acc, p| acc.checked_add(p.amount))
            .ok_or_else(|| PayoutError::AmountOutOfRange("batch total".to_string()))?;
        let available = self.client.payer_balance().await?;
        if available < required {
            error!(required = %required, available = %available, "Payer balance too low for batch");
            return Err(PayoutError::InsufficientBalance { required, available });
        }

        let mut results = Vec::with_capacity(payouts.len());
        for payout in payouts {
            results.push(self.send_one(payout).await);
        }

        let succeeded = results
            .iter()
            .filter(|r| r.status == PayoutStatus::Success)
            .count();
        info!(
            total = results.len(),
            succeeded = succeeded,
            failed = results.len() - succeeded,
            "Payout batch finished"
        );

        Ok(results)
    }

    async fn send_one(&self, payout: &PayoutInstruction) -> PayoutResult {
        if payout.amount == 0 {
            return PayoutResult::failed(payout, "zero amount");
        }

        match self
            .client
            .transfer(&payout.wallet_address, payout.amount, &payout.idempotency_key)
            .await
        {
            Ok(receipt) if receipt.status == TransferState::Failed => {
                let message = receipt
                    .error
                    .unwrap_or_else(|| "transfer failed at custody provider".to_string());
                warn!(wallet = %payout.wallet_address, error = %message, "Transfer failed");
                PayoutResult {
                    transaction_reference: receipt.transaction_hash,
                    ..PayoutResult::failed(payout, message)
                }
            }
            Ok(receipt) => {
                debug!(
                    wallet = %payout.wallet_address,
                    amount = %payout.amount,
                    tx = ?receipt.transaction_hash,
                    "Transfer accepted"
                );
                PayoutResult {
                    wallet_address: payout.wallet_address.clone(),
                    amount: payout.amount,
                    status: PayoutStatus::Success,
                    transaction_reference: receipt.transaction_hash,
                    error: None,
                }
            }
            Err(e) => {
                warn!(wallet = %payout.wallet_address, error = %e, "Transfer request failed");
                PayoutResult::failed(payout, e.to_string())
            }
        }
    }
}

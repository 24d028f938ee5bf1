use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use super::period::PoolType;

/// Lifecycle of one settlement attempt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DistributionStatus {
    Pending,
    Success,
    Failed,
    Skipped,
}

impl DistributionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistributionStatus::Pending => "PENDING",
            DistributionStatus::Success => "SUCCESS",
            DistributionStatus::Failed => "FAILED",
            DistributionStatus::Skipped => "SKIPPED",
        }
    }

    /// Only a FAILED attempt lets the same period be settled again
    pub fn blocks_new_attempt(&self) -> bool {
        !matches!(self, DistributionStatus::Failed)
    }
}

impl std::fmt::Display for DistributionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DistributionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(DistributionStatus::Pending),
            "SUCCESS" => Ok(DistributionStatus::Success),
            "FAILED" => Ok(DistributionStatus::Failed),
            "SKIPPED" => Ok(DistributionStatus::Skipped),
            other => Err(format!("Unknown distribution status: {}", other)),
        }
    }
}

/// One row per settlement attempt. Written as PENDING before any money moves.
///
/// `total_prize_pool_claimed` stays `None` until the pool claim has completed,
/// which is how a retry tells whether the live pool was already taken.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DistributionSummary {
    pub id: Uuid,
    pub period_identifier: String,
    pub pool_type: PoolType,
    pub status: DistributionStatus,
    pub total_prize_pool_claimed: Option<Decimal>,
    pub total_distributed_amount: Decimal,
    pub number_of_winners: i32,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DistributionSummary {
    pub fn pending(pool_type: PoolType, period_identifier: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            period_identifier: period_identifier.to_string(),
            pool_type,
            status: DistributionStatus::Pending,
            total_prize_pool_claimed: None,
            total_distributed_amount: Decimal::ZERO,
            number_of_winners: 0,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Move to a terminal state
    pub fn finish(
        &mut self,
        status: DistributionStatus,
        distributed: Decimal,
        winners: usize,
        error_message: Option<String>,
    ) {
        self.status = status;
        self.total_distributed_amount = distributed;
        self.number_of_winners = winners as i32;
        self.error_message = error_message;
        self.completed_at = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayoutStatus {
    Success,
    Failed,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Success => "SUCCESS",
            PayoutStatus::Failed => "FAILED",
        }
    }
}

/// One row per payout actually handed to the executor. Never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrizePayoutLog {
    pub id: Uuid,
    pub summary_id: Uuid,
    pub user_id: String,
    pub wallet_address: String,
    pub rank: i32,
    pub score: f64,
    pub prize_amount: Decimal,
    pub transaction_reference: Option<String>,
    pub status: PayoutStatus,
    pub error_message: Option<String>,
    pub distributed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipReason {
    UnresolvedAddress,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::UnresolvedAddress => "UNRESOLVED_ADDRESS",
        }
    }
}

/// Winner that earned a prize but was never sent to the executor
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SkippedPayoutLog {
    pub id: Uuid,
    pub summary_id: Uuid,
    pub user_id: String,
    pub rank: i32,
    pub score: f64,
    pub prize_amount: Decimal,
    pub reason: SkipReason,
    pub recorded_at: DateTime<Utc>,
}

/// Filter for paginated summary listing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DistributionFilter {
    pub pool_type: Option<PoolType>,
    pub status: Option<DistributionStatus>,
}

// ===== API DTOs =====

#[derive(Debug, Deserialize, Serialize, Clone, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateDistributionRequest {
    pub pool_type: PoolType,
    #[validate(length(min = 8, max = 10))]
    pub period_identifier: String,
}

#[derive(Debug, Deserialize, Clone, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ListDistributionsQuery {
    pub pool_type: Option<PoolType>,
    pub status: Option<DistributionStatus>,
    #[validate(range(min = 1))]
    pub page: Option<u32>,
    #[validate(range(min = 1, max = 100))]
    pub page_size: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionPage {
    pub items: Vec<DistributionSummary>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionDetails {
    pub summary: DistributionSummary,
    pub payouts: Vec<PrizePayoutLog>,
    pub skipped: Vec<SkippedPayoutLog>,
}

/// Acknowledgement for fire-and-forget settlement triggers
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementAccepted {
    pub pool_type: PoolType,
    pub period_identifier: String,
    pub message: String,
}

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use super::period::PoolType;

/// Percent of each purchase routed to the daily pool
pub const DAILY_POOL_PERCENT: u32 = 9;
/// Percent of each purchase routed to the weekly pool
pub const WEEKLY_POOL_PERCENT: u32 = 21;
/// Percent of each purchase kept by the treasury
pub const TREASURY_PERCENT: u32 = 70;

/// How one purchase's revenue is split between pools and treasury
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RevenueSplit {
    pub total_revenue: Decimal,
    pub daily_contribution: Decimal,
    pub weekly_contribution: Decimal,
    pub treasury_share: Decimal,
}

impl RevenueSplit {
    /// Applies the fixed 9/21/70 split.
    ///
    /// Pool shares are rounded to cents; the treasury takes the remainder so
    /// the three parts always add back to the input exactly.
    pub fn from_total(total_revenue: Decimal) -> Self {
        let daily = percent_of(total_revenue, DAILY_POOL_PERCENT);
        let weekly = percent_of(total_revenue, WEEKLY_POOL_PERCENT);
        Self {
            total_revenue,
            daily_contribution: daily,
            weekly_contribution: weekly,
            treasury_share: total_revenue - daily - weekly,
        }
    }

    pub fn contribution_for(&self, pool_type: PoolType) -> Decimal {
        match pool_type {
            PoolType::Daily => self.daily_contribution,
            PoolType::Weekly => self.weekly_contribution,
        }
    }
}

fn percent_of(amount: Decimal, percent: u32) -> Decimal {
    (amount * Decimal::from(percent) / Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
}

/// Append-only record of one purchase's allocation
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RevenueAllocationLog {
    pub purchase_id: String,
    pub total_revenue: Decimal,
    pub daily_contribution: Decimal,
    pub weekly_contribution: Decimal,
    pub treasury_share: Decimal,
    pub allocated_at: DateTime<Utc>,
}

/// Current pool totals as shown to players
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    pub pool_type: PoolType,
    pub base_amount: Decimal,
    pub dynamic_bonus: Decimal,
    pub total: Decimal,
}

// ===== API DTOs =====

#[derive(Debug, Deserialize, Serialize, Clone, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AllocatePurchaseRequest {
    #[validate(length(min = 1, max = 128))]
    pub purchase_id: String,
    pub total_revenue: Decimal,
}

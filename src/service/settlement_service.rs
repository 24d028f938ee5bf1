//! Settlement Orchestrator
//!
//! Closes out one scoring period: claims the pool, ranks the winners,
//! resolves wallets, pays through the [`PayoutExecutor`] and records every
//! step in the audit store. A PENDING summary is written before any money
//! moves and always ends in SUCCESS, SKIPPED or FAILED.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::audit_store::{AuditStore, StoreError};
use super::identity_service::IdentityResolver;
use super::leaderboard_service::{LeaderboardError, LeaderboardService};
use super::payout_service::{
    from_smallest_unit, to_smallest_unit, transfer_idempotency_key, PayoutError,
    PayoutExecutor, PayoutInstruction,
};
use super::prize_pool_service::{LedgerError, PrizePoolService};
use crate::api_error::ApiError;
use crate::models::{
    is_valid_period_id, ArchivedEntry, DistributionDetails, DistributionFilter,
    DistributionPage, DistributionStatus, DistributionSummary, LeaderboardEntry, PayoutStatus,
    PoolType, PrizePayoutLog, SkipReason, SkippedPayoutLog,
};

/// Share of the claimed pool per rank, in basis points. Rank 1 first.
pub const PRIZE_DISTRIBUTION_BPS: [u32; 5] = [4000, 2400, 1600, 1200, 800];

const BPS_DENOMINATOR: u32 = 10_000;

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("Prize pool error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Leaderboard error: {0}")]
    Leaderboard(#[from] LeaderboardError),

    #[error("Payout error: {0}")]
    Payout(#[from] PayoutError),

    #[error("Audit store error: {0}")]
    Store(#[from] StoreError),

    #[error("{pool_type} period {period_identifier} already has a {status} distribution")]
    AlreadySettled {
        pool_type: PoolType,
        period_identifier: String,
        status: String,
    },

    #[error("Distribution {0} not found")]
    NotFound(Uuid),

    #[error("Distribution {id} is {status}; only FAILED distributions can be retried")]
    NotRetryable { id: Uuid, status: DistributionStatus },

    #[error("Invalid period identifier for {0}: {1}")]
    InvalidPeriod(PoolType, String),
}

impl From<SettlementError> for ApiError {
    fn from(err: SettlementError) -> Self {
        match err {
            SettlementError::Ledger(e) => e.into(),
            SettlementError::Leaderboard(e) => e.into(),
            SettlementError::Payout(e) => e.into(),
            SettlementError::Store(e) => e.into(),
            SettlementError::AlreadySettled { .. } | SettlementError::NotRetryable { .. } => {
                ApiError::Conflict(err.to_string())
            }
            SettlementError::NotFound(_) => ApiError::not_found(err.to_string()),
            SettlementError::InvalidPeriod(..) => ApiError::bad_request(err.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Smallest-unit exponent of the payout token
    pub token_decimals: u32,
    /// Entries written to the archive per settled period
    pub archive_depth: usize,
}

/// Whole display units owed to `rank` out of `claimed`, floored.
/// Zero for ranks outside the paid table.
pub fn rank_prize(claimed: Decimal, rank: u32) -> Decimal {
    let Some(bps) = rank
        .checked_sub(1)
        .and_then(|i| PRIZE_DISTRIBUTION_BPS.get(i as usize))
    else {
        return Decimal::ZERO;
    };
    if claimed <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (claimed * Decimal::from(*bps) / Decimal::from(BPS_DENOMINATOR)).floor()
}

/// Winner that made it past identity resolution
struct PlannedPayout {
    entry: LeaderboardEntry,
    wallet_address: String,
    prize_amount: Decimal,
    instruction: PayoutInstruction,
}

#[derive(Clone)]
pub struct SettlementService {
    pools: PrizePoolService,
    leaderboard: LeaderboardService,
    resolver: Arc<IdentityResolver>,
    executor: Arc<PayoutExecutor>,
    audit: Arc<dyn AuditStore>,
    config: SettlementConfig,
}

impl SettlementService {
    pub fn new(
        pools: PrizePoolService,
        leaderboard: LeaderboardService,
        resolver: Arc<IdentityResolver>,
        executor: Arc<PayoutExecutor>,
        audit: Arc<dyn AuditStore>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            pools,
            leaderboard,
            resolver,
            executor,
            audit,
            config,
        }
    }

    // ==================== Entry points ====================

    /// Settle yesterday's UTC daily period as of `now`
    pub async fn settle_daily_prizes(
        &self,
        now: DateTime<Utc>,
    ) -> Result<DistributionSummary, SettlementError> {
        let period = PoolType::Daily.settlement_period(now);
        self.settle_prizes_for_period(PoolType::Daily, &period).await
    }

    /// Settle the ISO week that contained the instant seven days before `now`
    pub async fn settle_weekly_prizes(
        &self,
        now: DateTime<Utc>,
    ) -> Result<DistributionSummary, SettlementError> {
        let period = PoolType::Weekly.settlement_period(now);
        self.settle_prizes_for_period(PoolType::Weekly, &period).await
    }

    /// Run one settlement attempt for an explicit period and archive its
    /// leaderboard once the period is settled.
    ///
    /// Refuses to start unless every earlier attempt for the period FAILED.
    /// When an earlier FAILED attempt already claimed the pool, its claimed
    /// amount is reused as the budget and winners already paid in the
    /// period are left out.
    pub async fn settle_prizes_for_period(
        &self,
        pool_type: PoolType,
        period_identifier: &str,
    ) -> Result<DistributionSummary, SettlementError> {
        let summary = self.attempt_period(pool_type, period_identifier).await?;
        self.archive_if_settled(&summary).await;
        Ok(summary)
    }

    async fn attempt_period(
        &self,
        pool_type: PoolType,
        period_identifier: &str,
    ) -> Result<DistributionSummary, SettlementError> {
        if !is_valid_period_id(pool_type, period_identifier) {
            return Err(SettlementError::InvalidPeriod(
                pool_type,
                period_identifier.to_string(),
            ));
        }

        let prior = self
            .audit
            .summaries_for_period(pool_type, period_identifier)
            .await?;
        if let Some(active) = prior.iter().find(|s| s.status.blocks_new_attempt()) {
            warn!(
                pool_type = %pool_type,
                period = period_identifier,
                summary_id = %active.id,
                status = %active.status,
                "Settlement refused; period already has an active distribution"
            );
            return Err(SettlementError::AlreadySettled {
                pool_type,
                period_identifier: period_identifier.to_string(),
                status: active.status.to_string(),
            });
        }

        let reused_budget = prior
            .iter()
            .filter(|s| s.status == DistributionStatus::Failed)
            .find_map(|s| s.total_prize_pool_claimed);

        let mut summary = DistributionSummary::pending(pool_type, period_identifier);
        match self.audit.create_summary(&summary).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => {
                warn!(
                    pool_type = %pool_type,
                    period = period_identifier,
                    "Concurrent settlement start lost the race"
                );
                return Err(SettlementError::AlreadySettled {
                    pool_type,
                    period_identifier: period_identifier.to_string(),
                    status: DistributionStatus::Pending.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            summary_id = %summary.id,
            pool_type = %pool_type,
            period = period_identifier,
            retry = reused_budget.is_some(),
            "Settlement started"
        );

        match self.run_attempt(&mut summary, reused_budget).await {
            Ok(()) => {
                self.audit.update_summary(&summary).await?;
                info!(
                    summary_id = %summary.id,
                    pool_type = %pool_type,
                    period = period_identifier,
                    status = %summary.status,
                    distributed = %summary.total_distributed_amount,
                    winners = summary.number_of_winners,
                    "Settlement finished"
                );
                Ok(summary)
            }
            Err(e) => {
                error!(
                    summary_id = %summary.id,
                    pool_type = %pool_type,
                    period = period_identifier,
                    error = %e,
                    "Settlement attempt failed"
                );
                let distributed = summary.total_distributed_amount;
                let winners = summary.number_of_winners.max(0) as usize;
                summary.finish(DistributionStatus::Failed, distributed, winners, Some(e.to_string()));
                if let Err(store_err) = self.audit.update_summary(&summary).await {
                    error!(
                        summary_id = %summary.id,
                        error = %store_err,
                        "Could not mark distribution FAILED"
                    );
                }
                Err(e)
            }
        }
    }

    /// Re-run a FAILED distribution for its stored pool type and period
    pub async fn retry_distribution(
        &self,
        summary_id: Uuid,
    ) -> Result<DistributionSummary, SettlementError> {
        let previous = self.retryable_summary(summary_id).await?;
        info!(
            summary_id = %summary_id,
            pool_type = %previous.pool_type,
            period = %previous.period_identifier,
            "Retrying failed distribution"
        );
        self.settle_prizes_for_period(previous.pool_type, &previous.period_identifier)
            .await
    }

    /// Look up a summary and check that it may be retried
    pub async fn retryable_summary(
        &self,
        summary_id: Uuid,
    ) -> Result<DistributionSummary, SettlementError> {
        let summary = self
            .audit
            .get_summary(summary_id)
            .await?
            .ok_or(SettlementError::NotFound(summary_id))?;
        if summary.status != DistributionStatus::Failed {
            return Err(SettlementError::NotRetryable {
                id: summary_id,
                status: summary.status,
            });
        }
        Ok(summary)
    }

    /// Settle the period that closed before `now`
    pub async fn run_scheduled_settlement(
        &self,
        pool_type: PoolType,
        now: DateTime<Utc>,
    ) -> Result<DistributionSummary, SettlementError> {
        match pool_type {
            PoolType::Daily => self.settle_daily_prizes(now).await,
            PoolType::Weekly => self.settle_weekly_prizes(now).await,
        }
    }

    // ==================== Queries ====================

    pub async fn list_distributions(
        &self,
        filter: &DistributionFilter,
        page: u32,
        page_size: u32,
    ) -> Result<DistributionPage, SettlementError> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, 100);
        let (items, total) = self.audit.list_summaries(filter, page, page_size).await?;
        Ok(DistributionPage {
            items,
            total,
            page,
            page_size,
        })
    }

    pub async fn get_distribution(
        &self,
        summary_id: Uuid,
    ) -> Result<DistributionDetails, SettlementError> {
        let summary = self
            .audit
            .get_summary(summary_id)
            .await?
            .ok_or(SettlementError::NotFound(summary_id))?;
        let payouts = self.audit.payouts_for_summary(summary_id).await?;
        let skipped = self.audit.skipped_for_summary(summary_id).await?;
        Ok(DistributionDetails {
            summary,
            payouts,
            skipped,
        })
    }

    // ==================== Attempt ====================

    /// Drive `summary` to a terminal state. An `Err` leaves it for the caller
    /// to mark FAILED.
    async fn run_attempt(
        &self,
        summary: &mut DistributionSummary,
        reused_budget: Option<Decimal>,
    ) -> Result<(), SettlementError> {
        let pool_type = summary.pool_type;
        let period = summary.period_identifier.clone();

        let claimed = match reused_budget {
            Some(budget) => {
                info!(
                    summary_id = %summary.id,
                    budget = %budget,
                    "Reusing budget claimed by a failed attempt"
                );
                budget
            }
            None => self.pools.claim_pool(pool_type).await?,
        };
        summary.total_prize_pool_claimed = Some(claimed);
        self.audit.update_summary(summary).await?;

        let winners = self
            .leaderboard
            .get_leaderboard(pool_type, &period, PRIZE_DISTRIBUTION_BPS.len())
            .await?;
        if winners.is_empty() {
            info!(summary_id = %summary.id, "No winners; distribution skipped");
            summary.finish(DistributionStatus::Skipped, Decimal::ZERO, 0, Some("no winners".into()));
            return Ok(());
        }

        if claimed <= Decimal::ZERO {
            warn!(summary_id = %summary.id, claimed = %claimed, "Empty pool; distribution skipped");
            summary.finish(
                DistributionStatus::Skipped,
                Decimal::ZERO,
                0,
                Some("pool was zero or negative".into()),
            );
            return Ok(());
        }

        let already_paid: HashSet<String> = if reused_budget.is_some() {
            self.audit
                .successful_payouts_for_period(pool_type, &period)
                .await?
                .into_iter()
                .map(|row| row.user_id)
                .collect()
        } else {
            HashSet::new()
        };

        let (planned, skipped) = self
            .plan_payouts(summary, claimed, winners, &already_paid)
            .await?;

        if !skipped.is_empty() {
            self.audit.insert_skipped_payouts(&skipped).await?;
        }

        if planned.is_empty() {
            info!(summary_id = %summary.id, "No payouts calculated; distribution skipped");
            summary.finish(
                DistributionStatus::Skipped,
                Decimal::ZERO,
                0,
                Some("no payouts calculated".into()),
            );
            return Ok(());
        }

        let planned_total: Decimal = planned.iter().map(|p| p.prize_amount).sum();
        if planned_total > claimed {
            warn!(
                summary_id = %summary.id,
                planned = %planned_total,
                claimed = %claimed,
                "Planned payouts exceed claimed pool"
            );
        }

        let instructions: Vec<PayoutInstruction> =
            planned.iter().map(|p| p.instruction.clone()).collect();

        let results = match self.executor.distribute_payouts(&instructions).await {
            Ok(results) => results,
            Err(e) => {
                let message = e.to_string();
                let rows: Vec<PrizePayoutLog> = planned
                    .iter()
                    .map(|p| payout_row(summary.id, p, PayoutStatus::Failed, None, Some(message.clone())))
                    .collect();
                if let Err(store_err) = self.audit.insert_payout_logs(&rows).await {
                    error!(
                        summary_id = %summary.id,
                        error = %store_err,
                        "Could not log failed payout batch"
                    );
                }
                return Err(e.into());
            }
        };

        let mut rows = Vec::with_capacity(planned.len());
        let mut distributed_units: u128 = 0;
        let mut succeeded = 0usize;
        for (plan, result) in planned.iter().zip(results) {
            if result.status == PayoutStatus::Success {
                succeeded += 1;
                distributed_units = distributed_units.saturating_add(result.amount);
            } else {
                error!(
                    summary_id = %summary.id,
                    user_id = %plan.entry.user_id,
                    rank = plan.entry.rank,
                    error = ?result.error,
                    "Payout failed"
                );
            }
            rows.push(payout_row(
                summary.id,
                plan,
                result.status,
                result.transaction_reference,
                result.error,
            ));
        }
        self.audit.insert_payout_logs(&rows).await?;

        let distributed = from_smallest_unit(distributed_units, self.config.token_decimals)?;
        if distributed > claimed {
            warn!(
                summary_id = %summary.id,
                distributed = %distributed,
                claimed = %claimed,
                "Distributed amount exceeds claimed pool"
            );
        }

        let failed = rows.len() - succeeded;
        if failed == 0 {
            summary.finish(DistributionStatus::Success, distributed, succeeded, None);
        } else {
            summary.finish(
                DistributionStatus::Failed,
                distributed,
                succeeded,
                Some(format!(
                    "{} of {} payouts failed ({} succeeded)",
                    failed,
                    rows.len(),
                    succeeded
                )),
            );
        }
        Ok(())
    }

    /// Compute prizes and resolve wallets in rank order
    async fn plan_payouts(
        &self,
        summary: &DistributionSummary,
        claimed: Decimal,
        winners: Vec<LeaderboardEntry>,
        already_paid: &HashSet<String>,
    ) -> Result<(Vec<PlannedPayout>, Vec<SkippedPayoutLog>), SettlementError> {
        let mut planned = Vec::new();
        let mut skipped = Vec::new();

        for entry in winners {
            let prize_amount = rank_prize(claimed, entry.rank);
            if prize_amount <= Decimal::ZERO {
                continue;
            }

            if already_paid.contains(&entry.user_id) {
                info!(
                    summary_id = %summary.id,
                    user_id = %entry.user_id,
                    rank = entry.rank,
                    "Winner already paid for this period"
                );
                continue;
            }

            let Some(wallet_address) = self.resolver.resolve_wallet_address(&entry.user_id).await
            else {
                warn!(
                    summary_id = %summary.id,
                    user_id = %entry.user_id,
                    rank = entry.rank,
                    prize = %prize_amount,
                    "No payable wallet; winner skipped"
                );
                skipped.push(SkippedPayoutLog {
                    id: Uuid::new_v4(),
                    summary_id: summary.id,
                    user_id: entry.user_id.clone(),
                    rank: entry.rank as i32,
                    score: entry.score,
                    prize_amount,
                    reason: SkipReason::UnresolvedAddress,
                    recorded_at: Utc::now(),
                });
                continue;
            };

            let amount = to_smallest_unit(prize_amount, self.config.token_decimals)?;
            let idempotency_key = transfer_idempotency_key(
                summary.pool_type,
                &summary.period_identifier,
                entry.rank,
                &wallet_address,
                amount,
            );
            planned.push(PlannedPayout {
                instruction: PayoutInstruction {
                    wallet_address: wallet_address.clone(),
                    amount,
                    idempotency_key,
                },
                entry,
                wallet_address,
                prize_amount,
            });
        }

        Ok((planned, skipped))
    }

    /// FAILED periods keep their live leaderboard so a retry can still rank
    /// the same winners. An archive error is logged; the settlement stands.
    async fn archive_if_settled(&self, summary: &DistributionSummary) {
        if !matches!(
            summary.status,
            DistributionStatus::Success | DistributionStatus::Skipped
        ) {
            warn!(
                summary_id = %summary.id,
                status = %summary.status,
                "Leaderboard not archived for unsettled period"
            );
            return;
        }

        if let Err(e) = self
            .archive_period(summary.pool_type, &summary.period_identifier)
            .await
        {
            error!(
                summary_id = %summary.id,
                pool_type = %summary.pool_type,
                period = %summary.period_identifier,
                error = %e,
                "Leaderboard archive failed after settlement"
            );
        }
    }

    /// Archive the top entries of a settled period with the prizes paid
    async fn archive_period(
        &self,
        pool_type: PoolType,
        period_identifier: &str,
    ) -> Result<(), SettlementError> {
        let entries = self
            .leaderboard
            .get_leaderboard(pool_type, period_identifier, self.config.archive_depth)
            .await?;

        let mut paid: HashMap<String, Decimal> = HashMap::new();
        for row in self
            .audit
            .successful_payouts_for_period(pool_type, period_identifier)
            .await?
        {
            *paid.entry(row.user_id).or_default() += row.prize_amount;
        }

        let archived: Vec<ArchivedEntry> = entries
            .into_iter()
            .map(|e| ArchivedEntry {
                prize_amount: paid.get(&e.user_id).copied().unwrap_or(Decimal::ZERO),
                user_id: e.user_id,
                score: e.score,
                rank: e.rank,
            })
            .collect();

        self.leaderboard
            .archive_leaderboard(pool_type, period_identifier, &archived)
            .await?;
        Ok(())
    }
}

fn payout_row(
    summary_id: Uuid,
    plan: &PlannedPayout,
    status: PayoutStatus,
    transaction_reference: Option<String>,
    error_message: Option<String>,
) -> PrizePayoutLog {
    PrizePayoutLog {
        id: Uuid::new_v4(),
        summary_id,
        user_id: plan.entry.user_id.clone(),
        wallet_address: plan.wallet_address.clone(),
        rank: plan.entry.rank as i32,
        score: plan.entry.score,
        prize_amount: plan.prize_amount,
        transaction_reference,
        distributed_at: (status == PayoutStatus::Success).then(Utc::now),
        status,
        error_message,
    }
}

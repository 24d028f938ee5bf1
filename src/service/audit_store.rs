//! Durable audit trail
//!
//! Every record kind the settlement pipeline persists goes through
//! [`AuditStore`]. Rows are appended or updated in place by primary key and
//! are never deleted.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::api_error::ApiError;
use crate::models::{
    ArchivedEntry, DistributionFilter, DistributionSummary, PoolType, PrizePayoutLog,
    RevenueAllocationLog, ScoreSubmissionLog, SkippedPayoutLog,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(sqlx::Error),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            _ => StoreError::DatabaseError(err),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DatabaseError(e) => ApiError::DatabaseError(e),
            StoreError::Conflict(msg) => ApiError::Conflict(msg),
            StoreError::Unavailable(msg) => ApiError::internal_error(msg),
        }
    }
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    // ==================== Distribution summaries ====================

    /// Insert a new summary. Fails with `Conflict` if a PENDING or SUCCESS
    /// summary already exists for the same pool type and period.
    async fn create_summary(&self, summary: &DistributionSummary) -> Result<(), StoreError>;

    async fn update_summary(&self, summary: &DistributionSummary) -> Result<(), StoreError>;

    async fn get_summary(&self, id: Uuid) -> Result<Option<DistributionSummary>, StoreError>;

    /// All attempts for a period, oldest first
    async fn summaries_for_period(
        &self,
        pool_type: PoolType,
        period_identifier: &str,
    ) -> Result<Vec<DistributionSummary>, StoreError>;

    /// Page of summaries, newest first, with the total matching count
    async fn list_summaries(
        &self,
        filter: &DistributionFilter,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<DistributionSummary>, i64), StoreError>;

    // ==================== Payout rows ====================

    async fn insert_payout_logs(&self, rows: &[PrizePayoutLog]) -> Result<(), StoreError>;

    async fn payouts_for_summary(&self, summary_id: Uuid) -> Result<Vec<PrizePayoutLog>, StoreError>;

    /// SUCCESS payout rows across every attempt of a period
    async fn successful_payouts_for_period(
        &self,
        pool_type: PoolType,
        period_identifier: &str,
    ) -> Result<Vec<PrizePayoutLog>, StoreError>;

    async fn insert_skipped_payouts(&self, rows: &[SkippedPayoutLog]) -> Result<(), StoreError>;

    async fn skipped_for_summary(&self, summary_id: Uuid) -> Result<Vec<SkippedPayoutLog>, StoreError>;

    // ==================== Revenue / leaderboard ====================

    async fn revenue_allocation_exists(&self, purchase_id: &str) -> Result<bool, StoreError>;

    async fn insert_revenue_allocation(&self, row: &RevenueAllocationLog) -> Result<(), StoreError>;

    async fn insert_score_submission(&self, row: &ScoreSubmissionLog) -> Result<(), StoreError>;

    /// Persist all entries of a closed period atomically
    async fn insert_leaderboard_archive(
        &self,
        period_type: PoolType,
        period_identifier: &str,
        entries: &[ArchivedEntry],
    ) -> Result<(), StoreError>;
}

/// Postgres-backed audit store
#[derive(Clone)]
pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SUMMARY_COLUMNS: &str = r#"
    id, period_identifier, pool_type, status, total_prize_pool_claimed,
    total_distributed_amount, number_of_winners, error_message, started_at, completed_at
"#;

const PAYOUT_COLUMNS: &str = r#"
    id, summary_id, user_id, wallet_address, rank, score, prize_amount,
    transaction_reference, status, error_message, distributed_at
"#;

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn create_summary(&self, summary: &DistributionSummary) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO distribution_summary (
                id, period_identifier, pool_type, status, total_prize_pool_claimed,
                total_distributed_amount, number_of_winners, error_message, started_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(summary.id)
        .bind(&summary.period_identifier)
        .bind(summary.pool_type.as_str())
        .bind(summary.status.as_str())
        .bind(summary.total_prize_pool_claimed)
        .bind(summary.total_distributed_amount)
        .bind(summary.number_of_winners)
        .bind(&summary.error_message)
        .bind(summary.started_at)
        .bind(summary.completed_at)
        .execute(&self.pool)
        .await?;

        debug!(summary_id = %summary.id, "Distribution summary created");
        Ok(())
    }

    async fn update_summary(&self, summary: &DistributionSummary) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE distribution_summary
            SET status = $2,
                total_prize_pool_claimed = $3,
                total_distributed_amount = $4,
                number_of_winners = $5,
                error_message = $6,
                completed_at = $7
            WHERE id = $1
            "#,
        )
        .bind(summary.id)
        .bind(summary.status.as_str())
        .bind(summary.total_prize_pool_claimed)
        .bind(summary.total_distributed_amount)
        .bind(summary.number_of_winners)
        .bind(&summary.error_message)
        .bind(summary.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_summary(&self, id: Uuid) -> Result<Option<DistributionSummary>, StoreError> {
        let query = format!("SELECT {} FROM distribution_summary WHERE id = $1", SUMMARY_COLUMNS);
        let summary = sqlx::query_as::<_, DistributionSummary>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(summary)
    }

    async fn summaries_for_period(
        &self,
        pool_type: PoolType,
        period_identifier: &str,
    ) -> Result<Vec<DistributionSummary>, StoreError> {
        let query = format!(
            "SELECT {} FROM distribution_summary \
             WHERE pool_type = $1 AND period_identifier = $2 \
             ORDER BY started_at ASC",
            SUMMARY_COLUMNS
        );
        let rows = sqlx::query_as::<_, DistributionSummary>(&query)
            .bind(pool_type.as_str())
            .bind(period_identifier)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn list_summaries(
        &self,
        filter: &DistributionFilter,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<DistributionSummary>, i64), StoreError> {
        let pool_type = filter.pool_type.map(|p| p.as_str());
        let status = filter.status.map(|s| s.as_str());
        let offset = i64::from(page.saturating_sub(1)) * i64::from(page_size);

        let query = format!(
            "SELECT {} FROM distribution_summary \
             WHERE ($1::VARCHAR IS NULL OR pool_type = $1) \
               AND ($2::VARCHAR IS NULL OR status = $2) \
             ORDER BY started_at DESC \
             LIMIT $3 OFFSET $4",
            SUMMARY_COLUMNS
        );
        let items = sqlx::query_as::<_, DistributionSummary>(&query)
            .bind(pool_type)
            .bind(status)
            .bind(i64::from(page_size))
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM distribution_summary
            WHERE ($1::VARCHAR IS NULL OR pool_type = $1)
              AND ($2::VARCHAR IS NULL OR status = $2)
            "#,
        )
        .bind(pool_type)
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        Ok((items, total))
    }

    async fn insert_payout_logs(&self, rows: &[PrizePayoutLog]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO prize_distribution_log (
                    id, summary_id, user_id, wallet_address, rank, score, prize_amount,
                    transaction_reference, status, error_message, distributed_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(row.id)
            .bind(row.summary_id)
            .bind(&row.user_id)
            .bind(&row.wallet_address)
            .bind(row.rank)
            .bind(row.score)
            .bind(row.prize_amount)
            .bind(&row.transaction_reference)
            .bind(row.status.as_str())
            .bind(&row.error_message)
            .bind(row.distributed_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn payouts_for_summary(&self, summary_id: Uuid) -> Result<Vec<PrizePayoutLog>, StoreError> {
        let query = format!(
            "SELECT {} FROM prize_distribution_log WHERE summary_id = $1 ORDER BY rank ASC",
            PAYOUT_COLUMNS
        );
        let rows = sqlx::query_as::<_, PrizePayoutLog>(&query)
            .bind(summary_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn successful_payouts_for_period(
        &self,
        pool_type: PoolType,
        period_identifier: &str,
    ) -> Result<Vec<PrizePayoutLog>, StoreError> {
        let rows = sqlx::query_as::<_, PrizePayoutLog>(
            r#"
            SELECT l.id, l.summary_id, l.user_id, l.wallet_address, l.rank, l.score,
                   l.prize_amount, l.transaction_reference, l.status, l.error_message,
                   l.distributed_at
            FROM prize_distribution_log l
            JOIN distribution_summary s ON s.id = l.summary_id
            WHERE s.pool_type = $1 AND s.period_identifier = $2 AND l.status = 'SUCCESS'
            ORDER BY l.rank ASC
            "#,
        )
        .bind(pool_type.as_str())
        .bind(period_identifier)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn insert_skipped_payouts(&self, rows: &[SkippedPayoutLog]) -> Result<(), StoreError> {
        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO skipped_payout_log (
                    id, summary_id, user_id, rank, score, prize_amount, reason, recorded_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(row.id)
            .bind(row.summary_id)
            .bind(&row.user_id)
            .bind(row.rank)
            .bind(row.score)
            .bind(row.prize_amount)
            .bind(row.reason.as_str())
            .bind(row.recorded_at)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn skipped_for_summary(&self, summary_id: Uuid) -> Result<Vec<SkippedPayoutLog>, StoreError> {
        let rows = sqlx::query_as::<_, SkippedPayoutLog>(
            r#"
            SELECT id, summary_id, user_id, rank, score, prize_amount, reason, recorded_at
            FROM skipped_payout_log
            WHERE summary_id = $1
            ORDER BY rank ASC
            "#,
        )
        .bind(summary_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn revenue_allocation_exists(&self, purchase_id: &str) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM revenue_allocation_log WHERE purchase_id = $1)",
        )
        .bind(purchase_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn insert_revenue_allocation(&self, row: &RevenueAllocationLog) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO revenue_allocation_log (
                purchase_id, total_revenue, daily_contribution, weekly_contribution,
                treasury_share, allocated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&row.purchase_id)
        .bind(row.total_revenue)
        .bind(row.daily_contribution)
        .bind(row.weekly_contribution)
        .bind(row.treasury_share)
        .bind(row.allocated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_score_submission(&self, row: &ScoreSubmissionLog) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO score_submission_log (
                id, user_id, score, status, rejection_reason, daily_period,
                weekly_period, metadata, submitted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(row.id)
        .bind(&row.user_id)
        .bind(row.score)
        .bind(row.status.as_str())
        .bind(&row.rejection_reason)
        .bind(&row.daily_period)
        .bind(&row.weekly_period)
        .bind(&row.metadata)
        .bind(row.submitted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_leaderboard_archive(
        &self,
        period_type: PoolType,
        period_identifier: &str,
        entries: &[ArchivedEntry],
    ) -> Result<(), StoreError> {
        let archived_at = Utc::now();
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO leaderboard_archive (
                    id, period_type, period_identifier, user_id, score, rank,
                    prize_amount, archived_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (period_type, period_identifier, user_id)
                DO UPDATE SET score = EXCLUDED.score,
                              rank = EXCLUDED.rank,
                              prize_amount = EXCLUDED.prize_amount,
                              archived_at = EXCLUDED.archived_at
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(period_type.as_str())
            .bind(period_identifier)
            .bind(&entry.user_id)
            .bind(entry.score)
            .bind(entry.rank as i32)
            .bind(entry.prize_amount)
            .bind(archived_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(
            period_type = %period_type,
            period = period_identifier,
            count = entries.len(),
            "Leaderboard archived"
        );
        Ok(())
    }
}

//! Leaderboard Store
//!
//! One Redis sorted set per (period type, period). Members are user ids and
//! scores overwrite on resubmission. Equal scores come back in the sorted
//! set's own member order; no further tie-break is applied.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::audit_store::{AuditStore, StoreError};
use crate::api_error::ApiError;
use crate::models::{
    ArchivedEntry, LeaderboardEntry, PoolType, ScoreSubmissionLog, SubmissionStatus,
    SubmitScoreResponse,
};

#[derive(Debug, Error)]
pub enum LeaderboardError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Redis error: {0}")]
    RedisError(String),

    #[error("Archive write failed: {0}")]
    ArchiveFailed(#[from] StoreError),
}

impl From<redis::RedisError> for LeaderboardError {
    fn from(err: redis::RedisError) -> Self {
        LeaderboardError::RedisError(err.to_string())
    }
}

impl From<LeaderboardError> for ApiError {
    fn from(err: LeaderboardError) -> Self {
        match err {
            LeaderboardError::Validation(msg) => ApiError::ValidationError(msg),
            LeaderboardError::RedisError(e) => ApiError::RedisError(e),
            LeaderboardError::ArchiveFailed(e) => e.into(),
        }
    }
}

/// Live ranked score registry
#[async_trait]
pub trait LeaderboardStore: Send + Sync {
    /// Set the user's score in a period, replacing any previous one
    async fn upsert(
        &self,
        period_type: PoolType,
        period_identifier: &str,
        user_id: &str,
        score: f64,
    ) -> Result<(), LeaderboardError>;

    /// Top `limit` entries by descending score as `(user_id, score)`
    async fn top(
        &self,
        period_type: PoolType,
        period_identifier: &str,
        limit: usize,
    ) -> Result<Vec<(String, f64)>, LeaderboardError>;

    /// Drop the live registry of a period
    async fn clear(&self, period_type: PoolType, period_identifier: &str) -> Result<(), LeaderboardError>;
}

/// Redis sorted-set implementation of [`LeaderboardStore`]
#[derive(Clone)]
pub struct RedisLeaderboardStore {
    redis: ConnectionManager,
}

impl RedisLeaderboardStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl LeaderboardStore for RedisLeaderboardStore {
    async fn upsert(
        &self,
        period_type: PoolType,
        period_identifier: &str,
        user_id: &str,
        score: f64,
    ) -> Result<(), LeaderboardError> {
        let mut conn = self.redis.clone();
        let _: i64 = conn
            .zadd(period_type.leaderboard_key(period_identifier), user_id, score)
            .await?;
        Ok(())
    }

    async fn top(
        &self,
        period_type: PoolType,
        period_identifier: &str,
        limit: usize,
    ) -> Result<Vec<(String, f64)>, LeaderboardError> {
        if limit == 0 {
            return Ok(vec![]);
        }
        let mut conn = self.redis.clone();
        let entries: Vec<(String, f64)> = conn
            .zrevrange_withscores(
                period_type.leaderboard_key(period_identifier),
                0,
                limit as isize - 1,
            )
            .await?;
        Ok(entries)
    }

    async fn clear(&self, period_type: PoolType, period_identifier: &str) -> Result<(), LeaderboardError> {
        let mut conn = self.redis.clone();
        let _: i64 = conn.del(period_type.leaderboard_key(period_identifier)).await?;
        Ok(())
    }
}

/// Assign 1-based ranks in the order the store returned entries
pub(crate) fn rank_entries(raw: Vec<(String, f64)>) -> Vec<LeaderboardEntry> {
    raw.into_iter()
        .enumerate()
        .map(|(i, (user_id, score))| LeaderboardEntry {
            user_id,
            score,
            rank: i as u32 + 1,
        })
        .collect()
}

#[derive(Clone)]
pub struct LeaderboardService {
    store: Arc<dyn LeaderboardStore>,
    audit: Arc<dyn AuditStore>,
}

impl LeaderboardService {
    pub fn new(store: Arc<dyn LeaderboardStore>, audit: Arc<dyn AuditStore>) -> Self {
        Self { store, audit }
    }

    /// Record a score for the current daily and weekly periods
    pub async fn submit_score(
        &self,
        user_id: &str,
        score: f64,
        metadata: serde_json::Value,
    ) -> Result<SubmitScoreResponse, LeaderboardError> {
        self.submit_score_at(user_id, score, metadata, Utc::now()).await
    }

    pub async fn submit_score_at(
        &self,
        user_id: &str,
        score: f64,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<SubmitScoreResponse, LeaderboardError> {
        let daily_period = PoolType::Daily.current_period(now);
        let weekly_period = PoolType::Weekly.current_period(now);

        let rejection = validate_submission(user_id, score);
        let mut log = ScoreSubmissionLog {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            score,
            status: SubmissionStatus::Accepted,
            rejection_reason: None,
            daily_period: daily_period.clone(),
            weekly_period: weekly_period.clone(),
            metadata,
            submitted_at: now,
        };

        if let Some(reason) = rejection {
            warn!(user_id = user_id, score = score, reason = %reason, "Score submission rejected");
            log.status = SubmissionStatus::Rejected;
            log.rejection_reason = Some(reason.clone());
            self.record_submission(&log).await;
            return Err(LeaderboardError::Validation(reason));
        }

        for (period_type, period) in [
            (PoolType::Daily, &daily_period),
            (PoolType::Weekly, &weekly_period),
        ] {
            if let Err(e) = self.store.upsert(period_type, period, user_id, score).await {
                error!(
                    user_id = user_id,
                    period_type = %period_type,
                    period = %period,
                    error = %e,
                    "Score upsert failed"
                );
                return Err(e);
            }
        }

        self.record_submission(&log).await;

        info!(
            user_id = user_id,
            score = score,
            daily = %daily_period,
            weekly = %weekly_period,
            "Score submitted"
        );

        Ok(SubmitScoreResponse {
            user_id: user_id.to_string(),
            score,
            daily_period,
            weekly_period,
        })
    }

    /// Top `top_n` of the period currently in progress
    pub async fn get_active_leaderboard(
        &self,
        period_type: PoolType,
        top_n: usize,
    ) -> Result<(String, Vec<LeaderboardEntry>), LeaderboardError> {
        let period = period_type.current_period(Utc::now());
        let entries = self.get_leaderboard(period_type, &period, top_n).await?;
        Ok((period, entries))
    }

    /// Top `top_n` of a specific period
    pub async fn get_leaderboard(
        &self,
        period_type: PoolType,
        period_identifier: &str,
        top_n: usize,
    ) -> Result<Vec<LeaderboardEntry>, LeaderboardError> {
        let raw = self.store.top(period_type, period_identifier, top_n).await?;
        Ok(rank_entries(raw))
    }

    /// Persist final entries, then clear the live registry.
    ///
    /// The live registry is only cleared once the durable write committed, so
    /// a failed write leaves the only copy intact. Empty input does nothing.
    pub async fn archive_leaderboard(
        &self,
        period_type: PoolType,
        period_identifier: &str,
        entries: &[ArchivedEntry],
    ) -> Result<(), LeaderboardError> {
        if entries.is_empty() {
            warn!(
                period_type = %period_type,
                period = period_identifier,
                "Nothing to archive; live leaderboard left untouched"
            );
            return Ok(());
        }

        if let Err(e) = self
            .audit
            .insert_leaderboard_archive(period_type, period_identifier, entries)
            .await
        {
            error!(
                period_type = %period_type,
                period = period_identifier,
                error = %e,
                "Leaderboard archive failed; live leaderboard kept"
            );
            return Err(e.into());
        }

        self.store.clear(period_type, period_identifier).await?;

        info!(
            period_type = %period_type,
            period = period_identifier,
            count = entries.len(),
            "Leaderboard archived and cleared"
        );
        Ok(())
    }

    async fn record_submission(&self, log: &ScoreSubmissionLog) {
        if let Err(e) = self.audit.insert_score_submission(log).await {
            warn!(user_id = %log.user_id, error = %e, "Failed to record score submission");
        }
    }
}

fn validate_submission(user_id: &str, score: f64) -> Option<String> {
    if user_id.trim().is_empty() {
        return Some("missing user id".to_string());
    }
    if !score.is_finite() {
        return Some("score must be a finite number".to_string());
    }
    if score < 0.0 {
        return Some(format!("score must be non-negative, got {}", score));
    }
    None
}

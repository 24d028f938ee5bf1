use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use super::period::PoolType;

/// Ranked leaderboard row. Rank is assigned at query time, 1-based.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub user_id: String,
    pub score: f64,
    pub rank: u32,
}

/// Outcome of a score submission as recorded in the audit trail
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionStatus {
    Accepted,
    Rejected,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Accepted => "ACCEPTED",
            SubmissionStatus::Rejected => "REJECTED",
        }
    }
}

/// Durable audit row for every score submission, accepted or not
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScoreSubmissionLog {
    pub id: Uuid,
    pub user_id: String,
    pub score: f64,
    pub status: SubmissionStatus,
    pub rejection_reason: Option<String>,
    pub daily_period: String,
    pub weekly_period: String,
    pub metadata: serde_json::Value,
    pub submitted_at: DateTime<Utc>,
}

/// Final ranked entry of a closed period, persisted before the live set is cleared
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchivedEntry {
    pub user_id: String,
    pub score: f64,
    pub rank: u32,
    pub prize_amount: Decimal,
}

// ===== API DTOs =====

#[derive(Debug, Deserialize, Serialize, Clone, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitScoreRequest {
    #[validate(length(min = 1, max = 64))]
    pub user_id: String,
    pub score: f64,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitScoreResponse {
    pub user_id: String,
    pub score: f64,
    pub daily_period: String,
    pub weekly_period: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardResponse {
    pub period_type: PoolType,
    pub period_identifier: String,
    pub entries: Vec<LeaderboardEntry>,
}

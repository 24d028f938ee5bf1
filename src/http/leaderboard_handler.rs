use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;
use std::str::FromStr;
use validator::Validate;

use crate::api_error::ApiError;
use crate::http::AppState;
use crate::models::{LeaderboardResponse, PoolType, SubmitScoreRequest};

const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<usize>,
}

/// GET /api/leaderboard/{periodType}?limit=
/// Live ranking of the period in progress
pub async fn get_leaderboard(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<LeaderboardQuery>,
) -> Result<impl Responder, ApiError> {
    let period_type = PoolType::from_str(&path.into_inner()).map_err(ApiError::bad_request)?;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let (period_identifier, entries) = state
        .leaderboard_service
        .get_active_leaderboard(period_type, limit)
        .await?;

    Ok(HttpResponse::Ok().json(LeaderboardResponse {
        period_type,
        period_identifier,
        entries,
    }))
}

/// POST /api/scores
pub async fn submit_score(
    state: web::Data<AppState>,
    body: web::Json<SubmitScoreRequest>,
) -> Result<impl Responder, ApiError> {
    body.validate()?;
    let SubmitScoreRequest {
        user_id,
        score,
        metadata,
    } = body.into_inner();

    let response = state
        .leaderboard_service
        .submit_score(
            &user_id,
            score,
            metadata.unwrap_or_else(|| serde_json::json!({})),
        )
        .await?;
    Ok(HttpResponse::Created().json(response))
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/leaderboard/{period_type}", web::get().to(get_leaderboard))
        .route("/scores", web::post().to(submit_score));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_score_request_deserialization() {
        let json = r#"{"userId":"fid:42","score":1337.0,"metadata":{"taps":88}}"#;
        let req: SubmitScoreRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.user_id, "fid:42");
        assert_eq!(req.score, 1337.0);
        assert_eq!(req.metadata.unwrap()["taps"], 88);
    }

    #[test]
    fn test_submit_score_without_metadata() {
        let req: SubmitScoreRequest = serde_json::from_str(r#"{"userId":"fid:1","score":3}"#).unwrap();
        assert!(req.metadata.is_none());
        assert!(req.validate().is_ok());
    }
}

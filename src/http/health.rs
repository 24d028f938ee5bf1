use actix_web::{web, HttpResponse, Result};
use tracing::warn;

use crate::api_error::ApiError;
use crate::http::AppState;

pub async fn health_check(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    crate::db::health_check(&state.db_pool).await?;

    let mut conn = state.redis.clone();
    let pong: String = redis::cmd("PING")
        .query_async(&mut conn)
        .await
        .map_err(|e| {
            warn!(error = %e, "Redis health probe failed");
            ApiError::RedisError(e.to_string())
        })?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "database": "ok",
        "redis": if pong == "PONG" { "ok" } else { "degraded" }
    })))
}

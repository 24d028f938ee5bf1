use actix_web::{web, HttpRequest, HttpResponse, Responder};
use chrono::Utc;
use std::str::FromStr;
use tracing::{error, info};
use uuid::Uuid;
use validator::Validate;

use crate::api_error::ApiError;
use crate::http::AppState;
use crate::middleware::require_bearer;
use crate::models::{
    is_valid_period_id, CreateDistributionRequest, DistributionFilter, ListDistributionsQuery,
    PoolType, SettlementAccepted,
};

const DEFAULT_PAGE_SIZE: u32 = 20;

// =============================================================================
// SCHEDULED TRIGGER
// =============================================================================

/// POST /api/cron/settle/{periodType}
/// Settle and archive the previous period in the background
pub async fn trigger_scheduled_settlement(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> Result<impl Responder, ApiError> {
    require_bearer(&req, &state.cron_secret)?;
    let pool_type = PoolType::from_str(&path.into_inner()).map_err(ApiError::bad_request)?;
    let now = Utc::now();
    let period_identifier = pool_type.settlement_period(now);

    info!(pool_type = %pool_type, period = %period_identifier, "Scheduled settlement triggered");

    let service = state.settlement_service.clone();
    tokio::spawn(async move {
        if let Err(e) = service.run_scheduled_settlement(pool_type, now).await {
            error!(pool_type = %pool_type, error = %e, "Scheduled settlement failed");
        }
    });

    Ok(HttpResponse::Accepted().json(SettlementAccepted {
        pool_type,
        period_identifier,
        message: "Settlement started".to_string(),
    }))
}

// =============================================================================
// ADMIN: CREATE / RETRY
// =============================================================================

/// POST /api/admin/distributions
/// Start a settlement for an explicit period
pub async fn create_distribution(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreateDistributionRequest>,
) -> Result<impl Responder, ApiError> {
    require_bearer(&req, &state.admin_api_key)?;
    body.validate()?;

    let CreateDistributionRequest {
        pool_type,
        period_identifier,
    } = body.into_inner();
    if !is_valid_period_id(pool_type, &period_identifier) {
        return Err(ApiError::bad_request(format!(
            "Invalid {} period identifier: {}",
            pool_type, period_identifier
        )));
    }

    info!(pool_type = %pool_type, period = %period_identifier, "Manual distribution requested");

    let service = state.settlement_service.clone();
    let period = period_identifier.clone();
    tokio::spawn(async move {
        if let Err(e) = service.settle_prizes_for_period(pool_type, &period).await {
            error!(pool_type = %pool_type, period = %period, error = %e, "Manual distribution failed");
        }
    });

    Ok(HttpResponse::Accepted().json(SettlementAccepted {
        pool_type,
        period_identifier,
        message: "Settlement started".to_string(),
    }))
}

/// POST /api/admin/distributions/{id}/retry
/// Re-run a FAILED distribution
pub async fn retry_distribution(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> Result<impl Responder, ApiError> {
    require_bearer(&req, &state.admin_api_key)?;
    let summary_id = path.into_inner();

    let previous = state.settlement_service.retryable_summary(summary_id).await?;
    info!(summary_id = %summary_id, "Distribution retry requested");

    let service = state.settlement_service.clone();
    tokio::spawn(async move {
        if let Err(e) = service.retry_distribution(summary_id).await {
            error!(summary_id = %summary_id, error = %e, "Distribution retry failed");
        }
    });

    Ok(HttpResponse::Accepted().json(SettlementAccepted {
        pool_type: previous.pool_type,
        period_identifier: previous.period_identifier,
        message: format!("Retry of {} started", summary_id),
    }))
}

// =============================================================================
// ADMIN: QUERIES
// =============================================================================

/// GET /api/admin/distributions
pub async fn list_distributions(
    state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<ListDistributionsQuery>,
) -> Result<impl Responder, ApiError> {
    require_bearer(&req, &state.admin_api_key)?;
    query.validate()?;

    let filter = DistributionFilter {
        pool_type: query.pool_type,
        status: query.status,
    };
    let page = state
        .settlement_service
        .list_distributions(
            &filter,
            query.page.unwrap_or(1),
            query.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        )
        .await?;

    Ok(HttpResponse::Ok().json(page))
}

/// GET /api/admin/distributions/{id}
pub async fn get_distribution(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> Result<impl Responder, ApiError> {
    require_bearer(&req, &state.admin_api_key)?;
    let details = state
        .settlement_service
        .get_distribution(path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(details))
}

// =============================================================================
// ROUTE CONFIGURATION
// =============================================================================

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route(
        "/cron/settle/{period_type}",
        web::post().to(trigger_scheduled_settlement),
    )
    .service(
        web::scope("/admin/distributions")
            .route("", web::post().to(create_distribution))
            .route("", web::get().to(list_distributions))
            .route("/{id}", web::get().to(get_distribution))
            .route("/{id}/retry", web::post().to(retry_distribution)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DistributionStatus;

    #[test]
    fn test_create_distribution_request_deserialization() {
        let json = r#"{"poolType":"weekly","periodIdentifier":"2025-W10"}"#;
        let req: CreateDistributionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.pool_type, PoolType::Weekly);
        assert_eq!(req.period_identifier, "2025-W10");
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_list_query_deserialization() {
        let json = r#"{"poolType":"daily","status":"FAILED","page":2,"pageSize":50}"#;
        let query: ListDistributionsQuery = serde_json::from_str(json).unwrap();
        assert_eq!(query.pool_type, Some(PoolType::Daily));
        assert_eq!(query.status, Some(DistributionStatus::Failed));
        assert!(query.validate().is_ok());

        let oversized: ListDistributionsQuery =
            serde_json::from_str(r#"{"pageSize":500}"#).unwrap();
        assert!(oversized.validate().is_err());
    }
}

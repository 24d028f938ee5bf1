use actix_web::{web, HttpRequest, HttpResponse, Responder};
use std::str::FromStr;
use tracing::info;
use validator::Validate;

use crate::api_error::ApiError;
use crate::http::AppState;
use crate::middleware::require_bearer;
use crate::models::{AllocatePurchaseRequest, PoolType};

/// GET /api/pools/{poolType}
/// Base prize, accumulated contributions and their total
pub async fn get_pool_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<impl Responder, ApiError> {
    let pool_type = PoolType::from_str(&path.into_inner()).map_err(ApiError::bad_request)?;
    let status = state.prize_pool_service.get_pool_status(pool_type).await?;
    Ok(HttpResponse::Ok().json(status))
}

/// POST /api/purchases/allocate
/// Purchase-completion hook; splits revenue into the pools
pub async fn allocate_purchase(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<AllocatePurchaseRequest>,
) -> Result<impl Responder, ApiError> {
    require_bearer(&req, &state.admin_api_key)?;
    body.validate()?;

    info!(purchase_id = %body.purchase_id, total = %body.total_revenue, "Allocating purchase revenue");

    let split = state
        .prize_pool_service
        .allocate_purchase(&body.purchase_id, body.total_revenue)
        .await?;
    Ok(HttpResponse::Ok().json(split))
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/pools/{pool_type}", web::get().to(get_pool_status))
        .route("/purchases/allocate", web::post().to(allocate_purchase));
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_allocate_request_deserialization() {
        let json = r#"{"purchaseId":"pi_123","totalRevenue":"12.50"}"#;
        let req: AllocatePurchaseRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.purchase_id, "pi_123");
        assert_eq!(req.total_revenue, Decimal::new(1250, 2));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_empty_purchase_id_invalid() {
        let req = AllocatePurchaseRequest {
            purchase_id: String::new(),
            total_revenue: Decimal::ONE,
        };
        assert!(req.validate().is_err());
    }
}

pub mod health;
pub mod leaderboard_handler;
pub mod pool_handler;
pub mod settlement_handler;

use actix_web::web;
use redis::aio::ConnectionManager;

use crate::db::DbPool;
use crate::service::{LeaderboardService, PrizePoolService, SettlementService};

/// Shared handler state
pub struct AppState {
    pub settlement_service: SettlementService,
    pub prize_pool_service: PrizePoolService,
    pub leaderboard_service: LeaderboardService,
    pub db_pool: DbPool,
    pub redis: ConnectionManager,
    pub cron_secret: String,
    pub admin_api_key: String,
}

/// Mount every route under `/api`
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(health::health_check))
            .configure(settlement_handler::configure_routes)
            .configure(pool_handler::configure_routes)
            .configure(leaderboard_handler::configure_routes),
    );
}

use actix_web::{web, App, HttpServer};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

mod api_error;
mod config;
mod db;
mod http;
mod middleware;
mod models;
mod service;
mod telemetry;

use crate::config::Config;
use crate::db::{create_pool, run_migrations};
use crate::http::AppState;
use crate::middleware::cors_middleware;
use crate::service::{
    CustodyClient, CustodySettings, IdentityResolver, LeaderboardService, NeynarDirectory,
    PayoutExecutor, PgAuditStore, PrizePoolService, RedisLeaderboardStore, RedisPoolLedger,
    SettlementConfig, SettlementService,
};
use crate::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> io::Result<()> {
    // Load configuration
    let config = Config::from_env().expect("Failed to load configuration");

    // Initialize telemetry
    init_telemetry(&config.server.rust_log);

    // Create database pool and bring the schema up to date
    let db_pool = create_pool(&config)
        .await
        .expect("Failed to create database pool");
    run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    let redis_client =
        redis::Client::open(config.redis.url.clone()).expect("Invalid Redis URL");
    let redis = redis::aio::ConnectionManager::new(redis_client)
        .await
        .expect("Failed to connect to Redis");

    // Wire the settlement pipeline
    let audit = Arc::new(PgAuditStore::new(db_pool.clone()));
    let prize_pool_service = PrizePoolService::new(
        Arc::new(RedisPoolLedger::new(redis.clone())),
        audit.clone(),
        config.prizes.daily_base,
        config.prizes.weekly_base,
    );
    let leaderboard_service = LeaderboardService::new(
        Arc::new(RedisLeaderboardStore::new(redis.clone())),
        audit.clone(),
    );
    let resolver = Arc::new(IdentityResolver::new(
        Arc::new(NeynarDirectory::new(
            config.identity.api_url.clone(),
            config.identity.api_key.clone(),
        )),
        Duration::from_secs(config.identity.cache_ttl_secs),
    ));
    let executor = Arc::new(PayoutExecutor::new(Arc::new(CustodyClient::new(
        CustodySettings {
            api_url: config.custody.api_url.clone(),
            api_key: config.custody.api_key.clone(),
            source_wallet: config.custody.source_wallet.clone(),
            token_address: config.custody.token_address.clone(),
            chain: config.custody.chain.clone(),
        },
    ))));
    let settlement_service = SettlementService::new(
        prize_pool_service.clone(),
        leaderboard_service.clone(),
        resolver.clone(),
        executor,
        audit,
        SettlementConfig {
            token_decimals: config.custody.token_decimals,
            archive_depth: config.prizes.archive_depth,
        },
    );

    // Periodically drop expired wallet lookups
    let purge_resolver = resolver.clone();
    let purge_every = Duration::from_secs(config.identity.cache_ttl_secs.max(60));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(purge_every);
        loop {
            ticker.tick().await;
            let purged = purge_resolver.purge_expired().await;
            tracing::debug!(purged = purged, "Identity cache purged");
        }
    });

    let state = web::Data::new(AppState {
        settlement_service,
        prize_pool_service,
        leaderboard_service,
        db_pool,
        redis,
        cron_secret: config.auth.cron_secret.clone(),
        admin_api_key: config.auth.admin_api_key.clone(),
    });

    tracing::info!("Starting TapBlitz backend server on {}:{}", config.server.host, config.server.port);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(cors_middleware())
            .wrap(actix_web::middleware::Logger::default())
            .configure(crate::http::configure_routes)
    })
    .bind((config.server.host.clone(), config.server.port))?
    .run();

    // Graceful shutdown
    let server_handle = server.handle();
    tokio::spawn(async move {
        signal::ctrl_c().await.expect("Failed to listen for shutdown signal");
        tracing::info!("Shutdown signal received, stopping server...");
        server_handle.stop(true).await;
    });

    server.await
}

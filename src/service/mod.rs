// Service layer for the prize settlement pipeline
pub mod audit_store;
pub mod identity_service;
pub mod leaderboard_service;
pub mod payout_service;
pub mod prize_pool_service;
pub mod settlement_service;

#[cfg(test)]
pub(crate) mod testing;

pub use audit_store::PgAuditStore;
pub use identity_service::{IdentityResolver, NeynarDirectory};
pub use leaderboard_service::{LeaderboardService, RedisLeaderboardStore};
pub use payout_service::{CustodyClient, CustodySettings, PayoutExecutor};
pub use prize_pool_service::{PrizePoolService, RedisPoolLedger};
pub use settlement_service::{SettlementConfig, SettlementService};

//! Prize Pool Ledger
//!
//! Live pool values are kept in Redis as decimal strings, one key per pool
//! type. Contributions use `INCRBYFLOAT`; a settlement claim uses `GETSET key
//! 0`, which reads and zeroes the pool in one atomic step so two claims can
//! never both observe the same funds. A purchase is reserved with `SET NX`
//! before any pool is credited, so concurrent deliveries of the same
//! purchase credit the pools once.

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use super::audit_store::{AuditStore, StoreError};
use crate::api_error::ApiError;
use crate::models::{PoolStatus, PoolType, RevenueAllocationLog, RevenueSplit};

/// Lifetime of a purchase reservation; the allocation log is the durable record
const PURCHASE_RESERVATION_TTL_SECS: u64 = 7 * 24 * 60 * 60;

fn purchase_key(purchase_id: &str) -> String {
    format!("purchase:{}", purchase_id)
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Redis error: {0}")]
    RedisError(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Purchase already allocated: {0}")]
    DuplicatePurchase(String),

    #[error("Allocation log failed after pools were updated: {0}")]
    AuditWriteFailed(#[from] StoreError),
}

impl From<redis::RedisError> for LedgerError {
    fn from(err: redis::RedisError) -> Self {
        LedgerError::RedisError(err.to_string())
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::RedisError(e) => ApiError::RedisError(e),
            LedgerError::InvalidAmount(_) => ApiError::ValidationError(err.to_string()),
            LedgerError::DuplicatePurchase(_) => ApiError::Conflict(err.to_string()),
            LedgerError::AuditWriteFailed(e) => e.into(),
        }
    }
}

/// Storage primitive behind the ledger
#[async_trait]
pub trait PoolLedger: Send + Sync {
    /// Atomically add `amount` to the pool
    async fn increment(&self, pool_type: PoolType, amount: Decimal) -> Result<(), LedgerError>;

    /// Raw stored value, `None` when the key is absent
    async fn read(&self, pool_type: PoolType) -> Result<Option<String>, LedgerError>;

    /// Atomically replace the value with zero and return what was there
    async fn take(&self, pool_type: PoolType) -> Result<Option<String>, LedgerError>;

    /// Claim a purchase id for allocation. `false` when already claimed.
    async fn reserve_purchase(&self, purchase_id: &str) -> Result<bool, LedgerError>;

    /// Drop a reservation whose allocation credited nothing
    async fn release_purchase(&self, purchase_id: &str) -> Result<(), LedgerError>;
}

/// Redis implementation of [`PoolLedger`]
#[derive(Clone)]
pub struct RedisPoolLedger {
    redis: ConnectionManager,
}

impl RedisPoolLedger {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl PoolLedger for RedisPoolLedger {
    async fn increment(&self, pool_type: PoolType, amount: Decimal) -> Result<(), LedgerError> {
        let mut conn = self.redis.clone();
        let _: String = redis::cmd("INCRBYFLOAT")
            .arg(pool_type.pool_key())
            .arg(amount.to_string())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn read(&self, pool_type: PoolType) -> Result<Option<String>, LedgerError> {
        let mut conn = self.redis.clone();
        let value: Option<String> = conn.get(pool_type.pool_key()).await?;
        Ok(value)
    }

    async fn take(&self, pool_type: PoolType) -> Result<Option<String>, LedgerError> {
        let mut conn = self.redis.clone();
        let value: Option<String> = conn.getset(pool_type.pool_key(), "0").await?;
        Ok(value)
    }

    async fn reserve_purchase(&self, purchase_id: &str) -> Result<bool, LedgerError> {
        let mut conn = self.redis.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(purchase_key(purchase_id))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(PURCHASE_RESERVATION_TTL_SECS)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn release_purchase(&self, purchase_id: &str) -> Result<(), LedgerError> {
        let mut conn = self.redis.clone();
        let _: () = conn.del(purchase_key(purchase_id)).await?;
        Ok(())
    }
}

/// Parse a stored pool value, clamping anything negative or unparseable to zero
pub(crate) fn parse_pool_value(pool_type: PoolType, raw: Option<String>) -> Decimal {
    let Some(raw) = raw else {
        return Decimal::ZERO;
    };
    let parsed = Decimal::from_str(raw.trim())
        .or_else(|_| Decimal::from_scientific(raw.trim()));
    match parsed {
        Ok(value) if value >= Decimal::ZERO => value,
        Ok(value) => {
            warn!(pool_type = %pool_type, value = %value, "Negative pool value clamped to zero");
            Decimal::ZERO
        }
        Err(_) => {
            warn!(pool_type = %pool_type, raw = %raw, "Unreadable pool value clamped to zero");
            Decimal::ZERO
        }
    }
}

/// Service owning the prize pools and purchase revenue allocation
#[derive(Clone)]
pub struct PrizePoolService {
    ledger: Arc<dyn PoolLedger>,
    audit: Arc<dyn AuditStore>,
    daily_base: Decimal,
    weekly_base: Decimal,
}

impl PrizePoolService {
    pub fn new(
        ledger: Arc<dyn PoolLedger>,
        audit: Arc<dyn AuditStore>,
        daily_base: Decimal,
        weekly_base: Decimal,
    ) -> Self {
        Self {
            ledger,
            audit,
            daily_base,
            weekly_base,
        }
    }

    /// Add a contribution to a pool. Non-positive amounts are ignored.
    pub async fn add_to_pool(&self, pool_type: PoolType, amount: Decimal) -> Result<(), LedgerError> {
        if amount <= Decimal::ZERO {
            warn!(pool_type = %pool_type, amount = %amount, "Ignoring non-positive pool contribution");
            return Ok(());
        }

        self.ledger.increment(pool_type, amount).await.map_err(|e| {
            error!(pool_type = %pool_type, amount = %amount, error = %e, "Pool increment failed");
            e
        })?;

        info!(pool_type = %pool_type, amount = %amount, "Pool contribution added");
        Ok(())
    }

    /// Current pool value; an absent key reads as zero
    pub async fn get_pool_value(&self, pool_type: PoolType) -> Result<Decimal, LedgerError> {
        let raw = self.ledger.read(pool_type).await?;
        Ok(parse_pool_value(pool_type, raw))
    }

    /// Take the whole pool and reset it to zero.
    ///
    /// The returned value is the disbursable budget of one settlement attempt.
    pub async fn claim_pool(&self, pool_type: PoolType) -> Result<Decimal, LedgerError> {
        let raw = self.ledger.take(pool_type).await?;
        let claimed = parse_pool_value(pool_type, raw);
        info!(pool_type = %pool_type, claimed = %claimed, "Prize pool claimed and reset");
        Ok(claimed)
    }

    /// Base prize plus accumulated contributions
    pub async fn get_pool_status(&self, pool_type: PoolType) -> Result<PoolStatus, LedgerError> {
        let dynamic_bonus = self.get_pool_value(pool_type).await?;
        let base_amount = match pool_type {
            PoolType::Daily => self.daily_base,
            PoolType::Weekly => self.weekly_base,
        };
        Ok(PoolStatus {
            pool_type,
            base_amount,
            dynamic_bonus,
            total: base_amount + dynamic_bonus,
        })
    }

    /// Split a purchase with the fixed 9/21/70 policy and apply it
    pub async fn allocate_purchase(
        &self,
        purchase_id: &str,
        total_revenue: Decimal,
    ) -> Result<RevenueSplit, LedgerError> {
        if total_revenue <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(format!(
                "total revenue must be positive, got {}",
                total_revenue
            )));
        }
        let split = RevenueSplit::from_total(total_revenue);
        self.add_game_pass_revenue_to_pools(purchase_id, &split).await?;
        Ok(split)
    }

    /// Apply daily/weekly contributions, then durably log the full breakdown.
    ///
    /// The purchase id is reserved in the ledger before any credit. The
    /// treasury share is only logged. If the log write fails after the pools
    /// were credited the error is returned, the credit stays and the
    /// reservation keeps rejecting redeliveries.
    pub async fn add_game_pass_revenue_to_pools(
        &self,
        purchase_id: &str,
        split: &RevenueSplit,
    ) -> Result<(), LedgerError> {
        if self.audit.revenue_allocation_exists(purchase_id).await? {
            warn!(purchase_id = purchase_id, "Purchase revenue already allocated");
            return Err(LedgerError::DuplicatePurchase(purchase_id.to_string()));
        }
        if !self.ledger.reserve_purchase(purchase_id).await? {
            warn!(purchase_id = purchase_id, "Purchase allocation already in progress");
            return Err(LedgerError::DuplicatePurchase(purchase_id.to_string()));
        }

        let mut credited = false;
        for pool_type in PoolType::ALL {
            let contribution = split.contribution_for(pool_type);
            if contribution <= Decimal::ZERO {
                continue;
            }
            if let Err(e) = self.add_to_pool(pool_type, contribution).await {
                if !credited {
                    if let Err(release_err) = self.ledger.release_purchase(purchase_id).await {
                        error!(
                            purchase_id = purchase_id,
                            error = %release_err,
                            "Could not release purchase reservation"
                        );
                    }
                }
                return Err(e);
            }
            credited = true;
        }

        let row = RevenueAllocationLog {
            purchase_id: purchase_id.to_string(),
            total_revenue: split.total_revenue,
            daily_contribution: split.daily_contribution,
            weekly_contribution: split.weekly_contribution,
            treasury_share: split.treasury_share,
            allocated_at: Utc::now(),
        };

        if let Err(e) = self.audit.insert_revenue_allocation(&row).await {
            error!(
                purchase_id = purchase_id,
                error = %e,
                "Revenue allocation log failed; pools already credited"
            );
            return Err(LedgerError::AuditWriteFailed(e));
        }

        info!(
            purchase_id = purchase_id,
            total = %split.total_revenue,
            daily = %split.daily_contribution,
            weekly = %split.weekly_contribution,
            treasury = %split.treasury_share,
            "Purchase revenue allocated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::{MemoryAuditStore, MemoryPoolLedger};
    use tokio_test::{assert_err, assert_ok};

    fn create_test_service() -> (PrizePoolService, Arc<MemoryPoolLedger>, Arc<MemoryAuditStore>) {
        let ledger = Arc::new(MemoryPoolLedger::default());
        let audit = Arc::new(MemoryAuditStore::default());
        let service = PrizePoolService::new(
            ledger.clone(),
            audit.clone(),
            Decimal::from(50),
            Decimal::ZERO,
        );
        (service, ledger, audit)
    }

    #[tokio::test]
    async fn test_absent_pool_reads_zero() {
        let (service, _, _) = create_test_service();
        assert_eq!(service.get_pool_value(PoolType::Daily).await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_add_and_claim_resets_to_zero() {
        let (service, _, _) = create_test_service();
        assert_ok!(service.add_to_pool(PoolType::Daily, Decimal::from(30)).await);
        assert_ok!(service.add_to_pool(PoolType::Daily, Decimal::new(125, 1)).await);

        let claimed = service.claim_pool(PoolType::Daily).await.unwrap();
        assert_eq!(claimed, Decimal::new(425, 1));
        assert_eq!(service.get_pool_value(PoolType::Daily).await.unwrap(), Decimal::ZERO);
        assert_eq!(service.claim_pool(PoolType::Daily).await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_non_positive_contribution_is_noop() {
        let (service, ledger, _) = create_test_service();
        assert_ok!(service.add_to_pool(PoolType::Weekly, Decimal::ZERO).await);
        assert_ok!(service.add_to_pool(PoolType::Weekly, Decimal::from(-3)).await);
        assert_eq!(ledger.increments(), 0);
    }

    #[tokio::test]
    async fn test_negative_or_garbage_value_clamped() {
        let (service, ledger, _) = create_test_service();
        ledger.set_raw(PoolType::Daily, "-12.5");
        assert_eq!(service.get_pool_value(PoolType::Daily).await.unwrap(), Decimal::ZERO);
        ledger.set_raw(PoolType::Daily, "nan");
        assert_eq!(service.claim_pool(PoolType::Daily).await.unwrap(), Decimal::ZERO);
        ledger.set_raw(PoolType::Daily, "1.5e2");
        assert_eq!(service.get_pool_value(PoolType::Daily).await.unwrap(), Decimal::from(150));
    }

    #[tokio::test]
    async fn test_pool_status_includes_base() {
        let (service, _, _) = create_test_service();
        service.add_to_pool(PoolType::Daily, Decimal::from(7)).await.unwrap();
        let status = service.get_pool_status(PoolType::Daily).await.unwrap();
        assert_eq!(status.base_amount, Decimal::from(50));
        assert_eq!(status.dynamic_bonus, Decimal::from(7));
        assert_eq!(status.total, Decimal::from(57));
    }

    #[tokio::test]
    async fn test_purchase_allocation_credits_pools_and_logs() {
        let (service, _, audit) = create_test_service();
        let split = service
            .allocate_purchase("purchase-1", Decimal::from(100))
            .await
            .unwrap();

        assert_eq!(service.get_pool_value(PoolType::Daily).await.unwrap(), Decimal::from(9));
        assert_eq!(service.get_pool_value(PoolType::Weekly).await.unwrap(), Decimal::from(21));

        let logs = audit.revenue_logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].treasury_share, Decimal::from(70));
        assert_eq!(logs[0].treasury_share, split.treasury_share);
    }

    #[tokio::test]
    async fn test_duplicate_purchase_rejected_before_credit() {
        let (service, _, _) = create_test_service();
        service.allocate_purchase("p-dup", Decimal::from(10)).await.unwrap();
        let err = service.allocate_purchase("p-dup", Decimal::from(10)).await;
        assert!(matches!(err, Err(LedgerError::DuplicatePurchase(_))));
        assert_eq!(service.get_pool_value(PoolType::Daily).await.unwrap(), Decimal::new(90, 2));
    }

    #[tokio::test]
    async fn test_log_failure_surfaces_without_rollback() {
        let (service, _, audit) = create_test_service();
        audit.fail_writes(true);
        let result = service.allocate_purchase("p-2", Decimal::from(100)).await;
        assert!(matches!(result, Err(LedgerError::AuditWriteFailed(_))));
        // Pools were already credited
        assert_eq!(service.get_pool_value(PoolType::Weekly).await.unwrap(), Decimal::from(21));
    }

    #[tokio::test]
    async fn test_redelivery_after_log_failure_not_credited_twice() {
        let (service, ledger, audit) = create_test_service();
        audit.fail_writes(true);
        let first = service.allocate_purchase("p-4", Decimal::from(100)).await;
        assert!(matches!(first, Err(LedgerError::AuditWriteFailed(_))));

        audit.fail_writes(false);
        let second = service.allocate_purchase("p-4", Decimal::from(100)).await;
        assert!(matches!(second, Err(LedgerError::DuplicatePurchase(_))));
        assert_eq!(ledger.increments(), 2);
        assert_eq!(service.get_pool_value(PoolType::Weekly).await.unwrap(), Decimal::from(21));
    }

    #[tokio::test]
    async fn test_in_flight_purchase_rejected_before_credit() {
        let (service, ledger, audit) = create_test_service();
        // Another delivery of the same purchase holds the reservation
        assert!(ledger.reserve_purchase("p-5").await.unwrap());

        let result = service.allocate_purchase("p-5", Decimal::from(100)).await;
        assert!(matches!(result, Err(LedgerError::DuplicatePurchase(_))));
        assert_eq!(ledger.increments(), 0);
        assert!(audit.revenue_logs().is_empty());
    }

    #[tokio::test]
    async fn test_failed_credit_releases_reservation() {
        let (service, ledger, _) = create_test_service();
        ledger.fail_increments(true);
        let result = service.allocate_purchase("p-6", Decimal::from(100)).await;
        assert!(matches!(result, Err(LedgerError::RedisError(_))));

        ledger.fail_increments(false);
        assert_ok!(service.allocate_purchase("p-6", Decimal::from(100)).await);
        assert_eq!(service.get_pool_value(PoolType::Daily).await.unwrap(), Decimal::from(9));
    }

    #[tokio::test]
    async fn test_ledger_failure_propagates() {
        let (service, ledger, _) = create_test_service();
        ledger.fail(true);
        assert_err!(service.add_to_pool(PoolType::Daily, Decimal::ONE).await);
        assert_err!(service.claim_pool(PoolType::Daily).await);
    }

    #[tokio::test]
    async fn test_non_positive_revenue_rejected() {
        let (service, _, _) = create_test_service();
        let result = service.allocate_purchase("p-3", Decimal::ZERO).await;
        assert!(matches!(result, Err(LedgerError::InvalidAmount(_))));
    }
}

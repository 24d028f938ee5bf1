//! In-memory doubles for the service seams, test builds only.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use super::audit_store::{AuditStore, StoreError};
use super::identity_service::{IdentityError, WalletDirectory};
use super::leaderboard_service::{LeaderboardError, LeaderboardStore};
use super::payout_service::{PayoutError, TransferClient, TransferReceipt, TransferState};
use super::prize_pool_service::{LedgerError, PoolLedger};
use crate::models::{
    ArchivedEntry, DistributionFilter, DistributionSummary, PayoutStatus, PoolType,
    PrizePayoutLog, RevenueAllocationLog, ScoreSubmissionLog, SkippedPayoutLog,
};

// ==================== Pool ledger ====================

#[derive(Default)]
pub struct MemoryPoolLedger {
    values: Mutex<HashMap<PoolType, String>>,
    increments: AtomicUsize,
    takes: AtomicUsize,
    reserved: Mutex<HashSet<String>>,
    failing: AtomicBool,
    increments_failing: AtomicBool,
}

impl MemoryPoolLedger {
    pub fn set_raw(&self, pool_type: PoolType, raw: &str) {
        self.values.lock().unwrap().insert(pool_type, raw.to_string());
    }

    pub fn increments(&self) -> usize {
        self.increments.load(Ordering::SeqCst)
    }

    pub fn takes(&self) -> usize {
        self.takes.load(Ordering::SeqCst)
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Only pool increments error out
    pub fn fail_increments(&self, failing: bool) {
        self.increments_failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), LedgerError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(LedgerError::RedisError("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PoolLedger for MemoryPoolLedger {
    async fn increment(&self, pool_type: PoolType, amount: Decimal) -> Result<(), LedgerError> {
        self.check()?;
        if self.increments_failing.load(Ordering::SeqCst) {
            return Err(LedgerError::RedisError("OOM command not allowed".into()));
        }
        let mut values = self.values.lock().unwrap();
        let current = values
            .get(&pool_type)
            .and_then(|v| Decimal::from_str(v).ok())
            .unwrap_or(Decimal::ZERO);
        values.insert(pool_type, (current + amount).to_string());
        self.increments.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn read(&self, pool_type: PoolType) -> Result<Option<String>, LedgerError> {
        self.check()?;
        Ok(self.values.lock().unwrap().get(&pool_type).cloned())
    }

    async fn take(&self, pool_type: PoolType) -> Result<Option<String>, LedgerError> {
        self.check()?;
        self.takes.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .values
            .lock()
            .unwrap()
            .insert(pool_type, "0".to_string()))
    }

    async fn reserve_purchase(&self, purchase_id: &str) -> Result<bool, LedgerError> {
        self.check()?;
        Ok(self.reserved.lock().unwrap().insert(purchase_id.to_string()))
    }

    async fn release_purchase(&self, purchase_id: &str) -> Result<(), LedgerError> {
        self.check()?;
        self.reserved.lock().unwrap().remove(purchase_id);
        Ok(())
    }
}

// ==================== Leaderboard ====================

#[derive(Default)]
pub struct MemoryLeaderboardStore {
    boards: Mutex<HashMap<String, Vec<(String, f64)>>>,
    upserts: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryLeaderboardStore {
    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self, period_type: PoolType, period_identifier: &str) -> bool {
        self.boards
            .lock()
            .unwrap()
            .get(&period_type.leaderboard_key(period_identifier))
            .map_or(true, |b| b.is_empty())
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), LeaderboardError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(LeaderboardError::RedisError("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LeaderboardStore for MemoryLeaderboardStore {
    async fn upsert(
        &self,
        period_type: PoolType,
        period_identifier: &str,
        user_id: &str,
        score: f64,
    ) -> Result<(), LeaderboardError> {
        self.check()?;
        let mut boards = self.boards.lock().unwrap();
        let board = boards
            .entry(period_type.leaderboard_key(period_identifier))
            .or_default();
        match board.iter_mut().find(|(u, _)| u == user_id) {
            Some(entry) => entry.1 = score,
            None => board.push((user_id.to_string(), score)),
        }
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn top(
        &self,
        period_type: PoolType,
        period_identifier: &str,
        limit: usize,
    ) -> Result<Vec<(String, f64)>, LeaderboardError> {
        self.check()?;
        let mut board = self
            .boards
            .lock()
            .unwrap()
            .get(&period_type.leaderboard_key(period_identifier))
            .cloned()
            .unwrap_or_default();
        // Stable sort keeps insertion order among equal scores
        board.sort_by(|a, b| b.1.total_cmp(&a.1));
        board.truncate(limit);
        Ok(board)
    }

    async fn clear(&self, period_type: PoolType, period_identifier: &str) -> Result<(), LeaderboardError> {
        self.check()?;
        self.boards
            .lock()
            .unwrap()
            .remove(&period_type.leaderboard_key(period_identifier));
        Ok(())
    }
}

// ==================== Identity directory ====================

#[derive(Default)]
pub struct MemoryDirectory {
    addresses: Mutex<HashMap<String, Vec<String>>>,
    lookups: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryDirectory {
    pub fn set(&self, user_id: &str, addresses: Vec<String>) {
        self.addresses
            .lock()
            .unwrap()
            .insert(user_id.to_string(), addresses);
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl WalletDirectory for MemoryDirectory {
    async fn verified_addresses(&self, user_id: &str) -> Result<Vec<String>, IdentityError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(IdentityError::HttpStatus(503));
        }
        Ok(self
            .addresses
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }
}

// ==================== Transfers ====================

#[derive(Default)]
pub struct MemoryTransferClient {
    balance: Mutex<u128>,
    sent: Mutex<Vec<(String, u128)>>,
    failing_wallets: Mutex<HashSet<String>>,
    balance_failing: AtomicBool,
    transfers_failing: AtomicBool,
    counter: AtomicUsize,
}

impl MemoryTransferClient {
    pub fn with_balance(balance: u128) -> Self {
        Self {
            balance: Mutex::new(balance),
            ..Default::default()
        }
    }

    /// Custody rejects transfers to this wallet
    pub fn fail_wallet(&self, wallet: &str) {
        self.failing_wallets.lock().unwrap().insert(wallet.to_string());
    }

    pub fn recover_wallet(&self, wallet: &str) {
        self.failing_wallets.lock().unwrap().remove(wallet);
    }

    /// Balance lookups error out, failing whole batches
    pub fn fail_balance(&self, failing: bool) {
        self.balance_failing.store(failing, Ordering::SeqCst);
    }

    /// Every transfer request errors at transport level
    pub fn fail_transfers(&self, failing: bool) {
        self.transfers_failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(String, u128)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn balance_calls(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransferClient for MemoryTransferClient {
    async fn payer_balance(&self) -> Result<u128, PayoutError> {
        self.counter.fetch_add(1, Ordering::SeqCst);
        if self.balance_failing.load(Ordering::SeqCst) {
            return Err(PayoutError::CustodyError("network unreachable".into()));
        }
        Ok(*self.balance.lock().unwrap())
    }

    async fn transfer(
        &self,
        to: &str,
        amount: u128,
        _idempotency_key: &str,
    ) -> Result<TransferReceipt, PayoutError> {
        if self.transfers_failing.load(Ordering::SeqCst) {
            return Err(PayoutError::CustodyError("gateway timeout".into()));
        }
        if self.failing_wallets.lock().unwrap().contains(to) {
            return Ok(TransferReceipt {
                transaction_hash: None,
                status: TransferState::Failed,
                error: Some("execution reverted".into()),
            });
        }
        *self.balance.lock().unwrap() -= amount;
        let mut sent = self.sent.lock().unwrap();
        sent.push((to.to_string(), amount));
        Ok(TransferReceipt {
            transaction_hash: Some(format!("0xtx{:04}", sent.len())),
            status: TransferState::Confirmed,
            error: None,
        })
    }
}

// ==================== Audit store ====================

#[derive(Default)]
pub struct MemoryAuditStore {
    summaries: Mutex<Vec<DistributionSummary>>,
    payouts: Mutex<Vec<PrizePayoutLog>>,
    skipped: Mutex<Vec<SkippedPayoutLog>>,
    revenue: Mutex<Vec<RevenueAllocationLog>>,
    submissions: Mutex<Vec<ScoreSubmissionLog>>,
    archive: Mutex<Vec<(PoolType, String, ArchivedEntry)>>,
    writes_failing: AtomicBool,
}

impl MemoryAuditStore {
    pub fn fail_writes(&self, failing: bool) {
        self.writes_failing.store(failing, Ordering::SeqCst);
    }

    pub fn summaries(&self) -> Vec<DistributionSummary> {
        self.summaries.lock().unwrap().clone()
    }

    pub fn payouts(&self) -> Vec<PrizePayoutLog> {
        self.payouts.lock().unwrap().clone()
    }

    pub fn skipped(&self) -> Vec<SkippedPayoutLog> {
        self.skipped.lock().unwrap().clone()
    }

    pub fn revenue_logs(&self) -> Vec<RevenueAllocationLog> {
        self.revenue.lock().unwrap().clone()
    }

    pub fn submissions(&self) -> Vec<ScoreSubmissionLog> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn archived(&self, period_type: PoolType, period_identifier: &str) -> Vec<ArchivedEntry> {
        self.archive
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, p, _)| *t == period_type && p == period_identifier)
            .map(|(_, _, e)| e.clone())
            .collect()
    }

    /// Insert a summary directly, bypassing the active-period guard
    pub fn seed_summary(&self, summary: DistributionSummary) {
        self.summaries.lock().unwrap().push(summary);
    }

    fn check_write(&self) -> Result<(), StoreError> {
        if self.writes_failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("database is read-only".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn create_summary(&self, summary: &DistributionSummary) -> Result<(), StoreError> {
        self.check_write()?;
        let mut summaries = self.summaries.lock().unwrap();
        let clash = summaries.iter().any(|s| {
            s.pool_type == summary.pool_type
                && s.period_identifier == summary.period_identifier
                && s.status.blocks_new_attempt()
        });
        if clash && summary.status.blocks_new_attempt() {
            return Err(StoreError::Conflict(
                "duplicate key value violates unique constraint".into(),
            ));
        }
        summaries.push(summary.clone());
        Ok(())
    }

    async fn update_summary(&self, summary: &DistributionSummary) -> Result<(), StoreError> {
        self.check_write()?;
        let mut summaries = self.summaries.lock().unwrap();
        if let Some(existing) = summaries.iter_mut().find(|s| s.id == summary.id) {
            *existing = summary.clone();
        }
        Ok(())
    }

    async fn get_summary(&self, id: Uuid) -> Result<Option<DistributionSummary>, StoreError> {
        Ok(self
            .summaries
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == id)
            .cloned())
    }

    async fn summaries_for_period(
        &self,
        pool_type: PoolType,
        period_identifier: &str,
    ) -> Result<Vec<DistributionSummary>, StoreError> {
        Ok(self
            .summaries
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.pool_type == pool_type && s.period_identifier == period_identifier)
            .cloned()
            .collect())
    }

    async fn list_summaries(
        &self,
        filter: &DistributionFilter,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<DistributionSummary>, i64), StoreError> {
        let mut matching: Vec<_> = self
            .summaries
            .lock()
            .unwrap()
            .iter()
            .filter(|s| filter.pool_type.map_or(true, |p| s.pool_type == p))
            .filter(|s| filter.status.map_or(true, |st| s.status == st))
            .cloned()
            .collect();
        matching.reverse();
        let total = matching.len() as i64;
        let skip = (page.saturating_sub(1) * page_size) as usize;
        let items = matching
            .into_iter()
            .skip(skip)
            .take(page_size as usize)
            .collect();
        Ok((items, total))
    }

    async fn insert_payout_logs(&self, rows: &[PrizePayoutLog]) -> Result<(), StoreError> {
        self.check_write()?;
        self.payouts.lock().unwrap().extend_from_slice(rows);
        Ok(())
    }

    async fn payouts_for_summary(&self, summary_id: Uuid) -> Result<Vec<PrizePayoutLog>, StoreError> {
        Ok(self
            .payouts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.summary_id == summary_id)
            .cloned()
            .collect())
    }

    async fn successful_payouts_for_period(
        &self,
        pool_type: PoolType,
        period_identifier: &str,
    ) -> Result<Vec<PrizePayoutLog>, StoreError> {
        let summary_ids: HashSet<Uuid> = self
            .summaries
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.pool_type == pool_type && s.period_identifier == period_identifier)
            .map(|s| s.id)
            .collect();
        Ok(self
            .payouts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| summary_ids.contains(&p.summary_id) && p.status == PayoutStatus::Success)
            .cloned()
            .collect())
    }

    async fn insert_skipped_payouts(&self, rows: &[SkippedPayoutLog]) -> Result<(), StoreError> {
        self.check_write()?;
        self.skipped.lock().unwrap().extend_from_slice(rows);
        Ok(())
    }

    async fn skipped_for_summary(&self, summary_id: Uuid) -> Result<Vec<SkippedPayoutLog>, StoreError> {
        Ok(self
            .skipped
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.summary_id == summary_id)
            .cloned()
            .collect())
    }

    async fn revenue_allocation_exists(&self, purchase_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .revenue
            .lock()
            .unwrap()
            .iter()
            .any(|r| r.purchase_id == purchase_id))
    }

    async fn insert_revenue_allocation(&self, row: &RevenueAllocationLog) -> Result<(), StoreError> {
        self.check_write()?;
        self.revenue.lock().unwrap().push(row.clone());
        Ok(())
    }

    async fn insert_score_submission(&self, row: &ScoreSubmissionLog) -> Result<(), StoreError> {
        self.check_write()?;
        self.submissions.lock().unwrap().push(row.clone());
        Ok(())
    }

    async fn insert_leaderboard_archive(
        &self,
        period_type: PoolType,
        period_identifier: &str,
        entries: &[ArchivedEntry],
    ) -> Result<(), StoreError> {
        self.check_write()?;
        let mut archive = self.archive.lock().unwrap();
        for entry in entries {
            archive.push((period_type, period_identifier.to_string(), entry.clone()));
        }
        Ok(())
    }
}

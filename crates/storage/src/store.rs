//! The ledger persistence seam.
//!
//! Every write is idempotent, so the at-least-once ingestor achieves
//! exactly-once effects. The trait exists so the engine can run against the
//! in-memory implementation in tests; production uses [`PgLedger`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use accrue_core::AppError;

use crate::models::{
    BalanceChange, ChangeKind, NewBalanceChange, NewCalculationLog, UserBalance, UserPoints,
};
use crate::repos;

/// Outcome of [`LedgerStore::record_change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The journal row was inserted and the balance moved.
    Recorded,
    /// An identical (tx, address, direction) row already existed; nothing was
    /// written.
    Duplicate,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get_or_create_balance(
        &self,
        user_address: &str,
        chain_id: i64,
    ) -> Result<UserBalance, AppError>;

    async fn balance_change_exists(
        &self,
        tx_hash: &str,
        user_address: &str,
        kind: ChangeKind,
    ) -> Result<bool, AppError>;

    /// Journal insert + balance upsert + lazy points-row creation, all in one
    /// unit of work.
    async fn record_change(&self, change: &NewBalanceChange) -> Result<Applied, AppError>;

    async fn changes_in_range(
        &self,
        user_address: Option<&str>,
        chain_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BalanceChange>, AppError>;

    async fn mark_changes_processed(
        &self,
        user_address: &str,
        chain_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<(), AppError>;

    async fn cursor(&self, chain_id: i64) -> Result<u64, AppError>;

    async fn advance_cursor(&self, chain_id: i64, block_number: u64) -> Result<(), AppError>;

    async fn get_or_create_points(
        &self,
        user_address: &str,
        chain_id: i64,
        default_last_calculated_at: DateTime<Utc>,
    ) -> Result<UserPoints, AppError>;

    async fn add_points(
        &self,
        user_address: &str,
        chain_id: i64,
        points: f64,
        calculated_at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    async fn insert_calc_log(&self, log: &NewCalculationLog) -> Result<(), AppError>;

    async fn addresses_needing_calculation(
        &self,
        chain_id: i64,
        before: DateTime<Utc>,
    ) -> Result<Vec<(String, DateTime<Utc>)>, AppError>;
}

fn store_err(e: sqlx::Error) -> AppError {
    AppError::Store(e.to_string())
}

/// PostgreSQL-backed ledger store.
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn get_or_create_balance(
        &self,
        user_address: &str,
        chain_id: i64,
    ) -> Result<UserBalance, AppError> {
        repos::get_or_create_balance(&self.pool, user_address, chain_id)
            .await
            .map_err(store_err)
    }

    async fn balance_change_exists(
        &self,
        tx_hash: &str,
        user_address: &str,
        kind: ChangeKind,
    ) -> Result<bool, AppError> {
        repos::balance_change_exists(&self.pool, tx_hash, user_address, kind.as_str())
            .await
            .map_err(store_err)
    }

    async fn record_change(&self, change: &NewBalanceChange) -> Result<Applied, AppError> {
        let recorded = repos::record_change(&self.pool, change)
            .await
            .map_err(store_err)?;
        Ok(if recorded {
            Applied::Recorded
        } else {
            Applied::Duplicate
        })
    }

    async fn changes_in_range(
        &self,
        user_address: Option<&str>,
        chain_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BalanceChange>, AppError> {
        repos::changes_in_range(&self.pool, user_address, chain_id, from, to)
            .await
            .map_err(store_err)
    }

    async fn mark_changes_processed(
        &self,
        user_address: &str,
        chain_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<(), AppError> {
        repos::mark_changes_processed(&self.pool, user_address, chain_id, from, to)
            .await
            .map_err(store_err)
    }

    async fn cursor(&self, chain_id: i64) -> Result<u64, AppError> {
        let status = repos::get_or_create_sync_status(&self.pool, chain_id)
            .await
            .map_err(store_err)?;
        Ok(status.last_synced_block.max(0) as u64)
    }

    async fn advance_cursor(&self, chain_id: i64, block_number: u64) -> Result<(), AppError> {
        repos::advance_cursor(&self.pool, chain_id, block_number as i64)
            .await
            .map_err(store_err)
    }

    async fn get_or_create_points(
        &self,
        user_address: &str,
        chain_id: i64,
        default_last_calculated_at: DateTime<Utc>,
    ) -> Result<UserPoints, AppError> {
        repos::get_or_create_points(&self.pool, user_address, chain_id, default_last_calculated_at)
            .await
            .map_err(store_err)
    }

    async fn add_points(
        &self,
        user_address: &str,
        chain_id: i64,
        points: f64,
        calculated_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        repos::add_points(&self.pool, user_address, chain_id, points, calculated_at)
            .await
            .map_err(store_err)
    }

    async fn insert_calc_log(&self, log: &NewCalculationLog) -> Result<(), AppError> {
        repos::insert_calc_log(&self.pool, log).await.map_err(store_err)
    }

    async fn addresses_needing_calculation(
        &self,
        chain_id: i64,
        before: DateTime<Utc>,
    ) -> Result<Vec<(String, DateTime<Utc>)>, AppError> {
        repos::addresses_needing_calculation(&self.pool, chain_id, before)
            .await
            .map_err(store_err)
    }
}

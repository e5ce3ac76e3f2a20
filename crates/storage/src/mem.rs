//! In-memory [`LedgerStore`] with the same idempotence guarantees as the
//! PostgreSQL implementation. Used by engine tests and local experiments.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use accrue_core::AppError;

use crate::models::{
    BalanceChange, BlockSyncStatus, ChangeKind, NewBalanceChange, NewCalculationLog,
    PointsCalculationLog, UserBalance, UserPoints,
};
use crate::store::{Applied, LedgerStore};

#[derive(Default)]
struct Inner {
    balances: HashMap<(String, i64), UserBalance>,
    changes: Vec<BalanceChange>,
    points: HashMap<(String, i64), UserPoints>,
    cursors: HashMap<i64, BlockSyncStatus>,
    calc_logs: Vec<PointsCalculationLog>,
    next_id: i64,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn balance_entry(&mut self, user_address: &str, chain_id: i64) -> &mut UserBalance {
        let key = (user_address.to_string(), chain_id);
        if !self.balances.contains_key(&key) {
            let id = self.next_id();
            let now = Utc::now();
            self.balances.insert(
                key.clone(),
                UserBalance {
                    id,
                    user_address: user_address.to_string(),
                    chain_id,
                    balance: "0".to_string(),
                    created_at: now,
                    updated_at: now,
                },
            );
        }
        self.balances.get_mut(&key).expect("entry just ensured")
    }

    fn ensure_points(&mut self, user_address: &str, chain_id: i64, last: DateTime<Utc>) {
        if !self
            .points
            .contains_key(&(user_address.to_string(), chain_id))
        {
            let id = self.next_id();
            let now = Utc::now();
            self.points.insert(
                (user_address.to_string(), chain_id),
                UserPoints {
                    id,
                    user_address: user_address.to_string(),
                    chain_id,
                    total_points: 0.0,
                    last_calculated_at: last,
                    created_at: now,
                    updated_at: now,
                },
            );
        }
    }
}

#[derive(Default)]
pub struct MemLedger {
    inner: Mutex<Inner>,
}

impl MemLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every journal row, insertion-ordered.
    pub fn changes(&self) -> Vec<BalanceChange> {
        self.inner.lock().unwrap().changes.clone()
    }

    /// Snapshot of every calculation-log row, insertion-ordered.
    pub fn calc_logs(&self) -> Vec<PointsCalculationLog> {
        self.inner.lock().unwrap().calc_logs.clone()
    }

    /// Snapshot of one holder's points row, if present.
    pub fn points(&self, user_address: &str, chain_id: i64) -> Option<UserPoints> {
        self.inner
            .lock()
            .unwrap()
            .points
            .get(&(user_address.to_string(), chain_id))
            .cloned()
    }

    /// Snapshot of one holder's balance row, if present.
    pub fn balance(&self, user_address: &str, chain_id: i64) -> Option<UserBalance> {
        self.inner
            .lock()
            .unwrap()
            .balances
            .get(&(user_address.to_string(), chain_id))
            .cloned()
    }
}

#[async_trait]
impl LedgerStore for MemLedger {
    async fn get_or_create_balance(
        &self,
        user_address: &str,
        chain_id: i64,
    ) -> Result<UserBalance, AppError> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.balance_entry(user_address, chain_id).clone())
    }

    async fn balance_change_exists(
        &self,
        tx_hash: &str,
        user_address: &str,
        kind: ChangeKind,
    ) -> Result<bool, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.changes.iter().any(|c| {
            c.tx_hash == tx_hash && c.user_address == user_address && c.change_type == kind.as_str()
        }))
    }

    async fn record_change(&self, change: &NewBalanceChange) -> Result<Applied, AppError> {
        let mut inner = self.inner.lock().unwrap();

        let duplicate = inner.changes.iter().any(|c| {
            c.tx_hash == change.tx_hash
                && c.user_address == change.user_address
                && c.change_type == change.kind.as_str()
        });
        if duplicate {
            return Ok(Applied::Duplicate);
        }

        let id = inner.next_id();
        let now = Utc::now();
        inner.changes.push(BalanceChange {
            id,
            user_address: change.user_address.clone(),
            chain_id: change.chain_id,
            tx_hash: change.tx_hash.clone(),
            block_number: change.block_number,
            log_index: change.log_index,
            balance_before: change.balance_before.clone(),
            balance_after: change.balance_after.clone(),
            change_amount: change.change_amount.clone(),
            change_type: change.kind.as_str().to_string(),
            timestamp: change.timestamp,
            processed: false,
            created_at: now,
        });

        let entry = inner.balance_entry(&change.user_address, change.chain_id);
        entry.balance = change.balance_after.clone();
        entry.updated_at = now;

        inner.ensure_points(&change.user_address, change.chain_id, change.timestamp);
        Ok(Applied::Recorded)
    }

    async fn changes_in_range(
        &self,
        user_address: Option<&str>,
        chain_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BalanceChange>, AppError> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<BalanceChange> = inner
            .changes
            .iter()
            .filter(|c| {
                c.chain_id == chain_id
                    && c.timestamp >= from
                    && c.timestamp < to
                    && user_address.map_or(true, |a| c.user_address == a)
            })
            .cloned()
            .collect();
        rows.sort_by_key(|c| (c.timestamp, c.block_number, c.log_index));
        Ok(rows)
    }

    async fn mark_changes_processed(
        &self,
        user_address: &str,
        chain_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        for change in inner.changes.iter_mut() {
            if change.user_address == user_address
                && change.chain_id == chain_id
                && change.timestamp >= from
                && change.timestamp < to
            {
                change.processed = true;
            }
        }
        Ok(())
    }

    async fn cursor(&self, chain_id: i64) -> Result<u64, AppError> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id();
        let status = inner.cursors.entry(chain_id).or_insert_with(|| {
            let now = Utc::now();
            BlockSyncStatus {
                id,
                chain_id,
                last_synced_block: 0,
                last_synced_at: now,
                created_at: now,
                updated_at: now,
            }
        });
        Ok(status.last_synced_block.max(0) as u64)
    }

    async fn advance_cursor(&self, chain_id: i64, block_number: u64) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id();
        let now = Utc::now();
        let status = inner.cursors.entry(chain_id).or_insert_with(|| BlockSyncStatus {
            id,
            chain_id,
            last_synced_block: 0,
            last_synced_at: now,
            created_at: now,
            updated_at: now,
        });
        status.last_synced_block = status.last_synced_block.max(block_number as i64);
        status.last_synced_at = now;
        status.updated_at = now;
        Ok(())
    }

    async fn get_or_create_points(
        &self,
        user_address: &str,
        chain_id: i64,
        default_last_calculated_at: DateTime<Utc>,
    ) -> Result<UserPoints, AppError> {
        let mut inner = self.inner.lock().unwrap();
        inner.ensure_points(user_address, chain_id, default_last_calculated_at);
        Ok(inner.points[&(user_address.to_string(), chain_id)].clone())
    }

    async fn add_points(
        &self,
        user_address: &str,
        chain_id: i64,
        points: f64,
        calculated_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        inner.ensure_points(user_address, chain_id, calculated_at);
        let entry = inner
            .points
            .get_mut(&(user_address.to_string(), chain_id))
            .expect("points row just ensured");
        entry.total_points += points;
        entry.last_calculated_at = calculated_at;
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_calc_log(&self, log: &NewCalculationLog) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id();
        inner.calc_logs.push(PointsCalculationLog {
            id,
            user_address: log.user_address.clone(),
            chain_id: log.chain_id,
            calculation_time: log.calculation_time,
            start_time: log.start_time,
            end_time: log.end_time,
            points_earned: log.points_earned,
            average_balance: log.average_balance.clone(),
            holding_hours: log.holding_hours,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn addresses_needing_calculation(
        &self,
        chain_id: i64,
        before: DateTime<Utc>,
    ) -> Result<Vec<(String, DateTime<Utc>)>, AppError> {
        let inner = self.inner.lock().unwrap();
        let mut due: Vec<(String, DateTime<Utc>)> = inner
            .points
            .values()
            .filter(|p| p.chain_id == chain_id && p.last_calculated_at < before)
            .map(|p| (p.user_address.clone(), p.last_calculated_at))
            .collect();
        due.sort();
        Ok(due)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn change(tx: &str, kind: ChangeKind, before: &str, after: &str) -> NewBalanceChange {
        NewBalanceChange {
            user_address: "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".into(),
            chain_id: 1,
            tx_hash: tx.into(),
            block_number: 10,
            log_index: 0,
            balance_before: before.into(),
            balance_after: after.into(),
            change_amount: "100".into(),
            kind,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn record_change_is_idempotent() {
        let store = MemLedger::new();
        let row = change("0x01", ChangeKind::Mint, "0", "100");
        assert_eq!(store.record_change(&row).await.unwrap(), Applied::Recorded);
        assert_eq!(store.record_change(&row).await.unwrap(), Applied::Duplicate);
        assert_eq!(store.changes().len(), 1);
        assert_eq!(store.balance(&row.user_address, 1).unwrap().balance, "100");
    }

    #[tokio::test]
    async fn same_tx_different_direction_is_not_a_duplicate() {
        let store = MemLedger::new();
        let out = change("0x01", ChangeKind::TransferOut, "100", "0");
        let inn = change("0x01", ChangeKind::TransferIn, "0", "100");
        assert_eq!(store.record_change(&out).await.unwrap(), Applied::Recorded);
        assert_eq!(store.record_change(&inn).await.unwrap(), Applied::Recorded);
        assert_eq!(store.changes().len(), 2);
    }

    #[tokio::test]
    async fn cursor_is_monotonic() {
        let store = MemLedger::new();
        assert_eq!(store.cursor(1).await.unwrap(), 0);
        store.advance_cursor(1, 50).await.unwrap();
        store.advance_cursor(1, 30).await.unwrap();
        assert_eq!(store.cursor(1).await.unwrap(), 50);
    }

    #[tokio::test]
    async fn recording_creates_the_points_row() {
        let store = MemLedger::new();
        let row = change("0x01", ChangeKind::Mint, "0", "100");
        store.record_change(&row).await.unwrap();
        let points = store.points(&row.user_address, 1).expect("points row");
        assert_eq!(points.total_points, 0.0);
        assert_eq!(points.last_calculated_at, row.timestamp);

        let due = store
            .addresses_needing_calculation(1, row.timestamp + chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].0, row.user_address);
    }
}

//! Time-weighted loyalty points.
//!
//! For an interval `[start, end)` the engine partitions the holder's journal
//! into balance-constant segments and earns, per segment,
//! `(balance / 10^18) × 0.05 × hours`. The time-weighted average balance is
//! computed by integer weighting (balance × seconds summed in U256) with a
//! single floor division at the end, so precision loss stays in the final
//! scaling step.
//!
//! The engine is deterministic over the journal: re-running the same interval
//! yields the same result. Non-duplication of the accumulator is the driver's
//! job — it only settles intervals that start at the holder's
//! `last_calculated_at` and advances that watermark whether or not points
//! were produced.

use std::sync::Arc;

use alloy::primitives::U256;
use chrono::{DateTime, Utc};
use tracing::{error, info};

use accrue_core::AppError;
use accrue_storage::models::NewCalculationLog;
use accrue_storage::store::LedgerStore;

/// Points per whole token per hour of holding.
pub const POINTS_RATE_PER_TOKEN_HOUR: f64 = 0.05;

/// Base units per whole token (18-decimal tokens).
const BASE_UNITS_PER_TOKEN: f64 = 1e18;

const SECS_PER_HOUR: f64 = 3600.0;

/// Result of settling one interval that produced points.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalPoints {
    pub points_earned: f64,
    /// Time-weighted average balance in base units, floored.
    pub average_balance: U256,
    /// Interval length in hours.
    pub holding_hours: f64,
}

#[derive(Clone)]
pub struct PointsEngine {
    store: Arc<dyn LedgerStore>,
}

impl PointsEngine {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Compute the points a holder earned over `[start, end)`.
    ///
    /// Read-only and deterministic. Returns `None` for an empty interval or
    /// when no points accrued (zero balance throughout).
    pub async fn calculate(
        &self,
        user_address: &str,
        chain_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<IntervalPoints>, AppError> {
        if start >= end {
            return Ok(None);
        }
        let total_secs = (end - start).num_seconds();
        if total_secs <= 0 {
            return Ok(None);
        }

        let changes = self
            .store
            .changes_in_range(Some(user_address), chain_id, start, end)
            .await?;

        // Opening balance: the first in-interval row knows what the balance
        // was before it; with no rows the balance has been constant at its
        // current value since before the interval.
        let opening = match changes.first() {
            Some(first) => first.balance_before_u256()?,
            None => self
                .store
                .get_or_create_balance(user_address, chain_id)
                .await?
                .balance_u256()?,
        };

        let mut points = 0.0f64;
        let mut weighted = U256::ZERO;
        let mut segment_start = start;
        let mut balance = opening;

        for change in &changes {
            if change.timestamp > segment_start {
                let secs = (change.timestamp - segment_start).num_seconds();
                points += segment_points(balance, secs);
                weighted = weighted.saturating_add(
                    balance.saturating_mul(U256::from(secs.max(0) as u64)),
                );
            }
            segment_start = change.timestamp;
            balance = change.balance_after_u256()?;
        }

        if end > segment_start {
            let secs = (end - segment_start).num_seconds();
            points += segment_points(balance, secs);
            weighted = weighted
                .saturating_add(balance.saturating_mul(U256::from(secs.max(0) as u64)));
        }

        if points <= 0.0 {
            return Ok(None);
        }

        Ok(Some(IntervalPoints {
            points_earned: points,
            average_balance: weighted / U256::from(total_secs as u64),
            holding_hours: total_secs as f64 / SECS_PER_HOUR,
        }))
    }

    /// Settle `[start, end)` for one holder: append the audit row, add the
    /// points and advance `last_calculated_at` to `end`. A zero-point
    /// interval advances the watermark without an audit row or increment.
    pub async fn settle(
        &self,
        user_address: &str,
        chain_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), AppError> {
        if start >= end {
            return Ok(());
        }

        match self.calculate(user_address, chain_id, start, end).await? {
            Some(outcome) => {
                info!(
                    user = %user_address,
                    chain_id,
                    points = outcome.points_earned,
                    average_balance = %outcome.average_balance,
                    holding_hours = outcome.holding_hours,
                    %start,
                    %end,
                    "points earned"
                );
                self.store
                    .insert_calc_log(&NewCalculationLog {
                        user_address: user_address.to_string(),
                        chain_id,
                        calculation_time: Utc::now(),
                        start_time: start,
                        end_time: end,
                        points_earned: outcome.points_earned,
                        average_balance: outcome.average_balance.to_string(),
                        holding_hours: outcome.holding_hours,
                    })
                    .await?;
                self.store
                    .add_points(user_address, chain_id, outcome.points_earned, end)
                    .await?;
                self.store
                    .mark_changes_processed(user_address, chain_id, start, end)
                    .await?;
            }
            None => {
                self.store.add_points(user_address, chain_id, 0.0, end).await?;
            }
        }
        Ok(())
    }

    /// One driver tick: settle `[last_calculated_at, tick_end)` for every
    /// holder lagging behind `tick_end`, per chain. Per-holder failures are
    /// logged and do not stop the tick.
    pub async fn run_tick(
        &self,
        chain_ids: &[i64],
        tick_end: DateTime<Utc>,
    ) -> Result<(), AppError> {
        for &chain_id in chain_ids {
            let due = self
                .store
                .addresses_needing_calculation(chain_id, tick_end)
                .await?;
            if due.is_empty() {
                continue;
            }
            info!(chain_id, holders = due.len(), %tick_end, "calculating points");
            for (user_address, last_calculated_at) in due {
                if let Err(e) = self
                    .settle(&user_address, chain_id, last_calculated_at, tick_end)
                    .await
                {
                    error!(user = %user_address, chain_id, error = %e, "points settlement failed");
                }
            }
        }
        Ok(())
    }

    /// Settle a historical span by running the driver over 1-hour windows
    /// aligned to `from`. Window slicing bounds drift and lets a partial
    /// failure resume at the next window.
    pub async fn backfill(
        &self,
        chain_ids: &[i64],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<(), AppError> {
        info!(%from, %to, "starting points backfill");
        let mut window_end = from;
        while window_end < to {
            window_end = (window_end + chrono::Duration::hours(1)).min(to);
            self.run_tick(chain_ids, window_end).await?;
        }
        info!(%from, %to, "points backfill complete");
        Ok(())
    }
}

fn segment_points(balance: U256, secs: i64) -> f64 {
    if secs <= 0 || balance.is_zero() {
        return 0.0;
    }
    let tokens = u256_to_f64(balance) / BASE_UNITS_PER_TOKEN;
    tokens * POINTS_RATE_PER_TOKEN_HOUR * (secs as f64 / SECS_PER_HOUR)
}

// Decimal-string parse of a non-negative integer cannot fail; the fallback
// only guards the f64 overflow range far beyond any token supply.
fn u256_to_f64(value: U256) -> f64 {
    value.to_string().parse().unwrap_or(f64::MAX)
}

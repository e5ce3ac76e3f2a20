use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::*;

// ─── Balance Queries ────────────────────────────────────────────────────────

/// Fetch the balance row for (address, chain), creating it at zero on first
/// reference.
pub async fn get_or_create_balance(
    pool: &PgPool,
    user_address: &str,
    chain_id: i64,
) -> Result<UserBalance, sqlx::Error> {
    sqlx::query_as::<_, UserBalance>(
        r#"
        INSERT INTO user_balances (user_address, chain_id, balance)
        VALUES ($1, $2, '0')
        ON CONFLICT (user_address, chain_id) DO UPDATE SET user_address = EXCLUDED.user_address
        RETURNING *
        "#,
    )
    .bind(user_address)
    .bind(chain_id)
    .fetch_one(pool)
    .await
}

// ─── Journal Queries ────────────────────────────────────────────────────────

/// Whether a journal row already exists for this (transaction, address,
/// direction) — the duplicate guard of the balance applier.
pub async fn balance_change_exists(
    pool: &PgPool,
    tx_hash: &str,
    user_address: &str,
    change_type: &str,
) -> Result<bool, sqlx::Error> {
    let row: (bool,) = sqlx::query_as(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM balance_changes
            WHERE tx_hash = $1 AND user_address = $2 AND change_type = $3
        )
        "#,
    )
    .bind(tx_hash)
    .bind(user_address)
    .bind(change_type)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

/// Insert a journal row and move the balance to its new value in a single
/// transaction. Also creates the address's points row on first contact so the
/// periodic driver can find it.
///
/// Returns false without side effects when the row already exists — replayed
/// deliveries commit nothing.
pub async fn record_change(pool: &PgPool, change: &NewBalanceChange) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO balance_changes
            (user_address, chain_id, tx_hash, block_number, log_index,
             balance_before, balance_after, change_amount, change_type, timestamp, processed)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, FALSE)
        ON CONFLICT (tx_hash, user_address, change_type) DO NOTHING
        "#,
    )
    .bind(&change.user_address)
    .bind(change.chain_id)
    .bind(&change.tx_hash)
    .bind(change.block_number)
    .bind(change.log_index)
    .bind(&change.balance_before)
    .bind(&change.balance_after)
    .bind(&change.change_amount)
    .bind(change.kind.as_str())
    .bind(change.timestamp)
    .execute(&mut *tx)
    .await?;

    if inserted.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    sqlx::query(
        r#"
        INSERT INTO user_balances (user_address, chain_id, balance, updated_at)
        VALUES ($1, $2, $3, now())
        ON CONFLICT (user_address, chain_id) DO UPDATE
        SET balance = EXCLUDED.balance, updated_at = now()
        "#,
    )
    .bind(&change.user_address)
    .bind(change.chain_id)
    .bind(&change.balance_after)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO user_points (user_address, chain_id, total_points, last_calculated_at)
        VALUES ($1, $2, 0, $3)
        ON CONFLICT (user_address, chain_id) DO NOTHING
        "#,
    )
    .bind(&change.user_address)
    .bind(change.chain_id)
    .bind(change.timestamp)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(true)
}

/// Journal rows with `timestamp ∈ [from, to)`, oldest first. Pass an address
/// to restrict to one holder; `None` returns the whole chain's activity.
pub async fn changes_in_range(
    pool: &PgPool,
    user_address: Option<&str>,
    chain_id: i64,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<BalanceChange>, sqlx::Error> {
    match user_address {
        Some(address) => {
            sqlx::query_as::<_, BalanceChange>(
                r#"
                SELECT * FROM balance_changes
                WHERE user_address = $1 AND chain_id = $2 AND timestamp >= $3 AND timestamp < $4
                ORDER BY timestamp ASC, block_number ASC, log_index ASC
                "#,
            )
            .bind(address)
            .bind(chain_id)
            .bind(from)
            .bind(to)
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query_as::<_, BalanceChange>(
                r#"
                SELECT * FROM balance_changes
                WHERE chain_id = $1 AND timestamp >= $2 AND timestamp < $3
                ORDER BY timestamp ASC, block_number ASC, log_index ASC
                "#,
            )
            .bind(chain_id)
            .bind(from)
            .bind(to)
            .fetch_all(pool)
            .await
        }
    }
}

/// Flip `processed` for a holder's rows inside `[from, to)`.
pub async fn mark_changes_processed(
    pool: &PgPool,
    user_address: &str,
    chain_id: i64,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE balance_changes SET processed = TRUE
        WHERE user_address = $1 AND chain_id = $2 AND timestamp >= $3 AND timestamp < $4
        "#,
    )
    .bind(user_address)
    .bind(chain_id)
    .bind(from)
    .bind(to)
    .execute(pool)
    .await?;
    Ok(())
}

// ─── Sync Cursor ────────────────────────────────────────────────────────────

/// Fetch the sync cursor for a chain, creating it at block 0 on first
/// reference.
pub async fn get_or_create_sync_status(
    pool: &PgPool,
    chain_id: i64,
) -> Result<BlockSyncStatus, sqlx::Error> {
    sqlx::query_as::<_, BlockSyncStatus>(
        r#"
        INSERT INTO block_sync_status (chain_id, last_synced_block)
        VALUES ($1, 0)
        ON CONFLICT (chain_id) DO UPDATE SET chain_id = EXCLUDED.chain_id
        RETURNING *
        "#,
    )
    .bind(chain_id)
    .fetch_one(pool)
    .await
}

/// Advance the cursor. Monotonic: a lower block number than the stored one is
/// a no-op, so concurrent sweep and tail loops can both report progress.
pub async fn advance_cursor(
    pool: &PgPool,
    chain_id: i64,
    block_number: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO block_sync_status (chain_id, last_synced_block, last_synced_at)
        VALUES ($1, $2, now())
        ON CONFLICT (chain_id) DO UPDATE
        SET last_synced_block = GREATEST(block_sync_status.last_synced_block, EXCLUDED.last_synced_block),
            last_synced_at = now(),
            updated_at = now()
        "#,
    )
    .bind(chain_id)
    .bind(block_number)
    .execute(pool)
    .await?;
    Ok(())
}

// ─── Points Queries ─────────────────────────────────────────────────────────

/// Fetch the points row for (address, chain), creating it with zero points
/// and the supplied `last_calculated_at` on first reference.
pub async fn get_or_create_points(
    pool: &PgPool,
    user_address: &str,
    chain_id: i64,
    default_last_calculated_at: DateTime<Utc>,
) -> Result<UserPoints, sqlx::Error> {
    sqlx::query_as::<_, UserPoints>(
        r#"
        INSERT INTO user_points (user_address, chain_id, total_points, last_calculated_at)
        VALUES ($1, $2, 0, $3)
        ON CONFLICT (user_address, chain_id) DO UPDATE SET user_address = EXCLUDED.user_address
        RETURNING *
        "#,
    )
    .bind(user_address)
    .bind(chain_id)
    .bind(default_last_calculated_at)
    .fetch_one(pool)
    .await
}

/// Add `points` to the accumulator and advance `last_calculated_at`.
/// `points` may be zero: the driver still records calculation progress.
pub async fn add_points(
    pool: &PgPool,
    user_address: &str,
    chain_id: i64,
    points: f64,
    calculated_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO user_points (user_address, chain_id, total_points, last_calculated_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (user_address, chain_id) DO UPDATE
        SET total_points = user_points.total_points + EXCLUDED.total_points,
            last_calculated_at = EXCLUDED.last_calculated_at,
            updated_at = now()
        "#,
    )
    .bind(user_address)
    .bind(chain_id)
    .bind(points)
    .bind(calculated_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Append an audit row for a settlement that produced points.
pub async fn insert_calc_log(pool: &PgPool, log: &NewCalculationLog) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO points_calculation_logs
            (user_address, chain_id, calculation_time, start_time, end_time,
             points_earned, average_balance, holding_hours)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(&log.user_address)
    .bind(log.chain_id)
    .bind(log.calculation_time)
    .bind(log.start_time)
    .bind(log.end_time)
    .bind(log.points_earned)
    .bind(&log.average_balance)
    .bind(log.holding_hours)
    .execute(pool)
    .await?;
    Ok(())
}

/// Addresses whose `last_calculated_at` lags `before`, with that timestamp —
/// the periodic driver's work list.
pub async fn addresses_needing_calculation(
    pool: &PgPool,
    chain_id: i64,
    before: DateTime<Utc>,
) -> Result<Vec<(String, DateTime<Utc>)>, sqlx::Error> {
    sqlx::query_as::<_, (String, DateTime<Utc>)>(
        r#"
        SELECT user_address, last_calculated_at FROM user_points
        WHERE chain_id = $1 AND last_calculated_at < $2
        ORDER BY user_address
        "#,
    )
    .bind(chain_id)
    .bind(before)
    .fetch_all(pool)
    .await
}

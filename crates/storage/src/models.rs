use alloy::primitives::U256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use accrue_core::AppError;

/// Parse a decimal-string token amount back into its exact integer form.
///
/// Stored amounts are written by us from `U256::to_string()`, so a parse
/// failure means the table was corrupted out-of-band.
pub fn parse_amount(raw: &str) -> Result<U256, AppError> {
    U256::from_str_radix(raw, 10)
        .map_err(|e| AppError::Integrity(format!("malformed stored amount '{raw}': {e}")))
}

// ─── Change kind ────────────────────────────────────────────────────────────

/// Direction of a journal row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Mint,
    Burn,
    TransferIn,
    TransferOut,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Mint => "mint",
            ChangeKind::Burn => "burn",
            ChangeKind::TransferIn => "transfer_in",
            ChangeKind::TransferOut => "transfer_out",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw {
            "mint" => Ok(ChangeKind::Mint),
            "burn" => Ok(ChangeKind::Burn),
            "transfer_in" => Ok(ChangeKind::TransferIn),
            "transfer_out" => Ok(ChangeKind::TransferOut),
            other => Err(AppError::Store(format!("unknown change type '{other}'"))),
        }
    }

    /// Inflows add to the balance; outflows subtract (clamped at zero).
    pub fn is_inflow(&self) -> bool {
        matches!(self, ChangeKind::Mint | ChangeKind::TransferIn)
    }
}

// ─── UserBalance ────────────────────────────────────────────────────────────

/// Current balance for an (address, chain) pair.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserBalance {
    pub id: i64,
    pub user_address: String,
    pub chain_id: i64,
    pub balance: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserBalance {
    pub fn balance_u256(&self) -> Result<U256, AppError> {
        parse_amount(&self.balance)
    }
}

// ─── BalanceChange ──────────────────────────────────────────────────────────

/// An immutable journal row: one balance movement of one address.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BalanceChange {
    pub id: i64,
    pub user_address: String,
    pub chain_id: i64,
    pub tx_hash: String,
    pub block_number: i64,
    pub log_index: i64,
    pub balance_before: String,
    pub balance_after: String,
    pub change_amount: String,
    pub change_type: String,
    pub timestamp: DateTime<Utc>,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

impl BalanceChange {
    pub fn balance_before_u256(&self) -> Result<U256, AppError> {
        parse_amount(&self.balance_before)
    }

    pub fn balance_after_u256(&self) -> Result<U256, AppError> {
        parse_amount(&self.balance_after)
    }

    pub fn change_amount_u256(&self) -> Result<U256, AppError> {
        parse_amount(&self.change_amount)
    }

    pub fn kind(&self) -> Result<ChangeKind, AppError> {
        ChangeKind::parse(&self.change_type)
    }
}

/// Insert-ready journal row (no `id`, `processed` or `created_at`).
#[derive(Debug, Clone)]
pub struct NewBalanceChange {
    pub user_address: String,
    pub chain_id: i64,
    pub tx_hash: String,
    pub block_number: i64,
    pub log_index: i64,
    pub balance_before: String,
    pub balance_after: String,
    pub change_amount: String,
    pub kind: ChangeKind,
    pub timestamp: DateTime<Utc>,
}

// ─── UserPoints ─────────────────────────────────────────────────────────────

/// Accumulated loyalty points for an (address, chain) pair.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserPoints {
    pub id: i64,
    pub user_address: String,
    pub chain_id: i64,
    pub total_points: f64,
    pub last_calculated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ─── BlockSyncStatus ────────────────────────────────────────────────────────

/// Per-chain sync cursor: the highest block fully applied to the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BlockSyncStatus {
    pub id: i64,
    pub chain_id: i64,
    pub last_synced_block: i64,
    pub last_synced_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ─── PointsCalculationLog ───────────────────────────────────────────────────

/// Audit row: one interval settlement that produced points.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PointsCalculationLog {
    pub id: i64,
    pub user_address: String,
    pub chain_id: i64,
    pub calculation_time: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub points_earned: f64,
    pub average_balance: String,
    pub holding_hours: f64,
    pub created_at: DateTime<Utc>,
}

/// Insert-ready calculation log row.
#[derive(Debug, Clone)]
pub struct NewCalculationLog {
    pub user_address: String,
    pub chain_id: i64,
    pub calculation_time: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub points_earned: f64,
    pub average_balance: String,
    pub holding_hours: f64,
}

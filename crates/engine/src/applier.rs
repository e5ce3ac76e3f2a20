//! Applies decoded token events to the ledger.
//!
//! Each application reads the holder's current balance, computes the new one
//! and commits the journal row together with the balance update through
//! [`LedgerStore::record_change`]. Outflows larger than the balance clamp the
//! result at zero while the journal keeps the raw event amount, so downstream
//! consumers can detect the clamp by comparing `|after − before|` against
//! `change_amount`.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use accrue_chain::decoder::TokenEvent;
use accrue_core::AppError;
use accrue_storage::models::{ChangeKind, NewBalanceChange};
use accrue_storage::store::{Applied, LedgerStore};

pub struct BalanceApplier {
    store: Arc<dyn LedgerStore>,
    chain_id: i64,
}

impl BalanceApplier {
    pub fn new(store: Arc<dyn LedgerStore>, chain_id: i64) -> Self {
        Self { store, chain_id }
    }

    /// Apply one decoded event. A transfer touches both sides, sender first;
    /// sides at the zero address are skipped (mint source / burn sink).
    pub async fn apply(&self, event: &TokenEvent, timestamp: DateTime<Utc>) -> Result<(), AppError> {
        match event {
            TokenEvent::Transfer {
                from,
                to,
                value,
                block_number,
                tx_hash,
                log_index,
            } => {
                if *from != Address::ZERO {
                    self.apply_side(
                        *from,
                        *value,
                        ChangeKind::TransferOut,
                        *block_number,
                        tx_hash,
                        *log_index,
                        timestamp,
                    )
                    .await?;
                }
                if *to != Address::ZERO {
                    self.apply_side(
                        *to,
                        *value,
                        ChangeKind::TransferIn,
                        *block_number,
                        tx_hash,
                        *log_index,
                        timestamp,
                    )
                    .await?;
                }
                Ok(())
            }
            TokenEvent::Minted {
                to,
                amount,
                block_number,
                tx_hash,
                log_index,
            } => {
                if *to == Address::ZERO {
                    debug!(tx = %tx_hash, "mint to the zero address, ignoring");
                    return Ok(());
                }
                self.apply_side(
                    *to,
                    *amount,
                    ChangeKind::Mint,
                    *block_number,
                    tx_hash,
                    *log_index,
                    timestamp,
                )
                .await
            }
            TokenEvent::Burned {
                from,
                amount,
                block_number,
                tx_hash,
                log_index,
            } => {
                if *from == Address::ZERO {
                    debug!(tx = %tx_hash, "burn from the zero address, ignoring");
                    return Ok(());
                }
                self.apply_side(
                    *from,
                    *amount,
                    ChangeKind::Burn,
                    *block_number,
                    tx_hash,
                    *log_index,
                    timestamp,
                )
                .await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_side(
        &self,
        address: Address,
        amount: U256,
        kind: ChangeKind,
        block_number: u64,
        tx_hash: &str,
        log_index: u64,
        timestamp: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let user_address = format!("{address:#x}");

        if self
            .store
            .balance_change_exists(tx_hash, &user_address, kind)
            .await?
        {
            debug!(tx = %tx_hash, user = %user_address, kind = kind.as_str(), "change already recorded, skipping");
            return Ok(());
        }

        let before = self
            .store
            .get_or_create_balance(&user_address, self.chain_id)
            .await?
            .balance_u256()?;

        let after = if kind.is_inflow() {
            before.saturating_add(amount)
        } else {
            if amount > before {
                warn!(
                    user = %user_address,
                    chain_id = self.chain_id,
                    balance = %before,
                    amount = %amount,
                    tx = %tx_hash,
                    "outflow exceeds balance, clamping to zero"
                );
            }
            before.saturating_sub(amount)
        };

        let change = NewBalanceChange {
            user_address: user_address.clone(),
            chain_id: self.chain_id,
            tx_hash: tx_hash.to_string(),
            block_number: block_number as i64,
            log_index: log_index as i64,
            balance_before: before.to_string(),
            balance_after: after.to_string(),
            change_amount: amount.to_string(),
            kind,
            timestamp,
        };

        match self.store.record_change(&change).await? {
            Applied::Recorded => {
                info!(
                    user = %user_address,
                    chain_id = self.chain_id,
                    kind = kind.as_str(),
                    amount = %amount,
                    old_balance = %before,
                    new_balance = %after,
                    tx = %tx_hash,
                    "balance updated"
                );
            }
            Applied::Duplicate => {
                debug!(tx = %tx_hash, user = %user_address, kind = kind.as_str(), "duplicate insert, no effects");
            }
        }
        Ok(())
    }
}

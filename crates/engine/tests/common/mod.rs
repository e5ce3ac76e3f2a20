#![allow(dead_code)]

use std::sync::Arc;

use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, TimeZone, Utc};

use accrue_chain::decoder::TokenEvent;
use accrue_storage::mem::MemLedger;

pub const CHAIN_ID: i64 = 11_155_111;

pub fn new_store() -> Arc<MemLedger> {
    Arc::new(MemLedger::new())
}

pub fn holder(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

pub fn hex_addr(address: Address) -> String {
    format!("{address:#x}")
}

/// Whole tokens in 18-decimal base units.
pub fn tokens(n: u64) -> U256 {
    U256::from(n) * U256::from(10u64).pow(U256::from(18u64))
}

/// An instant on the reference day, minute resolution.
pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, 0).unwrap()
}

/// An instant on the evening before the reference day.
pub fn day_before(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 12, 31, hour, 0, 0).unwrap()
}

pub fn tx(n: u8) -> String {
    format!("{:#x}", B256::repeat_byte(n))
}

pub fn transfer(from: Address, to: Address, value: U256, block: u64, tx_hash: &str) -> TokenEvent {
    TokenEvent::Transfer {
        from,
        to,
        value,
        block_number: block,
        tx_hash: tx_hash.to_string(),
        log_index: 0,
    }
}

pub fn mint(to: Address, amount: U256, block: u64, tx_hash: &str) -> TokenEvent {
    TokenEvent::Minted {
        to,
        amount,
        block_number: block,
        tx_hash: tx_hash.to_string(),
        log_index: 0,
    }
}

pub fn burn(from: Address, amount: U256, block: u64, tx_hash: &str) -> TokenEvent {
    TokenEvent::Burned {
        from,
        amount,
        block_number: block,
        tx_hash: tx_hash.to_string(),
        log_index: 0,
    }
}

pub fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

/// Assert the journal invariants for one holder: rows chain exactly
/// (each `balance_before` equals the previous `balance_after`) and the final
/// `balance_after` matches the balance table.
pub fn audit_journal(store: &MemLedger, user_address: &str, chain_id: i64) {
    let mut rows: Vec<_> = store
        .changes()
        .into_iter()
        .filter(|c| c.user_address == user_address && c.chain_id == chain_id)
        .collect();
    rows.sort_by_key(|c| (c.block_number, c.log_index, c.id));

    let mut previous_after: Option<String> = None;
    for row in &rows {
        if let Some(expected_before) = &previous_after {
            assert_eq!(
                &row.balance_before, expected_before,
                "balance chain broken at tx {} ({})",
                row.tx_hash, row.change_type
            );
        }
        previous_after = Some(row.balance_after.clone());
    }

    if let Some(final_after) = previous_after {
        let balance = store
            .balance(user_address, chain_id)
            .expect("journaled holder must have a balance row");
        assert_eq!(balance.balance, final_after, "balance table out of sync with journal");
    }
}

/// Assert no two journal rows share (tx_hash, address, change_type).
pub fn audit_uniqueness(store: &MemLedger) {
    let rows = store.changes();
    for (i, a) in rows.iter().enumerate() {
        for b in rows.iter().skip(i + 1) {
            assert!(
                !(a.tx_hash == b.tx_hash
                    && a.user_address == b.user_address
                    && a.change_type == b.change_type),
                "duplicate journal row for tx {} / {} / {}",
                a.tx_hash,
                a.user_address,
                a.change_type
            );
        }
    }
}

use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;

use accrue_core::AppError;

use crate::abi::LoyaltyToken;

/// Zero address sentinel: mint source and burn sink, never a real holder.
pub const ZERO_ADDRESS: Address = Address::ZERO;

/// Classified balance-affecting token event.
#[derive(Debug, Clone)]
pub enum TokenEvent {
    Transfer {
        from: Address,
        to: Address,
        value: U256,
        block_number: u64,
        tx_hash: String,
        log_index: u64,
    },
    Minted {
        to: Address,
        amount: U256,
        block_number: u64,
        tx_hash: String,
        log_index: u64,
    },
    Burned {
        from: Address,
        amount: U256,
        block_number: u64,
        tx_hash: String,
        log_index: u64,
    },
}

impl TokenEvent {
    pub fn block_number(&self) -> u64 {
        match self {
            TokenEvent::Transfer { block_number, .. }
            | TokenEvent::Minted { block_number, .. }
            | TokenEvent::Burned { block_number, .. } => *block_number,
        }
    }

    pub fn tx_hash(&self) -> &str {
        match self {
            TokenEvent::Transfer { tx_hash, .. }
            | TokenEvent::Minted { tx_hash, .. }
            | TokenEvent::Burned { tx_hash, .. } => tx_hash,
        }
    }

    pub fn log_index(&self) -> u64 {
        match self {
            TokenEvent::Transfer { log_index, .. }
            | TokenEvent::Minted { log_index, .. }
            | TokenEvent::Burned { log_index, .. } => *log_index,
        }
    }
}

/// Topic0 hashes of the three consumed events, in filter order.
pub fn event_signatures() -> [B256; 3] {
    [
        LoyaltyToken::Transfer::SIGNATURE_HASH,
        LoyaltyToken::TokenMinted::SIGNATURE_HASH,
        LoyaltyToken::TokenBurned::SIGNATURE_HASH,
    ]
}

/// Decode a raw log into a [`TokenEvent`].
///
/// Pure: performs no I/O. Fails with `AppError::Decode` for an unknown
/// topic0, a malformed payload, or missing block/transaction metadata.
pub fn decode_token_log(log: &Log) -> Result<TokenEvent, AppError> {
    let block_number = log
        .block_number
        .ok_or_else(|| AppError::Decode("log missing block number".into()))?;
    let tx_hash = log
        .transaction_hash
        .map(|h| format!("{h:#x}"))
        .ok_or_else(|| AppError::Decode("log missing transaction hash".into()))?;
    let log_index = log
        .log_index
        .ok_or_else(|| AppError::Decode("log missing log index".into()))?;
    let topic0 = log
        .topic0()
        .copied()
        .ok_or_else(|| AppError::Decode("log has no topics".into()))?;

    if topic0 == LoyaltyToken::Transfer::SIGNATURE_HASH {
        let decoded = log
            .log_decode::<LoyaltyToken::Transfer>()
            .map_err(|e| AppError::Decode(format!("malformed Transfer log: {e}")))?;
        let data = decoded.inner.data;
        Ok(TokenEvent::Transfer {
            from: data.from,
            to: data.to,
            value: data.value,
            block_number,
            tx_hash,
            log_index,
        })
    } else if topic0 == LoyaltyToken::TokenMinted::SIGNATURE_HASH {
        let decoded = log
            .log_decode::<LoyaltyToken::TokenMinted>()
            .map_err(|e| AppError::Decode(format!("malformed TokenMinted log: {e}")))?;
        let data = decoded.inner.data;
        Ok(TokenEvent::Minted {
            to: data.to,
            amount: data.amount,
            block_number,
            tx_hash,
            log_index,
        })
    } else if topic0 == LoyaltyToken::TokenBurned::SIGNATURE_HASH {
        let decoded = log
            .log_decode::<LoyaltyToken::TokenBurned>()
            .map_err(|e| AppError::Decode(format!("malformed TokenBurned log: {e}")))?;
        let data = decoded.inner.data;
        Ok(TokenEvent::Burned {
            from: data.from,
            amount: data.amount,
            block_number,
            tx_hash,
            log_index,
        })
    } else {
        Err(AppError::Decode(format!("unknown event topic {topic0:#x}")))
    }
}

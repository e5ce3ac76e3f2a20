pub mod abi;
pub mod decoder;
pub mod provider;

pub use abi::LoyaltyToken;
pub use decoder::{decode_token_log, event_signatures, TokenEvent};
pub use provider::{connect, ChainProvider};

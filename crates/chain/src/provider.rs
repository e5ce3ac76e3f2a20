use alloy::providers::{DynProvider, Provider, ProviderBuilder};

use accrue_core::AppError;

/// The RPC provider type used throughout the application.
///
/// Erased so the rest of the system is independent of the concrete transport;
/// `connect` auto-detects http(s) vs ws(s) from the URL scheme. Subscriptions
/// are only available on pubsub transports and fail at call time otherwise,
/// which the ingestor treats as its cue to poll.
pub type ChainProvider = DynProvider;

/// Create a provider from an RPC URL string.
pub async fn connect(rpc_url: &str) -> Result<ChainProvider, AppError> {
    let provider = ProviderBuilder::new()
        .connect(rpc_url)
        .await
        .map_err(|e| AppError::Rpc(format!("connect {rpc_url}: {e}")))?;
    Ok(provider.erased())
}

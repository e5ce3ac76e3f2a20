use thiserror::Error;

/// Shared error type used across all Accrue crates.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("store error: {0}")]
    Store(String),

    /// A ledger invariant would be violated. Indicates a bug; the offending
    /// operation must be aborted and the error surfaced to the operator.
    #[error("ledger integrity violated: {0}")]
    Integrity(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] eyre::Error),
}

/// Message fragments identifying transient transport failures worth retrying.
const TRANSIENT_MARKERS: &[&str] = &[
    "connection refused",
    "connection reset",
    "timeout",
    "temporary failure",
    "network is unreachable",
    "no such host",
    "eof",
    "broken pipe",
    "deadline exceeded",
];

impl AppError {
    /// Whether a retry could plausibly succeed. Only RPC failures whose
    /// message matches a known transient condition qualify; everything else
    /// (bad config, decode failures, integrity violations, cancellation) is
    /// permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Rpc(msg) => {
                let msg = msg.to_ascii_lowercase();
                TRANSIENT_MARKERS.iter().any(|marker| msg.contains(marker))
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_rpc_errors_are_retryable() {
        assert!(AppError::Rpc("Connection refused (os error 111)".into()).is_transient());
        assert!(AppError::Rpc("request timeout after 30s".into()).is_transient());
        assert!(AppError::Rpc("unexpected EOF".into()).is_transient());
        assert!(AppError::Rpc("context deadline exceeded".into()).is_transient());
    }

    #[test]
    fn permanent_errors_are_not_retryable() {
        assert!(!AppError::Rpc("invalid params".into()).is_transient());
        assert!(!AppError::Decode("unknown event topic".into()).is_transient());
        assert!(!AppError::Store("unique violation".into()).is_transient());
        assert!(!AppError::Cancelled.is_transient());
        assert!(!AppError::Integrity("balance chain broken".into()).is_transient());
    }
}

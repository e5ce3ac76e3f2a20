use tracing_subscriber::{fmt, EnvFilter};

/// Initialise the global tracing subscriber.
///
/// Must run once before any task is spawned; every component logs through it.
/// Respects `RUST_LOG` env var; defaults to `info` level. Repeat calls no-op
/// so tests may initialise freely.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}

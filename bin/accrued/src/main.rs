//! Accrue daemon — ingests token transfer/mint/burn logs into the balance
//! ledger and settles time-weighted loyalty points.
//!
//! Runs until SIGINT/SIGTERM; exits non-zero only on startup failure.

use std::sync::Arc;

use accrue_core::{telemetry, Settings};
use accrue_engine::Orchestrator;
use accrue_storage::{self as storage, PgLedger};

#[tokio::main]
async fn main() {
    telemetry::init();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    tracing::info!("starting accrued");

    let pool = match storage::connect(&settings.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "database connection failed");
            std::process::exit(1);
        }
    };

    if let Err(e) = sqlx::migrate!("../../migrations").run(&pool).await {
        tracing::error!(error = %e, "database migration failed");
        std::process::exit(1);
    }
    tracing::info!("database ready");

    let store = Arc::new(PgLedger::new(pool.clone()));
    let orchestrator = Orchestrator::new(settings, store);

    if let Err(e) = orchestrator.run().await {
        tracing::error!(error = %e, "startup failed");
        std::process::exit(1);
    }

    pool.close().await;
    tracing::info!("accrued stopped");
}

//! Process orchestration: one ingestor per enabled chain, the periodic points
//! driver and the daily health check, all bound to a shared shutdown signal.
//!
//! An ingestor failure is fatal to that chain only. SIGINT/SIGTERM triggers a
//! cooperative drain bounded by a deadline; whatever did not finish is
//! abandoned and the cursor simply reflects the last committed batch.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

use accrue_chain::provider;
use accrue_core::config::Settings;
use accrue_core::shutdown::{self, Shutdown};
use accrue_core::AppError;
use accrue_storage::store::LedgerStore;

use crate::ingestor::ChainIngestor;
use crate::points::PointsEngine;

const DRAIN_DEADLINE: Duration = Duration::from_secs(15);
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

pub struct Orchestrator {
    settings: Settings,
    store: Arc<dyn LedgerStore>,
}

impl Orchestrator {
    pub fn new(settings: Settings, store: Arc<dyn LedgerStore>) -> Self {
        Self { settings, store }
    }

    /// Run until a shutdown signal arrives. Startup errors (unreachable RPC,
    /// bad contract address) are returned; runtime failures of individual
    /// chains are logged and contained.
    pub async fn run(self) -> Result<(), AppError> {
        let (handle, shutdown) = shutdown::channel();

        let enabled: Vec<_> = self.settings.enabled_chains().cloned().collect();
        let chain_ids: Vec<i64> = enabled.iter().map(|chain| chain.chain_id).collect();

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        let mut ingestors: Vec<Arc<ChainIngestor>> = Vec::new();

        for chain in enabled {
            let provider = provider::connect(&chain.rpc_url).await?;
            let ingestor = ChainIngestor::new(
                chain.clone(),
                provider,
                Arc::clone(&self.store),
                &self.settings.system,
                shutdown.clone(),
            )?;
            ingestors.push(Arc::clone(&ingestor));
            info!(chain = %chain.name, chain_id = chain.chain_id, "chain ingestor launched");
            let name = chain.name.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = ingestor.run().await {
                    error!(chain = %name, error = %e, "chain ingestor failed");
                }
            }));
        }

        let engine = PointsEngine::new(Arc::clone(&self.store));

        // Settle any intervals that came due while the process was down.
        if let Err(e) = engine.run_tick(&chain_ids, Utc::now()).await {
            warn!(error = %e, "startup points pass failed");
        }

        tasks.push(tokio::spawn(points_ticker(
            engine,
            chain_ids,
            self.settings.system.points_calculation_interval,
            shutdown.clone(),
        )));
        tasks.push(tokio::spawn(health_check_loop(ingestors, shutdown.clone())));

        wait_for_signal().await;
        info!("shutdown requested, draining tasks");
        handle.shutdown();

        if tokio::time::timeout(DRAIN_DEADLINE, futures_util::future::join_all(tasks))
            .await
            .is_err()
        {
            warn!("drain deadline exceeded, abandoning remaining tasks");
        }
        Ok(())
    }
}

async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let ctrl_c = tokio::signal::ctrl_c();
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = ctrl_c => info!("received SIGINT"),
                _ = sigterm.recv() => info!("received SIGTERM"),
            }
        }
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler");
            let _ = ctrl_c.await;
            info!("received SIGINT");
        }
    }
}

/// Fire the points driver at every wall-clock boundary of `period` (hourly
/// cadence ticks on the hour). Failures are logged; the ticker survives them.
async fn points_ticker(
    engine: PointsEngine,
    chain_ids: Vec<i64>,
    period: Duration,
    shutdown: Shutdown,
) {
    info!(period_secs = period.as_secs(), "points ticker started");
    loop {
        let tick_end = next_boundary(Utc::now(), period);
        let wait = (tick_end - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = sleep(wait) => {}
        }
        if shutdown.is_cancelled() {
            return;
        }
        if let Err(e) = engine.run_tick(&chain_ids, tick_end).await {
            error!(error = %e, "scheduled points calculation failed");
        }
    }
}

/// Next instant strictly after `now` aligned to a whole multiple of `period`.
fn next_boundary(now: DateTime<Utc>, period: Duration) -> DateTime<Utc> {
    let period_secs = period.as_secs().max(1) as i64;
    let now_secs = now.timestamp();
    let next_secs = now_secs - now_secs.rem_euclid(period_secs) + period_secs;
    DateTime::from_timestamp(next_secs, 0)
        .unwrap_or_else(|| now + chrono::Duration::seconds(period_secs))
}

/// Daily operator report: RPC reachability and cursor position per chain.
async fn health_check_loop(ingestors: Vec<Arc<ChainIngestor>>, shutdown: Shutdown) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = sleep(HEALTH_CHECK_INTERVAL) => {}
        }
        info!("running daily health check");
        for ingestor in &ingestors {
            ingestor.report_health().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn hourly_boundary_lands_on_the_hour() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 14, 23, 45).unwrap();
        let next = next_boundary(now, Duration::from_secs(3600));
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 5, 15, 0, 0).unwrap());
    }

    #[test]
    fn boundary_is_strictly_in_the_future() {
        let on_the_hour = Utc.with_ymd_and_hms(2024, 3, 5, 14, 0, 0).unwrap();
        let next = next_boundary(on_the_hour, Duration::from_secs(3600));
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 5, 15, 0, 0).unwrap());
    }

    #[test]
    fn sub_hour_period_aligns_to_its_own_multiple() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 1).unwrap();
        let next = next_boundary(now, Duration::from_secs(600));
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 5, 14, 10, 0).unwrap());
    }
}

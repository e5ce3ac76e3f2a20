//! Per-chain ingestion: historical sweep plus live tail.
//!
//! The sweep walks `[cursor+1, confirmed_head]` in fixed 1000-block batches,
//! applies every decodable log in `(block_number, log_index)` order and only
//! then advances the cursor, so a crash replays at most one batch — the
//! store's idempotent writes absorb the replay. The tail prefers a log
//! subscription, buffering pushed logs until they are buried under the
//! confirmation depth and draining the confirmed ones in `(block_number,
//! log_index)` order from a single task; any subscription failure degrades to
//! a polling loop with the sweep's semantics.
//!
//! Sweep and tail share one apply lock so journal rows of a chain are written
//! strictly sequentially.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::Address;
use alloy::providers::Provider;
use alloy::rpc::types::{Filter, Log};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use accrue_chain::decoder::{decode_token_log, event_signatures};
use accrue_chain::provider::ChainProvider;
use accrue_core::config::{ChainSettings, SystemSettings};
use accrue_core::retry::RetryPolicy;
use accrue_core::shutdown::Shutdown;
use accrue_core::AppError;
use accrue_storage::store::LedgerStore;

use crate::applier::BalanceApplier;

/// Fixed block range per historical-sweep batch.
const SWEEP_BATCH_BLOCKS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestorState {
    Created,
    Running,
    Stopped,
}

pub struct ChainIngestor {
    chain: ChainSettings,
    contract: Address,
    provider: ChainProvider,
    store: Arc<dyn LedgerStore>,
    applier: BalanceApplier,
    /// Serialises journal writes between the sweep and tail tasks.
    apply_lock: Mutex<()>,
    retry: RetryPolicy,
    shutdown: Shutdown,
    confirmation_blocks: u64,
    scan_interval: Duration,
    tail_batch_blocks: u64,
    state: AtomicU8,
    decode_skips: AtomicU64,
}

impl ChainIngestor {
    pub fn new(
        chain: ChainSettings,
        provider: ChainProvider,
        store: Arc<dyn LedgerStore>,
        system: &SystemSettings,
        shutdown: Shutdown,
    ) -> Result<Arc<Self>, AppError> {
        let contract = chain.contract_address.parse::<Address>().map_err(|e| {
            AppError::Config(format!(
                "chain {}: bad contract address '{}': {e}",
                chain.name, chain.contract_address
            ))
        })?;
        let applier = BalanceApplier::new(Arc::clone(&store), chain.chain_id);
        Ok(Arc::new(Self {
            contract,
            provider,
            store,
            applier,
            apply_lock: Mutex::new(()),
            retry: RetryPolicy::new(system.retry_max_attempts, system.retry_delay),
            shutdown,
            confirmation_blocks: system.confirmation_blocks,
            scan_interval: system.block_scan_interval,
            tail_batch_blocks: system.event_batch_size.max(1),
            state: AtomicU8::new(IngestorState::Created as u8),
            decode_skips: AtomicU64::new(0),
            chain,
        }))
    }

    pub fn state(&self) -> IngestorState {
        match self.state.load(Ordering::Acquire) {
            0 => IngestorState::Created,
            1 => IngestorState::Running,
            _ => IngestorState::Stopped,
        }
    }

    /// Logs skipped because they would not decode. These blocks still count
    /// as synced; the counter is the operator's signal to investigate.
    pub fn decode_skips(&self) -> u64 {
        self.decode_skips.load(Ordering::Relaxed)
    }

    pub fn chain_name(&self) -> &str {
        &self.chain.name
    }

    pub fn chain_id(&self) -> i64 {
        self.chain.chain_id
    }

    /// Drive the ingestor until shutdown. Runs the historical sweep and the
    /// live tail concurrently; an integrity failure in either stops the chain.
    pub async fn run(self: Arc<Self>) -> Result<(), AppError> {
        self.state
            .store(IngestorState::Running as u8, Ordering::Release);
        info!(
            chain = %self.chain.name,
            chain_id = self.chain.chain_id,
            contract = %self.contract,
            "starting chain ingestor"
        );

        let sweep = tokio::spawn({
            let ingestor = Arc::clone(&self);
            async move { ingestor.historical_sweep().await }
        });
        let tail = tokio::spawn({
            let ingestor = Arc::clone(&self);
            async move { ingestor.live_tail().await }
        });

        let (sweep_res, tail_res) = tokio::join!(sweep, tail);
        self.state
            .store(IngestorState::Stopped as u8, Ordering::Release);
        info!(chain = %self.chain.name, "chain ingestor stopped");

        for res in [sweep_res, tail_res] {
            match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(e) => {
                    return Err(AppError::Other(eyre::eyre!("ingestor task panicked: {e}")))
                }
            }
        }
        Ok(())
    }

    /// Log the chain's head, cursor and decode-skip count.
    pub async fn report_health(&self) {
        let head = self.provider.get_block_number().await;
        let cursor = self.store.cursor(self.chain.chain_id).await;
        match (head, cursor) {
            (Ok(head), Ok(cursor)) => info!(
                chain = %self.chain.name,
                chain_id = self.chain.chain_id,
                head,
                last_synced_block = cursor,
                decode_skips = self.decode_skips(),
                state = ?self.state(),
                "chain health"
            ),
            (head, cursor) => warn!(
                chain = %self.chain.name,
                head_error = ?head.err(),
                cursor_error = ?cursor.err(),
                "chain health check failed"
            ),
        }
    }

    // ─── Historical sweep ───────────────────────────────────────────────────

    async fn historical_sweep(&self) -> Result<(), AppError> {
        info!(chain = %self.chain.name, "historical sweep started");
        loop {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }
            match self.sweep_once(SWEEP_BATCH_BLOCKS).await {
                Ok(true) => {}
                Ok(false) => self.idle().await,
                Err(e @ AppError::Integrity(_)) => {
                    error!(chain = %self.chain.name, error = %e, "sweep hit an integrity violation");
                    return Err(e);
                }
                Err(AppError::Cancelled) => return Ok(()),
                Err(e) => {
                    error!(chain = %self.chain.name, error = %e, "sweep iteration failed");
                    self.idle().await;
                }
            }
        }
    }

    /// One batch: returns whether the cursor advanced (false means caught up).
    async fn sweep_once(&self, batch_blocks: u64) -> Result<bool, AppError> {
        let head = self.block_number().await?;
        let cursor = self.effective_cursor().await?;
        let confirmed_head = head.saturating_sub(self.confirmation_blocks);

        let Some((from, to)) = batch_bounds(cursor, confirmed_head, batch_blocks) else {
            return Ok(false);
        };

        self.process_range(from, to).await?;
        self.store.advance_cursor(self.chain.chain_id, to).await?;
        Ok(true)
    }

    /// The stored cursor, or the configured start block when the chain has
    /// never been synced.
    async fn effective_cursor(&self) -> Result<u64, AppError> {
        let cursor = self.store.cursor(self.chain.chain_id).await?;
        if cursor == 0 && self.chain.start_block > 0 {
            return Ok(self.chain.start_block);
        }
        Ok(cursor)
    }

    /// Fetch, order and apply every log in `[from, to]`, holding the apply
    /// lock for the whole batch. The caller advances the cursor only after
    /// this returns Ok.
    async fn process_range(&self, from: u64, to: u64) -> Result<(), AppError> {
        let filter = self.log_filter().from_block(from).to_block(to);
        let mut logs = self
            .retry
            .run(&self.shutdown, AppError::is_transient, || async {
                self.provider
                    .get_logs(&filter)
                    .await
                    .map_err(|e| AppError::Rpc(format!("eth_getLogs [{from}, {to}]: {e}")))
            })
            .await?;
        logs.sort_by_key(|log| (log.block_number.unwrap_or(0), log.log_index.unwrap_or(0)));

        debug!(
            chain = %self.chain.name,
            from,
            to,
            logs = logs.len(),
            "processing block range"
        );

        let mut block_times = BlockTimeCache::default();
        let _guard = self.apply_lock.lock().await;
        for log in &logs {
            self.apply_log(log, &mut block_times).await?;
        }
        Ok(())
    }

    /// Decode and apply one log. Undecodable logs are counted and skipped —
    /// fatal to that log, not to the chain.
    async fn apply_log(&self, log: &Log, block_times: &mut BlockTimeCache) -> Result<(), AppError> {
        let event = match decode_token_log(log) {
            Ok(event) => event,
            Err(e) => {
                self.decode_skips.fetch_add(1, Ordering::Relaxed);
                warn!(
                    chain = %self.chain.name,
                    tx = ?log.transaction_hash,
                    block = ?log.block_number,
                    error = %e,
                    "skipping undecodable log"
                );
                return Ok(());
            }
        };
        let timestamp = self.block_timestamp(event.block_number(), block_times).await?;
        self.applier.apply(&event, timestamp).await
    }

    /// Block timestamp, fetched once per distinct block within a batch.
    async fn block_timestamp(
        &self,
        number: u64,
        cache: &mut BlockTimeCache,
    ) -> Result<DateTime<Utc>, AppError> {
        if let Some(timestamp) = cache.0.get(&number) {
            return Ok(*timestamp);
        }
        let block = self
            .retry
            .run(&self.shutdown, AppError::is_transient, || async {
                self.provider
                    .get_block_by_number(BlockNumberOrTag::Number(number))
                    .await
                    .map_err(|e| AppError::Rpc(format!("get block {number}: {e}")))
            })
            .await?
            .ok_or_else(|| AppError::Rpc(format!("block {number} not found")))?;
        let timestamp = DateTime::from_timestamp(block.header.timestamp as i64, 0)
            .ok_or_else(|| AppError::Decode(format!("block {number} has an invalid timestamp")))?;
        cache.0.insert(number, timestamp);
        Ok(timestamp)
    }

    async fn block_number(&self) -> Result<u64, AppError> {
        self.retry
            .run(&self.shutdown, AppError::is_transient, || async {
                self.provider
                    .get_block_number()
                    .await
                    .map_err(|e| AppError::Rpc(format!("eth_blockNumber: {e}")))
            })
            .await
    }

    fn log_filter(&self) -> Filter {
        Filter::new()
            .address(self.contract)
            .event_signature(event_signatures().to_vec())
    }

    async fn idle(&self) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = sleep(self.scan_interval) => {}
        }
    }

    // ─── Live tail ──────────────────────────────────────────────────────────

    async fn live_tail(&self) -> Result<(), AppError> {
        match self.subscription_tail().await {
            Ok(()) => return Ok(()),
            Err(e @ AppError::Integrity(_)) => return Err(e),
            Err(e) => {
                warn!(
                    chain = %self.chain.name,
                    error = %e,
                    "log subscription unavailable, switching to polling"
                );
            }
        }
        self.poll_tail().await
    }

    /// Subscribe and buffer pushed logs until they are confirmed, draining
    /// them from this single task so application stays sequential per chain.
    /// Returns Ok on shutdown, Err when the subscription cannot be
    /// established or closes.
    async fn subscription_tail(&self) -> Result<(), AppError> {
        let filter = self.log_filter();
        let subscription = self
            .provider
            .subscribe_logs(&filter)
            .await
            .map_err(|e| AppError::Rpc(format!("eth_subscribe logs: {e}")))?;
        info!(chain = %self.chain.name, "subscribed to live logs");

        let mut stream = subscription.into_stream();
        // Held until buried under the confirmation depth; the key keeps the
        // drain in (block_number, log_index) order.
        let mut pending: BTreeMap<(u64, u64), Log> = BTreeMap::new();
        let mut drain = tokio::time::interval(self.scan_interval);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                next = stream.next() => match next {
                    Some(log) => match (log.block_number, log.log_index) {
                        (Some(block), Some(index)) => {
                            pending.insert((block, index), log);
                        }
                        _ => {
                            self.decode_skips.fetch_add(1, Ordering::Relaxed);
                            warn!(
                                chain = %self.chain.name,
                                "subscribed log missing block metadata, skipping"
                            );
                        }
                    },
                    None => {
                        return Err(AppError::Rpc("log subscription closed".into()));
                    }
                },
                _ = drain.tick() => {
                    if pending.is_empty() {
                        continue;
                    }
                    match self.drain_confirmed(&mut pending).await {
                        Ok(()) => {}
                        Err(e @ AppError::Integrity(_)) => return Err(e),
                        Err(AppError::Cancelled) => return Ok(()),
                        Err(e) => {
                            error!(
                                chain = %self.chain.name,
                                error = %e,
                                "deferred log application failed"
                            );
                        }
                    }
                }
            }
        }
    }

    /// Apply every buffered log whose block is buried under the confirmation
    /// depth, oldest first, under one apply-lock hold. A failed log stays
    /// buffered and is retried on the next drain.
    async fn drain_confirmed(
        &self,
        pending: &mut BTreeMap<(u64, u64), Log>,
    ) -> Result<(), AppError> {
        let head = self.block_number().await?;
        let mut block_times = BlockTimeCache::default();
        let _guard = self.apply_lock.lock().await;
        loop {
            let Some((&key, log)) = pending.iter().next() else {
                return Ok(());
            };
            let (block_number, _) = key;
            if head < block_number + self.confirmation_blocks {
                debug!(
                    chain = %self.chain.name,
                    block = block_number,
                    head,
                    needed = block_number + self.confirmation_blocks,
                    "waiting for confirmations"
                );
                return Ok(());
            }
            self.apply_log(log, &mut block_times).await?;
            pending.remove(&key);
        }
    }

    /// Polling fallback: the sweep's semantics bounded to `event_batch_size`
    /// blocks per round, from the current cursor.
    async fn poll_tail(&self) -> Result<(), AppError> {
        info!(chain = %self.chain.name, "live tail polling started");
        loop {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }
            match self.sweep_once(self.tail_batch_blocks).await {
                Ok(_) => {}
                Err(e @ AppError::Integrity(_)) => {
                    error!(chain = %self.chain.name, error = %e, "tail poll hit an integrity violation");
                    return Err(e);
                }
                Err(AppError::Cancelled) => return Ok(()),
                Err(e) => {
                    error!(chain = %self.chain.name, error = %e, "tail poll failed");
                }
            }
            self.idle().await;
        }
    }
}

/// The next batch `[from, to]` to sweep, or `None` when caught up with the
/// confirmed head.
fn batch_bounds(cursor: u64, confirmed_head: u64, batch_blocks: u64) -> Option<(u64, u64)> {
    if confirmed_head <= cursor {
        return None;
    }
    Some((cursor + 1, (cursor + batch_blocks).min(confirmed_head)))
}

#[derive(Default)]
struct BlockTimeCache(HashMap<u64, DateTime<Utc>>);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caught_up_yields_no_batch() {
        assert_eq!(batch_bounds(100, 100, 1000), None);
        assert_eq!(batch_bounds(100, 90, 1000), None);
        assert_eq!(batch_bounds(0, 0, 1000), None);
    }

    #[test]
    fn batch_is_clipped_to_confirmed_head() {
        assert_eq!(batch_bounds(100, 150, 1000), Some((101, 150)));
        assert_eq!(batch_bounds(100, 5000, 1000), Some((101, 1100)));
    }

    #[test]
    fn confirmation_depth_gates_visibility() {
        // A log in block N enters a batch only once head - depth >= N.
        let depth = 6u64;
        let n = 500u64;
        for head in n..n + depth {
            let confirmed = head.saturating_sub(depth);
            let visible = batch_bounds(n - 1, confirmed, 1000)
                .map(|(from, to)| from <= n && n <= to)
                .unwrap_or(false);
            assert!(!visible, "block {n} must not be visible at head {head}");
        }
        let head = n + depth;
        let confirmed = head - depth;
        let (from, to) = batch_bounds(n - 1, confirmed, 1000).expect("batch expected");
        assert!(from <= n && n <= to);
    }
}

// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Top-level settler service.
//!
//! Explicitly constructed and owned by the binary; the health/status
//! endpoints receive it by injection. `start()` spawns the stream
//! supervisor, the event-processing loop, the reconciler tick and the
//! freshness monitor; `stop()` cancels them all. In-flight settlement
//! transactions are not cancelled, their receipts are simply not awaited
//! after shutdown.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ethers::types::{Address, U256};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use dicebet_pg_db::EventStore;

use crate::dispatcher::SettlementDispatcher;
use crate::eth_client::{ChainReader, EthClient, SettleExecutor};
use crate::ingestor::EventIngestor;
use crate::metrics::SettlerMetrics;
use crate::params::ContractParams;
use crate::pending_bets::BetTracker;
use crate::retry_with_max_elapsed_time;
use crate::stream::{run_stream_loop, StreamConfig, StreamEvent, StreamHealth};
use crate::SettlerResult;

/// Stream is considered fresh for the health surface while the last block is
/// younger than this.
const STREAM_FRESH_WINDOW: Duration = Duration::from_secs(300);

/// Warn at startup when the settler key holds less than 0.01 native units.
const LOW_BALANCE_WEI_EXP: usize = 16;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub ws_url: String,
    pub contract_address: Address,
    pub reconcile_interval: Duration,
    pub stream_stale_after: Duration,
    pub stream_check_interval: Duration,
    pub monitor_interval: Duration,
    pub monitor_stale_after: Duration,
    pub max_reconnect_attempts: u32,
    pub settled_dedupe_capacity: usize,
}

impl ServiceConfig {
    pub fn new(ws_url: String, contract_address: Address) -> Self {
        Self {
            ws_url,
            contract_address,
            reconcile_interval: Duration::from_secs(10),
            stream_stale_after: Duration::from_secs(120),
            stream_check_interval: Duration::from_secs(30),
            monitor_interval: Duration::from_secs(60),
            monitor_stale_after: Duration::from_secs(180),
            max_reconnect_attempts: 10,
            settled_dedupe_capacity: 10_000,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub database_connected: bool,
    pub websocket_connected: bool,
    /// Wall-clock time of the last received block, epoch millis (0 before
    /// the first block).
    pub last_block_time_ms: u64,
    pub block_age_secs: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusReport {
    pub running: bool,
    pub pending_bets: usize,
    pub start_time_ms: u64,
    pub database_connected: bool,
}

pub struct SettlerService {
    config: ServiceConfig,
    client: Arc<EthClient>,
    store: Arc<dyn EventStore>,
    tracker: Arc<BetTracker>,
    health: Arc<StreamHealth>,
    metrics: SettlerMetrics,
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
    started_at_ms: AtomicU64,
}

impl SettlerService {
    pub fn new(
        config: ServiceConfig,
        client: Arc<EthClient>,
        store: Arc<dyn EventStore>,
        registry: &prometheus::Registry,
    ) -> Self {
        Self {
            config,
            client,
            store,
            tracker: Arc::new(BetTracker::new()),
            health: Arc::new(StreamHealth::new()),
            metrics: SettlerMetrics::new(registry),
            cancel: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            started_at_ms: AtomicU64::new(0),
        }
    }

    pub async fn start(&self) -> SettlerResult<()> {
        self.warn_on_low_balance().await;

        let params = ContractParams::load(self.client.as_ref()).await;

        let chain: Arc<dyn ChainReader> = self.client.clone();
        let executor: Arc<dyn SettleExecutor> = self.client.clone();

        let ingestor = Arc::new(EventIngestor::new(
            chain.clone(),
            self.store.clone(),
            self.tracker.clone(),
            self.health.clone(),
            self.metrics.clone(),
            params.reveal_delay,
            self.config.settled_dedupe_capacity,
        ));
        let dispatcher = Arc::new(SettlementDispatcher::new(
            executor,
            self.tracker.clone(),
            self.metrics.clone(),
        ));

        let (event_tx, event_rx) = mpsc::channel(1024);
        let reset = Arc::new(Notify::new());

        let stream_config = StreamConfig {
            ws_url: self.config.ws_url.clone(),
            contract_address: self.config.contract_address,
            topics: crate::event_topics(),
            stale_after: self.config.stream_stale_after,
            check_interval: self.config.stream_check_interval,
            max_reconnect_attempts: self.config.max_reconnect_attempts,
        };

        let mut handles = self.handles.lock().await;
        handles.push(tokio::spawn(run_stream_loop(
            stream_config,
            self.health.clone(),
            event_tx,
            reset.clone(),
            self.cancel.clone(),
        )));
        handles.push(tokio::spawn(run_event_processor(
            event_rx,
            ingestor,
            self.metrics.clone(),
            self.cancel.clone(),
        )));
        handles.push(tokio::spawn(run_reconciler(
            chain,
            self.tracker.clone(),
            dispatcher,
            self.config.reconcile_interval,
            self.cancel.clone(),
        )));
        handles.push(tokio::spawn(run_freshness_monitor(
            self.health.clone(),
            reset,
            self.config.monitor_interval,
            self.config.monitor_stale_after,
            self.cancel.clone(),
        )));

        self.started_at_ms.store(epoch_ms(), Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        info!(
            "[Service] Settler started (reveal_delay={}, reconcile every {:?})",
            params.reveal_delay, self.config.reconcile_interval
        );
        Ok(())
    }

    /// Cancel all background tasks and wait for them to wind down.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        info!("[Service] Settler stopped");
    }

    async fn warn_on_low_balance(&self) {
        match self.client.balance().await {
            Ok(balance) if balance < U256::exp10(LOW_BALANCE_WEI_EXP) => {
                warn!(
                    "[Service] Settler key {:#x} holds only {} wei; settlements may start failing",
                    self.client.signer_address(),
                    balance
                );
            }
            Ok(balance) => {
                info!(
                    "[Service] Settler key {:#x} balance: {} wei",
                    self.client.signer_address(),
                    balance
                );
            }
            Err(e) => warn!("[Service] Could not read settler balance at startup: {}", e),
        }
    }

    pub async fn health(&self) -> HealthReport {
        let database_connected = self.store.ping().await.is_ok();
        let snap = self.health.snapshot();
        let stream_fresh = snap.connected && snap.block_age < STREAM_FRESH_WINDOW;
        HealthReport {
            healthy: database_connected && stream_fresh,
            database_connected,
            websocket_connected: snap.connected,
            last_block_time_ms: snap.last_block_wall_ms,
            block_age_secs: snap.block_age.as_secs(),
        }
    }

    pub async fn status(&self) -> StatusReport {
        StatusReport {
            running: self.running.load(Ordering::SeqCst),
            pending_bets: self.tracker.pending_count().await,
            start_time_ms: self.started_at_ms.load(Ordering::SeqCst),
            database_connected: self.store.ping().await.is_ok(),
        }
    }
}

/// Drains the stream event channel: heartbeats update metrics, logs go to
/// the ingestor. Failures are logged and swallowed so the loop stays alive.
async fn run_event_processor(
    mut event_rx: mpsc::Receiver<StreamEvent>,
    ingestor: Arc<EventIngestor>,
    metrics: SettlerMetrics,
    cancel: CancellationToken,
) {
    info!("[Service] Event processor started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = event_rx.recv() => {
                let Some(event) = event else {
                    info!("[Service] Stream event channel closed");
                    break;
                };
                match event {
                    StreamEvent::Connected { reconnect } => {
                        if reconnect {
                            metrics.stream_reconnects.inc();
                        }
                    }
                    StreamEvent::NewBlock(number) => {
                        metrics.last_observed_block.set(number as i64);
                    }
                    StreamEvent::Log(log) => {
                        if let Err(e) = ingestor.handle_log(log).await {
                            metrics.processing_errors.with_label_values(&[e.error_type()]).inc();
                            error!("[Service] Failed to process log: {}", e);
                        }
                    }
                }
            }
        }
    }
    info!("[Service] Event processor stopped");
}

/// Time-based reconciliation: one pass per tick rather than per block, so
/// commits sharing a reveal block are handled in a single sweep and idle
/// chains cost nothing.
async fn run_reconciler(
    chain: Arc<dyn ChainReader>,
    tracker: Arc<BetTracker>,
    dispatcher: Arc<SettlementDispatcher>,
    interval: Duration,
    cancel: CancellationToken,
) {
    info!("[Reconciler] Started (interval {:?})", interval);
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                reconcile_once(&chain, &tracker, &dispatcher).await;
            }
        }
    }
    info!("[Reconciler] Stopped");
}

/// One reconciliation pass over a snapshot of the pending set. The snapshot
/// makes iteration immune to concurrent removals by the dispatcher or the
/// ingestor.
pub(crate) async fn reconcile_once(
    chain: &Arc<dyn ChainReader>,
    tracker: &Arc<BetTracker>,
    dispatcher: &Arc<SettlementDispatcher>,
) {
    let pending = tracker.pending_count().await;
    if pending == 0 {
        return;
    }

    let current = match retry_with_max_elapsed_time!(chain.block_number(), Duration::from_secs(20))
    {
        Ok(Ok(number)) => number,
        Ok(Err(e)) | Err(e) => {
            warn!("[Reconciler] Could not read block number: {}; skipping tick", e);
            return;
        }
    };

    let due = tracker.due_bets(current).await;
    if due.is_empty() {
        debug!(
            "[Reconciler] {} pending bet(s) waiting, none due at block {}",
            pending, current
        );
        return;
    }

    info!(
        "[Reconciler] Block {}: {} of {} pending bet(s) due",
        current,
        due.len(),
        pending
    );
    for bet in &due {
        // Re-check: the ingestor may have removed the key while earlier
        // dispatches in this sweep were awaiting receipts.
        if tracker.get(&bet.key).await.is_none() {
            continue;
        }
        dispatcher.dispatch(bet).await;
    }
}

/// Outer freshness watchdog: the stream task already reconnects on
/// staleness, this loop forces a full reset if that somehow wedges.
async fn run_freshness_monitor(
    health: Arc<StreamHealth>,
    reset: Arc<Notify>,
    interval: Duration,
    stale_after: Duration,
    cancel: CancellationToken,
) {
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                let snap = health.snapshot();
                if snap.connected && snap.block_age > stale_after {
                    warn!(
                        "[Monitor] No block for {:?} despite connected stream; forcing reset",
                        snap.block_age
                    );
                    reset.notify_one();
                }
            }
        }
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

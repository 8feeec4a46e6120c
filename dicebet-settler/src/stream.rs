// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! WebSocket stream supervisor.
//!
//! Owns the streaming provider lifecycle: connect, subscribe to block
//! headers (the liveness heartbeat) and to the contract's logs, detect
//! staleness, and reconnect with bounded exponential backoff. Subscriptions
//! are re-established from scratch on every reconnect, so downstream
//! consumers never resubscribe themselves; they just keep reading the event
//! channel.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use ethers::providers::{Middleware, Provider, Ws};
use ethers::types::{Address, Filter, Log, ValueOrArray, H256};
use futures::StreamExt;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{SettlerError, SettlerResult};

/// Cap on the exponential backoff between reconnect attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub ws_url: String,
    pub contract_address: Address,
    /// topic0 values to subscribe to (one per event type).
    pub topics: Vec<H256>,
    /// No block for this long tears the connection down.
    pub stale_after: Duration,
    /// How often the in-stream staleness check runs.
    pub check_interval: Duration,
    /// Consecutive failed reconnects before the supervisor gives up.
    pub max_reconnect_attempts: u32,
}

/// Events pushed to the service's processing loop.
#[derive(Debug)]
pub enum StreamEvent {
    Connected { reconnect: bool },
    NewBlock(u64),
    Log(Log),
}

/// Runtime-only state of the stream, shared with the health surface.
pub struct StreamHealth {
    connected: AtomicBool,
    last_block: AtomicU64,
    last_block_wall_ms: AtomicU64,
    last_block_at: Mutex<Instant>,
    reconnect_attempts: AtomicU32,
}

#[derive(Debug, Clone)]
pub struct StreamSnapshot {
    pub connected: bool,
    pub last_block: u64,
    pub last_block_wall_ms: u64,
    pub block_age: Duration,
    pub reconnect_attempts: u32,
}

impl StreamHealth {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            last_block: AtomicU64::new(0),
            last_block_wall_ms: AtomicU64::new(0),
            last_block_at: Mutex::new(Instant::now()),
            reconnect_attempts: AtomicU32::new(0),
        }
    }

    pub fn record_block(&self, number: u64) {
        self.last_block.store(number, Ordering::SeqCst);
        self.last_block_wall_ms
            .store(epoch_ms(), Ordering::SeqCst);
        if let Ok(mut at) = self.last_block_at.lock() {
            *at = Instant::now();
        }
    }

    fn mark_connected(&self) {
        self.connected.store(true, Ordering::SeqCst);
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        // A fresh connection starts its staleness window now.
        if let Ok(mut at) = self.last_block_at.lock() {
            *at = Instant::now();
        }
    }

    fn mark_disconnected(&self, attempts: u32) {
        self.connected.store(false, Ordering::SeqCst);
        self.reconnect_attempts.store(attempts, Ordering::SeqCst);
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn last_block(&self) -> u64 {
        self.last_block.load(Ordering::SeqCst)
    }

    pub fn block_age(&self) -> Duration {
        self.last_block_at
            .lock()
            .map(|at| at.elapsed())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            connected: self.connected(),
            last_block: self.last_block(),
            last_block_wall_ms: self.last_block_wall_ms.load(Ordering::SeqCst),
            block_age: self.block_age(),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::SeqCst),
        }
    }
}

impl Default for StreamHealth {
    fn default() -> Self {
        Self::new()
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Delay before reconnect attempt `attempts` (1-based): 1s, 2s, 4s, ... capped
/// at [`MAX_BACKOFF`].
pub fn backoff_delay(attempts: u32) -> Duration {
    let exp = attempts.saturating_sub(1).min(16);
    Duration::from_secs(1u64 << exp).min(MAX_BACKOFF)
}

enum StreamExit {
    Cancelled,
    Disconnected(&'static str),
}

/// Supervisor loop: runs until cancelled or the reconnect attempts are exhausted.
pub async fn run_stream_loop(
    config: StreamConfig,
    health: std::sync::Arc<StreamHealth>,
    event_tx: mpsc::Sender<StreamEvent>,
    reset: std::sync::Arc<Notify>,
    cancel: CancellationToken,
) {
    let mut attempts: u32 = 0;
    let mut connected_before = false;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let exit = connect_and_stream(
            &config,
            &health,
            &event_tx,
            &reset,
            &cancel,
            connected_before,
        )
        .await;

        match exit {
            Ok(StreamExit::Cancelled) => break,
            Ok(StreamExit::Disconnected(reason)) => {
                // The connection was established, so the backoff sequence
                // restarts from the beginning.
                attempts = 0;
                connected_before = true;
                warn!("[Stream] Disconnected: {}", reason);
            }
            Err(e) => {
                warn!("[Stream] Connection attempt failed: {}", e);
            }
        }

        attempts += 1;
        health.mark_disconnected(attempts);
        if attempts > config.max_reconnect_attempts {
            error!(
                "[Stream] Giving up after {} reconnect attempts; stream stays down until restart",
                config.max_reconnect_attempts
            );
            break;
        }

        let delay = backoff_delay(attempts);
        info!(
            "[Stream] Reconnecting in {:?} (attempt {}/{})",
            delay, attempts, config.max_reconnect_attempts
        );
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    health.mark_disconnected(health.snapshot().reconnect_attempts);
    info!("[Stream] Supervisor stopped");
}

async fn connect_and_stream(
    config: &StreamConfig,
    health: &StreamHealth,
    event_tx: &mpsc::Sender<StreamEvent>,
    reset: &Notify,
    cancel: &CancellationToken,
    reconnect: bool,
) -> SettlerResult<StreamExit> {
    let ws = Ws::connect(config.ws_url.as_str())
        .await
        .map_err(|e| SettlerError::TransientProvider(format!("ws connect failed: {e}")))?;
    let provider = Provider::new(ws);

    let mut blocks = provider
        .subscribe_blocks()
        .await
        .map_err(SettlerError::from)?;

    let topic0 = ValueOrArray::Array(config.topics.iter().copied().map(Some).collect());
    let filter = Filter::new()
        .address(config.contract_address)
        .topic0(topic0);
    let mut logs = provider
        .subscribe_logs(&filter)
        .await
        .map_err(SettlerError::from)?;

    health.mark_connected();
    info!(
        "[Stream] {} to {} (subscribed to blocks and {} event topic(s))",
        if reconnect { "Reconnected" } else { "Connected" },
        config.ws_url,
        config.topics.len()
    );
    if event_tx
        .send(StreamEvent::Connected { reconnect })
        .await
        .is_err()
    {
        return Ok(StreamExit::Cancelled);
    }

    let mut stale_check = tokio::time::interval(config.check_interval);
    stale_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; consume it so the staleness window
    // starts from connect time.
    stale_check.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                return Ok(StreamExit::Cancelled);
            }
            _ = reset.notified() => {
                return Ok(StreamExit::Disconnected("reset forced by freshness monitor"));
            }
            block = blocks.next() => {
                match block {
                    Some(header) => {
                        let number = header.number.map(|n| n.as_u64()).unwrap_or_default();
                        health.record_block(number);
                        debug!("[Stream] New block {}", number);
                        if event_tx.send(StreamEvent::NewBlock(number)).await.is_err() {
                            return Ok(StreamExit::Cancelled);
                        }
                    }
                    None => return Ok(StreamExit::Disconnected("block subscription closed")),
                }
            }
            log = logs.next() => {
                match log {
                    Some(log) => {
                        if event_tx.send(StreamEvent::Log(log)).await.is_err() {
                            return Ok(StreamExit::Cancelled);
                        }
                    }
                    None => return Ok(StreamExit::Disconnected("log subscription closed")),
                }
            }
            _ = stale_check.tick() => {
                let age = health.block_age();
                if age > config.stale_after {
                    return Ok(StreamExit::Disconnected("no block within the stale window"));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_sequence_is_exponential_and_capped() {
        let delays: Vec<u64> = (1..=8).map(|a| backoff_delay(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn test_backoff_does_not_overflow_on_large_attempt_counts() {
        assert_eq!(backoff_delay(1_000).as_secs(), 30);
    }

    #[test]
    fn test_health_resets_attempts_on_connect() {
        let health = StreamHealth::new();
        health.mark_disconnected(4);
        assert!(!health.connected());
        assert_eq!(health.snapshot().reconnect_attempts, 4);

        health.mark_connected();
        let snap = health.snapshot();
        assert!(snap.connected);
        // Backoff restarts at 1s after a successful reconnect.
        assert_eq!(snap.reconnect_attempts, 0);
        assert_eq!(backoff_delay(1).as_secs(), 1);
    }

    #[test]
    fn test_record_block_updates_snapshot() {
        let health = StreamHealth::new();
        health.record_block(1234);
        let snap = health.snapshot();
        assert_eq!(snap.last_block, 1234);
        assert!(snap.last_block_wall_ms > 0);
        assert!(snap.block_age < Duration::from_secs(5));
    }
}

// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Settlement submission.
//!
//! Anyone may settle a bet, so "another settler got there first" is a normal
//! outcome, not an error: the contract's rejection messages are matched
//! against known idempotence markers and treated as success. Anything else
//! leaves the key in the tracker for the next reconciler tick.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::eth_client::SettleExecutor;
use crate::metrics::SettlerMetrics;
use crate::pending_bets::{BetTracker, PendingBet};

/// Substrings (matched case-insensitively) in contract errors that mean the
/// bet is already settled or no longer exists.
const IDEMPOTENCE_MARKERS: [&str; 3] = ["no valid bet found", "already processed", "executed"];

pub fn is_already_settled(message: &str) -> bool {
    let lower = message.to_lowercase();
    IDEMPOTENCE_MARKERS.iter().any(|m| lower.contains(m))
}

pub struct SettlementDispatcher {
    executor: Arc<dyn SettleExecutor>,
    tracker: Arc<BetTracker>,
    metrics: SettlerMetrics,
}

impl SettlementDispatcher {
    pub fn new(
        executor: Arc<dyn SettleExecutor>,
        tracker: Arc<BetTracker>,
        metrics: SettlerMetrics,
    ) -> Self {
        Self {
            executor,
            tracker,
            metrics,
        }
    }

    /// Submit `settleBet` for one due commitment and settle the tracker
    /// state from the outcome. The tracker lock is only taken to remove the
    /// key, never across the network wait.
    pub async fn dispatch(&self, bet: &PendingBet) {
        let key = bet.key;
        info!(
            "[Dispatcher] Settling bet: key={}, reveal_block={}",
            key, bet.reveal_block
        );
        self.metrics.settlements_submitted.inc();

        match self.executor.settle_bet(key.room_id, key.player).await {
            Ok(outcome) if outcome.success => {
                self.tracker.remove(&key).await;
                self.metrics.settlements_confirmed.inc();
                info!(
                    "[Dispatcher] Settled {}: tx={:#x}, block={:?}",
                    key, outcome.tx_hash, outcome.block_number
                );
            }
            Ok(outcome) => {
                // Reverted on-chain. Usually means another settler's tx and
                // ours raced in the same block; the next observation or tick
                // resolves it.
                self.metrics.settlements_failed.inc();
                warn!(
                    "[Dispatcher] settleBet for {} reverted (tx={:#x}); will retry",
                    key, outcome.tx_hash
                );
            }
            Err(e) => {
                let message = e.to_string();
                if is_already_settled(&message) {
                    self.tracker.remove(&key).await;
                    self.metrics.settlements_already_processed.inc();
                    info!(
                        "[Dispatcher] Bet {} already settled elsewhere ({}); dropping",
                        key, message
                    );
                } else {
                    self.metrics.settlements_failed.inc();
                    error!(
                        "[Dispatcher] settleBet for {} failed: {}; keeping for retry",
                        key, message
                    );
                    if let Ok(state) = self.executor.player_bets(key.room_id, key.player).await {
                        debug!(
                            "[Dispatcher] Contract state for {}: settled={}, commit_block={}",
                            key, state.settled, state.commit_block
                        );
                    }
                }
            }
        }

        self.metrics
            .pending_bets
            .set(self.tracker.pending_count().await as i64);
    }
}

// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Pending-bet map with single-entry-per-key semantics.
//!
//! The tracker is the only owner of the pending set: the ingestor upserts on
//! `BetPlaced` and removes on `BetSettled`, the dispatcher removes after a
//! successful (or success-equivalent) settlement. The reconciler works on
//! snapshots, so entries can be removed concurrently with iteration.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

use super::types::{BetKey, PendingBet};

pub struct BetTracker {
    pending: RwLock<HashMap<BetKey, PendingBet>>,
}

impl BetTracker {
    pub fn new() -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a commitment, replacing any prior entry for the same key.
    /// Returns the replaced entry, if any. A replacement means the prior
    /// commit was settled upstream without us observing the settlement.
    pub async fn upsert(&self, bet: PendingBet) -> Option<PendingBet> {
        let mut pending = self.pending.write().await;
        let replaced = pending.insert(bet.key, bet);
        if let Some(prior) = &replaced {
            debug!(
                "[BetTracker] Replaced prior pending bet for {}: commit_block={}",
                prior.key, prior.commit_block
            );
        }
        replaced
    }

    pub async fn remove(&self, key: &BetKey) -> Option<PendingBet> {
        let mut pending = self.pending.write().await;
        pending.remove(key)
    }

    pub async fn get(&self, key: &BetKey) -> Option<PendingBet> {
        let pending = self.pending.read().await;
        pending.get(key).cloned()
    }

    pub async fn pending_count(&self) -> usize {
        let pending = self.pending.read().await;
        pending.len()
    }

    /// Snapshot of entries whose reveal block has been mined.
    pub async fn due_bets(&self, current_block: u64) -> Vec<PendingBet> {
        let pending = self.pending.read().await;
        pending
            .values()
            .filter(|bet| bet.is_due(current_block))
            .cloned()
            .collect()
    }
}

impl Default for BetTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{Address, H256, U256};
    use std::time::Instant;

    fn bet(room_id: u32, player: Address, reveal_block: u64) -> PendingBet {
        PendingBet {
            key: BetKey::new(room_id, player),
            amount_wei: U256::exp10(15),
            bet_big: true,
            commit_block: reveal_block.saturating_sub(3),
            reveal_block,
            tx_hash: H256::repeat_byte(0xaa),
            observed_at: Instant::now(),
        }
    }

    #[tokio::test]
    async fn test_at_most_one_entry_per_key() {
        let tracker = BetTracker::new();
        let player = Address::repeat_byte(1);

        assert!(tracker.upsert(bet(7, player, 1003)).await.is_none());
        let replaced = tracker.upsert(bet(7, player, 1010)).await;
        assert!(replaced.is_some());
        assert_eq!(replaced.unwrap().reveal_block, 1003);

        assert_eq!(tracker.pending_count().await, 1);
        let current = tracker.get(&BetKey::new(7, player)).await.unwrap();
        assert_eq!(current.reveal_block, 1010);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_collide() {
        let tracker = BetTracker::new();
        tracker.upsert(bet(7, Address::repeat_byte(1), 1003)).await;
        tracker.upsert(bet(7, Address::repeat_byte(2), 1003)).await;
        tracker.upsert(bet(8, Address::repeat_byte(1), 1003)).await;
        assert_eq!(tracker.pending_count().await, 3);
    }

    #[tokio::test]
    async fn test_due_bets_boundary() {
        let tracker = BetTracker::new();
        let player = Address::repeat_byte(1);
        tracker.upsert(bet(7, player, 1003)).await;

        assert!(tracker.due_bets(1002).await.is_empty());
        // Due exactly at the reveal block, and at every block after.
        assert_eq!(tracker.due_bets(1003).await.len(), 1);
        assert_eq!(tracker.due_bets(2000).await.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_returns_entry() {
        let tracker = BetTracker::new();
        let player = Address::repeat_byte(1);
        let key = BetKey::new(7, player);
        tracker.upsert(bet(7, player, 1003)).await;

        let removed = tracker.remove(&key).await.unwrap();
        assert_eq!(removed.key, key);
        assert!(tracker.remove(&key).await.is_none());
        assert_eq!(tracker.pending_count().await, 0);
    }
}

// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Decodes contract logs and fans them out to the event store and the
//! pending-bet tracker.
//!
//! Store failures never stop ingestion: the affected record is skipped and
//! the tracker is still updated, because settlement correctness is anchored
//! in the contract, not in our persistence.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use ethers::abi::RawLog;
use ethers::contract::EthEvent;
use ethers::types::{Log, H256, U256};
use lru::LruCache;
use tracing::{debug, error, info, warn};

use dicebet_pg_db::{EventStore, EventType, NewEventRecord};

use crate::abi::{BetPlacedFilter, BetSettledFilter};
use crate::error::{SettlerError, SettlerResult};
use crate::eth_client::ChainReader;
use crate::metrics::SettlerMetrics;
use crate::pending_bets::{BetKey, BetTracker, PendingBet};
use crate::stream::StreamHealth;

/// Assumed seconds per block for the wall-clock chain-position estimate.
const ESTIMATED_BLOCK_TIME_SECS: u64 = 12;

pub struct EventIngestor {
    chain: Arc<dyn ChainReader>,
    store: Arc<dyn EventStore>,
    tracker: Arc<BetTracker>,
    health: Arc<StreamHealth>,
    metrics: SettlerMetrics,
    reveal_delay: u64,
    /// Recently seen BetSettled transaction hashes. The stream occasionally
    /// delivers the same log twice; bounded so a long-lived process cannot
    /// grow it without limit.
    seen_settlements: Mutex<LruCache<H256, ()>>,
}

impl EventIngestor {
    pub fn new(
        chain: Arc<dyn ChainReader>,
        store: Arc<dyn EventStore>,
        tracker: Arc<BetTracker>,
        health: Arc<StreamHealth>,
        metrics: SettlerMetrics,
        reveal_delay: u64,
        dedupe_capacity: usize,
    ) -> Self {
        let capacity = NonZeroUsize::new(dedupe_capacity.max(1)).expect("capacity is at least 1");
        Self {
            chain,
            store,
            tracker,
            health,
            metrics,
            reveal_delay,
            seen_settlements: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Route a raw log by its topic0. Unknown topics are counted and dropped.
    pub async fn handle_log(&self, log: Log) -> SettlerResult<()> {
        let Some(topic0) = log.topics.first().copied() else {
            self.metrics.undecodable_events.inc();
            return Err(SettlerError::Provider(
                "stream delivered a log without topics".to_string(),
            ));
        };
        if topic0 == BetPlacedFilter::signature() {
            self.on_bet_placed(log).await
        } else if topic0 == BetSettledFilter::signature() {
            self.on_bet_settled(log).await
        } else {
            self.metrics.undecodable_events.inc();
            debug!("[Ingestor] Ignoring log with unknown topic {topic0:#x}");
            Ok(())
        }
    }

    async fn on_bet_placed(&self, log: Log) -> SettlerResult<()> {
        let raw = RawLog::from(log.clone());
        let event = <BetPlacedFilter as EthEvent>::decode_log(&raw).map_err(|e| {
            self.metrics.undecodable_events.inc();
            SettlerError::Provider(format!("undecodable BetPlaced log: {e}"))
        })?;
        self.metrics
            .events_received
            .with_label_values(&["BetPlaced"])
            .inc();

        let key = BetKey::new(event.room_id, event.player);
        let tx_hash = log.transaction_hash.unwrap_or_default();

        // The reconciler waits on the locally observed chain position, not
        // the revealBlock carried by the event: by the time the log arrives
        // the node may already be past the block the contract computed.
        let current_block = self.current_block(&log).await?;
        let reveal_block = current_block + self.reveal_delay;
        let event_reveal_block = event.reveal_block.low_u64();
        if event_reveal_block != reveal_block {
            self.metrics.reveal_block_mismatch.inc();
            debug!(
                "[Ingestor] revealBlock mismatch for {}: event says {}, locally computed {}",
                key, event_reveal_block, reveal_block
            );
        }

        let block_timestamp_ms = self.block_timestamp_or_now(current_block).await;
        let record = NewEventRecord::new(
            EventType::BetPlaced,
            event.room_id,
            format!("{:#x}", event.player),
            current_block,
            block_timestamp_ms,
            log.log_index.map(|i| i.as_u64()).unwrap_or_default(),
            format!("{tx_hash:#x}"),
            epoch_ms(),
        )
        .with_placed_fields(
            event.amount.to_string(),
            event.bet_big,
            event.commit_block.low_u64(),
            // The record keeps the event's own value; disagreements are
            // surfaced through the mismatch counter above.
            event_reveal_block,
        );
        if let Err(e) = self.store.append(record).await {
            self.metrics.store_errors.inc();
            error!("[Ingestor] Failed to persist BetPlaced for {}: {}", key, e);
        }

        let replaced = self
            .tracker
            .upsert(PendingBet {
                key,
                amount_wei: event.amount,
                bet_big: event.bet_big,
                commit_block: event.commit_block.low_u64(),
                reveal_block,
                tx_hash,
                observed_at: Instant::now(),
            })
            .await;
        if replaced.is_some() {
            warn!(
                "[Ingestor] New commit for {} replaced an unsettled entry; prior bet must have been settled upstream",
                key
            );
        }
        self.metrics
            .pending_bets
            .set(self.tracker.pending_count().await as i64);

        info!(
            "[Ingestor] BetPlaced: key={}, amount={}, bet_big={}, commit_block={}, reveal_block={}",
            key,
            event.amount,
            event.bet_big,
            event.commit_block,
            reveal_block
        );
        Ok(())
    }

    async fn on_bet_settled(&self, log: Log) -> SettlerResult<()> {
        let tx_hash = log.transaction_hash.unwrap_or_default();
        if self.is_duplicate_settlement(tx_hash) {
            self.metrics.duplicate_settled_events.inc();
            debug!("[Ingestor] Dropping duplicate BetSettled log, tx={tx_hash:#x}");
            return Ok(());
        }

        let raw = RawLog::from(log.clone());
        let event = <BetSettledFilter as EthEvent>::decode_log(&raw).map_err(|e| {
            self.metrics.undecodable_events.inc();
            SettlerError::Provider(format!("undecodable BetSettled log: {e}"))
        })?;
        self.metrics
            .events_received
            .with_label_values(&["BetSettled"])
            .inc();

        let key = BetKey::new(event.room_id, event.player);

        // The settled event's amount is the reward (zero on a loss); the
        // stake comes from the pending commit when we observed it.
        let prior = self.tracker.remove(&key).await;
        self.metrics
            .pending_bets
            .set(self.tracker.pending_count().await as i64);
        match &prior {
            Some(bet) => info!(
                "[Ingestor] BetSettled: key={}, won={}, hash_value={}, reward={}, stake={}, bet_big={}",
                key, event.won, event.hash_value, event.amount, bet.amount_wei, bet.bet_big
            ),
            None => info!(
                "[Ingestor] BetSettled for unknown commit: key={}, won={}, hash_value={}, reward={}",
                key, event.won, event.hash_value, event.amount
            ),
        }

        let block_number = match log.block_number {
            Some(n) => n.as_u64(),
            None => self.current_block(&log).await?,
        };
        let block_timestamp_ms = self.block_timestamp_or_now(block_number).await;
        let reward = if event.won { event.amount } else { U256::zero() };
        let record = NewEventRecord::new(
            EventType::BetSettled,
            event.room_id,
            format!("{:#x}", event.player),
            block_number,
            block_timestamp_ms,
            log.log_index.map(|i| i.as_u64()).unwrap_or_default(),
            format!("{tx_hash:#x}"),
            epoch_ms(),
        )
        .with_settled_fields(
            reward.to_string(),
            event.won,
            event.hash_value,
            format!("{:#x}", H256::from(event.block_hash)),
            prior.as_ref().map(|bet| bet.reveal_block),
            event.bet_id.low_u64() as i64,
        );

        let settled_id = match self.store.append(record).await {
            Ok(id) => id,
            Err(e) => {
                self.metrics.store_errors.inc();
                error!("[Ingestor] Failed to persist BetSettled for {}: {}", key, e);
                return Ok(());
            }
        };

        self.correlate(key, settled_id).await;
        Ok(())
    }

    /// Link a settlement row to the most recent unlinked commit for the same
    /// key. A missing commit (e.g. placed before a restart of this process
    /// AND never persisted) leaves an orphan record, which is acceptable.
    async fn correlate(&self, key: BetKey, settled_id: i64) {
        let player = format!("{:#x}", key.player);
        match self
            .store
            .latest_unprocessed_placed(key.room_id, &player)
            .await
        {
            Ok(Some(placed)) => {
                if let Err(e) = self.store.link_events(placed.id, settled_id).await {
                    self.metrics.store_errors.inc();
                    error!("[Ingestor] Failed to link events for {}: {}", key, e);
                } else {
                    debug!(
                        "[Ingestor] Linked BetSettled #{} to BetPlaced #{} for {}",
                        settled_id, placed.id, key
                    );
                }
            }
            Ok(None) => {
                self.metrics.orphan_settlements.inc();
                warn!(
                    "[Ingestor] No BetPlaced to correlate for {}; settlement #{} stays orphaned",
                    key, settled_id
                );
            }
            Err(e) => {
                self.metrics.store_errors.inc();
                error!("[Ingestor] Correlation lookup failed for {}: {}", key, e);
            }
        }
    }

    fn is_duplicate_settlement(&self, tx_hash: H256) -> bool {
        let mut seen = match self.seen_settlements.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        seen.put(tx_hash, ()).is_some()
    }

    /// Local view of the chain position for a log: the log's own block
    /// number, else a live query, else (as a last resort) a wall-clock
    /// estimate of how far the chain has advanced since the last heartbeat.
    async fn current_block(&self, log: &Log) -> SettlerResult<u64> {
        if let Some(number) = log.block_number {
            return Ok(number.as_u64());
        }
        match self.chain.block_number().await {
            Ok(number) => Ok(number),
            Err(e) => {
                let last_seen = self.health.last_block();
                if last_seen == 0 {
                    return Err(e);
                }
                let elapsed_secs = self.health.block_age().as_secs();
                let estimate = last_seen + elapsed_secs / ESTIMATED_BLOCK_TIME_SECS;
                warn!(
                    "[Ingestor] block_number query failed ({}); estimating block {} from heartbeat block {} plus {}s of wall clock",
                    e, estimate, last_seen, elapsed_secs
                );
                Ok(estimate)
            }
        }
    }

    async fn block_timestamp_or_now(&self, block_number: u64) -> u64 {
        match self.chain.block_timestamp_ms(block_number).await {
            Ok(ts) => ts,
            Err(e) => {
                warn!(
                    "[Ingestor] Failed to fetch header for block {}: {}; using wall clock",
                    block_number, e
                );
                epoch_ms()
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{bet_placed_log, bet_settled_log, MockChain};
    use dicebet_pg_db::memory::MemoryEventStore;
    use ethers::types::Address;

    struct Fixture {
        ingestor: EventIngestor,
        store: Arc<MemoryEventStore>,
        tracker: Arc<BetTracker>,
        chain: Arc<MockChain>,
        health: Arc<StreamHealth>,
    }

    fn fixture(current_block: u64, reveal_delay: u64) -> Fixture {
        let store = Arc::new(MemoryEventStore::new());
        let tracker = Arc::new(BetTracker::new());
        let chain = Arc::new(MockChain::new(current_block));
        let health = Arc::new(StreamHealth::new());
        let ingestor = EventIngestor::new(
            chain.clone(),
            store.clone(),
            tracker.clone(),
            health.clone(),
            SettlerMetrics::new_for_testing(),
            reveal_delay,
            16,
        );
        Fixture {
            ingestor,
            store,
            tracker,
            chain,
            health,
        }
    }

    #[tokio::test]
    async fn test_bet_placed_creates_pending_with_local_reveal_block() {
        let f = fixture(1000, 3);
        let player = Address::repeat_byte(0xab);
        let log = bet_placed_log(
            7,
            player,
            U256::exp10(15),
            true,
            1000,
            1003,
            1000,
            H256::repeat_byte(0x01),
        );

        f.ingestor.handle_log(log).await.unwrap();

        let pending = f.tracker.get(&BetKey::new(7, player)).await.unwrap();
        assert_eq!(pending.reveal_block, 1003);
        assert_eq!(pending.commit_block, 1000);
        assert!(pending.bet_big);
        assert_eq!(pending.amount_wei, U256::exp10(15));

        let records = f.store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_type, "BetPlaced");
        assert_eq!(records[0].room_id, 7);
        assert_eq!(records[0].reveal_block, Some(1003));
        assert_eq!(records[0].amount_wei.as_deref(), Some("1000000000000000"));
        assert!(!records[0].processed);
    }

    #[tokio::test]
    async fn test_bet_placed_reconciles_on_local_block_when_event_lags() {
        // The event carries revealBlock computed at commit time; if the log
        // only reaches us at block 1005 the local value wins for waiting.
        let f = fixture(1005, 3);
        let player = Address::repeat_byte(0xab);
        let log = bet_placed_log(
            7,
            player,
            U256::exp10(15),
            false,
            1000,
            1003,
            1005,
            H256::repeat_byte(0x02),
        );

        f.ingestor.handle_log(log).await.unwrap();

        let pending = f.tracker.get(&BetKey::new(7, player)).await.unwrap();
        assert_eq!(pending.reveal_block, 1008);
        // The record keeps the event's own value.
        assert_eq!(f.store.records()[0].reveal_block, Some(1003));
    }

    #[tokio::test]
    async fn test_bet_placed_falls_back_to_live_block_query() {
        // No block number on the log itself: the live read path answers.
        let f = fixture(1005, 3);
        let player = Address::repeat_byte(0xab);
        let mut log = bet_placed_log(
            7,
            player,
            U256::exp10(15),
            true,
            1005,
            1008,
            1005,
            H256::repeat_byte(0x03),
        );
        log.block_number = None;

        f.ingestor.handle_log(log).await.unwrap();

        let pending = f.tracker.get(&BetKey::new(7, player)).await.unwrap();
        assert_eq!(pending.reveal_block, 1008);
        assert!(f.chain.block_queries() > 0);
    }

    #[tokio::test]
    async fn test_bet_placed_estimates_block_from_wall_clock_as_last_resort() {
        // No block number on the log AND the read path is down: the chain
        // position is extrapolated from the last heartbeat block by wall
        // clock. With no measurable elapsed time the estimate is the
        // heartbeat block itself.
        let f = fixture(1005, 3);
        let player = Address::repeat_byte(0xab);
        f.health.record_block(2000);
        f.chain.set_failing(true);
        let mut log = bet_placed_log(
            7,
            player,
            U256::exp10(15),
            true,
            2000,
            2003,
            2000,
            H256::repeat_byte(0x04),
        );
        log.block_number = None;

        f.ingestor.handle_log(log).await.unwrap();

        let pending = f.tracker.get(&BetKey::new(7, player)).await.unwrap();
        assert_eq!(pending.reveal_block, 2003);
    }

    #[tokio::test]
    async fn test_bet_placed_fails_without_any_chain_position() {
        // No log block number, read path down, and no heartbeat seen yet:
        // there is nothing to estimate from.
        let f = fixture(1005, 3);
        let player = Address::repeat_byte(0xab);
        f.chain.set_failing(true);
        let mut log = bet_placed_log(
            7,
            player,
            U256::exp10(15),
            true,
            1005,
            1008,
            1005,
            H256::repeat_byte(0x05),
        );
        log.block_number = None;

        assert!(f.ingestor.handle_log(log).await.is_err());
        assert_eq!(f.tracker.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_second_commit_replaces_prior_entry() {
        let f = fixture(1000, 3);
        let player = Address::repeat_byte(0xab);
        f.ingestor
            .handle_log(bet_placed_log(
                7,
                player,
                U256::exp10(15),
                true,
                1000,
                1003,
                1000,
                H256::repeat_byte(0x01),
            ))
            .await
            .unwrap();
        f.ingestor
            .handle_log(bet_placed_log(
                7,
                player,
                U256::exp10(16),
                false,
                1010,
                1013,
                1010,
                H256::repeat_byte(0x02),
            ))
            .await
            .unwrap();

        assert_eq!(f.tracker.pending_count().await, 1);
        let pending = f.tracker.get(&BetKey::new(7, player)).await.unwrap();
        assert_eq!(pending.reveal_block, 1013);
        assert_eq!(pending.amount_wei, U256::exp10(16));
    }

    #[tokio::test]
    async fn test_settled_removes_pending_and_links_records() {
        let f = fixture(1000, 3);
        let player = Address::repeat_byte(0xab);
        f.ingestor
            .handle_log(bet_placed_log(
                7,
                player,
                U256::exp10(15),
                true,
                1000,
                1003,
                1000,
                H256::repeat_byte(0x01),
            ))
            .await
            .unwrap();
        f.ingestor
            .handle_log(bet_settled_log(
                7,
                player,
                U256::from(2_000_000_000_000_000u64),
                true,
                7,
                42,
                1003,
                H256::repeat_byte(0x02),
            ))
            .await
            .unwrap();

        // Within the same handling pass the key is gone.
        assert_eq!(f.tracker.pending_count().await, 0);

        let records = f.store.records();
        assert_eq!(records.len(), 2);
        let placed = &records[0];
        let settled = &records[1];
        assert_eq!(placed.related_event_id, Some(settled.id));
        assert_eq!(settled.related_event_id, Some(placed.id));
        assert!(placed.processed && settled.processed);
        assert_eq!(settled.won, Some(true));
        assert_eq!(settled.hash_value, Some(7));
        assert_eq!(settled.bet_id, Some(42));
        // resultBlock comes from the pending commit's reveal block.
        assert_eq!(settled.result_block, Some(1003));
        assert!(placed.block_number <= settled.block_number);
    }

    #[tokio::test]
    async fn test_duplicate_settled_log_appends_once() {
        let f = fixture(1000, 3);
        let player = Address::repeat_byte(0xab);
        let tx_hash = H256::repeat_byte(0x09);
        let log = bet_settled_log(7, player, U256::zero(), false, 2, 43, 1003, tx_hash);

        f.ingestor.handle_log(log.clone()).await.unwrap();
        f.ingestor.handle_log(log).await.unwrap();

        let settled: Vec<_> = f
            .store
            .records()
            .into_iter()
            .filter(|r| r.event_type == "BetSettled")
            .collect();
        assert_eq!(settled.len(), 1);
    }

    #[tokio::test]
    async fn test_orphan_settlement_is_persisted_unlinked() {
        let f = fixture(1000, 3);
        let player = Address::repeat_byte(0xab);
        f.ingestor
            .handle_log(bet_settled_log(
                7,
                player,
                U256::zero(),
                false,
                1,
                44,
                1003,
                H256::repeat_byte(0x0a),
            ))
            .await
            .unwrap();

        let records = f.store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_type, "BetSettled");
        assert_eq!(records[0].related_event_id, None);
        assert!(!records[0].processed);
        // Loss: reward is stored as zero.
        assert_eq!(records[0].reward_wei.as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn test_settlement_links_to_commit_persisted_before_restart() {
        // The commit row survives a restart even though the in-memory
        // pending set does not; a later settlement still finds it.
        let f = fixture(1050, 3);
        let player = Address::repeat_byte(0xab);
        let pre_restart = dicebet_pg_db::NewEventRecord::new(
            dicebet_pg_db::EventType::BetPlaced,
            7,
            format!("{player:#x}"),
            1000,
            1_000_000,
            0,
            format!("{:#x}", H256::repeat_byte(0x01)),
            1_000_000,
        )
        .with_placed_fields("1000000000000000".to_string(), true, 1000, 1003);
        let placed_id = f.store.append(pre_restart).await.unwrap();

        f.ingestor
            .handle_log(bet_settled_log(
                7,
                player,
                U256::from(2_000_000_000_000_000u64),
                true,
                9,
                45,
                1050,
                H256::repeat_byte(0x0b),
            ))
            .await
            .unwrap();

        let rows = f.store.records();
        let settled = rows.iter().find(|r| r.event_type == "BetSettled").unwrap();
        let placed = rows.iter().find(|r| r.id == placed_id).unwrap();
        assert_eq!(placed.related_event_id, Some(settled.id));
        assert_eq!(settled.related_event_id, Some(placed_id));
        assert!(placed.processed && settled.processed);
        // No pending entry existed, so resultBlock is unknown.
        assert_eq!(settled.result_block, None);
    }

    #[tokio::test]
    async fn test_unknown_topic_is_ignored() {
        let f = fixture(1000, 3);
        let log = Log {
            topics: vec![H256::repeat_byte(0xff)],
            ..Default::default()
        };
        f.ingestor.handle_log(log).await.unwrap();
        assert!(f.store.records().is_empty());
        assert_eq!(f.tracker.pending_count().await, 0);
    }
}

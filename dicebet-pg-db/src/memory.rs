// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory [`EventStore`] for tests and local development.
//!
//! Mirrors the Postgres implementation's observable behavior, including the
//! "most recent unprocessed commit" ordering used for correlation.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::models::{EventRecord, EventType, NewEventRecord};
use crate::store::{EventQuery, EventStore, StoreError};

#[derive(Default)]
pub struct MemoryEventStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    records: Vec<EventRecord>,
    next_id: i64,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all rows, in insertion order.
    pub fn records(&self) -> Vec<EventRecord> {
        self.inner.lock().expect("store lock poisoned").records.clone()
    }

    fn matches(record: &EventRecord, query: &EventQuery) -> bool {
        if let Some(event_type) = query.event_type {
            if record.event_type != event_type.as_str() {
                return false;
            }
        }
        if let Some(room_id) = query.room_id {
            if record.room_id != room_id as i64 {
                return false;
            }
        }
        if let Some(player) = &query.player {
            if &record.player != player {
                return false;
            }
        }
        if let Some(processed) = query.processed {
            if record.processed != processed {
                return false;
            }
        }
        if let Some(bet_id) = query.bet_id {
            if record.bet_id != Some(bet_id) {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(&self, record: NewEventRecord) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner.next_id += 1;
        let id = inner.next_id;
        inner.records.push(EventRecord {
            id,
            event_type: record.event_type,
            room_id: record.room_id,
            player: record.player,
            block_number: record.block_number,
            block_timestamp_ms: record.block_timestamp_ms,
            log_index: record.log_index,
            transaction_hash: record.transaction_hash,
            amount_wei: record.amount_wei,
            bet_big: record.bet_big,
            commit_block: record.commit_block,
            reveal_block: record.reveal_block,
            reward_wei: record.reward_wei,
            won: record.won,
            hash_value: record.hash_value,
            block_hash: record.block_hash,
            result_block: record.result_block,
            bet_id: record.bet_id,
            related_event_id: record.related_event_id,
            processed: record.processed,
            created_at_ms: record.created_at_ms,
        });
        Ok(id)
    }

    async fn latest_unprocessed_placed(
        &self,
        room_id: u32,
        player: &str,
    ) -> Result<Option<EventRecord>, StoreError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        let record = inner
            .records
            .iter()
            .filter(|r| {
                r.event_type == EventType::BetPlaced.as_str()
                    && r.room_id == room_id as i64
                    && r.player == player
                    && !r.processed
            })
            .max_by_key(|r| (r.block_number, r.id))
            .cloned();
        Ok(record)
    }

    async fn link_events(&self, placed_id: i64, settled_id: i64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        for record in inner.records.iter_mut() {
            if record.id == placed_id {
                record.related_event_id = Some(settled_id);
                record.processed = true;
            } else if record.id == settled_id {
                record.related_event_id = Some(placed_id);
                record.processed = true;
            }
        }
        Ok(())
    }

    async fn count(&self, query: &EventQuery) -> Result<i64, StoreError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner
            .records
            .iter()
            .filter(|r| Self::matches(r, query))
            .count() as i64)
    }

    async fn find(
        &self,
        query: &EventQuery,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<EventRecord>, StoreError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        let mut records: Vec<EventRecord> = inner
            .records
            .iter()
            .filter(|r| Self::matches(r, query))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.block_number.cmp(&a.block_number).then(b.id.cmp(&a.id)));
        Ok(records
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<EventRecord>, StoreError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner
            .records
            .iter()
            .filter(|r| ids.contains(&r.id))
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placed(room_id: u32, player: &str, block_number: u64) -> NewEventRecord {
        NewEventRecord::new(
            EventType::BetPlaced,
            room_id,
            player.to_string(),
            block_number,
            block_number * 1_000,
            0,
            format!("0x{:064x}", block_number),
            block_number * 1_000,
        )
        .with_placed_fields("1000000000000000".to_string(), true, block_number, block_number + 3)
    }

    fn settled(room_id: u32, player: &str, block_number: u64) -> NewEventRecord {
        NewEventRecord::new(
            EventType::BetSettled,
            room_id,
            player.to_string(),
            block_number,
            block_number * 1_000,
            1,
            format!("0xaa{:062x}", block_number),
            block_number * 1_000,
        )
        .with_settled_fields(
            "2000000000000000".to_string(),
            true,
            7,
            format!("0xbb{:062x}", block_number),
            Some(block_number),
            42,
        )
    }

    #[tokio::test]
    async fn test_append_assigns_increasing_ids() {
        let store = MemoryEventStore::new();
        let a = store.append(placed(1, "0xab", 100)).await.unwrap();
        let b = store.append(placed(2, "0xcd", 101)).await.unwrap();
        assert!(b > a);
        assert_eq!(store.records().len(), 2);
    }

    #[tokio::test]
    async fn test_latest_unprocessed_placed_prefers_highest_block() {
        let store = MemoryEventStore::new();
        store.append(placed(7, "0xab", 100)).await.unwrap();
        let newest = store.append(placed(7, "0xab", 105)).await.unwrap();
        store.append(placed(7, "0xcd", 110)).await.unwrap();

        let found = store
            .latest_unprocessed_placed(7, "0xab")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, newest);
        assert_eq!(found.block_number, 105);
    }

    #[tokio::test]
    async fn test_link_events_is_symmetric_and_marks_processed() {
        let store = MemoryEventStore::new();
        let placed_id = store.append(placed(7, "0xab", 100)).await.unwrap();
        let settled_id = store.append(settled(7, "0xab", 103)).await.unwrap();

        store.link_events(placed_id, settled_id).await.unwrap();

        let rows = store.find_by_ids(&[placed_id, settled_id]).await.unwrap();
        let placed_row = rows.iter().find(|r| r.id == placed_id).unwrap();
        let settled_row = rows.iter().find(|r| r.id == settled_id).unwrap();
        assert_eq!(placed_row.related_event_id, Some(settled_id));
        assert_eq!(settled_row.related_event_id, Some(placed_id));
        assert!(placed_row.processed);
        assert!(settled_row.processed);
        // Linked pairs agree on key and ordering.
        assert_eq!(placed_row.room_id, settled_row.room_id);
        assert_eq!(placed_row.player, settled_row.player);
        assert!(placed_row.block_number <= settled_row.block_number);

        // Once linked, the commit no longer matches the correlation query.
        assert!(store
            .latest_unprocessed_placed(7, "0xab")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_count_and_find_with_filters() {
        let store = MemoryEventStore::new();
        store.append(placed(7, "0xab", 100)).await.unwrap();
        store.append(placed(8, "0xab", 101)).await.unwrap();
        store.append(settled(7, "0xab", 103)).await.unwrap();

        let by_type = EventQuery {
            event_type: Some(EventType::BetPlaced),
            ..Default::default()
        };
        assert_eq!(store.count(&by_type).await.unwrap(), 2);

        let by_player = EventQuery {
            player: Some("0xab".to_string()),
            ..Default::default()
        };
        let found = store.find(&by_player, 0, 10).await.unwrap();
        assert_eq!(found.len(), 3);
        // Descending block order.
        assert_eq!(found[0].block_number, 103);

        let paged = store.find(&by_player, 1, 1).await.unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].block_number, 101);
    }

    #[tokio::test]
    async fn test_duplicate_log_positions_are_tolerated() {
        // Same (block_number, log_index) twice: no uniqueness is enforced.
        let store = MemoryEventStore::new();
        store.append(placed(7, "0xab", 100)).await.unwrap();
        store.append(placed(7, "0xab", 100)).await.unwrap();
        assert_eq!(store.records().len(), 2);
    }
}

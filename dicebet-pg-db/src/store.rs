// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The event store interface and its Postgres implementation.
//!
//! Writers are the settler's ingestor (append + link); the per-player query
//! surface served elsewhere reads through `count`/`find`/`find_by_ids`.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};

use crate::models::{EventRecord, EventType, NewEventRecord};
use crate::schema::bet_events;
use crate::Db;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("database error: {0}")]
    Database(String),
}

impl From<diesel::result::Error> for StoreError {
    fn from(e: diesel::result::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Filter for `count`/`find`. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub event_type: Option<EventType>,
    pub room_id: Option<u32>,
    pub player: Option<String>,
    pub processed: Option<bool>,
    pub bet_id: Option<i64>,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append a decoded event, returning its assigned id.
    async fn append(&self, record: NewEventRecord) -> Result<i64, StoreError>;

    /// The most recent unlinked `BetPlaced` row for `(room_id, player)`,
    /// by descending block number.
    async fn latest_unprocessed_placed(
        &self,
        room_id: u32,
        player: &str,
    ) -> Result<Option<EventRecord>, StoreError>;

    /// Symmetrically link a commit row to its settlement row and mark both
    /// processed. The two updates land in one transaction.
    async fn link_events(&self, placed_id: i64, settled_id: i64) -> Result<(), StoreError>;

    async fn count(&self, query: &EventQuery) -> Result<i64, StoreError>;

    /// Matching rows ordered by descending block number.
    async fn find(
        &self,
        query: &EventQuery,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<EventRecord>, StoreError>;

    async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<EventRecord>, StoreError>;

    /// Store liveness probe for the health surface.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Production store over the shared [`Db`] pool.
#[derive(Clone)]
pub struct PgEventStore {
    db: Db,
}

impl PgEventStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    fn filtered(query: &EventQuery) -> bet_events::BoxedQuery<'static, diesel::pg::Pg> {
        let mut q = bet_events::table.into_boxed();
        if let Some(event_type) = query.event_type {
            q = q.filter(bet_events::event_type.eq(event_type.as_str()));
        }
        if let Some(room_id) = query.room_id {
            q = q.filter(bet_events::room_id.eq(room_id as i64));
        }
        if let Some(player) = &query.player {
            q = q.filter(bet_events::player.eq(player.clone()));
        }
        if let Some(processed) = query.processed {
            q = q.filter(bet_events::processed.eq(processed));
        }
        if let Some(bet_id) = query.bet_id {
            q = q.filter(bet_events::bet_id.eq(bet_id));
        }
        q
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn append(&self, record: NewEventRecord) -> Result<i64, StoreError> {
        let mut conn = self
            .db
            .connect()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let id = diesel::insert_into(bet_events::table)
            .values(&record)
            .returning(bet_events::id)
            .get_result::<i64>(&mut conn)
            .await?;
        Ok(id)
    }

    async fn latest_unprocessed_placed(
        &self,
        room_id: u32,
        player: &str,
    ) -> Result<Option<EventRecord>, StoreError> {
        let mut conn = self
            .db
            .connect()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let record = bet_events::table
            .filter(bet_events::event_type.eq(EventType::BetPlaced.as_str()))
            .filter(bet_events::room_id.eq(room_id as i64))
            .filter(bet_events::player.eq(player))
            .filter(bet_events::processed.eq(false))
            .order(bet_events::block_number.desc())
            .first::<EventRecord>(&mut conn)
            .await
            .optional()?;
        Ok(record)
    }

    async fn link_events(&self, placed_id: i64, settled_id: i64) -> Result<(), StoreError> {
        let mut conn = self
            .db
            .connect()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            async move {
                diesel::update(bet_events::table.find(placed_id))
                    .set((
                        bet_events::related_event_id.eq(settled_id),
                        bet_events::processed.eq(true),
                    ))
                    .execute(conn)
                    .await?;
                diesel::update(bet_events::table.find(settled_id))
                    .set((
                        bet_events::related_event_id.eq(placed_id),
                        bet_events::processed.eq(true),
                    ))
                    .execute(conn)
                    .await?;
                Ok(())
            }
            .scope_boxed()
        })
        .await?;
        Ok(())
    }

    async fn count(&self, query: &EventQuery) -> Result<i64, StoreError> {
        let mut conn = self
            .db
            .connect()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let total = Self::filtered(query)
            .count()
            .get_result::<i64>(&mut conn)
            .await?;
        Ok(total)
    }

    async fn find(
        &self,
        query: &EventQuery,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<EventRecord>, StoreError> {
        let mut conn = self
            .db
            .connect()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let records = Self::filtered(query)
            .order(bet_events::block_number.desc())
            .offset(offset)
            .limit(limit)
            .load::<EventRecord>(&mut conn)
            .await?;
        Ok(records)
    }

    async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<EventRecord>, StoreError> {
        let mut conn = self
            .db
            .connect()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let records = bet_events::table
            .filter(bet_events::id.eq_any(ids.to_vec()))
            .load::<EventRecord>(&mut conn)
            .await?;
        Ok(records)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self
            .db
            .connect()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        diesel::sql_query("SELECT 1").execute(&mut conn).await?;
        Ok(())
    }
}

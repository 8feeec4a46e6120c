// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Row models for the `bet_events` table.

use std::fmt;

use diesel::prelude::*;

use crate::schema::bet_events;

/// Discriminator for the two event kinds recorded by the settler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    BetPlaced,
    BetSettled,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::BetPlaced => "BetPlaced",
            EventType::BetSettled => "BetSettled",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted event row.
///
/// `BetPlaced` rows populate `amount_wei`/`bet_big`/`commit_block`/
/// `reveal_block`; `BetSettled` rows populate `reward_wei`/`won`/
/// `hash_value`/`block_hash`/`result_block`/`bet_id`. `related_event_id`
/// links a settlement to its originating commit (and vice versa) once
/// correlation succeeds, at which point both rows carry `processed = true`.
#[derive(Debug, Clone, PartialEq, Queryable)]
pub struct EventRecord {
    pub id: i64,
    pub event_type: String,
    pub room_id: i64,
    pub player: String,
    pub block_number: i64,
    pub block_timestamp_ms: i64,
    pub log_index: i64,
    pub transaction_hash: String,
    pub amount_wei: Option<String>,
    pub bet_big: Option<bool>,
    pub commit_block: Option<i64>,
    pub reveal_block: Option<i64>,
    pub reward_wei: Option<String>,
    pub won: Option<bool>,
    pub hash_value: Option<i16>,
    pub block_hash: Option<String>,
    pub result_block: Option<i64>,
    pub bet_id: Option<i64>,
    pub related_event_id: Option<i64>,
    pub processed: bool,
    pub created_at_ms: i64,
}

/// Insertable form of [`EventRecord`]; the `id` is assigned by the store.
#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = bet_events)]
pub struct NewEventRecord {
    pub event_type: String,
    pub room_id: i64,
    pub player: String,
    pub block_number: i64,
    pub block_timestamp_ms: i64,
    pub log_index: i64,
    pub transaction_hash: String,
    pub amount_wei: Option<String>,
    pub bet_big: Option<bool>,
    pub commit_block: Option<i64>,
    pub reveal_block: Option<i64>,
    pub reward_wei: Option<String>,
    pub won: Option<bool>,
    pub hash_value: Option<i16>,
    pub block_hash: Option<String>,
    pub result_block: Option<i64>,
    pub bet_id: Option<i64>,
    pub related_event_id: Option<i64>,
    pub processed: bool,
    pub created_at_ms: i64,
}

impl NewEventRecord {
    /// Common fields shared by both event kinds; per-kind columns start out
    /// empty and are filled by the builder methods below.
    pub fn new(
        event_type: EventType,
        room_id: u32,
        player: String,
        block_number: u64,
        block_timestamp_ms: u64,
        log_index: u64,
        transaction_hash: String,
        created_at_ms: u64,
    ) -> Self {
        Self {
            event_type: event_type.as_str().to_string(),
            room_id: room_id as i64,
            player,
            block_number: block_number as i64,
            block_timestamp_ms: block_timestamp_ms as i64,
            log_index: log_index as i64,
            transaction_hash,
            amount_wei: None,
            bet_big: None,
            commit_block: None,
            reveal_block: None,
            reward_wei: None,
            won: None,
            hash_value: None,
            block_hash: None,
            result_block: None,
            bet_id: None,
            related_event_id: None,
            processed: false,
            created_at_ms: created_at_ms as i64,
        }
    }

    pub fn with_placed_fields(
        mut self,
        amount_wei: String,
        bet_big: bool,
        commit_block: u64,
        reveal_block: u64,
    ) -> Self {
        self.amount_wei = Some(amount_wei);
        self.bet_big = Some(bet_big);
        self.commit_block = Some(commit_block as i64);
        self.reveal_block = Some(reveal_block as i64);
        self
    }

    pub fn with_settled_fields(
        mut self,
        reward_wei: String,
        won: bool,
        hash_value: u8,
        block_hash: String,
        result_block: Option<u64>,
        bet_id: i64,
    ) -> Self {
        self.reward_wei = Some(reward_wei);
        self.won = Some(won);
        self.hash_value = Some(hash_value as i16);
        self.block_hash = Some(block_hash);
        self.result_block = result_block.map(|b| b as i64);
        self.bet_id = Some(bet_id);
        self
    }
}

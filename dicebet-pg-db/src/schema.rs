// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

diesel::table! {
    bet_events (id) {
        id -> Int8,
        event_type -> Text,
        room_id -> Int8,
        player -> Text,
        block_number -> Int8,
        block_timestamp_ms -> Int8,
        log_index -> Int8,
        transaction_hash -> Text,
        amount_wei -> Nullable<Text>,
        bet_big -> Nullable<Bool>,
        commit_block -> Nullable<Int8>,
        reveal_block -> Nullable<Int8>,
        reward_wei -> Nullable<Text>,
        won -> Nullable<Bool>,
        hash_value -> Nullable<Int2>,
        block_hash -> Nullable<Text>,
        result_block -> Nullable<Int8>,
        bet_id -> Nullable<Int8>,
        related_event_id -> Nullable<Int8>,
        processed -> Bool,
        created_at_ms -> Int8,
    }
}

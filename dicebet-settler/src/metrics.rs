// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, IntCounter, IntCounterVec, IntGauge, Registry,
};

#[derive(Clone, Debug)]
pub struct SettlerMetrics {
    pub(crate) events_received: IntCounterVec,
    pub(crate) undecodable_events: IntCounter,
    pub(crate) duplicate_settled_events: IntCounter,
    pub(crate) settlements_submitted: IntCounter,
    pub(crate) settlements_confirmed: IntCounter,
    pub(crate) settlements_already_processed: IntCounter,
    pub(crate) settlements_failed: IntCounter,
    pub(crate) pending_bets: IntGauge,
    pub(crate) stream_reconnects: IntCounter,
    pub(crate) last_observed_block: IntGauge,
    pub(crate) reveal_block_mismatch: IntCounter,
    pub(crate) orphan_settlements: IntCounter,
    pub(crate) store_errors: IntCounter,
    pub(crate) processing_errors: IntCounterVec,
}

impl SettlerMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            events_received: register_int_counter_vec_with_registry!(
                "settler_events_received_total",
                "Decoded contract events received from the stream, by type",
                &["event"],
                registry,
            )
            .unwrap(),
            undecodable_events: register_int_counter_with_registry!(
                "settler_undecodable_events_total",
                "Logs that matched the subscription filter but failed to decode",
                registry,
            )
            .unwrap(),
            duplicate_settled_events: register_int_counter_with_registry!(
                "settler_duplicate_settled_events_total",
                "BetSettled logs dropped by the transaction-hash dedupe",
                registry,
            )
            .unwrap(),
            settlements_submitted: register_int_counter_with_registry!(
                "settler_settlements_submitted_total",
                "settleBet transactions submitted",
                registry,
            )
            .unwrap(),
            settlements_confirmed: register_int_counter_with_registry!(
                "settler_settlements_confirmed_total",
                "settleBet transactions confirmed with status 1",
                registry,
            )
            .unwrap(),
            settlements_already_processed: register_int_counter_with_registry!(
                "settler_settlements_already_processed_total",
                "Settlement calls rejected because another party settled first",
                registry,
            )
            .unwrap(),
            settlements_failed: register_int_counter_with_registry!(
                "settler_settlements_failed_total",
                "Settlement attempts that failed and will be retried",
                registry,
            )
            .unwrap(),
            pending_bets: register_int_gauge_with_registry!(
                "settler_pending_bets",
                "Commitments currently awaiting settlement",
                registry,
            )
            .unwrap(),
            stream_reconnects: register_int_counter_with_registry!(
                "settler_stream_reconnects_total",
                "Successful stream reconnections",
                registry,
            )
            .unwrap(),
            last_observed_block: register_int_gauge_with_registry!(
                "settler_last_observed_block",
                "Most recent block number seen on the stream heartbeat",
                registry,
            )
            .unwrap(),
            reveal_block_mismatch: register_int_counter_with_registry!(
                "settler_reveal_block_mismatch_total",
                "BetPlaced events whose revealBlock disagreed with the locally computed value",
                registry,
            )
            .unwrap(),
            orphan_settlements: register_int_counter_with_registry!(
                "settler_orphan_settlements_total",
                "BetSettled records with no matching BetPlaced to link",
                registry,
            )
            .unwrap(),
            store_errors: register_int_counter_with_registry!(
                "settler_store_errors_total",
                "Event store operations that failed and were skipped",
                registry,
            )
            .unwrap(),
            processing_errors: register_int_counter_vec_with_registry!(
                "settler_processing_errors_total",
                "Event-handling failures that were logged and swallowed, by kind",
                &["kind"],
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        Self::new(&Registry::new())
    }
}

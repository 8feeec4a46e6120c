// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory tracking of commitments awaiting settlement.

mod tracker;
mod types;

pub use tracker::BetTracker;
pub use types::{BetKey, PendingBet};

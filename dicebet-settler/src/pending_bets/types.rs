// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::time::Instant;

use ethers::types::{Address, H256, U256};

/// Unique identifier for an open bet. The contract enforces at most one open
/// bet per `(roomId, player)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BetKey {
    pub room_id: u32,
    pub player: Address,
}

impl BetKey {
    pub fn new(room_id: u32, player: Address) -> Self {
        Self { room_id, player }
    }
}

impl fmt::Display for BetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:#x}", self.room_id, self.player)
    }
}

/// A commitment observed on-chain, waiting for its reveal block.
#[derive(Debug, Clone)]
pub struct PendingBet {
    pub key: BetKey,
    /// Stake in wei.
    pub amount_wei: U256,
    pub bet_big: bool,
    pub commit_block: u64,
    /// Locally computed reveal block the reconciler waits on. May differ
    /// from the value carried by the event if the local node lags.
    pub reveal_block: u64,
    pub tx_hash: H256,
    pub observed_at: Instant,
}

impl PendingBet {
    pub fn is_due(&self, current_block: u64) -> bool {
        current_block >= self.reveal_block
    }
}

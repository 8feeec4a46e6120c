// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Shared mocks and log builders for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use ethers::abi::Token;
use ethers::contract::EthEvent;
use ethers::types::{Address, Bytes, Log, H256, U256, U64};
use tokio::sync::Mutex;

use crate::abi::{BetPlacedFilter, BetSettledFilter};
use crate::error::{SettlerError, SettlerResult};
use crate::eth_client::{ChainReader, PlayerBet, SettleExecutor, SettleOutcome};

/// Chain reader with a settable head and synthetic timestamps. Reads can be
/// made to fail to exercise fallback paths.
pub struct MockChain {
    block: AtomicU64,
    queries: AtomicUsize,
    failing: AtomicBool,
}

impl MockChain {
    pub fn new(block: u64) -> Self {
        Self {
            block: AtomicU64::new(block),
            queries: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_block(&self, block: u64) {
        self.block.store(block, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn block_queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn block_number(&self) -> SettlerResult<u64> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SettlerError::TransientProvider(
                "mock read path down".to_string(),
            ));
        }
        Ok(self.block.load(Ordering::SeqCst))
    }

    async fn block_timestamp_ms(&self, number: u64) -> SettlerResult<u64> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SettlerError::TransientProvider(
                "mock read path down".to_string(),
            ));
        }
        Ok(number * 1_000)
    }
}

/// Scripted settlement executor recording every call.
pub enum MockResponse {
    Success,
    Reverted,
    Error(SettlerError),
}

pub struct MockExecutor {
    calls: Mutex<Vec<(u32, Address)>>,
    responses: Mutex<VecDeque<MockResponse>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            responses: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn push(&self, response: MockResponse) {
        self.responses.lock().await.push_back(response);
    }

    pub async fn calls(&self) -> Vec<(u32, Address)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl SettleExecutor for MockExecutor {
    async fn settle_bet(&self, room_id: u32, player: Address) -> SettlerResult<SettleOutcome> {
        self.calls.lock().await.push((room_id, player));
        let response = self
            .responses
            .lock()
            .await
            .pop_front()
            .unwrap_or(MockResponse::Success);
        match response {
            MockResponse::Success => Ok(SettleOutcome {
                tx_hash: H256::repeat_byte(0x42),
                block_number: Some(0),
                success: true,
            }),
            MockResponse::Reverted => Ok(SettleOutcome {
                tx_hash: H256::repeat_byte(0x42),
                block_number: Some(0),
                success: false,
            }),
            MockResponse::Error(e) => Err(e),
        }
    }

    async fn player_bets(&self, _room_id: u32, _player: Address) -> SettlerResult<PlayerBet> {
        Ok(PlayerBet {
            amount_wei: U256::zero(),
            bet_big: false,
            commit_block: 0,
            settled: true,
        })
    }
}

/// Raw `BetPlaced` log the way the stream would deliver it.
#[allow(clippy::too_many_arguments)]
pub fn bet_placed_log(
    room_id: u32,
    player: Address,
    amount: U256,
    bet_big: bool,
    commit_block: u64,
    reveal_block: u64,
    block_number: u64,
    tx_hash: H256,
) -> Log {
    let data = ethers::abi::encode(&[
        Token::Uint(amount),
        Token::Bool(bet_big),
        Token::Uint(U256::from(commit_block)),
        Token::Uint(U256::from(reveal_block)),
    ]);
    Log {
        topics: vec![
            BetPlacedFilter::signature(),
            H256::from_low_u64_be(room_id as u64),
            H256::from(player),
        ],
        data: Bytes::from(data),
        block_number: Some(U64::from(block_number)),
        transaction_hash: Some(tx_hash),
        log_index: Some(U256::zero()),
        ..Default::default()
    }
}

/// Raw `BetSettled` log the way the stream would deliver it.
#[allow(clippy::too_many_arguments)]
pub fn bet_settled_log(
    room_id: u32,
    player: Address,
    reward: U256,
    won: bool,
    hash_value: u8,
    bet_id: u64,
    block_number: u64,
    tx_hash: H256,
) -> Log {
    let data = ethers::abi::encode(&[
        Token::Uint(reward),
        Token::Bool(won),
        Token::Uint(U256::from(hash_value)),
        Token::FixedBytes(H256::repeat_byte(0x77).as_bytes().to_vec()),
        Token::Uint(U256::from(bet_id)),
    ]);
    Log {
        topics: vec![
            BetSettledFilter::signature(),
            H256::from_low_u64_be(room_id as u64),
            H256::from(player),
        ],
        data: Bytes::from(data),
        block_number: Some(U64::from(block_number)),
        transaction_hash: Some(tx_hash),
        log_index: Some(U256::one()),
        ..Default::default()
    }
}

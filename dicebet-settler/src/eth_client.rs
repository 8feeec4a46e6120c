// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Request/response chain access and transaction submission.
//!
//! All reads and every transaction go through the HTTP provider, never the
//! WebSocket stream: the reconciler and dispatcher must keep working while
//! the stream is in a reconnect window. The stream (see `stream.rs`) is used
//! exclusively for push notifications.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::core::k256::ecdsa::SigningKey;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer, Wallet};
use ethers::types::{Address, H256, U256};
use tracing::info;

use crate::abi::DiceBet;
use crate::error::{SettlerError, SettlerResult};

pub type EthSigner = SignerMiddleware<Provider<Http>, Wallet<SigningKey>>;

/// Receipt wait deadline. Longer than the per-RPC deadline because receipt
/// polling spans multiple blocks; a timeout leaves the key pending and the
/// next tick retries (idempotence markers absorb a late-landing first tx).
const RECEIPT_DEADLINE: Duration = Duration::from_secs(120);

/// Outcome of a settlement submission.
#[derive(Debug, Clone)]
pub struct SettleOutcome {
    pub tx_hash: H256,
    pub block_number: Option<u64>,
    /// Receipt status == 1.
    pub success: bool,
}

/// Current on-chain state of a bet, from `playerBets`.
#[derive(Debug, Clone)]
pub struct PlayerBet {
    pub amount_wei: U256,
    pub bet_big: bool,
    pub commit_block: u64,
    pub settled: bool,
}

/// Read path consumed by the ingestor and the reconciler tick.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn block_number(&self) -> SettlerResult<u64>;
    /// Timestamp of block `number` in epoch milliseconds.
    async fn block_timestamp_ms(&self, number: u64) -> SettlerResult<u64>;
}

/// Write path consumed by the settlement dispatcher.
#[async_trait]
pub trait SettleExecutor: Send + Sync {
    async fn settle_bet(&self, room_id: u32, player: Address) -> SettlerResult<SettleOutcome>;
    async fn player_bets(&self, room_id: u32, player: Address) -> SettlerResult<PlayerBet>;
}

pub struct EthClient {
    provider: Provider<Http>,
    contract: DiceBet<EthSigner>,
    signer_address: Address,
    rpc_timeout: Duration,
}

impl EthClient {
    pub async fn new(
        rpc_url: &str,
        contract_address: Address,
        private_key: &str,
        rpc_timeout: Duration,
    ) -> SettlerResult<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| SettlerError::Config(format!("invalid rpc url: {e}")))?;
        let chain_id = provider.get_chainid().await.map_err(SettlerError::from)?;

        let wallet: LocalWallet = private_key
            .trim_start_matches("0x")
            .parse()
            .map_err(|e| SettlerError::Signer(format!("invalid settler private key: {e}")))?;
        let wallet = wallet.with_chain_id(chain_id.as_u64());
        let signer_address = wallet.address();

        let signer = Arc::new(SignerMiddleware::new(provider.clone(), wallet));
        let contract = DiceBet::new(contract_address, signer);

        let client = Self {
            provider,
            contract,
            signer_address,
            rpc_timeout,
        };
        client.describe(chain_id.as_u64(), contract_address).await?;
        Ok(client)
    }

    // Log connection info at startup.
    async fn describe(&self, chain_id: u64, contract_address: Address) -> SettlerResult<()> {
        let block_number = self.block_number().await?;
        info!(
            "[EthClient] Connected to chain {} at block {}, contract {:#x}, settler {:#x}",
            chain_id, block_number, contract_address, self.signer_address
        );
        Ok(())
    }

    pub fn signer_address(&self) -> Address {
        self.signer_address
    }

    /// Native balance of the settler key, in wei.
    pub async fn balance(&self) -> SettlerResult<U256> {
        self.with_deadline(async {
            self.provider
                .get_balance(self.signer_address, None)
                .await
                .map_err(SettlerError::from)
        })
        .await
    }

    /// `revealDelay()` from the contract.
    pub async fn reveal_delay(&self) -> SettlerResult<U256> {
        self.with_deadline(async {
            self.contract
                .reveal_delay()
                .call()
                .await
                .map_err(|e| SettlerError::Contract(e.to_string()))
        })
        .await
    }

    async fn with_deadline<T>(
        &self,
        fut: impl std::future::Future<Output = SettlerResult<T>>,
    ) -> SettlerResult<T> {
        match tokio::time::timeout(self.rpc_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(SettlerError::TransientProvider(format!(
                "rpc call exceeded {:?} deadline",
                self.rpc_timeout
            ))),
        }
    }
}

#[async_trait]
impl ChainReader for EthClient {
    async fn block_number(&self) -> SettlerResult<u64> {
        self.with_deadline(async {
            let number = self
                .provider
                .get_block_number()
                .await
                .map_err(SettlerError::from)?;
            Ok(number.as_u64())
        })
        .await
    }

    async fn block_timestamp_ms(&self, number: u64) -> SettlerResult<u64> {
        self.with_deadline(async {
            let block = self
                .provider
                .get_block(number)
                .await
                .map_err(SettlerError::from)?
                .ok_or_else(|| {
                    SettlerError::Provider(format!("provider returned no block {number}"))
                })?;
            Ok(block.timestamp.as_u64().saturating_mul(1_000))
        })
        .await
    }
}

#[async_trait]
impl SettleExecutor for EthClient {
    async fn settle_bet(&self, room_id: u32, player: Address) -> SettlerResult<SettleOutcome> {
        let call = self.contract.settle_bet(room_id, player);
        let pending = self
            .with_deadline(async {
                call.send()
                    .await
                    .map_err(|e| SettlerError::Contract(e.to_string()))
            })
            .await?;
        let tx_hash = *pending;

        let receipt = match tokio::time::timeout(RECEIPT_DEADLINE, pending).await {
            Ok(result) => result.map_err(SettlerError::from)?,
            Err(_) => {
                return Err(SettlerError::TransientProvider(format!(
                    "timed out waiting for receipt of {tx_hash:#x}"
                )))
            }
        };
        let receipt = receipt.ok_or_else(|| {
            SettlerError::Provider(format!("transaction {tx_hash:#x} dropped from mempool"))
        })?;

        Ok(SettleOutcome {
            tx_hash,
            block_number: receipt.block_number.map(|n| n.as_u64()),
            success: receipt.status.map(|s| s.as_u64() == 1).unwrap_or(false),
        })
    }

    async fn player_bets(&self, room_id: u32, player: Address) -> SettlerResult<PlayerBet> {
        let (amount, bet_big, commit_block, settled) = self
            .with_deadline(async {
                self.contract
                    .player_bets(room_id, player)
                    .call()
                    .await
                    .map_err(|e| SettlerError::Contract(e.to_string()))
            })
            .await?;
        Ok(PlayerBet {
            amount_wei: amount,
            bet_big,
            commit_block: commit_block.low_u64(),
            settled,
        })
    }
}

// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Contract parameters read once at startup.

use ethers::types::U256;
use tracing::{info, warn};

use crate::error::SettlerResult;
use crate::eth_client::EthClient;

/// Fallback when `revealDelay()` cannot be read or returns nonsense.
pub const DEFAULT_REVEAL_DELAY: u64 = 3;

#[derive(Debug, Clone, Copy)]
pub struct ContractParams {
    /// Blocks between a commit and its reveal block.
    pub reveal_delay: u64,
}

impl ContractParams {
    /// Read `revealDelay()` from the contract. The value is read exactly
    /// once per process lifetime; a long-running settler does not observe
    /// later changes.
    pub async fn load(client: &EthClient) -> Self {
        Self::from_raw(client.reveal_delay().await)
    }

    pub(crate) fn from_raw(raw: SettlerResult<U256>) -> Self {
        let reveal_delay = match raw {
            Ok(delay) if !delay.is_zero() && delay <= U256::from(u32::MAX) => {
                let delay = delay.low_u64();
                info!("[Params] revealDelay() = {} blocks", delay);
                delay
            }
            Ok(delay) => {
                warn!(
                    "[Params] revealDelay() returned {}; using default {}",
                    delay, DEFAULT_REVEAL_DELAY
                );
                DEFAULT_REVEAL_DELAY
            }
            Err(e) => {
                warn!(
                    "[Params] Failed to read revealDelay(): {}; using default {}",
                    e, DEFAULT_REVEAL_DELAY
                );
                DEFAULT_REVEAL_DELAY
            }
        };
        Self { reveal_delay }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SettlerError;

    #[test]
    fn test_positive_delay_is_adopted() {
        let params = ContractParams::from_raw(Ok(U256::from(5)));
        assert_eq!(params.reveal_delay, 5);
    }

    #[test]
    fn test_zero_delay_falls_back_to_default() {
        let params = ContractParams::from_raw(Ok(U256::zero()));
        assert_eq!(params.reveal_delay, DEFAULT_REVEAL_DELAY);
    }

    #[test]
    fn test_absurd_delay_falls_back_to_default() {
        let params = ContractParams::from_raw(Ok(U256::MAX));
        assert_eq!(params.reveal_delay, DEFAULT_REVEAL_DELAY);
    }

    #[test]
    fn test_read_error_falls_back_to_default() {
        let params = ContractParams::from_raw(Err(SettlerError::TransientProvider(
            "timeout".to_string(),
        )));
        assert_eq!(params.reveal_delay, DEFAULT_REVEAL_DELAY);
    }
}

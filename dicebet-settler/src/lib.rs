// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Off-chain settler for the commit-reveal dice contract.
//!
//! Players commit bets on-chain; after `revealDelay` blocks the contract
//! derives the outcome from the reveal block's hash, but only when some
//! external party calls `settleBet(roomId, player)`. This daemon watches the
//! contract's event stream, tracks every open commitment, and submits the
//! settlement transaction once the reveal block is mined.

pub mod abi;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod eth_client;
pub mod ingestor;
pub mod metrics;
pub mod params;
pub mod pending_bets;
pub mod server;
pub mod service;
pub mod stream;

#[cfg(test)]
pub mod test_utils;

pub use error::{SettlerError, SettlerResult};

use ethers::contract::EthEvent;
use ethers::types::H256;

/// topic0 values the stream subscription filters on.
pub fn event_topics() -> Vec<H256> {
    vec![
        abi::BetPlacedFilter::signature(),
        abi::BetSettledFilter::signature(),
    ]
}

#[macro_export]
macro_rules! retry_with_max_elapsed_time {
    ($func:expr, $max_elapsed_time:expr) => {{
        // The following delay sequence (in secs) will be used, applied with jitter
        // 0.4, 0.8, 1.6, 3.2, 6.4, 10, 10 ...
        let backoff = backoff::ExponentialBackoff {
            initial_interval: std::time::Duration::from_millis(400),
            randomization_factor: 0.1,
            multiplier: 2.0,
            max_interval: std::time::Duration::from_secs(10),
            max_elapsed_time: Some($max_elapsed_time),
            ..Default::default()
        };
        backoff::future::retry(backoff, || {
            let fut = async {
                let result = $func.await;
                match result {
                    Ok(_) => {
                        return Ok(result);
                    }
                    Err(e) => {
                        // Every error is treated as transient so we keep
                        // retrying until max_elapsed_time runs out.
                        tracing::debug!("Retrying due to error: {:?}", e);
                        return Err(backoff::Error::transient(e));
                    }
                }
            };
            std::boxed::Box::pin(fut)
        })
        .await
    }};
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    async fn example_func_ok() -> anyhow::Result<()> {
        Ok(())
    }

    async fn example_func_err() -> anyhow::Result<()> {
        Err(anyhow::anyhow!(""))
    }

    #[tokio::test]
    async fn test_retry_with_max_elapsed_time() {
        // No retry needed: returns immediately even with a tiny time limit.
        let max_elapsed_time = Duration::from_millis(20);
        retry_with_max_elapsed_time!(example_func_ok(), max_elapsed_time)
            .unwrap()
            .unwrap();

        // Always-failing call returns once max_elapsed_time runs out.
        let max_elapsed_time = Duration::from_secs(5);
        let instant = std::time::Instant::now();
        retry_with_max_elapsed_time!(example_func_err(), max_elapsed_time).unwrap_err();
        assert!(instant.elapsed() < max_elapsed_time);
    }

    #[test]
    fn test_event_topics_cover_both_events() {
        let topics = crate::event_topics();
        assert_eq!(topics.len(), 2);
        assert_ne!(topics[0], topics[1]);
    }
}

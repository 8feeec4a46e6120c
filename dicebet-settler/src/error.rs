// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use ethers::providers::ProviderError;

/// Error taxonomy for the settler daemon.
///
/// `TransientProvider` covers anything worth retrying (socket resets,
/// timeouts, provider 5xx); `Provider` covers malformed responses and other
/// request/response failures that retrying will not fix. Contract reverts
/// surface as `Contract` so the dispatcher can match idempotence markers in
/// the message.
#[derive(Debug, thiserror::Error)]
pub enum SettlerError {
    #[error("transient provider error: {0}")]
    TransientProvider(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("contract error: {0}")]
    Contract(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("signer error: {0}")]
    Signer(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl SettlerError {
    /// Short stable identifier for metrics labels.
    pub fn error_type(&self) -> &'static str {
        match self {
            SettlerError::TransientProvider(_) => "transient_provider_error",
            SettlerError::Provider(_) => "provider_error",
            SettlerError::Contract(_) => "contract_error",
            SettlerError::Store(_) => "store_error",
            SettlerError::Signer(_) => "signer_error",
            SettlerError::Config(_) => "configuration_error",
        }
    }

    /// Whether the caller should back off and try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SettlerError::TransientProvider(_) | SettlerError::Store(_)
        )
    }
}

impl From<ProviderError> for SettlerError {
    fn from(e: ProviderError) -> Self {
        SettlerError::TransientProvider(e.to_string())
    }
}

impl From<dicebet_pg_db::StoreError> for SettlerError {
    fn from(e: dicebet_pg_db::StoreError) -> Self {
        SettlerError::Store(e.to_string())
    }
}

pub type SettlerResult<T> = Result<T, SettlerError>;

//! The capability surface a synchronizer needs from an execution domain:
//! head tracking, block headers and filtered bridge logs.

use alloy::primitives::{Address, B256};
use alloy::rpc::types::Log;
use aqueduct_types::BlockNumber;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

pub mod ethereum;
pub mod events;

#[cfg(any(test, feature = "testing"))]
pub mod test_utils;

pub use ethereum::EthereumBaseLayer;
pub use events::{decode_event, BridgeEvent, EventDecodeError};

/// Connection and contract addresses for one execution domain.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BaseLayerConfig {
    pub url: Url,
    /// The bridge contract emitting deposit/claim/wrapped-token events.
    pub bridge_address: Address,
    /// The exit-root manager emitting global exit root updates.
    pub ger_manager_address: Address,
    /// The rollup settlement contract emitting batch verifications.
    pub rollup_manager_address: Address,
}

#[derive(Debug, thiserror::Error)]
pub enum BaseLayerError {
    /// RPC I/O failure or timeout; retryable.
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// The queried range no longer exists on the canonical chain.
    #[error("chain reorganized below block {number}")]
    ReorgDetected { number: BlockNumber },
}

impl From<alloy::transports::TransportError> for BaseLayerError {
    fn from(err: alloy::transports::TransportError) -> Self {
        BaseLayerError::Transport(Box::new(err))
    }
}

/// Header fields the synchronizer orders and reorg-checks by.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BlockHeader {
    pub number: BlockNumber,
    pub hash: B256,
    pub parent_hash: B256,
    pub timestamp: u64,
}

/// Minimal RPC surface per network. Implemented by [`EthereumBaseLayer`]
/// in production and mocked in tests.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait BaseLayerClient: Send + Sync {
    async fn chain_id(&self) -> Result<u64, BaseLayerError>;

    async fn head_block_number(&self) -> Result<BlockNumber, BaseLayerError>;

    async fn block_header(
        &self,
        number: BlockNumber,
    ) -> Result<Option<BlockHeader>, BaseLayerError>;

    /// All logs of the configured bridge contracts in the inclusive block
    /// range, filtered to the tracked event signatures, in
    /// `(block_number, log_index)` order.
    async fn logs(
        &self,
        from: BlockNumber,
        to: BlockNumber,
    ) -> Result<Vec<Log>, BaseLayerError>;
}

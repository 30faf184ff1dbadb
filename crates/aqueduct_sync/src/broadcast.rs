//! Sequencer broadcast stream: batch proposals carrying exit roots before
//! they are visible on L1.

use alloy::primitives::B256;
use aqueduct_base_layer::BaseLayerError;
use async_trait::async_trait;

/// A batch proposal from the trusted sequencer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BatchProposal {
    pub batch_number: u64,
    pub mainnet_exit_root: B256,
    pub rollup_exit_root: B256,
}

/// Source of batch proposals. The production implementation wraps the
/// sequencer's broadcast endpoint; tests substitute a mock.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait BatchBroadcastSource: Send + Sync {
    async fn latest_batch(&self) -> Result<Option<BatchProposal>, BaseLayerError>;
}

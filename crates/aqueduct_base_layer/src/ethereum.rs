//! Alloy-backed implementation of [`BaseLayerClient`].

use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log};
use aqueduct_types::BlockNumber;
use async_trait::async_trait;
use tracing::debug;

use crate::events::tracked_event_signatures;
use crate::{BaseLayerClient, BaseLayerConfig, BaseLayerError, BlockHeader};

/// HTTP JSON-RPC client over one domain's endpoint, with the log filter
/// pinned to the configured contracts and tracked event signatures.
pub struct EthereumBaseLayer {
    provider: DynProvider,
    config: BaseLayerConfig,
}

impl EthereumBaseLayer {
    pub fn new(config: BaseLayerConfig) -> Self {
        let provider = ProviderBuilder::new().connect_http(config.url.clone()).erased();
        Self { provider, config }
    }

    fn log_filter(&self, from: BlockNumber, to: BlockNumber) -> Filter {
        Filter::new()
            .from_block(from.0)
            .to_block(to.0)
            .address(vec![
                self.config.bridge_address,
                self.config.ger_manager_address,
                self.config.rollup_manager_address,
            ])
            .event_signature(tracked_event_signatures().to_vec())
    }
}

#[async_trait]
impl BaseLayerClient for EthereumBaseLayer {
    async fn chain_id(&self) -> Result<u64, BaseLayerError> {
        Ok(self.provider.get_chain_id().await?)
    }

    async fn head_block_number(&self) -> Result<BlockNumber, BaseLayerError> {
        Ok(BlockNumber(self.provider.get_block_number().await?))
    }

    async fn block_header(
        &self,
        number: BlockNumber,
    ) -> Result<Option<BlockHeader>, BaseLayerError> {
        let block = self.provider.get_block_by_number(number.0.into()).await?;
        Ok(block.map(|block| BlockHeader {
            number,
            hash: block.header.hash,
            parent_hash: block.header.inner.parent_hash,
            timestamp: block.header.inner.timestamp,
        }))
    }

    async fn logs(
        &self,
        from: BlockNumber,
        to: BlockNumber,
    ) -> Result<Vec<Log>, BaseLayerError> {
        let mut logs = self.provider.get_logs(&self.log_filter(from, to)).await?;
        // eth_getLogs output is ordered per node implementation; enforce the
        // application order the synchronizer relies on.
        logs.sort_by_key(|log| (log.block_number, log.log_index));
        debug!(from = %from, to = %to, count = logs.len(), "Fetched bridge logs.");
        Ok(logs)
    }
}

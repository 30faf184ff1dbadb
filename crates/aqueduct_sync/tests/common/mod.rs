//! Shared harness for pipeline flow tests: a scriptable fake chain and
//! storage predicates.
#![allow(dead_code)] // Each flow-test binary uses a different subset.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::rpc::types::Log;
use aqueduct_base_layer::events::abi;
use aqueduct_base_layer::test_utils::log_for_event;
use aqueduct_base_layer::{BaseLayerClient, BaseLayerError, BlockHeader};
use aqueduct_storage::mem::InMemoryStore;
use aqueduct_storage::Store;
use aqueduct_sync::{BatchBroadcastSource, SyncConfig, SyncResult, Synchronizer};
use aqueduct_types::{BlockNumber, NetworkId};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub const BRIDGE: Address = Address::repeat_byte(0xb1);
pub const ROLLUP: NetworkId = NetworkId(1);

struct FakeBlock {
    number: u64,
    hash: B256,
    parent_hash: B256,
    logs: Vec<Log>,
}

struct ChainState {
    start: u64,
    seed: u64,
    blocks: Vec<FakeBlock>,
}

impl ChainState {
    fn block_hash(&self, number: u64) -> B256 {
        keccak256(format!("chain-{}-{number}", self.seed))
    }
}

/// A deterministic in-memory chain. `fork` rewrites the suffix with fresh
/// hashes, simulating a reorg.
#[derive(Clone)]
pub struct FakeChain {
    state: Arc<Mutex<ChainState>>,
}

impl FakeChain {
    pub fn new(start: u64) -> Self {
        Self { state: Arc::new(Mutex::new(ChainState { start, seed: 0, blocks: Vec::new() })) }
    }

    /// Appends a block carrying `logs`; ordering metadata is filled in.
    pub async fn push_block(&self, logs: Vec<Log>) -> u64 {
        let mut state = self.state.lock().await;
        let number = state.start + u64::try_from(state.blocks.len()).unwrap();
        let parent_hash = state
            .blocks
            .last()
            .map_or_else(|| keccak256(b"genesis-parent"), |block| block.hash);
        let hash = state.block_hash(number);
        let logs = logs
            .into_iter()
            .enumerate()
            .map(|(log_index, mut log)| {
                log.block_number = Some(number);
                log.log_index = Some(u64::try_from(log_index).unwrap());
                log
            })
            .collect();
        state.blocks.push(FakeBlock { number, hash, parent_hash, logs });
        number
    }

    /// Drops every block at or above `from_number` and changes the hash
    /// seed, so re-pushed numbers get different hashes.
    pub async fn fork(&self, from_number: u64) {
        let mut state = self.state.lock().await;
        state.blocks.retain(|block| block.number < from_number);
        state.seed += 1;
        // Re-root the retained suffix boundary: nothing to do, the next
        // push links to the last retained hash.
    }
}

#[async_trait]
impl BaseLayerClient for FakeChain {
    async fn chain_id(&self) -> Result<u64, BaseLayerError> {
        Ok(1337)
    }

    async fn head_block_number(&self) -> Result<BlockNumber, BaseLayerError> {
        let state = self.state.lock().await;
        let head = state
            .blocks
            .last()
            .map_or_else(|| state.start.saturating_sub(1), |block| block.number);
        Ok(BlockNumber(head))
    }

    async fn block_header(
        &self,
        number: BlockNumber,
    ) -> Result<Option<BlockHeader>, BaseLayerError> {
        let state = self.state.lock().await;
        Ok(state.blocks.iter().find(|block| block.number == number.0).map(|block| BlockHeader {
            number,
            hash: block.hash,
            parent_hash: block.parent_hash,
            timestamp: 1_700_000_000 + number.0,
        }))
    }

    async fn logs(&self, from: BlockNumber, to: BlockNumber) -> Result<Vec<Log>, BaseLayerError> {
        let state = self.state.lock().await;
        Ok(state
            .blocks
            .iter()
            .filter(|block| (from.0..=to.0).contains(&block.number))
            .flat_map(|block| block.logs.iter().cloned())
            .collect())
    }
}

pub fn deposit_log(origin_network: NetworkId, deposit_count: u32, amount: u64) -> Log {
    let event = abi::BridgeEvent {
        leafType: 0,
        originNetwork: origin_network.0,
        originAddress: Address::repeat_byte(0x11),
        destinationNetwork: if origin_network.is_rollup() { 0 } else { 1 },
        destinationAddress: Address::repeat_byte(0x22),
        amount: U256::from(amount),
        metadata: Bytes::new(),
        depositCount: deposit_count,
    };
    log_for_event(BRIDGE, 0, 0, &event)
}

pub fn claim_log(origin_network: NetworkId, index: u32, amount: u64) -> Log {
    let event = abi::ClaimEvent {
        index,
        originNetwork: origin_network.0,
        originAddress: Address::repeat_byte(0x11),
        destinationAddress: Address::repeat_byte(0x22),
        amount: U256::from(amount),
    };
    log_for_event(BRIDGE, 0, 0, &event)
}

pub fn wrapped_token_log(origin_network: NetworkId) -> Log {
    let event = abi::NewWrappedToken {
        originNetwork: origin_network.0,
        originTokenAddress: Address::repeat_byte(0x11),
        wrappedTokenAddress: Address::repeat_byte(0x44),
        metadata: aqueduct_base_layer::events::encode_token_metadata("A COIN", "ACO", 18).into(),
    };
    log_for_event(BRIDGE, 0, 0, &event)
}

pub fn ger_update_log(mainnet_root: B256, rollup_root: B256) -> Log {
    let event = abi::UpdateGlobalExitRoot {
        mainnetExitRoot: mainnet_root,
        rollupExitRoot: rollup_root,
    };
    log_for_event(BRIDGE, 0, 0, &event)
}

pub fn test_config(genesis: u64) -> SyncConfig {
    SyncConfig {
        genesis_block: BlockNumber(genesis),
        confirmation_depth: 0,
        blocks_max_batch_size: 10,
        sync_sleep_duration: Duration::from_millis(40),
        recoverable_error_sleep_duration: Duration::from_millis(20),
        retry_budget: 3,
    }
}

pub async fn start_pipeline(
    network_id: NetworkId,
    chain: &FakeChain,
    store: &InMemoryStore,
    config: SyncConfig,
    broadcast: Option<Arc<dyn BatchBroadcastSource>>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<SyncResult> {
    let store: Arc<dyn Store> = Arc::new(store.clone());
    let synchronizer = Synchronizer::new(
        network_id,
        config,
        Arc::new(chain.clone()),
        store,
        ROLLUP,
        broadcast,
        cancel,
    )
    .await
    .expect("synchronizer init");
    tokio::spawn(synchronizer.run())
}

/// Polls `predicate` until it holds or the timeout passes.
pub async fn wait_for<F, Fut>(mut predicate: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

//! Per-network synchronizer pipelines.
//!
//! One pipeline per execution domain replays that domain's bridge events
//! into the store and the domain's exit tree. A pipeline tick fetches a
//! confirmed window of blocks, decodes the bridge logs, applies them in
//! `(block, log index)` order under a single transaction and commits it
//! together with the block rows, so the persisted `latest block` pointer
//! never runs ahead of or behind the applied events. Parent-hash mismatches
//! trigger a rewind to the deepest block still on the canonical chain.

use std::cmp::min;
use std::sync::Arc;
use std::time::Duration;

use alloy::rpc::types::Log;
use aqueduct_base_layer::events::BridgeEvent;
use aqueduct_base_layer::{
    decode_event, BaseLayerClient, BaseLayerError, BlockHeader, EventDecodeError,
};
use aqueduct_exit_tree::{ExitTree, TreeError};
use aqueduct_storage::{NewBlock, NewGlobalExitRoot, StorageError, Store, StoreTxn};
use aqueduct_types::{Block, BlockId, BlockNumber, Claim, Deposit, GerSource, NetworkId, TokenWrapped};
use chrono::Utc;
use metrics::{counter, gauge};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use validator::Validate;

pub mod broadcast;
pub mod converters;
pub mod ger;


pub use broadcast::{BatchBroadcastSource, BatchProposal};
pub use ger::GlobalExitRootTracker;

use converters::deserialize_seconds_to_duration;

const MAX_BACKOFF: Duration = Duration::from_secs(60);

pub type SyncResult = Result<(), SyncError>;

/// Per-network pipeline parameters. `confirmation_depth` carries no
/// default meaning on its own; settlement chains and rollups need very
/// different values, so deployments set it per network.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Validate)]
pub struct SyncConfig {
    /// First block of interest; nothing below it is fetched or stored.
    pub genesis_block: BlockNumber,
    /// Blocks below head considered final enough to persist.
    pub confirmation_depth: u64,
    /// Max blocks fetched per tick.
    #[validate(range(min = 1))]
    pub blocks_max_batch_size: u64,
    /// Idle sleep once the confirmed head is reached.
    #[serde(deserialize_with = "deserialize_seconds_to_duration")]
    pub sync_sleep_duration: Duration,
    /// Initial sleep after a recoverable error; doubles up to a cap.
    #[serde(deserialize_with = "deserialize_seconds_to_duration")]
    pub recoverable_error_sleep_duration: Duration,
    /// Consecutive non-transport failures tolerated before the pipeline
    /// halts.
    #[validate(range(min = 1))]
    pub retry_budget: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            genesis_block: BlockNumber(0),
            confirmation_depth: 64,
            blocks_max_batch_size: 100,
            sync_sleep_duration: Duration::from_secs(2),
            recoverable_error_sleep_duration: Duration::from_secs(3),
            retry_budget: 5,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    BaseLayer(#[from] BaseLayerError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Decode(#[from] EventDecodeError),
    #[error(transparent)]
    InvalidConfig(#[from] validator::ValidationErrors),
    #[error(
        "global exit root ({mainnet_root}, {rollup_root}) does not match any locally known tree \
         state"
    )]
    GerMismatch {
        mainnet_root: alloy::primitives::B256,
        rollup_root: alloy::primitives::B256,
    },
}

/// How the run loop reacts to a tick error.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Recovery {
    /// RPC trouble: retry forever with exponential backoff.
    RetryWithBackoff,
    /// Waiting for another pipeline to catch up: retry next tick,
    /// unbounded.
    AwaitCrossChain,
    /// Possibly persistent local failure: retry within the budget, then
    /// halt.
    CountedRetry,
    /// Misconfiguration: halt immediately.
    Halt,
}

// No catch-all pattern: every new error kind forces a conscious decision.
pub(crate) fn classify(err: &SyncError) -> Recovery {
    match err {
        SyncError::BaseLayer(BaseLayerError::Transport(_)) => Recovery::RetryWithBackoff,
        // The rewind path reacts on the next tick.
        SyncError::BaseLayer(BaseLayerError::ReorgDetected { .. }) => Recovery::RetryWithBackoff,
        SyncError::GerMismatch { .. } => Recovery::AwaitCrossChain,
        SyncError::Storage(_) => Recovery::CountedRetry,
        SyncError::Decode(_) => Recovery::CountedRetry,
        SyncError::Tree(TreeError::OutOfOrder { .. })
        | SyncError::Tree(TreeError::LeafOutOfRange { .. })
        | SyncError::Tree(TreeError::MissingNode { .. })
        | SyncError::Tree(TreeError::Store(_)) => Recovery::CountedRetry,
        SyncError::InvalidConfig(_) => Recovery::Halt,
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum TickOutcome {
    Progressed,
    UpToDate,
}

/// One network's sync pipeline. Owns the network's exit tree exclusively.
pub struct Synchronizer<C: BaseLayerClient> {
    network_id: NetworkId,
    config: SyncConfig,
    client: Arc<C>,
    store: Arc<dyn Store>,
    tree: ExitTree,
    tracker: GlobalExitRootTracker,
    broadcast: Option<Arc<dyn BatchBroadcastSource>>,
    cancel: CancellationToken,
}

impl<C: BaseLayerClient> std::fmt::Debug for Synchronizer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("network_id", &self.network_id)
            .field("config", &self.config)
            .field("tree", &self.tree)
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}

impl<C: BaseLayerClient> Synchronizer<C> {
    /// Validates the config and primes the in-memory tree from the count of
    /// committed deposits.
    pub async fn new(
        network_id: NetworkId,
        config: SyncConfig,
        client: Arc<C>,
        store: Arc<dyn Store>,
        rollup_network_id: NetworkId,
        broadcast: Option<Arc<dyn BatchBroadcastSource>>,
        cancel: CancellationToken,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let chain_id = client.chain_id().await?;
        let deposit_count = store.deposit_count(network_id).await?;
        info!(
            network_id = %network_id,
            chain_id,
            deposit_count,
            "Initialized synchronizer pipeline.",
        );
        Ok(Self {
            network_id,
            config,
            client,
            store,
            tree: ExitTree::new(network_id, deposit_count),
            tracker: GlobalExitRootTracker::new(rollup_network_id),
            broadcast,
            cancel,
        })
    }

    /// Runs until cancellation or an unrecoverable failure. Any transaction
    /// open when an error or the shutdown signal hits is dropped, which
    /// rolls it back; restart resumes from the last committed block.
    pub async fn run(mut self) -> SyncResult {
        info!(network_id = %self.network_id, "Bridge synchronizer started.");
        let mut consecutive_failures = 0u32;
        let mut backoff = self.config.recoverable_error_sleep_duration;

        loop {
            if self.cancel.is_cancelled() {
                info!(network_id = %self.network_id, "Bridge synchronizer shut down.");
                return Ok(());
            }
            match self.tick().await {
                Ok(TickOutcome::Progressed) => {
                    consecutive_failures = 0;
                    backoff = self.config.recoverable_error_sleep_duration;
                }
                Ok(TickOutcome::UpToDate) => {
                    consecutive_failures = 0;
                    backoff = self.config.recoverable_error_sleep_duration;
                    self.sleep_or_cancel(self.config.sync_sleep_duration).await;
                }
                Err(err) => match classify(&err) {
                    Recovery::RetryWithBackoff => {
                        warn!(
                            network_id = %self.network_id,
                            error = %err,
                            "Recoverable error while syncing; backing off.",
                        );
                        self.sleep_or_cancel(backoff).await;
                        backoff = min(backoff.saturating_mul(2), MAX_BACKOFF);
                    }
                    Recovery::AwaitCrossChain => {
                        warn!(
                            network_id = %self.network_id,
                            error = %err,
                            "Awaiting cross-chain catch-up; retrying next tick.",
                        );
                        self.sleep_or_cancel(self.config.sync_sleep_duration).await;
                    }
                    Recovery::CountedRetry => {
                        consecutive_failures += 1;
                        if consecutive_failures >= self.config.retry_budget {
                            error!(
                                network_id = %self.network_id,
                                error = %err,
                                attempts = consecutive_failures,
                                "Retry budget exhausted; halting pipeline.",
                            );
                            return Err(err);
                        }
                        warn!(
                            network_id = %self.network_id,
                            error = %err,
                            attempt = consecutive_failures,
                            "Tick failed; retrying.",
                        );
                        self.sleep_or_cancel(backoff).await;
                        backoff = min(backoff.saturating_mul(2), MAX_BACKOFF);
                    }
                    Recovery::Halt => {
                        error!(network_id = %self.network_id, error = %err, "Fatal sync error.");
                        return Err(err);
                    }
                },
            }
        }
    }

    async fn tick(&mut self) -> Result<TickOutcome, SyncError> {
        let last = self.store.latest_block(self.network_id).await?;
        let head = self.client.head_block_number().await?;
        let confirmed_head = head.0.saturating_sub(self.config.confirmation_depth);

        // Detect reorgs at the stored tip before extending it.
        if let Some(last) = &last {
            let on_chain = self.client.block_header(last.number).await?;
            let matches = on_chain.is_some_and(|header| header.hash == last.hash);
            if !matches {
                self.rewind(last.clone()).await?;
                return Ok(TickOutcome::Progressed);
            }
        }

        let from = last.as_ref().map_or(self.config.genesis_block, |block| block.number.next());
        let to = BlockNumber(min(
            confirmed_head,
            from.0.saturating_add(self.config.blocks_max_batch_size - 1),
        ));
        if to < from {
            self.poll_trusted_stream().await?;
            return Ok(TickOutcome::UpToDate);
        }

        let headers = self.fetch_headers(from, to).await?;
        self.check_linkage(last.as_ref(), &headers)?;
        let logs = self.client.logs(from, to).await?;
        self.apply_window(&headers, &logs).await?;

        gauge!("aqueduct_sync_latest_block", "network" => self.network_id.to_string())
            .set(lossy_f64(to.0));
        self.poll_trusted_stream().await?;
        Ok(TickOutcome::Progressed)
    }

    async fn fetch_headers(
        &self,
        from: BlockNumber,
        to: BlockNumber,
    ) -> Result<Vec<BlockHeader>, SyncError> {
        let mut headers = Vec::new();
        for number in from.0..=to.0 {
            let number = BlockNumber(number);
            let header = self
                .client
                .block_header(number)
                .await?
                .ok_or(BaseLayerError::ReorgDetected { number })?;
            headers.push(header);
        }
        Ok(headers)
    }

    /// The fetched window must form one chain rooted at the stored tip;
    /// otherwise the head moved under us and the next tick resolves it.
    fn check_linkage(&self, last: Option<&Block>, headers: &[BlockHeader]) -> Result<(), SyncError> {
        let mut prev_hash = last.map(|block| block.hash);
        for header in headers {
            if let Some(prev_hash) = prev_hash {
                if header.parent_hash != prev_hash {
                    warn!(
                        network_id = %self.network_id,
                        block_number = %header.number,
                        "Parent hash mismatch inside fetched window.",
                    );
                    return Err(SyncError::BaseLayer(BaseLayerError::ReorgDetected {
                        number: header.number,
                    }));
                }
            }
            prev_hash = Some(header.hash);
        }
        Ok(())
    }

    #[instrument(skip_all, fields(network_id = %self.network_id, blocks = headers.len()))]
    async fn apply_window(
        &mut self,
        headers: &[BlockHeader],
        logs: &[Log],
    ) -> Result<(), SyncError> {
        let tree_count_before = self.tree.deposit_count();
        let mut txn = self.store.begin().await?;

        let result = self.apply_window_inner(&mut txn, headers, logs).await;
        match result {
            Ok(()) => match txn.commit().await {
                Ok(()) => {
                    debug!(count = headers.len(), "Committed sync window.");
                    Ok(())
                }
                Err(err) => {
                    self.tree.rewind(tree_count_before);
                    Err(err.into())
                }
            },
            Err(err) => {
                // The rolled-back rows take the in-memory tree with them.
                self.tree.rewind(tree_count_before);
                txn.rollback().await?;
                Err(err)
            }
        }
    }

    async fn apply_window_inner(
        &mut self,
        txn: &mut Box<dyn StoreTxn>,
        headers: &[BlockHeader],
        logs: &[Log],
    ) -> Result<(), SyncError> {
        for header in headers {
            let block_id = txn
                .insert_block(&NewBlock {
                    network_id: self.network_id,
                    number: header.number,
                    hash: header.hash,
                    parent_hash: header.parent_hash,
                    received_at: Utc::now(),
                })
                .await?;
            let mut block_logs: Vec<&Log> = logs
                .iter()
                .filter(|log| log.block_number == Some(header.number.0))
                .collect();
            block_logs.sort_by_key(|log| log.log_index);
            for log in block_logs {
                let event = match decode_event(log) {
                    Ok(event) => event,
                    Err(EventDecodeError::UnknownTopic(topic)) => {
                        debug!(topic = %topic, "Skipping log with untracked topic.");
                        continue;
                    }
                    Err(err) => return Err(err.into()),
                };
                self.apply_event(txn, block_id, event).await?;
            }
        }
        Ok(())
    }

    async fn apply_event(
        &mut self,
        txn: &mut Box<dyn StoreTxn>,
        block_id: BlockId,
        event: BridgeEvent,
    ) -> Result<(), SyncError> {
        match event {
            BridgeEvent::Deposit {
                leaf_type,
                origin_network,
                origin_address,
                destination_network,
                destination_address,
                amount,
                metadata,
                deposit_count,
            } => {
                if origin_network != self.network_id {
                    warn!(
                        origin_network = %origin_network,
                        "Skipping deposit claiming a foreign origin network.",
                    );
                    return Ok(());
                }
                let mut deposit = Deposit {
                    network_id: origin_network,
                    leaf_type,
                    origin_address,
                    amount,
                    destination_network,
                    destination_address,
                    metadata,
                    deposit_count,
                    block_id,
                    exit_root: alloy::primitives::B256::ZERO,
                };
                let leaf_hash = deposit.leaf_hash();
                deposit.exit_root = self.tree.add_leaf(txn, leaf_hash, deposit_count).await?;
                txn.insert_deposit(&deposit).await?;
                counter!(
                    "aqueduct_sync_deposits_applied_total",
                    "network" => self.network_id.to_string()
                )
                .increment(1);
            }
            BridgeEvent::Claim { index, origin_network, origin_address, destination_address, amount } => {
                txn.insert_claim(&Claim {
                    network_id: self.network_id,
                    index,
                    origin_network,
                    origin_address,
                    amount,
                    destination_address,
                    block_id,
                })
                .await?;
            }
            BridgeEvent::NewWrappedToken {
                origin_network,
                origin_token_address,
                wrapped_token_address,
                name,
                symbol,
                decimals,
            } => {
                txn.insert_token_wrapped(&TokenWrapped {
                    origin_network,
                    origin_token_address,
                    wrapped_token_address,
                    block_id,
                    name,
                    symbol,
                    decimals,
                })
                .await?;
            }
            BridgeEvent::UpdateGlobalExitRoot { mainnet_root, rollup_root } => {
                if self.network_id != NetworkId::MAINNET {
                    debug!("Ignoring exit root update observed off the settlement chain.");
                    return Ok(());
                }
                let ger =
                    self.tracker.observe_l1(txn.as_mut(), mainnet_root, rollup_root, block_id).await?;
                info!(number = ger.number, "Recorded global exit root.");
            }
            BridgeEvent::VerifyBatch { batch_number, aggregator, exit_root } => {
                debug!(batch_number, aggregator = %aggregator, "Batch verified on settlement chain.");
                self.tracker.record_verified_batch(batch_number, exit_root);
            }
        }
        Ok(())
    }

    /// Rewinds to the deepest stored block whose hash is still canonical,
    /// then resumes forward sync from there.
    #[instrument(skip(self), fields(network_id = %self.network_id))]
    async fn rewind(&mut self, mismatched: Block) -> Result<(), SyncError> {
        warn!(block_number = %mismatched.number, "Reorg detected; searching fork point.");
        counter!("aqueduct_sync_reorgs_total", "network" => self.network_id.to_string())
            .increment(1);

        // Stored blocks are contiguous and agreement with the chain is a
        // prefix property, so the deepest matching block binary-searches.
        let mut lo = self.config.genesis_block.0;
        let mut hi = mismatched.number.0;
        let mut fork_point: Option<Block> = None;
        while lo < hi {
            let mid = BlockNumber(lo + (hi - lo) / 2);
            let stored = self.store.block_by_number(self.network_id, mid).await?;
            let on_chain = self.client.block_header(mid).await?;
            let matches = match (&stored, &on_chain) {
                (Some(stored), Some(on_chain)) => stored.hash == on_chain.hash,
                _ => false,
            };
            if matches {
                fork_point = stored;
                lo = mid.0 + 1;
            } else {
                hi = mid.0;
            }
        }

        let fork_block_id = fork_point.as_ref().map_or(BlockId(0), |block| block.id);
        let mut txn = self.store.begin().await?;
        txn.delete_from_block(self.network_id, fork_block_id).await?;
        let new_count = txn.deposit_count(self.network_id).await?;
        txn.truncate_tree(self.network_id, new_count).await?;
        txn.commit().await?;
        self.tree.rewind(new_count);

        match &fork_point {
            Some(block) => info!(
                fork_block = %block.number,
                deposit_count = new_count,
                "Rewound to fork point.",
            ),
            None => info!("Rewound to genesis."),
        }
        Ok(())
    }

    /// Records sequencer-broadcast exit roots ahead of L1 confirmation.
    /// They are visible to read APIs but never answer claim-proof queries.
    async fn poll_trusted_stream(&mut self) -> Result<(), SyncError> {
        let Some(broadcast) = &self.broadcast else {
            return Ok(());
        };
        let Some(proposal) = broadcast.latest_batch().await? else {
            return Ok(());
        };
        let latest = self.store.latest_ger(Some(GerSource::Trusted)).await?;
        let already_recorded = latest.as_ref().is_some_and(|ger| {
            ger.mainnet_root == proposal.mainnet_exit_root
                && ger.rollup_root == proposal.rollup_exit_root
        });
        if already_recorded {
            return Ok(());
        }
        let Some(anchor) = self.store.latest_block(self.network_id).await? else {
            return Ok(());
        };
        let mut txn = self.store.begin().await?;
        let ger = txn
            .insert_ger(&NewGlobalExitRoot {
                mainnet_root: proposal.mainnet_exit_root,
                rollup_root: proposal.rollup_exit_root,
                block_id: anchor.id,
                source: GerSource::Trusted,
            })
            .await?;
        txn.commit().await?;
        info!(
            number = ger.number,
            batch_number = proposal.batch_number,
            "Recorded trusted exit root from sequencer broadcast.",
        );
        Ok(())
    }

    async fn sleep_or_cancel(&self, duration: Duration) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(duration) => {}
        }
    }
}

/// Spawns every pipeline and waits for all of them. A halted pipeline does
/// not stop its siblings; the first failure is reported once all pipelines
/// have exited (or were cancelled).
pub async fn run_pipelines<C: BaseLayerClient + 'static>(
    pipelines: Vec<Synchronizer<C>>,
) -> SyncResult {
    let mut tasks = tokio::task::JoinSet::new();
    for pipeline in pipelines {
        tasks.spawn(pipeline.run());
    }
    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!(error = %err, "Pipeline halted.");
                first_error.get_or_insert(err);
            }
            Err(join_err) => {
                error!(error = %join_err, "Pipeline task panicked.");
            }
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[allow(clippy::as_conversions)]
fn lossy_f64(value: u64) -> f64 {
    value as f64
}

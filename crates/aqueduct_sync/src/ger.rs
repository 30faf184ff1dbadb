//! Tracking of `(mainnet root, rollup root)` pairs announced on the
//! settlement chain.

use alloy::primitives::B256;
use aqueduct_storage::{NewGlobalExitRoot, StoreTxn};
use aqueduct_types::{BlockId, GerSource, GlobalExitRoot, NetworkId};
use tracing::debug;

use crate::SyncError;

/// Validates and records exit-root updates observed on L1.
///
/// An update is only persisted once both component roots are reconcilable
/// with locally known state; until then the enclosing transaction is
/// aborted and the window retried, which makes the settlement pipeline wait
/// for the rollup pipeline to catch up.
pub struct GlobalExitRootTracker {
    rollup_network_id: NetworkId,
    // Exit root of the last batch the settlement chain verified. Accepted
    // as evidence for rollup roots that legitimately run ahead of local
    // rollup sync.
    last_verified_exit_root: Option<B256>,
}

impl GlobalExitRootTracker {
    pub fn new(rollup_network_id: NetworkId) -> Self {
        Self { rollup_network_id, last_verified_exit_root: None }
    }

    pub fn record_verified_batch(&mut self, batch_number: u64, exit_root: B256) {
        debug!(batch_number, exit_root = %exit_root, "Tracking verified batch exit root.");
        self.last_verified_exit_root = Some(exit_root);
    }

    /// Applies an `UpdateGlobalExitRoot` event under the window
    /// transaction, assigning the next contiguous number.
    pub async fn observe_l1(
        &mut self,
        txn: &mut dyn StoreTxn,
        mainnet_root: B256,
        rollup_root: B256,
        block_id: BlockId,
    ) -> Result<GlobalExitRoot, SyncError> {
        let mainnet_known = txn
            .deposit_count_by_root(NetworkId::MAINNET, mainnet_root)
            .await?
            .is_some();
        let rollup_known = txn
            .deposit_count_by_root(self.rollup_network_id, rollup_root)
            .await?
            .is_some()
            || self.last_verified_exit_root == Some(rollup_root);
        if !mainnet_known || !rollup_known {
            return Err(SyncError::GerMismatch { mainnet_root, rollup_root });
        }
        Ok(txn
            .insert_ger(&NewGlobalExitRoot {
                mainnet_root,
                rollup_root,
                block_id,
                source: GerSource::L1,
            })
            .await?)
    }
}

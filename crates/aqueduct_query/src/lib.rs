//! Read-only bridge service: deposits and claims by destination, wrapped
//! token lookups, and claim-proof assembly against the global exit root a
//! user must quote on chain.

use alloy_primitives::{Address, B256};
use aqueduct_exit_tree::{proof, verify, TreeError, TREE_HEIGHT};
use aqueduct_storage::{SnapshotNodes, StorageError, Store};
use aqueduct_types::{Claim, Deposit, GlobalExitRoot, NetworkId, TokenWrapped};
use tracing::{debug, instrument};

pub type QueryResult<T> = Result<T, QueryError>;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// The requested entity is not recorded.
    #[error("not found")]
    NotFound,
    /// The deposit exists but is not yet covered by an L1-confirmed global
    /// exit root; the claim cannot be proven yet.
    #[error("not ready: deposit is not yet enclosed by a global exit root")]
    NotReady,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// Everything a destination-chain claim transaction needs.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ClaimProof {
    pub deposit: Deposit,
    /// Sibling path, leaf to root, folding to the enclosing exit root.
    pub siblings: [B256; TREE_HEIGHT],
    pub main_exit_root: B256,
    pub rollup_exit_root: B256,
    /// `keccak256(main_exit_root || rollup_exit_root)`; the anchor the
    /// destination chain checks against.
    pub global_exit_root: B256,
    pub ger_number: u64,
}

/// Snapshot-consistent query surface over the store.
pub struct BridgeQueryService {
    store: std::sync::Arc<dyn Store>,
}

impl BridgeQueryService {
    pub fn new(store: std::sync::Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Deposits addressed to `destination`, across all origin networks.
    pub async fn get_bridges(&self, destination: Address) -> QueryResult<Vec<Deposit>> {
        Ok(self.store.deposits_by_destination(destination).await?)
    }

    /// Claims executed for `destination`, across all networks.
    pub async fn get_claims(&self, destination: Address) -> QueryResult<Vec<Claim>> {
        Ok(self.store.claims_by_destination(destination).await?)
    }

    pub async fn get_claim(
        &self,
        network_id: NetworkId,
        origin_network: NetworkId,
        leaf_index: u32,
    ) -> QueryResult<Claim> {
        self.store.claim(network_id, origin_network, leaf_index).await?.ok_or(QueryError::NotFound)
    }

    pub async fn get_token_wrapped(
        &self,
        origin_network: NetworkId,
        origin_token: Address,
    ) -> QueryResult<TokenWrapped> {
        self.store.token_wrapped(origin_network, origin_token).await?.ok_or(QueryError::NotFound)
    }

    pub async fn get_latest_ger(&self) -> QueryResult<GlobalExitRoot> {
        self.store.latest_ger(None).await?.ok_or(QueryError::NotFound)
    }

    /// Assembles the Merkle path for `(network_id, deposit_count)` at the
    /// tree state committed by the enclosing L1 global exit root.
    #[instrument(skip(self), err)]
    pub async fn get_proof(
        &self,
        network_id: NetworkId,
        deposit_count: u32,
    ) -> QueryResult<ClaimProof> {
        let deposit = self
            .store
            .deposit(network_id, deposit_count)
            .await?
            .ok_or(QueryError::NotFound)?;
        let ger = self
            .store
            .find_enclosing_ger(network_id, deposit_count)
            .await?
            .ok_or(QueryError::NotReady)?;

        let exit_root = ger.exit_root_for(network_id);
        let tree_size = self
            .store
            .deposit_count_by_root(network_id, exit_root)
            .await?
            .ok_or_else(|| StorageError::Inconsistency {
                msg: format!("enclosing exit root {exit_root} no longer resolves to a tree size"),
            })?;

        let mut nodes = SnapshotNodes(self.store.as_ref());
        let siblings = proof(&mut nodes, network_id, deposit_count, tree_size).await?;
        debug_assert!(verify(deposit.leaf_hash(), deposit_count, &siblings, exit_root));
        debug!(
            network_id = %network_id,
            deposit_count,
            ger_number = ger.number,
            tree_size,
            "Assembled claim proof.",
        );

        Ok(ClaimProof {
            deposit,
            siblings,
            main_exit_root: ger.mainnet_root,
            rollup_exit_root: ger.rollup_root,
            global_exit_root: ger.global_hash(),
            ger_number: ger.number,
        })
    }
}

#[cfg(test)]
#[path = "query_test.rs"]
mod query_test;

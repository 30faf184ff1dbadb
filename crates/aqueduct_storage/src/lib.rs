//! Transactional persistence behind a narrow trait surface.
//!
//! The synchronizer is the only writer; every mutation of a sync window
//! happens under one [`StoreTxn`] and becomes durable atomically with the
//! window's block rows. Readers get snapshot-consistent views through
//! [`Store`].
//!
//! Two backends: [`postgres::PostgresStore`] for production and
//! [`mem::InMemoryStore`] for tests and tooling.

use alloy_primitives::{Address, B256};
use aqueduct_exit_tree::store::{NodeReader, NodeStoreError, NodeWriter, TreeNode};
use aqueduct_types::{
    Block, BlockId, BlockNumber, Claim, Deposit, GerSource, GlobalExitRoot, NetworkId,
    TokenWrapped,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub mod mem;
pub mod postgres;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("inconsistent storage state: {msg}")]
    Inconsistency { msg: String },
}

impl StorageError {
    pub(crate) fn inconsistency(msg: impl Into<String>) -> Self {
        StorageError::Inconsistency { msg: msg.into() }
    }
}

impl From<StorageError> for NodeStoreError {
    fn from(err: StorageError) -> Self {
        NodeStoreError(Box::new(err))
    }
}

/// A block as handed to [`StoreTxn::insert_block`]; the store assigns the
/// row id.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NewBlock {
    pub network_id: NetworkId,
    pub number: BlockNumber,
    pub hash: B256,
    pub parent_hash: B256,
    pub received_at: DateTime<Utc>,
}

impl NewBlock {
    pub fn into_block(self, id: BlockId) -> Block {
        Block {
            id,
            network_id: self.network_id,
            number: self.number,
            hash: self.hash,
            parent_hash: self.parent_hash,
            received_at: self.received_at,
        }
    }
}

/// A global exit root as handed to [`StoreTxn::insert_ger`]; the store
/// assigns the next contiguous number.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NewGlobalExitRoot {
    pub mainnet_root: B256,
    pub rollup_root: B256,
    pub block_id: BlockId,
    pub source: GerSource,
}

/// Snapshot-consistent read surface, shared by the query service and the
/// synchronizers between ticks.
#[async_trait]
pub trait Store: Send + Sync {
    /// Opens a write transaction. The synchronizer of a network is the only
    /// caller for that network's rows.
    async fn begin(&self) -> StorageResult<Box<dyn StoreTxn>>;

    async fn latest_block(&self, network_id: NetworkId) -> StorageResult<Option<Block>>;
    async fn block_by_number(
        &self,
        network_id: NetworkId,
        number: BlockNumber,
    ) -> StorageResult<Option<Block>>;

    async fn deposit(
        &self,
        network_id: NetworkId,
        deposit_count: u32,
    ) -> StorageResult<Option<Deposit>>;
    /// Number of committed deposits for the network, i.e. the exit tree
    /// size.
    async fn deposit_count(&self, network_id: NetworkId) -> StorageResult<u32>;
    /// Resolves an exit root to the tree size that produced it. The empty
    /// root resolves to 0.
    async fn deposit_count_by_root(
        &self,
        network_id: NetworkId,
        root: B256,
    ) -> StorageResult<Option<u32>>;
    async fn deposits_by_destination(&self, address: Address) -> StorageResult<Vec<Deposit>>;

    async fn claims_by_destination(&self, address: Address) -> StorageResult<Vec<Claim>>;
    async fn claim(
        &self,
        network_id: NetworkId,
        origin_network: NetworkId,
        leaf_index: u32,
    ) -> StorageResult<Option<Claim>>;

    async fn token_wrapped(
        &self,
        origin_network: NetworkId,
        origin_token: Address,
    ) -> StorageResult<Option<TokenWrapped>>;

    /// With a source filter, the highest-numbered row of that source; with
    /// `None`, the most recently anchored row across sources.
    async fn latest_ger(&self, source: Option<GerSource>)
        -> StorageResult<Option<GlobalExitRoot>>;
    /// Looks up an L1-sourced row by its number; that is the sequence claim
    /// callers quote.
    async fn ger_by_number(&self, number: u64) -> StorageResult<Option<GlobalExitRoot>>;
    /// The smallest L1-sourced global exit root whose relevant component
    /// (mainnet for network 0, rollup otherwise) commits to a tree state
    /// containing the given deposit.
    async fn find_enclosing_ger(
        &self,
        network_id: NetworkId,
        deposit_count: u32,
    ) -> StorageResult<Option<GlobalExitRoot>>;

    async fn tree_node(
        &self,
        network_id: NetworkId,
        depth: u8,
        index: u32,
    ) -> StorageResult<Option<B256>>;
}

/// One write transaction. Dropped without [`StoreTxn::commit`], nothing is
/// persisted.
#[async_trait]
pub trait StoreTxn: Send {
    async fn insert_block(&mut self, block: &NewBlock) -> StorageResult<BlockId>;
    async fn insert_deposit(&mut self, deposit: &Deposit) -> StorageResult<()>;
    async fn insert_claim(&mut self, claim: &Claim) -> StorageResult<()>;
    async fn insert_token_wrapped(&mut self, token: &TokenWrapped) -> StorageResult<()>;
    /// Assigns `latest number + 1` within the row's source and persists.
    /// L1 and trusted rows are numbered independently, so each sequence
    /// stays contiguous from 1, also after reorg deletions that remove one
    /// source's rows around surviving rows of the other.
    async fn insert_ger(&mut self, ger: &NewGlobalExitRoot) -> StorageResult<GlobalExitRoot>;

    async fn deposit_count(&mut self, network_id: NetworkId) -> StorageResult<u32>;
    async fn deposit_count_by_root(
        &mut self,
        network_id: NetworkId,
        root: B256,
    ) -> StorageResult<Option<u32>>;

    async fn tree_node(
        &mut self,
        network_id: NetworkId,
        depth: u8,
        index: u32,
    ) -> StorageResult<Option<B256>>;
    async fn put_tree_nodes(
        &mut self,
        network_id: NetworkId,
        nodes: &[TreeNode],
    ) -> StorageResult<()>;
    /// Deletes every node whose subtree is not complete at `leaf_count`.
    /// Together with [`StoreTxn::delete_from_block`] this is the reorg
    /// rewind.
    async fn truncate_tree(&mut self, network_id: NetworkId, leaf_count: u32)
        -> StorageResult<()>;

    /// Deletes every block of the network with id greater than `block_id`,
    /// cascading to the deposits, claims, wrapped tokens and global exit
    /// roots anchored to the deleted blocks.
    async fn delete_from_block(
        &mut self,
        network_id: NetworkId,
        block_id: BlockId,
    ) -> StorageResult<()>;

    async fn commit(self: Box<Self>) -> StorageResult<()>;
    async fn rollback(self: Box<Self>) -> StorageResult<()>;
}

// The tree engine walks and writes nodes through the enclosing transaction.
#[async_trait]
impl NodeReader for Box<dyn StoreTxn> {
    async fn node(
        &mut self,
        network_id: NetworkId,
        depth: u8,
        index: u32,
    ) -> Result<Option<B256>, NodeStoreError> {
        self.tree_node(network_id, depth, index).await.map_err(Into::into)
    }
}

#[async_trait]
impl NodeWriter for Box<dyn StoreTxn> {
    async fn put_nodes(
        &mut self,
        network_id: NetworkId,
        nodes: &[TreeNode],
    ) -> Result<(), NodeStoreError> {
        self.put_tree_nodes(network_id, nodes).await.map_err(Into::into)
    }
}

/// Adapter exposing a [`Store`]'s snapshot reads as a tree-node reader, for
/// proof generation outside any transaction.
pub struct SnapshotNodes<'a>(pub &'a dyn Store);

#[async_trait]
impl NodeReader for SnapshotNodes<'_> {
    async fn node(
        &mut self,
        network_id: NetworkId,
        depth: u8,
        index: u32,
    ) -> Result<Option<B256>, NodeStoreError> {
        self.0.tree_node(network_id, depth, index).await.map_err(Into::into)
    }
}

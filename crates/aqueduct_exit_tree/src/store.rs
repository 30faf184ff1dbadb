//! The narrow node-store seam between the tree engine and persistence.
//!
//! Every operation runs under a transaction handle supplied by the caller;
//! atomicity is the caller's responsibility.

use alloy_primitives::B256;
use aqueduct_types::NetworkId;
use async_trait::async_trait;

/// Opaque error raised by a node-store backend.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct NodeStoreError(#[from] pub Box<dyn std::error::Error + Send + Sync>);

/// A materialized tree node. `depth` 0 is the leaf level.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TreeNode {
    pub depth: u8,
    pub index: u32,
    pub hash: B256,
}

/// Read access to persisted tree nodes. Absence at `(depth, index)` means
/// the zero-subtree hash of that depth.
///
/// Takes `&mut self` so transaction handles, whose queries require
/// exclusive access to the underlying connection, can implement it
/// directly.
#[async_trait]
pub trait NodeReader: Send {
    async fn node(
        &mut self,
        network_id: NetworkId,
        depth: u8,
        index: u32,
    ) -> Result<Option<B256>, NodeStoreError>;
}

/// Write access, used by [`crate::ExitTree::add_leaf`] under the enclosing
/// transaction.
#[async_trait]
pub trait NodeWriter: NodeReader {
    /// Upserts the batch of nodes recomputed by one leaf append.
    async fn put_nodes(
        &mut self,
        network_id: NetworkId,
        nodes: &[TreeNode],
    ) -> Result<(), NodeStoreError>;
}

//! In-memory node store for tree-level tests.

use std::collections::HashMap;

use alloy_primitives::B256;
use aqueduct_types::NetworkId;
use async_trait::async_trait;

use crate::store::{NodeReader, NodeStoreError, NodeWriter, TreeNode};
use crate::TREE_HEIGHT;

/// A plain map of `(network, depth, index) → hash`.
#[derive(Debug, Default)]
pub struct InMemoryNodes {
    nodes: HashMap<(NetworkId, u8, u32), B256>,
}

impl InMemoryNodes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every node whose subtree is not complete at `leaf_count`,
    /// mirroring the storage backends' reorg rewind.
    pub fn truncate(&mut self, network_id: NetworkId, leaf_count: u32) {
        self.nodes.retain(|(network, depth, index), _| {
            *network != network_id || u64::from(*index) < u64::from(leaf_count) >> *depth
        });
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[async_trait]
impl NodeReader for InMemoryNodes {
    async fn node(
        &mut self,
        network_id: NetworkId,
        depth: u8,
        index: u32,
    ) -> Result<Option<B256>, NodeStoreError> {
        Ok(self.nodes.get(&(network_id, depth, index)).copied())
    }
}

#[async_trait]
impl NodeWriter for InMemoryNodes {
    async fn put_nodes(
        &mut self,
        network_id: NetworkId,
        nodes: &[TreeNode],
    ) -> Result<(), NodeStoreError> {
        for node in nodes {
            debug_assert!(usize::from(node.depth) <= TREE_HEIGHT);
            self.nodes.insert((network_id, node.depth, node.index), node.hash);
        }
        Ok(())
    }
}

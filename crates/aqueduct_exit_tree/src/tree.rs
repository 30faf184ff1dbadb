//! The mutable tree state owned by a synchronizer pipeline.

use std::num::NonZeroUsize;

use alloy_primitives::B256;
use aqueduct_types::NetworkId;
use lru::LruCache;
use tracing::debug;

use crate::store::{NodeReader, NodeWriter, TreeNode};
use crate::{replay, zero_hashes, TreeError, TREE_HEIGHT};

// Covers the full frontier of the tree plus recently recomputed interior
// nodes, so consecutive appends rarely touch the store for siblings.
const NODE_CACHE_SIZE: usize = 4096;

/// One network's exit tree.
///
/// At most one mutating call per network at a time; the owning synchronizer
/// enforces this by holding the tree exclusively. `deposit_count` mirrors
/// the number of committed deposit rows for the network; the caller must
/// only let it advance together with a committed transaction.
pub struct ExitTree {
    network_id: NetworkId,
    deposit_count: u32,
    cache: LruCache<(u8, u32), B256>,
}

impl ExitTree {
    pub fn new(network_id: NetworkId, deposit_count: u32) -> Self {
        let capacity = NonZeroUsize::new(NODE_CACHE_SIZE).expect("cache size is non-zero");
        Self { network_id, deposit_count, cache: LruCache::new(capacity) }
    }

    pub fn network_id(&self) -> NetworkId {
        self.network_id
    }

    pub fn deposit_count(&self) -> u32 {
        self.deposit_count
    }

    /// Appends a leaf commitment and returns the new root.
    ///
    /// `expected_count` is the leaf index the caller derived from the
    /// on-chain event; a mismatch fails with [`TreeError::OutOfOrder`]
    /// without touching the store. The recomputed path (leaf included) is
    /// written as one batch under the caller's transaction.
    pub async fn add_leaf<S>(
        &mut self,
        store: &mut S,
        leaf_hash: B256,
        expected_count: u32,
    ) -> Result<B256, TreeError>
    where
        S: NodeWriter + ?Sized,
    {
        if expected_count != self.deposit_count {
            return Err(TreeError::OutOfOrder { expected: self.deposit_count, got: expected_count });
        }
        let index = self.deposit_count;
        let zeros = zero_hashes();

        let mut batch = Vec::with_capacity(TREE_HEIGHT + 1);
        batch.push(TreeNode { depth: 0, index, hash: leaf_hash });
        let mut node = leaf_hash;
        for depth in 0..u8::try_from(TREE_HEIGHT).expect("height fits in u8") {
            let idx = index >> depth;
            let sibling_index = idx ^ 1;
            // Under append-only growth the right sibling of the walk is
            // always an empty subtree; only left siblings are materialized.
            let sibling = if sibling_index < idx {
                self.fetch(store, depth, sibling_index).await?
            } else {
                zeros[usize::from(depth)]
            };
            node = if idx & 1 == 0 {
                crate::hash_pair(node, sibling)
            } else {
                crate::hash_pair(sibling, node)
            };
            batch.push(TreeNode { depth: depth + 1, index: idx >> 1, hash: node });
        }

        store.put_nodes(self.network_id, &batch).await?;
        for entry in &batch {
            self.cache.put((entry.depth, entry.index), entry.hash);
        }
        self.deposit_count += 1;
        debug!(
            network_id = %self.network_id,
            deposit_count = self.deposit_count,
            root = %node,
            "Appended exit tree leaf.",
        );
        Ok(node)
    }

    /// The current root: the stored depth-32 node, or `Z[32]` when empty.
    pub async fn root<S>(&self, store: &mut S) -> Result<B256, TreeError>
    where
        S: NodeReader + ?Sized,
    {
        replay::root_at(store, self.network_id, self.deposit_count).await
    }

    /// Resets the in-memory state after a reorg rewound the persisted rows.
    /// The cache may hold nodes past the new frontier, so it is dropped
    /// wholesale.
    pub fn rewind(&mut self, new_count: u32) {
        self.deposit_count = new_count;
        self.cache.clear();
    }

    async fn fetch<S>(&mut self, store: &mut S, depth: u8, index: u32) -> Result<B256, TreeError>
    where
        S: NodeReader + ?Sized,
    {
        if let Some(hash) = self.cache.get(&(depth, index)) {
            return Ok(*hash);
        }
        let hash = store
            .node(self.network_id, depth, index)
            .await?
            .ok_or(TreeError::MissingNode { depth, index })?;
        self.cache.put((depth, index), hash);
        Ok(hash)
    }
}

#[cfg(test)]
#[path = "tree_test.rs"]
mod tree_test;

//! Reconstruction of node values at historical tree sizes.
//!
//! A claim proof must fold to the exit root embedded in a specific global
//! exit root, which usually predates the current tree tip. Instead of
//! retaining historical siblings, node values are rebuilt on demand:
//! subtrees complete at the target size are immutable under append, so
//! their stored value is authoritative; empty subtrees are the zero table;
//! the single partial node per depth along the frontier is recomputed from
//! its children.

use alloy_primitives::B256;
use aqueduct_types::NetworkId;
use async_recursion::async_recursion;

use crate::store::NodeReader;
use crate::{hash_pair, zero_hashes, TreeError, TREE_HEIGHT};

/// The value of node `(depth, index)` in a tree holding exactly `at_count`
/// leaves.
#[async_recursion]
pub async fn node_at<S>(
    store: &mut S,
    network_id: NetworkId,
    depth: u8,
    index: u32,
    at_count: u32,
) -> Result<B256, TreeError>
where
    S: NodeReader + ?Sized,
{
    let first_leaf = u64::from(index) << depth;
    let leaves_spanned = 1u64 << depth;
    let count = u64::from(at_count);

    if first_leaf >= count {
        return Ok(zero_hashes()[usize::from(depth)]);
    }
    if first_leaf + leaves_spanned <= count {
        return store
            .node(network_id, depth, index)
            .await?
            .ok_or(TreeError::MissingNode { depth, index });
    }
    // Partial subtree. Depth 0 spans one leaf and is never partial.
    debug_assert!(depth > 0);
    let left = node_at(store, network_id, depth - 1, index * 2, at_count).await?;
    let right = node_at(store, network_id, depth - 1, index * 2 + 1, at_count).await?;
    Ok(hash_pair(left, right))
}

/// The root of a tree holding exactly `at_count` leaves.
pub async fn root_at<S>(
    store: &mut S,
    network_id: NetworkId,
    at_count: u32,
) -> Result<B256, TreeError>
where
    S: NodeReader + ?Sized,
{
    node_at(store, network_id, u8::try_from(TREE_HEIGHT).expect("height fits in u8"), 0, at_count)
        .await
}

/// Sibling path of `leaf_index`, leaf to root, in a tree of size
/// `at_count`. Valid for any `at_count > leaf_index`; with
/// `at_count == leaf_index + 1` this is the path as it existed immediately
/// after the leaf was appended.
pub async fn proof<S>(
    store: &mut S,
    network_id: NetworkId,
    leaf_index: u32,
    at_count: u32,
) -> Result<[B256; TREE_HEIGHT], TreeError>
where
    S: NodeReader + ?Sized,
{
    if leaf_index >= at_count {
        return Err(TreeError::LeafOutOfRange { leaf_index, size: at_count });
    }
    let mut siblings = [B256::ZERO; TREE_HEIGHT];
    for depth in 0..u8::try_from(TREE_HEIGHT).expect("height fits in u8") {
        let sibling_index = (leaf_index >> depth) ^ 1;
        siblings[usize::from(depth)] =
            node_at(store, network_id, depth, sibling_index, at_count).await?;
    }
    Ok(siblings)
}

/// Folds `siblings` with the leaf and compares against `root`, the same
/// check the destination chain performs on a claim.
pub fn verify(leaf_hash: B256, leaf_index: u32, siblings: &[B256; TREE_HEIGHT], root: B256) -> bool {
    let mut node = leaf_hash;
    for (depth, sibling) in siblings.iter().enumerate() {
        node = if (leaf_index >> depth) & 1 == 0 {
            hash_pair(node, *sibling)
        } else {
            hash_pair(*sibling, node)
        };
    }
    node == root
}

#[cfg(test)]
#[path = "replay_test.rs"]
mod replay_test;

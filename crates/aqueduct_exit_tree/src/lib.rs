//! Per-network append-only sparse Merkle trees of deposit commitments.
//!
//! Each network's exit tree has fixed height [`TREE_HEIGHT`] and capacity
//! `2^32` leaves. The tree is materialized as `(depth, index) → hash` rows
//! behind the [`store::NodeReader`]/[`store::NodeWriter`] seam; a node
//! absent from the store has the zero-subtree value of its depth.

use std::sync::OnceLock;

use alloy_primitives::{keccak256, B256};

pub mod replay;
pub mod store;
pub mod tree;

#[cfg(any(test, feature = "testing"))]
pub mod test_utils;

pub use replay::{node_at, proof, root_at, verify};
pub use store::{NodeReader, NodeStoreError, NodeWriter, TreeNode};
pub use tree::ExitTree;

/// Height of every exit tree. Leaves live at depth 0, the root at depth 32.
pub const TREE_HEIGHT: usize = 32;

/// Keccak-256 over the 64-byte concatenation of two children. No domain tag
/// is prepended; this matches the on-chain verifier.
pub fn hash_pair(left: B256, right: B256) -> B256 {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left.as_slice());
    buf[32..].copy_from_slice(right.as_slice());
    keccak256(buf)
}

/// The zero-subtree table `Z[0..=32]`: `Z[0]` is the zero hash and
/// `Z[d + 1] = keccak256(Z[d] ‖ Z[d])`. `Z[d]` is the value of any node at
/// depth `d` with no leaves beneath it.
pub fn zero_hashes() -> &'static [B256; TREE_HEIGHT + 1] {
    static ZERO_HASHES: OnceLock<[B256; TREE_HEIGHT + 1]> = OnceLock::new();
    ZERO_HASHES.get_or_init(|| {
        let mut table = [B256::ZERO; TREE_HEIGHT + 1];
        for depth in 1..=TREE_HEIGHT {
            table[depth] = hash_pair(table[depth - 1], table[depth - 1]);
        }
        table
    })
}

/// Errors of the exit tree engine.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("deposit arrived with index {got}, tree expects {expected}")]
    OutOfOrder { expected: u32, got: u32 },
    #[error("leaf {leaf_index} is outside a tree of size {size}")]
    LeafOutOfRange { leaf_index: u32, size: u32 },
    #[error("missing tree node at depth {depth} index {index}")]
    MissingNode { depth: u8, index: u32 },
    #[error(transparent)]
    Store(#[from] NodeStoreError),
}

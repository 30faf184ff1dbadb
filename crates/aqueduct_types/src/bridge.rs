//! Deposits, claims and wrapped-token records.

use alloy_primitives::{keccak256, Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::{BlockId, NetworkId};

/// Byte length of the packed leaf pre-image:
/// `leaf_type:u8 ‖ origin_network:u32 ‖ origin_address:20B ‖
/// destination_network:u32 ‖ destination_address:20B ‖ amount:32B ‖
/// keccak256(metadata):32B`.
const LEAF_PREIMAGE_LEN: usize = 1 + 4 + 20 + 4 + 20 + 32 + 32;

/// Kind of a deposit leaf. The discriminant is the first byte of the packed
/// leaf pre-image and must match the on-chain verifier.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum LeafType {
    /// A locked or burned asset.
    Asset = 0,
    /// An arbitrary cross-domain message.
    Message = 1,
}

impl LeafType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown leaf type {0}")]
pub struct UnknownLeafType(pub u8);

impl TryFrom<u8> for LeafType {
    type Error = UnknownLeafType;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(LeafType::Asset),
            1 => Ok(LeafType::Message),
            other => Err(UnknownLeafType(other)),
        }
    }
}

/// A bridge deposit recorded on its origin network.
///
/// Immutable once committed; removed only when the enclosing block is rolled
/// back by a reorg.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Deposit {
    /// Origin network.
    pub network_id: NetworkId,
    pub leaf_type: LeafType,
    /// For asset leaves: the origin token contract. For message leaves: the
    /// sending account.
    pub origin_address: Address,
    pub amount: U256,
    pub destination_network: NetworkId,
    pub destination_address: Address,
    /// Opaque payload. Token metadata for asset leaves, message body for
    /// message leaves.
    pub metadata: Vec<u8>,
    /// Per-origin-network leaf index, counted from 0.
    pub deposit_count: u32,
    pub block_id: BlockId,
    /// Root of the origin exit tree immediately after this leaf was
    /// appended. Resolves an exit root seen on chain back to a tree size.
    pub exit_root: B256,
}

impl Deposit {
    /// The leaf commitment appended to the origin network's exit tree.
    ///
    /// Packed big-endian with fixed widths; the layout is fixed by the
    /// on-chain verifier and reproduced bit-exact here.
    pub fn leaf_hash(&self) -> B256 {
        let mut buf = Vec::with_capacity(LEAF_PREIMAGE_LEN);
        buf.push(self.leaf_type.as_u8());
        buf.extend_from_slice(&self.network_id.0.to_be_bytes());
        buf.extend_from_slice(self.origin_address.as_slice());
        buf.extend_from_slice(&self.destination_network.0.to_be_bytes());
        buf.extend_from_slice(self.destination_address.as_slice());
        buf.extend_from_slice(&self.amount.to_be_bytes::<32>());
        buf.extend_from_slice(keccak256(&self.metadata).as_slice());
        debug_assert_eq!(buf.len(), LEAF_PREIMAGE_LEN);
        keccak256(&buf)
    }
}

/// Consumption of a deposit on its destination network.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    /// Destination network, where the claim was executed.
    pub network_id: NetworkId,
    /// Index of the consumed deposit in its origin exit tree.
    pub index: u32,
    pub origin_network: NetworkId,
    pub origin_address: Address,
    pub amount: U256,
    pub destination_address: Address,
    pub block_id: BlockId,
}

/// Wrapped-token mapping emitted by a destination bridge the first time a
/// foreign asset is minted there.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct TokenWrapped {
    pub origin_network: NetworkId,
    pub origin_token_address: Address,
    pub wrapped_token_address: Address,
    pub block_id: BlockId,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

#[cfg(test)]
#[path = "bridge_test.rs"]
mod bridge_test;

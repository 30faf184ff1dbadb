//! Domain types shared by every Aqueduct crate.
//!
//! The bridge observes several execution domains. Each domain is identified
//! by a [`NetworkId`]; deposits recorded on a domain are committed into that
//! domain's exit tree and later claimed on the destination domain against a
//! [`GlobalExitRoot`](crate::ger::GlobalExitRoot).

use std::fmt;

use alloy_primitives::B256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod bridge;
pub mod ger;

pub use bridge::{Claim, Deposit, LeafType, TokenWrapped};
pub use ger::{GerSource, GlobalExitRoot};

/// Identifier of an execution domain. `0` is the settlement chain by
/// convention; rollups are assigned `1..` by configuration.
#[derive(
    Debug, Default, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub struct NetworkId(pub u32);

impl NetworkId {
    /// The settlement ("mainnet") network.
    pub const MAINNET: NetworkId = NetworkId(0);

    pub fn is_rollup(&self) -> bool {
        *self != Self::MAINNET
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Height of a block within a single network.
#[derive(
    Debug, Default, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub struct BlockNumber(pub u64);

impl BlockNumber {
    /// The block number preceding this one, or `None` at genesis.
    pub fn prev(&self) -> Option<BlockNumber> {
        self.0.checked_sub(1).map(BlockNumber)
    }

    /// The block number following this one. Panics on `u64::MAX`, which no
    /// chain reaches.
    pub fn next(&self) -> BlockNumber {
        BlockNumber(self.0.checked_add(1).expect("block number overflow"))
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Store-local row id of a committed block. Monotone from 1 and never
/// reused, including across reorg deletions.
#[derive(
    Debug, Default, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub struct BlockId(pub u64);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A block committed by a synchronizer pipeline.
///
/// Within one network the pair `(number, hash)` is unique and `number` is
/// strictly increasing in insertion order, modulo reorg rewinds.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub network_id: NetworkId,
    pub number: BlockNumber,
    pub hash: B256,
    pub parent_hash: B256,
    pub received_at: DateTime<Utc>,
}

//! Global exit roots: the cross-domain commitment a claim is verified
//! against.

use alloy_primitives::{keccak256, B256};
use serde::{Deserialize, Serialize};

use crate::{BlockId, NetworkId};

/// Where a global exit root was observed.
///
/// L1-sourced roots come from the settlement chain's exit-root manager
/// contract and are final up to reorgs. Trusted roots come from the
/// sequencer broadcast stream ahead of L1 confirmation and are never used
/// to answer claim-proof queries.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GerSource {
    L1,
    Trusted,
}

impl GerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            GerSource::L1 => "l1",
            GerSource::Trusted => "trusted",
        }
    }
}

/// A recorded `(mainnet root, rollup root)` pair. `number` is monotone and
/// contiguous from 1 within its source; the L1 and trusted sequences are
/// independent, so a reorg deleting L1 rows cannot leave a gap behind a
/// surviving trusted row.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct GlobalExitRoot {
    pub number: u64,
    pub mainnet_root: B256,
    pub rollup_root: B256,
    pub block_id: BlockId,
    pub source: GerSource,
}

impl GlobalExitRoot {
    /// The on-chain anchor: `keccak256(mainnet_root ‖ rollup_root)`.
    pub fn global_hash(&self) -> B256 {
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(self.mainnet_root.as_slice());
        buf[32..].copy_from_slice(self.rollup_root.as_slice());
        keccak256(buf)
    }

    /// The component root a proof for `network` must fold to.
    pub fn exit_root_for(&self, network: NetworkId) -> B256 {
        if network.is_rollup() {
            self.rollup_root
        } else {
            self.mainnet_root
        }
    }
}

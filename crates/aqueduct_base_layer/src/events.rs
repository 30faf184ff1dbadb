//! Typed decoding of bridge and exit-root manager logs.

use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::{sol_data, SolEvent, SolType};
use aqueduct_types::bridge::UnknownLeafType;
use aqueduct_types::{LeafType, NetworkId};

/// ABI declarations of the five tracked events. The signatures are fixed by
/// the deployed contracts.
pub mod abi {
    alloy::sol! {
        #[derive(Debug)]
        event BridgeEvent(
            uint8 leafType,
            uint32 originNetwork,
            address originAddress,
            uint32 destinationNetwork,
            address destinationAddress,
            uint256 amount,
            bytes metadata,
            uint32 depositCount
        );

        #[derive(Debug)]
        event ClaimEvent(
            uint32 index,
            uint32 originNetwork,
            address originAddress,
            address destinationAddress,
            uint256 amount
        );

        #[derive(Debug)]
        event NewWrappedToken(
            uint32 originNetwork,
            address originTokenAddress,
            address wrappedTokenAddress,
            bytes metadata
        );

        #[derive(Debug)]
        event UpdateGlobalExitRoot(
            bytes32 indexed mainnetExitRoot,
            bytes32 indexed rollupExitRoot
        );

        #[derive(Debug)]
        event VerifyBatch(
            uint64 indexed numBatch,
            address indexed aggregator,
            bytes32 exitRoot
        );
    }
}

/// The topic0 hashes a log filter should track.
pub fn tracked_event_signatures() -> [B256; 5] {
    [
        abi::BridgeEvent::SIGNATURE_HASH,
        abi::ClaimEvent::SIGNATURE_HASH,
        abi::NewWrappedToken::SIGNATURE_HASH,
        abi::UpdateGlobalExitRoot::SIGNATURE_HASH,
        abi::VerifyBatch::SIGNATURE_HASH,
    ]
}

/// A decoded bridge-domain event.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum BridgeEvent {
    Deposit {
        leaf_type: LeafType,
        origin_network: NetworkId,
        origin_address: Address,
        destination_network: NetworkId,
        destination_address: Address,
        amount: U256,
        metadata: Vec<u8>,
        deposit_count: u32,
    },
    Claim {
        index: u32,
        origin_network: NetworkId,
        origin_address: Address,
        destination_address: Address,
        amount: U256,
    },
    NewWrappedToken {
        origin_network: NetworkId,
        origin_token_address: Address,
        wrapped_token_address: Address,
        name: String,
        symbol: String,
        decimals: u8,
    },
    UpdateGlobalExitRoot {
        mainnet_root: B256,
        rollup_root: B256,
    },
    VerifyBatch {
        batch_number: u64,
        aggregator: Address,
        exit_root: B256,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum EventDecodeError {
    #[error("log carries no topics")]
    MissingTopic,
    /// The log's first topic is not one of the tracked signatures; callers
    /// skip such logs.
    #[error("unrecognized event topic {0}")]
    UnknownTopic(B256),
    #[error("log with known topic failed to decode: {0}")]
    Malformed(#[from] alloy::sol_types::Error),
    #[error(transparent)]
    BadLeafType(#[from] UnknownLeafType),
}

/// Pure mapping from a raw log to a [`BridgeEvent`].
pub fn decode_event(log: &Log) -> Result<BridgeEvent, EventDecodeError> {
    let topic0 = log.topic0().ok_or(EventDecodeError::MissingTopic)?;
    match *topic0 {
        topic if topic == abi::BridgeEvent::SIGNATURE_HASH => {
            let event = abi::BridgeEvent::decode_log(&log.inner)?.data;
            Ok(BridgeEvent::Deposit {
                leaf_type: LeafType::try_from(event.leafType)?,
                origin_network: NetworkId(event.originNetwork),
                origin_address: event.originAddress,
                destination_network: NetworkId(event.destinationNetwork),
                destination_address: event.destinationAddress,
                amount: event.amount,
                metadata: event.metadata.to_vec(),
                deposit_count: event.depositCount,
            })
        }
        topic if topic == abi::ClaimEvent::SIGNATURE_HASH => {
            let event = abi::ClaimEvent::decode_log(&log.inner)?.data;
            Ok(BridgeEvent::Claim {
                index: event.index,
                origin_network: NetworkId(event.originNetwork),
                origin_address: event.originAddress,
                destination_address: event.destinationAddress,
                amount: event.amount,
            })
        }
        topic if topic == abi::NewWrappedToken::SIGNATURE_HASH => {
            let event = abi::NewWrappedToken::decode_log(&log.inner)?.data;
            let (name, symbol, decimals) = decode_token_metadata(&event.metadata)?;
            Ok(BridgeEvent::NewWrappedToken {
                origin_network: NetworkId(event.originNetwork),
                origin_token_address: event.originTokenAddress,
                wrapped_token_address: event.wrappedTokenAddress,
                name,
                symbol,
                decimals,
            })
        }
        topic if topic == abi::UpdateGlobalExitRoot::SIGNATURE_HASH => {
            let event = abi::UpdateGlobalExitRoot::decode_log(&log.inner)?.data;
            Ok(BridgeEvent::UpdateGlobalExitRoot {
                mainnet_root: event.mainnetExitRoot,
                rollup_root: event.rollupExitRoot,
            })
        }
        topic if topic == abi::VerifyBatch::SIGNATURE_HASH => {
            let event = abi::VerifyBatch::decode_log(&log.inner)?.data;
            Ok(BridgeEvent::VerifyBatch {
                batch_number: event.numBatch,
                aggregator: event.aggregator,
                exit_root: event.exitRoot,
            })
        }
        other => Err(EventDecodeError::UnknownTopic(other)),
    }
}

/// Wrapped-token metadata is `abi.encode(name, symbol, decimals)`.
pub fn decode_token_metadata(
    metadata: &[u8],
) -> Result<(String, String, u8), alloy::sol_types::Error> {
    <(sol_data::String, sol_data::String, sol_data::Uint<8>)>::abi_decode(metadata)
}

/// Inverse of [`decode_token_metadata`], for wiring tests and mocks.
pub fn encode_token_metadata(name: &str, symbol: &str, decimals: u8) -> Vec<u8> {
    <(sol_data::String, sol_data::String, sol_data::Uint<8>)>::abi_encode(&(
        name.to_owned(),
        symbol.to_owned(),
        decimals,
    ))
}

#[cfg(test)]
#[path = "events_test.rs"]
mod events_test;

//! Helpers for building raw logs in tests and mocked sources.

use alloy::primitives::{Address, LogData};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;

/// Wraps ABI-encoded event data into an RPC log with the ordering metadata
/// the synchronizer reads.
pub fn log_from_parts(
    address: Address,
    block_number: u64,
    log_index: u64,
    data: LogData,
) -> Log {
    Log {
        inner: alloy::primitives::Log { address, data },
        block_number: Some(block_number),
        log_index: Some(log_index),
        ..Default::default()
    }
}

/// Encodes a sol event value into an RPC log.
pub fn log_for_event<E: SolEvent>(
    address: Address,
    block_number: u64,
    log_index: u64,
    event: &E,
) -> Log {
    log_from_parts(address, block_number, log_index, event.encode_log_data())
}

//! Reorg rewind: after a fork and re-sync the store must be
//! indistinguishable from a from-scratch sync of the new chain.

mod common;

use std::time::Duration;

use alloy::primitives::{B256, U256};
use aqueduct_exit_tree::root_at;
use aqueduct_storage::mem::InMemoryStore;
use aqueduct_storage::{SnapshotNodes, Store};
use aqueduct_types::{BlockNumber, NetworkId};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use common::{deposit_log, start_pipeline, test_config, wait_for, FakeChain, ROLLUP};

const WAIT: Duration = Duration::from_secs(5);
const GENESIS: u64 = 100;

/// Everything observable about a network's indexed state, minus
/// storage-local artifacts (row ids, receive timestamps).
#[derive(Debug, PartialEq, Eq)]
struct CanonicalState {
    blocks: Vec<(u64, B256)>,
    deposits: Vec<(u32, B256, U256, B256)>,
    root: B256,
}

async fn canonical_state(store: &InMemoryStore, network: NetworkId) -> CanonicalState {
    let latest =
        store.latest_block(network).await.unwrap().expect("synced chain has blocks").number.0;
    let mut blocks = Vec::new();
    for number in GENESIS..=latest {
        let block =
            store.block_by_number(network, BlockNumber(number)).await.unwrap().expect("contiguous");
        blocks.push((number, block.hash));
    }
    let count = store.deposit_count(network).await.unwrap();
    let mut deposits = Vec::new();
    for index in 0..count {
        let deposit = store.deposit(network, index).await.unwrap().unwrap();
        deposits.push((index, deposit.leaf_hash(), deposit.amount, deposit.exit_root));
    }
    let mut nodes = SnapshotNodes(store);
    let root = root_at(&mut nodes, network, count).await.unwrap();
    CanonicalState { blocks, deposits, root }
}

#[tokio::test]
async fn rewind_and_resync_equals_fresh_sync_of_new_chain() {
    let _ = simple_logger::init_with_env();

    // Blocks 100..=110 with deposits at 105 and 108.
    let chain = FakeChain::new(GENESIS);
    for number in 100u64..=110 {
        let logs = match number {
            105 => vec![deposit_log(ROLLUP, 0, 1_000)],
            108 => vec![deposit_log(ROLLUP, 1, 2_000)],
            _ => Vec::new(),
        };
        chain.push_block(logs).await;
    }

    let store = InMemoryStore::new();
    let cancel = CancellationToken::new();
    let handle =
        start_pipeline(ROLLUP, &chain, &store, test_config(GENESIS), None, cancel.clone()).await;

    assert!(
        wait_for(
            || async {
                store
                    .latest_block(ROLLUP)
                    .await
                    .unwrap()
                    .is_some_and(|block| block.number == BlockNumber(110))
            },
            WAIT,
        )
        .await,
        "initial sync did not finish",
    );

    // The chain now forks at 107: the second deposit moves to block 109
    // with a different amount, and the chain grows to 112.
    chain.fork(107).await;
    for number in 107u64..=112 {
        let logs = match number {
            109 => vec![deposit_log(ROLLUP, 1, 9_000)],
            _ => Vec::new(),
        };
        chain.push_block(logs).await;
    }

    assert!(
        wait_for(
            || async {
                let moved = store
                    .deposit(ROLLUP, 1)
                    .await
                    .unwrap()
                    .is_some_and(|deposit| deposit.amount == U256::from(9_000));
                let caught_up = store
                    .latest_block(ROLLUP)
                    .await
                    .unwrap()
                    .is_some_and(|block| block.number == BlockNumber(112));
                moved && caught_up
            },
            WAIT,
        )
        .await,
        "rewind and resync did not converge",
    );
    cancel.cancel();
    handle.await.unwrap().unwrap();

    // Reference: a fresh pipeline over the already-forked chain.
    let fresh_store = InMemoryStore::new();
    let cancel = CancellationToken::new();
    let handle =
        start_pipeline(ROLLUP, &chain, &fresh_store, test_config(GENESIS), None, cancel.clone())
            .await;
    assert!(
        wait_for(
            || async {
                fresh_store
                    .latest_block(ROLLUP)
                    .await
                    .unwrap()
                    .is_some_and(|block| block.number == BlockNumber(112))
            },
            WAIT,
        )
        .await,
        "fresh sync did not finish",
    );
    cancel.cancel();
    handle.await.unwrap().unwrap();

    assert_eq!(
        canonical_state(&store, ROLLUP).await,
        canonical_state(&fresh_store, ROLLUP).await,
    );

    // The surviving deposit kept its pre-fork path.
    let kept = store.deposit(ROLLUP, 0).await.unwrap().unwrap();
    assert_eq!(kept.amount, U256::from(1_000));
}

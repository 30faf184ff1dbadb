//! Happy-path and failure-path pipeline flows against a fake chain.

mod common;

use std::time::Duration;

use alloy::primitives::Address;
use aqueduct_exit_tree::{root_at, TreeError};
use aqueduct_storage::mem::InMemoryStore;
use aqueduct_storage::{SnapshotNodes, Store};
use aqueduct_sync::SyncError;
use aqueduct_types::{BlockNumber, NetworkId};
use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use common::{
    claim_log, deposit_log, start_pipeline, test_config, wait_for, wrapped_token_log, FakeChain,
    ROLLUP,
};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn happy_flow_indexes_a_window_of_bridge_events() {
    let _ = simple_logger::init_with_env();
    let chain = FakeChain::new(100);
    chain.push_block(vec![deposit_log(ROLLUP, 0, 1_000)]).await;
    chain.push_block(Vec::new()).await;
    let last = chain
        .push_block(vec![
            deposit_log(ROLLUP, 1, 2_000),
            wrapped_token_log(NetworkId::MAINNET),
            claim_log(NetworkId::MAINNET, 4, 500),
        ])
        .await;

    let store = InMemoryStore::new();
    let cancel = CancellationToken::new();
    let handle =
        start_pipeline(ROLLUP, &chain, &store, test_config(100), None, cancel.clone()).await;

    let synced = wait_for(
        || async {
            store.deposit_count(ROLLUP).await.unwrap() == 2
                && store
                    .latest_block(ROLLUP)
                    .await
                    .unwrap()
                    .is_some_and(|block| block.number == BlockNumber(last))
        },
        WAIT,
    )
    .await;
    assert!(synced, "pipeline did not reach the chain head in time");

    // The persisted per-deposit roots agree with a replay of the stored
    // tree nodes.
    let deposit0 = store.deposit(ROLLUP, 0).await.unwrap().unwrap();
    let deposit1 = store.deposit(ROLLUP, 1).await.unwrap().unwrap();
    let mut nodes = SnapshotNodes(&store);
    assert_eq!(root_at(&mut nodes, ROLLUP, 1).await.unwrap(), deposit0.exit_root);
    assert_eq!(root_at(&mut nodes, ROLLUP, 2).await.unwrap(), deposit1.exit_root);
    assert_eq!(store.deposit_count_by_root(ROLLUP, deposit1.exit_root).await.unwrap(), Some(2));

    // Claim and wrapped-token rows landed with the deposit's window.
    let claims = store.claims_by_destination(Address::repeat_byte(0x22)).await.unwrap();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].index, 4);
    assert!(store
        .token_wrapped(NetworkId::MAINNET, Address::repeat_byte(0x11))
        .await
        .unwrap()
        .is_some());

    cancel.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn out_of_order_deposit_aborts_the_window_and_halts() {
    let _ = simple_logger::init_with_env();
    let chain = FakeChain::new(100);
    let good = chain
        .push_block(vec![
            deposit_log(ROLLUP, 0, 1),
            deposit_log(ROLLUP, 1, 2),
            deposit_log(ROLLUP, 2, 3),
        ])
        .await;

    let store = InMemoryStore::new();
    let cancel = CancellationToken::new();
    let handle =
        start_pipeline(ROLLUP, &chain, &store, test_config(100), None, cancel.clone()).await;

    assert!(
        wait_for(|| async { store.deposit_count(ROLLUP).await.unwrap() == 3 }, WAIT).await,
        "initial deposits not applied",
    );

    // A gap in the deposit counter: the tree expects 3.
    chain.push_block(vec![deposit_log(ROLLUP, 5, 4)]).await;

    let result = handle.await.unwrap();
    assert_matches!(
        result,
        Err(SyncError::Tree(TreeError::OutOfOrder { expected: 3, got: 5 }))
    );

    // The offending window never committed: counter unchanged, latest
    // block still the good one.
    assert_eq!(store.deposit_count(ROLLUP).await.unwrap(), 3);
    assert_eq!(
        store.latest_block(ROLLUP).await.unwrap().unwrap().number,
        BlockNumber(good),
    );
}

#[tokio::test]
async fn cancellation_is_clean() {
    let chain = FakeChain::new(100);
    chain.push_block(Vec::new()).await;

    let store = InMemoryStore::new();
    let cancel = CancellationToken::new();
    let handle =
        start_pipeline(ROLLUP, &chain, &store, test_config(100), None, cancel.clone()).await;

    assert!(
        wait_for(|| async { store.latest_block(ROLLUP).await.unwrap().is_some() }, WAIT).await,
    );
    cancel.cancel();
    handle.await.unwrap().unwrap();
}

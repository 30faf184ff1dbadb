use std::sync::Arc;

use alloy_primitives::{address, b256, keccak256, Address, B256, U256};
use aqueduct_exit_tree::{verify, zero_hashes, ExitTree, TREE_HEIGHT};
use aqueduct_storage::mem::InMemoryStore;
use aqueduct_storage::{NewBlock, NewGlobalExitRoot, Store, StoreTxn};
use aqueduct_types::{
    BlockNumber, Claim, Deposit, GerSource, LeafType, NetworkId, TokenWrapped,
};
use assert_matches::assert_matches;
use chrono::Utc;
use pretty_assertions::assert_eq;

use crate::{BridgeQueryService, QueryError};

const MAINNET: NetworkId = NetworkId::MAINNET;
const ROLLUP: NetworkId = NetworkId(1);

// Root produced by the single scenario deposit below; the same vector is
// pinned against the tree engine in the exit-tree tests.
const ROOT_AFTER_FIRST: B256 =
    b256!("53af3b8a1ac7644911b64d855709423afe3b39ea6a24ac52d9aaf96c9f7bbeb3");

fn new_block(network_id: NetworkId, number: u64) -> NewBlock {
    NewBlock {
        network_id,
        number: BlockNumber(number),
        hash: keccak256(format!("{network_id}-{number}")),
        parent_hash: keccak256(format!("{network_id}-{}", number.saturating_sub(1))),
        received_at: Utc::now(),
    }
}

fn rollup_deposit(count: u32) -> Deposit {
    Deposit {
        network_id: ROLLUP,
        leaf_type: LeafType::Asset,
        origin_address: address!("c949254d682d8c9ad5682521675b8f43b102aec4"),
        amount: U256::from(1_000_000_000_000_000_000_u64),
        destination_network: MAINNET,
        destination_address: address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266"),
        metadata: Vec::new(),
        deposit_count: count,
        block_id: aqueduct_types::BlockId(0),
        exit_root: B256::ZERO,
    }
}

/// Plays the synchronizer's part: appends `deposits` to the rollup tree
/// and persists them under one transaction.
async fn seed_deposits(store: &InMemoryStore, mut deposits: Vec<Deposit>) -> Vec<Deposit> {
    let mut txn = store.begin().await.unwrap();
    let block_id = txn.insert_block(&new_block(ROLLUP, 100)).await.unwrap();
    let count = deposits.first().map_or(0, |deposit| deposit.deposit_count);
    let mut tree = ExitTree::new(ROLLUP, count);
    for deposit in &mut deposits {
        deposit.block_id = block_id;
        deposit.exit_root =
            tree.add_leaf(&mut txn, deposit.leaf_hash(), deposit.deposit_count).await.unwrap();
        txn.insert_deposit(deposit).await.unwrap();
    }
    txn.commit().await.unwrap();
    deposits
}

async fn seed_l1_ger(store: &InMemoryStore, mainnet_root: B256, rollup_root: B256) -> u64 {
    let mut txn = store.begin().await.unwrap();
    let block_id = txn.insert_block(&new_block(MAINNET, 10)).await.unwrap();
    let ger = txn
        .insert_ger(&NewGlobalExitRoot {
            mainnet_root,
            rollup_root,
            block_id,
            source: GerSource::L1,
        })
        .await
        .unwrap();
    txn.commit().await.unwrap();
    ger.number
}

fn service(store: &InMemoryStore) -> BridgeQueryService {
    BridgeQueryService::new(Arc::new(store.clone()))
}

#[tokio::test]
async fn missing_deposit_is_not_found() {
    let store = InMemoryStore::new();
    let err = service(&store).get_proof(ROLLUP, 0).await.unwrap_err();
    assert_matches!(err, QueryError::NotFound);
}

#[tokio::test]
async fn unenclosed_deposit_is_not_ready() {
    let store = InMemoryStore::new();
    seed_deposits(&store, vec![rollup_deposit(0)]).await;
    let err = service(&store).get_proof(ROLLUP, 0).await.unwrap_err();
    assert_matches!(err, QueryError::NotReady);
}

#[tokio::test]
async fn claim_proof_before_any_settlement_deposit() {
    let store = InMemoryStore::new();
    let deposits = seed_deposits(&store, vec![rollup_deposit(0)]).await;
    assert_eq!(deposits[0].exit_root, ROOT_AFTER_FIRST);

    // Before any L1 deposit the manager publishes the literal zero word as
    // the mainnet exit root.
    let number = seed_l1_ger(&store, B256::ZERO, ROOT_AFTER_FIRST).await;

    let claim_proof = service(&store).get_proof(ROLLUP, 0).await.unwrap();
    assert_eq!(claim_proof.ger_number, number);
    assert_eq!(claim_proof.main_exit_root, B256::ZERO);
    assert_eq!(claim_proof.rollup_exit_root, ROOT_AFTER_FIRST);
    assert_eq!(&claim_proof.siblings[..], &zero_hashes()[..TREE_HEIGHT]);
    assert!(verify(
        claim_proof.deposit.leaf_hash(),
        0,
        &claim_proof.siblings,
        claim_proof.rollup_exit_root,
    ));

    // The anchor the user quotes on chain.
    let mut preimage = [0u8; 64];
    preimage[32..].copy_from_slice(ROOT_AFTER_FIRST.as_slice());
    assert_eq!(claim_proof.global_exit_root, keccak256(preimage));
}

#[tokio::test]
async fn proof_targets_the_enclosing_state_not_the_tip() {
    let store = InMemoryStore::new();
    let mut second = rollup_deposit(1);
    second.amount = U256::from(600_000_000_000_000_000_u64);
    let deposits = seed_deposits(&store, vec![rollup_deposit(0), second]).await;

    // Only the first deposit is covered by the announced root.
    seed_l1_ger(&store, B256::ZERO, deposits[0].exit_root).await;

    let claim_proof = service(&store).get_proof(ROLLUP, 0).await.unwrap();
    assert_eq!(claim_proof.rollup_exit_root, deposits[0].exit_root);
    assert!(verify(
        deposits[0].leaf_hash(),
        0,
        &claim_proof.siblings,
        deposits[0].exit_root,
    ));

    // The second deposit is not provable yet.
    assert_matches!(
        service(&store).get_proof(ROLLUP, 1).await.unwrap_err(),
        QueryError::NotReady
    );

    // Once a newer root lands, both are provable against it.
    seed_l1_ger(&store, B256::ZERO, deposits[1].exit_root).await;
    for deposit in &deposits {
        let claim_proof =
            service(&store).get_proof(ROLLUP, deposit.deposit_count).await.unwrap();
        assert!(verify(
            deposit.leaf_hash(),
            deposit.deposit_count,
            &claim_proof.siblings,
            claim_proof.rollup_exit_root,
        ));
    }
    // The first deposit's proof still folds to its own era's root when
    // queried against the first announcement: the enclosing row is the
    // smallest covering one.
    let claim_proof = service(&store).get_proof(ROLLUP, 0).await.unwrap();
    assert_eq!(claim_proof.rollup_exit_root, deposits[0].exit_root);
}

#[tokio::test]
async fn destination_queries_and_lookups() {
    let store = InMemoryStore::new();
    let deposits = seed_deposits(&store, vec![rollup_deposit(0)]).await;
    let destination = deposits[0].destination_address;

    let mut txn = store.begin().await.unwrap();
    let block_id = txn.insert_block(&new_block(MAINNET, 11)).await.unwrap();
    txn.insert_claim(&Claim {
        network_id: MAINNET,
        index: 0,
        origin_network: ROLLUP,
        origin_address: deposits[0].origin_address,
        amount: deposits[0].amount,
        destination_address: destination,
        block_id,
    })
    .await
    .unwrap();
    txn.insert_token_wrapped(&TokenWrapped {
        origin_network: ROLLUP,
        origin_token_address: deposits[0].origin_address,
        wrapped_token_address: Address::repeat_byte(0x77),
        block_id,
        name: "A COIN".to_owned(),
        symbol: "ACO".to_owned(),
        decimals: 18,
    })
    .await
    .unwrap();
    txn.commit().await.unwrap();

    let service = service(&store);
    assert_eq!(service.get_bridges(destination).await.unwrap(), deposits);
    let claims = service.get_claims(destination).await.unwrap();
    assert_eq!(claims.len(), 1);
    assert_eq!(service.get_claim(MAINNET, ROLLUP, 0).await.unwrap(), claims[0]);

    let token =
        service.get_token_wrapped(ROLLUP, deposits[0].origin_address).await.unwrap();
    assert_eq!(token.symbol, "ACO");
    assert_matches!(
        service.get_token_wrapped(ROLLUP, Address::repeat_byte(0x99)).await.unwrap_err(),
        QueryError::NotFound
    );
    assert_matches!(
        service.get_claim(MAINNET, ROLLUP, 9).await.unwrap_err(),
        QueryError::NotFound
    );
}

//! In-memory backend with staged transactions.
//!
//! Writes land on a working copy of the state; commit publishes the copy
//! atomically, so a transaction dropped on an error path rolls back by
//! construction. The state mutex is held for the duration of a write
//! transaction, which serializes writers the way the SQL backend's row
//! locks would. Adequate for tests and tooling.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use alloy_primitives::{Address, B256};
use aqueduct_exit_tree::store::TreeNode;
use aqueduct_exit_tree::{zero_hashes, TREE_HEIGHT};
use aqueduct_types::{
    Block, BlockId, BlockNumber, Claim, Deposit, GerSource, GlobalExitRoot, NetworkId,
    TokenWrapped,
};
use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    NewBlock, NewGlobalExitRoot, StorageError, StorageResult, Store, StoreTxn,
};

#[derive(Debug, Default, Clone)]
struct MemState {
    blocks: Vec<Block>,
    deposits: Vec<Deposit>,
    claims: Vec<Claim>,
    tokens: Vec<TokenWrapped>,
    gers: Vec<GlobalExitRoot>,
    nodes: HashMap<(NetworkId, u8, u32), B256>,
    // Highest block id ever assigned; never decremented, so ids are not
    // reused across reorg deletions.
    last_block_id: u64,
}

impl MemState {
    fn latest_block(&self, network_id: NetworkId) -> Option<Block> {
        self.blocks
            .iter()
            .filter(|block| block.network_id == network_id)
            .max_by_key(|block| block.id)
            .cloned()
    }

    fn block_by_number(&self, network_id: NetworkId, number: BlockNumber) -> Option<Block> {
        self.blocks
            .iter()
            .find(|block| block.network_id == network_id && block.number == number)
            .cloned()
    }

    fn deposit_count(&self, network_id: NetworkId) -> u32 {
        u32::try_from(
            self.deposits.iter().filter(|deposit| deposit.network_id == network_id).count(),
        )
        .expect("deposit count fits in u32")
    }

    fn deposit_count_by_root(&self, network_id: NetworkId, root: B256) -> Option<u32> {
        // On-chain managers publish the literal zero word before the first
        // deposit; both spellings of "empty" resolve to size 0.
        if root == B256::ZERO || root == zero_hashes()[TREE_HEIGHT] {
            return Some(0);
        }
        self.deposits
            .iter()
            .find(|deposit| deposit.network_id == network_id && deposit.exit_root == root)
            .map(|deposit| deposit.deposit_count + 1)
    }

    fn latest_ger(&self, source: Option<GerSource>) -> Option<GlobalExitRoot> {
        // Numbers only order rows within one source; across sources the
        // block anchor decides recency (block ids are globally monotone).
        self.gers
            .iter()
            .filter(|ger| source.map_or(true, |wanted| ger.source == wanted))
            .max_by_key(|ger| (ger.block_id, ger.number))
            .cloned()
    }

    fn find_enclosing_ger(
        &self,
        network_id: NetworkId,
        deposit_count: u32,
    ) -> Option<GlobalExitRoot> {
        let mut candidates: Vec<&GlobalExitRoot> =
            self.gers.iter().filter(|ger| ger.source == GerSource::L1).collect();
        candidates.sort_by_key(|ger| ger.number);
        for ger in candidates {
            let root = ger.exit_root_for(network_id);
            // Roots not resolvable against local state (e.g. after a rollup
            // rewind) are skipped, not treated as enclosing.
            if let Some(size) = self.deposit_count_by_root(network_id, root) {
                if size > deposit_count {
                    return Some(ger.clone());
                }
            }
        }
        None
    }
}

/// Shared in-memory store.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

struct MemTxn {
    guard: OwnedMutexGuard<MemState>,
    working: MemState,
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> StorageResult<Box<dyn StoreTxn>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemTxn { guard, working }))
    }

    async fn latest_block(&self, network_id: NetworkId) -> StorageResult<Option<Block>> {
        Ok(self.state.lock().await.latest_block(network_id))
    }

    async fn block_by_number(
        &self,
        network_id: NetworkId,
        number: BlockNumber,
    ) -> StorageResult<Option<Block>> {
        Ok(self.state.lock().await.block_by_number(network_id, number))
    }

    async fn deposit(
        &self,
        network_id: NetworkId,
        deposit_count: u32,
    ) -> StorageResult<Option<Deposit>> {
        Ok(self
            .state
            .lock()
            .await
            .deposits
            .iter()
            .find(|deposit| {
                deposit.network_id == network_id && deposit.deposit_count == deposit_count
            })
            .cloned())
    }

    async fn deposit_count(&self, network_id: NetworkId) -> StorageResult<u32> {
        Ok(self.state.lock().await.deposit_count(network_id))
    }

    async fn deposit_count_by_root(
        &self,
        network_id: NetworkId,
        root: B256,
    ) -> StorageResult<Option<u32>> {
        Ok(self.state.lock().await.deposit_count_by_root(network_id, root))
    }

    async fn deposits_by_destination(&self, address: Address) -> StorageResult<Vec<Deposit>> {
        let state = self.state.lock().await;
        let mut deposits: Vec<Deposit> = state
            .deposits
            .iter()
            .filter(|deposit| deposit.destination_address == address)
            .cloned()
            .collect();
        deposits.sort_by_key(|deposit| (deposit.network_id, deposit.deposit_count));
        Ok(deposits)
    }

    async fn claims_by_destination(&self, address: Address) -> StorageResult<Vec<Claim>> {
        let state = self.state.lock().await;
        let mut claims: Vec<Claim> = state
            .claims
            .iter()
            .filter(|claim| claim.destination_address == address)
            .cloned()
            .collect();
        claims.sort_by_key(|claim| (claim.network_id, claim.origin_network, claim.index));
        Ok(claims)
    }

    async fn claim(
        &self,
        network_id: NetworkId,
        origin_network: NetworkId,
        leaf_index: u32,
    ) -> StorageResult<Option<Claim>> {
        Ok(self
            .state
            .lock()
            .await
            .claims
            .iter()
            .find(|claim| {
                claim.network_id == network_id
                    && claim.origin_network == origin_network
                    && claim.index == leaf_index
            })
            .cloned())
    }

    async fn token_wrapped(
        &self,
        origin_network: NetworkId,
        origin_token: Address,
    ) -> StorageResult<Option<TokenWrapped>> {
        Ok(self
            .state
            .lock()
            .await
            .tokens
            .iter()
            .find(|token| {
                token.origin_network == origin_network
                    && token.origin_token_address == origin_token
            })
            .cloned())
    }

    async fn latest_ger(
        &self,
        source: Option<GerSource>,
    ) -> StorageResult<Option<GlobalExitRoot>> {
        Ok(self.state.lock().await.latest_ger(source))
    }

    async fn ger_by_number(&self, number: u64) -> StorageResult<Option<GlobalExitRoot>> {
        Ok(self
            .state
            .lock()
            .await
            .gers
            .iter()
            .find(|ger| ger.source == GerSource::L1 && ger.number == number)
            .cloned())
    }

    async fn find_enclosing_ger(
        &self,
        network_id: NetworkId,
        deposit_count: u32,
    ) -> StorageResult<Option<GlobalExitRoot>> {
        Ok(self.state.lock().await.find_enclosing_ger(network_id, deposit_count))
    }

    async fn tree_node(
        &self,
        network_id: NetworkId,
        depth: u8,
        index: u32,
    ) -> StorageResult<Option<B256>> {
        Ok(self.state.lock().await.nodes.get(&(network_id, depth, index)).copied())
    }
}

#[async_trait]
impl StoreTxn for MemTxn {
    async fn insert_block(&mut self, block: &NewBlock) -> StorageResult<BlockId> {
        self.working.last_block_id += 1;
        let id = BlockId(self.working.last_block_id);
        self.working.blocks.push(block.clone().into_block(id));
        Ok(id)
    }

    async fn insert_deposit(&mut self, deposit: &Deposit) -> StorageResult<()> {
        let duplicate = self.working.deposits.iter().any(|existing| {
            existing.network_id == deposit.network_id
                && existing.deposit_count == deposit.deposit_count
        });
        if duplicate {
            return Err(StorageError::inconsistency(format!(
                "deposit {} already recorded for network {}",
                deposit.deposit_count, deposit.network_id,
            )));
        }
        self.working.deposits.push(deposit.clone());
        Ok(())
    }

    async fn insert_claim(&mut self, claim: &Claim) -> StorageResult<()> {
        self.working.claims.push(claim.clone());
        Ok(())
    }

    async fn insert_token_wrapped(&mut self, token: &TokenWrapped) -> StorageResult<()> {
        self.working.tokens.push(token.clone());
        Ok(())
    }

    async fn insert_ger(&mut self, ger: &NewGlobalExitRoot) -> StorageResult<GlobalExitRoot> {
        // Each source numbers its own rows; mixing the sequences would let
        // a reorg of one source leave gaps behind the other's survivors.
        let number = self
            .working
            .gers
            .iter()
            .filter(|existing| existing.source == ger.source)
            .map(|existing| existing.number)
            .max()
            .unwrap_or(0)
            + 1;
        let row = GlobalExitRoot {
            number,
            mainnet_root: ger.mainnet_root,
            rollup_root: ger.rollup_root,
            block_id: ger.block_id,
            source: ger.source,
        };
        self.working.gers.push(row.clone());
        Ok(row)
    }

    async fn deposit_count(&mut self, network_id: NetworkId) -> StorageResult<u32> {
        Ok(self.working.deposit_count(network_id))
    }

    async fn deposit_count_by_root(
        &mut self,
        network_id: NetworkId,
        root: B256,
    ) -> StorageResult<Option<u32>> {
        Ok(self.working.deposit_count_by_root(network_id, root))
    }

    async fn tree_node(
        &mut self,
        network_id: NetworkId,
        depth: u8,
        index: u32,
    ) -> StorageResult<Option<B256>> {
        Ok(self.working.nodes.get(&(network_id, depth, index)).copied())
    }

    async fn put_tree_nodes(
        &mut self,
        network_id: NetworkId,
        nodes: &[TreeNode],
    ) -> StorageResult<()> {
        for node in nodes {
            self.working.nodes.insert((network_id, node.depth, node.index), node.hash);
        }
        Ok(())
    }

    async fn truncate_tree(
        &mut self,
        network_id: NetworkId,
        leaf_count: u32,
    ) -> StorageResult<()> {
        self.working.nodes.retain(|(network, depth, index), _| {
            *network != network_id || u64::from(*index) < u64::from(leaf_count) >> *depth
        });
        Ok(())
    }

    async fn delete_from_block(
        &mut self,
        network_id: NetworkId,
        block_id: BlockId,
    ) -> StorageResult<()> {
        let deleted: HashSet<BlockId> = self
            .working
            .blocks
            .iter()
            .filter(|block| block.network_id == network_id && block.id > block_id)
            .map(|block| block.id)
            .collect();
        self.working.blocks.retain(|block| !deleted.contains(&block.id));
        self.working.deposits.retain(|deposit| !deleted.contains(&deposit.block_id));
        self.working.claims.retain(|claim| !deleted.contains(&claim.block_id));
        self.working.tokens.retain(|token| !deleted.contains(&token.block_id));
        self.working.gers.retain(|ger| !deleted.contains(&ger.block_id));
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> StorageResult<()> {
        *self.guard = self.working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        // The working copy is discarded with the transaction.
        Ok(())
    }
}

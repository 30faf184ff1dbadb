//! Postgres backend over sqlx. Schema lives in `migrations/` and is
//! applied on connect.

use alloy_primitives::{Address, B256, U256};
use aqueduct_exit_tree::store::TreeNode;
use aqueduct_exit_tree::{zero_hashes, TREE_HEIGHT};
use aqueduct_types::{
    Block, BlockId, BlockNumber, Claim, Deposit, GerSource, GlobalExitRoot, LeafType, NetworkId,
    TokenWrapped,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::info;

use crate::{
    NewBlock, NewGlobalExitRoot, StorageError, StorageResult, Store, StoreTxn,
};

const BLOCK_COLUMNS: &str = "id, network_id, block_number, block_hash, parent_hash, received_at";
const DEPOSIT_COLUMNS: &str = "network_id, deposit_count, leaf_type, origin_address, amount, \
                               destination_network, destination_address, metadata, block_id, \
                               exit_root";
const CLAIM_COLUMNS: &str = "network_id, origin_network, leaf_index, origin_address, amount, \
                             destination_address, block_id";
const GER_COLUMNS: &str = "number, mainnet_root, rollup_root, block_id, source";

/// Production store backed by a Postgres pool.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connects and applies pending migrations.
    pub async fn connect(url: &str, max_connections: u32) -> StorageResult<Self> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(url).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Connected to Postgres and applied migrations.");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

struct PgTxn {
    tx: Transaction<'static, Postgres>,
}

fn i64_from_u32(value: u32) -> i64 {
    i64::from(value)
}

fn i64_from_u64(value: u64, what: &str) -> StorageResult<i64> {
    i64::try_from(value)
        .map_err(|_| StorageError::inconsistency(format!("{what} out of i64 range: {value}")))
}

fn u32_from_i64(value: i64, what: &str) -> StorageResult<u32> {
    u32::try_from(value)
        .map_err(|_| StorageError::inconsistency(format!("{what} out of u32 range: {value}")))
}

fn u64_from_i64(value: i64, what: &str) -> StorageResult<u64> {
    u64::try_from(value)
        .map_err(|_| StorageError::inconsistency(format!("{what} out of u64 range: {value}")))
}

fn b256_from_bytes(bytes: &[u8], what: &str) -> StorageResult<B256> {
    B256::try_from(bytes)
        .map_err(|_| StorageError::inconsistency(format!("{what} is not 32 bytes")))
}

fn address_from_bytes(bytes: &[u8], what: &str) -> StorageResult<Address> {
    Address::try_from(bytes)
        .map_err(|_| StorageError::inconsistency(format!("{what} is not 20 bytes")))
}

fn u256_from_bytes(bytes: &[u8]) -> StorageResult<U256> {
    if bytes.len() != 32 {
        return Err(StorageError::inconsistency("amount is not 32 bytes"));
    }
    Ok(U256::from_be_slice(bytes))
}

fn ger_source_from_str(source: &str) -> StorageResult<GerSource> {
    match source {
        "l1" => Ok(GerSource::L1),
        "trusted" => Ok(GerSource::Trusted),
        other => Err(StorageError::inconsistency(format!("unknown ger source '{other}'"))),
    }
}

fn block_from_row(row: &PgRow) -> StorageResult<Block> {
    Ok(Block {
        id: BlockId(u64_from_i64(row.try_get("id")?, "block id")?),
        network_id: NetworkId(u32_from_i64(row.try_get("network_id")?, "network id")?),
        number: BlockNumber(u64_from_i64(row.try_get("block_number")?, "block number")?),
        hash: b256_from_bytes(&row.try_get::<Vec<u8>, _>("block_hash")?, "block hash")?,
        parent_hash: b256_from_bytes(&row.try_get::<Vec<u8>, _>("parent_hash")?, "parent hash")?,
        received_at: row.try_get::<DateTime<Utc>, _>("received_at")?,
    })
}

fn deposit_from_row(row: &PgRow) -> StorageResult<Deposit> {
    let leaf_type: i16 = row.try_get("leaf_type")?;
    let leaf_type = u8::try_from(leaf_type)
        .ok()
        .and_then(|byte| LeafType::try_from(byte).ok())
        .ok_or_else(|| StorageError::inconsistency(format!("bad leaf type {leaf_type}")))?;
    Ok(Deposit {
        network_id: NetworkId(u32_from_i64(row.try_get("network_id")?, "network id")?),
        leaf_type,
        origin_address: address_from_bytes(
            &row.try_get::<Vec<u8>, _>("origin_address")?,
            "origin address",
        )?,
        amount: u256_from_bytes(&row.try_get::<Vec<u8>, _>("amount")?)?,
        destination_network: NetworkId(u32_from_i64(
            row.try_get("destination_network")?,
            "destination network",
        )?),
        destination_address: address_from_bytes(
            &row.try_get::<Vec<u8>, _>("destination_address")?,
            "destination address",
        )?,
        metadata: row.try_get::<Vec<u8>, _>("metadata")?,
        deposit_count: u32_from_i64(row.try_get("deposit_count")?, "deposit count")?,
        block_id: BlockId(u64_from_i64(row.try_get("block_id")?, "block id")?),
        exit_root: b256_from_bytes(&row.try_get::<Vec<u8>, _>("exit_root")?, "exit root")?,
    })
}

fn claim_from_row(row: &PgRow) -> StorageResult<Claim> {
    Ok(Claim {
        network_id: NetworkId(u32_from_i64(row.try_get("network_id")?, "network id")?),
        index: u32_from_i64(row.try_get("leaf_index")?, "leaf index")?,
        origin_network: NetworkId(u32_from_i64(row.try_get("origin_network")?, "origin network")?),
        origin_address: address_from_bytes(
            &row.try_get::<Vec<u8>, _>("origin_address")?,
            "origin address",
        )?,
        amount: u256_from_bytes(&row.try_get::<Vec<u8>, _>("amount")?)?,
        destination_address: address_from_bytes(
            &row.try_get::<Vec<u8>, _>("destination_address")?,
            "destination address",
        )?,
        block_id: BlockId(u64_from_i64(row.try_get("block_id")?, "block id")?),
    })
}

fn token_from_row(row: &PgRow) -> StorageResult<TokenWrapped> {
    let decimals: i16 = row.try_get("decimals")?;
    Ok(TokenWrapped {
        origin_network: NetworkId(u32_from_i64(row.try_get("origin_network")?, "origin network")?),
        origin_token_address: address_from_bytes(
            &row.try_get::<Vec<u8>, _>("origin_token_address")?,
            "origin token address",
        )?,
        wrapped_token_address: address_from_bytes(
            &row.try_get::<Vec<u8>, _>("wrapped_token_address")?,
            "wrapped token address",
        )?,
        block_id: BlockId(u64_from_i64(row.try_get("block_id")?, "block id")?),
        name: row.try_get("name")?,
        symbol: row.try_get("symbol")?,
        decimals: u8::try_from(decimals)
            .map_err(|_| StorageError::inconsistency(format!("bad decimals {decimals}")))?,
    })
}

fn ger_from_row(row: &PgRow) -> StorageResult<GlobalExitRoot> {
    Ok(GlobalExitRoot {
        number: u64_from_i64(row.try_get("number")?, "ger number")?,
        mainnet_root: b256_from_bytes(
            &row.try_get::<Vec<u8>, _>("mainnet_root")?,
            "mainnet root",
        )?,
        rollup_root: b256_from_bytes(&row.try_get::<Vec<u8>, _>("rollup_root")?, "rollup root")?,
        block_id: BlockId(u64_from_i64(row.try_get("block_id")?, "block id")?),
        source: ger_source_from_str(row.try_get("source")?)?,
    })
}

#[async_trait]
impl Store for PostgresStore {
    async fn begin(&self) -> StorageResult<Box<dyn StoreTxn>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTxn { tx }))
    }

    async fn latest_block(&self, network_id: NetworkId) -> StorageResult<Option<Block>> {
        let row = sqlx::query(&format!(
            "SELECT {BLOCK_COLUMNS} FROM blocks WHERE network_id = $1 ORDER BY id DESC LIMIT 1",
        ))
        .bind(i64_from_u32(network_id.0))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(block_from_row).transpose()
    }

    async fn block_by_number(
        &self,
        network_id: NetworkId,
        number: BlockNumber,
    ) -> StorageResult<Option<Block>> {
        let row = sqlx::query(&format!(
            "SELECT {BLOCK_COLUMNS} FROM blocks WHERE network_id = $1 AND block_number = $2 \
             ORDER BY id DESC LIMIT 1",
        ))
        .bind(i64_from_u32(network_id.0))
        .bind(i64_from_u64(number.0, "block number")?)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(block_from_row).transpose()
    }

    async fn deposit(
        &self,
        network_id: NetworkId,
        deposit_count: u32,
    ) -> StorageResult<Option<Deposit>> {
        let row = sqlx::query(&format!(
            "SELECT {DEPOSIT_COLUMNS} FROM deposits WHERE network_id = $1 AND deposit_count = $2",
        ))
        .bind(i64_from_u32(network_id.0))
        .bind(i64_from_u32(deposit_count))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(deposit_from_row).transpose()
    }

    async fn deposit_count(&self, network_id: NetworkId) -> StorageResult<u32> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM deposits WHERE network_id = $1")
            .bind(i64_from_u32(network_id.0))
            .fetch_one(&self.pool)
            .await?;
        u32_from_i64(row.try_get("n")?, "deposit count")
    }

    async fn deposit_count_by_root(
        &self,
        network_id: NetworkId,
        root: B256,
    ) -> StorageResult<Option<u32>> {
        if root == B256::ZERO || root == zero_hashes()[TREE_HEIGHT] {
            return Ok(Some(0));
        }
        let row = sqlx::query(
            "SELECT deposit_count FROM deposits WHERE network_id = $1 AND exit_root = $2 LIMIT 1",
        )
        .bind(i64_from_u32(network_id.0))
        .bind(root.as_slice())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| {
            u32_from_i64(row.try_get("deposit_count")?, "deposit count").map(|count| count + 1)
        })
        .transpose()
    }

    async fn deposits_by_destination(&self, address: Address) -> StorageResult<Vec<Deposit>> {
        let rows = sqlx::query(&format!(
            "SELECT {DEPOSIT_COLUMNS} FROM deposits WHERE destination_address = $1 \
             ORDER BY network_id, deposit_count",
        ))
        .bind(address.as_slice())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(deposit_from_row).collect()
    }

    async fn claims_by_destination(&self, address: Address) -> StorageResult<Vec<Claim>> {
        let rows = sqlx::query(&format!(
            "SELECT {CLAIM_COLUMNS} FROM claims WHERE destination_address = $1 \
             ORDER BY network_id, origin_network, leaf_index",
        ))
        .bind(address.as_slice())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(claim_from_row).collect()
    }

    async fn claim(
        &self,
        network_id: NetworkId,
        origin_network: NetworkId,
        leaf_index: u32,
    ) -> StorageResult<Option<Claim>> {
        let row = sqlx::query(&format!(
            "SELECT {CLAIM_COLUMNS} FROM claims WHERE network_id = $1 AND origin_network = $2 \
             AND leaf_index = $3",
        ))
        .bind(i64_from_u32(network_id.0))
        .bind(i64_from_u32(origin_network.0))
        .bind(i64_from_u32(leaf_index))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(claim_from_row).transpose()
    }

    async fn token_wrapped(
        &self,
        origin_network: NetworkId,
        origin_token: Address,
    ) -> StorageResult<Option<TokenWrapped>> {
        let row = sqlx::query(
            "SELECT origin_network, origin_token_address, wrapped_token_address, block_id, \
             name, symbol, decimals FROM token_wrapped \
             WHERE origin_network = $1 AND origin_token_address = $2",
        )
        .bind(i64_from_u32(origin_network.0))
        .bind(origin_token.as_slice())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(token_from_row).transpose()
    }

    async fn latest_ger(
        &self,
        source: Option<GerSource>,
    ) -> StorageResult<Option<GlobalExitRoot>> {
        // Numbers only order rows within one source; across sources the
        // block anchor decides recency (block ids are globally monotone).
        let row = sqlx::query(&format!(
            "SELECT {GER_COLUMNS} FROM global_exit_roots \
             WHERE $1::TEXT IS NULL OR source = $1 \
             ORDER BY block_id DESC, number DESC LIMIT 1",
        ))
        .bind(source.map(|source| source.as_str()))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(ger_from_row).transpose()
    }

    async fn ger_by_number(&self, number: u64) -> StorageResult<Option<GlobalExitRoot>> {
        let row = sqlx::query(&format!(
            "SELECT {GER_COLUMNS} FROM global_exit_roots \
             WHERE source = '{}' AND number = $1",
            GerSource::L1.as_str(),
        ))
        .bind(i64_from_u64(number, "ger number")?)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(ger_from_row).transpose()
    }

    async fn find_enclosing_ger(
        &self,
        network_id: NetworkId,
        deposit_count: u32,
    ) -> StorageResult<Option<GlobalExitRoot>> {
        // The relevant component root resolves to a tree size through the
        // per-deposit post-insertion root; `deposit_count >= $2` is
        // `size > deposit_count` shifted by one.
        let row = sqlx::query(&format!(
            "SELECT g.number, g.mainnet_root, g.rollup_root, g.block_id, g.source \
             FROM global_exit_roots g JOIN deposits d \
               ON d.network_id = $1 \
              AND d.exit_root = CASE WHEN $1 = 0 THEN g.mainnet_root ELSE g.rollup_root END \
             WHERE g.source = '{}' AND d.deposit_count >= $2 \
             ORDER BY g.number LIMIT 1",
            GerSource::L1.as_str(),
        ))
        .bind(i64_from_u32(network_id.0))
        .bind(i64_from_u32(deposit_count))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(ger_from_row).transpose()
    }

    async fn tree_node(
        &self,
        network_id: NetworkId,
        depth: u8,
        index: u32,
    ) -> StorageResult<Option<B256>> {
        let row = sqlx::query(
            "SELECT hash FROM merkle_nodes \
             WHERE network_id = $1 AND depth = $2 AND node_index = $3",
        )
        .bind(i64_from_u32(network_id.0))
        .bind(i16::from(depth))
        .bind(i64_from_u32(index))
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| b256_from_bytes(&row.try_get::<Vec<u8>, _>("hash")?, "node hash"))
            .transpose()
    }
}

#[async_trait]
impl StoreTxn for PgTxn {
    async fn insert_block(&mut self, block: &NewBlock) -> StorageResult<BlockId> {
        let row = sqlx::query(
            "INSERT INTO blocks (network_id, block_number, block_hash, parent_hash, received_at) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(i64_from_u32(block.network_id.0))
        .bind(i64_from_u64(block.number.0, "block number")?)
        .bind(block.hash.as_slice())
        .bind(block.parent_hash.as_slice())
        .bind(block.received_at)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(BlockId(u64_from_i64(row.try_get("id")?, "block id")?))
    }

    async fn insert_deposit(&mut self, deposit: &Deposit) -> StorageResult<()> {
        sqlx::query(&format!(
            "INSERT INTO deposits ({DEPOSIT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        ))
        .bind(i64_from_u32(deposit.network_id.0))
        .bind(i64_from_u32(deposit.deposit_count))
        .bind(i16::from(deposit.leaf_type.as_u8()))
        .bind(deposit.origin_address.as_slice())
        .bind(deposit.amount.to_be_bytes::<32>().to_vec())
        .bind(i64_from_u32(deposit.destination_network.0))
        .bind(deposit.destination_address.as_slice())
        .bind(deposit.metadata.as_slice())
        .bind(i64_from_u64(deposit.block_id.0, "block id")?)
        .bind(deposit.exit_root.as_slice())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_claim(&mut self, claim: &Claim) -> StorageResult<()> {
        sqlx::query(&format!(
            "INSERT INTO claims ({CLAIM_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)",
        ))
        .bind(i64_from_u32(claim.network_id.0))
        .bind(i64_from_u32(claim.origin_network.0))
        .bind(i64_from_u32(claim.index))
        .bind(claim.origin_address.as_slice())
        .bind(claim.amount.to_be_bytes::<32>().to_vec())
        .bind(claim.destination_address.as_slice())
        .bind(i64_from_u64(claim.block_id.0, "block id")?)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_token_wrapped(&mut self, token: &TokenWrapped) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO token_wrapped (origin_network, origin_token_address, \
             wrapped_token_address, block_id, name, symbol, decimals) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(i64_from_u32(token.origin_network.0))
        .bind(token.origin_token_address.as_slice())
        .bind(token.wrapped_token_address.as_slice())
        .bind(i64_from_u64(token.block_id.0, "block id")?)
        .bind(&token.name)
        .bind(&token.symbol)
        .bind(i16::from(token.decimals))
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_ger(&mut self, ger: &NewGlobalExitRoot) -> StorageResult<GlobalExitRoot> {
        // Each source numbers its own rows; mixing the sequences would let
        // a reorg of one source leave gaps behind the other's survivors.
        let row = sqlx::query(
            "INSERT INTO global_exit_roots (number, mainnet_root, rollup_root, block_id, source) \
             SELECT COALESCE(MAX(number), 0) + 1, $1, $2, $3, $4 FROM global_exit_roots \
             WHERE source = $4 \
             RETURNING number",
        )
        .bind(ger.mainnet_root.as_slice())
        .bind(ger.rollup_root.as_slice())
        .bind(i64_from_u64(ger.block_id.0, "block id")?)
        .bind(ger.source.as_str())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(GlobalExitRoot {
            number: u64_from_i64(row.try_get("number")?, "ger number")?,
            mainnet_root: ger.mainnet_root,
            rollup_root: ger.rollup_root,
            block_id: ger.block_id,
            source: ger.source,
        })
    }

    async fn deposit_count(&mut self, network_id: NetworkId) -> StorageResult<u32> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM deposits WHERE network_id = $1")
            .bind(i64_from_u32(network_id.0))
            .fetch_one(&mut *self.tx)
            .await?;
        u32_from_i64(row.try_get("n")?, "deposit count")
    }

    async fn deposit_count_by_root(
        &mut self,
        network_id: NetworkId,
        root: B256,
    ) -> StorageResult<Option<u32>> {
        if root == B256::ZERO || root == zero_hashes()[TREE_HEIGHT] {
            return Ok(Some(0));
        }
        let row = sqlx::query(
            "SELECT deposit_count FROM deposits WHERE network_id = $1 AND exit_root = $2 LIMIT 1",
        )
        .bind(i64_from_u32(network_id.0))
        .bind(root.as_slice())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(|row| {
            u32_from_i64(row.try_get("deposit_count")?, "deposit count").map(|count| count + 1)
        })
        .transpose()
    }

    async fn tree_node(
        &mut self,
        network_id: NetworkId,
        depth: u8,
        index: u32,
    ) -> StorageResult<Option<B256>> {
        let row = sqlx::query(
            "SELECT hash FROM merkle_nodes \
             WHERE network_id = $1 AND depth = $2 AND node_index = $3",
        )
        .bind(i64_from_u32(network_id.0))
        .bind(i16::from(depth))
        .bind(i64_from_u32(index))
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(|row| b256_from_bytes(&row.try_get::<Vec<u8>, _>("hash")?, "node hash"))
            .transpose()
    }

    async fn put_tree_nodes(
        &mut self,
        network_id: NetworkId,
        nodes: &[TreeNode],
    ) -> StorageResult<()> {
        if nodes.is_empty() {
            return Ok(());
        }
        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO merkle_nodes (network_id, depth, node_index, hash) ",
        );
        builder.push_values(nodes, |mut values, node| {
            values
                .push_bind(i64_from_u32(network_id.0))
                .push_bind(i16::from(node.depth))
                .push_bind(i64_from_u32(node.index))
                .push_bind(node.hash.as_slice().to_vec());
        });
        builder.push(
            " ON CONFLICT (network_id, depth, node_index) DO UPDATE SET hash = EXCLUDED.hash",
        );
        builder.build().execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn truncate_tree(
        &mut self,
        network_id: NetworkId,
        leaf_count: u32,
    ) -> StorageResult<()> {
        sqlx::query(
            "DELETE FROM merkle_nodes \
             WHERE network_id = $1 AND node_index >= ($2::BIGINT >> depth::INT)",
        )
        .bind(i64_from_u32(network_id.0))
        .bind(i64_from_u32(leaf_count))
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_from_block(
        &mut self,
        network_id: NetworkId,
        block_id: BlockId,
    ) -> StorageResult<()> {
        sqlx::query("DELETE FROM blocks WHERE network_id = $1 AND id > $2")
            .bind(i64_from_u32(network_id.0))
            .bind(i64_from_u64(block_id.0, "block id")?)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

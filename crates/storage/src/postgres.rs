//! PostgreSQL sink implementation.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info};
use yaci_primitives::{Block, BlockHeight, BlockResults, Transaction};

use crate::{Error, Sink};

/// Versioned schema migrations, embedded at build time and applied in order
/// on connect. Re-running is idempotent.
static MIGRATOR: Migrator = sqlx::migrate!();

const MAX_CONNECTIONS: u32 = 10;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Sink writing to the `api` schema of a PostgreSQL database.
///
/// Each call acquires a short-lived connection from the pool, so the handle
/// is shared freely across extraction workers.
#[derive(Debug, Clone)]
pub struct PostgresSink {
    pool: PgPool,
}

impl PostgresSink {
    /// Connects to the database and provisions the schema.
    pub async fn connect(dsn: &str) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(dsn)
            .await?;

        MIGRATOR.run(&pool).await?;
        info!(target: "storage", "Connected to PostgreSQL and applied migrations.");

        Ok(Self { pool })
    }

    /// Creates a sink over an existing pool. Migrations are not applied.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn as_json_str(data: &[u8]) -> Result<&str, Error> {
    std::str::from_utf8(data).map_err(|_| Error::InvalidPayload)
}

#[async_trait]
impl Sink for PostgresSink {
    async fn write_block_with_transactions(
        &self,
        block: &Block,
        transactions: &[Transaction],
    ) -> Result<(), Error> {
        let payload = as_json_str(&block.data)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO api.blocks_raw (id, data, tx_count)
             VALUES ($1, $2::jsonb, $3)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(block.height as i64)
        .bind(payload)
        .bind(transactions.len() as i32)
        .execute(&mut *tx)
        .await?;

        for transaction in transactions {
            sqlx::query(
                "INSERT INTO api.transactions_raw (id, data)
                 VALUES ($1, $2::jsonb)
                 ON CONFLICT (id) DO NOTHING",
            )
            .bind(&transaction.hash)
            .bind(as_json_str(&transaction.data)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(target: "storage", height = block.height, txs = transactions.len(), "Wrote block.");
        Ok(())
    }

    async fn write_block_results(&self, results: &BlockResults) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO api.block_results_raw (height, data)
             VALUES ($1, $2::jsonb)
             ON CONFLICT (height) DO UPDATE SET data = EXCLUDED.data",
        )
        .bind(results.height as i64)
        .bind(as_json_str(&results.data)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn latest_block(&self) -> Result<Option<Block>, Error> {
        let row: Option<(i64, String)> =
            sqlx::query_as("SELECT id, data::text FROM api.blocks_raw ORDER BY id DESC LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(height, data)| Block::new(height as u64, data.into_bytes())))
    }

    async fn earliest_block(&self) -> Result<Option<Block>, Error> {
        let row: Option<(i64, String)> =
            sqlx::query_as("SELECT id, data::text FROM api.blocks_raw ORDER BY id ASC LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(height, data)| Block::new(height as u64, data.into_bytes())))
    }

    async fn missing_heights(&self) -> Result<Vec<BlockHeight>, Error> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT series.height
             FROM generate_series(
                 (SELECT MIN(id) FROM api.blocks_raw),
                 (SELECT MAX(id) FROM api.blocks_raw)
             ) AS series(height)
             WHERE NOT EXISTS (
                 SELECT 1 FROM api.blocks_raw b WHERE b.id = series.height
             )
             ORDER BY series.height",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(height,)| height as u64).collect())
    }

    async fn close(&self) -> Result<(), Error> {
        self.pool.close().await;
        Ok(())
    }
}

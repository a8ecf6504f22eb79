//! Persistence contract of the extraction pipeline and its implementations.
//!
//! The pipeline writes through the [`Sink`] trait; any backend satisfying its
//! semantics (idempotent writes, atomic block+transactions visibility) is a
//! valid sink. The only implementation today is PostgreSQL.

use async_trait::async_trait;
use yaci_primitives::{Block, BlockHeight, BlockResults, Transaction};

mod postgres;

pub use postgres::PostgresSink;

/// Error type for sink operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Schema provisioning failed. Fatal: the sink cannot be used.
    #[error("database migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A write collided with an existing row outside the idempotent paths.
    #[error("conflicting row already exists: {0}")]
    Conflict(#[source] sqlx::Error),

    /// A payload handed to the sink was not valid UTF-8 JSON. Fatal: the
    /// payload will not improve on retry.
    #[error("payload is not valid UTF-8 JSON")]
    InvalidPayload,

    /// Any other database failure.
    #[error(transparent)]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::Conflict(err),
            _ => Self::Database(err),
        }
    }
}

impl Error {
    /// Whether a retry of the failed operation may succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Migration(_) | Self::InvalidPayload => false,
            Self::Database(sqlx::Error::PoolClosed) => false,
            Self::Conflict(_) | Self::Database(_) => true,
        }
    }
}

/// The persistence backend of the extraction pipeline.
///
/// Implementations must be safe under concurrent callers; the handle is
/// shared by all extraction workers.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Atomically writes a block and all of its transactions.
    ///
    /// Either everything becomes visible or nothing does. Writing the same
    /// height twice is a no-op for the block row and idempotent for each
    /// transaction row keyed by hash.
    async fn write_block_with_transactions(
        &self,
        block: &Block,
        transactions: &[Transaction],
    ) -> Result<(), Error>;

    /// Writes block results. Idempotent upsert keyed by height.
    async fn write_block_results(&self, results: &BlockResults) -> Result<(), Error>;

    /// Returns the latest persisted block, or `None` when the sink is empty.
    async fn latest_block(&self) -> Result<Option<Block>, Error>;

    /// Returns the earliest persisted block, or `None` when the sink is empty.
    async fn earliest_block(&self) -> Result<Option<Block>, Error>;

    /// Returns the sorted heights absent from `[earliest, latest]`.
    async fn missing_heights(&self) -> Result<Vec<BlockHeight>, Error>;

    /// Flushes and releases the sink's resources.
    async fn close(&self) -> Result<(), Error>;
}

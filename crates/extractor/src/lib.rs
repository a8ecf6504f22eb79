#![cfg_attr(not(test), warn(unused_crate_dependencies))]

//! The block extraction pipeline.
//!
//! Four drivers sit on top of the dynamic gRPC client and the sink contract:
//!
//! - [`fetch_block`] fetches one block with its transactions (and optionally
//!   its consensus results) and persists them.
//! - [`drive_range`] fans block fetches out over a closed height range under
//!   a concurrency bound with first-error cancellation.
//! - [`tail`] follows the chain tip, delegating bursts of new blocks to the
//!   range driver.
//! - [`repair_gaps`] reconciles the persisted range against the chain by
//!   re-fetching missing heights sequentially.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use yaci_grpc::{GrpcClient, RetryClass};

mod block;
mod driver;
mod gaps;
mod live;
mod metrics;

pub use block::fetch_block;
pub use driver::drive_range;
pub use gaps::repair_gaps;
pub use live::tail;

/// Main-path method returning a block together with its decoded transactions.
pub const GET_BLOCK_WITH_TXS_METHOD: &str = "cosmos.tx.v1beta1.Service.GetBlockWithTxs";

/// Optional method returning consensus-level block results. Older nodes do
/// not implement it.
pub const GET_BLOCK_RESULTS_METHOD: &str =
    "cosmos.base.tendermint.v1beta1.Service.GetBlockResults";

/// Configuration of an extraction run.
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    /// Maximum number of in-flight block fetches.
    pub concurrency: usize,
    /// Retry budget for each block fetch and height probe.
    pub max_retries: u32,
    /// Whether to fetch and persist block results alongside each block.
    pub enable_block_results: bool,
    /// Expected block production interval; the live-tail poll period.
    pub block_time: Duration,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            max_retries: 3,
            enable_block_results: false,
            block_time: Duration::from_secs(2),
        }
    }
}

/// The upstream chain as seen by the pipeline.
///
/// [`GrpcClient`] is the production implementation; tests substitute mocks.
/// Descriptor handling stays behind this seam, so the pipeline never touches
/// dynamic-typing constructs.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Invokes a unary method by its fully-qualified name, returning the
    /// response as canonical JSON bytes.
    async fn invoke(
        &self,
        method_full_name: &str,
        params: &Value,
    ) -> Result<Vec<u8>, yaci_grpc::Error>;

    /// Returns the latest committed block height of the node.
    async fn latest_height(&self, max_retries: u32) -> Result<u64, yaci_grpc::Error>;
}

#[async_trait]
impl ChainClient for GrpcClient {
    async fn invoke(
        &self,
        method_full_name: &str,
        params: &Value,
    ) -> Result<Vec<u8>, yaci_grpc::Error> {
        GrpcClient::invoke(self, method_full_name, params).await
    }

    async fn latest_height(&self, max_retries: u32) -> Result<u64, yaci_grpc::Error> {
        GrpcClient::latest_height(self, max_retries).await
    }
}

/// Error type for pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Client(#[from] yaci_grpc::Error),

    #[error(transparent)]
    Sink(#[from] yaci_storage::Error),

    /// The block payload did not have the expected shape. Terminal: the
    /// payload will not improve on retry.
    #[error("malformed block payload at height {height}: {reason}")]
    BlockFormat { height: u64, reason: String },

    /// A block failed to process after exhausting its retry budget.
    #[error("failed to process block {height}")]
    Block {
        height: u64,
        #[source]
        source: Box<Error>,
    },

    /// A failure outside the modeled error kinds, e.g. a panicked task.
    #[error("unexpected extraction failure: {0}")]
    Unexpected(String),
}

impl Error {
    /// The failing block height, when the error is tied to one.
    pub fn height(&self) -> Option<u64> {
        match self {
            Self::Block { height, .. } | Self::BlockFormat { height, .. } => Some(*height),
            _ => None,
        }
    }
}

impl RetryClass for Error {
    fn is_retriable(&self) -> bool {
        match self {
            Self::Client(err) => err.is_retriable(),
            Self::Sink(err) => err.is_retriable(),
            Self::Block { source, .. } => source.is_retriable(),
            Self::BlockFormat { .. } | Self::Unexpected(_) => false,
        }
    }

    fn is_cancelled(&self) -> bool {
        match self {
            Self::Client(err) => err.is_cancelled(),
            Self::Block { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    fn cancelled() -> Self {
        Self::Client(yaci_grpc::Error::Cancelled)
    }
}

//! Metrics for the extraction pipeline.

use yaci_metrics::metrics::{self, Counter, Gauge};
use yaci_metrics::Metrics;

/// Metrics recorded by the range driver.
#[derive(Metrics, Clone)]
#[metrics(scope = "extractor")]
pub(crate) struct ExtractorMetrics {
    /// Total number of blocks processed successfully
    pub blocks_processed_total: Counter,
    /// Total number of block processing errors
    pub block_errors_total: Counter,
    /// Number of block fetches currently in flight
    pub inflight_fetches: Gauge,
    /// Height of the most recently processed block
    pub last_processed_height: Gauge,
}

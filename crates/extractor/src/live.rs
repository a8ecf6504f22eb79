//! Live chain tailing.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use yaci_storage::Sink;

use crate::driver::drive_range;
use crate::{ChainClient, Error, ExtractConfig};

/// Follows the chain tip, extracting every block from `start` onwards.
///
/// Each iteration polls the node's latest height and drives the range of new
/// blocks through [`drive_range`]; between polls the loop sleeps for the
/// configured block time. Returns cleanly on cancellation and propagates the
/// first driver failure.
pub async fn tail<C, S>(
    client: Arc<C>,
    sink: Arc<S>,
    start: u64,
    cfg: &ExtractConfig,
    cancellation: &CancellationToken,
) -> Result<(), Error>
where
    C: ChainClient + ?Sized + 'static,
    S: Sink + ?Sized + 'static,
{
    info!(target: "extractor", start, "Following the chain tip.");
    let mut current = start.saturating_sub(1);

    loop {
        if cancellation.is_cancelled() {
            info!(target: "extractor", "Live extraction cancelled.");
            return Ok(());
        }

        let latest = client.latest_height(cfg.max_retries).await?;
        if latest > current {
            drive_range(
                Arc::clone(&client),
                Arc::clone(&sink),
                current + 1,
                latest,
                cfg,
                cancellation,
            )
            .await?;
            current = latest;
        }

        tokio::select! {
            _ = cancellation.cancelled() => {}
            _ = tokio::time::sleep(cfg.block_time) => {}
        }
    }
}

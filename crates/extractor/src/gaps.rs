//! Gap repair over the persisted range.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use yaci_grpc::with_retries;
use yaci_storage::Sink;

use crate::block::fetch_block;
use crate::{ChainClient, Error, ExtractConfig};

/// Re-fetches every height missing from the persisted range.
///
/// Heights are processed sequentially: the expected set is small and
/// contention with a starting live tail should be minimized. The first
/// failure short-circuits.
pub async fn repair_gaps<C, S>(
    client: &C,
    sink: &S,
    cfg: &ExtractConfig,
    cancellation: &CancellationToken,
) -> Result<(), Error>
where
    C: ChainClient + ?Sized,
    S: Sink + ?Sized,
{
    let missing = sink.missing_heights().await?;
    if missing.is_empty() {
        return Ok(());
    }

    warn!(target: "extractor", count = missing.len(), "Missing blocks detected.");
    for height in missing {
        with_retries(|| fetch_block(client, sink, height, cfg), cfg.max_retries, cancellation)
            .await
            .map_err(|err| Error::Block { height, source: Box::new(err) })?;
    }

    info!(target: "extractor", "Gap repair finished.");
    Ok(())
}

//! Parallel range driver.

use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use yaci_grpc::{with_retries, RetryClass};
use yaci_storage::Sink;

use crate::block::fetch_block;
use crate::metrics::ExtractorMetrics;
use crate::{ChainClient, Error, ExtractConfig};

type TaskResult = Result<u64, (u64, Error)>;

/// Fetches every height in `[start, stop]` with bounded parallelism.
///
/// At most `cfg.concurrency` fetches are in flight; each one is wrapped in
/// the retry policy. The first failure other than cancellation cancels all
/// peers and is surfaced once in-flight tasks have unwound; cancellation of
/// the parent scope alone surfaces as [`yaci_grpc::Error::Cancelled`].
/// Completion order across heights is unspecified.
pub async fn drive_range<C, S>(
    client: Arc<C>,
    sink: Arc<S>,
    start: u64,
    stop: u64,
    cfg: &ExtractConfig,
    cancellation: &CancellationToken,
) -> Result<(), Error>
where
    C: ChainClient + ?Sized + 'static,
    S: Sink + ?Sized + 'static,
{
    if start == stop {
        info!(target: "extractor", height = start, "Extracting block.");
    } else {
        info!(target: "extractor", range = %format!("[{start}, {stop}]"), "Extracting blocks.");
    }

    let progress = (start != stop).then(|| {
        let bar = ProgressBar::new(stop - start + 1);
        bar.set_style(
            ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len} ({per_sec})")
                .expect("valid progress template")
                .progress_chars("=> "),
        );
        bar.set_message("Processing blocks");
        bar
    });

    let batch = cancellation.child_token();
    let semaphore = Arc::new(Semaphore::new(cfg.concurrency));
    let metrics = ExtractorMetrics::default();
    let mut tasks: JoinSet<TaskResult> = JoinSet::new();
    let mut first_error: Option<Error> = None;

    for height in start..=stop {
        if batch.is_cancelled() || first_error.is_some() {
            break;
        }

        // Waiting for a slot must abort on cancellation without leaking it.
        let permit = tokio::select! {
            _ = batch.cancelled() => break,
            permit = Arc::clone(&semaphore).acquire_owned() => {
                permit.expect("semaphore never closed")
            }
        };

        let client = Arc::clone(&client);
        let sink = Arc::clone(&sink);
        let cfg = cfg.clone();
        let token = batch.clone();
        let task_metrics = metrics.clone();
        let progress = progress.clone();

        tasks.spawn(async move {
            let _permit = permit;

            task_metrics.inflight_fetches.increment(1.0);
            let result = tokio::select! {
                _ = token.cancelled() => Err(Error::cancelled()),
                result = with_retries(
                    || fetch_block(&*client, &*sink, height, &cfg),
                    cfg.max_retries,
                    &token,
                ) => result,
            };
            task_metrics.inflight_fetches.decrement(1.0);

            match result {
                Ok(()) => {
                    task_metrics.blocks_processed_total.increment(1);
                    task_metrics.last_processed_height.set(height as f64);
                    if let Some(bar) = &progress {
                        bar.inc(1);
                    }
                    Ok(height)
                }
                Err(err) => Err((height, err)),
            }
        });

        // Reap finished tasks as we go so the set stays bounded by the
        // semaphore rather than the range length.
        while let Some(joined) = tasks.try_join_next() {
            observe_completion(joined, &mut first_error, &batch, &metrics);
        }
    }

    while let Some(joined) = tasks.join_next().await {
        observe_completion(joined, &mut first_error, &batch, &metrics);
    }

    if let Some(bar) = progress {
        bar.finish_and_clear();
    }

    if let Some(err) = first_error {
        return Err(err);
    }
    if cancellation.is_cancelled() {
        info!(target: "extractor", "Extraction cancelled.");
        return Err(Error::cancelled());
    }
    Ok(())
}

/// Records a finished task, cancelling peers on the first real failure.
fn observe_completion(
    joined: Result<TaskResult, JoinError>,
    first_error: &mut Option<Error>,
    batch: &CancellationToken,
    metrics: &ExtractorMetrics,
) {
    let failure = match joined {
        Ok(Ok(_)) => return,
        Ok(Err((_, err))) if err.is_cancelled() => return,
        Ok(Err((height, err))) => {
            error!(target: "extractor", height, error = %err, "Block processing error.");
            Error::Block { height, source: Box::new(err) }
        }
        Err(join_err) => Error::Unexpected(format!("block fetch task aborted: {join_err}")),
    };

    metrics.block_errors_total.increment(1);
    if first_error.is_none() {
        batch.cancel();
        *first_error = Some(failure);
    }
}

//! Bounded retry with jittered exponential backoff.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use metrics::Counter;
use metrics_derive::Metrics;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// The smallest backoff delay between attempts.
const MIN_RETRY_DELAY: Duration = Duration::from_millis(500);

/// The backoff delay cap.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Classification of errors for the retry wrapper.
///
/// Cancellation and malformed-input errors are terminal; remote and transport
/// failures are transient. Implemented by every error type that flows through
/// [`with_retries`].
pub trait RetryClass {
    /// Whether a retry of the failed operation may succeed.
    fn is_retriable(&self) -> bool;

    /// Whether the error represents an observed cancellation.
    fn is_cancelled(&self) -> bool;

    /// The error value representing cancellation during backoff.
    fn cancelled() -> Self;
}

impl RetryClass for crate::Error {
    fn is_retriable(&self) -> bool {
        crate::Error::is_retriable(self)
    }

    fn is_cancelled(&self) -> bool {
        crate::Error::is_cancelled(self)
    }

    fn cancelled() -> Self {
        crate::Error::Cancelled
    }
}

#[derive(Metrics)]
#[metrics(scope = "grpc.client")]
struct RetryMetrics {
    /// Total number of retried operations
    retries_total: Counter,
}

/// Runs `op`, retrying transient failures up to `max_retries` times.
///
/// Performs at most `max_retries + 1` invocations. Delays grow exponentially
/// with jitter, bounded by a cap. Terminal errors short-circuit, and
/// cancellation during a backoff sleep returns the cancelled error
/// immediately.
pub async fn with_retries<T, E, F, Fut>(
    mut op: F,
    max_retries: u32,
    cancellation: &CancellationToken,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryClass + Display,
{
    let mut delays = ExponentialBuilder::default()
        .with_min_delay(MIN_RETRY_DELAY)
        .with_max_delay(MAX_RETRY_DELAY)
        .with_jitter()
        .without_max_times()
        .build();

    let mut remaining = max_retries;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if remaining == 0 || !error.is_retriable() => return Err(error),
            Err(error) => {
                remaining -= 1;
                let delay = delays.next().unwrap_or(MAX_RETRY_DELAY);
                warn!(target: "grpc", %error, attempts_left = remaining, ?delay, "Retrying after failure.");
                RetryMetrics::default().retries_total.increment(1);

                tokio::select! {
                    _ = cancellation.cancelled() => return Err(E::cancelled()),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

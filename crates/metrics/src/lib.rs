//! Metrics collection and serving.
//!
//! Components define their metrics with [`Metrics`] derive structs against
//! the [`metrics`] facade; this crate installs the Prometheus recorder and
//! serves the rendered registry over HTTP.

use std::net::SocketAddr;

pub mod exporters;
mod server;

pub use metrics;
pub use metrics_derive::Metrics;
pub use server::{MetricsServerHandle, Server};

/// Error type for metrics operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to bind metrics server to address {addr}")]
    FailedToBindAddress { addr: SocketAddr },

    #[error("metrics server has already been stopped")]
    AlreadyStopped,

    #[error("failed to install prometheus recorder: {0}")]
    Recorder(#[from] metrics_exporter_prometheus::BuildError),

    #[error("metrics server task failed: {0}")]
    Join(String),

    #[error(transparent)]
    Server(#[from] hyper::Error),
}

/// A source of metrics that must be polled at collection time.
///
/// Most metrics are recorded inline in the main program flow; reporters cover
/// the ones that are not and are invoked whenever the server renders the
/// registry.
pub trait Report: Send + Sync {
    /// Collects and records the metrics.
    fn report(&self);
}

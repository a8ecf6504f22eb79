//! Tracing subscriber initialization for the yaci binary.

use clap::ValueEnum;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{filter, EnvFilter};

/// Default log filter, overridable through `RUST_LOG`.
const DEFAULT_LOG_FILTER: &str =
    "info,extractor=debug,grpc=debug,storage=debug,metrics=info,hyper=off,sqlx=warn,h2=off";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to parse environment filter: {0}")]
    EnvFilterParse(#[from] filter::ParseError),
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Full,
    /// Newline-delimited JSON, one event per line.
    Json,
}

/// Initializes the global tracing subscriber.
///
/// The `RUST_LOG` environment variable takes precedence over the built-in
/// default filter.
pub fn init(format: LogFormat) -> Result<(), Error> {
    // The TLS-backed clients (tonic, sqlx) require a process-level default
    // crypto provider when rustls is built with more than one enabled.
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install rustls crypto provider");

    let filter = EnvFilter::try_from_default_env().or(EnvFilter::try_new(DEFAULT_LOG_FILTER))?;

    match format {
        LogFormat::Full => {
            tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer()).init()
        }
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }

    Ok(())
}

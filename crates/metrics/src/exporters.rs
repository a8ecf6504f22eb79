//! Exporters rendering the recorded metrics for serving.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::Error;

/// Renders the installed metrics registry into a serveable payload.
pub trait Exporter: Clone + Send + Sync {
    /// Exports the current state of the registry.
    fn export(&self) -> String;
}

/// Prometheus text-format exporter.
///
/// Installing it registers the global recorder; every metric recorded through
/// the [`metrics`] facade afterwards lands in this registry.
#[derive(Debug, Clone)]
pub struct Prometheus {
    handle: PrometheusHandle,
}

impl Prometheus {
    /// Installs the Prometheus recorder as the global metrics recorder.
    pub fn install() -> Result<Self, Error> {
        let handle = PrometheusBuilder::new().install_recorder()?;
        Ok(Self { handle })
    }
}

impl Exporter for Prometheus {
    fn export(&self) -> String {
        self.handle.render()
    }
}

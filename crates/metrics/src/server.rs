use core::fmt;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response};
use tokio::sync::oneshot;
use tracing::info;

use crate::exporters::Exporter;
use crate::{Error, Report};

/// A handle to a running metrics server.
#[derive(Debug)]
pub struct MetricsServerHandle {
    /// The actual address the server is bound to.
    addr: SocketAddr,
    /// Sender half of the graceful-shutdown channel.
    shutdown_tx: Option<oneshot::Sender<()>>,
    /// Join handle for awaiting server completion.
    task_handle: tokio::task::JoinHandle<Result<(), Error>>,
}

impl MetricsServerHandle {
    /// Tells the server to stop without waiting for it to finish.
    pub fn stop(&mut self) -> Result<(), Error> {
        match self.shutdown_tx.take() {
            Some(tx) => {
                // Receiver may already be gone if the server errored out.
                let _ = tx.send(());
                Ok(())
            }
            None => Err(Error::AlreadyStopped),
        }
    }

    /// Waits until the server has stopped.
    pub async fn stopped(self) -> Result<(), Error> {
        self.task_handle.await.map_err(|err| Error::Join(err.to_string()))?
    }

    /// The socket address the server is listening on.
    pub fn addr(&self) -> &SocketAddr {
        &self.addr
    }
}

trait Hook: Fn() + Send + Sync {}
impl<T: Fn() + Send + Sync> Hook for T {}

type SharedHook = Arc<dyn Hook<Output = ()>>;
type Hooks = Vec<SharedHook>;

/// HTTP server rendering the metrics registry.
///
/// Registered hooks run on every request, covering metrics that are only
/// collectable at scrape time (process statistics, polled reporters).
pub struct Server<MetricsExporter> {
    hooks: Hooks,
    exporter: MetricsExporter,
}

impl<MetricsExporter> Server<MetricsExporter>
where
    MetricsExporter: Exporter + 'static,
{
    /// Creates a new metrics server using the given exporter.
    pub fn new(exporter: MetricsExporter) -> Self {
        Self { exporter, hooks: Vec::new() }
    }

    /// Adds reporters polled at every scrape.
    pub fn with_reports<I>(mut self, reports: I) -> Self
    where
        I: IntoIterator<Item = Box<dyn Report>>,
    {
        let hooks = reports.into_iter().map(|r| Arc::new(move || r.report()) as SharedHook);
        self.hooks.extend(hooks);
        self
    }

    /// Collects process metrics (cpu, memory, fds) at every scrape.
    pub fn with_process_metrics(mut self) -> Self {
        let process = metrics_process::Collector::default();
        process.describe();
        self.hooks.push(Arc::new(move || process.collect()));
        self
    }

    /// Starts serving metrics at the given address.
    ///
    /// Returns a handle that can be used to stop the server and wait for it
    /// to finish.
    pub async fn start(&self, addr: SocketAddr) -> Result<MetricsServerHandle, Error> {
        let hooks = self.hooks.clone();
        let exporter = self.exporter.clone();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let server = hyper::Server::try_bind(&addr)
            .map_err(|_| Error::FailedToBindAddress { addr })?
            .serve(make_service_fn(move |_| {
                let hooks = hooks.clone();
                let exporter = exporter.clone();
                async move {
                    Ok::<_, Infallible>(service_fn(move |_: Request<Body>| {
                        let hooks = hooks.clone();
                        let exporter = exporter.clone();
                        async move {
                            for hook in &hooks {
                                hook();
                            }
                            Ok::<_, Infallible>(Response::new(Body::from(exporter.export())))
                        }
                    }))
                }
            }));

        let actual_addr = server.local_addr();

        let task_handle = tokio::spawn(async move {
            server
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .map_err(Error::Server)
        });

        info!(target: "metrics", addr = %actual_addr, "Metrics server started.");

        Ok(MetricsServerHandle { addr: actual_addr, shutdown_tx: Some(shutdown_tx), task_handle })
    }
}

impl<MetricsExporter> fmt::Debug for Server<MetricsExporter> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("hooks", &format_args!("{} hook(s)", self.hooks.len()))
            .field("exporter", &"<exporter>")
            .finish()
    }
}

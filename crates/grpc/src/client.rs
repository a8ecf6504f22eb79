//! Dynamic gRPC client implementation.
//!
//! The client discovers method and message shapes through server reflection
//! and invokes unary methods generically: callers hand it a fully-qualified
//! method name and a JSON parameter document and get the response back as
//! canonical JSON bytes. Nothing outside this crate touches dynamic-typing
//! constructs.

use std::time::Duration;

use http::uri::PathAndQuery;
use prost_reflect::{DynamicMessage, SerializeOptions};
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint, Uri};

use crate::codec::DynamicCodec;
use crate::reflection::ReflectionResolver;
use crate::Error;

/// The default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// The default connection timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Builder for creating a dynamic gRPC client.
///
/// # Example
///
/// ```ignore
/// use std::time::Duration;
/// use yaci_grpc::GrpcClient;
///
/// let client = GrpcClient::builder("localhost:9090")
///     .timeout(Duration::from_secs(10))
///     .insecure(true)
///     .connect()
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct GrpcClientBuilder {
    endpoint: String,
    timeout: Duration,
    connect_timeout: Duration,
    insecure: bool,
    cancellation: CancellationToken,
}

impl GrpcClientBuilder {
    fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            insecure: false,
            cancellation: CancellationToken::new(),
        }
    }

    /// Sets the per-request timeout. Default is 5 seconds.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the connection timeout. Default is 5 seconds.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Uses plaintext instead of TLS. Default is TLS with native roots.
    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Binds the client to a cancellation scope. Every in-flight call and
    /// every retry backoff observes this token.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Connects to the gRPC server and returns a client.
    pub async fn connect(self) -> Result<GrpcClient, Error> {
        let uri: Uri = if self.endpoint.contains("://") {
            self.endpoint.parse()?
        } else {
            let scheme = if self.insecure { "http" } else { "https" };
            format!("{scheme}://{}", self.endpoint).parse()?
        };

        let mut endpoint = Endpoint::from(uri)
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout);

        if !self.insecure {
            endpoint = endpoint.tls_config(ClientTlsConfig::new().with_native_roots())?;
        }

        let channel = endpoint.connect().await?;
        Ok(GrpcClient::from_channel(channel, self.cancellation))
    }
}

/// A dynamic client for a reflection-capable gRPC endpoint.
///
/// The underlying [`Channel`] multiplexes concurrent calls over a single
/// HTTP/2 connection and is cheap to clone; one client instance is shared by
/// all extraction workers.
#[derive(Debug)]
pub struct GrpcClient {
    channel: Channel,
    resolver: ReflectionResolver,
    cancellation: CancellationToken,
}

impl GrpcClient {
    /// Creates a new client builder for the specified endpoint.
    ///
    /// The endpoint is a `host:port` pair; a scheme is derived from the TLS
    /// setting unless one is already present.
    pub fn builder(endpoint: impl Into<String>) -> GrpcClientBuilder {
        GrpcClientBuilder::new(endpoint)
    }

    /// Creates a client from an existing channel.
    pub fn from_channel(channel: Channel, cancellation: CancellationToken) -> Self {
        let resolver = ReflectionResolver::new(channel.clone());
        Self { channel, resolver, cancellation }
    }

    /// The cancellation scope this client is bound to.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Invokes a unary method by its fully-qualified name.
    ///
    /// `params` is parsed into the method's input message; unknown fields are
    /// rejected with [`Error::MalformedParams`]. The response is returned as
    /// canonical JSON: descriptor field order, default values emitted, so
    /// downstream consumers can rely on stable field paths.
    pub async fn invoke(
        &self,
        method_full_name: &str,
        params: &serde_json::Value,
    ) -> Result<Vec<u8>, Error> {
        let response = self.invoke_dynamic(method_full_name, params).await?;
        message_to_canonical_json(&response)
    }

    /// Invokes a unary method and returns the raw response message.
    ///
    /// Used by the height probes, which need to walk descriptor fields rather
    /// than re-parse JSON.
    pub(crate) async fn invoke_dynamic(
        &self,
        method_full_name: &str,
        params: &serde_json::Value,
    ) -> Result<DynamicMessage, Error> {
        let method = self.resolver.resolve_method(method_full_name).await?;

        let request = DynamicMessage::deserialize(method.input(), params.clone())
            .map_err(|err| Error::MalformedParams(err.to_string()))?;

        let path = PathAndQuery::try_from(format!(
            "/{}/{}",
            method.parent_service().full_name(),
            method.name()
        ))?;
        let codec = DynamicCodec::new(method.output());

        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        let call = async {
            grpc.ready().await.map_err(Error::Transport)?;
            let response = grpc.unary(tonic::Request::new(request), path, codec).await?;
            Ok(response.into_inner())
        };

        tokio::select! {
            _ = self.cancellation.cancelled() => Err(Error::Cancelled),
            result = call => result,
        }
    }
}

/// Serializes a message as canonical JSON.
///
/// Fields are written in descriptor order and defaults are not suppressed,
/// which keeps field paths stable across heights for the stored payloads.
pub(crate) fn message_to_canonical_json(message: &DynamicMessage) -> Result<Vec<u8>, Error> {
    let options = SerializeOptions::new().skip_default_fields(false);
    let mut buf = Vec::with_capacity(256);
    let mut serializer = serde_json::Serializer::new(&mut buf);
    message
        .serialize_with_options(&mut serializer, &options)
        .map_err(|err| Error::Serialize(err.to_string()))?;
    Ok(buf)
}

//! Server-reflection based method resolution.
//!
//! The resolver asks the remote endpoint for the file descriptors containing
//! a service symbol, folds them into a shared [`DescriptorPool`], and memoizes
//! the resolved [`MethodDescriptor`]s for the lifetime of the client.

use std::collections::HashMap;
use std::sync::Mutex;

use prost::Message;
use prost_reflect::{DescriptorPool, MethodDescriptor};
use prost_types::FileDescriptorProto;
use tonic::transport::Channel;
use tonic::Code;
use tracing::debug;

use crate::Error;

/// Splits a fully-qualified method name into its service and method parts.
///
/// The service is everything before the last dot, the method everything after
/// it: `cosmos.tx.v1beta1.Service.GetBlockWithTxs` resolves to the service
/// `cosmos.tx.v1beta1.Service` and the method `GetBlockWithTxs`.
pub fn parse_method_full_name(full_name: &str) -> Result<(&str, &str), Error> {
    let malformed = |reason| Error::MalformedMethodName { name: full_name.to_owned(), reason };

    if full_name.is_empty() {
        return Err(malformed("method full name is empty"));
    }

    let Some(dot) = full_name.rfind('.') else {
        return Err(malformed("no dot found"));
    };

    let (service, method) = (&full_name[..dot], &full_name[dot + 1..]);
    if service.is_empty() || method.is_empty() {
        return Err(malformed("invalid method full name format"));
    }

    Ok((service, method))
}

/// Which revision of the reflection protocol the server speaks.
///
/// Cosmos SDK nodes predate `grpc.reflection.v1` and only register the
/// `v1alpha` service; the resolver negotiates once and remembers the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReflectionVersion {
    V1,
    V1Alpha,
}

#[derive(Debug, Default)]
struct ResolverState {
    pool: DescriptorPool,
    methods: HashMap<String, MethodDescriptor>,
}

/// Resolves method descriptors through the server reflection service.
#[derive(Debug)]
pub struct ReflectionResolver {
    channel: Channel,
    state: Mutex<ResolverState>,
    version: Mutex<Option<ReflectionVersion>>,
}

impl ReflectionResolver {
    /// Creates a resolver that queries reflection over the given channel.
    pub fn new(channel: Channel) -> Self {
        Self { channel, state: Mutex::new(ResolverState::default()), version: Mutex::new(None) }
    }

    /// Resolves a fully-qualified method name to its descriptor.
    ///
    /// The first resolution of a method fetches the containing file
    /// descriptors from the server; subsequent calls are served from the
    /// in-memory cache.
    pub async fn resolve_method(&self, full_name: &str) -> Result<MethodDescriptor, Error> {
        let (service, method) = parse_method_full_name(full_name)?;

        if let Some(descriptor) = self.cached(full_name) {
            return Ok(descriptor);
        }

        let files = self.file_containing_symbol(service).await?;

        let mut state = self.state.lock().expect("descriptor cache lock poisoned");
        fold_file_descriptors(&mut state.pool, files)?;

        let service_desc = state
            .pool
            .get_service_by_name(service)
            .ok_or_else(|| Error::ServiceNotFound(service.to_owned()))?;
        let descriptor = service_desc
            .methods()
            .find(|m| m.name() == method)
            .ok_or_else(|| Error::MethodNotFound {
                service: service.to_owned(),
                method: method.to_owned(),
            })?;

        state.methods.insert(full_name.to_owned(), descriptor.clone());
        Ok(descriptor)
    }

    fn cached(&self, full_name: &str) -> Option<MethodDescriptor> {
        self.state.lock().expect("descriptor cache lock poisoned").methods.get(full_name).cloned()
    }

    /// Fetches the file descriptors containing `symbol`, negotiating the
    /// reflection protocol revision on first contact.
    async fn file_containing_symbol(
        &self,
        symbol: &str,
    ) -> Result<Vec<FileDescriptorProto>, Error> {
        let pinned = *self.version.lock().expect("reflection version lock poisoned");
        match pinned {
            Some(ReflectionVersion::V1) => self.file_containing_symbol_v1(symbol).await,
            Some(ReflectionVersion::V1Alpha) => self.file_containing_symbol_v1alpha(symbol).await,
            None => match self.file_containing_symbol_v1(symbol).await {
                Ok(files) => {
                    self.pin_version(ReflectionVersion::V1);
                    Ok(files)
                }
                Err(Error::Rpc(status)) if status.code() == Code::Unimplemented => {
                    debug!(target: "grpc", "Reflection v1 unimplemented, falling back to v1alpha.");
                    let files = self.file_containing_symbol_v1alpha(symbol).await?;
                    self.pin_version(ReflectionVersion::V1Alpha);
                    Ok(files)
                }
                Err(err) => Err(err),
            },
        }
    }

    fn pin_version(&self, version: ReflectionVersion) {
        *self.version.lock().expect("reflection version lock poisoned") = Some(version);
    }

    async fn file_containing_symbol_v1(
        &self,
        symbol: &str,
    ) -> Result<Vec<FileDescriptorProto>, Error> {
        use tonic_reflection::pb::v1::server_reflection_client::ServerReflectionClient;
        use tonic_reflection::pb::v1::server_reflection_request::MessageRequest;
        use tonic_reflection::pb::v1::server_reflection_response::MessageResponse;
        use tonic_reflection::pb::v1::ServerReflectionRequest;

        let mut client = ServerReflectionClient::new(self.channel.clone());
        let request = ServerReflectionRequest {
            host: String::new(),
            message_request: Some(MessageRequest::FileContainingSymbol(symbol.to_owned())),
        };

        let mut responses = client
            .server_reflection_info(futures::stream::iter([request]))
            .await?
            .into_inner();
        let response = responses
            .message()
            .await?
            .ok_or_else(|| Error::Reflection("reflection stream closed without a response".into()))?;

        match response.message_response {
            Some(MessageResponse::FileDescriptorResponse(files)) => {
                decode_file_descriptors(&files.file_descriptor_proto)
            }
            Some(MessageResponse::ErrorResponse(err)) => {
                Err(Error::Rpc(tonic::Status::new(Code::from_i32(err.error_code), err.error_message)))
            }
            other => Err(Error::Reflection(format!("unexpected reflection response: {other:?}"))),
        }
    }

    async fn file_containing_symbol_v1alpha(
        &self,
        symbol: &str,
    ) -> Result<Vec<FileDescriptorProto>, Error> {
        use tonic_reflection::pb::v1alpha::server_reflection_client::ServerReflectionClient;
        use tonic_reflection::pb::v1alpha::server_reflection_request::MessageRequest;
        use tonic_reflection::pb::v1alpha::server_reflection_response::MessageResponse;
        use tonic_reflection::pb::v1alpha::ServerReflectionRequest;

        let mut client = ServerReflectionClient::new(self.channel.clone());
        let request = ServerReflectionRequest {
            host: String::new(),
            message_request: Some(MessageRequest::FileContainingSymbol(symbol.to_owned())),
        };

        let mut responses = client
            .server_reflection_info(futures::stream::iter([request]))
            .await?
            .into_inner();
        let response = responses
            .message()
            .await?
            .ok_or_else(|| Error::Reflection("reflection stream closed without a response".into()))?;

        match response.message_response {
            Some(MessageResponse::FileDescriptorResponse(files)) => {
                decode_file_descriptors(&files.file_descriptor_proto)
            }
            Some(MessageResponse::ErrorResponse(err)) => {
                Err(Error::Rpc(tonic::Status::new(Code::from_i32(err.error_code), err.error_message)))
            }
            other => Err(Error::Reflection(format!("unexpected reflection response: {other:?}"))),
        }
    }
}

fn decode_file_descriptors(encoded: &[Vec<u8>]) -> Result<Vec<FileDescriptorProto>, Error> {
    encoded
        .iter()
        .map(|bytes| {
            FileDescriptorProto::decode(bytes.as_slice())
                .map_err(|err| Error::Descriptor(format!("invalid file descriptor proto: {err}")))
        })
        .collect()
}

/// Folds file descriptors into the pool, retrying until dependency order
/// settles. Reflection returns a file together with its transitive
/// dependencies but in no particular order.
fn fold_file_descriptors(
    pool: &mut DescriptorPool,
    mut files: Vec<FileDescriptorProto>,
) -> Result<(), Error> {
    while !files.is_empty() {
        let before = files.len();
        files.retain(|fd| {
            pool.get_file_by_name(fd.name()).is_none()
                && pool.add_file_descriptor_proto(fd.clone()).is_err()
        });

        if files.len() == before {
            let unresolved: Vec<_> = files.iter().map(|fd| fd.name()).collect();
            return Err(Error::Descriptor(format!(
                "unresolvable descriptor dependencies: {unresolved:?}"
            )));
        }
    }

    Ok(())
}

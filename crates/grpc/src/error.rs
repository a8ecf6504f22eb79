use tonic::{Code, Status};

/// Error type for dynamic gRPC client operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The method full name could not be split into a service and a method.
    #[error("malformed method full name '{name}': {reason}")]
    MalformedMethodName { name: String, reason: &'static str },

    /// The request parameters did not match the input message descriptor.
    #[error("invalid request parameters: {0}")]
    MalformedParams(String),

    /// A field named in a dot-delimited path does not exist on the message.
    #[error("field '{field}' not found in message '{message}'")]
    FieldNotFound { field: String, message: String },

    /// A non-terminal path segment resolved to a scalar field.
    #[error("field '{field}' is not a message")]
    NotAMessage { field: String },

    /// Error status surfaced from the remote endpoint.
    #[error(transparent)]
    Rpc(#[from] Status),

    /// Transport-level failure from tonic.
    #[error(transparent)]
    Transport(#[from] tonic::transport::Error),

    /// The endpoint could not be parsed into a URI.
    #[error("invalid endpoint URI: {0}")]
    InvalidUri(#[from] http::uri::InvalidUri),

    /// The driving cancellation scope was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Server reflection does not expose the requested service.
    #[error("service '{0}' not exposed by server reflection")]
    ServiceNotFound(String),

    /// The service descriptor does not carry the requested method.
    #[error("method '{method}' not found on service '{service}'")]
    MethodNotFound { service: String, method: String },

    /// The reflection stream answered with something we cannot use.
    #[error("reflection protocol error: {0}")]
    Reflection(String),

    /// The returned file descriptor set could not be assembled into a pool.
    #[error("malformed descriptor set: {0}")]
    Descriptor(String),

    /// The response message could not be rendered as canonical JSON.
    #[error("failed to serialize response message: {0}")]
    Serialize(String),

    /// A height field carried a value that does not parse as u64.
    #[error("invalid height value '{0}'")]
    InvalidHeight(String),

    /// The earliest available height could not be determined.
    #[error("failed to determine earliest block height: {0}")]
    EarliestHeightUnknown(#[source] Box<Error>),
}

impl Error {
    /// Whether the error represents an observed cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Rpc(status) => status.code() == Code::Cancelled,
            _ => false,
        }
    }

    /// Whether a retry of the failed operation may succeed.
    ///
    /// Malformed inputs, missing descriptors, and cancellation are terminal;
    /// remote statuses and transport failures are transient.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Rpc(status) => status.code() != Code::Cancelled,
            Self::Transport(_) | Self::Reflection(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_statuses_are_retriable() {
        assert!(Error::from(Status::unavailable("connection reset")).is_retriable());
        assert!(Error::from(Status::internal("boom")).is_retriable());
    }

    #[test]
    fn terminal_kinds_are_not_retriable() {
        let malformed = Error::MalformedMethodName { name: String::new(), reason: "empty" };
        assert!(!malformed.is_retriable());
        assert!(!Error::MalformedParams("unknown field".into()).is_retriable());
        assert!(!Error::Cancelled.is_retriable());
        assert!(!Error::FieldNotFound { field: "x".into(), message: "m".into() }.is_retriable());
        assert!(!Error::NotAMessage { field: "x".into() }.is_retriable());
    }

    #[test]
    fn cancelled_status_maps_to_cancelled() {
        let err = Error::from(Status::cancelled("ctx done"));
        assert!(err.is_cancelled());
        assert!(!err.is_retriable());
    }
}

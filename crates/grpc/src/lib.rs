#![cfg_attr(not(test), warn(unused_crate_dependencies))]

//! Dynamic gRPC client over server reflection.
//!
//! The extraction pipeline talks to nodes whose RPC surface is only known at
//! runtime. This crate discovers services, methods, and message shapes via
//! the server reflection protocol and exposes a single generic operation to
//! the rest of the system: invoke a fully-qualified unary method with a JSON
//! parameter document and receive the response as canonical JSON bytes.
//!
//! On top of the caller sit the retry wrapper and the two height probes
//! (latest via the node status message, earliest via a pruned-node-aware
//! probe of block 1).

mod client;
mod codec;
mod error;
mod field;
pub mod probe;
mod reflection;
mod retry;

pub use client::{GrpcClient, GrpcClientBuilder, DEFAULT_CONNECT_TIMEOUT, DEFAULT_TIMEOUT};
pub use error::Error;
pub use field::get_nested_field;
pub use probe::parse_lowest_height_from_error;
pub use reflection::{parse_method_full_name, ReflectionResolver};
pub use retry::{with_retries, RetryClass};

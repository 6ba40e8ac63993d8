//! Infrastructure and setup-time error types.
//!
//! Request-time failures are [`Fault`](crate::Fault) values and never surface
//! here. These types cover the two phases that happen outside a request:
//! building the route table, and binding/serving.

use http::Method;

use crate::config::ConfigError;

/// Raised synchronously by the registration API. Fatal to setup; never
/// produced while serving.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("route `{method} {path}` has no handlers")]
    EmptyChain { method: Method, path: String },

    #[error("route `{method} {path}` is already registered")]
    Duplicate { method: Method, path: String },

    #[error("invalid route pattern `{path}`: {reason}")]
    InvalidPattern { path: String, reason: String },
}

/// The error type returned by restline's fallible server operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid bind address `{addr}`: {source}")]
    Addr {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Route(#[from] ConfigurationError),

    #[error("logging: {0}")]
    Logging(String),
}

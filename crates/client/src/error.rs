//! Client error types.

use thiserror::Error;

/// Errors surfaced when constructing or configuring a client.
///
/// Runtime connection trouble is never an error here; it shows up as
/// [`ConnectionState`](crate::ws::ConnectionState) and `last_error` instead.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("invalid API base URL: {0}")]
    InvalidBaseUrl(String),

    #[error("unsupported URL scheme `{0}` (expected http, https, ws or wss)")]
    UnsupportedScheme(String),

    #[error("client has shut down")]
    ShutDown,
}

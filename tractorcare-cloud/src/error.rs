//! Cloud client error types.

use thiserror::Error;

/// Result type for client setup.
pub type CloudResult<T> = Result<T, CloudError>;

/// Errors raised while building the HTTP client.
///
/// Request failures are reported as `tractorcare_sync::GatewayError`
/// so the synchronizer can classify them.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
